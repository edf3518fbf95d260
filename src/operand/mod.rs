//! The generic operand `ensure` protocol
//!
//! One reconcile request fans out into an `ensure` pass per operand kind.
//! Every kind implements the small [`OperandHooks`] capability interface;
//! [`OperandHandler`] runs the same convergence algorithm against all of
//! them: read the live object through the per-invocation cache, create it if
//! absent, otherwise normalize, merge the declared intent and write back
//! only when the managed fields differ. Each pass also registers the operand
//! in the Platform's related-object list and, when the operand is converged,
//! folds its reported conditions into the request.
//!
//! Failures are per-operand: an error aborts the remaining steps for that
//! operand only, and [`reconcile_operands`] keeps going so independent
//! operands still converge.

mod config;
mod engine;
mod priority_class;

pub use config::{
    new_engine_config, EngineConfigHandler, CONFIG_NAME, FEATURE_GATES_KEY, UPDATABLE_KEYS,
    UPGRADE_KEYS, UPGRADE_REMOVE_KEYS,
};
pub use engine::{new_engine, EngineHandler, MANAGED_ENGINE_GATES};
pub use priority_class::{new_priority_class, PriorityClassHandler, PRIORITY_CLASS_NAME};

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::conditions::{self, ConditionSet};
use crate::crd::{Condition, Platform};
use crate::related::{add_to_related_objects, object_reference};
use crate::store::{ObjectKey, ObjectStore};
use crate::Result;

/// What caused this reconcile to run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TriggerSource {
    /// The Platform itself changed (or a periodic resync fired)
    #[default]
    Primary,
    /// A watched operand changed directly
    Operand,
}

/// Everything one reconciliation invocation carries.
///
/// The request owns a working copy of the Platform; handlers mutate its
/// status (related objects) and the condition set in place, and the
/// controller persists both afterwards. Discarded at the end of the
/// invocation.
#[derive(Debug)]
pub struct ReconcileRequest {
    /// Working copy of the primary resource
    pub platform: Platform,
    /// Conditions aggregated from the operands this pass
    pub conditions: ConditionSet,
    /// Who triggered the reconcile; decides overwrite semantics
    pub trigger: TriggerSource,
    /// True while the operator version differs from the last fully
    /// reconciled version
    pub upgrade_mode: bool,
    /// Cancellation signal honored by blocking operations (deletion waits)
    pub cancel: CancellationToken,
}

impl ReconcileRequest {
    /// Request with default trigger (primary) and no upgrade in flight
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            conditions: ConditionSet::new(),
            trigger: TriggerSource::Primary,
            upgrade_mode: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the trigger source
    pub fn with_trigger(mut self, trigger: TriggerSource) -> Self {
        self.trigger = trigger;
        self
    }

    /// Set upgrade mode
    pub fn with_upgrade_mode(mut self, upgrade_mode: bool) -> Self {
        self.upgrade_mode = upgrade_mode;
        self
    }

    /// True when the Platform (not an operand) triggered this reconcile
    pub fn primary_triggered(&self) -> bool {
        self.trigger == TriggerSource::Primary
    }
}

/// Outcome of one `ensure` pass over one operand
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnsureResult {
    /// The operand did not exist and was created
    pub created: bool,
    /// The live operand differed from the declared intent and was written
    pub updated: bool,
    /// The write reverted a direct edit of the operand (operand-triggered
    /// reconcile), as opposed to rolling out a Platform change
    pub overwritten: bool,
    /// In upgrade mode: the operand has converged on the new version
    pub upgrade_done: bool,
}

/// What a kind-specific update hook observed and did
#[derive(Clone, Debug)]
pub struct UpdateOutcome {
    /// Whether a write was issued
    pub updated: bool,
    /// The live object after the pass (written form, or the original when
    /// nothing changed); used for status bookkeeping
    pub object: DynamicObject,
}

/// The per-kind capability interface the generic handler runs against.
///
/// Implementations keep their typed view internally and convert at the
/// [`DynamicObject`] boundary. All methods must be safe to call repeatedly:
/// the same reconcile may run them again after a partial failure.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperandHooks: Send + Sync {
    /// Kind name used in conditions, logs and reports
    fn kind(&self) -> &'static str;

    /// Identity of this operand for the given Platform
    fn object_key(&self, platform: &Platform) -> ObjectKey;

    /// Build the desired object from the Platform's declared state.
    ///
    /// Pure apart from the Platform input; must apply any declared overlay
    /// so create and update paths see the same object. A failure here aborts
    /// the operand without touching the store.
    fn make_desired(&self, platform: &Platform) -> Result<DynamicObject>;

    /// Kind-specific normalization of the live object before comparison
    /// (e.g. collapsing an empty configuration block)
    fn just_before_check(&self, _found: &mut DynamicObject) {}

    /// Merge the desired state into the live object and write it back if the
    /// managed fields differ. Must leave externally-owned fields untouched.
    async fn update_object(
        &self,
        req: &ReconcileRequest,
        store: &dyn ObjectStore,
        found: &DynamicObject,
        desired: &DynamicObject,
    ) -> Result<UpdateOutcome>;

    /// The conditions this operand reports about itself; `None` when the
    /// kind has no condition reporting at all
    fn conditions(&self, _found: &DynamicObject) -> Option<Vec<Condition>> {
        None
    }

    /// Whether the live operand has reached the running operator version;
    /// kinds without version reporting have nothing to wait for
    fn upgrade_done(&self, _found: &DynamicObject) -> bool {
        true
    }
}

/// Per-invocation read cache: at most one materialized full read.
///
/// Identity is observable - two reads through the same cache return the same
/// `Arc`, and after invalidation a fresh instance is materialized.
#[derive(Debug, Default)]
struct ReadCache {
    slot: Option<Arc<DynamicObject>>,
}

impl ReadCache {
    async fn read_through(
        &mut self,
        store: &dyn ObjectStore,
        key: &ObjectKey,
    ) -> Result<Option<Arc<DynamicObject>>> {
        if let Some(cached) = &self.slot {
            return Ok(Some(Arc::clone(cached)));
        }
        match store.get(key).await? {
            Some(obj) => {
                let obj = Arc::new(obj);
                self.slot = Some(Arc::clone(&obj));
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    fn invalidate(&mut self) {
        self.slot = None;
    }
}

/// The generic operand handler: one hooks implementation plus the owned
/// cache slot, driven through [`OperandHandler::ensure`]
pub struct OperandHandler<H: OperandHooks> {
    hooks: H,
    cache: ReadCache,
}

impl<H: OperandHooks> OperandHandler<H> {
    /// Wrap a hooks implementation
    pub fn new(hooks: H) -> Self {
        Self {
            hooks,
            cache: ReadCache::default(),
        }
    }

    /// Read the live operand through the per-invocation cache.
    ///
    /// A second call in the same invocation returns the identical cached
    /// instance without touching the store.
    pub async fn get_full_object(
        &mut self,
        store: &dyn ObjectStore,
        platform: &Platform,
    ) -> Result<Option<Arc<DynamicObject>>> {
        let key = self.hooks.object_key(platform);
        self.cache.read_through(store, &key).await
    }

    /// Invalidate the per-invocation cache; the next read materializes a new
    /// instance
    pub fn reset(&mut self) {
        self.cache.invalidate();
    }

    /// Run the convergence protocol for this operand.
    ///
    /// Safe to re-run after partial failure; the cache is invalidated when
    /// the pass finishes so consecutive invocations always observe the
    /// store.
    pub async fn ensure(
        &mut self,
        req: &mut ReconcileRequest,
        store: &dyn ObjectStore,
    ) -> Result<EnsureResult> {
        let result = self.run(req, store).await;
        self.reset();
        result
    }

    async fn run(
        &mut self,
        req: &mut ReconcileRequest,
        store: &dyn ObjectStore,
    ) -> Result<EnsureResult> {
        let kind = self.hooks.kind();
        let key = self.hooks.object_key(&req.platform);

        let Some(found) = self.get_full_object(store, &req.platform).await? else {
            let desired = self.hooks.make_desired(&req.platform)?;
            info!(kind, key = %key, "operand absent, creating");
            let created = store.create(&key, &desired).await?;
            self.register(req, &created)?;
            return Ok(EnsureResult {
                created: true,
                ..Default::default()
            });
        };

        let mut live = (*found).clone();
        self.hooks.just_before_check(&mut live);
        let desired = self.hooks.make_desired(&req.platform)?;
        let outcome = self.hooks.update_object(req, store, &live, &desired).await?;

        self.register(req, &outcome.object)?;

        let mut result = EnsureResult {
            updated: outcome.updated,
            overwritten: outcome.updated && !req.primary_triggered(),
            ..Default::default()
        };

        if outcome.updated {
            info!(
                kind,
                key = %key,
                overwritten = result.overwritten,
                "operand updated"
            );
        } else {
            // Converged: the operand's own reporting is current, so fold it
            // into the Platform's view. After a write it would describe the
            // pre-write object and is picked up next reconcile instead.
            debug!(kind, key = %key, "operand already converged");
            if let Some(reported) = self.hooks.conditions(&outcome.object) {
                conditions::aggregate(kind, &reported, &mut req.conditions);
            }
            result.upgrade_done = req.upgrade_mode && self.hooks.upgrade_done(&outcome.object);
        }

        Ok(result)
    }

    fn register(&self, req: &mut ReconcileRequest, object: &DynamicObject) -> Result<()> {
        let reference = object_reference(object)?;
        let status = req.platform.status.get_or_insert_with(Default::default);
        if add_to_related_objects(&mut status.related_objects, reference) {
            debug!(kind = self.hooks.kind(), "related objects updated");
        }
        Ok(())
    }
}

// =============================================================================
// Orchestration across operand kinds
// =============================================================================

/// Object-safe form of [`OperandHandler::ensure`], so heterogeneous handlers
/// can run in one loop
#[async_trait]
pub trait EnsureHandler: Send {
    /// Kind name for reports and logs
    fn kind(&self) -> &'static str;

    /// Identity of this operand for the given Platform
    fn object_key(&self, platform: &Platform) -> ObjectKey;

    /// Run the convergence protocol
    async fn ensure(
        &mut self,
        req: &mut ReconcileRequest,
        store: &dyn ObjectStore,
    ) -> Result<EnsureResult>;
}

#[async_trait]
impl<H: OperandHooks> EnsureHandler for OperandHandler<H> {
    fn kind(&self) -> &'static str {
        self.hooks.kind()
    }

    fn object_key(&self, platform: &Platform) -> ObjectKey {
        self.hooks.object_key(platform)
    }

    async fn ensure(
        &mut self,
        req: &mut ReconcileRequest,
        store: &dyn ObjectStore,
    ) -> Result<EnsureResult> {
        OperandHandler::ensure(self, req, store).await
    }
}

/// One operand's outcome within a reconcile
#[derive(Debug)]
pub struct OperandReport {
    /// Operand kind name
    pub kind: &'static str,
    /// The ensure outcome, or the error that aborted this operand
    pub result: Result<EnsureResult>,
}

/// The full handler set for a Platform, in ensure order.
///
/// Built fresh per reconcile so no cache state leaks between invocations.
pub fn platform_handlers() -> Vec<Box<dyn EnsureHandler>> {
    vec![
        Box::new(OperandHandler::new(PriorityClassHandler::default())),
        Box::new(OperandHandler::new(EngineConfigHandler::default())),
        Box::new(OperandHandler::new(EngineHandler::default())),
    ]
}

/// Run `ensure` for every operand, isolating failures per operand.
///
/// A failing operand is reported and skipped; the remaining operands still
/// converge. The caller decides the overall requeue policy from the reports.
pub async fn reconcile_operands(
    req: &mut ReconcileRequest,
    store: &dyn ObjectStore,
    handlers: &mut [Box<dyn EnsureHandler>],
) -> Vec<OperandReport> {
    let mut reports = Vec::with_capacity(handlers.len());
    for handler in handlers.iter_mut() {
        let kind = handler.kind();
        let result = handler.ensure(req, store).await;
        if let Err(err) = &result {
            warn!(kind, error = %err, "operand ensure failed");
        }
        reports.push(OperandReport { kind, result });
    }
    reports
}
