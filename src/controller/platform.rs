//! Platform controller implementation
//!
//! The controller composes the operand handlers: one reconcile pass builds a
//! request from the live Platform, runs `ensure` for every operand kind,
//! then publishes the aggregated status (related objects, conditions,
//! upgrade progression). Scheduling, watches and retry/backoff policy belong
//! to the kube runtime around this module.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{Platform, PlatformStatus};
use crate::operand::{
    platform_handlers, reconcile_operands, OperandReport, ReconcileRequest, TriggerSource,
};
use crate::removal::{ensure_removed, RemovalOptions};
use crate::store::{KubeStore, ObjectStore};
use crate::{Error, Result, OPERATOR_VERSION};

/// Finalizer guaranteeing operand cleanup runs before the Platform is gone
pub const PLATFORM_FINALIZER: &str = "conductor.dev/operand-cleanup";

/// How long one deletion pass waits for operands to disappear before giving
/// the reconcile back to the queue for a retry
const OPERAND_REMOVAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Persists changes to the Platform itself: the status subresource after a
/// reconcile, and the finalizer list around deletion.
///
/// Abstracted so tests can capture what would be written; the production
/// implementation merge-patches through the Kubernetes API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformWriter: Send + Sync {
    /// Write the status of the named Platform
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PlatformStatus,
    ) -> Result<()>;

    /// Replace the named Platform's finalizer list
    async fn set_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: &[String],
    ) -> Result<()>;
}

/// Real Platform writer backed by the Kubernetes API
pub struct KubePlatformWriter {
    client: Client,
}

impl KubePlatformWriter {
    /// Create a new writer around the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, namespace: &str) -> Api<Platform> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PlatformWriter for KubePlatformWriter {
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PlatformStatus,
    ) -> Result<()> {
        self.api_for(namespace)
            .patch_status(
                name,
                &PatchParams::apply("conductor-controller"),
                &Patch::Merge(&serde_json::json!({ "status": status })),
            )
            .await?;
        Ok(())
    }

    async fn set_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: &[String],
    ) -> Result<()> {
        self.api_for(namespace)
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Merge(&serde_json::json!({ "metadata": { "finalizers": finalizers } })),
            )
            .await?;
        Ok(())
    }
}

/// Controller context containing shared state and clients
///
/// Use [`Context::builder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client).build();
/// ```
pub struct Context {
    /// Object store the operand handlers converge against
    pub store: Arc<dyn ObjectStore>,
    /// Persistence for the Platform's status and finalizers
    pub platforms: Arc<dyn PlatformWriter>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with mock collaborators
    #[cfg(test)]
    pub fn for_testing(store: Arc<dyn ObjectStore>, platforms: Arc<dyn PlatformWriter>) -> Self {
        Self { store, platforms }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    store: Option<Arc<dyn ObjectStore>>,
    platforms: Option<Arc<dyn PlatformWriter>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            store: None,
            platforms: None,
        }
    }

    /// Override the object store (primarily for testing)
    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the Platform writer (primarily for testing)
    pub fn platform_writer(mut self, platforms: Arc<dyn PlatformWriter>) -> Self {
        self.platforms = Some(platforms);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(KubeStore::new(self.client.clone()))),
            platforms: self
                .platforms
                .unwrap_or_else(|| Arc::new(KubePlatformWriter::new(self.client.clone()))),
        }
    }
}

fn namespace_of(platform: &Platform) -> &str {
    platform.metadata.namespace.as_deref().unwrap_or("default")
}

fn has_finalizer(platform: &Platform) -> bool {
    platform
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == PLATFORM_FINALIZER))
}

async fn add_finalizer(platform: &Platform, ctx: &Context) -> Result<()> {
    let mut finalizers = platform.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(PLATFORM_FINALIZER.to_string());
    ctx.platforms
        .set_finalizers(&platform.name_any(), namespace_of(platform), &finalizers)
        .await
}

async fn remove_finalizer(platform: &Platform, ctx: &Context) -> Result<()> {
    let finalizers: Vec<String> = platform
        .metadata
        .finalizers
        .iter()
        .flatten()
        .filter(|f| *f != PLATFORM_FINALIZER)
        .cloned()
        .collect();
    ctx.platforms
        .set_finalizers(&platform.name_any(), namespace_of(platform), &finalizers)
        .await
}

/// Tear down a deleted Platform's operands, then release the finalizer.
///
/// Each removal is ownership-protected, so an operand some other Platform
/// owns (the shared priority-class name, say) survives. Waits for foreground
/// deletion bounded by the request's cancellation token; a timeout surfaces
/// to the error policy and the next reconcile picks up where this one left
/// off.
async fn handle_deletion(platform: &Platform, ctx: &Context) -> Result<Action> {
    let name = platform.name_any();

    if !has_finalizer(platform) {
        debug!(platform = %name, "no finalizer, allowing deletion");
        return Ok(Action::await_change());
    }

    info!(platform = %name, "platform deleted, removing operands");

    let req = ReconcileRequest::new(platform.clone());
    let deadline = {
        let cancel = req.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(OPERAND_REMOVAL_TIMEOUT).await;
            cancel.cancel();
        })
    };

    let options = RemovalOptions {
        wait: true,
        protect_foreign: true,
        ..Default::default()
    };
    // reverse of the ensure order, so the Engine goes before its config
    for handler in platform_handlers().iter().rev() {
        let key = handler.object_key(&req.platform);
        ensure_removed(ctx.store.as_ref(), &key, &name, options, &req.cancel).await?;
    }
    deadline.abort();

    remove_finalizer(platform, ctx).await?;
    Ok(Action::await_change())
}

fn upgrade_in_progress(platform: &Platform) -> bool {
    platform
        .status
        .as_ref()
        .and_then(|s| s.version.as_deref())
        != Some(OPERATOR_VERSION)
}

fn upgrade_complete(reports: &[OperandReport]) -> bool {
    reports.iter().all(|report| {
        report
            .result
            .as_ref()
            .map(|res| res.upgrade_done)
            .unwrap_or(false)
    })
}

/// Reconcile a Platform resource
///
/// A Platform being deleted has its operands removed instead of converged.
/// Otherwise this runs the `ensure` protocol for every operand, isolating
/// failures per operand, then publishes the aggregated status. A failed
/// operand surfaces its error after the status write so the runtime's
/// backoff applies, while the other operands have already converged this
/// pass.
#[instrument(skip(platform, ctx), fields(platform = %platform.name_any()))]
pub async fn reconcile(platform: Arc<Platform>, ctx: Arc<Context>) -> Result<Action> {
    info!("reconciling platform");

    if platform.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&platform, &ctx).await;
    }

    // The finalizer must be persisted before the first operand exists, or a
    // promptly deleted Platform would leak everything it just created.
    if !has_finalizer(&platform) {
        info!("adding cleanup finalizer");
        add_finalizer(&platform, &ctx).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let upgrade_mode = upgrade_in_progress(&platform);
    if upgrade_mode {
        debug!(version = OPERATOR_VERSION, "upgrade in progress");
    }

    let mut req = ReconcileRequest::new((*platform).clone())
        .with_trigger(TriggerSource::Primary)
        .with_upgrade_mode(upgrade_mode);

    let mut handlers = platform_handlers();
    let reports = reconcile_operands(&mut req, ctx.store.as_ref(), &mut handlers).await;

    let status = req.platform.status.get_or_insert_with(Default::default);
    status.conditions = req.conditions.to_vec();
    if upgrade_mode && upgrade_complete(&reports) {
        info!(version = OPERATOR_VERSION, "all operands converged on the new version");
        status.version = Some(OPERATOR_VERSION.to_string());
    }

    ctx.platforms
        .patch_status(&platform.name_any(), namespace_of(&platform), status)
        .await?;

    // Surface the first operand failure for the runtime's backoff; the
    // remaining operands already had their chance this pass.
    if let Some(err) = reports.into_iter().find_map(|report| report.result.err()) {
        return Err(err);
    }

    Ok(Action::requeue(Duration::from_secs(60)))
}

/// Error policy for the controller
///
/// Called when reconciliation fails; requeues with a short delay and leaves
/// backoff escalation to the runtime.
pub fn error_policy(platform: Arc<Platform>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        platform = %platform.name_any(),
        "reconciliation failed"
    );
    if matches!(error, Error::Overlay(_) | Error::Build(_)) {
        // user must fix the spec; a fast retry only burns the queue
        warn!("declared state is invalid, waiting before retrying");
        return Action::requeue(Duration::from_secs(60));
    }
    Action::requeue(Duration::from_secs(5))
}
