//! The Engine operand: builder and ensure hooks
//!
//! The Engine is the workload-manager custom resource the Platform drives.
//! Conductor owns its uninstall strategy, node placement and the managed
//! slice of its feature-gate list; gates added directly by users survive
//! every reconcile.

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;

use crate::crd::{Engine, EngineConfiguration, EngineSpec, Platform, UninstallStrategy};
use crate::gates::reconcile_gates;
use crate::operand::{OperandHooks, ReconcileRequest, UpdateOutcome};
use crate::overlay::apply_overlay;
use crate::placement::{mirrored_placement, placement_equal};
use crate::store::{from_dynamic, to_dynamic, ObjectKey, ObjectStore};
use crate::{Result, ENGINE_OVERLAY_ANNOTATION, OPERATOR_VERSION};

/// The feature gates Conductor manages on the Engine.
///
/// Gates outside this list are never added or removed here, whatever the
/// Platform declares.
pub const MANAGED_ENGINE_GATES: &[&str] = &[
    "LiveReschedule",
    "HotplugResources",
    "IncrementalBackup",
    "NodeIsolation",
];

const API_VERSION: &str = "conductor.dev/v1alpha1";
const KIND: &str = "Engine";

fn engine_name(platform: &Platform) -> String {
    format!("engine-{}", platform.name_any())
}

fn managed_labels(platform: &Platform, version: &str) -> std::collections::BTreeMap<String, String> {
    std::collections::BTreeMap::from([
        (crate::PLATFORM_LABEL.to_string(), platform.name_any()),
        (crate::COMPONENT_LABEL.to_string(), "engine".to_string()),
        (crate::VERSION_LABEL.to_string(), version.to_string()),
    ])
}

/// Build the desired Engine for a Platform.
///
/// Declared overlay included, so the create and update paths both see the
/// final patched object.
pub fn new_engine(platform: &Platform, managed_gates: &[&str], version: &str) -> Result<Engine> {
    let enabled: Vec<String> = managed_gates
        .iter()
        .filter(|gate| platform.spec.gate_enabled(gate))
        .map(|gate| gate.to_string())
        .collect();

    let mut engine = Engine::new(
        &engine_name(platform),
        EngineSpec {
            uninstall_strategy: Some(UninstallStrategy::default()),
            configuration: (!enabled.is_empty())
                .then(|| EngineConfiguration { feature_gates: enabled }),
            infra: mirrored_placement(platform.spec.infra.as_ref()),
            workloads: mirrored_placement(platform.spec.workloads.as_ref()),
        },
    );
    engine.metadata.namespace = platform.metadata.namespace.clone();
    engine.metadata.labels = Some(managed_labels(platform, version));

    apply_overlay(platform, ENGINE_OVERLAY_ANNOTATION, engine)
}

/// Field-scoped equality over the managed parts of an Engine spec
fn specs_equal(a: &EngineSpec, b: &EngineSpec) -> bool {
    a.uninstall_strategy == b.uninstall_strategy
        && a.configuration == b.configuration
        && placement_equal(a.infra.as_ref(), b.infra.as_ref())
        && placement_equal(a.workloads.as_ref(), b.workloads.as_ref())
}

/// Ensure hooks for the Engine operand
pub struct EngineHandler {
    managed_gates: &'static [&'static str],
    version: String,
}

impl Default for EngineHandler {
    fn default() -> Self {
        Self {
            managed_gates: MANAGED_ENGINE_GATES,
            version: OPERATOR_VERSION.to_string(),
        }
    }
}

impl EngineHandler {
    /// Handler with a substitute managed-gate list (tests)
    #[cfg(test)]
    pub fn with_managed_gates(managed_gates: &'static [&'static str]) -> Self {
        Self {
            managed_gates,
            ..Default::default()
        }
    }
}

#[async_trait]
impl OperandHooks for EngineHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn object_key(&self, platform: &Platform) -> ObjectKey {
        ObjectKey::namespaced(
            API_VERSION,
            KIND,
            platform.metadata.namespace.as_deref().unwrap_or("default"),
            engine_name(platform),
        )
    }

    fn make_desired(&self, platform: &Platform) -> Result<DynamicObject> {
        let engine = new_engine(platform, self.managed_gates, &self.version)?;
        to_dynamic(API_VERSION, KIND, &engine)
    }

    fn just_before_check(&self, found: &mut DynamicObject) {
        // An empty-but-present configuration block means the same as an
        // absent one; collapse it so the comparison doesn't loop forever.
        let Ok(mut engine) = from_dynamic::<Engine>(found) else {
            return;
        };
        if engine
            .spec
            .configuration
            .as_ref()
            .is_some_and(EngineConfiguration::is_empty)
        {
            engine.spec.configuration = None;
            if let Ok(normalized) = to_dynamic(API_VERSION, KIND, &engine) {
                *found = normalized;
            }
        }
    }

    async fn update_object(
        &self,
        req: &ReconcileRequest,
        store: &dyn ObjectStore,
        found: &DynamicObject,
        desired: &DynamicObject,
    ) -> Result<UpdateOutcome> {
        let live: Engine = from_dynamic(found)?;
        let want: Engine = from_dynamic(desired)?;

        let mut merged = live.clone();
        merged.spec.uninstall_strategy = want.spec.uninstall_strategy.clone();
        merged.spec.infra = want.spec.infra.clone();
        merged.spec.workloads = want.spec.workloads.clone();

        // Gate list: managed gates follow the declaration, user-added gates
        // stay put, and anything the desired object carries (overlay output
        // included) ends up present.
        let current = live
            .spec
            .configuration
            .as_ref()
            .map(|c| c.feature_gates.clone())
            .unwrap_or_default();
        let mut next = reconcile_gates(&req.platform.spec.feature_gates, self.managed_gates, &current);
        if let Some(configuration) = &want.spec.configuration {
            for gate in &configuration.feature_gates {
                if !next.contains(gate) {
                    next.push(gate.clone());
                }
            }
        }
        merged.spec.configuration =
            (!next.is_empty()).then(|| EngineConfiguration { feature_gates: next });

        // Managed labels are enforced; foreign labels are preserved.
        let labels = merged.metadata.labels.get_or_insert_with(Default::default);
        let mut labels_changed = false;
        if let Some(want_labels) = &want.metadata.labels {
            for (k, v) in want_labels {
                if labels.get(k) != Some(v) {
                    labels.insert(k.clone(), v.clone());
                    labels_changed = true;
                }
            }
        }

        if specs_equal(&merged.spec, &live.spec) && !labels_changed {
            return Ok(UpdateOutcome {
                updated: false,
                object: found.clone(),
            });
        }

        let key = self.object_key(&req.platform);
        let written = store
            .update(&key, &to_dynamic(API_VERSION, KIND, &merged)?)
            .await?;
        Ok(UpdateOutcome {
            updated: true,
            object: written,
        })
    }

    fn conditions(&self, found: &DynamicObject) -> Option<Vec<crate::crd::Condition>> {
        let engine: Engine = from_dynamic(found).ok()?;
        Some(engine.status.map(|s| s.conditions).unwrap_or_default())
    }

    fn upgrade_done(&self, found: &DynamicObject) -> bool {
        from_dynamic::<Engine>(found)
            .ok()
            .and_then(|e| e.status.and_then(|s| s.observed_version))
            .is_some_and(|v| v == self.version)
    }
}
