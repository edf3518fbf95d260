//! The engine config-map operand: builder and ensure hooks
//!
//! The config map holds flat engine settings. Conductor only ever touches an
//! allow-listed set of keys: a small list on every reconcile, a second list
//! only while an upgrade is in flight, and a remove-set for keys an upgrade
//! retires. Everything else in the map - including keys the desired object
//! no longer declares - belongs to whoever put it there.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DynamicObject;
use kube::ResourceExt;

use crate::crd::Platform;
use crate::gates::{join_gate_list, parse_gate_list, reconcile_gates};
use crate::operand::engine::MANAGED_ENGINE_GATES;
use crate::operand::{OperandHooks, ReconcileRequest, UpdateOutcome};
use crate::store::{from_dynamic, to_dynamic, ObjectKey, ObjectStore};
use crate::{Result, OPERATOR_VERSION};

/// Name of the engine configuration map
pub const CONFIG_NAME: &str = "engine-config";

/// Keys copied from the desired map on every reconcile
pub const UPDATABLE_KEYS: &[&str] = &["log-verbosity", "scheduler-profile"];

/// Keys copied only while an upgrade is in flight
pub const UPGRADE_KEYS: &[&str] = &["runtime-image", "migration-limits"];

/// Keys removed during an upgrade when the desired map no longer carries them
pub const UPGRADE_REMOVE_KEYS: &[&str] = &["legacy-migration-config"];

/// The comma-joined gate list key, reconciled separately from the plain keys
pub const FEATURE_GATES_KEY: &str = "feature-gates";

/// Gates every engine deployment runs with, ahead of anything declared
const BASE_GATES: &[&str] = &["WorkloadPools", "VolumeExpansion"];

const API_VERSION: &str = "v1";
const KIND: &str = "ConfigMap";

/// Build the desired engine config map for a Platform.
///
/// The gate list starts from the baseline and appends the declared managed
/// gates; the retired keys in [`UPGRADE_REMOVE_KEYS`] are never produced.
pub fn new_engine_config(platform: &Platform, managed_gates: &[&str], version: &str) -> ConfigMap {
    let mut gates: Vec<String> = BASE_GATES.iter().map(|g| g.to_string()).collect();
    for gate in managed_gates {
        if platform.spec.gate_enabled(gate) {
            gates.push((*gate).to_string());
        }
    }

    let data = BTreeMap::from([
        ("log-verbosity".to_string(), "2".to_string()),
        ("scheduler-profile".to_string(), "balanced".to_string()),
        (
            "runtime-image".to_string(),
            format!("ghcr.io/conductor-dev/engine:{version}"),
        ),
        (
            "migration-limits".to_string(),
            "parallel=2,bandwidth=64Mi".to_string(),
        ),
        (FEATURE_GATES_KEY.to_string(), join_gate_list(&gates)),
    ]);

    ConfigMap {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(CONFIG_NAME.to_string()),
            namespace: platform.metadata.namespace.clone(),
            labels: Some(BTreeMap::from([
                (crate::PLATFORM_LABEL.to_string(), platform.name_any()),
                (crate::COMPONENT_LABEL.to_string(), "engine-config".to_string()),
                (crate::VERSION_LABEL.to_string(), version.to_string()),
            ])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Ensure hooks for the engine config map
pub struct EngineConfigHandler {
    managed_gates: &'static [&'static str],
    version: String,
}

impl Default for EngineConfigHandler {
    fn default() -> Self {
        Self {
            managed_gates: MANAGED_ENGINE_GATES,
            version: OPERATOR_VERSION.to_string(),
        }
    }
}

impl EngineConfigHandler {
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
impl OperandHooks for EngineConfigHandler {
    fn kind(&self) -> &'static str {
        "EngineConfig"
    }

    fn object_key(&self, platform: &Platform) -> ObjectKey {
        ObjectKey::namespaced(
            API_VERSION,
            KIND,
            platform.metadata.namespace.as_deref().unwrap_or("default"),
            CONFIG_NAME,
        )
    }

    fn make_desired(&self, platform: &Platform) -> Result<DynamicObject> {
        let config = new_engine_config(platform, self.managed_gates, &self.version);
        to_dynamic(API_VERSION, KIND, &config)
    }

    async fn update_object(
        &self,
        req: &ReconcileRequest,
        store: &dyn ObjectStore,
        found: &DynamicObject,
        desired: &DynamicObject,
    ) -> Result<UpdateOutcome> {
        let live: ConfigMap = from_dynamic(found)?;
        let want: ConfigMap = from_dynamic(desired)?;

        let mut merged = live.clone();
        let data = merged.data.get_or_insert_with(Default::default);
        let want_data = want.data.clone().unwrap_or_default();
        let mut changed = false;

        for key in UPDATABLE_KEYS {
            if let Some(value) = want_data.get(*key) {
                if data.get(*key) != Some(value) {
                    data.insert((*key).to_string(), value.clone());
                    changed = true;
                }
            }
        }

        if req.upgrade_mode {
            for key in UPGRADE_KEYS {
                if let Some(value) = want_data.get(*key) {
                    if data.get(*key) != Some(value) {
                        data.insert((*key).to_string(), value.clone());
                        changed = true;
                    }
                }
            }
            for key in UPGRADE_REMOVE_KEYS {
                if !want_data.contains_key(*key) && data.remove(*key).is_some() {
                    changed = true;
                }
            }
        }

        // Gate list: set-reconciled on a normal pass so user-added gates
        // survive; rebuilt from the desired value during an upgrade.
        let current = parse_gate_list(data.get(FEATURE_GATES_KEY).map(String::as_str).unwrap_or(""));
        let next = if req.upgrade_mode {
            parse_gate_list(
                want_data
                    .get(FEATURE_GATES_KEY)
                    .map(String::as_str)
                    .unwrap_or(""),
            )
        } else {
            reconcile_gates(&req.platform.spec.feature_gates, self.managed_gates, &current)
        };
        if next != current {
            data.insert(FEATURE_GATES_KEY.to_string(), join_gate_list(&next));
            changed = true;
        }

        let labels = merged.metadata.labels.get_or_insert_with(Default::default);
        if let Some(want_labels) = &want.metadata.labels {
            for (k, v) in want_labels {
                if labels.get(k) != Some(v) {
                    labels.insert(k.clone(), v.clone());
                    changed = true;
                }
            }
        }

        if !changed {
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
}
