//! The workload priority-class operand: builder and ensure hooks
//!
//! The priority class guarantees platform workloads outrank ordinary pods.
//! Its `value` is immutable server-side, so convergence on a drifted class
//! is delete-and-recreate rather than an in-place update.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use kube::api::DynamicObject;
use kube::ResourceExt;

use crate::crd::Platform;
use crate::operand::{OperandHooks, ReconcileRequest, UpdateOutcome};
use crate::store::{from_dynamic, to_dynamic, DeleteOptions, ObjectKey, ObjectStore};
use crate::{Result, OPERATOR_VERSION};

/// Name of the cluster-scoped workload priority class
pub const PRIORITY_CLASS_NAME: &str = "conductor-workload-critical";

const API_VERSION: &str = "scheduling.k8s.io/v1";
const KIND: &str = "PriorityClass";
const PRIORITY_VALUE: i32 = 1_000_000_000;

/// Build the desired priority class for a Platform
pub fn new_priority_class(platform: &Platform, version: &str) -> PriorityClass {
    PriorityClass {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(PRIORITY_CLASS_NAME.to_string()),
            labels: Some(BTreeMap::from([
                (crate::PLATFORM_LABEL.to_string(), platform.name_any()),
                (
                    crate::COMPONENT_LABEL.to_string(),
                    "priority-class".to_string(),
                ),
                (crate::VERSION_LABEL.to_string(), version.to_string()),
            ])),
            ..Default::default()
        },
        value: PRIORITY_VALUE,
        global_default: Some(false),
        description: Some("Critical priority for platform-managed workloads".to_string()),
        preemption_policy: None,
    }
}

/// Ensure hooks for the workload priority class
pub struct PriorityClassHandler {
    version: String,
}

impl Default for PriorityClassHandler {
    fn default() -> Self {
        Self {
            version: OPERATOR_VERSION.to_string(),
        }
    }
}

#[async_trait]
impl OperandHooks for PriorityClassHandler {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn object_key(&self, _platform: &Platform) -> ObjectKey {
        ObjectKey::cluster_scoped(API_VERSION, KIND, PRIORITY_CLASS_NAME)
    }

    fn make_desired(&self, platform: &Platform) -> Result<DynamicObject> {
        to_dynamic(API_VERSION, KIND, &new_priority_class(platform, &self.version))
    }

    async fn update_object(
        &self,
        req: &ReconcileRequest,
        store: &dyn ObjectStore,
        found: &DynamicObject,
        desired: &DynamicObject,
    ) -> Result<UpdateOutcome> {
        let live: PriorityClass = from_dynamic(found)?;
        let want: PriorityClass = from_dynamic(desired)?;

        let converged = live.value == want.value
            && live.global_default.unwrap_or(false) == want.global_default.unwrap_or(false)
            && live.description == want.description;
        if converged {
            return Ok(UpdateOutcome {
                updated: false,
                object: found.clone(),
            });
        }

        // value is immutable: replace the whole object
        let key = self.object_key(&req.platform);
        store.delete(&key, DeleteOptions::default()).await?;
        let written = store.create(&key, desired).await?;
        Ok(UpdateOutcome {
            updated: true,
            object: written,
        })
    }
}
