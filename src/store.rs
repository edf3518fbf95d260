//! Object store abstraction over the cluster API
//!
//! Every operand crosses this boundary as a [`DynamicObject`]; handlers keep
//! their typed view internally and convert at the edge. The trait keeps the
//! reconcile core testable without a cluster and mirrors the four operations
//! the protocol needs: get, create, update, delete.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::core::ApiResource;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Identity of an object in the store
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// apiVersion, e.g. `conductor.dev/v1alpha1` or `v1`
    pub api_version: String,
    /// Kind, e.g. `Engine`
    pub kind: String,
    /// Namespace; `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object
    pub fn namespaced(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object
    pub fn cluster_scoped(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: None,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {}/{}", self.api_version, self.kind, ns, self.name),
            None => write!(f, "{}/{} {}", self.api_version, self.kind, self.name),
        }
    }
}

/// Options for a delete call
#[derive(Clone, Copy, Debug, Default)]
pub struct DeleteOptions {
    /// Run the server-side checks without persisting the deletion
    pub dry_run: bool,
    /// Request foreground propagation so dependents go first
    pub foreground: bool,
}

/// Result of a delete call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// The deletion was accepted (or validated, under dry-run)
    Deleted,
    /// The object was already gone
    NotFound,
}

/// The four store operations the reconcile protocol consumes.
///
/// Implementations perform one discrete, externally-consistent call each;
/// conflicts and transient failures surface verbatim as [`Error::Kube`] for
/// the outer requeue loop.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>>;

    /// Create an object; returns the stored form (uid, resourceVersion set)
    async fn create(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object; conflicts surface as [`Error::Kube`]
    async fn update(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object; a missing object is reported, not an error
    async fn delete(&self, key: &ObjectKey, options: DeleteOptions) -> Result<DeleteStatus>;
}

// =============================================================================
// Typed <-> dynamic conversion
// =============================================================================

/// Serialize a typed object into a [`DynamicObject`], stamping apiVersion and
/// kind so the result is self-describing regardless of the source type
pub fn to_dynamic<T: Serialize>(api_version: &str, kind: &str, obj: &T) -> Result<DynamicObject> {
    let mut value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
    value["apiVersion"] = serde_json::Value::String(api_version.to_string());
    value["kind"] = serde_json::Value::String(kind.to_string());
    serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))
}

/// Rehydrate a typed object from a [`DynamicObject`]
pub fn from_dynamic<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T> {
    let value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))
}

// =============================================================================
// Kubernetes-backed store
// =============================================================================

/// Known plural forms for the kinds Conductor touches.
///
/// Kubernetes pluralization is all-lowercase and not quite English; the kinds
/// we create are pinned here and anything else falls back to standard rules.
const KIND_PLURALS: &[(&str, &str)] = &[
    ("platform", "platforms"),
    ("engine", "engines"),
    ("configmap", "configmaps"),
    ("priorityclass", "priorityclasses"),
];

/// Convert a kind to its plural form for API paths.
///
/// Uses the static lookup for known kinds, falling back to standard
/// pluralization (lowercase + 's') for unknown kinds.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Parse an apiVersion into group and version components
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    if let Some(idx) = api_version.rfind('/') {
        (&api_version[..idx], &api_version[idx + 1..])
    } else {
        // Core API (e.g. "v1")
        ("", api_version)
    }
}

fn api_resource_for(key: &ObjectKey) -> ApiResource {
    let (group, version) = parse_api_version(&key.api_version);
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: key.api_version.clone(),
        kind: key.kind.clone(),
        plural: pluralize_kind(&key.kind),
    }
}

/// Production [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new store around the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, key: &ObjectKey) -> Api<DynamicObject> {
        let ar = api_resource_for(key);
        match &key.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        match self.api_for(key).get(&key.name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<DynamicObject> {
        debug!(key = %key, "creating object");
        Ok(self
            .api_for(key)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn update(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<DynamicObject> {
        debug!(key = %key, "updating object");
        Ok(self
            .api_for(key)
            .replace(&key.name, &PostParams::default(), obj)
            .await?)
    }

    async fn delete(&self, key: &ObjectKey, options: DeleteOptions) -> Result<DeleteStatus> {
        let params = DeleteParams {
            dry_run: options.dry_run,
            propagation_policy: options
                .foreground
                .then_some(kube::api::PropagationPolicy::Foreground),
            ..Default::default()
        };
        match self.api_for(key).delete(&key.name, &params).await {
            Ok(_) => Ok(DeleteStatus::Deleted),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(DeleteStatus::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// In-memory store for tests
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory [`ObjectStore`] double for stateful reconcile tests.
    //!
    //! Objects are keyed by (kind, namespace, name); the store assigns uids
    //! and bumps resourceVersions the way the API server would, and can be
    //! switched into modes that simulate conflict errors and lingering
    //! foreground deletions.

    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use kube::core::ErrorResponse;

    use super::*;

    fn identity(key: &ObjectKey) -> String {
        format!(
            "{}|{}|{}",
            key.kind,
            key.namespace.as_deref().unwrap_or(""),
            key.name
        )
    }

    fn key_of(obj: &DynamicObject) -> ObjectKey {
        let types = obj.types.clone().unwrap_or_default();
        ObjectKey {
            api_version: types.api_version,
            kind: types.kind,
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone().unwrap_or_default(),
        }
    }

    fn api_error(code: u16, reason: &str, message: String) -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message,
            reason: reason.to_string(),
            code,
        }))
    }

    /// In-memory object store
    #[derive(Default)]
    pub struct MemoryStore {
        objects: Mutex<BTreeMap<String, DynamicObject>>,
        next_id: AtomicU64,
        /// Fail the next update call with a 409 conflict
        conflict_on_update: AtomicBool,
        /// Accept deletes but keep the object around (foreground finalizers)
        linger_deletes: AtomicBool,
        deletes_issued: AtomicUsize,
        updates_issued: AtomicUsize,
    }

    impl MemoryStore {
        /// Empty store
        pub fn new() -> Self {
            Self::default()
        }

        /// Store seeded with the given objects
        pub fn with_objects(objects: Vec<DynamicObject>) -> Self {
            let store = Self::new();
            {
                let mut map = store.objects.lock().unwrap();
                for obj in objects {
                    map.insert(identity(&key_of(&obj)), obj);
                }
            }
            store
        }

        /// Make the next update fail with an optimistic-concurrency conflict
        pub fn fail_next_update_with_conflict(&self) {
            self.conflict_on_update.store(true, Ordering::SeqCst);
        }

        /// Accept deletes without removing objects, as a foreground deletion
        /// blocked on dependents would
        pub fn set_linger_deletes(&self, linger: bool) {
            self.linger_deletes.store(linger, Ordering::SeqCst);
        }

        /// Remove an object out-of-band (e.g. a finalizer finishing)
        pub fn remove_out_of_band(&self, key: &ObjectKey) {
            self.objects.lock().unwrap().remove(&identity(key));
        }

        /// Number of non-dry-run deletes issued so far
        pub fn deletes_issued(&self) -> usize {
            self.deletes_issued.load(Ordering::SeqCst)
        }

        /// Number of updates issued so far
        pub fn updates_issued(&self) -> usize {
            self.updates_issued.load(Ordering::SeqCst)
        }

        /// Fetch a typed copy of a stored object
        pub fn get_as<T: DeserializeOwned>(&self, key: &ObjectKey) -> Option<T> {
            self.objects
                .lock()
                .unwrap()
                .get(&identity(key))
                .map(|obj| from_dynamic(obj).expect("stored object should deserialize"))
        }

        /// True when the object currently exists
        pub fn contains(&self, key: &ObjectKey) -> bool {
            self.objects.lock().unwrap().contains_key(&identity(key))
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
            Ok(self.objects.lock().unwrap().get(&identity(key)).cloned())
        }

        async fn create(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<DynamicObject> {
            let mut map = self.objects.lock().unwrap();
            let id = identity(key);
            if map.contains_key(&id) {
                return Err(api_error(
                    409,
                    "AlreadyExists",
                    format!("{} already exists", key),
                ));
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut stored = obj.clone();
            stored.metadata.uid = Some(format!("uid-{n}"));
            stored.metadata.resource_version = Some("1".to_string());
            map.insert(id, stored.clone());
            Ok(stored)
        }

        async fn update(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<DynamicObject> {
            if self.conflict_on_update.swap(false, Ordering::SeqCst) {
                return Err(api_error(
                    409,
                    "Conflict",
                    format!("the object {} has been modified", key),
                ));
            }
            let mut map = self.objects.lock().unwrap();
            let id = identity(key);
            let Some(existing) = map.get(&id) else {
                return Err(api_error(404, "NotFound", format!("{} not found", key)));
            };
            let next_rv = existing
                .metadata
                .resource_version
                .as_deref()
                .and_then(|rv| rv.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;
            let mut stored = obj.clone();
            stored.metadata.uid = existing.metadata.uid.clone();
            stored.metadata.resource_version = Some(next_rv.to_string());
            map.insert(id, stored.clone());
            self.updates_issued.fetch_add(1, Ordering::SeqCst);
            Ok(stored)
        }

        async fn delete(&self, key: &ObjectKey, options: DeleteOptions) -> Result<DeleteStatus> {
            let mut map = self.objects.lock().unwrap();
            let id = identity(key);
            if !map.contains_key(&id) {
                return Ok(DeleteStatus::NotFound);
            }
            if options.dry_run {
                return Ok(DeleteStatus::Deleted);
            }
            self.deletes_issued.fetch_add(1, Ordering::SeqCst);
            if !self.linger_deletes.load(Ordering::SeqCst) {
                map.remove(&id);
            }
            Ok(DeleteStatus::Deleted)
        }
    }
}
