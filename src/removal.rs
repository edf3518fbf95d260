//! Idempotent operand removal
//!
//! Removal is a small state machine: an absent object means there is nothing
//! to do, an object the Platform does not own is skipped rather than
//! deleted, and a not-found race during the delete itself counts as success
//! so re-invocation is always safe. Callers may wait for the object to
//! actually disappear (foreground propagation - dependents go first), with
//! the wait bounded by the request's cancellation signal.

use std::time::Duration;

use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::store::{DeleteOptions, DeleteStatus, ObjectKey, ObjectStore};
use crate::{Error, Result};

/// How a removal should behave
#[derive(Clone, Copy, Debug, Default)]
pub struct RemovalOptions {
    /// Perform every check and a server-side dry-run delete, but mutate
    /// nothing
    pub dry_run: bool,
    /// Block until the object is confirmed absent (foreground propagation)
    pub wait: bool,
    /// Never delete an object that does not carry this Platform's ownership
    /// label
    pub protect_foreign: bool,
}

/// Terminal state of a removal attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The object did not exist (before or by the time the delete landed)
    AlreadyAbsent,
    /// The object exists but is not owned by this Platform; left alone
    Skipped,
    /// The delete was issued (and, with `wait`, the object is confirmed
    /// gone)
    Deleted,
    /// Dry-run: the delete would have been issued
    DryRun,
}

/// Poll cadence while waiting for an object to disappear
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn owned_by(obj: &DynamicObject, owner: &str) -> bool {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(crate::PLATFORM_LABEL))
        .is_some_and(|value| value == owner)
}

/// Remove `key` if it exists and belongs to the Platform named `owner`.
///
/// Safe to call repeatedly and concurrently with the object disappearing:
/// every not-found answer is success. With `wait` the call polls until the
/// object is gone, re-checking `cancel` every interval and failing with
/// [`Error::DeletionTimeout`] if it fires first - set a deadline on the
/// token.
pub async fn ensure_removed(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    owner: &str,
    options: RemovalOptions,
    cancel: &CancellationToken,
) -> Result<RemovalOutcome> {
    let Some(found) = store.get(key).await? else {
        info!(key = %key, "resource doesn't exist, nothing to remove");
        return Ok(RemovalOutcome::AlreadyAbsent);
    };

    if options.protect_foreign && !owned_by(&found, owner) {
        info!(key = %key, owner, "existing resource not owned by this platform, ignoring");
        return Ok(RemovalOutcome::Skipped);
    }

    info!(key = %key, dry_run = options.dry_run, wait = options.wait, "removing resource");

    let delete_options = DeleteOptions {
        dry_run: options.dry_run,
        foreground: options.wait,
    };
    match store.delete(key, delete_options).await? {
        // Idempotent under the race: someone else's delete landed first.
        DeleteStatus::NotFound => return Ok(RemovalOutcome::AlreadyAbsent),
        DeleteStatus::Deleted => {}
    }

    if options.dry_run {
        return Ok(RemovalOutcome::DryRun);
    }
    if !options.wait {
        return Ok(RemovalOutcome::Deleted);
    }

    loop {
        if store.get(key).await?.is_none() {
            return Ok(RemovalOutcome::Deleted);
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::DeletionTimeout { key: key.clone() });
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::MemoryStore;
    use crate::store::{to_dynamic, MockObjectStore};
    use k8s_openapi::api::core::v1::ConfigMap;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const OWNER: &str = "conductor-platform";

    fn key() -> ObjectKey {
        ObjectKey::namespaced("v1", "ConfigMap", "platform-ns", "engine-config")
    }

    fn labeled_config(owner: Option<&str>) -> DynamicObject {
        let cm = ConfigMap {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some("engine-config".to_string()),
                namespace: Some("platform-ns".to_string()),
                labels: owner.map(|o| {
                    BTreeMap::from([(crate::PLATFORM_LABEL.to_string(), o.to_string())])
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        to_dynamic("v1", "ConfigMap", &cm).unwrap()
    }

    fn owned_store() -> MemoryStore {
        MemoryStore::with_objects(vec![labeled_config(Some(OWNER))])
    }

    fn protective() -> RemovalOptions {
        RemovalOptions {
            protect_foreign: true,
            ..Default::default()
        }
    }

    /// Story: removing an absent object is a clean no-op
    #[tokio::test]
    async fn story_absent_object_is_nothing_to_do() {
        let store = MemoryStore::new();
        let outcome = ensure_removed(&store, &key(), OWNER, protective(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RemovalOutcome::AlreadyAbsent);
        assert_eq!(store.deletes_issued(), 0);
    }

    /// Story: an object without the ownership label is never deleted
    #[tokio::test]
    async fn story_unlabeled_object_is_skipped() {
        let store = MemoryStore::with_objects(vec![labeled_config(None)]);
        let outcome = ensure_removed(&store, &key(), OWNER, protective(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RemovalOutcome::Skipped);
        assert!(store.contains(&key()));
        assert_eq!(store.deletes_issued(), 0);
    }

    /// Story: an object owned by a different platform is also protected
    #[tokio::test]
    async fn story_foreign_owner_is_skipped() {
        let store = MemoryStore::with_objects(vec![labeled_config(Some("someone-else"))]);
        let outcome = ensure_removed(&store, &key(), OWNER, protective(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RemovalOutcome::Skipped);
        assert!(store.contains(&key()));
    }

    /// Story: with protection off, ownership is not checked
    #[tokio::test]
    async fn story_protection_off_deletes_foreign_objects() {
        let store = MemoryStore::with_objects(vec![labeled_config(None)]);
        let outcome = ensure_removed(
            &store,
            &key(),
            OWNER,
            RemovalOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, RemovalOutcome::Deleted);
        assert!(!store.contains(&key()));
    }

    /// Story: an owned object is deleted
    #[tokio::test]
    async fn story_owned_object_is_deleted() {
        let store = owned_store();
        let outcome = ensure_removed(&store, &key(), OWNER, protective(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RemovalOutcome::Deleted);
        assert!(!store.contains(&key()));
    }

    /// Story: dry-run performs the checks but mutates nothing
    #[tokio::test]
    async fn story_dry_run_mutates_nothing() {
        let store = owned_store();
        let outcome = ensure_removed(
            &store,
            &key(),
            OWNER,
            RemovalOptions {
                dry_run: true,
                protect_foreign: true,
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, RemovalOutcome::DryRun);
        assert!(store.contains(&key()));
        assert_eq!(store.deletes_issued(), 0);

        // the ownership check still applies under dry-run
        let foreign = MemoryStore::with_objects(vec![labeled_config(None)]);
        let outcome = ensure_removed(
            &foreign,
            &key(),
            OWNER,
            RemovalOptions {
                dry_run: true,
                protect_foreign: true,
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, RemovalOutcome::Skipped);
    }

    /// Story: a concurrent delete winning the race still counts as success
    #[tokio::test]
    async fn story_not_found_race_is_success() {
        let mut store = MockObjectStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some(labeled_config(Some(OWNER)))));
        store
            .expect_delete()
            .returning(|_, _| Ok(DeleteStatus::NotFound));

        let outcome = ensure_removed(&store, &key(), OWNER, protective(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RemovalOutcome::AlreadyAbsent);
    }

    /// Story: wait blocks through a lingering foreground deletion until the
    /// object is gone
    #[tokio::test(start_paused = true)]
    async fn story_wait_blocks_until_absent() {
        let store = Arc::new(owned_store());
        store.set_linger_deletes(true);

        // a finalizer finishes a little later
        let finalizer = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            finalizer.remove_out_of_band(&key());
        });

        let outcome = ensure_removed(
            store.as_ref(),
            &key(),
            OWNER,
            RemovalOptions {
                wait: true,
                protect_foreign: true,
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, RemovalOutcome::Deleted);
        assert!(!store.contains(&key()));
    }

    /// Story: wait honors the cancellation signal and fails with the
    /// distinct timeout error
    #[tokio::test(start_paused = true)]
    async fn story_wait_times_out_when_cancelled() {
        let store = owned_store();
        store.set_linger_deletes(true);

        let cancel = CancellationToken::new();
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            deadline.cancel();
        });

        let err = ensure_removed(
            &store,
            &key(),
            OWNER,
            RemovalOptions {
                wait: true,
                protect_foreign: true,
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.is_deletion_timeout());
        assert!(store.contains(&key()), "object survived the deadline");
    }

    /// Story: removal after success is still success (idempotence)
    #[tokio::test]
    async fn story_repeat_removal_is_idempotent() {
        let store = owned_store();
        let first = ensure_removed(&store, &key(), OWNER, protective(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first, RemovalOutcome::Deleted);

        let second = ensure_removed(&store, &key(), OWNER, protective(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second, RemovalOutcome::AlreadyAbsent);
    }
}
