//! Finalizer-based lock
//!
//! While the lock token sits in `metadata.finalizers`, the API server keeps a
//! deleted object around (with `deletionTimestamp` set) so the controller can
//! finish the cleanup it owns: deprovisioning a bucket, revoking a plugin
//! certificate. Releasing the lock lets deletion complete.
//!
//! Both directions are idempotent: locking a locked object and unlocking an
//! unlocked (or already deleted) object succeed without writing.

use std::fmt::Debug;

use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::retry::retry_on_conflict;
use crate::{Error, FIELD_MANAGER};

/// Token placed in `metadata.finalizers` while cleanup is pending
pub const LOCK_FINALIZER: &str = "cosi.io/finalizer";

/// Check whether the object currently holds the lock
pub fn is_locked<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == LOCK_FINALIZER)
}

/// Finalizer list with the lock added, or `None` when it is already present
pub fn with_lock(finalizers: &[String]) -> Option<Vec<String>> {
    if finalizers.iter().any(|f| f == LOCK_FINALIZER) {
        return None;
    }
    let mut updated = finalizers.to_vec();
    updated.push(LOCK_FINALIZER.to_string());
    Some(updated)
}

/// Finalizer list with the lock removed, or `None` when it is already absent
pub fn without_lock(finalizers: &[String]) -> Option<Vec<String>> {
    if !finalizers.iter().any(|f| f == LOCK_FINALIZER) {
        return None;
    }
    Some(
        finalizers
            .iter()
            .filter(|f| f.as_str() != LOCK_FINALIZER)
            .cloned()
            .collect(),
    )
}

/// Merge patch replacing the finalizer list, guarded by `resourceVersion`
///
/// Carrying the version makes the API server reject the write with a
/// conflict when the object changed since it was read.
fn finalizer_patch(finalizers: &[String], resource_version: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": resource_version,
        }
    })
}

/// Acquire the lock on `obj`, returning the updated object
pub async fn lock<K>(api: &Api<K>, obj: &K) -> Result<K, Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if is_locked(obj) {
        return Ok(obj.clone());
    }

    let name = obj.name_any();
    let name = name.as_str();

    retry_on_conflict("acquire lock", move || async move {
        let current = api
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::not_found(format!("{name} was deleted before it was locked")))?;

        let Some(finalizers) = with_lock(current.finalizers()) else {
            return Ok(current);
        };

        let patch = finalizer_patch(&finalizers, current.resource_version().as_deref());
        let updated = api
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        debug!(object = name, "lock acquired");
        Ok(updated)
    })
    .await
}

/// Release the lock on `obj`
///
/// An object that no longer exists is treated as unlocked.
pub async fn unlock<K>(api: &Api<K>, obj: &K) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if !is_locked(obj) {
        return Ok(());
    }

    let name = obj.name_any();
    let name = name.as_str();

    retry_on_conflict("release lock", move || async move {
        let Some(current) = api.get_opt(name).await? else {
            return Ok(());
        };

        let Some(finalizers) = without_lock(current.finalizers()) else {
            return Ok(());
        };

        let patch = finalizer_patch(&finalizers, current.resource_version().as_deref());
        match api
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(Error::from)
        {
            Ok(_) => {
                debug!(object = name, "lock released");
                Ok(())
            }
            // Removing the last finalizer of a deleted object can race with
            // the API server purging it.
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    })
    .await
}
