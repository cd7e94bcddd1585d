//! Integration tests for the finalizer lock
//!
//! The lock is what lets the controller finish releasing a bucket or
//! revoking a certificate before the API server forgets the object.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};

use cosi::crd::{BucketClaim, BucketClaimSpec};
use cosi::lock;

use super::helpers::{ensure_test_cluster, TEST_NAMESPACE};

fn sample_claim(name: &str) -> BucketClaim {
    BucketClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: BucketClaimSpec {
            bucket_name: String::new(),
            bucket_class_name: "standard".to_string(),
            bucket_class_namespace: None,
            object_bucket_name: String::new(),
        },
        status: None,
    }
}

/// Story: a locked claim outlives its delete request
///
/// Deleting a locked claim only marks it for deletion. It disappears once
/// the lock is released, and releasing it again is harmless.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_locked_claim_waits_for_unlock() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<BucketClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-claim-lock";

    let created = api
        .create(&PostParams::default(), &sample_claim(name))
        .await
        .expect("failed to create claim");

    let locked = lock::lock(&api, &created).await.expect("failed to lock");
    assert!(lock::is_locked(&locked));

    // Locking twice keeps a single token
    let relocked = lock::lock(&api, &locked).await.expect("failed to relock");
    let tokens = relocked
        .metadata
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|f| f.as_str() == lock::LOCK_FINALIZER)
        .count();
    assert_eq!(tokens, 1);

    api.delete(name, &DeleteParams::default())
        .await
        .expect("failed to delete claim");

    let pending = api.get(name).await.expect("locked claim should remain");
    assert!(pending.is_deleting());

    lock::unlock(&api, &pending).await.expect("failed to unlock");

    let mut gone = false;
    for _ in 0..20 {
        if api.get_opt(name).await.expect("failed to get claim").is_none() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    assert!(gone, "claim should be removed once unlocked");

    // Releasing the lock of a deleted object is a no-op
    lock::unlock(&api, &pending)
        .await
        .expect("unlocking a deleted claim should succeed");
}
