//! Integration tests for CRD operations
//!
//! These tests tell the story of how administrators and application teams
//! write COSI resources through the Kubernetes API, and check that what the
//! controller relies on survives a round trip through the API server.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ObjectReference, SecretReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};

use cosi::crd::{
    Authentication, BindingMode, BucketClaim, BucketClaimSpec, BucketClass, BucketClassSpec,
    BucketEndpoint, Connection, ObjectBucket, ObjectBucketSpec, PluginRegistration,
    PluginRegistrationSpec, ReleasePolicy,
};

use cosi::controller::{KubeClient, KubeClientImpl};

use super::helpers::{ensure_test_cluster, TEST_NAMESPACE};

fn sample_class(name: &str, parameters: &[(&str, &str)]) -> BucketClass {
    BucketClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: BucketClassSpec {
            registration_name: "s3-plugin".to_string(),
            registration_namespace: None,
            plugin_parameters: parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            release_policy: ReleasePolicy::Retain,
        },
    }
}

async fn cleanup<K>(api: &Api<K>, name: &str)
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let _ = api.delete(name, &DeleteParams::default()).await;
}

/// Story: an application team requests a bucket
///
/// The claim only names a class. Everything the controller fills in later is
/// absent from a fresh claim.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_creates_bucket_claim() {
    let client: Client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<BucketClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-claim-create";
    cleanup(&api, name).await;

    let claim = BucketClaim::new(
        name,
        BucketClaimSpec {
            bucket_name: String::new(),
            bucket_class_name: "standard".to_string(),
            bucket_class_namespace: None,
            object_bucket_name: String::new(),
        },
    );
    let created = api
        .create(&PostParams::default(), &claim)
        .await
        .expect("failed to create claim");

    assert_eq!(created.spec.bucket_class_name, "standard");
    assert!(!created.is_bound());
    assert_eq!(created.phase(), None);
    assert_eq!(created.class_namespace(), TEST_NAMESPACE);

    cleanup(&api, name).await;
}

/// Story: an administrator publishes a brownfield class
///
/// Plugin parameters are opaque strings, except for `bucketName`, which
/// turns claims of the class into grants on that bucket.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_admin_creates_brownfield_class() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<BucketClass> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-class-brownfield";
    cleanup(&api, name).await;

    api.create(
        &PostParams::default(),
        &sample_class(name, &[("bucketName", "shared-logs"), ("tier", "cold")]),
    )
    .await
    .expect("failed to create class");

    let fetched = api.get(name).await.expect("failed to get class");
    assert_eq!(fetched.existing_bucket_name(), Some("shared-logs"));
    assert_eq!(fetched.binding_mode(), BindingMode::Granted);
    assert_eq!(fetched.spec.release_policy, ReleasePolicy::Retain);
    assert_eq!(fetched.registration_namespace(), TEST_NAMESPACE);

    cleanup(&api, name).await;
}

/// Story: a plugin registers itself
///
/// A fresh registration has no certificate; that is what tells the
/// controller to issue one.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_plugin_registers() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<PluginRegistration> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-registration";
    cleanup(&api, name).await;

    let registration = PluginRegistration::new(
        name,
        PluginRegistrationSpec {
            plugin_name: "s3".to_string(),
            host: "s3-plugin.cosi-integration-test.svc:50051".to_string(),
        },
    );
    let created = api
        .create(&PostParams::default(), &registration)
        .await
        .expect("failed to create registration");

    assert!(created.cert_secret_ref().is_none());
    assert!(!created.is_deleting());

    cleanup(&api, name).await;
}

/// Story: an ObjectBucket records everything needed to release the bucket
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_object_bucket_round_trips_release_details() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<ObjectBucket> = Api::all(client.clone());
    let name = "cosi-test-object-bucket";
    cleanup(&api, name).await;

    let object_bucket = ObjectBucket::new(
        name,
        ObjectBucketSpec {
            release_policy: ReleasePolicy::Delete,
            binding: BindingMode::Provisioned,
            bucket_class_name: "standard".to_string(),
            bucket_class_namespace: TEST_NAMESPACE.to_string(),
            registration_name: "s3-plugin".to_string(),
            registration_namespace: TEST_NAMESPACE.to_string(),
            claim_ref: ObjectReference {
                name: Some("logs".to_string()),
                namespace: Some(TEST_NAMESPACE.to_string()),
                ..Default::default()
            },
            connection: Connection {
                endpoint: BucketEndpoint {
                    bucket_host: "s3.example.com".to_string(),
                    bucket_name: "b-123".to_string(),
                    region: "us-east-1".to_string(),
                    additional_config: BTreeMap::new(),
                },
                authentication: Authentication {
                    secret_ref: SecretReference {
                        name: Some("cosi-logs".to_string()),
                        namespace: Some(TEST_NAMESPACE.to_string()),
                    },
                },
            },
        },
    );
    api.create(&PostParams::default(), &object_bucket)
        .await
        .expect("failed to create object bucket");

    let fetched = api.get(name).await.expect("failed to get object bucket");
    assert_eq!(fetched.spec.connection.endpoint.bucket_name, "b-123");
    assert_eq!(fetched.spec.binding, BindingMode::Provisioned);
    assert_eq!(fetched.spec.release_policy, ReleasePolicy::Delete);
    assert_eq!(fetched.spec.registration_name, "s3-plugin");

    cleanup(&api, name).await;
}

/// Story: binding lands even when the claim changed underneath
///
/// The controller commits `objectBucketName` against the claim it read
/// earlier. A label added by someone else in between makes that copy stale;
/// the commit re-reads the claim and writes again instead of failing.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_commit_survives_concurrent_edit() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<BucketClaim> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "test-claim-commit";
    cleanup(&api, name).await;

    let mut claim = BucketClaim::new(
        name,
        BucketClaimSpec {
            bucket_name: String::new(),
            bucket_class_name: "standard".to_string(),
            bucket_class_namespace: None,
            object_bucket_name: String::new(),
        },
    );
    claim.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    let stale = api
        .create(&PostParams::default(), &claim)
        .await
        .expect("failed to create claim");

    let mut edited = stale.clone();
    edited
        .labels_mut()
        .insert("team".to_string(), "a".to_string());
    api.replace(name, &PostParams::default(), &edited)
        .await
        .expect("failed to edit claim");

    let kube = KubeClientImpl::new(client.clone());
    let bound = kube
        .bind_claim(&stale, "cosi-integration-test-commit")
        .await
        .expect("commit should retry past the stale version");

    assert_eq!(bound.spec.object_bucket_name, "cosi-integration-test-commit");
    assert_eq!(bound.labels().get("team").map(String::as_str), Some("a"));

    cleanup(&api, name).await;
}
