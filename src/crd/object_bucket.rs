//! ObjectBucket Custom Resource Definition
//!
//! A cluster-scoped record of a bound bucket: where it lives, how to reach
//! it, which claim owns it and what to do with it when that claim goes away.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ObjectReference, SecretReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BindingMode, ObjectBucketPhase, ReleasePolicy};

/// Specification for an ObjectBucket
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cosi.io",
    version = "v1alpha1",
    kind = "ObjectBucket",
    plural = "objectbuckets",
    shortname = "ob",
    status = "ObjectBucketStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Bucket","type":"string","jsonPath":".spec.connection.endpoint.bucketName"}"#,
    printcolumn = r#"{"name":"Claim","type":"string","jsonPath":".spec.claimRef.name"}"#,
    printcolumn = r#"{"name":"ReleasePolicy","type":"string","jsonPath":".spec.releasePolicy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectBucketSpec {
    /// What happens to the bucket when the claim is deleted
    #[serde(default)]
    pub release_policy: ReleasePolicy,

    /// Whether the bucket was provisioned for the claim or pre-existed
    #[serde(default)]
    pub binding: BindingMode,

    /// Class the bucket was provisioned from
    pub bucket_class_name: String,

    /// Namespace of that class
    pub bucket_class_namespace: String,

    /// Plugin registration that served the bucket
    ///
    /// Release goes back to this plugin even if the class has since been
    /// edited or deleted.
    pub registration_name: String,

    /// Namespace of that registration
    pub registration_namespace: String,

    /// Claim this bucket is bound to
    pub claim_ref: ObjectReference,

    /// How to reach the bucket
    pub connection: Connection,
}

/// Connection details for a bound bucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Network location of the bucket
    pub endpoint: BucketEndpoint,

    /// Where the access credentials are published
    pub authentication: Authentication,
}

/// Network location of a bucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketEndpoint {
    /// Object storage endpoint host
    pub bucket_host: String,

    /// Bucket name as known to the storage backend
    pub bucket_name: String,

    /// Storage region
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    /// Extra plugin-supplied connection data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_config: BTreeMap<String, String>,
}

/// Reference to the published credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    /// Secret holding the plugin-issued credentials
    pub secret_ref: SecretReference,
}

/// Status for an ObjectBucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectBucketStatus {
    /// Current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ObjectBucketPhase>,
}

impl ObjectBucketStatus {
    /// Status for a bucket bound to its claim
    pub fn bound() -> Self {
        Self {
            phase: Some(ObjectBucketPhase::Bound),
        }
    }

    /// Status for a bucket whose claim has let go of it
    pub fn released() -> Self {
        Self {
            phase: Some(ObjectBucketPhase::Released),
        }
    }
}
