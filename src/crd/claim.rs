//! BucketClaim Custom Resource Definition
//!
//! A BucketClaim is a namespaced request for a bucket. Users create it; the
//! claim reconciler is the only writer of `spec.objectBucketName` and of the
//! status.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClaimPhase, Condition};

/// Specification for a BucketClaim
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cosi.io",
    version = "v1alpha1",
    kind = "BucketClaim",
    plural = "bucketclaims",
    shortname = "bc",
    status = "BucketClaimStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.bucketClassName"}"#,
    printcolumn = r#"{"name":"ObjectBucket","type":"string","jsonPath":".spec.objectBucketName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimSpec {
    /// Requested bucket name; empty lets the plugin choose
    #[serde(default)]
    pub bucket_name: String,

    /// Name of the BucketClass to provision from
    pub bucket_class_name: String,

    /// Namespace of the BucketClass (defaults to the claim's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_class_namespace: Option<String>,

    /// Name of the bound ObjectBucket, set once provisioning completes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object_bucket_name: String,
}

impl BucketClaimSpec {
    /// Validate the claim specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.bucket_class_name.trim().is_empty() {
            return Err(crate::Error::validation("bucketClassName must be set"));
        }
        Ok(())
    }
}

/// Status for a BucketClaim
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketClaimStatus {
    /// Current phase; unset until the controller takes ownership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ClaimPhase>,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions representing the claim state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl BucketClaimStatus {
    /// Create a status with the given phase
    pub fn with_phase(phase: ClaimPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    /// Set the status message
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Add a condition
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

impl BucketClaim {
    /// Current phase, `None` when the controller has not touched the claim
    pub fn phase(&self) -> Option<ClaimPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Namespace of the referenced BucketClass
    pub fn class_namespace(&self) -> String {
        self.spec
            .bucket_class_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace().unwrap_or_default())
    }

    /// True once an ObjectBucket has been recorded on the claim
    pub fn is_bound(&self) -> bool {
        !self.spec.object_bucket_name.is_empty()
    }

    /// True once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
