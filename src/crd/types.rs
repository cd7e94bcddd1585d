//! Supporting types shared by the COSI CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What happens to the underlying bucket when its claim is deleted
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Delete the bucket and its data
    #[default]
    Delete,
    /// Keep the bucket, only revoke the claim's access to it
    Retain,
}

impl std::fmt::Display for ReleasePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "Delete"),
            Self::Retain => write!(f, "Retain"),
        }
    }
}

/// How a claim came to be bound to its bucket
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BindingMode {
    /// The plugin created a new bucket for the claim
    #[default]
    Provisioned,
    /// The claim was granted access to a bucket that already existed
    Granted,
}

impl std::fmt::Display for BindingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisioned => write!(f, "Provisioned"),
            Self::Granted => write!(f, "Granted"),
        }
    }
}

/// BucketClaim lifecycle phase
///
/// Phases only move forward: (unset) -> Pending -> Bound, and any phase may
/// move to Released once the claim is being deleted.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClaimPhase {
    /// The controller has taken ownership and is provisioning
    Pending,
    /// A bucket is bound and its credentials are published
    Bound,
    /// The claim is being deleted and its bucket released
    Released,
}

impl ClaimPhase {
    fn rank(phase: Option<Self>) -> u8 {
        match phase {
            None => 0,
            Some(Self::Pending) => 1,
            Some(Self::Bound) => 2,
            Some(Self::Released) => 3,
        }
    }

    /// Whether moving from `from` to `to` keeps phases monotonic
    pub fn can_transition(from: Option<Self>, to: Self) -> bool {
        Self::rank(Some(to)) >= Self::rank(from)
    }
}

impl std::fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Bound => write!(f, "Bound"),
            Self::Released => write!(f, "Released"),
        }
    }
}

/// ObjectBucket lifecycle phase
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ObjectBucketPhase {
    /// Bucket is bound to its claim
    Bound,
    /// Claim is gone and the bucket has been released
    Released,
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, CertificateIssued)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}
