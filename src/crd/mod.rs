//! Custom Resource Definitions for the COSI controller
//!
//! All kinds live in the `cosi.io/v1alpha1` API group.

mod claim;
mod class;
mod object_bucket;
mod registration;
mod types;

pub use claim::{BucketClaim, BucketClaimSpec, BucketClaimStatus};
pub use class::{BucketClass, BucketClassSpec, EXISTING_BUCKET_PARAMETER};
pub use object_bucket::{
    Authentication, BucketEndpoint, Connection, ObjectBucket, ObjectBucketSpec, ObjectBucketStatus,
};
pub use registration::{PluginRegistration, PluginRegistrationSpec, PluginRegistrationStatus};
pub use types::{
    BindingMode, ClaimPhase, Condition, ConditionStatus, ObjectBucketPhase, ReleasePolicy,
};
