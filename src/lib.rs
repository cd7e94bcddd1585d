//! COSI controller - binds BucketClaims to buckets provisioned by gRPC plugins
//!
//! A claim names a bucket class; the class names a plugin registration; the
//! registration carries the plugin's address and the TLS identity the
//! controller minted for it. Reconciling a claim dials the plugin, asks it to
//! provision (or grant access to) a bucket, and materializes the result as an
//! ObjectBucket plus a credentials Secret and a connection ConfigMap owned by
//! the claim.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (BucketClaim, BucketClass, PluginRegistration, ObjectBucket)
//! - [`controller`] - Reconcilers for claims and plugin registrations
//! - [`lock`] - Finalizer-based lock that defers deletion until cleanup is done
//! - [`pki`] - Self-signed certificate issuance for plugin registrations
//! - [`rpc`] - Per-reconciliation TLS gRPC client bootstrap
//! - [`proto`] - Generated gRPC definitions for the provisioner protocol
//! - [`config`] - Controller configuration
//! - [`retry`] - Backoff helpers for conflicting writes
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

use std::time::Duration;

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod lock;
pub mod pki;
pub mod proto;
pub mod retry;
pub mod rpc;

pub use error::Error;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Field manager recorded on every write made by the controller
pub const FIELD_MANAGER: &str = "cosi-controller";

/// Port dialed when a registration's host does not carry one
pub const DEFAULT_PLUGIN_PORT: u16 = 50051;

/// Upper bound on establishing a plugin connection
///
/// Guards against a plugin that has been registered but is not yet
/// listening.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single reconciliation, including every RPC it makes
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix used when naming resources derived from a claim
pub const CHILD_RESOURCE_PREFIX: &str = "cosi";
