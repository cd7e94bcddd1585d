//! Integration tests for the COSI controller
//!
//! These tests require a Kubernetes cluster (kind) and tell the story of how
//! platform operators and application teams interact with the COSI CRDs.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating and reading claims, classes,
//!   registrations and object buckets through the Kubernetes API
//!
//! - `lock_protocol`: Stories about the finalizer lock holding back deletion
//!   until the controller has finished its cleanup
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod crd_operations;
mod helpers;
mod lock_protocol;
