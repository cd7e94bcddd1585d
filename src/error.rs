//! Error types for the COSI controller

use thiserror::Error;

use crate::pki::PkiError;

/// Main error type for controller operations
///
/// Kubernetes API failures are classified on conversion so that callers can
/// treat "already gone" and "already there" as progress rather than failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error that has no more specific classification
    #[error("kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// The target resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A create collided with an existing resource of the same name
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// An optimistic-concurrency check failed on write
    #[error("conflict: {0}")]
    Conflict(String),

    /// A prerequisite (class, registration, certificate) is not available yet
    #[error("not ready: {0}")]
    NotReady(String),

    /// Dialing or calling the plugin failed
    #[error("rpc error: {0}")]
    Rpc(String),

    /// An operation exceeded its time budget
    #[error("timed out: {0}")]
    Timeout(String),

    /// Certificate issuance failed
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a not-ready error with the given message
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Create an RPC error with the given message
    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    /// Create a timeout error with the given message
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// True when the resource was already absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True when a create found the resource already present
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// True when a write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// True when a later attempt can be expected to succeed without a spec change
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Kube(_) | Self::Conflict(_) | Self::NotReady(_) | Self::Rpc(_) | Self::Timeout(_)
        )
    }

    /// Short machine-readable reason for status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotReady(_) => "PluginNotReady",
            Self::Rpc(_) => "PluginCallFailed",
            Self::Timeout(_) => "Timeout",
            Self::Conflict(_) => "Conflict",
            Self::Validation(_) => "InvalidSpec",
            Self::Pki(_) => "CertificateError",
            _ => "ReconcileFailed",
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(ae.message),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists(ae.message)
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict(ae.message),
            other => Self::Kube(other),
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Self::Rpc(format!("{:?}: {}", status.code(), status.message()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Treat a NotFound outcome as success
pub fn ignore_not_found(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Treat an AlreadyExists outcome as success
///
/// Returns `true` when the resource was newly created by this call and
/// `false` when a previous attempt had already created it.
pub fn created_or_existing(result: Result<(), Error>) -> Result<bool, Error> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}
