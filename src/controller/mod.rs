//! Reconcilers for COSI custom resources
//!
//! Two controllers run side by side:
//!
//! - [`claim`] binds BucketClaims to buckets served by plugins
//! - [`registration`] issues and revokes plugin TLS identities
//!
//! Both hold their object with the finalizer lock from [`crate::lock`] while
//! they have work outstanding, and both reach Kubernetes only through
//! [`KubeClient`] and plugins only through [`PluginConnector`].

pub mod claim;
mod client;
pub mod registration;
pub mod resources;

use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use crate::config::ControllerConfig;
use crate::rpc::{PluginConnector, TlsConnector};
use crate::Error;

#[cfg(test)]
pub use client::MockKubeClient;
pub use client::{KubeClient, KubeClientImpl};

/// Controller context shared by every reconciliation
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(config)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Dials plugins; one session per reconciliation
    pub connector: Arc<dyn PluginConnector>,
    /// Runtime configuration
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, connector: Arc<dyn PluginConnector>) -> Self {
        Self {
            kube,
            connector,
            config: ControllerConfig::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// Testing with mock clients:
/// ```ignore
/// let ctx = Context::builder(client)
///     .kube_client(mock_kube)
///     .connector(mock_connector)
///     .build();
/// ```
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    connector: Option<Arc<dyn PluginConnector>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            connector: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set the runtime configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the plugin connector (primarily for testing)
    pub fn connector(mut self, connector: Arc<dyn PluginConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let dial_timeout = self.config.dial_timeout;
        let request_timeout = self.config.reconcile_timeout;
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(TlsConnector::new(dial_timeout, request_timeout))),
            config: self.config,
        }
    }
}

/// How long to wait before retrying after `error`
///
/// Conflicts clear up almost immediately; a plugin that is not ready yet
/// needs longer than a flaky RPC.
pub fn requeue_delay(error: &Error) -> Duration {
    match error {
        Error::Conflict(_) => Duration::from_secs(1),
        Error::NotReady(_) => Duration::from_secs(15),
        Error::Rpc(_) | Error::Timeout(_) => Duration::from_secs(10),
        _ => Duration::from_secs(5),
    }
}
