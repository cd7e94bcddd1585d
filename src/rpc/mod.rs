//! Per-reconciliation RPC client bootstrap
//!
//! There is no long-lived plugin client. Each reconciliation that needs a
//! plugin resolves the registration's certificate, dials the plugin over
//! TLS and receives an owned [`Provisioner`] session. Dropping the session
//! closes the channel, so every exit path of the reconciliation releases
//! the connection.
//!
//! The dial is bounded (30 seconds by default) so that a plugin which is
//! registered but not yet listening fails the attempt instead of hanging it.

pub mod tls;

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::config::ControllerConfig;
use crate::controller::KubeClient;
use crate::crd::PluginRegistration;
use crate::proto::provisioner_client::ProvisionerClient;
use crate::proto::{DeprovisionRequest, ProvisionRequest, ProvisionResponse};
use crate::Error;

pub use tls::PluginTlsConfig;

/// A plugin host split into its name and optional port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginAddress {
    /// DNS name or IP literal, without brackets
    pub host: String,
    /// Explicit port, if the address carried one
    pub port: Option<u16>,
}

impl PluginAddress {
    /// Parse `name`, `name:port`, `ip`, `ip:port` or `[ipv6]:port`
    pub fn parse(address: &str) -> Result<Self, Error> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::validation("plugin host is empty"));
        }

        if let Ok(socket) = address.parse::<SocketAddr>() {
            return Ok(Self {
                host: socket.ip().to_string(),
                port: Some(socket.port()),
            });
        }
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(Self {
                host: ip.to_string(),
                port: None,
            });
        }
        if let Some(ip) = address
            .strip_prefix('[')
            .and_then(|a| a.strip_suffix(']'))
            .and_then(|a| a.parse::<IpAddr>().ok())
        {
            return Ok(Self {
                host: ip.to_string(),
                port: None,
            });
        }

        match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::validation(format!("invalid port in plugin host {address}"))
                })?;
                if host.is_empty() {
                    return Err(Error::validation(format!("plugin host {address} has no name")));
                }
                Ok(Self {
                    host: host.to_string(),
                    port: Some(port),
                })
            }
            None => Ok(Self {
                host: address.to_string(),
                port: None,
            }),
        }
    }

    /// `https://` URI for this address, using `default_port` when none is set
    pub fn endpoint_uri(&self, default_port: u16) -> Result<String, Error> {
        let port = self.port.unwrap_or(default_port);
        let host = match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => self.host.clone(),
        };
        let uri = format!("https://{host}:{port}");
        Endpoint::from_shared(uri.clone())
            .map_err(|e| Error::validation(format!("invalid plugin endpoint {uri}: {e}")))?;
        Ok(uri)
    }
}

/// A bucket as reported by the plugin
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisionedBucket {
    /// Object storage endpoint
    pub endpoint: String,
    /// Storage region
    pub region: String,
    /// Bucket name as known to the backend
    pub bucket_name: String,
    /// Credentials published to workloads as environment variables
    pub environment_credentials: BTreeMap<String, String>,
    /// Extra non-secret connection data
    pub data: BTreeMap<String, String>,
}

impl From<ProvisionResponse> for ProvisionedBucket {
    fn from(response: ProvisionResponse) -> Self {
        Self {
            endpoint: response.endpoint,
            region: response.region,
            bucket_name: response.bucket_name,
            environment_credentials: response.environment_credentials.into_iter().collect(),
            data: response.data.into_iter().collect(),
        }
    }
}

/// Operations a connected plugin offers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a new bucket
    async fn provision(
        &self,
        bucket_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<ProvisionedBucket, Error>;

    /// Delete a bucket created by [`Provisioner::provision`]
    async fn deprovision(&self, bucket_name: &str) -> Result<(), Error>;

    /// Bind to an existing bucket
    async fn grant(
        &self,
        bucket_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<ProvisionedBucket, Error>;

    /// Release access to a bucket without deleting it
    async fn revoke(&self, bucket_name: &str) -> Result<(), Error>;
}

/// [`Provisioner`] backed by a tonic channel
pub struct GrpcProvisioner {
    client: ProvisionerClient<Channel>,
}

impl GrpcProvisioner {
    /// Wrap an established channel
    pub fn new(channel: Channel) -> Self {
        Self {
            client: ProvisionerClient::new(channel),
        }
    }
}

fn provision_request(bucket_name: &str, parameters: &BTreeMap<String, String>) -> ProvisionRequest {
    ProvisionRequest {
        request_bucket_name: bucket_name.to_string(),
        parameters: parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

#[async_trait]
impl Provisioner for GrpcProvisioner {
    async fn provision(
        &self,
        bucket_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<ProvisionedBucket, Error> {
        let response = self
            .client
            .clone()
            .provision(provision_request(bucket_name, parameters))
            .await?;
        Ok(response.into_inner().into())
    }

    async fn deprovision(&self, bucket_name: &str) -> Result<(), Error> {
        self.client
            .clone()
            .deprovision(DeprovisionRequest {
                bucket_name: bucket_name.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn grant(
        &self,
        bucket_name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<ProvisionedBucket, Error> {
        let response = self
            .client
            .clone()
            .grant(provision_request(bucket_name, parameters))
            .await?;
        Ok(response.into_inner().into())
    }

    async fn revoke(&self, bucket_name: &str) -> Result<(), Error> {
        self.client
            .clone()
            .revoke(DeprovisionRequest {
                bucket_name: bucket_name.to_string(),
            })
            .await?;
        Ok(())
    }
}

/// Everything needed to dial one plugin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginTarget {
    /// Plugin name from the registration, for logging
    pub plugin_name: String,
    /// `https://host:port` to dial
    pub endpoint: String,
    /// Trust settings for the plugin's certificate
    pub tls: PluginTlsConfig,
}

impl PluginTarget {
    /// Resolve where and how to dial the plugin behind `registration`
    ///
    /// The TLS server name always comes from the registration, since that
    /// is what the certificate was issued for, even when the controller is
    /// configured to dial a different address.
    pub fn resolve(
        registration: &PluginRegistration,
        ca_cert_pem: &str,
        config: &ControllerConfig,
    ) -> Result<Self, Error> {
        let address = PluginAddress::parse(&registration.spec.host)?;
        let endpoint = match &config.plugin_endpoint_override {
            Some(override_address) => PluginAddress::parse(override_address)?,
            None => address.clone(),
        }
        .endpoint_uri(config.default_plugin_port)?;

        Ok(Self {
            plugin_name: registration.spec.plugin_name.clone(),
            endpoint,
            tls: PluginTlsConfig::new(ca_cert_pem, address.host),
        })
    }
}

/// Opens plugin sessions
///
/// This is the seam that lets reconcilers run against fake plugins.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PluginConnector: Send + Sync {
    /// Dial the plugin and return a session bound to the new channel
    async fn connect(&self, target: &PluginTarget) -> Result<Box<dyn Provisioner>, Error>;
}

/// [`PluginConnector`] that dials over TLS with bounded timeouts
#[derive(Clone, Debug)]
pub struct TlsConnector {
    dial_timeout: Duration,
    request_timeout: Duration,
}

impl TlsConnector {
    /// Create a connector with the given dial and per-request bounds
    pub fn new(dial_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            request_timeout,
        }
    }
}

#[async_trait]
impl PluginConnector for TlsConnector {
    async fn connect(&self, target: &PluginTarget) -> Result<Box<dyn Provisioner>, Error> {
        let endpoint = Endpoint::from_shared(target.endpoint.clone())
            .map_err(|e| {
                Error::validation(format!("invalid plugin endpoint {}: {}", target.endpoint, e))
            })?
            .connect_timeout(self.dial_timeout)
            .timeout(self.request_timeout)
            .tls_config(target.tls.to_tonic_config())
            .map_err(|e| Error::rpc(format!("invalid TLS configuration: {}", e)))?;

        debug!(plugin = %target.plugin_name, endpoint = %target.endpoint, "dialing plugin");

        let channel = tokio::time::timeout(self.dial_timeout, endpoint.connect())
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "plugin {} at {} did not accept a connection within {}s",
                    target.plugin_name,
                    target.endpoint,
                    self.dial_timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                Error::rpc(format!(
                    "failed to connect to plugin {} at {}: {}",
                    target.plugin_name, target.endpoint, e
                ))
            })?;

        info!(plugin = %target.plugin_name, endpoint = %target.endpoint, "connected to plugin");
        Ok(Box::new(GrpcProvisioner::new(channel)))
    }
}

/// Open a session to the plugin behind `registration`
///
/// Fails with [`Error::NotReady`] until the registration has been issued a
/// certificate and that certificate's secret is readable.
pub async fn open_channel(
    kube: &dyn KubeClient,
    connector: &dyn PluginConnector,
    registration: &PluginRegistration,
    config: &ControllerConfig,
) -> Result<Box<dyn Provisioner>, Error> {
    let registration_name = registration.metadata.name.as_deref().unwrap_or_default();

    let secret_ref = registration.cert_secret_ref().ok_or_else(|| {
        Error::not_ready(format!(
            "plugin {} has not been issued a TLS certificate",
            registration.spec.plugin_name
        ))
    })?;

    let secret_name = secret_ref.name.as_deref().unwrap_or_default();
    let secret_namespace = secret_ref
        .namespace
        .clone()
        .or_else(|| registration.metadata.namespace.clone())
        .unwrap_or_default();

    let secret = kube
        .get_secret(&secret_namespace, secret_name)
        .await?
        .ok_or_else(|| {
            Error::not_ready(format!(
                "certificate secret {secret_namespace}/{secret_name} for registration {registration_name} does not exist"
            ))
        })?;

    let ca_cert_pem = tls::read_certificate(&secret)?;
    let target = PluginTarget::resolve(registration, &ca_cert_pem, config)?;

    connector.connect(&target).await
}
