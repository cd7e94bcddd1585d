//! Client-side TLS for plugin connections
//!
//! The controller authenticates the plugin, not the other way around: the
//! only trusted root is the certificate issued for the plugin's registration.

use k8s_openapi::api::core::v1::Secret;
use tonic::transport::{Certificate, ClientTlsConfig};

use crate::pki::parse_pem;
use crate::Error;

/// Secret key holding the PEM-encoded certificate
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret key holding the PEM-encoded private key
pub const TLS_KEY_KEY: &str = "tls.key";

/// Secret type used for issued plugin certificates
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// TLS settings for dialing one plugin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginTlsConfig {
    /// PEM certificate the plugin must present
    pub ca_cert_pem: String,
    /// Name checked against the certificate's subject alternative name
    pub server_name: String,
}

impl PluginTlsConfig {
    /// Create a TLS config trusting `ca_cert_pem` for `server_name`
    pub fn new(ca_cert_pem: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            ca_cert_pem: ca_cert_pem.into(),
            server_name: server_name.into(),
        }
    }

    /// Build a tonic ClientTlsConfig
    pub fn to_tonic_config(&self) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&self.ca_cert_pem))
            .domain_name(&self.server_name)
    }
}

/// Read the PEM certificate out of an issued certificate secret
///
/// A secret without a readable `tls.crt` means issuance has not finished,
/// which is a not-ready condition rather than a hard failure.
pub fn read_certificate(secret: &Secret) -> Result<String, Error> {
    let secret_name = secret.metadata.name.as_deref().unwrap_or_default();

    let cert_pem = secret_value(secret, TLS_CERT_KEY).ok_or_else(|| {
        Error::not_ready(format!(
            "certificate secret {secret_name} has no {TLS_CERT_KEY}"
        ))
    })?;

    parse_pem(&cert_pem).map_err(|e| {
        Error::not_ready(format!(
            "certificate secret {secret_name} holds an unreadable certificate: {e}"
        ))
    })?;

    Ok(cert_pem)
}

/// Read a UTF-8 value from a secret's `data`, falling back to `stringData`
fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(key))
                .cloned()
        })
        .filter(|value| !value.is_empty())
}
