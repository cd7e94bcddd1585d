//! PluginRegistration Custom Resource Definition
//!
//! A PluginRegistration announces a provisioning plugin: its name and the
//! host the controller should dial. The registration reconciler issues the
//! plugin a TLS identity exactly once and records where it is stored.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::SecretReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Specification for a PluginRegistration
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cosi.io",
    version = "v1alpha1",
    kind = "PluginRegistration",
    plural = "pluginregistrations",
    shortname = "preg",
    status = "PluginRegistrationStatus",
    namespaced,
    printcolumn = r#"{"name":"Plugin","type":"string","jsonPath":".spec.pluginName"}"#,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"CertSecret","type":"string","jsonPath":".status.certSecretRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PluginRegistrationSpec {
    /// Name the plugin identifies itself by
    pub plugin_name: String,

    /// Address the plugin serves on: a DNS name or IP, optionally with `:port`
    pub host: String,
}

/// Status for a PluginRegistration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginRegistrationStatus {
    /// Secret holding the issued certificate; set exactly once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_secret_ref: Option<SecretReference>,

    /// When the issued certificate stops being valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_expiry: Option<DateTime<Utc>>,

    /// Conditions representing the registration state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl PluginRegistrationStatus {
    /// Status recording an issued certificate
    pub fn issued(secret_ref: SecretReference, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            cert_secret_ref: Some(secret_ref),
            certificate_expiry: expiry,
            conditions: Vec::new(),
        }
    }

    /// Add a condition
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

impl PluginRegistration {
    /// Reference to the certificate secret, if one has been issued
    pub fn cert_secret_ref(&self) -> Option<&SecretReference> {
        self.status
            .as_ref()
            .and_then(|s| s.cert_secret_ref.as_ref())
            .filter(|r| r.name.as_deref().is_some_and(|n| !n.is_empty()))
    }

    /// True once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
