//! BucketClass Custom Resource Definition
//!
//! A BucketClass selects the plugin (via its registration) that serves a
//! claim and carries the opaque parameters passed to that plugin. Classes are
//! managed by administrators and only read by the controller.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BindingMode, ReleasePolicy};

/// Plugin parameter naming a pre-existing bucket
///
/// Its presence turns the class into a brownfield class: claims are granted
/// access to that bucket instead of getting a new one.
pub const EXISTING_BUCKET_PARAMETER: &str = "bucketName";

/// Specification for a BucketClass
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cosi.io",
    version = "v1alpha1",
    kind = "BucketClass",
    plural = "bucketclasses",
    shortname = "bcl",
    namespaced,
    printcolumn = r#"{"name":"Registration","type":"string","jsonPath":".spec.registrationName"}"#,
    printcolumn = r#"{"name":"ReleasePolicy","type":"string","jsonPath":".spec.releasePolicy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClassSpec {
    /// Name of the PluginRegistration serving this class
    pub registration_name: String,

    /// Namespace of the PluginRegistration (defaults to the class namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_namespace: Option<String>,

    /// Opaque parameters passed to the plugin on every call
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugin_parameters: BTreeMap<String, String>,

    /// What to do with the bucket when a claim is deleted
    #[serde(default)]
    pub release_policy: ReleasePolicy,
}

impl BucketClass {
    /// Namespace of the referenced PluginRegistration
    pub fn registration_namespace(&self) -> String {
        self.spec
            .registration_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace().unwrap_or_default())
    }

    /// Name of the pre-existing bucket for brownfield classes
    pub fn existing_bucket_name(&self) -> Option<&str> {
        self.spec
            .plugin_parameters
            .get(EXISTING_BUCKET_PARAMETER)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// How claims of this class get bound
    pub fn binding_mode(&self) -> BindingMode {
        if self.existing_bucket_name().is_some() {
            BindingMode::Granted
        } else {
            BindingMode::Provisioned
        }
    }
}
