//! Shared setup for cluster-backed tests

use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use cosi::crd::{BucketClaim, BucketClass, ObjectBucket, PluginRegistration};
use cosi::FIELD_MANAGER;

/// Namespace every namespaced test object lives in
pub const TEST_NAMESPACE: &str = "cosi-integration-test";

/// Connect to the current cluster and make sure the CRDs and test namespace exist
pub async fn ensure_test_cluster() -> Result<Client, kube::Error> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let client = Client::try_default().await?;
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    for crd in [
        BucketClaim::crd(),
        BucketClass::crd(),
        PluginRegistration::crd(),
        ObjectBucket::crd(),
    ] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;
    }

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    namespaces
        .patch(TEST_NAMESPACE, &params, &Patch::Apply(&namespace))
        .await?;

    // Freshly applied CRDs take a moment to be served
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(client)
}
