//! Builders for the Kubernetes objects the controllers create
//!
//! Names are derived deterministically from the owning object, so creating
//! the same child twice collides on AlreadyExists instead of producing a
//! duplicate.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret, SecretReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::{
    Authentication, BindingMode, BucketClaim, BucketClass, BucketEndpoint, Connection,
    ObjectBucket, ObjectBucketSpec, PluginRegistration,
};
use crate::pki::PluginCertificate;
use crate::rpc::tls::{TLS_CERT_KEY, TLS_KEY_KEY, TLS_SECRET_TYPE};
use crate::rpc::ProvisionedBucket;
use crate::{Error, CHILD_RESOURCE_PREFIX, FIELD_MANAGER};

/// Label carrying the name of the owning claim
pub const CLAIM_LABEL: &str = "cosi.io/claim";

/// Label carrying the namespace of the owning claim
pub const CLAIM_NAMESPACE_LABEL: &str = "cosi.io/claim-namespace";

/// Standard managed-by label
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// ConfigMap key holding the bucket endpoint
pub const ENDPOINT_KEY: &str = "endpoint";

/// ConfigMap key holding the bucket region
pub const REGION_KEY: &str = "region";

/// ConfigMap key holding the backend bucket name
pub const BUCKET_NAME_KEY: &str = "bucketName";

/// Name of the ObjectBucket bound to `claim`
///
/// ObjectBuckets are cluster-scoped, so the claim namespace is part of the name.
pub fn object_bucket_name(claim: &BucketClaim) -> String {
    format!(
        "{}-{}-{}",
        CHILD_RESOURCE_PREFIX,
        claim.namespace().unwrap_or_default(),
        claim.name_any()
    )
}

/// Name shared by the credentials Secret and the connection ConfigMap
pub fn child_resource_name(claim: &BucketClaim) -> String {
    format!("{}-{}", CHILD_RESOURCE_PREFIX, claim.name_any())
}

/// Controller owner reference pointing at `owner`
fn owner_reference<K>(owner: &K) -> Result<OwnerReference, Error>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation(format!(
            "{} {} has no uid yet",
            K::kind(&()),
            owner.meta().name.as_deref().unwrap_or_default()
        ))
    })
}

/// Labels placed on every child of `claim`
pub fn child_labels(claim: &BucketClaim) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLAIM_LABEL.to_string(), claim.name_any()),
        (
            CLAIM_NAMESPACE_LABEL.to_string(),
            claim.namespace().unwrap_or_default(),
        ),
        (MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string()),
    ])
}

fn child_metadata(claim: &BucketClaim) -> Result<ObjectMeta, Error> {
    Ok(ObjectMeta {
        name: Some(child_resource_name(claim)),
        namespace: claim.namespace(),
        labels: Some(child_labels(claim)),
        owner_references: Some(vec![owner_reference(claim)?]),
        ..Default::default()
    })
}

/// ObjectBucket recording what the plugin returned for `claim`
///
/// The ObjectBucket is cluster-scoped and cannot be owned by the namespaced
/// claim; it points back through `claimRef` instead.
pub fn object_bucket(
    claim: &BucketClaim,
    class: &BucketClass,
    binding: BindingMode,
    bucket: &ProvisionedBucket,
) -> ObjectBucket {
    let spec = ObjectBucketSpec {
        release_policy: class.spec.release_policy,
        binding,
        bucket_class_name: class.name_any(),
        bucket_class_namespace: class.namespace().unwrap_or_default(),
        registration_name: class.spec.registration_name.clone(),
        registration_namespace: class.registration_namespace(),
        claim_ref: claim.object_ref(&()),
        connection: Connection {
            endpoint: BucketEndpoint {
                bucket_host: bucket.endpoint.clone(),
                bucket_name: bucket.bucket_name.clone(),
                region: bucket.region.clone(),
                additional_config: bucket.data.clone(),
            },
            authentication: Authentication {
                secret_ref: SecretReference {
                    name: Some(child_resource_name(claim)),
                    namespace: claim.namespace(),
                },
            },
        },
    };

    let mut ob = ObjectBucket::new(&object_bucket_name(claim), spec);
    ob.metadata.labels = Some(child_labels(claim));
    ob
}

/// Secret publishing the plugin-issued credentials to the claim's namespace
pub fn credentials_secret(claim: &BucketClaim, bucket: &ProvisionedBucket) -> Result<Secret, Error> {
    Ok(Secret {
        metadata: child_metadata(claim)?,
        type_: Some("Opaque".to_string()),
        string_data: Some(bucket.environment_credentials.clone()),
        ..Default::default()
    })
}

/// ConfigMap describing how to reach the bucket
///
/// Plugin-supplied data is included, but the well-known keys always reflect
/// the provisioned bucket.
pub fn connection_config_map(
    claim: &BucketClaim,
    bucket: &ProvisionedBucket,
) -> Result<ConfigMap, Error> {
    let mut data = bucket.data.clone();
    data.insert(ENDPOINT_KEY.to_string(), bucket.endpoint.clone());
    data.insert(REGION_KEY.to_string(), bucket.region.clone());
    data.insert(BUCKET_NAME_KEY.to_string(), bucket.bucket_name.clone());

    Ok(ConfigMap {
        metadata: child_metadata(claim)?,
        data: Some(data),
        ..Default::default()
    })
}

/// TLS Secret holding the certificate issued to `registration`
pub fn tls_secret(
    registration: &PluginRegistration,
    cert: &PluginCertificate,
) -> Result<Secret, Error> {
    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(registration.name_any()),
            namespace: registration.namespace(),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                FIELD_MANAGER.to_string(),
            )])),
            owner_references: Some(vec![owner_reference(registration)?]),
            ..Default::default()
        },
        type_: Some(TLS_SECRET_TYPE.to_string()),
        string_data: Some(BTreeMap::from([
            (TLS_CERT_KEY.to_string(), cert.cert_pem().to_string()),
            (TLS_KEY_KEY.to_string(), cert.key_pem().to_string()),
        ])),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        BucketClaimSpec, BucketClassSpec, PluginRegistrationSpec, ReleasePolicy,
    };

    fn claim() -> BucketClaim {
        BucketClaim {
            metadata: ObjectMeta {
                name: Some("logs".to_string()),
                namespace: Some("team-a".to_string()),
                uid: Some("claim-uid".to_string()),
                ..Default::default()
            },
            spec: BucketClaimSpec {
                bucket_name: String::new(),
                bucket_class_name: "standard".to_string(),
                bucket_class_namespace: None,
                object_bucket_name: String::new(),
            },
            status: None,
        }
    }

    fn class() -> BucketClass {
        BucketClass {
            metadata: ObjectMeta {
                name: Some("standard".to_string()),
                namespace: Some("team-a".to_string()),
                ..Default::default()
            },
            spec: BucketClassSpec {
                registration_name: "s3-plugin".to_string(),
                registration_namespace: Some("plugins".to_string()),
                plugin_parameters: BTreeMap::new(),
                release_policy: ReleasePolicy::Retain,
            },
        }
    }

    fn bucket() -> ProvisionedBucket {
        ProvisionedBucket {
            endpoint: "s3.example.com".to_string(),
            region: "us-east-1".to_string(),
            bucket_name: "b-123".to_string(),
            environment_credentials: BTreeMap::from([(
                "AWS_ACCESS_KEY_ID".to_string(),
                "X".to_string(),
            )]),
            data: BTreeMap::from([("pathStyle".to_string(), "true".to_string())]),
        }
    }

    #[test]
    fn names_are_derived_from_the_claim() {
        assert_eq!(object_bucket_name(&claim()), "cosi-team-a-logs");
        assert_eq!(child_resource_name(&claim()), "cosi-logs");
    }

    #[test]
    fn object_bucket_points_back_to_claim() {
        let ob = object_bucket(&claim(), &class(), BindingMode::Provisioned, &bucket());

        assert_eq!(ob.name_any(), "cosi-team-a-logs");
        assert_eq!(ob.spec.release_policy, ReleasePolicy::Retain);
        assert_eq!(ob.spec.bucket_class_name, "standard");
        assert_eq!(ob.spec.bucket_class_namespace, "team-a");
        assert_eq!(ob.spec.registration_name, "s3-plugin");
        assert_eq!(ob.spec.registration_namespace, "plugins");
        assert_eq!(ob.spec.claim_ref.name.as_deref(), Some("logs"));
        assert_eq!(ob.spec.claim_ref.uid.as_deref(), Some("claim-uid"));
        assert_eq!(ob.spec.connection.endpoint.bucket_name, "b-123");
        assert_eq!(
            ob.spec.connection.authentication.secret_ref.name.as_deref(),
            Some("cosi-logs")
        );
        // Cluster-scoped objects cannot be owned by namespaced ones
        assert!(ob.metadata.owner_references.is_none());
    }

    /// Story: what the plugin returns is what the workload sees
    ///
    /// Credentials land in the Secret and connection details in the
    /// ConfigMap, both owned by the claim so they go away with it.
    #[test]
    fn story_provision_response_reaches_secret_and_config_map() {
        let claim = claim();
        let secret = credentials_secret(&claim, &bucket()).unwrap();
        let config_map = connection_config_map(&claim, &bucket()).unwrap();

        let creds = secret.string_data.unwrap();
        assert_eq!(creds["AWS_ACCESS_KEY_ID"], "X");

        let data = config_map.data.unwrap();
        assert_eq!(data[ENDPOINT_KEY], "s3.example.com");
        assert_eq!(data[REGION_KEY], "us-east-1");
        assert_eq!(data[BUCKET_NAME_KEY], "b-123");
        assert_eq!(data["pathStyle"], "true");

        for meta in [&secret.metadata, &config_map.metadata] {
            assert_eq!(meta.name.as_deref(), Some("cosi-logs"));
            assert_eq!(meta.namespace.as_deref(), Some("team-a"));
            let owner = &meta.owner_references.as_ref().unwrap()[0];
            assert_eq!(owner.kind, "BucketClaim");
            assert_eq!(owner.uid, "claim-uid");
            assert_eq!(owner.controller, Some(true));
            let labels = meta.labels.as_ref().unwrap();
            assert_eq!(labels[CLAIM_LABEL], "logs");
            assert_eq!(labels[CLAIM_NAMESPACE_LABEL], "team-a");
            assert_eq!(labels[MANAGED_BY_LABEL], "cosi-controller");
        }
    }

    #[test]
    fn plugin_data_cannot_shadow_well_known_keys() {
        let mut response = bucket();
        response
            .data
            .insert(BUCKET_NAME_KEY.to_string(), "spoofed".to_string());

        let data = connection_config_map(&claim(), &response)
            .unwrap()
            .data
            .unwrap();
        assert_eq!(data[BUCKET_NAME_KEY], "b-123");
    }

    #[test]
    fn children_need_a_persisted_claim() {
        let mut unsaved = claim();
        unsaved.metadata.uid = None;
        assert!(matches!(
            credentials_secret(&unsaved, &bucket()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn tls_secret_is_owned_by_registration() {
        let registration = PluginRegistration {
            metadata: ObjectMeta {
                name: Some("s3-plugin".to_string()),
                namespace: Some("plugins".to_string()),
                uid: Some("reg-uid".to_string()),
                ..Default::default()
            },
            spec: PluginRegistrationSpec {
                plugin_name: "s3".to_string(),
                host: "plugin.svc".to_string(),
            },
            status: None,
        };
        let cert = PluginCertificate::issue("plugin.svc").unwrap();

        let secret = tls_secret(&registration, &cert).unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("s3-plugin"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("plugins"));
        assert_eq!(secret.type_.as_deref(), Some(TLS_SECRET_TYPE));
        let data = secret.string_data.unwrap();
        assert_eq!(data[TLS_CERT_KEY], cert.cert_pem());
        assert_eq!(data[TLS_KEY_KEY], cert.key_pem());
        let owner = &secret.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "PluginRegistration");
    }
}
