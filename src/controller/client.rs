//! Kubernetes access for the reconcilers
//!
//! Every API call the reconcilers make goes through [`KubeClient`], so the
//! state machines can be driven against mocks in unit tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::crd::{
    BucketClaim, BucketClaimStatus, BucketClass, ObjectBucket, ObjectBucketStatus,
    PluginRegistration, PluginRegistrationStatus,
};
use crate::retry::retry_on_conflict;
use crate::{lock, Error, FIELD_MANAGER};

/// Trait abstracting Kubernetes client operations
///
/// Reads return `Ok(None)` for missing objects. Creates surface
/// [`Error::AlreadyExists`] and deletes surface [`Error::NotFound`] so the
/// caller decides whether that counts as progress.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a BucketClass
    async fn get_bucket_class(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BucketClass>, Error>;

    /// Get a PluginRegistration
    async fn get_registration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PluginRegistration>, Error>;

    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Get an ObjectBucket
    async fn get_object_bucket(&self, name: &str) -> Result<Option<ObjectBucket>, Error>;

    /// Acquire the lock on a claim, returning the updated claim
    async fn lock_claim(&self, claim: &BucketClaim) -> Result<BucketClaim, Error>;

    /// Release the lock on a claim
    async fn unlock_claim(&self, claim: &BucketClaim) -> Result<(), Error>;

    /// Merge-patch the status of a claim, returning the updated claim
    async fn patch_claim_status(
        &self,
        claim: &BucketClaim,
        status: &BucketClaimStatus,
    ) -> Result<BucketClaim, Error>;

    /// Record the bound ObjectBucket name on a claim
    ///
    /// Guarded by the claim's resourceVersion. A lost race re-reads the
    /// claim and writes again.
    async fn bind_claim(
        &self,
        claim: &BucketClaim,
        object_bucket_name: &str,
    ) -> Result<BucketClaim, Error>;

    /// Create an ObjectBucket
    async fn create_object_bucket(&self, bucket: &ObjectBucket) -> Result<(), Error>;

    /// Merge-patch the status of an ObjectBucket
    async fn patch_object_bucket_status(
        &self,
        name: &str,
        status: &ObjectBucketStatus,
    ) -> Result<(), Error>;

    /// Delete an ObjectBucket
    async fn delete_object_bucket(&self, name: &str) -> Result<(), Error>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Delete a Secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Create a ConfigMap
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;

    /// Delete a ConfigMap
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Acquire the lock on a registration, returning the updated registration
    async fn lock_registration(
        &self,
        registration: &PluginRegistration,
    ) -> Result<PluginRegistration, Error>;

    /// Release the lock on a registration
    async fn unlock_registration(&self, registration: &PluginRegistration) -> Result<(), Error>;

    /// Merge-patch the status of a registration, returning the updated registration
    async fn patch_registration_status(
        &self,
        registration: &PluginRegistration,
        status: &PluginRegistrationStatus,
    ) -> Result<PluginRegistration, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn claims(&self, claim: &BucketClaim) -> Api<BucketClaim> {
        Api::namespaced(self.client.clone(), &claim.namespace().unwrap_or_default())
    }

    fn registrations(&self, registration: &PluginRegistration) -> Api<PluginRegistration> {
        Api::namespaced(
            self.client.clone(),
            &registration.namespace().unwrap_or_default(),
        )
    }

    fn namespace_of<K>(obj: &K) -> Result<String, Error>
    where
        K: ResourceExt,
    {
        obj.namespace()
            .ok_or_else(|| Error::validation(format!("{} has no namespace", obj.name_any())))
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_bucket_class(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BucketClass>, Error> {
        let api: Api<BucketClass> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_registration(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PluginRegistration>, Error> {
        let api: Api<PluginRegistration> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_object_bucket(&self, name: &str) -> Result<Option<ObjectBucket>, Error> {
        let api: Api<ObjectBucket> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn lock_claim(&self, claim: &BucketClaim) -> Result<BucketClaim, Error> {
        lock::lock(&self.claims(claim), claim).await
    }

    async fn unlock_claim(&self, claim: &BucketClaim) -> Result<(), Error> {
        lock::unlock(&self.claims(claim), claim).await
    }

    async fn patch_claim_status(
        &self,
        claim: &BucketClaim,
        status: &BucketClaimStatus,
    ) -> Result<BucketClaim, Error> {
        let status_patch = serde_json::json!({
            "status": status
        });

        Ok(self
            .claims(claim)
            .patch_status(
                &claim.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?)
    }

    async fn bind_claim(
        &self,
        claim: &BucketClaim,
        object_bucket_name: &str,
    ) -> Result<BucketClaim, Error> {
        let api = &self.claims(claim);
        let name = claim.name_any();
        let name = name.as_str();

        retry_on_conflict("bind claim", move || async move {
            let current = api.get_opt(name).await?.ok_or_else(|| {
                Error::not_found(format!("claim {name} was deleted before it was bound"))
            })?;
            if current.spec.object_bucket_name == object_bucket_name {
                return Ok(current);
            }

            let patch = serde_json::json!({
                "metadata": {
                    "resourceVersion": current.resource_version(),
                },
                "spec": {
                    "objectBucketName": object_bucket_name,
                }
            });
            Ok(api
                .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await?)
        })
        .await
    }

    async fn create_object_bucket(&self, bucket: &ObjectBucket) -> Result<(), Error> {
        let api: Api<ObjectBucket> = Api::all(self.client.clone());
        api.create(&PostParams::default(), bucket).await?;
        Ok(())
    }

    async fn patch_object_bucket_status(
        &self,
        name: &str,
        status: &ObjectBucketStatus,
    ) -> Result<(), Error> {
        let api: Api<ObjectBucket> = Api::all(self.client.clone());
        let status_patch = serde_json::json!({
            "status": status
        });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn delete_object_bucket(&self, name: &str) -> Result<(), Error> {
        let api: Api<ObjectBucket> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &Self::namespace_of(secret)?);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        let api: Api<ConfigMap> =
            Api::namespaced(self.client.clone(), &Self::namespace_of(config_map)?);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn lock_registration(
        &self,
        registration: &PluginRegistration,
    ) -> Result<PluginRegistration, Error> {
        lock::lock(&self.registrations(registration), registration).await
    }

    async fn unlock_registration(&self, registration: &PluginRegistration) -> Result<(), Error> {
        lock::unlock(&self.registrations(registration), registration).await
    }

    async fn patch_registration_status(
        &self,
        registration: &PluginRegistration,
        status: &PluginRegistrationStatus,
    ) -> Result<PluginRegistration, Error> {
        let status_patch = serde_json::json!({
            "status": status
        });

        Ok(self
            .registrations(registration)
            .patch_status(
                &registration.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?)
    }
}
