//! PluginRegistration reconciler
//!
//! Acts as a tiny certificate authority. Each registration is issued one
//! self-signed server certificate for its host, stored in a TLS Secret named
//! after the registration. The claim reconciler trusts exactly that
//! certificate when dialing the plugin.
//!
//! Issuance happens only while `status.certSecretRef` is unset. The Secret
//! name is deterministic, so two racing issuers collide on AlreadyExists and
//! the loser adopts the winner's certificate instead of overwriting it.

use std::sync::Arc;

use k8s_openapi::api::core::v1::SecretReference;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::{requeue_delay, resources, Context};
use crate::crd::{Condition, ConditionStatus, PluginRegistration, PluginRegistrationStatus};
use crate::error::{created_or_existing, ignore_not_found};
use crate::lock;
use crate::pki::{certificate_expiry, PluginCertificate};
use crate::rpc::{tls, PluginAddress};
use crate::Error;

/// Condition type reported on registrations
pub const CERTIFICATE_CONDITION: &str = "CertificateIssued";

/// Reconcile a PluginRegistration
///
/// Deletion revokes the certificate. Otherwise the certificate is issued if
/// needed and the lock is ensured, which also repairs a registration whose
/// status was written but whose lock was not.
#[instrument(
    skip(registration, ctx),
    fields(
        registration = %registration.name_any(),
        namespace = %registration.namespace().unwrap_or_default()
    )
)]
pub async fn reconcile(
    registration: Arc<PluginRegistration>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    if registration.is_deleting() {
        if lock::is_locked(registration.as_ref()) {
            revoke(&registration, &ctx).await?;
        }
        return Ok(Action::await_change());
    }

    let issued = match issue(&registration, &ctx).await {
        Ok(issued) => issued,
        Err(e) => {
            record_failure(&registration, &ctx, &e).await;
            return Err(e);
        }
    };

    if !lock::is_locked(&issued) {
        info!("certificate issued but registration unlocked, acquiring lock");
        ctx.kube.lock_registration(&issued).await?;
    }
    Ok(Action::await_change())
}

/// Error policy for the registration controller
pub fn error_policy(
    registration: Arc<PluginRegistration>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(
        ?error,
        registration = %registration.name_any(),
        namespace = %registration.namespace().unwrap_or_default(),
        "reconciliation failed"
    );
    Action::requeue(requeue_delay(error))
}

/// Issue a certificate for `registration`, returning the registration as written
///
/// A registration that already references a certificate is returned
/// unchanged. Key generation and signing happen before any write, so a
/// failure there leaves nothing behind.
pub async fn issue(
    registration: &PluginRegistration,
    ctx: &Context,
) -> Result<PluginRegistration, Error> {
    if registration.cert_secret_ref().is_some() {
        debug!("certificate already issued");
        return Ok(registration.clone());
    }

    let address = PluginAddress::parse(&registration.spec.host)?;
    let cert = PluginCertificate::issue(&address.host)?;
    let secret = resources::tls_secret(registration, &cert)?;
    let secret_name = secret.name_any();
    let namespace = registration.namespace().unwrap_or_default();

    let expiry = if created_or_existing(ctx.kube.create_secret(&secret).await)? {
        info!(secret = %secret_name, host = %address.host, "plugin certificate issued");
        cert.not_after()
    } else {
        // Another issuer won the race; record its certificate, not ours
        let existing = ctx
            .kube
            .get_secret(&namespace, &secret_name)
            .await?
            .ok_or_else(|| {
                Error::not_ready(format!(
                    "certificate secret {namespace}/{secret_name} disappeared while being adopted"
                ))
            })?;
        let expiry = certificate_expiry(&tls::read_certificate(&existing)?)?;
        info!(secret = %secret_name, "adopted existing plugin certificate");
        expiry
    };

    let status = PluginRegistrationStatus::issued(
        SecretReference {
            name: Some(secret_name.clone()),
            namespace: Some(namespace),
        },
        Some(expiry),
    )
    .condition(Condition::new(
        CERTIFICATE_CONDITION,
        ConditionStatus::True,
        "Issued",
        format!("certificate stored in {secret_name}, valid until {expiry}"),
    ));

    let updated = ctx.kube.patch_registration_status(registration, &status).await?;
    ctx.kube.lock_registration(&updated).await
}

/// Revoke the certificate of `registration` and release its lock
///
/// A certificate Secret that is already gone counts as revoked.
pub async fn revoke(registration: &PluginRegistration, ctx: &Context) -> Result<(), Error> {
    if let Some(secret_ref) = registration.cert_secret_ref() {
        let namespace = secret_ref
            .namespace
            .clone()
            .or_else(|| registration.namespace())
            .unwrap_or_default();
        let name = secret_ref.name.as_deref().unwrap_or_default();

        ignore_not_found(ctx.kube.delete_secret(&namespace, name).await)?;
        info!(secret = name, "plugin certificate revoked");
    }

    ctx.kube.unlock_registration(registration).await
}

async fn record_failure(registration: &PluginRegistration, ctx: &Context, error: &Error) {
    let status = PluginRegistrationStatus::default().condition(Condition::new(
        CERTIFICATE_CONDITION,
        ConditionStatus::False,
        error.reason(),
        error.to_string(),
    ));

    if let Err(e) = ctx.kube.patch_registration_status(registration, &status).await {
        warn!(error = %e, "failed to record registration failure");
    }
}
