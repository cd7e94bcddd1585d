//! BucketClaim reconciler
//!
//! A claim moves through four observable states:
//!
//! ```text
//! Unbound ──┐
//!           ├──> Bound ──> Deleting ──> (lock released, claim gone)
//! Pending ──┘
//! ```
//!
//! Binding asks the plugin for a bucket and publishes it as an ObjectBucket,
//! a credentials Secret and a connection ConfigMap. Recording
//! `spec.objectBucketName` on the claim is the commit point: it is written
//! only after every child exists, so a claim that carries the name never
//! needs another plugin call until it is deleted.

use std::future::Future;
use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::{requeue_delay, resources, Context};
use crate::crd::{
    BindingMode, BucketClaim, BucketClaimStatus, BucketClass, ClaimPhase, Condition,
    ConditionStatus, ObjectBucket, ObjectBucketStatus, PluginRegistration, ReleasePolicy,
};
use crate::error::{created_or_existing, ignore_not_found};
use crate::lock;
use crate::rpc::{open_channel, ProvisionedBucket, Provisioner};
use crate::Error;

/// Condition type reported on claims
pub const READY_CONDITION: &str = "Ready";

/// Where a claim is in its lifecycle, derived from the object alone
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimState {
    /// Not yet touched by the controller
    Unbound,
    /// Provisioning started but has not committed
    Pending,
    /// An ObjectBucket has been recorded on the claim
    Bound,
    /// Deletion has been requested
    Deleting,
}

impl ClaimState {
    /// Derive the state of `claim`
    pub fn of(claim: &BucketClaim) -> Self {
        if claim.is_deleting() {
            Self::Deleting
        } else if claim.is_bound() {
            Self::Bound
        } else if claim.phase() == Some(ClaimPhase::Pending) {
            Self::Pending
        } else {
            Self::Unbound
        }
    }
}

/// Whether releasing a bucket destroys it
///
/// Only buckets the plugin created for the claim are deleted, and only under
/// the `Delete` policy. Everything else is revoked.
pub fn deletes_bucket(binding: BindingMode, policy: ReleasePolicy) -> bool {
    matches!(
        (binding, policy),
        (BindingMode::Provisioned, ReleasePolicy::Delete)
    )
}

/// Reconcile a BucketClaim
///
/// Bounded by the configured reconcile timeout. Failures are recorded on
/// the claim as a `Ready=False` condition and returned to the runtime.
#[instrument(
    skip(claim, ctx),
    fields(claim = %claim.name_any(), namespace = %claim.namespace().unwrap_or_default())
)]
pub async fn reconcile(claim: Arc<BucketClaim>, ctx: Arc<Context>) -> Result<Action, Error> {
    let state = ClaimState::of(&claim);
    debug!(?state, "reconciling claim");

    if state != ClaimState::Deleting {
        if let Err(e) = claim.spec.validate() {
            warn!(error = %e, "claim validation failed");
            record_failure(&claim, &ctx, &e).await;
            // Don't requeue for validation errors - they require spec changes
            return Ok(Action::await_change());
        }
    }

    let result = sync(&claim, &ctx, state).await;
    if let Err(e) = &result {
        record_failure(&claim, &ctx, e).await;
    }
    result
}

/// Error policy for the claim controller
pub fn error_policy(claim: Arc<BucketClaim>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(
            %error,
            claim = %claim.name_any(),
            namespace = %claim.namespace().unwrap_or_default(),
            "reconciliation failed, will retry"
        );
    } else {
        error!(
            ?error,
            claim = %claim.name_any(),
            namespace = %claim.namespace().unwrap_or_default(),
            "reconciliation failed"
        );
    }
    Action::requeue(requeue_delay(error))
}

async fn sync(claim: &BucketClaim, ctx: &Context, state: ClaimState) -> Result<Action, Error> {
    let deadline = Instant::now() + ctx.config.reconcile_timeout;
    match state {
        ClaimState::Deleting => before(deadline, ctx, release(claim, ctx)).await?,
        ClaimState::Bound => before(deadline, ctx, ensure_bound_phase(claim, ctx)).await?,
        ClaimState::Unbound | ClaimState::Pending => bind(claim, ctx, deadline).await?,
    }
    Ok(Action::await_change())
}

/// Run `work`, failing with [`Error::Timeout`] once `deadline` has passed
async fn before<T>(
    deadline: Instant,
    ctx: &Context,
    work: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match tokio::time::timeout_at(deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!(
            "reconciliation did not finish within {}s",
            ctx.config.reconcile_timeout.as_secs()
        ))),
    }
}

/// A bound claim needs no plugin call; only a lost phase write is repaired
async fn ensure_bound_phase(claim: &BucketClaim, ctx: &Context) -> Result<(), Error> {
    if claim.phase() == Some(ClaimPhase::Bound) {
        return Ok(());
    }
    info!("claim is bound but its phase is stale");
    advance_phase(
        claim,
        ctx,
        ClaimPhase::Bound,
        format!("bound to {}", claim.spec.object_bucket_name),
    )
    .await?;
    Ok(())
}

/// Children created by the current attempt, for cleanup
#[derive(Debug, Default)]
struct CreatedChildren {
    object_bucket: bool,
    secret: bool,
    config_map: bool,
}

/// What a binding attempt holds once the plugin has handed out a bucket
struct Acquired {
    claim: BucketClaim,
    class: BucketClass,
    plugin: Box<dyn Provisioner>,
    bucket: ProvisionedBucket,
}

/// Bind `claim`, finishing or undoing the attempt by `deadline`
///
/// Once the plugin has returned a bucket, any failure to publish it,
/// including running out of time, releases the bucket again and deletes
/// what this attempt created. A conflict on the commit write is retried in
/// place by the client first.
async fn bind(claim: &BucketClaim, ctx: &Context, deadline: Instant) -> Result<(), Error> {
    let Acquired {
        claim,
        class,
        plugin,
        bucket,
    } = before(deadline, ctx, acquire_bucket(claim, ctx)).await?;
    let binding = class.binding_mode();

    let mut created = CreatedChildren::default();
    let published = before(
        deadline,
        ctx,
        publish(&claim, &class, binding, &bucket, ctx, &mut created),
    )
    .await;
    let claim = match published {
        Ok(claim) => claim,
        Err(e) => {
            roll_back(&claim, ctx, plugin.as_ref(), binding, &bucket, &created).await;
            return Err(e);
        }
    };

    // Committed: a lost phase write is repaired by the next reconcile
    let message = format!("bound to {}", claim.spec.object_bucket_name);
    advance_phase(&claim, ctx, ClaimPhase::Bound, message).await?;
    info!(object_bucket = %claim.spec.object_bucket_name, "claim bound");
    Ok(())
}

/// Lock the claim, dial its plugin and ask for a bucket
async fn acquire_bucket(claim: &BucketClaim, ctx: &Context) -> Result<Acquired, Error> {
    let claim = ctx.kube.lock_claim(claim).await?;
    let claim = advance_phase(&claim, ctx, ClaimPhase::Pending, "provisioning bucket").await?;

    let class = get_class(ctx, &claim.class_namespace(), &claim.spec.bucket_class_name).await?;
    let registration = get_registration(
        ctx,
        &class.registration_namespace(),
        &class.spec.registration_name,
    )
    .await?;
    let plugin = open_channel(
        ctx.kube.as_ref(),
        ctx.connector.as_ref(),
        &registration,
        &ctx.config,
    )
    .await?;

    let bucket = request_bucket(&claim, &class, plugin.as_ref()).await?;
    info!(
        bucket = %bucket.bucket_name,
        binding = %class.binding_mode(),
        plugin = %registration.spec.plugin_name,
        "plugin returned bucket"
    );

    Ok(Acquired {
        claim,
        class,
        plugin,
        bucket,
    })
}

/// Ask the plugin for a new bucket, or for access to the class's existing one
async fn request_bucket(
    claim: &BucketClaim,
    class: &BucketClass,
    plugin: &dyn Provisioner,
) -> Result<ProvisionedBucket, Error> {
    let parameters = &class.spec.plugin_parameters;
    let (requested, mut bucket) = match class.existing_bucket_name() {
        Some(existing) => (
            existing.to_string(),
            plugin.grant(existing, parameters).await?,
        ),
        None => (
            claim.spec.bucket_name.clone(),
            plugin.provision(&claim.spec.bucket_name, parameters).await?,
        ),
    };

    if bucket.bucket_name.is_empty() {
        bucket.bucket_name = requested;
    }
    if bucket.bucket_name.is_empty() {
        return Err(Error::rpc("plugin returned a bucket without a name"));
    }
    Ok(bucket)
}

/// Create the children of `claim`, then record the ObjectBucket on it
async fn publish(
    claim: &BucketClaim,
    class: &BucketClass,
    binding: BindingMode,
    bucket: &ProvisionedBucket,
    ctx: &Context,
    created: &mut CreatedChildren,
) -> Result<BucketClaim, Error> {
    let object_bucket = resources::object_bucket(claim, class, binding, bucket);
    let object_bucket_name = object_bucket.name_any();
    let secret = resources::credentials_secret(claim, bucket)?;
    let config_map = resources::connection_config_map(claim, bucket)?;

    // Each child is marked before its create so that a create cut off by
    // the deadline, or failing after the server stored it, is still cleaned
    // up. Only AlreadyExists clears the mark.
    created.object_bucket = true;
    created.object_bucket =
        created_or_existing(ctx.kube.create_object_bucket(&object_bucket).await)?;
    ctx.kube
        .patch_object_bucket_status(&object_bucket_name, &ObjectBucketStatus::bound())
        .await?;

    created.secret = true;
    created.secret = created_or_existing(ctx.kube.create_secret(&secret).await)?;

    created.config_map = true;
    created.config_map = created_or_existing(ctx.kube.create_config_map(&config_map).await)?;

    debug!(
        object_bucket = %object_bucket_name,
        created_object_bucket = created.object_bucket,
        created_secret = created.secret,
        created_config_map = created.config_map,
        "children published"
    );

    ctx.kube.bind_claim(claim, &object_bucket_name).await
}

/// Best-effort undo of a failed binding
///
/// Secondary failures are logged and swallowed so that the original error
/// is the one reported.
async fn roll_back(
    claim: &BucketClaim,
    ctx: &Context,
    plugin: &dyn Provisioner,
    binding: BindingMode,
    bucket: &ProvisionedBucket,
    created: &CreatedChildren,
) {
    let bucket_name = bucket.bucket_name.as_str();
    warn!(bucket = bucket_name, %binding, "binding failed, releasing bucket");

    let released = match binding {
        BindingMode::Granted => plugin.revoke(bucket_name).await,
        BindingMode::Provisioned => plugin.deprovision(bucket_name).await,
    };
    if let Err(e) = released {
        warn!(error = %e, bucket = bucket_name, "failed to release bucket during cleanup");
    }

    let namespace = claim.namespace().unwrap_or_default();
    let child = resources::child_resource_name(claim);

    if created.config_map {
        if let Err(e) = ignore_not_found(ctx.kube.delete_config_map(&namespace, &child).await) {
            warn!(error = %e, config_map = %child, "failed to delete config map during cleanup");
        }
    }
    if created.secret {
        if let Err(e) = ignore_not_found(ctx.kube.delete_secret(&namespace, &child).await) {
            warn!(error = %e, secret = %child, "failed to delete secret during cleanup");
        }
    }
    if created.object_bucket {
        let name = resources::object_bucket_name(claim);
        if let Err(e) = ignore_not_found(ctx.kube.delete_object_bucket(&name).await) {
            warn!(error = %e, object_bucket = %name, "failed to delete object bucket during cleanup");
        }
    }
}

async fn release(claim: &BucketClaim, ctx: &Context) -> Result<(), Error> {
    if !lock::is_locked(claim) {
        debug!("claim is not locked, nothing to release");
        return Ok(());
    }

    if !claim.is_bound() {
        info!("claim was never bound, releasing lock");
        return ctx.kube.unlock_claim(claim).await;
    }

    let claim = advance_phase(claim, ctx, ClaimPhase::Released, "releasing bucket").await?;
    let object_bucket_name = claim.spec.object_bucket_name.as_str();

    match ctx.kube.get_object_bucket(object_bucket_name).await? {
        Some(object_bucket) => {
            release_bucket(&object_bucket, ctx).await?;
            ignore_not_found(
                ctx.kube
                    .patch_object_bucket_status(
                        object_bucket_name,
                        &ObjectBucketStatus::released(),
                    )
                    .await,
            )?;
            ignore_not_found(ctx.kube.delete_object_bucket(object_bucket_name).await)?;
            info!(object_bucket = object_bucket_name, "object bucket deleted");
        }
        None => {
            info!(
                object_bucket = object_bucket_name,
                "object bucket already gone, skipping plugin call"
            );
        }
    }

    ctx.kube.unlock_claim(&claim).await?;
    info!("claim released");
    Ok(())
}

/// Deprovision or revoke the bucket behind `object_bucket`
///
/// The plugin, binding and policy recorded on the ObjectBucket decide, so
/// editing or deleting the class after binding changes nothing here.
async fn release_bucket(object_bucket: &ObjectBucket, ctx: &Context) -> Result<(), Error> {
    let spec = &object_bucket.spec;
    let registration =
        get_registration(ctx, &spec.registration_namespace, &spec.registration_name).await?;
    let plugin = open_channel(
        ctx.kube.as_ref(),
        ctx.connector.as_ref(),
        &registration,
        &ctx.config,
    )
    .await?;

    let bucket_name = spec.connection.endpoint.bucket_name.as_str();
    if deletes_bucket(spec.binding, spec.release_policy) {
        plugin.deprovision(bucket_name).await?;
        info!(bucket = bucket_name, "bucket deprovisioned");
    } else {
        plugin.revoke(bucket_name).await?;
        info!(bucket = bucket_name, policy = %spec.release_policy, "bucket access revoked");
    }
    Ok(())
}

async fn get_class(ctx: &Context, namespace: &str, name: &str) -> Result<BucketClass, Error> {
    ctx.kube
        .get_bucket_class(namespace, name)
        .await?
        .ok_or_else(|| Error::not_ready(format!("bucket class {namespace}/{name} not found")))
}

async fn get_registration(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<PluginRegistration, Error> {
    ctx.kube
        .get_registration(namespace, name)
        .await?
        .ok_or_else(|| {
            Error::not_ready(format!(
                "plugin registration {namespace}/{name} not found"
            ))
        })
}

fn phase_condition(phase: ClaimPhase, message: &str) -> Condition {
    let (status, reason) = match phase {
        ClaimPhase::Pending => (ConditionStatus::False, "Provisioning"),
        ClaimPhase::Bound => (ConditionStatus::True, "Bound"),
        ClaimPhase::Released => (ConditionStatus::False, "Released"),
    };
    Condition::new(READY_CONDITION, status, reason, message)
}

/// Move `claim` forward to `phase`, returning the claim as written
///
/// Writing the current phase again is skipped, and moving backwards is
/// refused.
async fn advance_phase(
    claim: &BucketClaim,
    ctx: &Context,
    phase: ClaimPhase,
    message: impl Into<String>,
) -> Result<BucketClaim, Error> {
    let current = claim.phase();
    if current == Some(phase) {
        return Ok(claim.clone());
    }
    if !ClaimPhase::can_transition(current, phase) {
        warn!(from = ?current, to = %phase, "refusing to move claim phase backwards");
        return Ok(claim.clone());
    }

    let message = message.into();
    let status = BucketClaimStatus::with_phase(phase)
        .message(message.clone())
        .condition(phase_condition(phase, &message));

    let updated = ctx.kube.patch_claim_status(claim, &status).await?;
    info!(%phase, "claim phase updated");
    Ok(updated)
}

/// Record `error` on the claim without touching its phase
async fn record_failure(claim: &BucketClaim, ctx: &Context, error: &Error) {
    let status = BucketClaimStatus::default()
        .message(error.to_string())
        .condition(Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            error.reason(),
            error.to_string(),
        ));

    if let Err(e) = ctx.kube.patch_claim_status(claim, &status).await {
        debug!(error = %e, "failed to record claim failure");
    }
}
