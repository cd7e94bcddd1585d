//! COSI controller - binds BucketClaims to buckets served by gRPC plugins

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cosi::config::ControllerConfig;
use cosi::controller::{claim, registration, Context};
use cosi::crd::{BucketClaim, BucketClass, ObjectBucket, PluginRegistration};
use cosi::{DEFAULT_PLUGIN_PORT, FIELD_MANAGER};

/// COSI controller - provisions object storage buckets through registered plugins
#[derive(Parser, Debug)]
#[command(name = "cosi-controller", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Dial every plugin at this `host:port` instead of its registered host
    ///
    /// Intended for development, when plugins run outside the cluster. TLS
    /// still verifies the registered host name.
    #[arg(long, env = "COSI_PLUGIN_ENDPOINT")]
    plugin_endpoint: Option<String>,

    /// Port dialed when a registration's host does not specify one
    #[arg(long, env = "COSI_PLUGIN_PORT", default_value_t = DEFAULT_PLUGIN_PORT)]
    plugin_port: u16,

    /// Seconds allowed for establishing a plugin connection
    #[arg(long, env = "COSI_DIAL_TIMEOUT_SECS", default_value = "30")]
    dial_timeout_secs: u64,

    /// Seconds allowed for a single reconciliation
    #[arg(long, env = "COSI_RECONCILE_TIMEOUT_SECS", default_value = "30")]
    reconcile_timeout_secs: u64,
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            plugin_endpoint_override: self.plugin_endpoint.clone().filter(|e| !e.is_empty()),
            default_plugin_port: self.plugin_port,
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Plugin TLS and the Kubernetes client both need a process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let manifests = [
            serde_yaml::to_string(&BucketClaim::crd()),
            serde_yaml::to_string(&BucketClass::crd()),
            serde_yaml::to_string(&PluginRegistration::crd()),
            serde_yaml::to_string(&ObjectBucket::crd()),
        ]
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{}", manifests.join("---\n"));
        return Ok(());
    }

    let config = cli.controller_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    run_controller(config).await
}

/// Ensure all COSI CRDs are installed
///
/// The controller installs its own CRDs on startup using server-side apply,
/// so the CRD versions always match the controller version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [
        BucketClaim::crd(),
        BucketClass::crd(),
        PluginRegistration::crd(),
        ObjectBucket::crd(),
    ] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD...");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All COSI CRDs installed/updated");
    Ok(())
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    tracing::info!(
        dial_timeout_secs = config.dial_timeout.as_secs(),
        reconcile_timeout_secs = config.reconcile_timeout.as_secs(),
        plugin_endpoint_override = ?config.plugin_endpoint_override,
        "COSI controller starting..."
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(Context::builder(client.clone()).config(config).build());

    let claims: Api<BucketClaim> = Api::all(client.clone());
    let registrations: Api<PluginRegistration> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let config_maps: Api<ConfigMap> = Api::all(client.clone());

    tracing::info!("Starting COSI controllers...");
    tracing::info!("  - BucketClaim controller");
    tracing::info!("  - PluginRegistration controller");

    let claim_controller = Controller::new(claims, WatcherConfig::default())
        .owns(secrets.clone(), WatcherConfig::default())
        .owns(config_maps, WatcherConfig::default())
        .shutdown_on_signal()
        .run(claim::reconcile, claim::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Claim reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Claim reconciliation error");
                }
            }
        });

    let registration_controller = Controller::new(registrations, WatcherConfig::default())
        .owns(secrets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(registration::reconcile, registration::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Registration reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Registration reconciliation error");
                }
            }
        });

    // Run both controllers concurrently
    tokio::select! {
        _ = claim_controller => {
            tracing::info!("Claim controller completed");
        }
        _ = registration_controller => {
            tracing::info!("Registration controller completed");
        }
    }

    tracing::info!("COSI controller shutting down");
    Ok(())
}
