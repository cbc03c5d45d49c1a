//! Blue-green deployment operator for Kubernetes

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bluegreen::controller::{error_policy, reconcile, Context};
use bluegreen::crd::BlueGreenDeployment;
use bluegreen::FIELD_MANAGER;

/// Blue-green deployment controller
///
/// Watches BlueGreenDeployment resources and converges each one onto a pair
/// of color-named ReplicaSets behind a single traffic Service, switching or
/// replacing the idle color whenever the desired pod spec changes.
#[derive(Parser, Debug)]
#[command(name = "bluegreen", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&BlueGreenDeployment::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_controller().await
}

/// Ensure the BlueGreenDeployment CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply, so
/// the CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing BlueGreenDeployment CRD...");
    crds.patch(
        "bluegreendeployments.bluegreen.dev",
        &params,
        &Patch::Apply(&BlueGreenDeployment::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install BlueGreenDeployment CRD: {}", e))?;

    Ok(())
}

/// Run the controller until shutdown
///
/// Owning the ReplicaSets and the Service means external edits to either
/// (a manual scale, a selector change) trigger a reconciliation instead of
/// waiting for the next periodic requeue.
async fn run_controller() -> anyhow::Result<()> {
    tracing::info!("Blue-green controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let deployments: Api<BlueGreenDeployment> = Api::all(client.clone());
    let replica_sets: Api<ReplicaSet> = Api::all(client.clone());
    let services: Api<Service> = Api::all(client.clone());

    let ctx = Arc::new(Context::builder(client).build());

    Controller::new(deployments, WatcherConfig::default())
        .owns(replica_sets, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Blue-green controller shutting down");
    Ok(())
}
