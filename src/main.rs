//! Conductor operator - declarative platform management for Kubernetes

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use conductor::controller::{error_policy, reconcile, Context};
use conductor::crd::{Engine, Platform};

/// Conductor - keeps platform operands converged with one declarative resource
#[derive(Parser, Debug)]
#[command(name = "conductor", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    ///
    /// Watches Platform resources and converges their operands: the Engine
    /// custom resource, the engine config map and the workload priority
    /// class.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let platform = serde_yaml::to_string(&Platform::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize Platform CRD: {e}"))?;
        let engine = serde_yaml::to_string(&Engine::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize Engine CRD: {e}"))?;
        println!("{platform}---\n{engine}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller().await,
    }
}

/// Run the Platform controller until shutdown
async fn run_controller() -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let platforms: Api<Platform> = Api::all(client.clone());
    let engines: Api<Engine> = Api::all(client.clone());

    let ctx = Arc::new(Context::builder(client).build());

    info!(version = conductor::OPERATOR_VERSION, "starting platform controller");

    Controller::new(platforms, WatcherConfig::default())
        .owns(engines, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => info!(platform = %object.name, "reconciled"),
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
        })
        .await;

    info!("controller shut down");
    Ok(())
}
