use std::path::Path;
use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::info;

use kubepg_operator::{run_controller, OperatorConfig};

/// Environment variable pointing at the operator configuration file
const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kubepg_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    info!("Starting kubepg-operator");

    let config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => {
            info!("Loading operator configuration from {}", path);
            OperatorConfig::load(Path::new(&path))?
        }
        Err(_) => {
            info!("{} not set, using built-in defaults", CONFIG_PATH_ENV);
            OperatorConfig::default()
        }
    };
    let config = Arc::new(config);

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Watching PostgresCluster resources (apiVersion: kubepg.io/v1alpha1)");

    tokio::select! {
        _ = run_controller(client, config) => {
            // Controller stream only ends on an unrecoverable watch failure.
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, shutting down");
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
