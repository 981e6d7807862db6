//! Pod Logs Controller
//!
//! Watches pods in one or more namespaces and streams the logs of every
//! newly observed pod to standard output:
//! - Each pod instance gets at most one log stream at a time
//! - Deleted pods have their stream cancelled and their state cleared
//! - A failed stream is retried on the next update of the pod
//!
//! Diagnostics go to standard error so stdout carries only log bytes.

mod backoff;
mod config;
mod controller;
mod dispatcher;
mod error;
mod reconciler;
mod registry;
mod watcher;

#[cfg(test)]
mod reconciler_test;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // kube's rustls client needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("Crypto provider already installed");
    }

    info!("Starting Pod Logs Controller");

    // Load configuration from environment variables
    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Namespaces: {}", config.namespaces.join(", "));
    info!(
        "  Kubeconfig: {}",
        config
            .connection
            .kubeconfig
            .as_ref()
            .map_or_else(|| "inferred".to_string(), |p| p.display().to_string())
    );
    info!("  Context: {}", config.connection.context.as_deref().unwrap_or("current"));
    info!(
        "  Label selector: {}",
        config.connection.label_selector.as_deref().unwrap_or("none")
    );
    info!("  Log options: {:?}", config.log);
    match config.run_for {
        Some(duration) => info!("  Run duration: {:?}", duration),
        None => info!("  Run duration: until Ctrl-C"),
    }

    // Initialize and run controller
    let controller = Controller::new(&config).await?;
    controller.run().await?;

    Ok(())
}
