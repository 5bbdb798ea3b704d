//! netnav - headless network diagnostics daemon.
//!
//! Runs the collection engine and serves its snapshots as JSON.

use netnav::web::Server;
use netnav::{Diagnostics, DiagnosticsConfig};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("netnav=info".parse()?))
        .init();

    // Load configuration
    let cfg = DiagnosticsConfig::load();
    tracing::info!("Starting netnav on port {}...", cfg.http_port);
    tracing::info!(
        "Collecting every {:?}, geolocation via {}",
        cfg.tick_interval,
        cfg.geo_endpoint
    );

    let port = cfg.http_port;
    let engine = Arc::new(Diagnostics::new(cfg)?);
    engine.start();

    let server = Server::new(port, engine.clone());
    tokio::select! {
        result = server.start() => {
            engine.stop();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            engine.stop();
        }
    }

    Ok(())
}
