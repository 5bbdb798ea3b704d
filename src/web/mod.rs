//! JSON API over the diagnostics engine.

mod handlers;

pub use handlers::*;

use crate::engine::Diagnostics;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Diagnostics>,
}

/// HTTP server exposing snapshots and probe requests.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, engine: Arc<Diagnostics>) -> Self {
        Self {
            port,
            state: AppState { engine },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/interfaces", get(handlers::handle_get_interfaces))
            .route("/api/connections", get(handlers::handle_get_connections))
            .route("/api/snapshot", get(handlers::handle_get_snapshot))
            .route(
                "/api/probes/{kind}",
                get(handlers::handle_get_probe).post(handlers::handle_run_probe),
            )
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
