//! REST API server for meetbridge.
//!
//! Provides HTTP endpoints for:
//! - Meeting ingress (webhook and manual trigger)
//! - Approval session inspection
//! - On-demand approval polling

pub mod error;
pub mod routes;

use crate::config::ServerConfig;
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::future::Future;
use tower::ServiceBuilder;
use tracing::info;

pub use routes::AppState;

pub struct ApiServer {
    host: String,
    port: u16,
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState, config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            state,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(status))
            .route("/version", get(version))
            .merge(routes::webhook::router(self.state.clone()))
            .merge(routes::sessions::router(self.state.clone()))
            .layer(ServiceBuilder::new())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let app = self.router();
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("API server listening on http://{}", addr);
        info!("Endpoints:");
        info!("  GET  /                       - Service info");
        info!("  GET  /version                - Get version info");
        info!("  POST /webhook/meeting        - Transcript-ready notification");
        info!("  POST /meetings/:id/process   - Process a meeting now");
        info!("  GET  /sessions               - List approval sessions");
        info!("  GET  /sessions/latest        - Most recent session");
        info!("  GET  /sessions/:id           - Get a single session");
        info!("  POST /sessions/:id/poll      - Resolve and commit one session");
        info!("  POST /poll                   - Resolve and commit all open sessions");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "meetbridge",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "meetbridge"
    }))
}
