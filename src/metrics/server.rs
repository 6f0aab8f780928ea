//! HTTP exporter for booth metrics and health.

use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tower_http::cors::CorsLayer;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Errors raised while serving metrics.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind metrics listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error("metrics server stopped: {0}")]
    Server(String),
}

/// Listener settings for the exporter.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_port(9090)
    }
}

impl MetricsServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

/// Registry plus the last booth snapshot pushed by the kiosk loop.
pub struct MetricsState {
    registry: MetricsRegistry,
    last: Option<MetricsSnapshot>,
}

impl MetricsState {
    /// Publishes a snapshot to `/metrics` and `/health`.
    pub fn update(&mut self, snapshot: &MetricsSnapshot) {
        self.registry.update(snapshot);
        self.last = Some(snapshot.clone());
    }

    /// Health body; `None` until the booth has reported once.
    fn health(&self) -> Option<String> {
        self.last.as_ref().map(health_report)
    }
}

/// One `key value` line per booth fact, for kiosk supervisors.
fn health_report(snapshot: &MetricsSnapshot) -> String {
    format!(
        "status ok\n\
         session_state {}\n\
         stored_photos {}\n\
         unsynced_photos {}\n\
         print_jobs_failed {}\n",
        snapshot.session_state,
        snapshot.stored_photos,
        snapshot.unsynced_photos,
        snapshot.print_jobs_failed,
    )
}

/// Serves `/metrics` (Prometheus text) and `/health` (booth status).
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: Arc<RwLock<MetricsState>>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(MetricsState {
                registry,
                last: None,
            })),
        }
    }

    /// Handle the kiosk loop pushes snapshots into.
    pub fn state(&self) -> Arc<RwLock<MetricsState>> {
        Arc::clone(&self.state)
    }

    /// Serves until `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Booth metrics exporter listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| ServerError::Server(e.to_string()))
    }
}

async fn metrics_handler(State(state): State<Arc<RwLock<MetricsState>>>) -> impl IntoResponse {
    match state.read().await.registry.encode() {
        Ok(body) => (StatusCode::OK, [("content-type", PROMETHEUS_TEXT)], body),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode booth metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", TEXT_PLAIN)],
                format!("failed to encode metrics: {e}"),
            )
        }
    }
}

async fn health_handler(State(state): State<Arc<RwLock<MetricsState>>>) -> impl IntoResponse {
    match state.read().await.health() {
        Some(body) => (StatusCode::OK, [("content-type", TEXT_PLAIN)], body),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", TEXT_PLAIN)],
            "status starting\n".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[test]
    fn test_config_ports() {
        assert_eq!(MetricsServerConfig::default().bind_addr.port(), 9090);
        assert_eq!(MetricsServerConfig::with_port(8080).bind_addr.port(), 8080);
    }

    #[test]
    fn test_health_reports_booth_state_after_first_update() {
        let server = MetricsServer::new(
            MetricsServerConfig::default(),
            MetricsRegistry::new().unwrap(),
        );
        let state = server.state();
        assert!(state.try_read().unwrap().health().is_none());

        state.try_write().unwrap().update(&MetricsSnapshot {
            session_state: SessionState::Review,
            stored_photos: 7,
            unsynced_photos: 2,
            ..MetricsSnapshot::default()
        });

        let body = state.try_read().unwrap().health().unwrap();
        assert!(body.starts_with("status ok\n"));
        assert!(body.contains("session_state review\n"));
        assert!(body.contains("stored_photos 7\n"));
        assert!(body.contains("unsynced_photos 2\n"));
    }
}
