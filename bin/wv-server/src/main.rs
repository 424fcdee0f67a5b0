//! Weave Server
//!
//! Builds the coordination services against Redis, the event log REST
//! proxy and the read path, and serves health, readiness and metrics.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `WEAVE_CONFIG` | `weave.toml` | Config file (missing file means defaults) |
//! | `WEAVE_PORT` | `8080` | HTTP port |
//! | `WEAVE_REDIS_URL` | `redis://127.0.0.1:6379` | Lock store and uniqueness registry |
//! | `WEAVE_EVENT_LOG_URL` | `http://localhost:8082` | Event log REST proxy |
//! | `WEAVE_QUERY_URL` | `http://localhost:8123` | Read path |
//! | `WEAVE_QUERY_TOKEN` | - | Read path token |
//! | `WEAVE_EXECUTION_URL` | `http://localhost:4020` | Execution service |
//! | `WEAVE_SERVICE_TOKEN` | - | Bearer token for the execution service |
//! | `WEAVE_HTTP_SINK_ENABLED` | `n` | Event log forwards actions itself |
//! | `WEAVE_LOG_JSON` | `false` | JSON log output |
//! | `RUST_LOG` | `info` | Log level |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wv_config::WeaveConfig;
use wv_coordinator::AppContext;

#[derive(Clone)]
struct ServerState {
    context: Arc<AppContext>,
    metrics: PrometheusHandle,
}

fn init_logging() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let json = std::env::var("WEAVE_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true" | "y"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("Starting Weave server");

    let config = WeaveConfig::load()?;

    let metrics = PrometheusBuilder::new().install_recorder()?;
    wv_coordinator::metrics::register_metrics();

    let context = Arc::new(AppContext::connect(&config).await?);
    info!(
        request_deadline_ms = context.request_deadline().as_millis() as u64,
        "Coordination services ready"
    );

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ServerState { context, metrics });

    let addr: SocketAddr = format!("{}:{}", config.server.bind_addr, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Weave server shutdown complete");
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler(State(state): State<ServerState>) -> impl IntoResponse {
    if state.context.ready().await {
        (StatusCode::OK, Json(json!({ "status": "READY" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "NOT_READY" })))
    }
}

async fn metrics_handler(State(state): State<ServerState>) -> String {
    state.metrics.render()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
