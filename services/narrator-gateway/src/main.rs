//! Narrator Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads provider credentials and optional egress proxies
//! 2. Turns uploaded videos into timestamped scripts (Gemini)
//! 3. Narrates scripts line by line (ElevenLabs)
//! 4. Rotates credentials and proxies on quota, auth and egress failures

mod config;
mod error;
mod metrics;
mod routes;
mod service;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use key_rotation::{
    CredentialPool, ELEVENLABS_SIGNALS, EgressPool, GEMINI_SIGNALS, Invoker, TaskRegistry,
};
use media_api::{ScriptClient, SpeechClient, VoiceCatalog};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{HttpTransport, Transport};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::service::{DRAIN_TIMEOUT, ServiceMetrics};

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    scripts: Arc<ScriptClient>,
    speech: Arc<SpeechClient>,
    voices: Arc<VoiceCatalog>,
    tasks: Arc<TaskRegistry<String>>,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Wire pools, invokers and provider clients from the loaded configuration.
async fn build_state(
    config: &Config,
    transport: Arc<dyn Transport>,
    prometheus: PrometheusHandle,
) -> Result<AppState> {
    let policy = config.invoker.retry_policy();
    let timeout = config.invoker.request_timeout();

    let gemini_keys = config
        .gemini
        .api_keys
        .as_ref()
        .context("gemini credentials not loaded")?;
    let gemini_pool = CredentialPool::from_csv("gemini credentials", gemini_keys.expose())?;
    info!(credentials = gemini_pool.len(), "gemini credential pool ready");
    let gemini = Invoker::new(&GEMINI_SIGNALS, Arc::new(gemini_pool), transport.clone())
        .with_policy(policy);

    let speech_keys = config
        .elevenlabs
        .api_keys
        .as_ref()
        .context("elevenlabs credentials not loaded")?;
    let speech_pool = CredentialPool::from_csv("elevenlabs credentials", speech_keys.expose())?;
    info!(credentials = speech_pool.len(), "elevenlabs credential pool ready");
    let mut elevenlabs =
        Invoker::new(&ELEVENLABS_SIGNALS, Arc::new(speech_pool), transport).with_policy(policy);

    if config.elevenlabs.proxies.is_empty() {
        info!("elevenlabs egress: direct");
    } else {
        let egress = EgressPool::from_urls("elevenlabs egress", &config.elevenlabs.proxies)?;
        info!(routes = egress.len(), "elevenlabs egress pool ready");
        elevenlabs = elevenlabs.with_egress(Arc::new(egress));
    }

    let scripts = ScriptClient::new(Arc::new(gemini))
        .with_base_url(&config.gemini.base_url)
        .with_model(&config.gemini.model)
        .with_timeout(timeout);
    let speech = SpeechClient::new(Arc::new(elevenlabs))
        .with_base_url(&config.elevenlabs.base_url)
        .with_model_id(&config.elevenlabs.model_id)
        .with_timeout(timeout);

    let voices = VoiceCatalog::load(&config.elevenlabs.voices_file)
        .await
        .context("failed to load voice catalog")?;
    if voices.is_empty() {
        warn!(path = %config.elevenlabs.voices_file.display(), "voice catalog is empty");
    }

    Ok(AppState {
        scripts: Arc::new(scripts),
        speech: Arc::new(speech),
        voices: Arc::new(voices),
        tasks: Arc::new(TaskRegistry::new()),
        metrics: ServiceMetrics::new(),
        prometheus,
    })
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit comes from `max_connections`; the body limit lets
/// video uploads past axum's 2 MB default.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/voices", get(routes::voices_handler))
        .route("/v1/owners/{owner}/script", post(routes::script_handler))
        .route("/v1/owners/{owner}/revision", post(routes::revision_handler))
        .route("/v1/owners/{owner}/speech", post(routes::speech_handler))
        .route("/v1/owners/{owner}/narration", post(routes::narration_handler))
        .route("/v1/owners/{owner}/task", delete(routes::cancel_handler))
        .layer(DefaultBodyLimit::max(routes::MAX_UPLOAD_BYTES))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting narrator-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        gemini_model = %config.gemini.model,
        elevenlabs_model = %config.elevenlabs.model_id,
        proxies = config.elevenlabs.proxies.len(),
        "configuration loaded"
    );

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(reqwest::Client::new()));
    let app_state = build_state(&config, transport, prometheus_handle).await?;

    // Kept for shutdown: cancel running tasks and report stragglers
    let tasks = app_state.tasks.clone();
    let in_flight = app_state.metrics.in_flight.clone();

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. running tasks are cancelled so long narrations answer promptly
    // 3. axum stops accepting new connections and drains in-flight requests
    // 4. DRAIN_TIMEOUT, counted from the signal, bounds the drain
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    tasks.cancel_all();
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn pool_status(invoker: &Invoker) -> serde_json::Value {
    serde_json::json!({
        "credentials": invoker.credentials().status(),
        "egress": invoker.egress().map(|pool| pool.status()),
    })
}

/// Health endpoint: pool positions per provider, uptime and request counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = state.metrics.snapshot();
    body["status"] = "healthy".into();
    body["active_tasks"] = state.tasks.active().into();
    body["voices"] = state.voices.len().into();
    body["providers"] = serde_json::json!({
        "gemini": pool_status(state.scripts.invoker()),
        "elevenlabs": pool_status(state.speech.invoker()),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
