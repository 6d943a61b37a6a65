//! astra-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON or pretty, optional rolling file).
//! 3. Load the model catalog (built-in table or TOML file).
//! 4. Load the reference gallery for the OOD gate.
//! 5. Assemble the registry, gate and orchestrator.
//! 6. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use astra_core::{
    ActivationExplainer, Catalog, ModelLoader, ModelRegistry, OodGate, Orchestrator,
    OrchestratorConfig, ReferenceGallery,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let _log_guard = init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "astra-server starting");

    // ── 3. Model catalog ───────────────────────────────────────────────────────
    let catalog = match &cfg.models_file {
        Some(path) => Catalog::from_file(path, &cfg.model_dir)
            .with_context(|| format!("loading model catalog {}", path.display()))?,
        None => Catalog::builtin(&cfg.model_dir),
    };
    info!(models = catalog.len(), model_dir = %cfg.model_dir.display(), "model catalog ready");
    if catalog.get(&cfg.reference_model).is_none() {
        warn!(
            reference = %cfg.reference_model,
            "reference model is not in the catalog; classifier predictions will fail"
        );
    }

    // ── 4. Reference gallery ───────────────────────────────────────────────────
    let gallery_path = cfg.resolved_gallery_path();
    let gallery = match ReferenceGallery::load(&gallery_path) {
        Ok(gallery) => {
            info!(
                path = %gallery_path.display(),
                rows = gallery.len(),
                dim = gallery.dim(),
                "reference gallery loaded"
            );
            Some(Arc::new(gallery))
        }
        Err(e) => {
            warn!(error = %e, "reference gallery unavailable; classifier predictions will fail");
            None
        }
    };

    // ── 5. Orchestrator ────────────────────────────────────────────────────────
    let registry = Arc::new(ModelRegistry::new(Arc::new(catalog), model_loader()));
    let gate = Arc::new(OodGate::new(gallery, cfg.similarity_threshold));
    let orchestrator = Orchestrator::new(
        registry,
        gate,
        Arc::new(ActivationExplainer),
        OrchestratorConfig {
            reference_model: cfg.reference_model.clone(),
            preview_max_edge: cfg.preview_max_edge,
            ..OrchestratorConfig::default()
        },
    );

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        orchestrator: Arc::new(orchestrator),
    });

    // ── 6. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg
        .bind_address
        .parse()
        .with_context(|| format!("invalid ASTRA_BIND '{}'", cfg.bind_address))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("astra-server stopped");
    Ok(())
}

/// Install the global subscriber.  The returned guard flushes the rolling
/// file writer on drop and must live until the process exits.
fn init_tracing(cfg: &Config) -> Option<WorkerGuard> {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: ASTRA_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                EnvFilter::new("info")
            }
        },
    };

    let stdout = if cfg.log_json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_thread_ids(true).boxed()
    };

    let (file, guard) = match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "astra-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .with(file)
        .init();
    guard
}

#[cfg(feature = "onnx")]
fn model_loader() -> Arc<dyn ModelLoader> {
    Arc::new(astra_core::backend::OnnxLoader)
}

#[cfg(not(feature = "onnx"))]
fn model_loader() -> Arc<dyn ModelLoader> {
    warn!("built without the `onnx` feature; every model load will fail");
    Arc::new(astra_core::backend::NoBackend)
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
