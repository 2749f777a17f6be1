//! HTTP service binary for sheet2pdf.
//!
//! Serves `POST /files/upload` behind HTTP Basic auth. Credentials come from
//! `SHEET2PDF_ADMIN_USER` and `SHEET2PDF_ADMIN_PASSWORD_SHA256`.

use anyhow::{Context, Result};
use clap::Parser;
use sheet2pdf::server::{router, AppState};
use sheet2pdf::{ChromeEngine, PipelineConfig, StaticAuthenticator};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Spreadsheet-to-receipt-PDF HTTP service.
#[derive(Parser, Debug)]
#[command(name = "sheet2pdf-server", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "SHEET2PDF_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Directory for uploads and artifacts (default: system temp dir).
    #[arg(long, env = "SHEET2PDF_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Rows per rendered chunk.
    #[arg(long, env = "SHEET2PDF_CHUNK_SIZE", default_value_t = 400)]
    chunk_size: usize,

    /// Per-chunk render timeout in seconds.
    #[arg(long, env = "SHEET2PDF_RENDER_TIMEOUT", default_value_t = 120)]
    render_timeout: u64,

    /// Whole-request timeout in seconds.
    #[arg(long, env = "SHEET2PDF_REQUEST_TIMEOUT", default_value_t = 600)]
    request_timeout: u64,

    /// Seconds a delivered artifact is kept before deletion.
    #[arg(long, env = "SHEET2PDF_GRACE_PERIOD", default_value_t = 30)]
    grace_period: u64,

    /// Handlebars receipt template (default: built-in).
    #[arg(long, env = "SHEET2PDF_TEMPLATE")]
    template: Option<PathBuf>,

    /// Chrome/Chromium executable (default: auto-detect).
    #[arg(long, env = "SHEET2PDF_CHROME")]
    chrome: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,chromiumoxide=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let mut builder = PipelineConfig::builder()
        .chunk_size(args.chunk_size)
        .render_timeout_secs(args.render_timeout)
        .request_timeout_secs(args.request_timeout)
        .grace_period_secs(args.grace_period);
    if let Some(ref dir) = args.work_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        builder = builder.work_dir(dir);
    }
    if let Some(ref template) = args.template {
        builder = builder.template_path(template);
    }
    let config = builder.build().context("Invalid configuration")?;

    let mut engine = ChromeEngine::new();
    if let Some(ref chrome) = args.chrome {
        engine = engine.executable(chrome);
    }

    let auth = StaticAuthenticator::from_env();

    let state = AppState {
        config: Arc::new(config),
        engine: Arc::new(engine),
        auth: Arc::new(auth),
    };

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!("Listening on http://{}", args.bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
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
}
