//! mail-extract-rs: email and attachment extraction over HTTP
//!
//! Accepts an email identifier plus optional attachments, sends their content
//! to a chat-completion model with a structured-extraction prompt, and returns
//! validated JSON with a summary, action items, urgency and calendar-event
//! candidates.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and HTTP serving
//! - [`config`]: Environment-driven configuration, loaded once
//! - [`errors`]: Application error model with HTTP error mapping
//! - [`models`]: Request, intermediate and response types
//! - [`attachment`]: Attachment normalization into text or visual payloads
//! - [`prompt`]: Structured-extraction prompt assembly
//! - [`openai`]: Completion client trait and OpenAI-compatible implementation
//! - [`validate`]: Tolerant parsing of model output into typed records
//! - [`pipeline`]: Per-request orchestration
//! - [`server`]: axum routes and multipart handling
//! - [`util`]: Small string and timing helpers

mod attachment;
mod config;
mod errors;
mod models;
mod openai;
mod pipeline;
mod prompt;
mod server;
#[cfg(test)]
mod testing;
mod util;
mod validate;

use std::net::SocketAddr;
use std::sync::Arc;

use config::ServiceConfig;
use openai::OpenAiClient;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Application entry point
///
/// Loads `.env`, reads configuration, initializes tracing and serves HTTP on
/// `0.0.0.0:$PORT` until Ctrl-C or SIGTERM.
///
/// # Environment Variables
///
/// See [`ServiceConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// OPENAI_API_KEY=sk-... PORT=8080 cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = ServiceConfig::load_from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let client = OpenAiClient::new(&config.model)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        %addr,
        model = %config.model.model,
        debug = config.debug,
        "starting mail extraction service"
    );

    let app = server::router(Arc::new(config), Arc::new(client));
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {e}");
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
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
