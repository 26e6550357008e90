//! fakesqs - a single in-memory SQS queue for local development and tests
//!
//! Speaks the SQS query protocol over HTTP. Messages live in memory only.

mod config;
mod router;

use clap::Parser;
use fakesqs_queue::{QueueSettings, SqsState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fakesqs")]
#[command(about = "In-memory SQS queue for local testing", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "FAKESQS_PORT")]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "FAKESQS_HOST")]
    host: Option<String>,

    /// Queue name used in the advertised queue URL
    #[arg(long, env = "FAKESQS_QUEUE_NAME")]
    queue_name: Option<String>,

    /// Default visibility timeout in seconds (fractions allowed)
    #[arg(long, env = "FAKESQS_VISIBILITY_TIMEOUT")]
    visibility_timeout: Option<f64>,

    /// Configuration file (TOML)
    #[arg(long, env = "FAKESQS_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FAKESQS_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("fakesqs={},tower_http=debug", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(name) = args.queue_name {
        config.queue.name = name;
    }
    if let Some(secs) = args.visibility_timeout {
        config.queue.visibility_timeout_secs = secs;
    }

    let settings = QueueSettings {
        queue_url: config.queue_url(),
        visibility_timeout: config.visibility_timeout()?,
    };
    info!(
        queue_url = %settings.queue_url,
        visibility_timeout = ?settings.visibility_timeout,
        "Starting fakesqs..."
    );

    let state = Arc::new(SqsState::new(settings));
    let app = router::create_router(state.clone());

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        pending = state.queue.len(),
        sent = state.queue.sent_count(),
        deleted = state.queue.deleted_count(),
        "fakesqs stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c, shutting down");
    }
    info!("Received shutdown signal");
}
