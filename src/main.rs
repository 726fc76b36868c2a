//! Course Architect server entrypoint.

use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use course_architect::config::AppConfig;
use course_architect::error::CoreError;
use course_architect::server::{build_router, AppState};
use course_architect::Result;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(&args.log_level, args.log_json);

    info!("Starting Course Architect v{}", env!("CARGO_PKG_VERSION"));

    info!("Loading configuration from environment");
    let config = AppConfig::from_env()?;

    let addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port)
        .parse()
        .map_err(|e| CoreError::InvalidRequest(format!("invalid bind address: {e}")))?;

    info!(host = %config.http_host, port = config.http_port, environment = ?config.environment, "configuration loaded");

    let state = AppState::bootstrap(config).await?;
    let app = build_router(state).await;

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoreError::Internal(format!("failed to bind to {addr}: {e}")))?;

    info!("Course Architect is running on http://{}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| CoreError::Internal(format!("server error: {e}")))?;

    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
