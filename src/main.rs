//! Security inspection server for the productos dashboard
//!
//! Mounts the inspection pipeline as HTTP middleware in front of the
//! application routes.

use anyhow::Result;
use axum::{middleware, routing::get, Router};
use clap::Parser;
use productos_security::rate_limit::FixedWindowLimiter;
use productos_security::{
    AiEndpointLimiter, SecurityConfig, SecurityEventLogger, SecurityInspector, SecurityLogStore,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "productos-security")]
#[command(author, version, about = "Security inspection middleware for the productos dashboard")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Path to configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log store data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(json: bool, level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, &args.log_level);

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        let content = std::fs::read_to_string(config_path)?;
        if config_path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        }
    } else {
        SecurityConfig::default()
    };
    if let Some(data_dir) = args.data_dir {
        config.store.data_dir = data_dir;
    }

    // Open the shared engine: log store and AI rate counters live in
    // separate trees of one database.
    let db = sled::open(&config.store.data_dir)?;
    let ai_limiter = AiEndpointLimiter::open(&db, config.ai_limits.clone())?;

    let logger = if config.logging.persist_events {
        let store = Arc::new(SecurityLogStore::open(&db, config.logging.retention_days)?);
        let (logger, _writer) = SecurityEventLogger::with_store(store, config.logging.queue_capacity);
        info!(
            data_dir = %config.store.data_dir.display(),
            retention_days = config.logging.retention_days,
            "event persistence enabled"
        );
        logger
    } else {
        info!("event persistence disabled, logging to console only");
        SecurityEventLogger::console_only()
    };

    let limiter = Arc::new(FixedWindowLimiter::with_idle_eviction(Duration::from_secs(
        config.rate_limit.idle_eviction_seconds,
    )));
    let _sweeper = FixedWindowLimiter::spawn_sweeper(
        Arc::clone(&limiter),
        Duration::from_secs(config.rate_limit.sweep_interval_seconds),
    );

    let inspector = Arc::new(SecurityInspector::new(
        &config,
        logger,
        limiter,
        Some(ai_limiter),
    ));

    let app = Router::new()
        .route("/", get(placeholder))
        .fallback(placeholder)
        .layer(
            ServiceBuilder::new().layer(middleware::from_fn_with_state(
                Arc::clone(&inspector),
                productos_security::middleware::inspect_request,
            )),
        );

    info!(bind = %args.bind, "starting security inspection server");
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Stand-in for the dashboard application the middleware fronts.
async fn placeholder() -> &'static str {
    "OK"
}
