//! FedReconcile relay server
//!
//! This server provides:
//! - `POST /api/auth` login issuing signed bearer credentials
//! - `POST /gtas-validator/api` relaying a GTAS/ERP upload pair to the validation service
//! - `GET /gtas-validator/download/{lease}/{filename}` for the returned artifacts
//! - Health, readiness and Prometheus metrics endpoints
//!
//! Usage:
//! ```bash
//! # With config file
//! fedreconcile-server --config config.yaml
//!
//! # Or with environment variables
//! FEDRECONCILE_VALIDATOR_URL=http://localhost:8081 FEDRECONCILE_IDENTITY_MODE=none fedreconcile-server
//!
//! # Hash a password for the auth.users section
//! fedreconcile-server hash-password 's3cret'
//! ```
//!
//! Test with:
//! ```bash
//! curl http://localhost:3000/api/auth \
//!   -H "Content-Type: application/json" \
//!   -d '{"username": "admin", "password": "password123"}'
//!
//! curl http://localhost:3000/gtas-validator/api \
//!   -H "Authorization: Bearer $TOKEN" \
//!   -F gtas=@gtas.csv -F erp=@erp.csv
//! ```

mod bootstrap;
mod config;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use config::ServerConfig;
use fedreconcile_observability::health_router;
use fedreconcile_storage::spawn_sweeper;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// FedReconcile Server - authenticated relay to the GTAS validation service
#[derive(Parser)]
#[command(name = "fedreconcile-server")]
#[command(about = "FedReconcile relay server for GTAS/ERP validation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "FEDRECONCILE_CONFIG",
        global = true
    )]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and environment)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server (default if no command specified)
    Serve,
    /// Print the Argon2 hash of a password for use in auth.users
    HashPassword {
        /// Password to hash
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::HashPassword { password }) = &cli.command {
        let hash = fedreconcile_core::identity::hash_password(password)?;
        println!("{}", hash);
        return Ok(());
    }

    // Load configuration
    let config_source = cli.config.as_ref().map(|path| path.display().to_string());
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .map_err(|e| anyhow!("Failed to load {}: {}", path.display(), e))?,
        None => ServerConfig::default(),
    };

    // Merge environment variables (they override config file)
    config.merge_env();

    // Apply CLI overrides (highest precedence)
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.log_json {
        config.logging.json = true;
    }

    init_tracing(&config)?;

    match config_source {
        Some(path) => info!("📁 Loaded configuration from: {}", path),
        None => info!("📁 Using default configuration"),
    }
    info!("🚀 Initializing FedReconcile relay");

    let services = bootstrap::build_services(&config)?;
    let sweeper = spawn_sweeper(
        services.leases.clone(),
        Duration::from_secs(config.scratch.sweep_interval_secs),
    );

    let app = fedreconcile_ingress::router(services.state).merge(health_router(services.health));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("");
    info!("✅ FedReconcile relay listening on http://{}", addr);
    info!("   API endpoints:");
    info!("   - Login:    http://{}{}", addr, fedreconcile_ingress::LOGIN_PATH);
    info!("   - Validate: http://{}{}", addr, fedreconcile_ingress::RELAY_PATH);
    info!("   - Download: http://{}{}/{{lease}}/{{filename}}", addr, fedreconcile_ingress::DOWNLOAD_PREFIX);
    info!("   Observability:");
    info!("   - Health check:       http://{}/healthz", addr);
    info!("   - Readiness check:    http://{}/readyz", addr);
    info!("   - Prometheus metrics: http://{}/metrics", addr);
    info!("");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.shutdown().await;
    info!("Server stopped");

    Ok(())
}

/// Install the global subscriber; `RUST_LOG` wins over the configured level
fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
