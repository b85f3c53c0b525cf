use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use featmap_api::{
    app::{self, ApiRoutes},
    config::AppConfig,
    database::PgDatastore,
    notify::Mailer,
};

#[derive(Debug, Parser)]
#[command(name = "featmap-api", version, about = "Multi-tenant HTTP API server")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "conf.json")]
    config: PathBuf,

    /// Listen port, overriding the configuration
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so DATABASE_URL, JWT_SECRET etc. are picked up
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let mut config = AppConfig::load(&args.config).context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting featmap API in {:?} mode", config.environment);

    let datastore = PgDatastore::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    let mailer = Mailer::from_config(&config.mail).context("failed to build mail client")?;
    tracing::info!("Mail API endpoint: {}", mailer.endpoint());

    let config = Arc::new(config);
    let app = app::router(Arc::clone(&config), datastore.clone(), mailer, ApiRoutes::standard())
        .context("failed to build request pipelines")?;

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Serving at {}", bind_addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    datastore.close().await;
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
