//! Berqenas HTTP/JSON Gateway binary.

use berqenas_core::MigrationEngine;
use berqenas_gateway::{create_router, AppState, Args, GatewayConfig};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("berqenas_gateway=info,berqenas_core=info")),
        )
        .init();

    // Parse command line args
    let args = Args::parse();
    let config = GatewayConfig::from(&args);

    info!(
        listen = %config.listen_addr,
        data_path = %config.data_path.display(),
        dry_run = config.dry_run,
        "Starting Berqenas Gateway"
    );
    if config.exec_command.is_none() && !args.dry_run {
        warn!("no --exec-command given; migrations will be recorded without executing");
    }

    let engine = MigrationEngine::open(config.engine_config(), config.executor())?;

    // Close attempts left open by a previous process.
    let recovered = engine.recover_all()?;
    for migration in &recovered {
        warn!(
            migration_id = %migration.migration_id,
            from = %migration.from,
            to = %migration.to,
            "recovered interrupted migration"
        );
    }
    info!(recovered = recovered.len(), "Migration store ready");

    // Create application state
    let state = AppState::new(engine, config.clone());

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Gateway listening on {}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
