mod api;
mod bootstrap;
mod config;
mod error;
mod ledger;
mod processor;
mod retry;
mod server;
mod settlement;
mod sources;
#[cfg(test)]
mod testutil;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::settlement::scheduler::{ScheduleConfig, SettlementScheduler};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,settlement_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("🚀 Starting Revenue Settlement Backend");

    // Load configuration. Missing processor credentials or destination are
    // fatal here, before anything is wired up.
    dotenv::dotenv().ok();
    let config = config::Config::from_env()
        .map_err(|e| anyhow::anyhow!("configuration error: {}", e))?;

    let state = bootstrap::initialize_app_state(&config).await?;

    // Background settlement cadence
    let scheduler = SettlementScheduler::new(
        ScheduleConfig {
            frequency: config.schedule_frequency,
            execution_hour: config.schedule_execution_hour,
            enabled: config.schedule_enabled,
        },
        state.engine.clone(),
        state.store.clone(),
    );
    scheduler.start();
    info!("✅ Settlement scheduler started");

    // Create and run the HTTP server
    let app = server::create_app(state).await;
    server::run_server(app, &config.bind_address)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))?;

    Ok(())
}
