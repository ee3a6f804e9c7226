use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    api::handlers::AppState,
    config::Config,
    error::AppResult,
    ledger::repository::{AttemptStore, SettlementRepository},
    processor::{ProcessorGateway, StripeGateway},
    settlement::{
        repair::{RepairConfig, RepairWorkflow},
        SettlementConfig, SettlementEngine,
    },
    sources::{
        BalanceTableSource, EarningsTransactionSource, SourceRegistry, WithdrawalRequestSource,
    },
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;

    // Ledger sources, registered in settlement order. When the processor
    // has less available than the books show, records are settled in
    // exactly this order.
    let mut registry = SourceRegistry::new();
    registry.register(Arc::new(BalanceTableSource::new(pool.clone())));
    registry.register(Arc::new(EarningsTransactionSource::new(pool.clone())));
    registry.register(Arc::new(WithdrawalRequestSource::new(pool.clone())));
    let registry = Arc::new(registry);
    info!("✅ {} ledger sources registered", registry.len());

    // Processor gateway
    let gateway: Arc<dyn ProcessorGateway> = Arc::new(StripeGateway::new(
        config.processor_api_url.clone(),
        config.processor_secret_key.clone(),
    ));
    info!(
        "✅ Processor gateway initialized ({})",
        config.processor_api_url
    );

    // Attempt / audit store
    let store: Arc<dyn AttemptStore> = Arc::new(SettlementRepository::new(pool.clone()));

    // Settlement engine
    let settlement_config = SettlementConfig::from_app_config(config);
    let engine = Arc::new(SettlementEngine::new(
        registry.clone(),
        gateway.clone(),
        store.clone(),
        settlement_config.clone(),
    ));
    info!(
        "✅ Settlement engine initialized (minimum transfer {} {})",
        config.minimum_transfer, config.settlement_currency
    );

    // Repair workflow
    let repair = Arc::new(RepairWorkflow::new(
        store.clone(),
        gateway.clone(),
        registry.clone(),
        settlement_config,
        RepairConfig {
            retry_ceiling: config.repair_retry_ceiling,
            min_age_minutes: config.repair_min_age_minutes,
            max_age_hours: config.repair_max_age_hours,
        },
    ));
    info!("✅ Repair workflow initialized");

    Ok(AppState {
        engine,
        repair,
        store,
        gateway,
        currency: config.settlement_currency.clone(),
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
