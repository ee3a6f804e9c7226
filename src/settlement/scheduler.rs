// Settlement scheduler - background cadence for the settlement engine.
//
// Daily strategy (recommended):
// - Executes at a configured off-peak UTC hour
// - One consolidated transfer per cycle
// - Lower processor fees, easier reconciliation
//
// Hourly is available for high-volume deployments; weekly for low ones.
// Every scheduled cycle is gated on how long ago the last run happened,
// so restarting the server never causes a surprise extra settlement.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use super::SettlementEngine;
use crate::error::AppError;
use crate::ledger::repository::AttemptStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementFrequency {
    Hourly,
    Daily,
    Weekly,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub frequency: SettlementFrequency,
    /// UTC hour for daily/weekly execution (0-23)
    pub execution_hour: u32,
    pub enabled: bool,
}

pub struct SettlementScheduler {
    config: ScheduleConfig,
    engine: Arc<SettlementEngine>,
    store: Arc<dyn AttemptStore>,
}

impl SettlementScheduler {
    pub fn new(
        config: ScheduleConfig,
        engine: Arc<SettlementEngine>,
        store: Arc<dyn AttemptStore>,
    ) -> Self {
        Self {
            config,
            engine,
            store,
        }
    }

    /// Start the settlement scheduler (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let engine = self.engine.clone();
        let store = self.store.clone();

        tokio::spawn(async move {
            if !config.enabled {
                info!("⏸️ Settlement scheduler disabled by configuration");
                return;
            }

            match config.frequency {
                SettlementFrequency::Hourly => {
                    Self::run_interval_scheduler(&engine, &store, chrono::Duration::minutes(55))
                        .await
                }
                SettlementFrequency::Daily => {
                    Self::run_clock_scheduler(
                        &engine,
                        &store,
                        config.execution_hour,
                        chrono::Duration::hours(20),
                    )
                    .await
                }
                SettlementFrequency::Weekly => {
                    Self::run_clock_scheduler(
                        &engine,
                        &store,
                        config.execution_hour,
                        chrono::Duration::hours(156),
                    )
                    .await
                }
            }
        })
    }

    /// Hourly scheduler - ticks every hour
    async fn run_interval_scheduler(
        engine: &Arc<SettlementEngine>,
        store: &Arc<dyn AttemptStore>,
        min_elapsed: chrono::Duration,
    ) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;
            Self::maybe_run(engine, store, min_elapsed).await;
        }
    }

    /// Daily/weekly scheduler - sleeps until the configured UTC hour
    async fn run_clock_scheduler(
        engine: &Arc<SettlementEngine>,
        store: &Arc<dyn AttemptStore>,
        execution_hour: u32,
        min_elapsed: chrono::Duration,
    ) {
        loop {
            let now = Utc::now();
            let next_execution = Self::calculate_next_execution(now, execution_hour);
            let duration_until_execution = next_execution.signed_duration_since(now);

            if duration_until_execution.num_seconds() > 0 {
                info!(
                    "⏰ Next settlement window: {} UTC",
                    next_execution.format("%Y-%m-%d %H:%M:%S")
                );
                tokio::time::sleep(Duration::from_secs(
                    duration_until_execution.num_seconds() as u64,
                ))
                .await;
            }

            Self::maybe_run(engine, store, min_elapsed).await;

            // Step past the window so the same hour is not hit twice.
            tokio::time::sleep(Duration::from_secs(61)).await;
        }
    }

    /// Run a settlement cycle unless the last run was too recent.
    async fn maybe_run(
        engine: &Arc<SettlementEngine>,
        store: &Arc<dyn AttemptStore>,
        min_elapsed: chrono::Duration,
    ) {
        if let Ok(Some(last)) = store.last_run_at().await {
            let elapsed = Utc::now().signed_duration_since(last);
            if elapsed < min_elapsed {
                info!(
                    "⏭️ Skipping scheduled settlement, last run at {} is too recent",
                    last.format("%Y-%m-%d %H:%M:%S")
                );
                return;
            }
        }

        info!("🔄 Starting scheduled settlement cycle");
        match engine.run_settlement(false).await {
            Ok(report) => info!(
                "✓ Scheduled settlement finished: {} ({} transferred)",
                report.status, report.total_transferred
            ),
            Err(AppError::RunInProgress) => {
                info!("⏭️ Another settlement run is already in progress")
            }
            Err(e) => error!("❌ Scheduled settlement failed: {:?}", e),
        }
    }

    /// Calculate the next execution time at the given UTC hour
    fn calculate_next_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let today = now.date_naive().and_hms_opt(execution_hour, 0, 0);
        let next_dt = match today {
            Some(naive) => Utc.from_utc_datetime(&naive),
            None => return now,
        };

        // If the execution time has passed today, schedule for tomorrow
        if next_dt <= now {
            match (now.date_naive() + chrono::Duration::days(1)).and_hms_opt(execution_hour, 0, 0)
            {
                Some(naive) => Utc.from_utc_datetime(&naive),
                None => now,
            }
        } else {
            next_dt
        }
    }
}
