// Settlement engine - aggregates every registered ledger source, executes
// one bounded external transfer, and reconciles the books.

pub mod aggregator;
pub mod reconciler;
pub mod repair;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{Config, PayoutRail};
use crate::error::{AppError, AppResult, ProcessorError};
use crate::ledger::models::{AttemptMetadata, AttemptStatus, NewAuditEntry};
use crate::ledger::repository::AttemptStore;
use crate::processor::{
    to_minor_units, PayoutHandle, PayoutRequest, ProcessorGateway, TransferHandle, TransferRequest,
};
use crate::retry::{run_retrying, RetryPolicy};
use crate::sources::SourceRegistry;

use aggregator::{aggregate, select_settleable, AggregationResult};
use reconciler::Reconciler;

/// Engine-facing settlement settings, derived from the app config.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub currency: String,
    pub minimum_transfer: Decimal,
    pub destination_account: String,
    pub rail: PayoutRail,
    pub retry: RetryPolicy,
}

impl SettlementConfig {
    pub fn from_app_config(config: &Config) -> Self {
        Self {
            currency: config.settlement_currency.clone(),
            minimum_transfer: config.minimum_transfer,
            destination_account: config.processor_destination.clone(),
            rail: config.payout_rail,
            retry: RetryPolicy::default(),
        }
    }
}

/// Response contract for one settlement run, in every outcome: completed,
/// skipped below threshold, failed at the processor, or dry run.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
    pub success: bool,
    pub status: String,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    pub total_aggregated: Decimal,
    pub total_transferred: Decimal,
    pub breakdown: HashMap<String, Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_transfer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct SettlementEngine {
    registry: Arc<SourceRegistry>,
    gateway: Arc<dyn ProcessorGateway>,
    store: Arc<dyn AttemptStore>,
    reconciler: Reconciler,
    config: SettlementConfig,
    // Advisory single-run lock: overlapping triggers (manual, scheduler,
    // repair) get a clean rejection instead of racing over the same funds.
    run_lock: Mutex<()>,
}

impl SettlementEngine {
    pub fn new(
        registry: Arc<SourceRegistry>,
        gateway: Arc<dyn ProcessorGateway>,
        store: Arc<dyn AttemptStore>,
        config: SettlementConfig,
    ) -> Self {
        let reconciler = Reconciler::new(registry.clone());
        Self {
            registry,
            gateway,
            store,
            reconciler,
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// One settlement run: aggregate, bound by processor funds, transfer,
    /// reconcile, audit. With `dry_run` nothing is persisted and no funds
    /// move; the report shows what a live run would have done.
    pub async fn run_settlement(&self, dry_run: bool) -> AppResult<SettlementReport> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| AppError::RunInProgress)?;

        info!("🔄 Starting settlement run (dry_run: {})", dry_run);

        let aggregation = aggregate(&self.registry, &self.config.currency).await;
        info!(
            "📊 Aggregated {} {} across {} sources",
            aggregation.total,
            self.config.currency,
            aggregation.contributions.len()
        );

        // Live balance check bounds the transfer: a concurrent run cannot
        // move funds the processor no longer has.
        let available = self
            .gateway
            .available_balance(&self.config.currency)
            .await?;

        let cap = aggregation.total.min(available);
        let (selection, executable) = select_settleable(&aggregation.contributions, cap);
        if executable < aggregation.total {
            info!(
                "⚖️ Processor has {} available, settling {} of {} aggregated",
                available, executable, aggregation.total
            );
        }

        if dry_run {
            let metadata = AttemptMetadata {
                contributions: selection,
                failed_sources: aggregation.failed_sources.clone(),
                reason: None,
            };
            return Ok(SettlementReport {
                success: true,
                status: "dry_run".to_string(),
                dry_run: true,
                execution_id: None,
                total_aggregated: aggregation.total,
                total_transferred: executable,
                breakdown: metadata.breakdown(),
                processor_transfer_id: None,
                message: Some(format!(
                    "dry run: {} {} would be transferred ({} available at processor)",
                    executable, self.config.currency, available
                )),
                error: None,
                timestamp: Utc::now(),
            });
        }

        if executable < self.config.minimum_transfer {
            return self.record_skip(&aggregation, executable).await;
        }

        // Everything up to the gateway call is local and not retried: a
        // database failure here is fatal to the run, no funds have moved.
        let execution_id = Uuid::new_v4();
        let metadata = AttemptMetadata {
            contributions: selection.clone(),
            failed_sources: aggregation.failed_sources.clone(),
            reason: None,
        };
        self.store
            .create_attempt(
                execution_id,
                executable,
                &self.config.currency,
                AttemptStatus::Pending,
                serde_json::to_value(&metadata)?,
            )
            .await?;

        info!(
            "💸 Executing transfer of {} {} (execution {})",
            executable, self.config.currency, execution_id
        );

        match self.invoke_gateway(execution_id, executable).await {
            Ok((transfer_id, retries)) => {
                self.store
                    .mark_completed(execution_id, &transfer_id, executable, retries as i32)
                    .await?;

                let summary = self.reconciler.reconcile(&selection).await;
                let anomaly = !summary.is_clean(executable);
                if anomaly {
                    error!(
                        "⚠️ Reconciliation drift on {}: transferred {} but settled {}",
                        execution_id, executable, summary.reconciled
                    );
                }

                let message = if summary.failures.is_empty() {
                    None
                } else {
                    Some(
                        summary
                            .failures
                            .iter()
                            .map(|f| format!("{}: {}", f.source, f.error))
                            .collect::<Vec<_>>()
                            .join("; "),
                    )
                };

                self.store
                    .record_audit(NewAuditEntry {
                        attempt_id: execution_id,
                        outcome: AttemptStatus::Completed,
                        total_aggregated: aggregation.total,
                        total_transferred: executable,
                        total_reconciled: summary.reconciled,
                        breakdown: serde_json::to_value(metadata.breakdown())?,
                        anomaly,
                        message,
                    })
                    .await?;

                info!(
                    "✅ Settlement {} completed: {} {} transferred (transfer {})",
                    execution_id, executable, self.config.currency, transfer_id
                );

                Ok(SettlementReport {
                    success: true,
                    status: "completed".to_string(),
                    dry_run: false,
                    execution_id: Some(execution_id),
                    total_aggregated: aggregation.total,
                    total_transferred: executable,
                    breakdown: metadata.breakdown(),
                    processor_transfer_id: Some(transfer_id),
                    message: None,
                    error: None,
                    timestamp: Utc::now(),
                })
            }
            Err((e, retries)) => {
                error!(
                    "❌ Settlement {} failed after {} retries: {}",
                    execution_id, retries, e
                );

                // Failure atomicity: no ledger source is touched; the
                // failed attempt stays queryable for the repair workflow.
                self.store
                    .mark_failed(execution_id, e.code(), &e.to_string(), retries as i32)
                    .await?;
                self.store
                    .record_audit(NewAuditEntry {
                        attempt_id: execution_id,
                        outcome: AttemptStatus::Failed,
                        total_aggregated: aggregation.total,
                        total_transferred: Decimal::ZERO,
                        total_reconciled: Decimal::ZERO,
                        breakdown: serde_json::to_value(metadata.breakdown())?,
                        anomaly: false,
                        message: Some(e.to_string()),
                    })
                    .await?;

                Ok(SettlementReport {
                    success: false,
                    status: "failed".to_string(),
                    dry_run: false,
                    execution_id: Some(execution_id),
                    total_aggregated: aggregation.total,
                    total_transferred: Decimal::ZERO,
                    breakdown: metadata.breakdown(),
                    processor_transfer_id: None,
                    message: None,
                    error: Some(format!(
                        "transfer of {} {} failed: {}",
                        executable, self.config.currency, e
                    )),
                    timestamp: Utc::now(),
                })
            }
        }
    }

    async fn record_skip(
        &self,
        aggregation: &AggregationResult,
        executable: Decimal,
    ) -> AppResult<SettlementReport> {
        let execution_id = Uuid::new_v4();
        let reason = format!(
            "executable amount {} {} below minimum transfer {}",
            executable, self.config.currency, self.config.minimum_transfer
        );
        info!("⏭️ Skipping settlement: {}", reason);

        let metadata = AttemptMetadata {
            contributions: aggregation.contributions.clone(),
            failed_sources: aggregation.failed_sources.clone(),
            reason: Some(reason.clone()),
        };
        self.store
            .create_attempt(
                execution_id,
                executable,
                &self.config.currency,
                AttemptStatus::Skipped,
                serde_json::to_value(&metadata)?,
            )
            .await?;
        self.store
            .record_audit(NewAuditEntry {
                attempt_id: execution_id,
                outcome: AttemptStatus::Skipped,
                total_aggregated: aggregation.total,
                total_transferred: Decimal::ZERO,
                total_reconciled: Decimal::ZERO,
                breakdown: serde_json::to_value(aggregation.breakdown())?,
                anomaly: false,
                message: Some(reason.clone()),
            })
            .await?;

        Ok(SettlementReport {
            success: false,
            status: "skipped".to_string(),
            dry_run: false,
            execution_id: Some(execution_id),
            total_aggregated: aggregation.total,
            total_transferred: Decimal::ZERO,
            breakdown: aggregation.breakdown(),
            processor_transfer_id: None,
            message: Some(reason),
            error: None,
            timestamp: Utc::now(),
        })
    }

    async fn invoke_gateway(
        &self,
        execution_id: Uuid,
        amount: Decimal,
    ) -> Result<(String, u32), (ProcessorError, u32)> {
        let minor = to_minor_units(amount).map_err(|e| (e, 0))?;
        let idempotency_key = format!("{}:{}", execution_id, minor);

        match self.config.rail {
            PayoutRail::Transfer => {
                let request = TransferRequest {
                    amount,
                    currency: self.config.currency.clone(),
                    destination: self.config.destination_account.clone(),
                    idempotency_key,
                    transfer_group: execution_id.to_string(),
                    description: Some("Automated revenue settlement".to_string()),
                };
                execute_transfer(self.gateway.clone(), &self.config.retry, request)
                    .await
                    .map(|(handle, retries)| (handle.id, retries))
            }
            PayoutRail::Payout => {
                let request = PayoutRequest {
                    amount,
                    currency: self.config.currency.clone(),
                    idempotency_key,
                    statement_descriptor: None,
                };
                execute_payout(self.gateway.clone(), &self.config.retry, request)
                    .await
                    .map(|(handle, retries)| (handle.id, retries))
            }
        }
    }
}

/// Retried transfer creation, shared by the engine and the repair workflow.
///
/// The idempotency key inside `request` stays constant across retries. A
/// timeout is ambiguous, so before it is retried the transfer group is
/// looked up: if the processor already realized the transfer, that handle
/// is the success.
pub(crate) async fn execute_transfer(
    gateway: Arc<dyn ProcessorGateway>,
    policy: &RetryPolicy,
    request: TransferRequest,
) -> Result<(TransferHandle, u32), (ProcessorError, u32)> {
    run_retrying(policy, ProcessorError::is_retryable, |_attempt| {
        let gateway = gateway.clone();
        let request = request.clone();
        async move {
            match gateway.create_transfer(&request).await {
                Err(ProcessorError::Timeout) => {
                    tracing::warn!(
                        "⏱️ Transfer call timed out, checking group {} before retrying",
                        request.transfer_group
                    );
                    match gateway.find_transfer(&request.transfer_group).await {
                        Ok(Some(handle)) => Ok(handle),
                        _ => Err(ProcessorError::Timeout),
                    }
                }
                other => other,
            }
        }
    })
    .await
}

/// Retried payout creation. Payouts have no lookup handle, so a timeout
/// relies on the processor deduplicating the idempotency key.
pub(crate) async fn execute_payout(
    gateway: Arc<dyn ProcessorGateway>,
    policy: &RetryPolicy,
    request: PayoutRequest,
) -> Result<(PayoutHandle, u32), (ProcessorError, u32)> {
    run_retrying(policy, ProcessorError::is_retryable, |_attempt| {
        let gateway = gateway.clone();
        let request = request.clone();
        async move { gateway.create_payout(&request).await }
    })
    .await
}
