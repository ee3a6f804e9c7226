// Repair workflow - the lower-frequency path that picks up failed
// settlement attempts and retries them without rewriting history. A fixed
// attempt transitions to `corrected` and links the new processor transfer;
// the original failure record stays intact for auditors.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PayoutRail;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{AttemptStatus, NewAuditEntry, TransferAttempt};
use crate::ledger::repository::AttemptStore;
use crate::processor::{PayoutRequest, ProcessorGateway, TransferRequest};
use crate::sources::SourceRegistry;

use super::reconciler::Reconciler;
use super::{execute_payout, execute_transfer, SettlementConfig};

#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Attempts at or above this retry count are left for manual review.
    pub retry_ceiling: i32,
    /// Skip very fresh failures; they may still belong to an in-flight run.
    pub min_age_minutes: i64,
    pub max_age_hours: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub attempt_id: Uuid,
    pub amount: Decimal,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_transfer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub processed: usize,
    pub fixed: usize,
    pub still_failed: usize,
    pub results: Vec<RepairOutcome>,
}

pub struct RepairWorkflow {
    store: Arc<dyn AttemptStore>,
    gateway: Arc<dyn ProcessorGateway>,
    reconciler: Reconciler,
    settlement: SettlementConfig,
    config: RepairConfig,
}

impl RepairWorkflow {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        gateway: Arc<dyn ProcessorGateway>,
        registry: Arc<SourceRegistry>,
        settlement: SettlementConfig,
        config: RepairConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            reconciler: Reconciler::new(registry),
            settlement,
            config,
        }
    }

    pub async fn run_repair(&self) -> AppResult<RepairReport> {
        let now = Utc::now();
        let newer_than = now - chrono::Duration::hours(self.config.max_age_hours);
        let older_than = now - chrono::Duration::minutes(self.config.min_age_minutes);

        let candidates = self
            .store
            .list_repairable(self.config.retry_ceiling, newer_than, older_than)
            .await?;

        info!(
            "🔧 Repair sweep: {} failed attempts eligible",
            candidates.len()
        );

        let mut results = Vec::new();
        let mut fixed = 0usize;
        let mut still_failed = 0usize;

        for attempt in &candidates {
            match self.repair_attempt(attempt).await {
                Ok(transfer_id) => {
                    fixed += 1;
                    results.push(RepairOutcome {
                        attempt_id: attempt.id,
                        amount: attempt.requested_amount,
                        status: AttemptStatus::Corrected,
                        new_transfer_id: Some(transfer_id),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("⚠️ Repair of attempt {} failed: {}", attempt.id, e);
                    still_failed += 1;
                    results.push(RepairOutcome {
                        attempt_id: attempt.id,
                        amount: attempt.requested_amount,
                        status: AttemptStatus::Failed,
                        new_transfer_id: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(RepairReport {
            processed: candidates.len(),
            fixed,
            still_failed,
            results,
        })
    }

    async fn repair_attempt(&self, attempt: &TransferAttempt) -> AppResult<String> {
        let metadata = attempt.parse_metadata()?;

        // The original failure may have been an ambiguous timeout whose
        // transfer actually landed. Check before creating a new one.
        let existing = self
            .gateway
            .find_transfer(&attempt.id.to_string())
            .await
            .ok()
            .flatten();

        let transfer_id = match existing {
            Some(handle) => {
                info!(
                    "✓ Attempt {} already has transfer {} at the processor",
                    attempt.id, handle.id
                );
                handle.id
            }
            None => {
                // Fresh idempotency key: the original key exhausted its
                // purpose when the attempt went terminal.
                let idempotency_key =
                    format!("{}:repair:{}", attempt.id, Utc::now().timestamp());

                let outcome = match self.settlement.rail {
                    PayoutRail::Transfer => {
                        let request = TransferRequest {
                            amount: attempt.requested_amount,
                            currency: attempt.currency.clone(),
                            destination: self.settlement.destination_account.clone(),
                            idempotency_key,
                            transfer_group: attempt.id.to_string(),
                            description: Some(format!("Settlement repair for {}", attempt.id)),
                        };
                        execute_transfer(self.gateway.clone(), &self.settlement.retry, request)
                            .await
                            .map(|(handle, retries)| (handle.id, retries))
                    }
                    PayoutRail::Payout => {
                        let request = PayoutRequest {
                            amount: attempt.requested_amount,
                            currency: attempt.currency.clone(),
                            idempotency_key,
                            statement_descriptor: None,
                        };
                        execute_payout(self.gateway.clone(), &self.settlement.retry, request)
                            .await
                            .map(|(handle, retries)| (handle.id, retries))
                    }
                };

                match outcome {
                    Ok((id, _retries)) => id,
                    Err((e, retries)) => {
                        self.store
                            .bump_retry_count(
                                attempt.id,
                                attempt.retry_count + 1 + retries as i32,
                            )
                            .await?;
                        return Err(AppError::Processor(e));
                    }
                }
            }
        };

        self.store.mark_corrected(attempt.id, &transfer_id).await?;

        // The failed run never touched the ledgers, so the stored snapshot
        // still owes settlement.
        let summary = self.reconciler.reconcile(&metadata.contributions).await;
        let anomaly = !summary.is_clean(attempt.requested_amount);

        self.store
            .record_audit(NewAuditEntry {
                attempt_id: attempt.id,
                outcome: AttemptStatus::Corrected,
                total_aggregated: attempt.requested_amount,
                total_transferred: attempt.requested_amount,
                total_reconciled: summary.reconciled,
                breakdown: serde_json::to_value(metadata.breakdown())?,
                anomaly,
                message: Some(format!("repair transfer {}", transfer_id)),
            })
            .await?;

        info!(
            "✅ Attempt {} corrected with transfer {}",
            attempt.id, transfer_id
        );
        Ok(transfer_id)
    }
}
