// In-memory fakes shared by the engine-level tests: a ledger source, a
// processor gateway, and an attempt store. They mirror the guards of the
// production implementations (status transitions, idempotency dedup,
// balance deduction) so the tests exercise the real invariants.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult, ProcessorError};
use crate::ledger::models::{AttemptStatus, AuditLogEntry, NewAuditEntry, TransferAttempt};
use crate::ledger::repository::AttemptStore;
use crate::processor::{
    PayoutHandle, PayoutRequest, ProcessorGateway, TransferHandle, TransferRequest,
};
use crate::sources::{LedgerSource, SourceContribution, SourceReading, SourceRecord};

// ========== LEDGER SOURCE ==========

pub struct MemorySource {
    name: &'static str,
    records: RwLock<Vec<SourceRecord>>,
    settled: RwLock<Vec<SourceRecord>>,
    fail_read: bool,
    fail_settle: bool,
}

impl MemorySource {
    pub fn with_amounts(name: &'static str, amounts: &[Decimal]) -> Self {
        let records = amounts
            .iter()
            .map(|amount| SourceRecord {
                id: Uuid::new_v4(),
                amount: *amount,
            })
            .collect();
        Self {
            name,
            records: RwLock::new(records),
            settled: RwLock::new(Vec::new()),
            fail_read: false,
            fail_settle: false,
        }
    }

    pub fn failing(name: &'static str) -> Self {
        let mut source = Self::with_amounts(name, &[]);
        source.fail_read = true;
        source
    }

    pub fn failing_settle(mut self) -> Self {
        self.fail_settle = true;
        self
    }

    /// Snapshot of the current records, shaped like an aggregation entry.
    pub async fn contribution(&self) -> SourceContribution {
        let records = self.records.read().await.clone();
        SourceContribution {
            source: self.name.to_string(),
            amount: records.iter().map(|r| r.amount).sum(),
            records,
        }
    }

    pub async fn settled_total(&self) -> Decimal {
        self.settled.read().await.iter().map(|r| r.amount).sum()
    }

    pub async fn remaining_total(&self) -> Decimal {
        self.records.read().await.iter().map(|r| r.amount).sum()
    }
}

#[async_trait]
impl LedgerSource for MemorySource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn read(&self, _currency: &str) -> AppResult<SourceReading> {
        if self.fail_read {
            return Err(AppError::Internal("synthetic read failure".to_string()));
        }
        let records = self.records.read().await.clone();
        Ok(SourceReading {
            amount: records.iter().map(|r| r.amount).sum(),
            records,
        })
    }

    async fn settle(&self, records: &[SourceRecord]) -> AppResult<Decimal> {
        if self.fail_settle {
            return Err(AppError::Internal("synthetic settle failure".to_string()));
        }

        let mut stored = self.records.write().await;
        let mut settled_log = self.settled.write().await;
        let mut settled = Decimal::ZERO;

        for record in records {
            if let Some(pos) = stored
                .iter()
                .position(|s| s.id == record.id && s.amount >= record.amount)
            {
                stored[pos].amount -= record.amount;
                if stored[pos].amount == Decimal::ZERO {
                    stored.remove(pos);
                }
                settled += record.amount;
                settled_log.push(record.clone());
            }
        }

        Ok(settled)
    }
}

// ========== PROCESSOR GATEWAY ==========

pub struct MockGateway {
    available: RwLock<Decimal>,
    // realized transfers keyed by idempotency key, with their group
    transfers: RwLock<HashMap<String, (String, TransferHandle)>>,
    payouts: RwLock<Vec<PayoutHandle>>,
    failures: RwLock<VecDeque<ProcessorError>>,
    // next create_transfer realizes the transfer but loses the response
    register_then_timeout: RwLock<bool>,
    balance_delay: RwLock<Option<Duration>>,
    transfer_calls: AtomicU32,
}

impl MockGateway {
    pub fn with_available(amount: Decimal) -> Self {
        Self {
            available: RwLock::new(amount),
            transfers: RwLock::new(HashMap::new()),
            payouts: RwLock::new(Vec::new()),
            failures: RwLock::new(VecDeque::new()),
            register_then_timeout: RwLock::new(false),
            balance_delay: RwLock::new(None),
            transfer_calls: AtomicU32::new(0),
        }
    }

    /// Queue errors returned (in order) before any transfer is realized.
    pub async fn script_failures(&self, errors: Vec<ProcessorError>) {
        self.failures.write().await.extend(errors);
    }

    pub async fn set_register_then_timeout(&self) {
        *self.register_then_timeout.write().await = true;
    }

    pub async fn set_balance_delay(&self, delay: Duration) {
        *self.balance_delay.write().await = Some(delay);
    }

    pub fn transfer_calls(&self) -> u32 {
        self.transfer_calls.load(Ordering::SeqCst)
    }

    /// How many transfers actually exist at the "processor".
    pub async fn realized_transfers(&self) -> usize {
        self.transfers.read().await.len()
    }
}

#[async_trait]
impl ProcessorGateway for MockGateway {
    async fn available_balance(&self, _currency: &str) -> Result<Decimal, ProcessorError> {
        if let Some(delay) = *self.balance_delay.read().await {
            tokio::time::sleep(delay).await;
        }
        Ok(*self.available.read().await)
    }

    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferHandle, ProcessorError> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.failures.write().await.pop_front() {
            return Err(error);
        }

        let mut transfers = self.transfers.write().await;
        // Idempotency: a key the processor has seen returns the original
        // transfer instead of creating another.
        if let Some((_, existing)) = transfers.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let mut available = self.available.write().await;
        if request.amount > *available {
            return Err(ProcessorError::InsufficientFunds);
        }
        *available -= request.amount;

        let handle = TransferHandle {
            id: format!("tr_{}", transfers.len() + 1),
            amount: request.amount,
            currency: request.currency.clone(),
        };
        transfers.insert(
            request.idempotency_key.clone(),
            (request.transfer_group.clone(), handle.clone()),
        );

        let mut lose_response = self.register_then_timeout.write().await;
        if *lose_response {
            *lose_response = false;
            return Err(ProcessorError::Timeout);
        }

        Ok(handle)
    }

    async fn create_payout(
        &self,
        request: &PayoutRequest,
    ) -> Result<PayoutHandle, ProcessorError> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.failures.write().await.pop_front() {
            return Err(error);
        }

        let mut available = self.available.write().await;
        if request.amount > *available {
            return Err(ProcessorError::InsufficientFunds);
        }
        *available -= request.amount;

        let mut payouts = self.payouts.write().await;
        let handle = PayoutHandle {
            id: format!("po_{}", payouts.len() + 1),
            amount: request.amount,
            currency: request.currency.clone(),
        };
        payouts.push(handle.clone());
        Ok(handle)
    }

    async fn find_transfer(
        &self,
        transfer_group: &str,
    ) -> Result<Option<TransferHandle>, ProcessorError> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .values()
            .find(|(group, _)| group == transfer_group)
            .map(|(_, handle)| handle.clone()))
    }
}

// ========== ATTEMPT STORE ==========

pub struct MemoryAttemptStore {
    attempts: RwLock<HashMap<Uuid, TransferAttempt>>,
    audits: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            audits: RwLock::new(Vec::new()),
        }
    }

    pub async fn all_attempts(&self) -> Vec<TransferAttempt> {
        let mut attempts: Vec<_> = self.attempts.read().await.values().cloned().collect();
        attempts.sort_by_key(|a| a.created_at);
        attempts
    }

    pub async fn all_audits(&self) -> Vec<AuditLogEntry> {
        self.audits.read().await.clone()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn create_attempt(
        &self,
        id: Uuid,
        requested_amount: Decimal,
        currency: &str,
        status: AttemptStatus,
        metadata: serde_json::Value,
    ) -> AppResult<TransferAttempt> {
        let now = Utc::now();
        let attempt = TransferAttempt {
            id,
            requested_amount,
            executed_amount: Decimal::ZERO,
            currency: currency.to_string(),
            status,
            processor_transfer_id: None,
            error_code: None,
            error_message: None,
            retry_count: 0,
            metadata,
            corrective_transfer_id: None,
            created_at: now,
            updated_at: now,
        };
        self.attempts.write().await.insert(id, attempt.clone());
        Ok(attempt)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        processor_transfer_id: &str,
        executed_amount: Decimal,
        retry_count: i32,
    ) -> AppResult<()> {
        let mut attempts = self.attempts.write().await;
        let attempt = attempts
            .get_mut(&id)
            .filter(|a| a.status == AttemptStatus::Pending)
            .ok_or_else(|| {
                AppError::Internal(format!("attempt {} was not pending when marking completed", id))
            })?;
        attempt.status = AttemptStatus::Completed;
        attempt.processor_transfer_id = Some(processor_transfer_id.to_string());
        attempt.executed_amount = executed_amount;
        attempt.retry_count = retry_count;
        attempt.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
        retry_count: i32,
    ) -> AppResult<()> {
        let mut attempts = self.attempts.write().await;
        let attempt = attempts
            .get_mut(&id)
            .filter(|a| a.status == AttemptStatus::Pending)
            .ok_or_else(|| {
                AppError::Internal(format!("attempt {} was not pending when marking failed", id))
            })?;
        attempt.status = AttemptStatus::Failed;
        attempt.error_code = Some(error_code.to_string());
        attempt.error_message = Some(error_message.to_string());
        attempt.retry_count = retry_count;
        attempt.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_corrected(&self, id: Uuid, corrective_transfer_id: &str) -> AppResult<()> {
        let mut attempts = self.attempts.write().await;
        let attempt = attempts
            .get_mut(&id)
            .filter(|a| a.status == AttemptStatus::Failed)
            .ok_or_else(|| {
                AppError::Internal(format!("attempt {} was not failed when marking corrected", id))
            })?;
        attempt.status = AttemptStatus::Corrected;
        attempt.corrective_transfer_id = Some(corrective_transfer_id.to_string());
        attempt.updated_at = Utc::now();
        Ok(())
    }

    async fn bump_retry_count(&self, id: Uuid, retry_count: i32) -> AppResult<()> {
        let mut attempts = self.attempts.write().await;
        if let Some(attempt) = attempts
            .get_mut(&id)
            .filter(|a| a.status == AttemptStatus::Failed)
        {
            attempt.retry_count = retry_count;
            attempt.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_attempt(&self, id: Uuid) -> AppResult<Option<TransferAttempt>> {
        Ok(self.attempts.read().await.get(&id).cloned())
    }

    async fn list_attempts(
        &self,
        status: Option<AttemptStatus>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<TransferAttempt>> {
        let mut attempts: Vec<_> = self
            .attempts
            .read()
            .await
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .filter(|a| from.map_or(true, |f| a.created_at >= f))
            .filter(|a| to.map_or(true, |t| a.created_at <= t))
            .cloned()
            .collect();
        attempts.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        Ok(attempts)
    }

    async fn list_repairable(
        &self,
        retry_ceiling: i32,
        newer_than: DateTime<Utc>,
        older_than: DateTime<Utc>,
    ) -> AppResult<Vec<TransferAttempt>> {
        let mut attempts: Vec<_> = self
            .attempts
            .read()
            .await
            .values()
            .filter(|a| a.status == AttemptStatus::Failed)
            .filter(|a| a.retry_count < retry_ceiling)
            .filter(|a| a.created_at >= newer_than && a.created_at <= older_than)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.created_at);
        Ok(attempts)
    }

    async fn record_audit(&self, entry: NewAuditEntry) -> AppResult<AuditLogEntry> {
        let audit = AuditLogEntry {
            id: Uuid::new_v4(),
            attempt_id: entry.attempt_id,
            outcome: entry.outcome,
            total_aggregated: entry.total_aggregated,
            total_transferred: entry.total_transferred,
            total_reconciled: entry.total_reconciled,
            breakdown: entry.breakdown,
            anomaly: entry.anomaly,
            message: entry.message,
            created_at: Utc::now(),
        };
        self.audits.write().await.push(audit.clone());
        Ok(audit)
    }

    async fn last_run_at(&self) -> AppResult<Option<DateTime<Utc>>> {
        Ok(self
            .attempts
            .read()
            .await
            .values()
            .map(|a| a.created_at)
            .max())
    }
}
