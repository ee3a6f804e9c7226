use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::models::{AttemptStatus, AuditLogEntry, NewAuditEntry, TransferAttempt};
use crate::error::{AppError, AppResult};

const ATTEMPT_COLUMNS: &str = "id, requested_amount, executed_amount, currency, status, \
     processor_transfer_id, error_code, error_message, retry_count, metadata, \
     corrective_transfer_id, created_at, updated_at";

/// Persistence seam for transfer attempts and the audit trail.
///
/// The engine and repair workflow only depend on this trait; the Postgres
/// implementation below is the production store.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn create_attempt(
        &self,
        id: Uuid,
        requested_amount: Decimal,
        currency: &str,
        status: AttemptStatus,
        metadata: serde_json::Value,
    ) -> AppResult<TransferAttempt>;

    async fn mark_completed(
        &self,
        id: Uuid,
        processor_transfer_id: &str,
        executed_amount: Decimal,
        retry_count: i32,
    ) -> AppResult<()>;

    async fn mark_failed(
        &self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
        retry_count: i32,
    ) -> AppResult<()>;

    async fn mark_corrected(&self, id: Uuid, corrective_transfer_id: &str) -> AppResult<()>;

    async fn bump_retry_count(&self, id: Uuid, retry_count: i32) -> AppResult<()>;

    async fn get_attempt(&self, id: Uuid) -> AppResult<Option<TransferAttempt>>;

    async fn list_attempts(
        &self,
        status: Option<AttemptStatus>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<TransferAttempt>>;

    /// Failed attempts eligible for repair: under the retry ceiling and
    /// inside the age window (old enough not to race an in-flight run,
    /// young enough to still be worth fixing).
    async fn list_repairable(
        &self,
        retry_ceiling: i32,
        newer_than: DateTime<Utc>,
        older_than: DateTime<Utc>,
    ) -> AppResult<Vec<TransferAttempt>>;

    async fn record_audit(&self, entry: NewAuditEntry) -> AppResult<AuditLogEntry>;

    /// Timestamp of the most recent settlement run of any terminal outcome.
    /// The scheduler gates on this.
    async fn last_run_at(&self) -> AppResult<Option<DateTime<Utc>>>;
}

/// Postgres-backed store - the source of truth for settlement history.
pub struct SettlementRepository {
    pub pool: PgPool,
}

impl SettlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for SettlementRepository {
    async fn create_attempt(
        &self,
        id: Uuid,
        requested_amount: Decimal,
        currency: &str,
        status: AttemptStatus,
        metadata: serde_json::Value,
    ) -> AppResult<TransferAttempt> {
        let attempt = sqlx::query_as::<_, TransferAttempt>(&format!(
            r#"
            INSERT INTO transfer_attempts (id, requested_amount, executed_amount, currency, status, metadata)
            VALUES ($1, $2, 0, $3, $4, $5)
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(requested_amount)
        .bind(currency)
        .bind(status)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        processor_transfer_id: &str,
        executed_amount: Decimal,
        retry_count: i32,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_attempts
            SET status = 'completed', processor_transfer_id = $2, executed_amount = $3,
                retry_count = $4, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(processor_transfer_id)
        .bind(executed_amount)
        .bind(retry_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Internal(format!(
                "attempt {} was not pending when marking completed",
                id
            )));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
        retry_count: i32,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_attempts
            SET status = 'failed', error_code = $2, error_message = $3,
                retry_count = $4, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(error_code)
        .bind(error_message)
        .bind(retry_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Internal(format!(
                "attempt {} was not pending when marking failed",
                id
            )));
        }
        Ok(())
    }

    async fn mark_corrected(&self, id: Uuid, corrective_transfer_id: &str) -> AppResult<()> {
        // The failed record keeps its error detail; only the status flips
        // and the corrective transfer is linked.
        let result = sqlx::query(
            r#"
            UPDATE transfer_attempts
            SET status = 'corrected', corrective_transfer_id = $2, updated_at = now()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .bind(corrective_transfer_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Internal(format!(
                "attempt {} was not failed when marking corrected",
                id
            )));
        }
        Ok(())
    }

    async fn bump_retry_count(&self, id: Uuid, retry_count: i32) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE transfer_attempts
            SET retry_count = $2, updated_at = now()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_attempt(&self, id: Uuid) -> AppResult<Option<TransferAttempt>> {
        let attempt = sqlx::query_as::<_, TransferAttempt>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM transfer_attempts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn list_attempts(
        &self,
        status: Option<AttemptStatus>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<TransferAttempt>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {ATTEMPT_COLUMNS} FROM transfer_attempts WHERE 1 = 1"
        ));

        if let Some(status) = status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }
        if let Some(from) = from {
            builder.push(" AND created_at >= ");
            builder.push_bind(from);
        }
        if let Some(to) = to {
            builder.push(" AND created_at <= ");
            builder.push_bind(to);
        }
        builder.push(" ORDER BY created_at DESC LIMIT 200");

        let attempts = builder
            .build_query_as::<TransferAttempt>()
            .fetch_all(&self.pool)
            .await?;

        Ok(attempts)
    }

    async fn list_repairable(
        &self,
        retry_ceiling: i32,
        newer_than: DateTime<Utc>,
        older_than: DateTime<Utc>,
    ) -> AppResult<Vec<TransferAttempt>> {
        let attempts = sqlx::query_as::<_, TransferAttempt>(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS}
            FROM transfer_attempts
            WHERE status = 'failed'
              AND retry_count < $1
              AND created_at >= $2
              AND created_at <= $3
            ORDER BY created_at
            "#
        ))
        .bind(retry_ceiling)
        .bind(newer_than)
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn record_audit(&self, entry: NewAuditEntry) -> AppResult<AuditLogEntry> {
        let audit = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            INSERT INTO settlement_audit_log
                (attempt_id, outcome, total_aggregated, total_transferred, total_reconciled,
                 breakdown, anomaly, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, attempt_id, outcome, total_aggregated, total_transferred,
                      total_reconciled, breakdown, anomaly, message, created_at
            "#,
        )
        .bind(entry.attempt_id)
        .bind(entry.outcome)
        .bind(entry.total_aggregated)
        .bind(entry.total_transferred)
        .bind(entry.total_reconciled)
        .bind(entry.breakdown)
        .bind(entry.anomaly)
        .bind(entry.message)
        .fetch_one(&self.pool)
        .await?;

        Ok(audit)
    }

    async fn last_run_at(&self) -> AppResult<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT max(created_at) FROM transfer_attempts")
                .fetch_one(&self.pool)
                .await?;

        Ok(last)
    }
}
