use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;

use super::{LedgerSource, SourceReading, SourceRecord};
use crate::error::AppResult;

/// Request-queue ledger (`withdrawal_requests`): queued payout requests
/// waiting to be swept. Eligible rows are `pending`; settling marks them
/// `completed`.
pub struct WithdrawalRequestSource {
    pool: PgPool,
}

impl WithdrawalRequestSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerSource for WithdrawalRequestSource {
    fn name(&self) -> &'static str {
        "withdrawal_requests"
    }

    async fn read(&self, currency: &str) -> AppResult<SourceReading> {
        let records = sqlx::query_as::<_, SourceRecord>(
            r#"
            SELECT id, amount
            FROM withdrawal_requests
            WHERE currency = $1 AND status = 'pending' AND amount > 0
            ORDER BY created_at, id
            "#,
        )
        .bind(currency)
        .fetch_all(&self.pool)
        .await?;

        let amount = records.iter().map(|r| r.amount).sum();
        Ok(SourceReading { amount, records })
    }

    async fn settle(&self, records: &[SourceRecord]) -> AppResult<Decimal> {
        let mut settled = Decimal::ZERO;

        for record in records {
            let result = sqlx::query(
                r#"
                UPDATE withdrawal_requests
                SET status = 'completed', updated_at = now()
                WHERE id = $1 AND status = 'pending'
                "#,
            )
            .bind(record.id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                settled += record.amount;
            } else {
                warn!(
                    "withdrawal_requests row {} already completed or missing",
                    record.id
                );
            }
        }

        Ok(settled)
    }
}
