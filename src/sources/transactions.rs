use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;

use super::{LedgerSource, SourceReading, SourceRecord};
use crate::error::AppResult;

/// Transaction-row ledger (`earnings_transactions`): immutable amounts with
/// a status flag. Eligible rows are `completed`; settling flips them to
/// `transferred`. The status guard makes each row settle at most once.
pub struct EarningsTransactionSource {
    pool: PgPool,
}

impl EarningsTransactionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerSource for EarningsTransactionSource {
    fn name(&self) -> &'static str {
        "earnings_transactions"
    }

    async fn read(&self, currency: &str) -> AppResult<SourceReading> {
        let records = sqlx::query_as::<_, SourceRecord>(
            r#"
            SELECT id, amount
            FROM earnings_transactions
            WHERE currency = $1 AND status = 'completed' AND amount > 0
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
                UPDATE earnings_transactions
                SET status = 'transferred', updated_at = now()
                WHERE id = $1 AND status = 'completed'
                "#,
            )
            .bind(record.id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                settled += record.amount;
            } else {
                warn!(
                    "earnings_transactions row {} already flipped or missing",
                    record.id
                );
            }
        }

        Ok(settled)
    }
}
