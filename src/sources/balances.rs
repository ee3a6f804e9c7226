use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;

use super::{LedgerSource, SourceReading, SourceRecord};
use crate::error::AppResult;

/// Balance-container ledger (`revenue_balances`): rows that carry a running
/// balance column. Settling deducts the snapshot amount from each row,
/// guarded, so revenue that landed after aggregation is never wiped.
pub struct BalanceTableSource {
    pool: PgPool,
}

impl BalanceTableSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerSource for BalanceTableSource {
    fn name(&self) -> &'static str {
        "revenue_balances"
    }

    async fn read(&self, currency: &str) -> AppResult<SourceReading> {
        let records = sqlx::query_as::<_, SourceRecord>(
            r#"
            SELECT id, balance AS amount
            FROM revenue_balances
            WHERE currency = $1 AND balance > 0
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
                UPDATE revenue_balances
                SET balance = balance - $2, updated_at = now()
                WHERE id = $1 AND balance >= $2
                "#,
            )
            .bind(record.id)
            .bind(record.amount)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                settled += record.amount;
            } else {
                // Balance shrank below the snapshot since aggregation.
                // Leave the row alone and let the reconciler report drift.
                warn!(
                    "revenue_balances row {} no longer covers snapshot amount {}",
                    record.id, record.amount
                );
            }
        }

        Ok(settled)
    }
}
