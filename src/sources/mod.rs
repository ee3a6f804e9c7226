// Ledger sources - every persistent store that contributes to the
// transferable total registers here. The aggregator and reconciler only
// ever talk to the `LedgerSource` trait, so adding a ledger means adding a
// descriptor and wiring it in bootstrap, not touching engine code.

pub mod balances;
pub mod requests;
pub mod transactions;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;

pub use balances::BalanceTableSource;
pub use requests::WithdrawalRequestSource;
pub use transactions::EarningsTransactionSource;

/// One balance-bearing row captured at aggregation time.
///
/// The snapshot is what reconciliation later settles against; amounts that
/// arrive in the same row after the snapshot must survive settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SourceRecord {
    pub id: Uuid,
    pub amount: Decimal,
}

/// A source's slice of one aggregation snapshot: its name, the eligible
/// amount, and the records backing it. Serialized into attempt metadata so
/// the repair workflow can reconcile the exact snapshot later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source: String,
    pub amount: Decimal,
    pub records: Vec<SourceRecord>,
}

/// What a source reports when read: the eligible total plus the records
/// backing it, in a deterministic order.
#[derive(Debug, Clone)]
pub struct SourceReading {
    pub amount: Decimal,
    pub records: Vec<SourceRecord>,
}

#[async_trait]
pub trait LedgerSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read the eligible balance in the settlement currency. Records must
    /// come back in a stable order (the partial-settlement selection walks
    /// them front to back).
    async fn read(&self, currency: &str) -> AppResult<SourceReading>;

    /// Apply this source's settle semantics to the given snapshot records
    /// only. Returns the amount actually settled, which the reconciler
    /// compares against the snapshot to detect drift.
    async fn settle(&self, records: &[SourceRecord]) -> AppResult<Decimal>;
}

/// Ordered registry of ledger sources.
///
/// Registration order is load-bearing: it is the deterministic order in
/// which sources are aggregated and, when the processor has less available
/// than the books show, the order in which records are selected for
/// settlement.
pub struct SourceRegistry {
    sources: Vec<Arc<dyn LedgerSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register(&mut self, source: Arc<dyn LedgerSource>) {
        info!("Registering ledger source: {}", source.name());
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn LedgerSource>] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LedgerSource>> {
        self.sources.iter().find(|s| s.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
