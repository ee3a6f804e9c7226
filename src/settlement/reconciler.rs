// Reconciliation - after a completed transfer, mark every contributing
// source record settled. By this point the money has already moved, so
// nothing here is allowed to fail the run: problems are collected as
// anomalies for the audit record and operator follow-up.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info};

use crate::sources::{SourceContribution, SourceRegistry};

#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct ReconcileSummary {
    /// Amount confirmed settled across all sources.
    pub reconciled: Decimal,
    pub failures: Vec<SourceFailure>,
}

impl ReconcileSummary {
    pub fn is_clean(&self, transferred: Decimal) -> bool {
        self.failures.is_empty() && self.reconciled == transferred
    }
}

pub struct Reconciler {
    registry: Arc<SourceRegistry>,
}

impl Reconciler {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self { registry }
    }

    /// Settle the exact snapshot captured at aggregation time, source by
    /// source, best-effort. One source failing does not stop the rest and
    /// never rolls back the external transfer.
    pub async fn reconcile(&self, contributions: &[SourceContribution]) -> ReconcileSummary {
        let mut reconciled = Decimal::ZERO;
        let mut failures = Vec::new();

        for contribution in contributions {
            let Some(source) = self.registry.get(&contribution.source) else {
                error!(
                    "❌ Ledger source {} vanished from the registry, cannot settle {}",
                    contribution.source, contribution.amount
                );
                failures.push(SourceFailure {
                    source: contribution.source.clone(),
                    error: "source not registered".to_string(),
                });
                continue;
            };

            match source.settle(&contribution.records).await {
                Ok(settled) => {
                    reconciled += settled;
                    if settled == contribution.amount {
                        info!(
                            "✓ Settled {} across {} records in {}",
                            settled,
                            contribution.records.len(),
                            contribution.source
                        );
                    } else {
                        error!(
                            "⚠️ {} settled {} but snapshot expected {}",
                            contribution.source, settled, contribution.amount
                        );
                        failures.push(SourceFailure {
                            source: contribution.source.clone(),
                            error: format!(
                                "settled {} of snapshot {}",
                                settled, contribution.amount
                            ),
                        });
                    }
                }
                Err(e) => {
                    error!(
                        "❌ Failed to settle {} ({}): {:?}",
                        contribution.source, contribution.amount, e
                    );
                    failures.push(SourceFailure {
                        source: contribution.source.clone(),
                        error: format!("{:?}", e),
                    });
                }
            }
        }

        ReconcileSummary {
            reconciled,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemorySource;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn reconciles_every_source_in_the_snapshot() {
        let a = Arc::new(MemorySource::with_amounts("a", &[dec!(3.20)]));
        let b = Arc::new(MemorySource::with_amounts("b", &[dec!(2.00)]));

        let mut registry = SourceRegistry::new();
        registry.register(a.clone());
        registry.register(b.clone());
        let reconciler = Reconciler::new(Arc::new(registry));

        let snapshot = vec![a.contribution().await, b.contribution().await];
        let summary = reconciler.reconcile(&snapshot).await;

        assert_eq!(summary.reconciled, dec!(5.20));
        assert!(summary.is_clean(dec!(5.20)));
        assert_eq!(a.settled_total().await, dec!(3.20));
        assert_eq!(b.settled_total().await, dec!(2.00));
    }

    #[tokio::test]
    async fn one_failing_source_does_not_block_the_rest() {
        let a = Arc::new(MemorySource::with_amounts("a", &[dec!(1.00)]));
        let b = Arc::new(MemorySource::with_amounts("b", &[dec!(2.00)]).failing_settle());
        let c = Arc::new(MemorySource::with_amounts("c", &[dec!(4.00)]));

        let mut registry = SourceRegistry::new();
        registry.register(a.clone());
        registry.register(b.clone());
        registry.register(c.clone());
        let reconciler = Reconciler::new(Arc::new(registry));

        let snapshot = vec![
            a.contribution().await,
            b.contribution().await,
            c.contribution().await,
        ];
        let summary = reconciler.reconcile(&snapshot).await;

        assert_eq!(summary.reconciled, dec!(5.00));
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].source, "b");
        assert!(!summary.is_clean(dec!(7.00)));
        assert_eq!(c.settled_total().await, dec!(4.00));
    }

    #[tokio::test]
    async fn unknown_source_is_an_anomaly_not_a_crash() {
        let registry = SourceRegistry::new();
        let reconciler = Reconciler::new(Arc::new(registry));

        let snapshot = vec![crate::sources::SourceContribution {
            source: "ghost".to_string(),
            amount: dec!(9.99),
            records: vec![],
        }];
        let summary = reconciler.reconcile(&snapshot).await;

        assert_eq!(summary.reconciled, Decimal::ZERO);
        assert_eq!(summary.failures.len(), 1);
    }
}
