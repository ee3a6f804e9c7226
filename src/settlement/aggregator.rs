// Aggregation - one pass over every registered ledger source, producing
// the snapshot the executor settles against.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::sources::{SourceContribution, SourceRegistry};

/// Snapshot of everything transferable at read time. Advisory input to the
/// executor, not a reservation: the executor re-derives the executable
/// amount from the processor's live balance, and reconciliation only ever
/// touches the records captured here.
#[derive(Debug, Clone)]
pub struct AggregationResult {
    pub total: Decimal,
    /// Registry order, only sources with a positive eligible amount.
    pub contributions: Vec<SourceContribution>,
    /// Sources whose read failed; excluded from the total.
    pub failed_sources: Vec<String>,
}

impl AggregationResult {
    pub fn breakdown(&self) -> HashMap<String, Decimal> {
        self.contributions
            .iter()
            .map(|c| (c.source.clone(), c.amount))
            .collect()
    }
}

/// Read every registered source in registry order.
///
/// A single source failing to read is logged and excluded rather than
/// aborting the run: partial aggregation is strictly better than total
/// failure for a money-recovery job.
pub async fn aggregate(registry: &SourceRegistry, currency: &str) -> AggregationResult {
    let mut total = Decimal::ZERO;
    let mut contributions = Vec::new();
    let mut failed_sources = Vec::new();

    for source in registry.sources() {
        match source.read(currency).await {
            Ok(reading) if reading.amount > Decimal::ZERO => {
                info!(
                    "📊 {}: {} {} across {} records",
                    source.name(),
                    reading.amount,
                    currency,
                    reading.records.len()
                );
                total += reading.amount;
                contributions.push(SourceContribution {
                    source: source.name().to_string(),
                    amount: reading.amount,
                    records: reading.records,
                });
            }
            Ok(_) => {
                // Nothing eligible; zero and negative amounts never make it
                // into the breakdown.
            }
            Err(e) => {
                warn!(
                    "⚠️ Ledger source {} failed to read, excluding from this run: {:?}",
                    source.name(),
                    e
                );
                failed_sources.push(source.name().to_string());
            }
        }
    }

    AggregationResult {
        total,
        contributions,
        failed_sources,
    }
}

/// Deterministic partial-settlement selection.
///
/// Walks records in registry order, front to back, accumulating while the
/// running sum fits inside `cap`. The scan stops at the first record that
/// does not fit, so the selection is always an ordered prefix of the
/// snapshot. Returns the selected contributions and their exact sum; the
/// executor transfers that sum, never the cap, which keeps the books and
/// the processor in exact agreement.
pub fn select_settleable(
    contributions: &[SourceContribution],
    cap: Decimal,
) -> (Vec<SourceContribution>, Decimal) {
    let mut remaining = cap;
    let mut selected = Vec::new();
    let mut selected_total = Decimal::ZERO;

    for contribution in contributions {
        if remaining <= Decimal::ZERO {
            break;
        }

        if contribution.amount <= remaining {
            remaining -= contribution.amount;
            selected_total += contribution.amount;
            selected.push(contribution.clone());
            continue;
        }

        // Source only partially fits: take its records in order until one
        // does not, then stop the whole scan.
        let mut records = Vec::new();
        let mut amount = Decimal::ZERO;
        for record in &contribution.records {
            if record.amount > remaining {
                break;
            }
            remaining -= record.amount;
            amount += record.amount;
            records.push(record.clone());
        }
        if !records.is_empty() {
            selected_total += amount;
            selected.push(SourceContribution {
                source: contribution.source.clone(),
                amount,
                records,
            });
        }
        break;
    }

    (selected, selected_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceRecord;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn contribution(source: &str, amounts: &[Decimal]) -> SourceContribution {
        SourceContribution {
            source: source.to_string(),
            amount: amounts.iter().copied().sum(),
            records: amounts
                .iter()
                .map(|a| SourceRecord {
                    id: Uuid::new_v4(),
                    amount: *a,
                })
                .collect(),
        }
    }

    #[test]
    fn full_fit_selects_everything() {
        let contributions = vec![
            contribution("a", &[dec!(3.20)]),
            contribution("b", &[dec!(2.00)]),
        ];
        let (selected, total) = select_settleable(&contributions, dec!(1000.00));
        assert_eq!(selected.len(), 2);
        assert_eq!(total, dec!(5.20));
    }

    #[test]
    fn partial_fit_is_an_ordered_prefix() {
        let contributions = vec![
            contribution("a", &[dec!(100.00), dec!(50.00)]),
            contribution("b", &[dec!(200.00), dec!(10.00)]),
            contribution("c", &[dec!(5.00)]),
        ];

        // 120 covers a's first record only; a's second (50) does not fit,
        // so the scan stops there - later smaller records stay unselected.
        let (selected, total) = select_settleable(&contributions, dec!(120.00));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].source, "a");
        assert_eq!(selected[0].records.len(), 1);
        assert_eq!(total, dec!(100.00));
        assert!(total <= dec!(120.00));
    }

    #[test]
    fn whole_source_then_partial_source() {
        let contributions = vec![
            contribution("a", &[dec!(60.00)]),
            contribution("b", &[dec!(40.00), dec!(40.00)]),
        ];
        let (selected, total) = select_settleable(&contributions, dec!(120.00));
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[1].records.len(), 1);
        assert_eq!(total, dec!(100.00));
    }

    #[test]
    fn zero_cap_selects_nothing() {
        let contributions = vec![contribution("a", &[dec!(1.00)])];
        let (selected, total) = select_settleable(&contributions, Decimal::ZERO);
        assert!(selected.is_empty());
        assert_eq!(total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn aggregation_skips_failed_and_empty_sources() {
        use crate::testutil::MemorySource;
        use std::sync::Arc;

        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(MemorySource::with_amounts(
            "good",
            &[dec!(3.20), dec!(2.00)],
        )));
        registry.register(Arc::new(MemorySource::with_amounts("empty", &[])));
        registry.register(Arc::new(MemorySource::failing("broken")));

        let result = aggregate(&registry, "usd").await;
        assert_eq!(result.total, dec!(5.20));
        assert_eq!(result.contributions.len(), 1);
        assert_eq!(result.contributions[0].source, "good");
        assert_eq!(result.failed_sources, vec!["broken"]);
        assert!(result.breakdown().get("empty").is_none());
    }
}
