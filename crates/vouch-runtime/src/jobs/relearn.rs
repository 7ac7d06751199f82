//! Nightly price band relearning.
//!
//! Recomputes p5/p50/p95 over the last window of observations and proposes
//! a new band whenever the current one has drifted past tolerance, or the
//! item has no band at all.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use vouch_core::catalog::latest_ranges;
use vouch_core::proposals::{BandComparison, PriceRangeAdjust};
use vouch_core::stats::{group_prices, round_price};
use vouch_core::{PriceRange, ProposalPayload, RobustStats};

use super::{percent, relative_delta, JobContext};
use crate::store::StoreError;

/// Reason recorded when an item has observations but no band.
pub const NO_EXISTING_RANGE: &str = "no_existing_range";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelearnReport {
    pub scanned: usize,
    pub proposed: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct RelearnJob {
    context: JobContext,
    window: Duration,
    min_observations: usize,
    tolerance: f64,
}

impl RelearnJob {
    pub fn new(context: JobContext) -> Self {
        Self {
            context,
            window: Duration::days(90),
            min_observations: 10,
            tolerance: 0.05,
        }
    }

    pub async fn run(&self) -> Result<RelearnReport, StoreError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RelearnReport, StoreError> {
        let cutoff = now - self.window;
        self.context
            .events
            .log(None, None, "RELEARN_START", json!({"cutoff": cutoff}))
            .await;

        let observations = self.context.store.observations_since(cutoff).await?;
        let ranges = latest_ranges(self.context.store.price_ranges().await?);

        let mut report = RelearnReport::default();
        for (item_id, prices) in group_prices(&observations) {
            if prices.len() < self.min_observations {
                report.skipped += 1;
                continue;
            }
            report.scanned += 1;

            let stats = match RobustStats::from_prices(&prices) {
                Some(stats) if stats.sample_size >= self.min_observations => stats,
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };

            let Some(adjust) = self.proposal(&item_id, &stats, ranges.get(&item_id)) else {
                report.skipped += 1;
                continue;
            };

            if self
                .context
                .propose("relearn", &item_id, ProposalPayload::PriceRangeAdjust(adjust))
                .await
            {
                report.proposed += 1;
            } else {
                report.errors += 1;
            }
        }

        tracing::info!(
            scanned = report.scanned,
            proposed = report.proposed,
            skipped = report.skipped,
            errors = report.errors,
            "relearn complete"
        );
        self.context
            .events
            .log(None, None, "RELEARN_COMPLETE", json!(report))
            .await;
        Ok(report)
    }

    /// Band proposal for `item_id`, or `None` if the current band is within tolerance.
    fn proposal(
        &self,
        item_id: &str,
        stats: &RobustStats,
        current: Option<&PriceRange>,
    ) -> Option<PriceRangeAdjust> {
        let p5 = round_price(stats.p5);
        let p50 = round_price(stats.p50);
        let p95 = round_price(stats.p95);

        let (reason, comparison) = match current {
            None => (NO_EXISTING_RANGE.to_string(), None),
            Some(range) => {
                let min_delta = relative_delta(p5, range.min_price);
                let max_delta = relative_delta(p95, range.max_price);
                if min_delta <= self.tolerance && max_delta <= self.tolerance {
                    return None;
                }
                (
                    format!(
                        "Robust stats from {} recent observations",
                        stats.sample_size
                    ),
                    Some(BandComparison {
                        current_min: range.min_price,
                        current_max: range.max_price,
                        min_delta_pct: percent(min_delta),
                        max_delta_pct: percent(max_delta),
                    }),
                )
            }
        };

        Some(PriceRangeAdjust {
            canonical_item_id: item_id.to_string(),
            old_range: current.map(PriceRange::bounds),
            new_range: (p5, p95),
            p50: Some(p50),
            sample_size: u32::try_from(stats.sample_size).ok(),
            reason,
            variance_percent: None,
            triggering_price: None,
            comparison,
            auto_generated: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{context, days_ago, observe};
    use crate::store::{CatalogStore, InMemoryCatalogStore};
    use std::sync::Arc;
    use vouch_core::ProposalStatus;

    fn seeded(yaml: &str) -> Arc<InMemoryCatalogStore> {
        Arc::new(InMemoryCatalogStore::from_yaml(yaml).unwrap())
    }

    async fn filed(store: &InMemoryCatalogStore) -> Vec<PriceRangeAdjust> {
        store
            .proposals(Some(ProposalStatus::Pending))
            .await
            .unwrap()
            .iter()
            .map(|p| match p.decode().unwrap() {
                ProposalPayload::PriceRangeAdjust(adjust) => adjust,
                other => panic!("unexpected proposal {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_new_item_gets_band_proposal() {
        let store = seeded("canonical_items: []");
        let now = Utc::now();
        let prices: Vec<f64> = (0..10).map(|i| 10.0 + 5.0 * i as f64).collect();
        observe(&store, "chair", &prices, days_ago(now, 3)).await;

        let report = RelearnJob::new(context(store.clone())).run_at(now).await.unwrap();
        assert_eq!(
            report,
            RelearnReport {
                scanned: 1,
                proposed: 1,
                skipped: 0,
                errors: 0
            }
        );

        let proposals = filed(&store).await;
        assert_eq!(proposals[0].new_range, (10.0, 55.0));
        assert_eq!(proposals[0].p50, Some(30.0));
        assert_eq!(proposals[0].sample_size, Some(10));
        assert_eq!(proposals[0].reason, NO_EXISTING_RANGE);
        assert!(store.price_ranges().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_band_within_tolerance_is_skipped() {
        let store = seeded(
            r#"
price_ranges:
  - canonical_item_id: "chair"
    min_price: 10.2
    max_price: 54.0
"#,
        );
        let now = Utc::now();
        let prices: Vec<f64> = (0..10).map(|i| 10.0 + 5.0 * i as f64).collect();
        observe(&store, "chair", &prices, days_ago(now, 3)).await;

        let report = RelearnJob::new(context(store.clone())).run_at(now).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.proposed, 0);
    }

    #[tokio::test]
    async fn test_drifted_band_carries_comparison() {
        let store = seeded(
            r#"
price_ranges:
  - canonical_item_id: "chair"
    min_price: 10.0
    max_price: 40.0
"#,
        );
        let now = Utc::now();
        let prices: Vec<f64> = (0..10).map(|i| 10.0 + 5.0 * i as f64).collect();
        observe(&store, "chair", &prices, days_ago(now, 3)).await;

        RelearnJob::new(context(store.clone())).run_at(now).await.unwrap();
        let proposals = filed(&store).await;
        let comparison = proposals[0].comparison.as_ref().unwrap();
        assert_eq!(comparison.min_delta_pct, 0.0);
        assert_eq!(comparison.max_delta_pct, 37.5);
        assert_eq!(proposals[0].old_range, Some((10.0, 40.0)));
    }

    #[tokio::test]
    async fn test_compares_against_latest_band_row() {
        let store = seeded(
            r#"
price_ranges:
  - canonical_item_id: "chair"
    min_price: 10.0
    max_price: 55.0
    updated_at: "2024-06-01T00:00:00Z"
  - canonical_item_id: "chair"
    min_price: 10.0
    max_price: 40.0
    updated_at: "2024-01-01T00:00:00Z"
"#,
        );
        let now = Utc::now();
        let prices: Vec<f64> = (0..10).map(|i| 10.0 + 5.0 * i as f64).collect();
        observe(&store, "chair", &prices, days_ago(now, 3)).await;

        let report = RelearnJob::new(context(store.clone())).run_at(now).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.proposed, 0);
        assert!(filed(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_sparse_and_stale_items_skipped() {
        let store = seeded("canonical_items: []");
        let now = Utc::now();
        observe(&store, "sparse", &[5.0, 6.0, 7.0], days_ago(now, 1)).await;
        observe(&store, "stale", &[5.0; 12], days_ago(now, 120)).await;

        let report = RelearnJob::new(context(store.clone())).run_at(now).await.unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.skipped, 1);
        assert!(filed(&store).await.is_empty());
    }
}
