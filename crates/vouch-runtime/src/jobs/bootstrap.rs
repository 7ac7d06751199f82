//! Seed price bands from historical observations.
//!
//! Bands are padded 10% beyond the observed p5/p95. Existing bands are only
//! revisited when a bound would move by more than 20%.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use vouch_core::catalog::latest_ranges;
use vouch_core::proposals::{BandComparison, PriceRangeAdjust};
use vouch_core::stats::{group_prices, round_price, MIN_BAND_PRICE};
use vouch_core::{PriceRange, ProposalPayload, RobustStats};

use super::{percent, relative_delta, JobContext};
use crate::store::StoreError;

const LOWER_PADDING: f64 = 0.9;
const UPPER_PADDING: f64 = 1.1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub processed: usize,
    pub proposals: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct BootstrapJob {
    context: JobContext,
    window: Duration,
    min_prices: usize,
    change_threshold: f64,
}

impl BootstrapJob {
    pub fn new(context: JobContext) -> Self {
        Self {
            context,
            window: Duration::days(180),
            min_prices: 3,
            change_threshold: 0.20,
        }
    }

    pub async fn run(&self) -> Result<BootstrapReport, StoreError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<BootstrapReport, StoreError> {
        let observations = self.context.store.observations_since(now - self.window).await?;
        let ranges = latest_ranges(self.context.store.price_ranges().await?);

        let mut report = BootstrapReport::default();
        for (item_id, prices) in group_prices(&observations) {
            report.processed += 1;

            let stats = match RobustStats::from_prices(&prices) {
                Some(stats) if stats.sample_size >= self.min_prices => stats,
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
                .propose("bootstrap", &item_id, ProposalPayload::PriceRangeAdjust(adjust))
                .await
            {
                report.proposals += 1;
            } else {
                report.errors += 1;
            }
        }

        tracing::info!(
            processed = report.processed,
            proposals = report.proposals,
            skipped = report.skipped,
            errors = report.errors,
            "bootstrap complete"
        );
        self.context
            .events
            .log(None, None, "BOOTSTRAP_COMPLETE", json!(report))
            .await;
        Ok(report)
    }

    fn proposal(
        &self,
        item_id: &str,
        stats: &RobustStats,
        current: Option<&PriceRange>,
    ) -> Option<PriceRangeAdjust> {
        let min_price = round_price((stats.p5 * LOWER_PADDING).max(MIN_BAND_PRICE));
        let max_price = round_price(stats.p95 * UPPER_PADDING);

        let comparison = match current {
            None => None,
            Some(range) => {
                let min_delta = relative_delta(min_price, range.min_price);
                let max_delta = relative_delta(max_price, range.max_price);
                if min_delta <= self.change_threshold && max_delta <= self.change_threshold {
                    return None;
                }
                Some(BandComparison {
                    current_min: range.min_price,
                    current_max: range.max_price,
                    min_delta_pct: percent(min_delta),
                    max_delta_pct: percent(max_delta),
                })
            }
        };

        Some(PriceRangeAdjust {
            canonical_item_id: item_id.to_string(),
            old_range: current.map(PriceRange::bounds),
            new_range: (min_price, max_price),
            p50: Some(round_price(stats.p50)),
            sample_size: u32::try_from(stats.sample_size).ok(),
            reason: format!("Bootstrap from {} historical prices", stats.sample_size),
            variance_percent: None,
            triggering_price: None,
            comparison,
            auto_generated: true,
        })
    }
}
