//! Scheduled maintenance jobs.
//!
//! Jobs read recent price observations and the catalog, then file
//! proposals. None of them writes to the catalog directly; every change
//! still goes through human approval.

mod bootstrap;
mod relearn;
mod safety_scan;

pub use bootstrap::{BootstrapJob, BootstrapReport};
pub use relearn::{RelearnJob, RelearnReport};
pub use safety_scan::{SafetyScanJob, SafetyScanReport};

use std::sync::Arc;

use vouch_core::stats::MIN_BAND_PRICE;
use vouch_core::ProposalPayload;

use crate::orchestrator::Pipeline;
use crate::proposals::ProposalService;
use crate::store::{CatalogStore, EventLog};

/// What every job needs: the store to read, a proposal sink and the event log.
#[derive(Clone)]
pub struct JobContext {
    store: Arc<dyn CatalogStore>,
    proposals: Arc<ProposalService>,
    events: EventLog,
}

impl JobContext {
    pub fn new(store: Arc<dyn CatalogStore>, proposals: Arc<ProposalService>, events: EventLog) -> Self {
        Self {
            store,
            proposals,
            events,
        }
    }

    /// Share the pipeline's store, proposal service and event log.
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self::new(pipeline.store(), pipeline.proposals(), pipeline.events().clone())
    }

    /// File one proposal. Failures are logged and reported as `false`.
    async fn propose(&self, job: &str, subject: &str, payload: ProposalPayload) -> bool {
        match self.proposals.create(&payload, None, None).await {
            Ok(id) => {
                tracing::debug!(job, subject, proposal = %id, "proposal filed");
                true
            }
            Err(e) => {
                tracing::warn!(job, subject, error = %e, "failed to file proposal");
                false
            }
        }
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext").finish_non_exhaustive()
    }
}

/// `|new - current| / max(current, 0.01)`.
fn relative_delta(new: f64, current: f64) -> f64 {
    (new - current).abs() / current.max(MIN_BAND_PRICE)
}

/// Percentage rounded to two decimals, for proposal payloads.
fn percent(fraction: f64) -> f64 {
    (fraction * 10_000.0).round() / 100.0
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cache::CatalogCache;
    use crate::config::PipelineConfig;
    use crate::store::InMemoryCatalogStore;
    use chrono::{DateTime, Duration, Utc};
    use vouch_core::PriceObservation;

    /// Live-mode context over `store`, so filed proposals are persisted.
    pub(crate) fn context(store: Arc<InMemoryCatalogStore>) -> JobContext {
        let events = EventLog::new(store.clone());
        let cache = Arc::new(CatalogCache::new(store.clone(), std::time::Duration::from_secs(300)));
        let config = Arc::new(PipelineConfig {
            dry_run: false,
            ..PipelineConfig::default()
        });
        let proposals = Arc::new(ProposalService::new(store.clone(), events.clone(), cache, config));
        JobContext::new(store, proposals, events)
    }

    pub(crate) async fn observe(store: &InMemoryCatalogStore, item: &str, prices: &[f64], at: DateTime<Utc>) {
        for price in prices {
            store
                .record_observation(PriceObservation {
                    canonical_item_id: item.to_string(),
                    unit_price: *price,
                    observed_at: at,
                })
                .await
                .unwrap();
        }
    }

    pub(crate) fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
        now - Duration::days(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_delta_guards_zero() {
        assert!((relative_delta(10.5, 10.0) - 0.05).abs() < 1e-9);
        assert!((relative_delta(1.0, 0.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0.123456), 12.35);
    }
}
