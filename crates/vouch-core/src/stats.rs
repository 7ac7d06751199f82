//! Price statistics and invoice-level counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::judge::Verdict;
use crate::types::{Decision, LineItemDecision, MatchType};

/// Smallest price a band may carry.
pub const MIN_BAND_PRICE: f64 = 0.01;

/// Largest price a band may carry.
pub const MAX_BAND_PRICE: f64 = 999_999.99;

/// Nearest-rank percentile over sorted values.
///
/// Index is `ceil(p * n) - 1`, clamped to the slice, matching a discrete
/// percentile: the result is always one of the inputs.
pub fn percentile_disc(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = (p.clamp(0.0, 1.0) * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    Some(sorted[idx])
}

/// Clamp to the storable range and round to cents.
pub fn round_price(value: f64) -> f64 {
    let clamped = value.clamp(MIN_BAND_PRICE, MAX_BAND_PRICE);
    (clamped * 100.0).round() / 100.0
}

/// Percentile summary of positive prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobustStats {
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
    pub sample_size: usize,
}

impl RobustStats {
    /// Stats over the finite positive prices, `None` if there are none.
    pub fn from_prices(prices: &[f64]) -> Option<Self> {
        let mut values: Vec<f64> = prices
            .iter()
            .copied()
            .filter(|p| p.is_finite() && *p > 0.0)
            .collect();
        values.sort_by(f64::total_cmp);

        Some(Self {
            p5: percentile_disc(&values, 0.05)?,
            p50: percentile_disc(&values, 0.50)?,
            p95: percentile_disc(&values, 0.95)?,
            sample_size: values.len(),
        })
    }
}

/// Decision counts keyed by wire name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    #[serde(rename = "ALLOW")]
    pub allow: usize,
    #[serde(rename = "DENY")]
    pub deny: usize,
    #[serde(rename = "NEEDS_MORE_INFO")]
    pub needs_more_info: usize,
}

impl DecisionCounts {
    pub fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Allow => self.allow += 1,
            Decision::Deny => self.deny += 1,
            Decision::NeedsMoreInfo => self.needs_more_info += 1,
        }
    }
}

/// Verdict counts keyed by wire name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    #[serde(rename = "PASS")]
    pub pass: usize,
    #[serde(rename = "WARN")]
    pub warn: usize,
    #[serde(rename = "FAIL")]
    pub fail: usize,
}

/// Invoice-level summary returned with every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_items: usize,
    pub matched_items: usize,
    pub match_rate: f64,
    pub avg_match_confidence: f64,
    pub decisions: DecisionCounts,
    pub approval_rate: f64,
    pub agent_enabled: bool,
    pub judged_items: usize,
    pub verdicts: VerdictCounts,
}

impl PipelineStats {
    /// Summarize decisions. Ratios are 0 for an empty invoice.
    pub fn from_decisions<'a, I>(decisions: I, agent_enabled: bool) -> Self
    where
        I: IntoIterator<Item = &'a LineItemDecision>,
    {
        let mut total = 0usize;
        let mut matched = 0usize;
        let mut confidence_sum = 0.0;
        let mut counts = DecisionCounts::default();
        let mut verdicts = VerdictCounts::default();
        let mut judged = 0usize;

        for decision in decisions {
            total += 1;
            counts.record(decision.decision);
            if decision.canonical_item_id.is_some() && decision.match_type != MatchType::NoMatch {
                matched += 1;
                confidence_sum += decision.match_confidence;
            }
            if let Some(judgement) = &decision.judgement {
                judged += 1;
                match judgement.verdict {
                    Verdict::Pass => verdicts.pass += 1,
                    Verdict::Warn => verdicts.warn += 1,
                    Verdict::Fail => verdicts.fail += 1,
                }
            }
        }

        let ratio = |num: usize| if total == 0 { 0.0 } else { num as f64 / total as f64 };

        Self {
            total_items: total,
            matched_items: matched,
            match_rate: ratio(matched),
            avg_match_confidence: if matched == 0 {
                0.0
            } else {
                confidence_sum / matched as f64
            },
            decisions: counts,
            approval_rate: ratio(counts.allow),
            agent_enabled,
            judged_items: judged,
            verdicts,
        }
    }
}

/// Group observed prices by canonical item.
pub fn group_prices<'a, I>(observations: I) -> BTreeMap<String, Vec<f64>>
where
    I: IntoIterator<Item = &'a crate::types::PriceObservation>,
{
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for obs in observations {
        grouped
            .entry(obs.canonical_item_id.clone())
            .or_default()
            .push(obs.unit_price);
    }
    grouped
}
