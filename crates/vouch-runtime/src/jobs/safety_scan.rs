//! Nightly catalog integrity scan.
//!
//! Four checks, each filing proposals rather than fixing anything:
//! broken price bands, missing bands on busy items, synonyms pointing at
//! deleted items, and contradictory ALLOW/DENY rules on one scope.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use vouch_core::normalize::infer_canonical_name;
use vouch_core::proposals::{NewCanonical, PriceRangeAdjust, RuleConditions};
use vouch_core::rules::rule_proposal;
use vouch_core::stats::{group_prices, round_price, MIN_BAND_PRICE};
use vouch_core::{
    BusinessRule, CatalogSnapshot, PriceRange, ProposalPayload, RobustStats, RuleDecision,
};

use super::JobContext;
use crate::store::StoreError;

/// Default max for an inverted band with too little data to recompute.
const DEFAULT_MAX_PRICE: f64 = 100.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyScanReport {
    pub bands_fixed: usize,
    pub bands_missing: usize,
    pub orphans: usize,
    pub conflicts: usize,
    pub warnings: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct SafetyScanJob {
    context: JobContext,
    window: Duration,
    /// Observations needed before a fixed band trusts its own p5.
    min_fix_prices: usize,
    /// Recent uses that make a missing band worth proposing.
    busy_item_uses: usize,
    min_missing_prices: usize,
    orphan_confidence: f64,
}

impl SafetyScanJob {
    pub fn new(context: JobContext) -> Self {
        Self {
            context,
            window: Duration::days(90),
            min_fix_prices: 3,
            busy_item_uses: 20,
            min_missing_prices: 5,
            orphan_confidence: 0.8,
        }
    }

    pub async fn run(&self) -> Result<SafetyScanReport, StoreError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SafetyScanReport, StoreError> {
        let cutoff = now - self.window;
        self.context
            .events
            .log(None, None, "SAFETY_SCAN_START", json!({"cutoff": cutoff}))
            .await;

        let catalog = self.context.store.snapshot().await?;
        let observations = self.context.store.observations_since(cutoff).await?;
        let usage = group_prices(&observations);

        let mut report = SafetyScanReport::default();
        self.check_bands(&catalog, &usage, &mut report).await;
        self.check_missing_bands(&catalog, &usage, &mut report).await;
        self.check_orphans(&catalog, &mut report).await;
        self.check_conflicts(&catalog, &mut report).await;

        tracing::info!(
            bands_fixed = report.bands_fixed,
            bands_missing = report.bands_missing,
            orphans = report.orphans,
            conflicts = report.conflicts,
            warnings = report.warnings,
            errors = report.errors,
            "safety scan complete"
        );
        self.context
            .events
            .log(None, None, "SAFETY_SCAN_COMPLETE", json!(report))
            .await;
        Ok(report)
    }

    async fn check_bands(
        &self,
        catalog: &CatalogSnapshot,
        usage: &BTreeMap<String, Vec<f64>>,
        report: &mut SafetyScanReport,
    ) {
        for band in catalog.price_ranges() {
            let recent = usage.get(&band.canonical_item_id);
            let issue = if band.min_price >= band.max_price {
                format!(
                    "Invalid range: min ({}) >= max ({})",
                    band.min_price, band.max_price
                )
            } else if band.min_price == 0.0 && recent.is_some_and(|prices| !prices.is_empty()) {
                "Zero min_price with recent usage".to_string()
            } else {
                continue;
            };

            let payload = ProposalPayload::PriceRangeAdjust(self.band_fix(band, recent, issue));
            if self.context.propose("safety_scan", &band.canonical_item_id, payload).await {
                report.bands_fixed += 1;
            } else {
                report.errors += 1;
            }
        }
    }

    fn band_fix(&self, band: &PriceRange, recent: Option<&Vec<f64>>, issue: String) -> PriceRangeAdjust {
        let inverted = band.min_price >= band.max_price;
        let mut new_min = MIN_BAND_PRICE;
        let mut new_max = if band.max_price > 0.0 {
            band.max_price
        } else {
            DEFAULT_MAX_PRICE
        };

        let stats = recent
            .and_then(|prices| RobustStats::from_prices(prices))
            .filter(|stats| stats.sample_size >= self.min_fix_prices);
        if let Some(stats) = stats {
            new_min = round_price(stats.p5);
            if inverted || new_min > new_max {
                new_max = round_price(stats.p95);
            }
        }
        // Approval rejects min > max.
        let new_max = new_max.max(new_min);

        PriceRangeAdjust {
            canonical_item_id: band.canonical_item_id.clone(),
            old_range: Some(band.bounds()),
            new_range: (new_min, new_max),
            p50: None,
            sample_size: stats.and_then(|s| u32::try_from(s.sample_size).ok()),
            reason: issue,
            variance_percent: None,
            triggering_price: None,
            comparison: None,
            auto_generated: true,
        }
    }

    async fn check_missing_bands(
        &self,
        catalog: &CatalogSnapshot,
        usage: &BTreeMap<String, Vec<f64>>,
        report: &mut SafetyScanReport,
    ) {
        for (item_id, prices) in usage {
            if prices.len() < self.busy_item_uses || catalog.price_range(item_id).is_some() {
                continue;
            }
            let Some(stats) = RobustStats::from_prices(prices)
                .filter(|stats| stats.sample_size >= self.min_missing_prices)
            else {
                continue;
            };

            let payload = ProposalPayload::PriceRangeAdjust(PriceRangeAdjust {
                canonical_item_id: item_id.clone(),
                old_range: None,
                new_range: (round_price(stats.p5), round_price(stats.p95)),
                p50: Some(round_price(stats.p50)),
                sample_size: u32::try_from(stats.sample_size).ok(),
                reason: format!(
                    "Missing band for high-usage item ({} recent uses)",
                    prices.len()
                ),
                variance_percent: None,
                triggering_price: None,
                comparison: None,
                auto_generated: true,
            });
            if self.context.propose("safety_scan", item_id, payload).await {
                report.bands_missing += 1;
            } else {
                report.errors += 1;
            }
        }
    }

    async fn check_orphans(&self, catalog: &CatalogSnapshot, report: &mut SafetyScanReport) {
        for synonym in catalog.orphan_synonyms() {
            if synonym.confidence < self.orphan_confidence {
                tracing::warn!(synonym = %synonym.id, confidence = synonym.confidence, "low confidence orphan synonym");
                self.context
                    .events
                    .log(
                        None,
                        None,
                        "ORPHAN_SYNONYM_WARN",
                        json!({
                            "synonym_id": synonym.id,
                            "synonym": synonym.synonym,
                            "confidence": synonym.confidence,
                        }),
                    )
                    .await;
                report.warnings += 1;
                continue;
            }

            let payload = ProposalPayload::NewCanonical(NewCanonical {
                name: infer_canonical_name(&synonym.synonym),
                category: String::new(),
                description: format!(
                    "Orphan synonym with high confidence ({})",
                    synonym.confidence
                ),
                orphan_synonym_id: Some(synonym.id.clone()),
                confidence: Some(synonym.confidence),
                auto_generated: true,
            });
            if self.context.propose("safety_scan", &synonym.id, payload).await {
                report.orphans += 1;
            } else {
                report.errors += 1;
            }
        }
    }

    async fn check_conflicts(&self, catalog: &CatalogSnapshot, report: &mut SafetyScanReport) {
        let mut by_scope: BTreeMap<String, Vec<&BusinessRule>> = BTreeMap::new();
        for rule in catalog.rules() {
            by_scope.entry(rule.scope_key()).or_default().push(rule);
        }

        for (scope_key, rules) in by_scope {
            let decisions: HashSet<RuleDecision> = rules.iter().map(|r| r.decision).collect();
            if !(decisions.contains(&RuleDecision::Allow) && decisions.contains(&RuleDecision::Deny)) {
                continue;
            }

            let first = rules[0];
            let mut resolution = rule_proposal(
                "conflict_resolution",
                RuleConditions {
                    scope_type: first.scope_type,
                    scope_value: first.scope_value.clone(),
                    max_quantity: None,
                },
                RuleDecision::Deny,
                format!(
                    "Contradictory ALLOW/DENY rules for scope {}; consolidate with priority order",
                    scope_key
                ),
            );
            resolution.proposed_by = "safety_scan".to_string();
            resolution.supersedes = rules.iter().map(|r| r.id.clone()).collect();

            if self
                .context
                .propose("safety_scan", &scope_key, ProposalPayload::NewRule(resolution))
                .await
            {
                report.conflicts += 1;
            } else {
                report.errors += 1;
            }
        }
    }
}
