//! Price-band validation.
//!
//! A missing canonical item or a missing band both validate as `true`: the
//! rule engine penalizes those cases separately, and the result carries
//! enough context (`expected_range == None`) to tell them apart from a price
//! that really sits inside its band.

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSnapshot;
use crate::proposals::PriceRangeAdjust;

/// Variance above which a range adjustment is proposed.
pub const VARIANCE_THRESHOLD: f64 = 0.20;

/// Safety margin applied to the violated bound.
pub const ADJUST_BUFFER: f64 = 0.05;

/// Smallest denominator used in relative distances.
const MIN_DENOMINATOR: f64 = 0.01;

/// Why a price was not checked against a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceCheck {
    NoCanonical,
    NoRangeData,
    Checked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceValidationResult {
    pub is_valid: bool,
    pub check: PriceCheck,
    pub canonical_item_id: Option<String>,
    pub unit_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_range: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
}

/// Validation result plus the adjustment the caller should file, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceOutcome {
    pub result: PriceValidationResult,
    pub adjust_proposal: Option<PriceRangeAdjust>,
}

/// Relative distance of `price` outside `[min, max]`, 0 inside.
pub fn variance(price: f64, min: f64, max: f64) -> f64 {
    if price < min {
        (min - price) / min.max(MIN_DENOMINATOR)
    } else if price > max {
        (price - max) / max.max(MIN_DENOMINATOR)
    } else {
        0.0
    }
}

/// Widen an observed band by 10% on each side.
pub fn suggest_price_range(observed_min: f64, observed_max: f64) -> (f64, f64) {
    (observed_min * 0.9, observed_max * 1.1)
}

#[derive(Debug, Clone)]
pub struct PriceValidator {
    variance_threshold: f64,
    buffer: f64,
}

impl Default for PriceValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceValidator {
    pub fn new() -> Self {
        Self {
            variance_threshold: VARIANCE_THRESHOLD,
            buffer: ADJUST_BUFFER,
        }
    }

    pub fn validate(
        &self,
        catalog: &CatalogSnapshot,
        canonical_item_id: Option<&str>,
        unit_price: f64,
    ) -> PriceOutcome {
        let mut result = PriceValidationResult {
            is_valid: true,
            check: PriceCheck::NoCanonical,
            canonical_item_id: canonical_item_id.map(str::to_string),
            unit_price,
            expected_range: None,
            variance_percent: None,
            proposal_id: None,
        };

        let Some(item_id) = canonical_item_id else {
            return PriceOutcome {
                result,
                adjust_proposal: None,
            };
        };

        let Some(range) = catalog.price_range(item_id) else {
            result.check = PriceCheck::NoRangeData;
            return PriceOutcome {
                result,
                adjust_proposal: None,
            };
        };

        let (min, max) = range.bounds();
        let variance = variance(unit_price, min, max);

        result.check = PriceCheck::Checked;
        result.is_valid = range.contains(unit_price);
        result.expected_range = Some((min, max));
        result.variance_percent = Some(variance);

        let adjust_proposal = (variance > self.variance_threshold).then(|| {
            let (new_range, reason) = if unit_price < min {
                (
                    (unit_price * (1.0 - self.buffer), max),
                    format!("Price {:.2} below current min {:.2}", unit_price, min),
                )
            } else {
                (
                    (min, unit_price * (1.0 + self.buffer)),
                    format!("Price {:.2} above current max {:.2}", unit_price, max),
                )
            };
            PriceRangeAdjust {
                canonical_item_id: item_id.to_string(),
                old_range: Some((min, max)),
                new_range,
                p50: None,
                sample_size: None,
                reason,
                variance_percent: Some(variance),
                triggering_price: Some(unit_price),
                comparison: None,
                auto_generated: false,
            }
        });

        PriceOutcome {
            result,
            adjust_proposal,
        }
    }
}
