//! Offline evaluation metrics against gold labels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Decision;

/// Precision, recall and F1 for one label (or their macro average).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroF1 {
    #[serde(flatten)]
    pub macro_avg: LabelScores,
    pub per_label: BTreeMap<String, LabelScores>,
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Macro-averaged scores over the three decisions.
///
/// Empty or length-mismatched inputs score all zeros.
pub fn macro_f1(y_true: &[Decision], y_pred: &[Decision]) -> MacroF1 {
    if y_true.is_empty() || y_true.len() != y_pred.len() {
        return MacroF1::default();
    }

    let mut per_label = BTreeMap::new();
    let mut sum = LabelScores::default();

    for label in Decision::ALL {
        let pairs = || y_true.iter().zip(y_pred.iter());
        let tp = pairs().filter(|(t, p)| **t == label && **p == label).count() as f64;
        let fp = pairs().filter(|(t, p)| **t != label && **p == label).count() as f64;
        let fn_ = pairs().filter(|(t, p)| **t == label && **p != label).count() as f64;

        let precision = safe_div(tp, tp + fp);
        let recall = safe_div(tp, tp + fn_);
        let f1 = safe_div(2.0 * precision * recall, precision + recall);

        sum.precision += precision;
        sum.recall += recall;
        sum.f1 += f1;
        per_label.insert(
            label.as_str().to_string(),
            LabelScores {
                precision,
                recall,
                f1,
            },
        );
    }

    let n = Decision::ALL.len() as f64;
    MacroF1 {
        macro_avg: LabelScores {
            precision: sum.precision / n,
            recall: sum.recall / n,
            f1: sum.f1 / n,
        },
        per_label,
    }
}

/// Whether `gold` is among the first `k` candidates. `None` without data.
pub fn hit_at_k(gold: Option<&str>, candidates: Option<&[String]>, k: usize) -> Option<bool> {
    let gold = gold.filter(|g| !g.is_empty())?;
    let candidates = candidates.filter(|c| !c.is_empty())?;
    Some(candidates.iter().take(k).any(|c| c == gold))
}

/// Reciprocal rank of `gold`, 0 when absent. `None` without data.
pub fn mrr(gold: Option<&str>, candidates: Option<&[String]>) -> Option<f64> {
    let gold = gold.filter(|g| !g.is_empty())?;
    let candidates = candidates.filter(|c| !c.is_empty())?;
    Some(
        candidates
            .iter()
            .position(|c| c == gold)
            .map_or(0.0, |rank| 1.0 / (rank + 1) as f64),
    )
}

/// One labelled prediction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalCase {
    pub line_id: String,
    pub gold_decision: Decision,
    pub pred_decision: Decision,
    #[serde(default)]
    pub gold_item_id: Option<String>,
    #[serde(default)]
    pub pred_item_id: Option<String>,
    /// Ranked candidate ids, best first.
    #[serde(default)]
    pub candidates: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub cases: usize,
    pub policy_accuracy: f64,
    pub macro_f1: MacroF1,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_at_1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_at_3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_at_5: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_reciprocal_rank: Option<f64>,
    /// Cases whose predicted item equals the gold item.
    pub item_accuracy: f64,
}

fn mean<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

impl EvalReport {
    pub fn from_cases(cases: &[EvalCase]) -> Self {
        let y_true: Vec<Decision> = cases.iter().map(|c| c.gold_decision).collect();
        let y_pred: Vec<Decision> = cases.iter().map(|c| c.pred_decision).collect();

        let ratio = |hits: usize| safe_div(hits as f64, cases.len() as f64);
        let policy_hits = cases.iter().filter(|c| c.gold_decision == c.pred_decision).count();
        let item_hits = cases.iter().filter(|c| c.gold_item_id == c.pred_item_id).count();

        let hit_rate = |k: usize| {
            mean(cases.iter().filter_map(|c| {
                hit_at_k(c.gold_item_id.as_deref(), c.candidates.as_deref(), k)
                    .map(|hit| if hit { 1.0 } else { 0.0 })
            }))
        };

        Self {
            cases: cases.len(),
            policy_accuracy: ratio(policy_hits),
            macro_f1: macro_f1(&y_true, &y_pred),
            hit_at_1: hit_rate(1),
            hit_at_3: hit_rate(3),
            hit_at_5: hit_rate(5),
            mean_reciprocal_rank: mean(
                cases
                    .iter()
                    .filter_map(|c| mrr(c.gold_item_id.as_deref(), c.candidates.as_deref())),
            ),
            item_accuracy: ratio(item_hits),
        }
    }
}
