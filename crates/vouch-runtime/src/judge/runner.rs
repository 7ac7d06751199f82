//! Post-decision judging of line-item decisions.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use vouch_core::judge::deterministic::DecisionView;
use vouch_core::judge::{self, ExpectedOutcome, POST_DECISION_STAGE};
use vouch_core::{
    fingerprint, DeterministicJudge, Judgement, JudgementSummary, LineItem, LineItemDecision,
    PriceRange,
};

use crate::store::{CatalogStore, EventLog, StoreError};

use super::ExplanationScorer;

/// One decided item, as handed to the judge.
#[derive(Debug, Clone, Copy)]
pub struct JudgeInput<'a> {
    pub invoice_id: &'a str,
    pub vendor_id: &'a str,
    pub item: &'a LineItem,
    pub decision: &'a LineItemDecision,
    pub band: Option<&'a PriceRange>,
}

pub struct JudgeRunner {
    store: Arc<dyn CatalogStore>,
    events: EventLog,
    scorer: ExplanationScorer,
    deterministic: DeterministicJudge,
}

impl JudgeRunner {
    pub fn new(store: Arc<dyn CatalogStore>, events: EventLog, scorer: ExplanationScorer) -> Self {
        Self {
            store,
            events,
            scorer,
            deterministic: DeterministicJudge::new(),
        }
    }

    /// Score, persist and return the judgement for one decision.
    pub async fn judge(&self, input: &JudgeInput<'_>) -> Result<Judgement, StoreError> {
        let key = fingerprint(&input.item.description, input.vendor_id);
        let gold = self.store.gold_label(&key).await?;

        let view = DecisionView {
            decision: input.decision.decision,
            canonical_item_id: input.decision.canonical_item_id.as_deref(),
            policy_codes: &input.decision.policy_codes,
            unit_price: input.item.unit_price,
        };
        let mut scores = self.deterministic.score(&view, gold.as_ref(), input.band);

        if !input.decision.reasons.is_empty() {
            let text = input.decision.reasons.join(" ");
            scores.reason_quality = Some(
                self.scorer
                    .score(
                        input.invoice_id,
                        &input.item.id,
                        &text,
                        &input.decision.policy_codes,
                    )
                    .await,
            );
        }

        let verdict = judge::verdict(&scores);
        let judgement = Judgement {
            invoice_id: input.invoice_id.to_string(),
            line_item_id: input.item.id.clone(),
            stage: POST_DECISION_STAGE.to_string(),
            comments: judge::comments(&scores, verdict, gold.is_some()),
            expected: gold.as_ref().map(ExpectedOutcome::from),
            scores,
            verdict,
            created_at: Utc::now(),
        };

        self.store.insert_judgement(judgement.clone()).await?;
        tracing::debug!(
            item = %judgement.line_item_id,
            verdict = judgement.verdict.as_str(),
            has_gold = gold.is_some(),
            "item judged"
        );
        Ok(judgement)
    }

    /// Like [`judge`](Self::judge) but never fails the item: errors are
    /// logged as `JUDGE_ERROR` and the judgement is omitted.
    pub async fn judge_or_skip(&self, input: &JudgeInput<'_>) -> Option<JudgementSummary> {
        match self.judge(input).await {
            Ok(judgement) => Some(judgement.summary()),
            Err(e) => {
                tracing::warn!(item = %input.item.id, error = %e, "judge failed");
                self.events
                    .log(
                        Some(input.invoice_id),
                        Some(&input.item.id),
                        "JUDGE_ERROR",
                        json!({"error": e.to_string()}),
                    )
                    .await;
                None
            }
        }
    }
}

impl std::fmt::Debug for JudgeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JudgeRunner")
            .field("scorer", &self.scorer)
            .finish_non_exhaustive()
    }
}
