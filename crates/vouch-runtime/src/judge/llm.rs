//! Explanation scoring with an optional LLM.

use std::sync::Arc;

use serde_json::json;

use vouch_core::judge::explanation::blend;
use vouch_core::judge::{heuristic_score, parse_llm_score};

use crate::completion::TextCompletionPort;
use crate::config::JudgeMode;
use crate::prompts::{explanation_prompt, JUDGE_MAX_TOKENS, JUDGE_TEMPERATURE};
use crate::store::EventLog;

/// Scores reason text per [`JudgeMode`].
///
/// Whatever goes wrong on the LLM side, the heuristic score is returned.
#[derive(Clone)]
pub struct ExplanationScorer {
    mode: JudgeMode,
    completion: Option<Arc<dyn TextCompletionPort>>,
    events: EventLog,
}

impl ExplanationScorer {
    pub fn new(
        mode: JudgeMode,
        completion: Option<Arc<dyn TextCompletionPort>>,
        events: EventLog,
    ) -> Self {
        Self {
            mode,
            completion,
            events,
        }
    }

    pub fn mode(&self) -> JudgeMode {
        self.mode
    }

    pub async fn score(
        &self,
        invoice_id: &str,
        line_item_id: &str,
        text: &str,
        policy_codes: &[String],
    ) -> f64 {
        let heuristic = heuristic_score(text, policy_codes);
        if !self.mode.uses_llm() {
            return heuristic;
        }

        let Some(completion) = &self.completion else {
            self.unavailable(invoice_id, line_item_id, "no_provider").await;
            return heuristic;
        };

        let prompt = explanation_prompt(text, policy_codes);
        let Some(reply) = completion
            .complete(&prompt, Some("judge"), JUDGE_TEMPERATURE, JUDGE_MAX_TOKENS)
            .await
        else {
            self.unavailable(invoice_id, line_item_id, "no_response").await;
            return heuristic;
        };

        match parse_llm_score(&reply) {
            Some(llm) if self.mode == JudgeMode::Blended => blend(heuristic, llm),
            Some(llm) => llm,
            None => {
                tracing::warn!(item = %line_item_id, "unparsable judge reply, using heuristic");
                self.events
                    .log(
                        Some(invoice_id),
                        Some(line_item_id),
                        "LLM_SCORE_ERROR",
                        json!({"reply_length": reply.chars().count(), "fallback": "heuristic"}),
                    )
                    .await;
                heuristic
            }
        }
    }

    async fn unavailable(&self, invoice_id: &str, line_item_id: &str, reason: &str) {
        tracing::debug!(item = %line_item_id, reason, "LLM judge unavailable, using heuristic");
        self.events
            .log(
                Some(invoice_id),
                Some(line_item_id),
                "LLM_UNAVAILABLE",
                json!({"reason": reason, "fallback": "heuristic"}),
            )
            .await;
    }
}

impl std::fmt::Debug for ExplanationScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplanationScorer")
            .field("mode", &self.mode)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}
