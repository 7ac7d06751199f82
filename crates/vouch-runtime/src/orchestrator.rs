//! Invoice pipeline orchestrator.
//!
//! Line items fan out concurrently; within one item the stages run in order:
//!
//! ```text
//! snapshot ──► match ──► price ──► rules ──► file proposals ──► judge
//! ```
//!
//! An item that fails never takes its siblings down. It gets a
//! `NEEDS_MORE_INFO` decision carrying `INVALID_LINE_ITEM` or
//! `INTERNAL_ERROR` instead. A proposal that cannot be filed is logged and
//! dropped; the item keeps its decision.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use vouch_core::{
    dedupe_ids, evaluate_item, fallback_decision, InvoiceRequest, ItemEvaluation, ItemInput,
    LineItem, LineItemDecision, MatchType, PipelineStats, PolicyCode, PriceObservation,
    ProposalPayload, RequestError, Suggestion,
};

use crate::cache::CatalogCache;
use crate::completion::TextCompletionPort;
use crate::config::{ConfigError, PipelineConfig};
use crate::judge::{ExplanationScorer, JudgeInput, JudgeRunner};
use crate::proposals::{ProposalError, ProposalService};
use crate::store::{CatalogStore, EventLog, StoreError};

/// Errors from the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Catalog store not configured")]
    StoreNotConfigured,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Proposal(#[from] ProposalError),
}

/// Decisions for one invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceResult {
    pub invoice_id: String,
    /// Keyed by line-item id.
    pub decisions: BTreeMap<String, LineItemDecision>,
    pub pipeline_stats: PipelineStats,
    pub dry_run: bool,
}

/// Caller-visible failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl ToString, invoice_id: Option<&str>) -> Self {
        Self {
            error: error.to_string(),
            invoice_id: invoice_id.map(str::to_string),
        }
    }
}

/// The invoice decision pipeline.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: Arc<dyn CatalogStore>,
    cache: Arc<CatalogCache>,
    events: EventLog,
    proposals: Arc<ProposalService>,
    judge: Option<JudgeRunner>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        Arc::clone(&self.store)
    }

    pub fn cache(&self) -> Arc<CatalogCache> {
        Arc::clone(&self.cache)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn proposals(&self) -> Arc<ProposalService> {
        Arc::clone(&self.proposals)
    }

    /// Decide every line item of an invoice.
    ///
    /// Every submitted item gets exactly one decision. A repeated id is
    /// decided as `INVALID_LINE_ITEM` under a fresh key.
    pub async fn run(&self, invoice_id: &str, vendor_id: &str, items: Vec<ItemInput>) -> InvoiceResult {
        let items = dedupe_ids(items);
        self.events
            .log(
                Some(invoice_id),
                None,
                "PIPELINE_START",
                json!({
                    "vendor_id": vendor_id,
                    "item_count": items.len(),
                    "dry_run": self.config.dry_run,
                    "agent_enabled": self.config.agent_enabled,
                }),
            )
            .await;

        let decided: Vec<(String, LineItemDecision)> = if self.config.agent_enabled {
            join_all(items.iter().map(|input| async move {
                let decision = self.process_item(invoice_id, vendor_id, input).await;
                (input.id().to_string(), decision)
            }))
            .await
        } else {
            tracing::info!(invoice = %invoice_id, "agent disabled, deferring all items");
            items
                .iter()
                .map(|input| {
                    (
                        input.id().to_string(),
                        fallback_decision(PolicyCode::AgentDisabled, None),
                    )
                })
                .collect()
        };

        let decisions: BTreeMap<String, LineItemDecision> = decided.into_iter().collect();
        let pipeline_stats = PipelineStats::from_decisions(decisions.values(), self.config.agent_enabled);

        tracing::info!(
            invoice = %invoice_id,
            items = pipeline_stats.total_items,
            allowed = pipeline_stats.decisions.allow,
            denied = pipeline_stats.decisions.deny,
            review = pipeline_stats.decisions.needs_more_info,
            "invoice decided"
        );
        self.events
            .log(
                Some(invoice_id),
                None,
                "PIPELINE_COMPLETE",
                json!({"pipeline_stats": pipeline_stats}),
            )
            .await;

        InvoiceResult {
            invoice_id: invoice_id.to_string(),
            decisions,
            pipeline_stats,
            dry_run: self.config.dry_run,
        }
    }

    /// Validate a raw JSON request against the embedded schema, then run it.
    pub async fn run_json(&self, input: &str) -> Result<InvoiceResult, PipelineError> {
        let request = InvoiceRequest::from_json(input)?;
        Ok(self
            .run(&request.invoice_id, &request.vendor_id, request.items)
            .await)
    }

    /// Top catalog candidates for a free-text query.
    pub async fn suggest(&self, query: &str, k: usize) -> Result<Vec<Suggestion>, StoreError> {
        let catalog = self.cache.snapshot().await?;
        Ok(vouch_core::Matcher::new().suggest(&catalog, query, k))
    }

    async fn process_item(&self, invoice_id: &str, vendor_id: &str, input: &ItemInput) -> LineItemDecision {
        let item = match input {
            ItemInput::Valid(item) => match item.check() {
                Ok(()) => item,
                Err(reason) => return self.reject(invoice_id, &item.id, &reason).await,
            },
            ItemInput::Invalid { id, reason } => return self.reject(invoice_id, id, reason).await,
        };

        match self.decide(invoice_id, vendor_id, item).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(item = %item.id, error = %e, "line item failed");
                self.events
                    .log(
                        Some(invoice_id),
                        Some(&item.id),
                        "ITEM_ERROR",
                        json!({"error": e.to_string()}),
                    )
                    .await;
                fallback_decision(PolicyCode::InternalError, None)
            }
        }
    }

    async fn reject(&self, invoice_id: &str, line_item_id: &str, reason: &str) -> LineItemDecision {
        tracing::warn!(item = %line_item_id, reason = %reason, "invalid line item");
        self.events
            .log(
                Some(invoice_id),
                Some(line_item_id),
                "INVALID_LINE_ITEM",
                json!({"reason": reason}),
            )
            .await;
        fallback_decision(PolicyCode::InvalidLineItem, Some(reason.to_string()))
    }

    async fn decide(
        &self,
        invoice_id: &str,
        vendor_id: &str,
        item: &LineItem,
    ) -> Result<LineItemDecision, PipelineError> {
        let catalog = self.cache.snapshot().await?;
        self.events
            .log(
                Some(invoice_id),
                Some(&item.id),
                "MATCHING_START",
                json!({"description": item.description}),
            )
            .await;

        let mut evaluation = evaluate_item(&catalog, vendor_id, item);
        let proposal_ids = self.file_proposals(invoice_id, &item.id, &mut evaluation).await;
        self.log_stages(invoice_id, &item.id, &evaluation).await;

        if let Some(canonical_item_id) = &evaluation.matched.result.canonical_item_id {
            self.observe(canonical_item_id, item).await;
        }

        let mut decision = evaluation.to_decision(proposal_ids);
        if let Some(judge) = &self.judge {
            let band = decision
                .canonical_item_id
                .as_deref()
                .and_then(|id| catalog.price_range(id));
            decision.judgement = judge
                .judge_or_skip(&JudgeInput {
                    invoice_id,
                    vendor_id,
                    item,
                    decision: &decision,
                    band,
                })
                .await;
        }

        tracing::debug!(
            item = %item.id,
            decision = %decision.decision,
            match_type = %decision.match_type,
            "item decided"
        );
        Ok(decision)
    }

    /// File the proposals the stages raised, synonym first. Returns the ids
    /// that were filed; a failed write is logged and left out.
    async fn file_proposals(
        &self,
        invoice_id: &str,
        line_item_id: &str,
        evaluation: &mut ItemEvaluation,
    ) -> Vec<String> {
        let mut ids = Vec::new();
        if let Some(synonym) = evaluation.matched.synonym_proposal.clone() {
            let payload = ProposalPayload::NewSynonym(synonym);
            if let Some(id) = self.file_proposal(invoice_id, line_item_id, &payload).await {
                evaluation.matched.result.proposal_id = Some(id.clone());
                ids.push(id);
            }
        }
        if let Some(adjust) = evaluation.price.adjust_proposal.clone() {
            let payload = ProposalPayload::PriceRangeAdjust(adjust);
            if let Some(id) = self.file_proposal(invoice_id, line_item_id, &payload).await {
                evaluation.price.result.proposal_id = Some(id.clone());
                ids.push(id);
            }
        }
        ids
    }

    async fn file_proposal(
        &self,
        invoice_id: &str,
        line_item_id: &str,
        payload: &ProposalPayload,
    ) -> Option<String> {
        match self
            .proposals
            .create(payload, Some(invoice_id), Some(line_item_id))
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                let proposal_type = payload.proposal_type();
                tracing::warn!(
                    item = %line_item_id,
                    proposal_type = %proposal_type,
                    error = %e,
                    "failed to file proposal"
                );
                self.events
                    .log(
                        Some(invoice_id),
                        Some(line_item_id),
                        "PROPOSAL_ERROR",
                        json!({
                            "proposal_type": proposal_type.to_string(),
                            "error": e.to_string(),
                        }),
                    )
                    .await;
                None
            }
        }
    }

    async fn log_stages(&self, invoice_id: &str, line_item_id: &str, evaluation: &ItemEvaluation) {
        let matched = &evaluation.matched.result;
        let match_stage = match matched.match_type {
            MatchType::Exact => "MATCH_EXACT",
            MatchType::Synonym => "MATCH_SYNONYM",
            MatchType::Fuzzy => "MATCH_FUZZY",
            MatchType::NoMatch => "MATCH_NONE",
        };
        self.events
            .log(
                Some(invoice_id),
                Some(line_item_id),
                match_stage,
                json!({
                    "canonical_item_id": matched.canonical_item_id,
                    "confidence": matched.confidence,
                    "proposal_id": matched.proposal_id,
                }),
            )
            .await;

        let price = &evaluation.price.result;
        self.events
            .log(
                Some(invoice_id),
                Some(line_item_id),
                "PRICE_VALIDATION",
                json!({
                    "is_valid": price.is_valid,
                    "check": price.check,
                    "expected_range": price.expected_range,
                    "variance_percent": price.variance_percent,
                    "proposal_id": price.proposal_id,
                }),
            )
            .await;

        let rules = &evaluation.rules;
        self.events
            .log(
                Some(invoice_id),
                Some(line_item_id),
                "RULES_APPLIED",
                json!({
                    "decision": rules.decision,
                    "policy_codes": rules.code_strings(),
                    "confidence": rules.confidence,
                }),
            )
            .await;
    }

    /// Feed the relearn job. A failed write only loses one sample.
    async fn observe(&self, canonical_item_id: &str, item: &LineItem) {
        let observation = PriceObservation {
            canonical_item_id: canonical_item_id.to_string(),
            unit_price: item.unit_price,
            observed_at: Utc::now(),
        };
        if let Err(e) = self.store.record_observation(observation).await {
            tracing::warn!(item = %item.id, error = %e, "failed to record price observation");
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("agent_enabled", &self.config.agent_enabled)
            .field("dry_run", &self.config.dry_run)
            .field("judge", &self.judge.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    store: Option<Arc<dyn CatalogStore>>,
    completion: Option<Arc<dyn TextCompletionPort>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            store: None,
            completion: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn CatalogStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// LLM used by the explanation judge. Without one the judge stays
    /// heuristic whatever its mode.
    pub fn completion(mut self, completion: Arc<dyn TextCompletionPort>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let store = self.store.ok_or(PipelineError::StoreNotConfigured)?;
        self.config.validate()?;

        let config = Arc::new(self.config);
        let events = EventLog::new(Arc::clone(&store));
        let cache = Arc::new(CatalogCache::new(Arc::clone(&store), config.cache_ttl));
        let proposals = Arc::new(ProposalService::new(
            Arc::clone(&store),
            events.clone(),
            Arc::clone(&cache),
            Arc::clone(&config),
        ));

        let judge = config.judge.enabled.then(|| {
            let scorer = ExplanationScorer::new(config.judge.mode, self.completion, events.clone());
            JudgeRunner::new(Arc::clone(&store), events.clone(), scorer)
        });

        Ok(Pipeline {
            config,
            store,
            cache,
            events,
            proposals,
            judge,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JudgeConfig;
    use crate::store::testing::FlakyStore;
    use crate::store::InMemoryCatalogStore;
    use vouch_core::{Decision, ProposalStatus};

    const CATALOG: &str = r#"
canonical_items:
  - id: "item-chair"
    name: "Office Chair Standard"
    category: "furniture"
  - id: "item-stapler"
    name: "Heavy Duty Stapler"
    category: "supplies"
synonyms:
  - id: "syn-1"
    canonical_item_id: "item-chair"
    synonym: "ergonomic seat"
price_ranges:
  - canonical_item_id: "item-chair"
    min_price: 100.0
    max_price: 200.0
business_rules:
  - id: "rule-vendor"
    scope_type: VENDOR
    scope_value: "shady-supplies"
    decision: DENY
"#;

    fn store() -> Arc<InMemoryCatalogStore> {
        Arc::new(InMemoryCatalogStore::from_yaml(CATALOG).unwrap())
    }

    fn config(dry_run: bool, judge: bool) -> PipelineConfig {
        PipelineConfig {
            dry_run,
            judge: JudgeConfig {
                enabled: judge,
                ..JudgeConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    fn pipeline(store: Arc<dyn CatalogStore>, config: PipelineConfig) -> Pipeline {
        Pipeline::builder().store(store).config(config).build().unwrap()
    }

    fn item(id: &str, description: &str, quantity: f64, unit_price: f64) -> ItemInput {
        LineItem::new(id, description, quantity, unit_price).into()
    }

    #[test]
    fn test_build_requires_store() {
        assert!(matches!(
            Pipeline::builder().build(),
            Err(PipelineError::StoreNotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_mixed_invoice() {
        let store = store();
        let pipeline = pipeline(store.clone(), config(true, false));

        let result = pipeline
            .run(
                "inv-1",
                "acme",
                vec![
                    item("li-1", "Office Chair Standard", 2.0, 150.0),
                    item("li-2", "office chair standard", 1.0, 450.0),
                    item("li-3", "Heavy Duty Stapler", 1.0, 25.0),
                    item("li-4", "quantum flux capacitor", 1.0, 10.0),
                ],
            )
            .await;

        assert!(result.dry_run);
        assert_eq!(result.decisions["li-1"].decision, Decision::Allow);
        assert_eq!(result.decisions["li-2"].decision, Decision::Deny);
        assert_eq!(result.decisions["li-2"].policy_codes, vec!["PRICE_EXCEEDS_MAX_150"]);
        assert_eq!(result.decisions["li-2"].proposals.len(), 1);
        assert_eq!(result.decisions["li-3"].policy_codes, vec!["NO_PRICE_BAND"]);
        assert_eq!(result.decisions["li-4"].policy_codes, vec!["NO_CANONICAL_MATCH"]);

        let stats = &result.pipeline_stats;
        assert_eq!(stats.total_items, 4);
        assert_eq!(stats.matched_items, 3);
        assert_eq!(stats.decisions.allow, 1);
        assert_eq!(stats.decisions.deny, 1);
        assert_eq!(stats.decisions.needs_more_info, 2);
        assert!((stats.approval_rate - 0.25).abs() < 1e-9);

        // dry run: nothing persisted, but observations recorded
        assert!(store.proposals(None).await.unwrap().is_empty());
        let since = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.observations_since(since).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stage_events_in_order() {
        let store = store();
        let pipeline = pipeline(store.clone(), config(true, false));
        pipeline
            .run("inv-1", "acme", vec![item("li-1", "ergonomic seat", 1.0, 150.0)])
            .await;

        let stages: Vec<String> = store
            .events()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                "PIPELINE_START",
                "MATCHING_START",
                "MATCH_SYNONYM",
                "PRICE_VALIDATION",
                "RULES_APPLIED",
                "PIPELINE_COMPLETE",
            ]
        );

        let events = store.events().await.unwrap();
        assert!(events[0].payload.get("vendor_id").is_none());
        assert_eq!(events[1].payload["description_length"], 14);
    }

    #[tokio::test]
    async fn test_live_mode_persists_proposals() {
        let store = store();
        let pipeline = pipeline(store.clone(), config(false, false));
        let result = pipeline
            .run("inv-1", "acme", vec![item("li-1", "chair office black", 1.0, 150.0)])
            .await;

        let decision = &result.decisions["li-1"];
        assert_eq!(decision.match_type, MatchType::Fuzzy);
        assert_eq!(decision.proposals.len(), 1);

        let pending = store.proposals(Some(ProposalStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, decision.proposals[0]);
    }

    #[tokio::test]
    async fn test_vendor_rule_denies() {
        let pipeline = pipeline(store(), config(true, false));
        let result = pipeline
            .run(
                "inv-1",
                "shady-supplies",
                vec![item("li-1", "Office Chair Standard", 1.0, 150.0)],
            )
            .await;
        assert_eq!(result.decisions["li-1"].decision, Decision::Deny);
        assert_eq!(
            result.decisions["li-1"].policy_codes,
            vec!["VENDOR_EXCLUDED_BY_RULE:rule-vendor"]
        );
    }

    #[tokio::test]
    async fn test_agent_disabled() {
        let pipeline = pipeline(
            store(),
            PipelineConfig {
                agent_enabled: false,
                ..PipelineConfig::default()
            },
        );
        let result = pipeline
            .run(
                "inv-1",
                "acme",
                vec![
                    item("li-1", "Office Chair Standard", 1.0, 150.0),
                    item("li-2", "Heavy Duty Stapler", 1.0, 25.0),
                ],
            )
            .await;

        assert!(!result.pipeline_stats.agent_enabled);
        assert_eq!(result.pipeline_stats.decisions.needs_more_info, 2);
        for decision in result.decisions.values() {
            assert_eq!(decision.reasons, vec!["Agent pipeline disabled"]);
            assert_eq!(decision.policy_codes, vec!["AGENT_DISABLED"]);
        }
    }

    #[tokio::test]
    async fn test_invalid_item_does_not_affect_siblings() {
        let pipeline = pipeline(store(), config(true, false));
        let result = pipeline
            .run(
                "inv-1",
                "acme",
                vec![
                    ItemInput::Invalid {
                        id: "li-bad".to_string(),
                        reason: "quantity must be positive".to_string(),
                    },
                    item("li-1", "Office Chair Standard", 1.0, 150.0),
                ],
            )
            .await;

        let bad = &result.decisions["li-bad"];
        assert_eq!(bad.decision, Decision::NeedsMoreInfo);
        assert_eq!(bad.policy_codes, vec!["INVALID_LINE_ITEM"]);
        assert!(bad.reasons[0].contains("quantity must be positive"));
        assert_eq!(result.decisions["li-1"].decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_store_failure_is_internal_error() {
        let store = Arc::new(FlakyStore::new(InMemoryCatalogStore::from_yaml(CATALOG).unwrap()));
        store.fail_reads(true);
        let pipeline = pipeline(store, config(true, false));

        let result = pipeline
            .run("inv-1", "acme", vec![item("li-1", "Office Chair Standard", 1.0, 150.0)])
            .await;
        let decision = &result.decisions["li-1"];
        assert_eq!(decision.decision, Decision::NeedsMoreInfo);
        assert_eq!(decision.policy_codes, vec!["INTERNAL_ERROR"]);
    }

    #[tokio::test]
    async fn test_proposal_write_failure_keeps_decision() {
        let store = Arc::new(FlakyStore::new(InMemoryCatalogStore::from_yaml(CATALOG).unwrap()));
        let pipeline = pipeline(store.clone(), config(false, false));
        store.fail_writes(true);

        let result = pipeline
            .run(
                "inv-1",
                "acme",
                vec![
                    item("li-1", "office chair standard", 1.0, 450.0),
                    item("li-2", "Office Chair Standard", 1.0, 150.0),
                ],
            )
            .await;

        let denied = &result.decisions["li-1"];
        assert_eq!(denied.decision, Decision::Deny);
        assert_eq!(denied.policy_codes, vec!["PRICE_EXCEEDS_MAX_150"]);
        assert!(denied.proposals.is_empty());
        assert_eq!(result.decisions["li-2"].decision, Decision::Allow);
        assert_eq!(result.pipeline_stats.decisions.deny, 1);
    }

    #[tokio::test]
    async fn test_proposal_write_failure_is_logged() {
        let inner = InMemoryCatalogStore::from_yaml(CATALOG).unwrap();
        let store = Arc::new(FlakyStore::new(inner));
        let pipeline = pipeline(store.clone(), config(false, false));
        store.fail_proposal_writes(true);

        let result = pipeline
            .run("inv-1", "acme", vec![item("li-1", "office chair standard", 1.0, 450.0)])
            .await;
        assert_eq!(result.decisions["li-1"].decision, Decision::Deny);
        assert!(result.decisions["li-1"].proposals.is_empty());

        let events = store.events().await.unwrap();
        let error = events
            .iter()
            .find(|e| e.stage == "PROPOSAL_ERROR")
            .expect("proposal error event");
        assert_eq!(error.line_item_id.as_deref(), Some("li-1"));
        assert_eq!(error.payload["proposal_type"], "PRICE_RANGE_ADJUST");
        let price = events.iter().find(|e| e.stage == "PRICE_VALIDATION").unwrap();
        assert!(price.payload["proposal_id"].is_null());
    }

    #[tokio::test]
    async fn test_duplicate_ids_each_get_a_decision() {
        let pipeline = pipeline(store(), config(true, false));
        let result = pipeline
            .run(
                "inv-1",
                "acme",
                vec![
                    item("li-1", "office chair standard", 1.0, 150.0),
                    item("li-1", "office chair standard", 1.0, 450.0),
                ],
            )
            .await;

        assert_eq!(result.decisions.len(), 2);
        assert_eq!(result.pipeline_stats.total_items, 2);
        assert_eq!(result.decisions["li-1"].decision, Decision::Allow);
        let repeated = &result.decisions["li-1#1"];
        assert_eq!(repeated.decision, Decision::NeedsMoreInfo);
        assert_eq!(repeated.policy_codes, vec!["INVALID_LINE_ITEM"]);
        assert!(repeated.reasons[0].contains("duplicate line item id 'li-1'"));
        assert_eq!(result.pipeline_stats.decisions.allow, 1);
    }

    #[tokio::test]
    async fn test_run_json_duplicate_ids_keep_deny_visible() {
        let pipeline = pipeline(store(), config(true, false));
        let result = pipeline
            .run_json(
                r#"{
                    "invoice_id": "inv-1",
                    "vendor_id": "acme",
                    "items": [
                        {"id": "li-1", "description": "Office Chair Standard", "quantity": 1, "unit_price": 450.0},
                        {"id": "li-1", "description": "Office Chair Standard", "quantity": 1, "unit_price": 150.0}
                    ]
                }"#,
            )
            .await
            .unwrap();

        assert_eq!(result.pipeline_stats.total_items, 2);
        assert_eq!(result.decisions["li-1"].decision, Decision::Deny);
        assert_eq!(result.decisions["li-1#1"].policy_codes, vec!["INVALID_LINE_ITEM"]);
        assert_eq!(result.pipeline_stats.decisions.allow, 0);
    }

    #[tokio::test]
    async fn test_run_json_generated_id_does_not_collide() {
        let pipeline = pipeline(store(), config(true, false));
        let result = pipeline
            .run_json(
                r#"{
                    "invoice_id": "inv-1",
                    "vendor_id": "acme",
                    "items": [
                        {"id": "item-1", "description": "Office Chair Standard", "quantity": 1, "unit_price": 450.0},
                        {"description": "Office Chair Standard", "quantity": 1, "unit_price": 150.0}
                    ]
                }"#,
            )
            .await
            .unwrap();

        assert_eq!(result.decisions.len(), 2);
        assert_eq!(result.decisions["item-1"].decision, Decision::Deny);
        assert_eq!(result.decisions["item-1-1"].decision, Decision::Allow);
        assert_eq!(result.pipeline_stats.decisions.deny, 1);
    }

    #[tokio::test]
    async fn test_run_rejects_non_finite_and_non_positive_numbers() {
        let store = store();
        let pipeline = pipeline(store.clone(), config(true, false));
        let result = pipeline
            .run(
                "inv-1",
                "acme",
                vec![
                    item("nan", "Office Chair Standard", 1.0, f64::NAN),
                    item("neg-qty", "Office Chair Standard", -5.0, 150.0),
                    item("zero-qty", "Office Chair Standard", 0.0, 150.0),
                    item("neg-price", "Office Chair Standard", 1.0, -1.0),
                    item("ok", "Office Chair Standard", 1.0, 150.0),
                ],
            )
            .await;

        for id in ["nan", "neg-qty", "zero-qty", "neg-price"] {
            let decision = &result.decisions[id];
            assert_eq!(decision.decision, Decision::NeedsMoreInfo, "{}", id);
            assert_eq!(decision.policy_codes, vec!["INVALID_LINE_ITEM"], "{}", id);
        }
        assert_eq!(result.decisions["ok"].decision, Decision::Allow);

        // rejected items never reach the observation history
        let since = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.observations_since(since).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_judgement_attached() {
        let pipeline = pipeline(store(), config(true, true));
        let result = pipeline
            .run("inv-1", "acme", vec![item("li-1", "office chair standard", 1.0, 450.0)])
            .await;

        let judgement = result.decisions["li-1"].judgement.as_ref().unwrap();
        assert!(judgement.scores.reason_quality.is_some());
        assert!(judgement.scores.decision_correct.is_none());
        assert_eq!(result.pipeline_stats.judged_items, 1);
    }

    #[tokio::test]
    async fn test_run_json_rejects_bad_envelope() {
        let pipeline = pipeline(store(), config(true, false));
        let err = pipeline.run_json(r#"{"invoice_id": "inv-1"}"#).await.unwrap_err();
        assert!(matches!(err, PipelineError::Request(RequestError::Schema(_))));

        let response = ErrorResponse::new(&err, Some("inv-1"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["invoice_id"], "inv-1");
    }

    #[tokio::test]
    async fn test_run_json() {
        let pipeline = pipeline(store(), config(true, false));
        let result = pipeline
            .run_json(
                r#"{
                    "invoice_id": "inv-9",
                    "vendor_id": "acme",
                    "items": [
                        {"id": "li-1", "description": "Office Chair Standard", "quantity": 1, "unit_price": 150.0}
                    ]
                }"#,
            )
            .await
            .unwrap();
        assert_eq!(result.invoice_id, "inv-9");
        assert_eq!(result.decisions["li-1"].decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_suggest() {
        let pipeline = pipeline(store(), config(true, false));
        let suggestions = pipeline.suggest("office chair", 3).await.unwrap();
        assert_eq!(suggestions[0].canonical_item_id, "item-chair");
    }
}
