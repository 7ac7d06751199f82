//! Proposal lifecycle and human feedback.
//!
//! ```text
//! create ──► PENDING ──approve (CAS)──► APPROVED ──apply──► catalog write
//!   │                                      │
//!   └─ dry run: PROPOSAL_DRY_RUN event     └─ dry run: skipped
//! ```
//!
//! Stages only ever call [`ProposalService::create`]. Approval is a human
//! action; exactly one concurrent approver wins the compare-and-swap and
//! only that caller applies the change.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use vouch_core::proposals::{NewCanonical, NewRule, NewSynonym, PriceRangeAdjust};
use vouch_core::{
    BusinessRule, CanonicalItem, Decision, PriceRange, Proposal, ProposalPayload, ProposalStatus,
    Synonym,
};

use crate::cache::CatalogCache;
use crate::config::PipelineConfig;
use crate::store::{
    ApprovalTransition, CatalogStore, EventLog, FeedbackRecord, RangeUpsert, StoreError,
    SynonymUpsert,
};

/// Creator recorded on proposals raised by pipeline stages and jobs.
pub const AGENT_CREATOR: &str = "agent";

#[derive(Error, Debug)]
pub enum ProposalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid proposal payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid proposal: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    Created,
    Updated,
    AlreadyExists,
}

/// What applying a proposal did to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub entity: String,
    pub action: ApplyAction,
    pub id: String,
}

impl ApplyOutcome {
    fn new(entity: &str, action: ApplyAction, id: impl Into<String>) -> Self {
        Self {
            entity: entity.to_string(),
            action,
            id: id.into(),
        }
    }
}

/// Result of an approval request, serialized as the caller sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ApprovalResponse {
    NotFound {
        error: String,
        proposal_id: String,
    },
    AlreadyProcessed {
        proposal_id: String,
        already_processed: bool,
        current_status: ProposalStatus,
    },
    Skipped {
        proposal_id: String,
        status: ProposalStatus,
        skipped: bool,
        reason: String,
    },
    Applied {
        proposal_id: String,
        status: ProposalStatus,
        applied: ApplyOutcome,
    },
}

impl ApprovalResponse {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApprovalResponse::Applied { .. })
    }
}

/// Reviewer feedback on a decision, optionally approving a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub invoice_id: String,
    #[serde(default)]
    pub line_item_id: Option<String>,
    pub decision: Decision,
    #[serde(default)]
    pub reason: Option<String>,
    pub by_user: String,
    #[serde(default)]
    pub approve_proposal_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackResponse {
    pub feedback_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalResponse>,
}

pub struct ProposalService {
    store: Arc<dyn CatalogStore>,
    events: EventLog,
    cache: Arc<CatalogCache>,
    config: Arc<PipelineConfig>,
}

impl ProposalService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        events: EventLog,
        cache: Arc<CatalogCache>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            events,
            cache,
            config,
        }
    }

    /// File a proposal and return its id.
    ///
    /// In dry-run mode nothing is persisted: a `PROPOSAL_DRY_RUN` event
    /// naming the payload's fields (never their values) is logged and a
    /// fresh id is still returned.
    pub async fn create(
        &self,
        payload: &ProposalPayload,
        invoice_id: Option<&str>,
        line_item_id: Option<&str>,
    ) -> Result<String, ProposalError> {
        let (proposal_type, value) = payload.encode()?;
        let id = Uuid::new_v4().to_string();

        if self.config.dry_run {
            let mut payload_keys: Vec<&String> = value.as_object().map(|m| m.keys().collect()).unwrap_or_default();
            payload_keys.sort();
            self.events
                .log(
                    invoice_id,
                    line_item_id,
                    "PROPOSAL_DRY_RUN",
                    json!({
                        "proposal_id": id,
                        "proposal_type": proposal_type.to_string(),
                        "payload_keys": payload_keys,
                    }),
                )
                .await;
            return Ok(id);
        }

        self.store
            .insert_proposal(Proposal {
                id: id.clone(),
                proposal_type,
                payload: value,
                status: ProposalStatus::Pending,
                created_by: AGENT_CREATOR.to_string(),
                created_at: Utc::now(),
                approved_by: None,
                approved_at: None,
            })
            .await?;

        tracing::info!(proposal = %id, kind = %proposal_type, "proposal filed");
        self.events
            .log(
                invoice_id,
                line_item_id,
                "PROPOSAL_CREATED",
                json!({"proposal_id": id, "proposal_type": proposal_type.to_string()}),
            )
            .await;
        Ok(id)
    }

    pub async fn list(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, ProposalError> {
        Ok(self.store.proposals(status).await?)
    }

    /// Approve a pending proposal and apply it when configuration allows.
    pub async fn approve(
        &self,
        proposal_id: &str,
        approved_by: &str,
    ) -> Result<ApprovalResponse, ProposalError> {
        let proposal = match self
            .store
            .approve_proposal(proposal_id, approved_by, Utc::now())
            .await?
        {
            ApprovalTransition::NotFound => {
                return Ok(ApprovalResponse::NotFound {
                    error: "Proposal not found".to_string(),
                    proposal_id: proposal_id.to_string(),
                })
            }
            ApprovalTransition::AlreadyProcessed(current_status) => {
                return Ok(ApprovalResponse::AlreadyProcessed {
                    proposal_id: proposal_id.to_string(),
                    already_processed: true,
                    current_status,
                })
            }
            ApprovalTransition::Approved(proposal) => proposal,
        };

        self.events
            .log(
                None,
                None,
                "PROPOSAL_APPROVED",
                json!({"proposal_id": proposal.id, "proposal_type": proposal.proposal_type.to_string()}),
            )
            .await;

        if !self.config.may_apply() {
            tracing::info!(proposal = %proposal.id, "approved in dry run, not applied");
            return Ok(ApprovalResponse::Skipped {
                proposal_id: proposal.id,
                status: ProposalStatus::Approved,
                skipped: true,
                reason: "dry_run_mode".to_string(),
            });
        }

        let applied = self.apply(&proposal).await?;
        Ok(ApprovalResponse::Applied {
            proposal_id: proposal.id,
            status: ProposalStatus::Approved,
            applied,
        })
    }

    /// Write an approved proposal to the catalog and invalidate the cache.
    async fn apply(&self, proposal: &Proposal) -> Result<ApplyOutcome, ProposalError> {
        let outcome = match proposal.decode()? {
            ProposalPayload::NewSynonym(payload) => self.apply_synonym(payload).await?,
            ProposalPayload::PriceRangeAdjust(payload) => self.apply_range(payload).await?,
            ProposalPayload::NewRule(payload) => self.apply_rule(payload).await?,
            ProposalPayload::NewCanonical(payload) => self.apply_canonical(payload).await?,
        };

        self.cache.invalidate();
        tracing::info!(
            proposal = %proposal.id,
            entity = %outcome.entity,
            action = ?outcome.action,
            "proposal applied"
        );
        self.events
            .log(
                None,
                None,
                "PROPOSAL_APPLIED",
                json!({"proposal_id": proposal.id, "outcome": outcome}),
            )
            .await;
        Ok(outcome)
    }

    async fn apply_synonym(&self, payload: NewSynonym) -> Result<ApplyOutcome, ProposalError> {
        let synonym = Synonym {
            id: Uuid::new_v4().to_string(),
            canonical_item_id: payload.canonical_item_id,
            synonym: payload.synonym,
            confidence: payload.confidence,
        };
        Ok(match self.store.upsert_synonym(synonym).await? {
            SynonymUpsert::Created(s) => ApplyOutcome::new("synonym", ApplyAction::Created, s.id),
            SynonymUpsert::AlreadyExists { id } => {
                ApplyOutcome::new("synonym", ApplyAction::AlreadyExists, id)
            }
        })
    }

    async fn apply_range(&self, payload: PriceRangeAdjust) -> Result<ApplyOutcome, ProposalError> {
        let (min_price, max_price) = payload.new_range;
        if !(min_price.is_finite() && max_price.is_finite()) || min_price > max_price {
            return Err(ProposalError::Invalid(format!(
                "price range [{}, {}] is not a valid band",
                min_price, max_price
            )));
        }
        let range = PriceRange {
            canonical_item_id: payload.canonical_item_id,
            min_price,
            max_price,
            p50: payload.p50,
            sample_size: payload.sample_size,
            updated_at: Some(Utc::now()),
        };
        Ok(match self.store.upsert_price_range(range).await? {
            RangeUpsert::Created(r) => {
                ApplyOutcome::new("price_range", ApplyAction::Created, r.canonical_item_id)
            }
            RangeUpsert::Updated(r) => {
                ApplyOutcome::new("price_range", ApplyAction::Updated, r.canonical_item_id)
            }
        })
    }

    async fn apply_rule(&self, payload: NewRule) -> Result<ApplyOutcome, ProposalError> {
        if payload.rule_type.trim().is_empty() || payload.conditions.scope_value.trim().is_empty() {
            return Err(ProposalError::Invalid(
                "rule proposals need a rule_type and a scope value".to_string(),
            ));
        }
        let rule = BusinessRule {
            id: Uuid::new_v4().to_string(),
            scope_type: payload.conditions.scope_type,
            scope_value: payload.conditions.scope_value,
            decision: payload.actions.decision,
            max_quantity: payload.conditions.max_quantity,
            description: Some(payload.description).filter(|d| !d.is_empty()),
        };
        let id = rule.id.clone();
        self.store.insert_business_rule(rule).await?;
        Ok(ApplyOutcome::new("business_rule", ApplyAction::Created, id))
    }

    async fn apply_canonical(&self, payload: NewCanonical) -> Result<ApplyOutcome, ProposalError> {
        if payload.name.trim().is_empty() {
            return Err(ProposalError::Invalid("canonical item needs a name".to_string()));
        }
        let item = CanonicalItem {
            id: Uuid::new_v4().to_string(),
            name: payload.name,
            category: payload.category,
            description: Some(payload.description).filter(|d| !d.is_empty()),
        };
        let id = item.id.clone();
        self.store.insert_canonical_item(item).await?;
        Ok(ApplyOutcome::new("canonical_item", ApplyAction::Created, id))
    }

    /// Record reviewer feedback, then approve `approve_proposal_id` if set.
    ///
    /// Feedback is stored even in dry-run mode.
    pub async fn record_feedback(
        &self,
        request: FeedbackRequest,
    ) -> Result<FeedbackResponse, ProposalError> {
        let feedback_id = Uuid::new_v4().to_string();
        let reason_length = request.reason.as_deref().map_or(0, |r| r.chars().count());

        self.store
            .insert_feedback(FeedbackRecord {
                id: feedback_id.clone(),
                invoice_id: request.invoice_id.clone(),
                line_item_id: request.line_item_id.clone(),
                decision: request.decision,
                reason: request.reason.clone(),
                by_user: request.by_user.clone(),
                related_proposal_id: request.approve_proposal_id.clone(),
                created_at: Utc::now(),
            })
            .await?;

        self.events
            .log(
                Some(&request.invoice_id),
                request.line_item_id.as_deref(),
                "FEEDBACK_RECORDED",
                json!({
                    "feedback_id": feedback_id,
                    "decision": request.decision,
                    "has_reason": reason_length > 0,
                    "reason_length": reason_length,
                    "approve_requested": request.approve_proposal_id.is_some(),
                }),
            )
            .await;

        let approval = match &request.approve_proposal_id {
            Some(proposal_id) => Some(self.approve(proposal_id, &request.by_user).await?),
            None => None,
        };

        Ok(FeedbackResponse {
            feedback_id,
            approval,
        })
    }
}

impl std::fmt::Debug for ProposalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProposalService")
            .field("dry_run", &self.config.dry_run)
            .finish_non_exhaustive()
    }
}
