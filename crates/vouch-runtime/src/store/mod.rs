//! Catalog store abstraction.
//!
//! The store holds reference data (items, synonyms, bands, rules, gold
//! labels), transaction history (price observations) and the append-only
//! logs (events, proposals, judgements, feedback). Pipeline stages only see
//! it through a [`CatalogSnapshot`] served by the catalog cache.
//!
//! ## Concurrency
//!
//! [`CatalogStore::approve_proposal`] is a compare-and-swap on the proposal
//! status: of several concurrent callers exactly one observes
//! [`ApprovalTransition::Approved`], and only that caller applies the change.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vouch_core::{
    BusinessRule, CanonicalItem, CatalogSnapshot, Decision, GoldLabel, Judgement,
    PriceObservation, PriceRange, Proposal, ProposalStatus, Synonym,
};

pub mod events;
mod memory;

pub use events::{sanitize, EventLog};
pub use memory::{CatalogSeed, InMemoryCatalogStore};

#[cfg(test)]
pub(crate) mod testing;

/// Errors from the catalog store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Outcome of inserting a synonym keyed by `(canonical_item_id, synonym)`.
#[derive(Debug, Clone, PartialEq)]
pub enum SynonymUpsert {
    Created(Synonym),
    AlreadyExists { id: String },
}

/// Outcome of writing the band of an item.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeUpsert {
    Created(PriceRange),
    Updated(PriceRange),
}

/// Outcome of the approval compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalTransition {
    /// This caller moved the proposal to `APPROVED`.
    Approved(Proposal),
    /// Someone else got there first.
    AlreadyProcessed(ProposalStatus),
    NotFound,
}

/// Human feedback on a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackRecord {
    pub id: String,
    pub invoice_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_item_id: Option<String>,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub by_user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_proposal_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sanitized audit event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_item_id: Option<String>,
    pub stage: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Persistence behind the pipeline.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn canonical_items(&self) -> Result<Vec<CanonicalItem>, StoreError>;

    async fn synonyms(&self) -> Result<Vec<Synonym>, StoreError>;

    async fn price_ranges(&self) -> Result<Vec<PriceRange>, StoreError>;

    async fn business_rules(&self) -> Result<Vec<BusinessRule>, StoreError>;

    async fn gold_label(&self, fingerprint: &str) -> Result<Option<GoldLabel>, StoreError>;

    async fn insert_canonical_item(&self, item: CanonicalItem) -> Result<(), StoreError>;

    async fn upsert_synonym(&self, synonym: Synonym) -> Result<SynonymUpsert, StoreError>;

    /// Update the item's band if it has one, else insert it.
    async fn upsert_price_range(&self, range: PriceRange) -> Result<RangeUpsert, StoreError>;

    async fn insert_business_rule(&self, rule: BusinessRule) -> Result<(), StoreError>;

    async fn insert_proposal(&self, proposal: Proposal) -> Result<(), StoreError>;

    async fn proposal(&self, id: &str) -> Result<Option<Proposal>, StoreError>;

    /// Proposals in creation order, optionally filtered by status.
    async fn proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, StoreError>;

    /// Compare-and-swap `PENDING -> APPROVED`.
    async fn approve_proposal(
        &self,
        id: &str,
        approved_by: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<ApprovalTransition, StoreError>;

    async fn record_observation(&self, observation: PriceObservation) -> Result<(), StoreError>;

    async fn observations_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError>;

    async fn insert_judgement(&self, judgement: Judgement) -> Result<(), StoreError>;

    async fn judgements(&self, invoice_id: Option<&str>) -> Result<Vec<Judgement>, StoreError>;

    async fn insert_feedback(&self, feedback: FeedbackRecord) -> Result<(), StoreError>;

    async fn append_event(&self, event: EventRecord) -> Result<(), StoreError>;

    async fn events(&self) -> Result<Vec<EventRecord>, StoreError>;

    /// Consistent-enough view of the reference data.
    async fn snapshot(&self) -> Result<CatalogSnapshot, StoreError> {
        Ok(CatalogSnapshot::new(
            self.canonical_items().await?,
            self.synonyms().await?,
            self.price_ranges().await?,
            self.business_rules().await?,
        ))
    }
}
