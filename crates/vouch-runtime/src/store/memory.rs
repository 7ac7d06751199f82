//! In-memory reference store, seedable from and exportable to YAML.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use vouch_core::normalize::normalize;
use vouch_core::{
    BusinessRule, CanonicalItem, GoldLabel, Judgement, PriceObservation, PriceRange, Proposal,
    ProposalStatus, Synonym,
};

use super::{
    ApprovalTransition, CatalogStore, EventRecord, FeedbackRecord, RangeUpsert, StoreError,
    SynonymUpsert,
};

/// Full store contents in their serialized form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub canonical_items: Vec<CanonicalItem>,
    #[serde(default)]
    pub synonyms: Vec<Synonym>,
    #[serde(default)]
    pub price_ranges: Vec<PriceRange>,
    #[serde(default)]
    pub business_rules: Vec<BusinessRule>,
    #[serde(default)]
    pub gold_labels: Vec<GoldLabel>,
    #[serde(default)]
    pub observations: Vec<PriceObservation>,
    #[serde(default)]
    pub proposals: Vec<Proposal>,
    #[serde(default)]
    pub judgements: Vec<Judgement>,
    #[serde(default)]
    pub feedback: Vec<FeedbackRecord>,
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

/// Store backed by a single lock-protected [`CatalogSeed`].
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    tables: RwLock<CatalogSeed>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> Self {
        Self {
            tables: RwLock::new(seed),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, StoreError> {
        Ok(Self::from_seed(serde_yaml::from_str(yaml)?))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Copy of the current contents.
    pub fn export(&self) -> CatalogSeed {
        self.tables.read().clone()
    }

    pub fn save_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let yaml = serde_yaml::to_string(&self.export())?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn canonical_items(&self) -> Result<Vec<CanonicalItem>, StoreError> {
        Ok(self.tables.read().canonical_items.clone())
    }

    async fn synonyms(&self) -> Result<Vec<Synonym>, StoreError> {
        Ok(self.tables.read().synonyms.clone())
    }

    async fn price_ranges(&self) -> Result<Vec<PriceRange>, StoreError> {
        Ok(self.tables.read().price_ranges.clone())
    }

    async fn business_rules(&self) -> Result<Vec<BusinessRule>, StoreError> {
        Ok(self.tables.read().business_rules.clone())
    }

    async fn gold_label(&self, fingerprint: &str) -> Result<Option<GoldLabel>, StoreError> {
        Ok(self
            .tables
            .read()
            .gold_labels
            .iter()
            .find(|g| g.line_item_fingerprint == fingerprint)
            .cloned())
    }

    async fn insert_canonical_item(&self, item: CanonicalItem) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.canonical_items.iter().any(|i| i.id == item.id) {
            return Err(StoreError::Invalid(format!(
                "canonical item {} already exists",
                item.id
            )));
        }
        tables.canonical_items.push(item);
        Ok(())
    }

    async fn upsert_synonym(&self, synonym: Synonym) -> Result<SynonymUpsert, StoreError> {
        let mut tables = self.tables.write();
        let key = normalize(&synonym.synonym);
        if let Some(existing) = tables
            .synonyms
            .iter()
            .find(|s| s.canonical_item_id == synonym.canonical_item_id && normalize(&s.synonym) == key)
        {
            return Ok(SynonymUpsert::AlreadyExists {
                id: existing.id.clone(),
            });
        }
        tables.synonyms.push(synonym.clone());
        Ok(SynonymUpsert::Created(synonym))
    }

    async fn upsert_price_range(&self, range: PriceRange) -> Result<RangeUpsert, StoreError> {
        let mut tables = self.tables.write();
        match tables
            .price_ranges
            .iter_mut()
            .find(|r| r.canonical_item_id == range.canonical_item_id)
        {
            Some(existing) => {
                *existing = range.clone();
                Ok(RangeUpsert::Updated(range))
            }
            None => {
                tables.price_ranges.push(range.clone());
                Ok(RangeUpsert::Created(range))
            }
        }
    }

    async fn insert_business_rule(&self, rule: BusinessRule) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.business_rules.iter().any(|r| r.id == rule.id) {
            return Err(StoreError::Invalid(format!("rule {} already exists", rule.id)));
        }
        tables.business_rules.push(rule);
        Ok(())
    }

    async fn insert_proposal(&self, proposal: Proposal) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.proposals.iter().any(|p| p.id == proposal.id) {
            return Err(StoreError::Invalid(format!(
                "proposal {} already exists",
                proposal.id
            )));
        }
        tables.proposals.push(proposal);
        Ok(())
    }

    async fn proposal(&self, id: &str) -> Result<Option<Proposal>, StoreError> {
        Ok(self.tables.read().proposals.iter().find(|p| p.id == id).cloned())
    }

    async fn proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, StoreError> {
        Ok(self
            .tables
            .read()
            .proposals
            .iter()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect())
    }

    async fn approve_proposal(
        &self,
        id: &str,
        approved_by: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<ApprovalTransition, StoreError> {
        let mut tables = self.tables.write();
        let Some(proposal) = tables.proposals.iter_mut().find(|p| p.id == id) else {
            return Ok(ApprovalTransition::NotFound);
        };
        if proposal.status != ProposalStatus::Pending {
            return Ok(ApprovalTransition::AlreadyProcessed(proposal.status));
        }
        proposal.status = ProposalStatus::Approved;
        proposal.approved_by = Some(approved_by.to_string());
        proposal.approved_at = Some(approved_at);
        Ok(ApprovalTransition::Approved(proposal.clone()))
    }

    async fn record_observation(&self, observation: PriceObservation) -> Result<(), StoreError> {
        self.tables.write().observations.push(observation);
        Ok(())
    }

    async fn observations_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        Ok(self
            .tables
            .read()
            .observations
            .iter()
            .filter(|o| o.observed_at >= since)
            .cloned()
            .collect())
    }

    async fn insert_judgement(&self, judgement: Judgement) -> Result<(), StoreError> {
        self.tables.write().judgements.push(judgement);
        Ok(())
    }

    async fn judgements(&self, invoice_id: Option<&str>) -> Result<Vec<Judgement>, StoreError> {
        Ok(self
            .tables
            .read()
            .judgements
            .iter()
            .filter(|j| invoice_id.map_or(true, |id| j.invoice_id == id))
            .cloned()
            .collect())
    }

    async fn insert_feedback(&self, feedback: FeedbackRecord) -> Result<(), StoreError> {
        self.tables.write().feedback.push(feedback);
        Ok(())
    }

    async fn append_event(&self, event: EventRecord) -> Result<(), StoreError> {
        self.tables.write().events.push(event);
        Ok(())
    }

    async fn events(&self) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self.tables.read().events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vouch_core::ProposalType;

    const SEED: &str = r#"
canonical_items:
  - id: "chair"
    name: "Office Chair"
synonyms:
  - id: "s1"
    canonical_item_id: "chair"
    synonym: "Desk Chair"
price_ranges:
  - canonical_item_id: "chair"
    min_price: 100.0
    max_price: 200.0
"#;

    fn pending(id: &str) -> Proposal {
        Proposal {
            id: id.to_string(),
            proposal_type: ProposalType::NewSynonym,
            payload: serde_json::json!({"canonical_item_id": "chair", "synonym": "seat"}),
            status: ProposalStatus::Pending,
            created_by: "agent".to_string(),
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
        }
    }

    #[tokio::test]
    async fn test_seed_and_snapshot() {
        let store = InMemoryCatalogStore::from_yaml(SEED).unwrap();
        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.canonical_items().len(), 1);
        assert_eq!(snapshot.price_range("chair").map(|r| r.max_price), Some(200.0));
    }

    #[tokio::test]
    async fn test_synonym_upsert_dedupes_normalized() {
        let store = InMemoryCatalogStore::from_yaml(SEED).unwrap();
        let dup = Synonym {
            id: "s2".to_string(),
            canonical_item_id: "chair".to_string(),
            synonym: "  desk   chair".to_string(),
            confidence: 0.8,
        };
        assert_eq!(
            store.upsert_synonym(dup).await.unwrap(),
            SynonymUpsert::AlreadyExists { id: "s1".to_string() }
        );

        let fresh = Synonym {
            id: "s3".to_string(),
            canonical_item_id: "chair".to_string(),
            synonym: "task chair".to_string(),
            confidence: 0.8,
        };
        assert!(matches!(
            store.upsert_synonym(fresh).await.unwrap(),
            SynonymUpsert::Created(_)
        ));
        assert_eq!(store.synonyms().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_range_update_else_insert() {
        let store = InMemoryCatalogStore::from_yaml(SEED).unwrap();
        let updated = store
            .upsert_price_range(PriceRange::new("chair", 90.0, 250.0))
            .await
            .unwrap();
        assert!(matches!(updated, RangeUpsert::Updated(_)));

        let created = store
            .upsert_price_range(PriceRange::new("desk", 300.0, 600.0))
            .await
            .unwrap();
        assert!(matches!(created, RangeUpsert::Created(_)));
        assert_eq!(store.price_ranges().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_approve_is_compare_and_swap() {
        let store = InMemoryCatalogStore::new();
        store.insert_proposal(pending("p1")).await.unwrap();

        let first = store.approve_proposal("p1", "reviewer", Utc::now()).await.unwrap();
        assert!(matches!(first, ApprovalTransition::Approved(ref p) if p.approved_by.as_deref() == Some("reviewer")));

        let second = store.approve_proposal("p1", "other", Utc::now()).await.unwrap();
        assert_eq!(second, ApprovalTransition::AlreadyProcessed(ProposalStatus::Approved));

        let missing = store.approve_proposal("nope", "reviewer", Utc::now()).await.unwrap();
        assert_eq!(missing, ApprovalTransition::NotFound);

        assert!(store.proposals(Some(ProposalStatus::Pending)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_observations_window() {
        let store = InMemoryCatalogStore::new();
        let now = Utc::now();
        for days in [1, 100] {
            store
                .record_observation(PriceObservation {
                    canonical_item_id: "chair".to_string(),
                    unit_price: 120.0,
                    observed_at: now - chrono::Duration::days(days),
                })
                .await
                .unwrap();
        }
        let recent = store
            .observations_since(now - chrono::Duration::days(90))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_export_round_trips_through_yaml() {
        let store = InMemoryCatalogStore::from_yaml(SEED).unwrap();
        store.insert_proposal(pending("p1")).await.unwrap();

        let yaml = serde_yaml::to_string(&store.export()).unwrap();
        let reloaded = InMemoryCatalogStore::from_yaml(&yaml).unwrap();
        assert_eq!(reloaded.proposals(None).await.unwrap().len(), 1);
        assert_eq!(reloaded.synonyms().await.unwrap()[0].id, "s1");
    }
}
