//! Store wrapper with switchable failures, for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vouch_core::{
    BusinessRule, CanonicalItem, GoldLabel, Judgement, PriceObservation, PriceRange, Proposal,
    ProposalStatus, Synonym,
};

use super::{
    ApprovalTransition, CatalogStore, EventRecord, FeedbackRecord, InMemoryCatalogStore,
    RangeUpsert, StoreError, SynonymUpsert,
};

pub(crate) struct FlakyStore {
    inner: InMemoryCatalogStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_proposal_writes: AtomicBool,
    catalog_reads: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new(inner: InMemoryCatalogStore) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_proposal_writes: AtomicBool::new(false),
            catalog_reads: AtomicUsize::new(0),
        }
    }

    /// Fail catalog reads (items, synonyms, ranges, rules, gold labels).
    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail `insert_proposal` only; events and observations still land.
    pub(crate) fn fail_proposal_writes(&self, fail: bool) {
        self.fail_proposal_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `canonical_items` calls, one per snapshot load.
    pub(crate) fn catalog_reads(&self) -> usize {
        self.catalog_reads.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected read failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CatalogStore for FlakyStore {
    async fn canonical_items(&self) -> Result<Vec<CanonicalItem>, StoreError> {
        self.catalog_reads.fetch_add(1, Ordering::SeqCst);
        self.read()?;
        self.inner.canonical_items().await
    }

    async fn synonyms(&self) -> Result<Vec<Synonym>, StoreError> {
        self.read()?;
        self.inner.synonyms().await
    }

    async fn price_ranges(&self) -> Result<Vec<PriceRange>, StoreError> {
        self.read()?;
        self.inner.price_ranges().await
    }

    async fn business_rules(&self) -> Result<Vec<BusinessRule>, StoreError> {
        self.read()?;
        self.inner.business_rules().await
    }

    async fn gold_label(&self, fingerprint: &str) -> Result<Option<GoldLabel>, StoreError> {
        self.read()?;
        self.inner.gold_label(fingerprint).await
    }

    async fn insert_canonical_item(&self, item: CanonicalItem) -> Result<(), StoreError> {
        self.write()?;
        self.inner.insert_canonical_item(item).await
    }

    async fn upsert_synonym(&self, synonym: Synonym) -> Result<SynonymUpsert, StoreError> {
        self.write()?;
        self.inner.upsert_synonym(synonym).await
    }

    async fn upsert_price_range(&self, range: PriceRange) -> Result<RangeUpsert, StoreError> {
        self.write()?;
        self.inner.upsert_price_range(range).await
    }

    async fn insert_business_rule(&self, rule: BusinessRule) -> Result<(), StoreError> {
        self.write()?;
        self.inner.insert_business_rule(rule).await
    }

    async fn insert_proposal(&self, proposal: Proposal) -> Result<(), StoreError> {
        self.write()?;
        if self.fail_proposal_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected proposal write failure".to_string()));
        }
        self.inner.insert_proposal(proposal).await
    }

    async fn proposal(&self, id: &str) -> Result<Option<Proposal>, StoreError> {
        self.inner.proposal(id).await
    }

    async fn proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, StoreError> {
        self.inner.proposals(status).await
    }

    async fn approve_proposal(
        &self,
        id: &str,
        approved_by: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<ApprovalTransition, StoreError> {
        self.write()?;
        self.inner.approve_proposal(id, approved_by, approved_at).await
    }

    async fn record_observation(&self, observation: PriceObservation) -> Result<(), StoreError> {
        self.write()?;
        self.inner.record_observation(observation).await
    }

    async fn observations_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        self.read()?;
        self.inner.observations_since(since).await
    }

    async fn insert_judgement(&self, judgement: Judgement) -> Result<(), StoreError> {
        self.write()?;
        self.inner.insert_judgement(judgement).await
    }

    async fn judgements(&self, invoice_id: Option<&str>) -> Result<Vec<Judgement>, StoreError> {
        self.inner.judgements(invoice_id).await
    }

    async fn insert_feedback(&self, feedback: FeedbackRecord) -> Result<(), StoreError> {
        self.write()?;
        self.inner.insert_feedback(feedback).await
    }

    async fn append_event(&self, event: EventRecord) -> Result<(), StoreError> {
        self.write()?;
        self.inner.append_event(event).await
    }

    async fn events(&self) -> Result<Vec<EventRecord>, StoreError> {
        self.inner.events().await
    }
}
