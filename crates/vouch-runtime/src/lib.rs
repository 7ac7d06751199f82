//! # vouch-runtime
//!
//! Async runtime around the deterministic stages in `vouch-core`.
//!
//! This crate owns everything with I/O or time in it:
//! - The [`CatalogStore`](store::CatalogStore) seam and an in-memory store
//! - A bounded-staleness catalog cache
//! - The invoice [`Pipeline`] and its proposal/feedback loop
//! - The judge runner, with optional LLM explanation scoring
//! - Nightly jobs: relearn, bootstrap and safety scan
//!
//! ## Important
//!
//! Stages never change the catalog. They file proposals, and a proposal is
//! only applied after a human approves it and the configuration allows it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vouch_runtime::{InMemoryCatalogStore, Pipeline, PipelineConfig};
//! use vouch_core::LineItem;
//!
//! let store = Arc::new(InMemoryCatalogStore::from_yaml_file("catalog.yaml")?);
//! let pipeline = Pipeline::builder()
//!     .config(PipelineConfig::from_env()?)
//!     .store(store)
//!     .build()?;
//!
//! let result = pipeline
//!     .run("inv-1", "acme", vec![LineItem::new("li-1", "Office Chair", 2.0, 150.0).into()])
//!     .await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! ```

pub mod cache;
pub mod completion;
pub mod config;
pub mod jobs;
pub mod judge;
pub mod orchestrator;
pub mod prompts;
pub mod proposals;
pub mod providers;
pub mod resilience;
pub mod store;

pub use cache::CatalogCache;
pub use completion::{ResilientCompletion, TextCompletionPort};
pub use config::{ConfigError, JudgeMode, PipelineConfig};
pub use jobs::{BootstrapJob, JobContext, RelearnJob, SafetyScanJob};
pub use orchestrator::{ErrorResponse, InvoiceResult, Pipeline, PipelineBuilder, PipelineError};
pub use proposals::{ApprovalResponse, FeedbackRequest, ProposalError, ProposalService};
pub use store::{CatalogStore, EventLog, InMemoryCatalogStore, StoreError};
