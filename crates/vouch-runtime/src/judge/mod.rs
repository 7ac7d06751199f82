//! Judge subsystem: deterministic scores from vouch-core plus explanation
//! scoring that may consult an LLM.

mod llm;
mod runner;

pub use llm::ExplanationScorer;
pub use runner::{JudgeInput, JudgeRunner};
