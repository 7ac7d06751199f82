//! Explanation quality scoring.
//!
//! The heuristic is deterministic and always available. Model-backed scoring
//! lives in the runtime; this module only parses what the model returns.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// First decimal number in a model reply.
    static ref SCORE_NUMBER: Regex = Regex::new(r"(\d*\.?\d+)").unwrap();
}

/// Rule-of-thumb quality of a reason text, in [0, 1].
///
/// | Signal | Points |
/// |--------|--------|
/// | trimmed length in [30, 300] | 0.4 |
/// | otherwise longer than 10 | 0.2 |
/// | mentions one of `policy_codes` | 0.3 |
/// | contains a digit | 0.2 |
/// | contains `.`, `!` or `?` | 0.1 |
pub fn heuristic_score(text: &str, policy_codes: &[String]) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let mut score: f64 = 0.0;

    let length = text.trim().chars().count();
    if (30..=300).contains(&length) {
        score += 0.4;
    } else if length > 10 {
        score += 0.2;
    }

    let upper = text.to_uppercase();
    if policy_codes
        .iter()
        .any(|code| upper.contains(&code.to_uppercase()))
    {
        score += 0.3;
    }

    if text.chars().any(|c| c.is_ascii_digit()) {
        score += 0.2;
    }

    if text.contains(['.', '!', '?']) {
        score += 0.1;
    }

    score.min(1.0)
}

/// First number in `reply`, clamped to [0, 1]. `None` when there is none.
pub fn parse_llm_score(reply: &str) -> Option<f64> {
    let captures = SCORE_NUMBER.captures(reply)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 1.0))
}

/// Mean of the heuristic and model scores.
pub fn blend(heuristic: f64, llm: f64) -> f64 {
    ((heuristic + llm) / 2.0).clamp(0.0, 1.0)
}
