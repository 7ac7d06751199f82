//! Prompts for the LLM explanation judge.
//!
//! The system prompt is static; the user prompt embeds the explanation and
//! the policy codes it should justify. Replies are expected to be a bare
//! decimal and are parsed with [`vouch_core::judge::parse_llm_score`].

/// Sampling settings for explanation scoring.
pub const JUDGE_TEMPERATURE: f32 = 0.1;
pub const JUDGE_MAX_TOKENS: u32 = 50;

pub const JUDGE_SYSTEM_PROMPT: &str = "You are an expert judge evaluating the quality of \
explanations for invoice verification decisions. Rate explanations on a scale of 0.0 to 1.0 \
based on clarity, accuracy, and completeness.";

const SCORING_CRITERIA: &str = r#"Scoring criteria:
- Clarity (0.3): Is the explanation clear and understandable?
- Accuracy (0.4): Does it correctly reference relevant policies and facts?
- Completeness (0.3): Does it provide sufficient justification for the decision?"#;

/// User prompt asking for a single score for `explanation`.
pub fn explanation_prompt(explanation: &str, policy_codes: &[String]) -> String {
    let policy_context = if policy_codes.is_empty() {
        "No policy codes".to_string()
    } else {
        format!("Policy codes: {}", policy_codes.join(", "))
    };

    format!(
        "Rate this invoice verification explanation on a scale of 0.0 to 1.0:\n\n\
         Explanation: \"{}\"\n\
         {}\n\n\
         {}\n\n\
         Respond with only a decimal number between 0.0 and 1.0, no other text.",
        explanation, policy_context, SCORING_CRITERIA
    )
}
