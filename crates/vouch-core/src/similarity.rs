//! Order-insensitive string similarity.
//!
//! [`token_set_ratio`] follows the usual token-set construction: split both
//! inputs into deduplicated, sorted token sets, build the shared core and each
//! side's remainder, and take the best Indel similarity among
//! `core vs core+left`, `core vs core+right` and `core+left vs core+right`.
//! Scores are in [0, 1].

use std::collections::BTreeSet;

/// Normalized Indel similarity: `2 * lcs(a, b) / (|a| + |b|)`.
///
/// Two empty strings are identical (1.0); one empty string scores 0.0.
pub fn indel_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let lcs = lcs_len(&a, &b);
    (2 * lcs) as f64 / (a.len() + b.len()) as f64
}

/// Token-set similarity between two already-normalized strings.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let common: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    // One side is a subset of the other.
    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 1.0;
    }

    let core = common.join(" ");
    let with_a = join_non_empty(&core, &only_a.join(" "));
    let with_b = join_non_empty(&core, &only_b.join(" "));

    let mut best = indel_ratio(&with_a, &with_b);
    if !core.is_empty() {
        best = best
            .max(indel_ratio(&core, &with_a))
            .max(indel_ratio(&core, &with_b));
    }
    best
}

fn join_non_empty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{} {}", head, tail),
    }
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
