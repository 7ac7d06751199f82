//! Text normalization and stable hashing.
//!
//! Every comparison in the matcher and every fingerprint goes through
//! [`normalize`], so two descriptions that differ only in case or spacing are
//! treated as the same line item everywhere.

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    /// Runs of whitespace, collapsed to a single space.
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Lowercase, trim and collapse inner whitespace.
pub fn normalize(text: &str) -> String {
    WHITESPACE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

/// Stable gold-label key: `sha256_hex(normalize(description) || "||" || vendor_id)`.
pub fn fingerprint(description: &str, vendor_id: &str) -> String {
    let content = format!("{}||{}", normalize(description), vendor_id);
    hex_digest(content.as_bytes())
}

/// First 16 hex characters of the sha256 of `value`.
///
/// Used to pseudonymize identifiers before they reach the event log.
pub fn short_hash(value: &str) -> String {
    let mut digest = hex_digest(value.as_bytes());
    digest.truncate(16);
    digest
}

/// Best-effort display name for a free-text synonym: collapse spaces, title case.
pub fn infer_canonical_name(synonym: &str) -> String {
    synonym
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_case_and_space() {
        assert_eq!(normalize("  Office   Chair\tStandard \n"), "office chair standard");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_fingerprint_is_stable_across_spacing() {
        let a = fingerprint("Office Chair  Standard", "vendor-1");
        let b = fingerprint(" office chair standard", "vendor-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_vendor() {
        assert_ne!(
            fingerprint("Office Chair", "vendor-1"),
            fingerprint("Office Chair", "vendor-2")
        );
    }

    #[test]
    fn test_fingerprint_known_value() {
        // sha256("office chair||v1")
        let expected = hex_digest(b"office chair||v1");
        assert_eq!(fingerprint("OFFICE CHAIR", "v1"), expected);
    }

    #[test]
    fn test_short_hash_length() {
        let h = short_hash("acme-supplies");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, short_hash("acme-supplies"));
    }

    #[test]
    fn test_infer_canonical_name() {
        assert_eq!(infer_canonical_name("  ergonomic   desk chair "), "Ergonomic Desk Chair");
        assert_eq!(infer_canonical_name("USB-C HUB"), "Usb-c Hub");
    }
}
