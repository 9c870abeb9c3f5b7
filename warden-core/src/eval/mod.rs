//! Recognition-result evaluation: text similarity, character error rate,
//! and emergency-keyword detection.
//!
//! Everything in this module is a pure function over normalized character
//! sequences — no randomness, no locale dependence beyond whitespace
//! handling. Given identical normalized inputs, outputs are bit-identical.

pub mod cer;
pub mod keywords;
pub mod similarity;

pub use cer::{character_error_rate, CerReport};
pub use keywords::KeywordMatcher;
pub use similarity::{best_match, lcs_ratio, BestMatch};

/// Collapse whitespace runs to single spaces and trim the ends.
pub(crate) fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase and strip all whitespace — the form used for substring
/// keyword matching.
pub(crate) fn normalize_compact(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
