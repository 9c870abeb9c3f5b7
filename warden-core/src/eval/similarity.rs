//! Character-level similarity and best-match selection over a fixed
//! reference corpus.

use super::{cer::character_error_rate, normalize_ws};

/// Outcome of matching a recognized text against the reference corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    /// The corpus entry with the highest similarity ratio.
    pub matched_reference: String,
    /// LCS-based similarity ratio in [0, 1].
    pub similarity: f64,
    /// `1 − CER` against the matched reference, floored at 0.
    pub character_accuracy: f64,
}

/// LCS-based similarity ratio: `2·LCS(a, b) / (|a| + |b|)`, in [0, 1].
///
/// Both inputs are whitespace-collapsed first. Two empty strings are
/// identical by convention (ratio 1).
pub fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize_ws(a).chars().collect();
    let b: Vec<char> = normalize_ws(b).chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    2.0 * lcs_len(&a, &b) as f64 / (a.len() + b.len()) as f64
}

/// Select the corpus entry most similar to `text`; ties keep the
/// first-seen reference. Returns `None` for an empty corpus.
pub fn best_match<S: AsRef<str>>(text: &str, corpus: &[S]) -> Option<BestMatch> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, reference) in corpus.iter().enumerate() {
        let ratio = lcs_ratio(text, reference.as_ref());
        match best {
            Some((_, current)) if ratio <= current => {}
            _ => best = Some((idx, ratio)),
        }
    }

    best.map(|(idx, similarity)| {
        let reference = corpus[idx].as_ref();
        let report = character_error_rate(text, reference, false);
        BestMatch {
            matched_reference: reference.to_string(),
            similarity,
            character_accuracy: (1.0 - report.cer).max(0.0),
        }
    })
}

/// Longest common subsequence length, rolling single-row DP.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
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
