//! Emergency-keyword detection: exact substring scan against a fixed
//! keyword list over case/whitespace-normalized text.

use super::normalize_compact;

/// Keywords scanned for when no deployment-specific list is configured.
/// Korean stems first (the primary deployment language), English fallbacks
/// after.
pub const DEFAULT_EMERGENCY_KEYWORDS: &[&str] = &[
    "도와줘",
    "도와주세요",
    "살려줘",
    "살려주세요",
    "구해줘",
    "쓰러졌",
    "의식이 없",
    "숨을 못",
    "숨이 안",
    "아파",
    "어지러",
    "가슴이 답답",
    "help",
    "rescue",
    "emergency",
    "collapsed",
    "unconscious",
    "not breathing",
    "pain",
    "dizzy",
];

/// Scans recognized text for emergency keywords.
///
/// Keywords are normalized once at construction; matching is an exact
/// substring scan, so a stem like `"쓰러졌"` matches `"쓰러졌어"` and
/// `"쓰러졌습니다"` alike.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    /// (original form, normalized form) pairs.
    keywords: Vec<(String, String)>,
}

impl KeywordMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| (k.as_ref().to_string(), normalize_compact(k.as_ref())))
                .filter(|(_, norm)| !norm.is_empty())
                .collect(),
        }
    }

    /// All keywords found in `text`, in list order — not just the first.
    pub fn detect(&self, text: &str) -> Vec<String> {
        let haystack = normalize_compact(text);
        if haystack.is_empty() {
            return Vec::new();
        }
        self.keywords
            .iter()
            .filter(|(_, norm)| haystack.contains(norm.as_str()))
            .map(|(original, _)| original.clone())
            .collect()
    }

    /// Whether `text` contains at least one emergency keyword.
    pub fn is_emergency(&self, text: &str) -> bool {
        !self.detect(text).is_empty()
    }
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EMERGENCY_KEYWORDS)
    }
}
