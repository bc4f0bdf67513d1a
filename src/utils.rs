//! Text normalization helpers shared by dedup and validation.

use unicode_normalization::UnicodeNormalization;

use crate::types::NormalizedText;

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_inline_whitespace<T: AsRef<str>>(text: T) -> String {
    let mut normalized = String::new();
    let mut seen_space = false;
    for ch in text.as_ref().chars() {
        if ch.is_whitespace() {
            if !seen_space {
                normalized.push(' ');
                seen_space = true;
            }
        } else {
            normalized.push(ch);
            seen_space = false;
        }
    }
    normalized.trim().to_string()
}

/// Canonical comparison form: NFKC, lowercase, then whitespace collapsed.
///
/// NFKC runs first so compatibility forms (full-width letters, ligatures,
/// non-breaking spaces) fold before case and whitespace handling.
pub fn normalize_text(text: &str) -> NormalizedText {
    let composed: String = text.nfkc().collect();
    normalize_inline_whitespace(composed.to_lowercase())
}

/// True when `text` is empty after whitespace trimming.
pub fn is_blank(text: Option<&str>) -> bool {
    text.map(|value| value.trim().is_empty()).unwrap_or(true)
}
