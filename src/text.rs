//! Question text normalization and tokenization.
//!
//! Everything the planner matches against goes through `normalize` first so
//! the regex cascades see one canonical form: lowercase, single spaces, no
//! punctuation. Both functions are pure and `normalize` is idempotent.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SEPARATORS: Regex = Regex::new(r"[_\-\s]+").unwrap();
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").unwrap();
}

/// Words carrying no analytical signal, dropped during tokenization.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "by", "of", "to", "for", "in", "on", "at", "with", "show",
    "list", "records", "rows", "give", "me", "how", "many", "and", "or",
];

/// Lowercase, collapse whitespace/underscores/hyphens to single spaces,
/// strip everything that is not a word character or space, trim.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let spaced = SEPARATORS.replace_all(&lowered, " ");
    let stripped = NON_WORD.replace_all(&spaced, "");
    stripped.trim().to_string()
}

/// Normalize and split on whitespace, dropping stop-words.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .filter(|t| !STOP_WORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}
