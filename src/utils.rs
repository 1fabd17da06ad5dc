//! Small string helpers shared by the parsers.
//!
//! - Truncation of long documents for debug log previews
//! - Whitespace normalization for titles and descriptions scraped from markup

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Truncate a string for logging purposes.
///
/// Long strings are cut after at most `max` bytes (on a character boundary)
/// with an ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Collapse every run of whitespace to one space and trim the ends.
///
/// Returns `None` when nothing but whitespace is left, so the result can feed
/// a first-non-empty-wins cascade directly.
pub fn clean_text(s: &str) -> Option<String> {
    let cleaned = WHITESPACE_RUN.replace_all(s.trim(), " ");
    (!cleaned.is_empty()).then(|| cleaned.into_owned())
}
