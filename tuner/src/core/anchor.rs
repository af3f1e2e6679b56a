//! Anchored value substitution on artifact text.
//!
//! An anchor is an exact key token followed by `=` on a single line:
//!
//! ```text
//! MinChunk     = 2 * MB  // Minimum chunk size
//! ^^^^^^^^key    ^^^^^^value  ^^^^^^^^^^^^^^^^^^^^^trailing doc
//! ```
//!
//! Only the value span is replaced. The key, the operator spacing, any trailing
//! `//` or `/* */` documentation and the line ending are preserved byte for byte.

use std::fmt;

use anyhow::{Context, Result};
use regex::Regex;

/// The anchor for `key` matched zero or several locations.
///
/// Indicates the search space does not fit the artifact; the trial must abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorError {
    pub key: String,
    pub matches: usize,
}

impl fmt::Display for AnchorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matches == 0 {
            write!(f, "anchor '{} =' not found in artifact", self.key)
        } else {
            write!(
                f,
                "anchor '{} =' is ambiguous: {} matches (expected exactly 1)",
                self.key, self.matches
            )
        }
    }
}

impl std::error::Error for AnchorError {}

/// Build the single-line matcher for `key`.
///
/// `value` must start with a non-space, non-`=` character so `key == x` comparisons
/// never count as assignments. It ends at the first `//` or `/*`, with or without
/// whitespace before it, so a comment marker inside a string literal also ends it.
pub fn anchor_pattern(key: &str) -> Result<Regex> {
    let pattern = format!(
        r"(?mR)\b{}[ \t]*=[ \t]*(?P<value>[^\s=/](?:[^/\r\n]|/[^/*\r\n])*?)[ \t]*(?:(?://|/\*)[^\r\n]*)?$",
        regex::escape(key)
    );
    Regex::new(&pattern).with_context(|| format!("compile anchor pattern for {key}"))
}

/// Replace the value of `key` with `literal`. Fails with [`AnchorError`] unless the
/// anchor matches exactly once.
pub fn substitute(content: &str, key: &str, literal: &str) -> Result<String> {
    let pattern = anchor_pattern(key)?;
    let spans: Vec<_> = pattern
        .captures_iter(content)
        .filter_map(|caps| caps.name("value"))
        .map(|m| m.range())
        .collect();
    if spans.len() != 1 {
        return Err(AnchorError {
            key: key.to_string(),
            matches: spans.len(),
        }
        .into());
    }
    let span = spans[0].clone();
    let mut out = String::with_capacity(content.len() + literal.len());
    out.push_str(&content[..span.start]);
    out.push_str(literal);
    out.push_str(&content[span.end..]);
    Ok(out)
}

/// Apply every `(anchor, literal)` pair in order.
pub fn substitute_all(content: &str, literals: &[(String, String)]) -> Result<String> {
    let mut current = content.to_string();
    for (key, literal) in literals {
        current = substitute(&current, key, literal)?;
    }
    Ok(current)
}

/// Current value text for `key`, if the anchor matches exactly once.
pub fn current_value(content: &str, key: &str) -> Result<String> {
    let pattern = anchor_pattern(key)?;
    let values: Vec<&str> = pattern
        .captures_iter(content)
        .filter_map(|caps| caps.name("value"))
        .map(|m| m.as_str())
        .collect();
    if values.len() != 1 {
        return Err(AnchorError {
            key: key.to_string(),
            matches: values.len(),
        }
        .into());
    }
    Ok(values[0].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "package types\n\nconst (\n\tKB = 1 << 10\n\tMB = 1 << 20\n)\n\nconst (\n\tMinChunk     = 2 * MB  // Minimum chunk size\n\tMaxChunk     = 16 * MB // Maximum chunk size\n\tWorkerBuffer = 512 * KB\n)\n\nconst MinChunkSize = 16 * KB // unrelated\n";

    #[test]
    fn replaces_only_value_span() {
        let out = substitute(CONFIG, "MinChunk", "1 * MB").expect("substitute");
        assert!(out.contains("\tMinChunk     = 1 * MB  // Minimum chunk size\n"));
        assert!(out.contains("const MinChunkSize = 16 * KB // unrelated\n"));
        assert_eq!(out.len(), CONFIG.len());
    }

    #[test]
    fn replaces_value_without_trailing_doc() {
        let out = substitute(CONFIG, "WorkerBuffer", "64 * KB").expect("substitute");
        assert!(out.contains("\tWorkerBuffer = 64 * KB\n)"));
    }

    #[test]
    fn untouched_lines_survive_substitution() {
        let out = substitute(CONFIG, "MaxChunk", "64 * MB").expect("substitute");
        let before: Vec<&str> = CONFIG.lines().collect();
        let after: Vec<&str> = out.lines().collect();
        assert_eq!(before.len(), after.len());
        for (old, new) in before.iter().zip(&after) {
            if old.contains("MaxChunk ") {
                assert_eq!(*new, "\tMaxChunk     = 64 * MB // Maximum chunk size");
            } else {
                assert_eq!(old, new);
            }
        }
    }

    #[test]
    fn preserves_crlf_line_endings() {
        let content = "A = 1 // doc\r\nB = 2\r\n";
        let out = substitute(content, "B", "3").expect("substitute");
        assert_eq!(out, "A = 1 // doc\r\nB = 3\r\n");
        let out = substitute(content, "A", "9").expect("substitute");
        assert_eq!(out, "A = 9 // doc\r\nB = 2\r\n");
    }

    #[test]
    fn preserves_docs_without_leading_space_and_block_comments() {
        assert_eq!(substitute("X = 5// doc\n", "X", "7").expect("line"), "X = 7// doc\n");
        assert_eq!(
            substitute("Y = 5 /* doc */\n", "Y", "7").expect("block"),
            "Y = 7 /* doc */\n"
        );
        assert_eq!(
            substitute("\tZ = 4 * MB/* doc */\r\n", "Z", "8 * MB").expect("crlf"),
            "\tZ = 8 * MB/* doc */\r\n"
        );
    }

    #[test]
    fn division_in_value_is_replaced_whole() {
        let out = substitute("Ratio = 3 / 4 // half-ish\n", "Ratio", "1 / 2").expect("substitute");
        assert_eq!(out, "Ratio = 1 / 2 // half-ish\n");
    }

    #[test]
    fn missing_anchor_is_an_error() {
        let err = substitute(CONFIG, "TargetChunk", "4 * MB").unwrap_err();
        let anchor = err.downcast_ref::<AnchorError>().expect("anchor error");
        assert_eq!(anchor.matches, 0);
    }

    #[test]
    fn ambiguous_anchor_is_an_error() {
        let content = "X = 1\nfunc f() {\n\tX = 2\n}\n";
        let err = substitute(content, "X", "3").unwrap_err();
        let anchor = err.downcast_ref::<AnchorError>().expect("anchor error");
        assert_eq!(anchor.matches, 2);
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn comparisons_are_not_anchors() {
        let content = "Limit = 4\nif Limit == 4 {\n}\n";
        let out = substitute(content, "Limit", "8").expect("substitute");
        assert_eq!(out, "Limit = 8\nif Limit == 4 {\n}\n");
    }

    #[test]
    fn substitute_all_then_read_back() {
        let literals = vec![
            ("MinChunk".to_string(), "512 * KB".to_string()),
            ("MaxChunk".to_string(), "32 * MB".to_string()),
        ];
        let out = substitute_all(CONFIG, &literals).expect("substitute");
        assert_eq!(current_value(&out, "MinChunk").expect("min"), "512 * KB");
        assert_eq!(current_value(&out, "MaxChunk").expect("max"), "32 * MB");
        assert_eq!(current_value(&out, "WorkerBuffer").expect("buf"), "512 * KB");
    }
}
