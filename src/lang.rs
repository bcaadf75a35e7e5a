// src/lang.rs
// Language tag validation for request inputs

use crate::error::{Result, TransHubError};
use regex::Regex;
use std::sync::LazyLock;

/// BCP-47-ish shape: a 2-3 letter primary subtag followed by optional
/// alphanumeric subtags ("en", "zh-CN", "sr-Latn-RS"). Full RFC 5646
/// validation is deliberately out of scope.
static LANG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("valid regex"));

/// Validate a single target/source language tag.
pub fn validate_lang_tag(tag: &str) -> Result<()> {
    if LANG_TAG.is_match(tag) {
        Ok(())
    } else {
        Err(TransHubError::Validation(format!(
            "malformed language code: {tag:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tags() {
        for tag in ["en", "zh-CN", "pt-BR", "sr-Latn-RS", "yue", "de-1996"] {
            assert!(validate_lang_tag(tag).is_ok(), "expected valid: {tag}");
        }
    }

    #[test]
    fn test_invalid_tags() {
        for tag in ["", "e", "english language", "zh_CN", "en-", "-en", "1234"] {
            assert!(validate_lang_tag(tag).is_err(), "expected invalid: {tag}");
        }
    }
}
