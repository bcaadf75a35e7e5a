// src/types.rs
// Core DTOs shared by the store, the engines and the coordinator

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle state of a translation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranslationStatus {
    Pending,
    Translating,
    Translated,
    Failed,
    /// Reserved for human review workflows - never written by the core.
    Approved,
}

impl TranslationStatus {
    /// Stable string form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Translating => "TRANSLATING",
            Self::Translated => "TRANSLATED",
            Self::Failed => "FAILED",
            Self::Approved => "APPROVED",
        }
    }

    /// Parse the stored string form.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "TRANSLATING" => Some(Self::Translating),
            "TRANSLATED" => Some(Self::Translated),
            "FAILED" => Some(Self::Failed),
            "APPROVED" => Some(Self::Approved),
            _ => None,
        }
    }
}

impl fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A claimed queue row handed to the processing pipeline.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub translation_id: i64,
    pub content_id: i64,
    pub value: String,
    pub context_hash: String,
    /// Deserialized context_json, when the row carries one.
    pub context: Option<Value>,
}

/// Per-item outcome of an engine batch call, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Success { text: String },
    Failure { message: String, retryable: bool },
}

impl EngineOutcome {
    pub fn success(text: impl Into<String>) -> Self {
        Self::Success { text: text.into() }
    }

    pub fn failure(message: impl Into<String>, retryable: bool) -> Self {
        Self::Failure {
            message: message.into(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failure { retryable: true, .. })
    }
}

/// Final result emitted for one (content, target language, context) key.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationResult {
    pub original_content: String,
    pub translated_content: Option<String>,
    pub target_lang: String,
    pub status: TranslationStatus,
    pub engine: Option<String>,
    pub from_cache: bool,
    pub error: Option<String>,
    pub context_hash: String,
    pub business_id: Option<String>,
}

/// Counts reported by one garbage-collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub deleted_sources: u64,
    pub deleted_content: u64,
    pub deleted_translations: u64,
}

/// One row of the dead-letter queue.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub translation_id: i64,
    pub content_id: i64,
    pub target_lang: String,
    pub context_hash: String,
    pub last_error: String,
    pub attempts: u32,
    pub moved_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TranslationStatus::Pending,
            TranslationStatus::Translating,
            TranslationStatus::Translated,
            TranslationStatus::Failed,
            TranslationStatus::Approved,
        ] {
            assert_eq!(TranslationStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_status_from_str_invalid() {
        assert_eq!(TranslationStatus::from_str("pending"), None);
        assert_eq!(TranslationStatus::from_str(""), None);
    }

    #[test]
    fn test_outcome_retryable() {
        assert!(EngineOutcome::failure("timeout", true).is_retryable());
        assert!(!EngineOutcome::failure("bad request", false).is_retryable());
        assert!(!EngineOutcome::success("ok").is_retryable());
    }
}
