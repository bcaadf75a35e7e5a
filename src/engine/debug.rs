// src/engine/debug.rs
// Deterministic in-process engine for tests and local development.
//
// Translations come from a fixed mapping (optionally overridden per context
// via an "overrides" object); unmapped items are echoed with a language tag.
// Failures can be injected to exercise the coordinator's retry paths.

use crate::engine::traits::TranslationEngine;
use crate::error::{Result, TransHubError};
use crate::types::EngineOutcome;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Configuration for the built-in debug engine.
#[derive(Debug, Clone, Deserialize)]
pub struct DebugEngineConfig {
    /// Fixed value -> translated text mapping.
    #[serde(default)]
    pub translation_map: HashMap<String, String>,
    /// Fail this many leading `translate_batch` calls with per-item errors.
    #[serde(default)]
    pub fail_calls: u32,
    /// Whether injected failures are retryable.
    #[serde(default = "DebugEngineConfig::default_fail_retryable")]
    pub fail_retryable: bool,
    #[serde(default = "DebugEngineConfig::default_version")]
    pub version: String,
    #[serde(default = "DebugEngineConfig::default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for DebugEngineConfig {
    fn default() -> Self {
        Self {
            translation_map: HashMap::new(),
            fail_calls: 0,
            fail_retryable: Self::default_fail_retryable(),
            version: Self::default_version(),
            max_batch_size: Self::default_max_batch_size(),
        }
    }
}

impl DebugEngineConfig {
    fn default_fail_retryable() -> bool {
        true
    }
    fn default_version() -> String {
        "debug-1".to_string()
    }
    fn default_max_batch_size() -> usize {
        50
    }
}

/// See module docs. Call counting makes retry behavior observable in tests.
#[derive(Default)]
pub struct DebugEngine {
    config: DebugEngineConfig,
    calls: AtomicU32,
}

impl DebugEngine {
    pub fn new(config: DebugEngineConfig) -> Self {
        Self {
            config,
            calls: AtomicU32::new(0),
        }
    }

    /// Build from the opaque registry config blob.
    pub fn from_config(raw: &Value) -> Result<Self> {
        let config: DebugEngineConfig = serde_json::from_value(raw.clone())
            .map_err(|e| TransHubError::Config(format!("debug engine config: {e}")))?;
        Ok(Self::new(config))
    }

    /// Number of `translate_batch` calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, item: &str, target_lang: &str, context: Option<&Value>) -> String {
        if let Some(text) = context
            .and_then(|ctx| ctx.get("overrides"))
            .and_then(|overrides| overrides.get(item))
            .and_then(Value::as_str)
        {
            return text.to_string();
        }
        if let Some(text) = self.config.translation_map.get(item) {
            return text.clone();
        }
        format!("[{target_lang}] {item}")
    }
}

#[async_trait]
impl TranslationEngine for DebugEngine {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn version(&self) -> String {
        self.config.version.clone()
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    fn validate_context(&self, raw: Option<&Value>) -> Result<Option<Value>> {
        match raw {
            None => Ok(None),
            Some(value) if value.is_object() => Ok(Some(value.clone())),
            Some(_) => Err(TransHubError::Validation(
                "debug engine context must be a JSON object".into(),
            )),
        }
    }

    async fn translate_batch(
        &self,
        _source_lang: Option<&str>,
        target_lang: &str,
        items: &[String],
        context: Option<&Value>,
    ) -> Result<Vec<EngineOutcome>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.config.fail_calls {
            tracing::debug!(call, "Debug engine injecting batch failure");
            return Ok(items
                .iter()
                .map(|_| {
                    EngineOutcome::failure(
                        format!("injected failure (call {call})"),
                        self.config.fail_retryable,
                    )
                })
                .collect());
        }

        Ok(items
            .iter()
            .map(|item| EngineOutcome::success(self.lookup(item, target_lang, context)))
            .collect())
    }
}
