// src/engine/traits.rs
// The contract every translation engine implements

use crate::error::Result;
use crate::types::EngineOutcome;
use async_trait::async_trait;
use serde_json::Value;

/// A pluggable translator. Implementations are looked up by name through the
/// [`registry`](crate::engine::registry) and owned by the coordinator.
///
/// Engines that are not safe to share across worker tasks should say so in
/// their docs; the coordinator otherwise assumes `Send + Sync` sharing.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Network/credential checks as needed; called once before first use.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Registry name of this engine.
    fn name(&self) -> &'static str;

    /// Stable version identifier, recorded per translation row.
    fn version(&self) -> String;

    /// Upper bound on items per `translate_batch` call; the coordinator
    /// never exceeds it.
    fn max_batch_size(&self) -> usize {
        50
    }

    /// Normalize a raw per-request context into whatever this engine
    /// consumes. Errors here are non-retryable: the whole context group is
    /// failed terminally.
    fn validate_context(&self, raw: Option<&Value>) -> Result<Option<Value>> {
        Ok(raw.cloned())
    }

    /// Translate a batch, returning one outcome per input in input order.
    ///
    /// `Err` is reserved for unrecoverable conditions. Transient wholesale
    /// failures (network, 5xx, remote rate limits) must be reported as
    /// per-item retryable outcomes so the coordinator can drive retry policy
    /// uniformly.
    async fn translate_batch(
        &self,
        source_lang: Option<&str>,
        target_lang: &str,
        items: &[String],
        context: Option<&Value>,
    ) -> Result<Vec<EngineOutcome>>;
}

impl std::fmt::Debug for dyn TranslationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationEngine")
            .field("name", &self.name())
            .finish()
    }
}
