// src/coordinator/pipeline.rs
// Batch processing: context grouping, cache partitioning, the retry loop,
// business-id enrichment and the atomic commit of a claimed batch.

use crate::cache::{CacheKey, CachedTranslation, TranslationCache};
use crate::config::RetryPolicy;
use crate::db::{Store, TranslationUpdate};
use crate::engine::TranslationEngine;
use crate::error::Result;
use crate::rate_limiter::TokenBucket;
use crate::types::{ContentItem, EngineOutcome, TranslationResult, TranslationStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Everything one batch needs besides the engine (which is re-resolved per
/// batch so `switch_engine` applies to subsequent batches).
pub(crate) struct BatchContext {
    pub store: Store,
    pub cache: Arc<TranslationCache>,
    pub limiter: Arc<TokenBucket>,
    pub retry: RetryPolicy,
    pub engine_timeout: Duration,
    pub source_lang: Option<String>,
}

/// Final per-item verdict inside one batch.
enum ItemOutcome {
    Translated {
        text: String,
        engine_name: Option<String>,
        attempts: u32,
    },
    Failed {
        message: String,
        attempts: u32,
    },
}

/// Process one claimed batch end to end and commit the outcome.
///
/// Per-item failures are folded into the returned results; only storage
/// failures (and internal bugs) surface as `Err`, leaving the rows in
/// TRANSLATING for stale-claim recovery.
pub(crate) async fn process_batch(
    ctx: &BatchContext,
    engine: Arc<dyn TranslationEngine>,
    target_lang: &str,
    batch: &[ContentItem],
) -> Result<Vec<TranslationResult>> {
    let mut outcomes: HashMap<i64, ItemOutcome> = HashMap::with_capacity(batch.len());

    for (context_hash, items) in group_by_context(batch) {
        // All items in a group share one context by construction
        let raw_context = items.iter().find_map(|item| item.context.as_ref());
        let engine_context = match engine.validate_context(raw_context) {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(context_hash, "Context rejected by engine: {e}");
                for item in &items {
                    outcomes.insert(
                        item.translation_id,
                        ItemOutcome::Failed {
                            message: format!("context validation failed: {e}"),
                            attempts: 0,
                        },
                    );
                }
                continue;
            }
        };

        // Partition into cache hits and work for the engine
        let mut to_translate = Vec::new();
        for item in items {
            let key = CacheKey::new(&item.value, target_lang, &item.context_hash);
            match ctx.cache.get(&key).await {
                Some(hit) => {
                    outcomes.insert(
                        item.translation_id,
                        ItemOutcome::Translated {
                            text: hit.translated_text,
                            engine_name: hit.engine_name,
                            attempts: 0,
                        },
                    );
                }
                None => to_translate.push(item),
            }
        }

        if to_translate.is_empty() {
            continue;
        }

        let translated = retry_loop(
            ctx,
            engine.as_ref(),
            target_lang,
            &to_translate,
            engine_context.as_ref(),
        )
        .await;

        // New successes feed the cache before results are merged
        for (item, outcome) in to_translate.iter().zip(&translated) {
            if let ItemOutcome::Translated { text, .. } = outcome {
                ctx.cache
                    .put(
                        CacheKey::new(&item.value, target_lang, &item.context_hash),
                        CachedTranslation {
                            translated_text: text.clone(),
                            engine_name: Some(engine.name().to_string()),
                        },
                    )
                    .await;
            }
        }
        for (item, outcome) in to_translate.into_iter().zip(translated) {
            outcomes.insert(item.translation_id, outcome);
        }
    }

    // One business-id lookup per distinct (content_id, context_hash) pair
    let mut business_ids: HashMap<(i64, String), Option<String>> = HashMap::new();
    for item in batch {
        let key = (item.content_id, item.context_hash.clone());
        if !business_ids.contains_key(&key) {
            let business_id = ctx
                .store
                .get_business_id_for_content(item.content_id, item.context_hash.clone())
                .await?;
            business_ids.insert(key, business_id);
        }
    }

    // Merge into claim order and commit everything in one transaction
    let mut results = Vec::with_capacity(batch.len());
    let mut updates = Vec::with_capacity(batch.len());
    for item in batch {
        let outcome = outcomes
            .remove(&item.translation_id)
            .unwrap_or(ItemOutcome::Failed {
                message: "no outcome produced for item".into(),
                attempts: 0,
            });
        let business_id = business_ids
            .get(&(item.content_id, item.context_hash.clone()))
            .cloned()
            .flatten();

        let (result, update) = finalize_item(&engine, target_lang, item, outcome, business_id);
        results.push(result);
        updates.push(update);
    }

    ctx.store.save_translations(updates).await?;
    Ok(results)
}

/// Group items by context hash, preserving first-seen order.
fn group_by_context(batch: &[ContentItem]) -> Vec<(String, Vec<&ContentItem>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&ContentItem>> = HashMap::new();
    for item in batch {
        if !groups.contains_key(&item.context_hash) {
            order.push(item.context_hash.clone());
        }
        groups.entry(item.context_hash.clone()).or_default().push(item);
    }
    order
        .into_iter()
        .map(|hash| {
            let items = groups.remove(&hash).unwrap_or_default();
            (hash, items)
        })
        .collect()
}

/// Drive the engine until every outstanding item has a terminal verdict.
///
/// The rate limiter gates every call, including retries. Wholesale engine
/// errors and timeouts are folded into per-item retryable failures so one
/// bad batch cannot stall the pipeline; exhausted retries become terminal.
async fn retry_loop(
    ctx: &BatchContext,
    engine: &dyn TranslationEngine,
    target_lang: &str,
    items: &[&ContentItem],
    engine_context: Option<&Value>,
) -> Vec<ItemOutcome> {
    let max_attempts = ctx.retry.max_attempts.max(1);
    let mut final_outcomes: HashMap<i64, ItemOutcome> = HashMap::with_capacity(items.len());
    let mut outstanding: Vec<&ContentItem> = items.to_vec();

    for attempt in 1..=max_attempts {
        // Engine calls never exceed the engine's batch cap; the limiter
        // gates every call, including retries.
        let chunk_size = engine.max_batch_size().max(1);
        let mut batch_outcomes = Vec::with_capacity(outstanding.len());
        for chunk in outstanding.chunks(chunk_size) {
            ctx.limiter.acquire(1.0).await;

            let texts: Vec<String> = chunk.iter().map(|item| item.value.clone()).collect();
            let call = engine.translate_batch(
                ctx.source_lang.as_deref(),
                target_lang,
                &texts,
                engine_context,
            );
            let outcomes = match timeout(ctx.engine_timeout, call).await {
                Err(_) => {
                    tracing::warn!(attempt, "Engine call timed out after {:?}", ctx.engine_timeout);
                    vec![EngineOutcome::failure("engine call timed out", true); texts.len()]
                }
                Ok(Err(e)) => {
                    tracing::warn!(attempt, "Engine batch call failed: {e}");
                    vec![EngineOutcome::failure(format!("engine failure: {e}"), true); texts.len()]
                }
                Ok(Ok(outcomes)) if outcomes.len() != texts.len() => {
                    tracing::error!(
                        expected = texts.len(),
                        got = outcomes.len(),
                        "Engine returned wrong number of outcomes"
                    );
                    vec![
                        EngineOutcome::failure("engine returned wrong number of outcomes", false);
                        texts.len()
                    ]
                }
                Ok(Ok(outcomes)) => outcomes,
            };
            batch_outcomes.extend(outcomes);
        }

        let mut still_retryable = Vec::new();
        for (item, outcome) in outstanding.into_iter().zip(batch_outcomes) {
            match outcome {
                EngineOutcome::Success { text } => {
                    final_outcomes.insert(
                        item.translation_id,
                        ItemOutcome::Translated {
                            text,
                            engine_name: Some(engine.name().to_string()),
                            attempts: attempt,
                        },
                    );
                }
                EngineOutcome::Failure { message, retryable } => {
                    if retryable && attempt < max_attempts {
                        still_retryable.push(item);
                    } else {
                        final_outcomes.insert(
                            item.translation_id,
                            ItemOutcome::Failed {
                                message,
                                attempts: attempt,
                            },
                        );
                    }
                }
            }
        }

        outstanding = still_retryable;
        if outstanding.is_empty() {
            break;
        }

        let backoff = ctx.retry.backoff_for_attempt(attempt);
        if !backoff.is_zero() {
            tracing::debug!(attempt, "Backing off {:?} before retry", backoff);
            sleep(backoff).await;
        }
    }

    items
        .iter()
        .map(|item| {
            final_outcomes
                .remove(&item.translation_id)
                .unwrap_or(ItemOutcome::Failed {
                    message: "retry loop produced no verdict".into(),
                    attempts: max_attempts,
                })
        })
        .collect()
}

/// Turn one verdict into the emitted result and the row update.
fn finalize_item(
    engine: &Arc<dyn TranslationEngine>,
    target_lang: &str,
    item: &ContentItem,
    outcome: ItemOutcome,
    business_id: Option<String>,
) -> (TranslationResult, TranslationUpdate) {
    match outcome {
        ItemOutcome::Translated {
            text,
            engine_name,
            attempts,
        } => {
            let engine_name = engine_name.unwrap_or_else(|| engine.name().to_string());
            let result = TranslationResult {
                original_content: item.value.clone(),
                translated_content: Some(text.clone()),
                target_lang: target_lang.to_string(),
                status: TranslationStatus::Translated,
                engine: Some(engine_name.clone()),
                from_cache: false,
                error: None,
                context_hash: item.context_hash.clone(),
                business_id,
            };
            let update = TranslationUpdate {
                translation_id: item.translation_id,
                status: TranslationStatus::Translated,
                translated_text: Some(text),
                engine_name: Some(engine_name),
                engine_version: Some(engine.version()),
                error: None,
                attempts: attempts.max(1),
            };
            (result, update)
        }
        ItemOutcome::Failed { message, attempts } => {
            let result = TranslationResult {
                original_content: item.value.clone(),
                translated_content: None,
                target_lang: target_lang.to_string(),
                status: TranslationStatus::Failed,
                engine: Some(engine.name().to_string()),
                from_cache: false,
                error: Some(message.clone()),
                context_hash: item.context_hash.clone(),
                business_id,
            };
            let update = TranslationUpdate {
                translation_id: item.translation_id,
                status: TranslationStatus::Failed,
                translated_text: None,
                engine_name: Some(engine.name().to_string()),
                engine_version: Some(engine.version()),
                error: Some(message),
                attempts: attempts.max(1),
            };
            (result, update)
        }
    }
}

/// Hands claims back to the queue if the batch is dropped before its commit
/// (consumer cancelled the stream mid-processing). Disarmed once the batch
/// outcome is decided.
pub(crate) struct ClaimGuard {
    store: Store,
    translation_ids: Vec<i64>,
    armed: bool,
}

impl ClaimGuard {
    pub(crate) fn new(store: Store, translation_ids: Vec<i64>) -> Self {
        Self {
            store,
            translation_ids,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed || self.translation_ids.is_empty() {
            return;
        }
        let store = self.store.clone();
        let ids = std::mem::take(&mut self.translation_ids);
        // Drop cannot await; release on a detached task. Stale-claim
        // recovery is the backstop if no runtime is available here.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tracing::debug!(count = ids.len(), "Releasing claims after cancellation");
            handle.spawn(async move {
                if let Err(e) = store.release_claims(ids).await {
                    tracing::warn!("Failed to release cancelled claims: {e}");
                }
            });
        }
    }
}
