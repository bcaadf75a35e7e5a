// src/coordinator/mod.rs
// The orchestrator: composes the store, cache, rate limiter and the active
// engine into the register/process/lookup surface applications use.

mod pipeline;


use crate::cache::{CacheKey, CachedTranslation, TranslationCache};
use crate::config::TransHubConfig;
use crate::context;
use crate::db::{PendingRequest, Store};
use crate::engine::{EngineRegistry, TranslationEngine};
use crate::error::{Result, TransHubError};
use crate::lang::validate_lang_tag;
use crate::rate_limiter::TokenBucket;
use crate::types::{DeadLetterEntry, GcReport, TranslationResult, TranslationStatus};
use futures::{Stream, StreamExt};
use pipeline::{BatchContext, ClaimGuard, process_batch};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Inputs for [`Coordinator::request`].
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub text: String,
    pub target_langs: Vec<String>,
    pub business_id: Option<String>,
    pub context: Option<Value>,
    pub source_lang: Option<String>,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, target_langs: Vec<String>) -> Self {
        Self {
            text: text.into(),
            target_langs,
            business_id: None,
            context: None,
            source_lang: None,
        }
    }

    pub fn business_id(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = Some(business_id.into());
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn source_lang(mut self, source_lang: impl Into<String>) -> Self {
        self.source_lang = Some(source_lang.into());
        self
    }
}

/// Per-run overrides for [`Coordinator::process_pending`]. Unset fields fall
/// back to the coordinator's configuration.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub batch_size: Option<usize>,
    pub limit: Option<usize>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: Option<f64>,
}

struct ActiveEngine {
    name: String,
    engine: Arc<dyn TranslationEngine>,
}

/// See module docs. One coordinator per database; clones of its store and
/// internals are pushed into the streams it hands out, so streams stay valid
/// independent of the borrow.
pub struct Coordinator {
    config: TransHubConfig,
    store: Store,
    registry: EngineRegistry,
    active: Arc<RwLock<ActiveEngine>>,
    cache: Arc<TranslationCache>,
    limiter: Arc<TokenBucket>,
}

impl Coordinator {
    /// Open the store, resolve and initialize the configured engine, and
    /// return a ready coordinator. Built-in engines only; use
    /// [`with_registry`](Self::with_registry) to add custom ones.
    pub async fn initialize(config: TransHubConfig) -> Result<Self> {
        Self::with_registry(config, EngineRegistry::with_builtins()).await
    }

    /// Like [`initialize`](Self::initialize) with a caller-built registry.
    pub async fn with_registry(config: TransHubConfig, registry: EngineRegistry) -> Result<Self> {
        config.validate()?;

        let store = Store::open(&config.database_url).await?;
        let engine = registry.create(&config.active_engine, &config.engine_config(&config.active_engine))?;
        engine.initialize().await?;
        info!(
            engine = %config.active_engine,
            version = %engine.version(),
            "Coordinator initialized"
        );

        let cache = Arc::new(TranslationCache::new(&config.cache));
        let limiter = Arc::new(TokenBucket::new(&config.rate_limiter));
        let active = Arc::new(RwLock::new(ActiveEngine {
            name: config.active_engine.clone(),
            engine,
        }));

        Ok(Self {
            config,
            store,
            registry,
            active,
            cache,
            limiter,
        })
    }

    /// Close the active engine and the store. In-flight streams finish their
    /// current batch against connections they already hold.
    pub async fn close(&self) -> Result<()> {
        let active = self.active.read().await;
        active.engine.close().await?;
        self.store.close();
        info!("Coordinator closed");
        Ok(())
    }

    /// Name of the currently active engine.
    pub async fn active_engine(&self) -> String {
        self.active.read().await.name.clone()
    }

    /// Resolve, initialize and activate a different engine. Batches already
    /// in flight complete with the engine they started with; subsequent
    /// batches (including later batches of an ongoing `process_pending`
    /// stream) use the new one.
    pub async fn switch_engine(&self, name: &str) -> Result<()> {
        let engine = self
            .registry
            .create(name, &self.config.engine_config(name))?;
        engine.initialize().await?;

        let mut active = self.active.write().await;
        info!(from = %active.name, to = %name, "Switching engine");
        // The previous engine is not closed here: in-flight batches may
        // still hold a reference. It is released when the last clone drops.
        *active = ActiveEngine {
            name: name.to_string(),
            engine,
        };
        Ok(())
    }

    /// Durably register translation work. Fast path: one transaction, no
    /// engine I/O. Returns the number of queue rows created or revived.
    pub async fn request(&self, request: TranslationRequest) -> Result<usize> {
        if request.text.is_empty() {
            return Err(TransHubError::Validation("text must not be empty".into()));
        }
        if request.target_langs.is_empty() {
            return Err(TransHubError::Validation(
                "at least one target language is required".into(),
            ));
        }
        for lang in &request.target_langs {
            validate_lang_tag(lang)?;
        }
        if let Some(source_lang) = request.source_lang.as_deref() {
            validate_lang_tag(source_lang)?;
        }
        if let Some(business_id) = request.business_id.as_deref()
            && business_id.is_empty()
        {
            return Err(TransHubError::Validation("business_id must not be empty".into()));
        }

        let context_hash = context::context_hash(request.context.as_ref())?;
        let context_json = match request.context.as_ref() {
            Some(value) => Some(context::canonical_json(value)?),
            None => None,
        };
        let engine_version = self.active.read().await.engine.version();

        let queued = self
            .store
            .ensure_pending(PendingRequest {
                text: request.text,
                target_langs: request.target_langs,
                source_lang: request.source_lang.or_else(|| self.config.source_lang.clone()),
                engine_version,
                business_id: request.business_id,
                context_hash,
                context_json,
            })
            .await?;
        Ok(queued)
    }

    /// Drain eligible work for one target language.
    ///
    /// Lazily claims batches, translates them under the retry and rate-limit
    /// policies, commits each batch (dead-lettering terminal failures) and
    /// yields its results in claim order. Per-item failures are reported as
    /// FAILED results; storage errors abort the stream.
    pub fn process_pending(
        &self,
        target_lang: impl Into<String>,
        options: ProcessOptions,
    ) -> impl Stream<Item = Result<TranslationResult>> + Send + 'static {
        let target_lang = target_lang.into();
        let store = self.store.clone();
        let active = self.active.clone();
        let stale_after = Duration::from_secs(self.config.stale_claim_after_secs);

        let mut retry = self.config.retry.clone();
        if let Some(max_attempts) = options.max_attempts {
            retry.max_attempts = max_attempts;
        }
        if let Some(initial_backoff) = options.initial_backoff_secs {
            retry.initial_backoff_secs = initial_backoff;
        }
        let ctx = BatchContext {
            store: store.clone(),
            cache: self.cache.clone(),
            limiter: self.limiter.clone(),
            retry,
            engine_timeout: Duration::from_secs(self.config.engine_timeout_secs),
            source_lang: self.config.source_lang.clone(),
        };
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size);
        let limit = options.limit;

        async_stream::try_stream! {
            validate_lang_tag(&target_lang)?;

            let recovered = store.recover_stale_claims(stale_after).await?;
            if recovered > 0 {
                info!(recovered, "Recovered stale claims before processing");
            }

            let batches = store.stream_translatable(
                target_lang.clone(),
                vec![TranslationStatus::Pending, TranslationStatus::Failed],
                batch_size,
                limit,
            );
            futures::pin_mut!(batches);
            while let Some(batch) = batches.next().await {
                let batch = batch?;
                tracing::debug!(
                    target_lang = %target_lang,
                    size = batch.len(),
                    "Processing claimed batch"
                );

                // Re-read per batch so switch_engine applies mid-stream
                let engine = active.read().await.engine.clone();
                let ids: Vec<i64> = batch.iter().map(|item| item.translation_id).collect();
                let mut guard = ClaimGuard::new(store.clone(), ids);
                let results = process_batch(&ctx, engine, &target_lang, &batch).await;
                // Commit decided either way: on success the batch is saved;
                // on a storage error the rows stay TRANSLATING for
                // stale-claim recovery. The guard only covers cancellation.
                guard.disarm();
                for result in results? {
                    yield result;
                }
            }
        }
    }

    /// Look up a finished translation: in-process cache first, then the
    /// store (backfilling the cache on a hit). `from_cache` is true only for
    /// cache hits.
    pub async fn get_translation(
        &self,
        text: &str,
        target_lang: &str,
        context: Option<&Value>,
    ) -> Result<Option<TranslationResult>> {
        validate_lang_tag(target_lang)?;
        let context_hash = context::context_hash(context)?;
        let key = CacheKey::new(text, target_lang, &context_hash);

        if let Some(hit) = self.cache.get(&key).await {
            return Ok(Some(TranslationResult {
                original_content: text.to_string(),
                translated_content: Some(hit.translated_text),
                target_lang: target_lang.to_string(),
                status: TranslationStatus::Translated,
                engine: hit.engine_name,
                from_cache: true,
                error: None,
                context_hash,
                business_id: None,
            }));
        }

        let stored = self
            .store
            .get_translation(text.to_string(), target_lang.to_string(), context_hash.clone())
            .await?;
        let Some(stored) = stored else {
            return Ok(None);
        };
        if let Some(translated_text) = stored.translated_text.clone() {
            self.cache
                .put(
                    key,
                    CachedTranslation {
                        translated_text,
                        engine_name: stored.engine_name.clone(),
                    },
                )
                .await;
        }

        Ok(Some(TranslationResult {
            original_content: text.to_string(),
            translated_content: stored.translated_text,
            target_lang: target_lang.to_string(),
            status: TranslationStatus::Translated,
            engine: stored.engine_name,
            from_cache: false,
            error: None,
            context_hash,
            business_id: None,
        }))
    }

    /// Collect stale sources and orphaned content. `retention_days` falls
    /// back to the configured default.
    pub async fn run_gc(&self, retention_days: Option<u32>, dry_run: bool) -> Result<GcReport> {
        let retention_days = retention_days.unwrap_or(self.config.gc_retention_days);
        self.store.garbage_collect(retention_days, dry_run).await
    }

    /// Bump a source association's last_seen_at without re-registering.
    pub async fn touch_source(&self, business_id: &str) -> Result<bool> {
        self.store.touch_source(business_id.to_string()).await
    }

    /// Most recent dead-letter rows, newest first.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>> {
        self.store.dead_letters(limit).await
    }

    /// The store backing this coordinator (for maintenance tooling/tests).
    #[doc(hidden)]
    pub fn store(&self) -> &Store {
        &self.store
    }
}
