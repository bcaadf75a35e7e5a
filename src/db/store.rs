// src/db/store.rs
// Async facade over the pooled database: the sole gateway to durable state.
//
// Writes serialize on a process-wide gate (SQLite has a single writer);
// reads go straight to the pool. Everything observable by callers happens
// inside one transaction per operation.

use crate::db::pool::DatabasePool;
use crate::db::{content, gc, sources, translations};
use crate::error::{Result, TransHubError};
use crate::types::{ContentItem, DeadLetterEntry, GcReport, TranslationStatus};
use futures::Stream;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub use crate::db::translations::{StoredTranslation, TranslationUpdate};

/// Inputs for [`Store::ensure_pending`].
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub text: String,
    pub target_langs: Vec<String>,
    pub source_lang: Option<String>,
    pub engine_version: String,
    pub business_id: Option<String>,
    pub context_hash: String,
    pub context_json: Option<String>,
}

/// Persistent repository for content, sources, translations and the
/// dead-letter queue. Cheap to clone; clones share the pool and writer gate.
#[derive(Clone)]
pub struct Store {
    pool: Arc<DatabasePool>,
    write_gate: Arc<Mutex<()>>,
}

impl Store {
    /// Open the store at `database_url` (`:memory:` for tests) and run
    /// migrations.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = if database_url == ":memory:" {
            DatabasePool::open_in_memory().await
        } else {
            DatabasePool::open(Path::new(database_url)).await
        }
        .map_err(|e| TransHubError::Storage(e.to_string()))?;

        tracing::info!(database_url, "Store opened");
        Ok(Self {
            pool: Arc::new(pool),
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::open(":memory:").await
    }

    /// Close the underlying pool. Safe to call more than once.
    pub fn close(&self) {
        self.pool.close();
        tracing::info!("Store closed");
    }

    /// Run a write closure under the writer gate, with contention retry.
    async fn write<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> anyhow::Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        let _guard = self.write_gate.lock().await;
        self.pool.interact_with_retry(f).await.map_err(classify_db_error)
    }

    /// Run a read-only closure; never takes the writer gate.
    async fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.pool.interact(f).await.map_err(classify_db_error)
    }

    /// Durably register work in ONE transaction: upsert content by value,
    /// upsert the business-id association when present, and queue a PENDING
    /// row per target language (reviving FAILED rows, skipping keys that are
    /// already TRANSLATED or in flight). Returns the number of rows queued.
    pub async fn ensure_pending(&self, request: PendingRequest) -> Result<usize> {
        self.write(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let content_id = content::upsert_content_sync(&tx, &request.text)?;
            if let Some(business_id) = request.business_id.as_deref() {
                sources::upsert_source_sync(&tx, business_id, content_id, &request.context_hash)?;
            }
            let queued = translations::ensure_pending_sync(
                &tx,
                content_id,
                &request.target_langs,
                request.source_lang.as_deref(),
                &request.engine_version,
                &request.context_hash,
                request.context_json.as_deref(),
            )?;
            tx.commit()?;
            Ok(queued)
        })
        .await
    }

    /// Atomically claim one batch: eligible rows flip to TRANSLATING inside
    /// the transaction and are returned only after it commits.
    pub async fn claim_batch(
        &self,
        target_lang: String,
        statuses: Vec<TranslationStatus>,
        batch_size: usize,
    ) -> Result<Vec<ContentItem>> {
        self.write(move |conn| {
            translations::claim_batch_sync(conn, &target_lang, &statuses, batch_size)
        })
        .await
    }

    /// Lazy stream of claimed batches for one target language.
    ///
    /// Each batch is claimed (and committed) only when the consumer asks for
    /// it; `limit` bounds the total number of rows across batches.
    pub fn stream_translatable(
        &self,
        target_lang: impl Into<String>,
        statuses: Vec<TranslationStatus>,
        batch_size: usize,
        limit: Option<usize>,
    ) -> impl Stream<Item = Result<Vec<ContentItem>>> + Send + 'static {
        let store = self.clone();
        let target_lang = target_lang.into();
        async_stream::try_stream! {
            let mut remaining = limit;
            loop {
                let take = match remaining {
                    Some(0) => break,
                    Some(n) => batch_size.min(n),
                    None => batch_size,
                };
                let batch = store
                    .claim_batch(target_lang.clone(), statuses.clone(), take)
                    .await?;
                if batch.is_empty() {
                    break;
                }
                if let Some(n) = remaining.as_mut() {
                    *n = n.saturating_sub(batch.len());
                }
                yield batch;
            }
        }
    }

    /// Commit a batch of outcomes; FAILED outcomes append their dead-letter
    /// rows inside the same transaction.
    pub async fn save_translations(&self, updates: Vec<TranslationUpdate>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.write(move |conn| translations::save_translations_sync(conn, &updates))
            .await
    }

    /// Return claimed-but-unprocessed rows to the queue (cancellation path).
    pub async fn release_claims(&self, translation_ids: Vec<i64>) -> Result<usize> {
        if translation_ids.is_empty() {
            return Ok(0);
        }
        self.write(move |conn| translations::release_claims_sync(conn, &translation_ids))
            .await
    }

    /// Revert TRANSLATING rows idle past `stale_after` to PENDING.
    pub async fn recover_stale_claims(&self, stale_after: Duration) -> Result<usize> {
        self.write(move |conn| translations::recover_stale_sync(conn, stale_after))
            .await
    }

    /// Look up the TRANSLATED row for (text, target language, context hash).
    pub async fn get_translation(
        &self,
        text: String,
        target_lang: String,
        context_hash: String,
    ) -> Result<Option<StoredTranslation>> {
        self.read(move |conn| {
            translations::get_translation_sync(conn, &text, &target_lang, &context_hash)
        })
        .await
    }

    /// Find a business id for result enrichment.
    pub async fn get_business_id_for_content(
        &self,
        content_id: i64,
        context_hash: String,
    ) -> Result<Option<String>> {
        self.read(move |conn| sources::get_business_id_sync(conn, content_id, &context_hash))
            .await
    }

    /// Bump a source's last_seen_at. Returns false for unknown ids.
    pub async fn touch_source(&self, business_id: String) -> Result<bool> {
        self.write(move |conn| sources::touch_source_sync(conn, &business_id))
            .await
    }

    /// Delete stale sources and orphaned content (see [`gc`] for the exact
    /// predicate). `dry_run` reports counts without committing.
    pub async fn garbage_collect(&self, retention_days: u32, dry_run: bool) -> Result<GcReport> {
        let report = self
            .write(move |conn| gc::garbage_collect_sync(conn, retention_days, dry_run))
            .await?;
        tracing::info!(
            retention_days,
            dry_run,
            sources = report.deleted_sources,
            content = report.deleted_content,
            translations = report.deleted_translations,
            "Garbage collection finished"
        );
        Ok(report)
    }

    /// Most recent dead-letter rows, newest first.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>> {
        self.read(move |conn| translations::dead_letters_sync(conn, limit))
            .await
    }

    /// Direct pool access for tests and maintenance tooling.
    #[doc(hidden)]
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

/// Map pool/driver failures onto the library error type. Unique-constraint
/// violations indicate a bug in idempotent-by-design writes and surface as
/// Conflict.
fn classify_db_error(err: anyhow::Error) -> TransHubError {
    match err.downcast::<rusqlite::Error>() {
        Ok(db_err) => {
            if matches!(
                &db_err,
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error {
                        code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                        ..
                    },
                    _,
                )
            ) {
                TransHubError::Conflict(db_err.to_string())
            } else {
                TransHubError::Db(db_err)
            }
        }
        Err(other) => TransHubError::Storage(other.to_string()),
    }
}
