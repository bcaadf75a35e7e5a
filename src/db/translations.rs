// src/db/translations.rs
// Translation rows: the persistent job queue. Claiming, saving, revival,
// stale-claim recovery.

use crate::types::{ContentItem, DeadLetterEntry, TranslationStatus};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, ToSql, params};
use std::time::Duration;

/// One row update applied by `save_translations_sync`. FAILED updates also
/// append a dead-letter row in the same transaction.
#[derive(Debug, Clone)]
pub struct TranslationUpdate {
    pub translation_id: i64,
    pub status: TranslationStatus,
    pub translated_text: Option<String>,
    pub engine_name: Option<String>,
    pub engine_version: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// A TRANSLATED row looked up by (text, target language, context hash).
#[derive(Debug, Clone)]
pub struct StoredTranslation {
    pub translated_text: Option<String>,
    pub engine_name: Option<String>,
}

/// Queue rows for each target language, inside the caller's transaction.
///
/// Rows that are already TRANSLATED (or in flight) are left alone; FAILED
/// rows are revived to PENDING preserving their translation_id. Returns the
/// number of rows queued or revived.
pub fn ensure_pending_sync(
    conn: &Connection,
    content_id: i64,
    target_langs: &[String],
    source_lang: Option<&str>,
    engine_version: &str,
    context_hash: &str,
    context_json: Option<&str>,
) -> Result<usize> {
    let mut queued = 0;
    for lang in target_langs {
        let existing: Option<(i64, String)> = conn
            .query_row(
                "SELECT translation_id, status FROM translations
                 WHERE content_id = ?1 AND target_lang = ?2 AND context_hash = ?3",
                params![content_id, lang, context_hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing.as_ref().map(|(id, s)| (*id, s.as_str())) {
            None => {
                conn.execute(
                    "INSERT INTO translations
                         (content_id, source_lang, target_lang, context_hash,
                          context_json, engine_version, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING')",
                    params![content_id, source_lang, lang, context_hash, context_json, engine_version],
                )?;
                queued += 1;
            }
            Some((id, "FAILED")) => {
                conn.execute(
                    "UPDATE translations SET
                         status = 'PENDING',
                         source_lang = ?2,
                         engine_version = ?3,
                         context_json = ?4,
                         last_updated_at = CURRENT_TIMESTAMP
                     WHERE translation_id = ?1",
                    params![id, source_lang, engine_version, context_json],
                )?;
                queued += 1;
            }
            Some(_) => {}
        }
    }
    Ok(queued)
}

/// Claim up to `batch_size` eligible rows for one target language.
///
/// SELECT + UPDATE-to-TRANSLATING run in one transaction; rows are only
/// returned after the commit, so no two workers can hold the same row.
pub fn claim_batch_sync(
    conn: &Connection,
    target_lang: &str,
    statuses: &[TranslationStatus],
    batch_size: usize,
) -> Result<Vec<ContentItem>> {
    if statuses.is_empty() || batch_size == 0 {
        return Ok(Vec::new());
    }

    let tx = conn.unchecked_transaction()?;

    let placeholders = vec!["?"; statuses.len()].join(", ");
    let select_sql = format!(
        "SELECT t.translation_id, t.content_id, c.value, t.context_hash, t.context_json
         FROM translations t
         JOIN content c ON c.content_id = t.content_id
         WHERE t.target_lang = ? AND t.status IN ({placeholders})
         ORDER BY t.last_updated_at ASC, t.translation_id ASC
         LIMIT ?"
    );

    let limit = batch_size as i64;
    let status_strs: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
    let mut args: Vec<&dyn ToSql> = vec![&target_lang];
    for status in &status_strs {
        args.push(status);
    }
    args.push(&limit);

    let items = {
        let mut stmt = tx.prepare(&select_sql)?;
        let rows = stmt.query_map(&args[..], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (translation_id, content_id, value, context_hash, context_json) = row?;
            let context = match context_json.as_deref() {
                Some(raw) => match serde_json::from_str(raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!(translation_id, "Unparseable context_json in queue: {e}");
                        None
                    }
                },
                None => None,
            };
            items.push(ContentItem {
                translation_id,
                content_id,
                value,
                context_hash,
                context,
            });
        }
        items
    };

    if !items.is_empty() {
        let id_placeholders = vec!["?"; items.len()].join(", ");
        let update_sql = format!(
            "UPDATE translations SET status = 'TRANSLATING', last_updated_at = CURRENT_TIMESTAMP
             WHERE translation_id IN ({id_placeholders})"
        );
        let id_args: Vec<&dyn ToSql> = items
            .iter()
            .map(|item| &item.translation_id as &dyn ToSql)
            .collect();
        tx.execute(&update_sql, &id_args[..])?;
    }

    tx.commit()?;
    Ok(items)
}

/// Apply a batch of outcomes in one transaction. Every FAILED outcome also
/// appends a dead-letter row inside the same commit.
pub fn save_translations_sync(conn: &Connection, updates: &[TranslationUpdate]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for update in updates {
        tx.execute(
            "UPDATE translations SET
                 translated_text = ?2,
                 engine_name = ?3,
                 engine_version = ?4,
                 status = ?5,
                 last_updated_at = CURRENT_TIMESTAMP
             WHERE translation_id = ?1",
            params![
                update.translation_id,
                update.translated_text,
                update.engine_name,
                update.engine_version,
                update.status.as_str(),
            ],
        )?;

        if update.status == TranslationStatus::Failed {
            tx.execute(
                "INSERT INTO dead_letters
                     (translation_id, content_id, target_lang, context_hash, last_error, attempts)
                 SELECT translation_id, content_id, target_lang, context_hash, ?2, ?3
                 FROM translations WHERE translation_id = ?1",
                params![
                    update.translation_id,
                    update.error.as_deref().unwrap_or("unknown error"),
                    update.attempts,
                ],
            )?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Look up the TRANSLATED row for (text, target language, context hash).
pub fn get_translation_sync(
    conn: &Connection,
    text: &str,
    target_lang: &str,
    context_hash: &str,
) -> Result<Option<StoredTranslation>> {
    let found = conn
        .query_row(
            "SELECT t.translated_text, t.engine_name
             FROM translations t
             JOIN content c ON c.content_id = t.content_id
             WHERE c.value = ?1 AND t.target_lang = ?2 AND t.context_hash = ?3
               AND t.status = 'TRANSLATED'",
            params![text, target_lang, context_hash],
            |row| {
                Ok(StoredTranslation {
                    translated_text: row.get(0)?,
                    engine_name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(found)
}

/// Put explicitly released claims back in the queue (cancellation path).
pub fn release_claims_sync(conn: &Connection, translation_ids: &[i64]) -> Result<usize> {
    if translation_ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; translation_ids.len()].join(", ");
    let sql = format!(
        "UPDATE translations SET status = 'PENDING', last_updated_at = CURRENT_TIMESTAMP
         WHERE status = 'TRANSLATING' AND translation_id IN ({placeholders})"
    );
    let args: Vec<&dyn ToSql> = translation_ids.iter().map(|id| id as &dyn ToSql).collect();
    let released = conn.execute(&sql, &args[..])?;
    Ok(released)
}

/// Revert TRANSLATING rows idle past the threshold to PENDING. Covers
/// workers that crashed mid-batch.
pub fn recover_stale_sync(conn: &Connection, stale_after: Duration) -> Result<usize> {
    let modifier = format!("-{} seconds", stale_after.as_secs());
    let recovered = conn.execute(
        "UPDATE translations SET status = 'PENDING', last_updated_at = CURRENT_TIMESTAMP
         WHERE status = 'TRANSLATING' AND last_updated_at < datetime('now', ?1)",
        params![modifier],
    )?;
    Ok(recovered)
}

/// Most recent dead-letter rows, newest first.
pub fn dead_letters_sync(conn: &Connection, limit: usize) -> Result<Vec<DeadLetterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT translation_id, content_id, target_lang, context_hash, last_error, attempts, moved_at
         FROM dead_letters ORDER BY id DESC LIMIT ?",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(DeadLetterEntry {
            translation_id: row.get(0)?,
            content_id: row.get(1)?,
            target_lang: row.get(2)?,
            context_hash: row.get(3)?,
            last_error: row.get(4)?,
            attempts: row.get(5)?,
            moved_at: row.get(6)?,
        })
    })?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GLOBAL_CONTEXT;
    use crate::db::content::upsert_content_sync;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        super::super::schema::run_all_migrations(&conn).unwrap();
        conn
    }

    fn queue_one(conn: &Connection, text: &str, lang: &str) -> i64 {
        let content_id = upsert_content_sync(conn, text).unwrap();
        ensure_pending_sync(
            conn,
            content_id,
            &[lang.to_string()],
            None,
            "test-1",
            GLOBAL_CONTEXT,
            None,
        )
        .unwrap();
        conn.query_row(
            "SELECT translation_id FROM translations WHERE content_id = ? AND target_lang = ?",
            params![content_id, lang],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn status_of(conn: &Connection, translation_id: i64) -> String {
        conn.query_row(
            "SELECT status FROM translations WHERE translation_id = ?",
            [translation_id],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_ensure_pending_is_idempotent() {
        let conn = test_conn();
        let content_id = upsert_content_sync(&conn, "Hello").unwrap();
        let langs = vec!["zh-CN".to_string()];
        let first =
            ensure_pending_sync(&conn, content_id, &langs, None, "v1", GLOBAL_CONTEXT, None)
                .unwrap();
        let second =
            ensure_pending_sync(&conn, content_id, &langs, None, "v1", GLOBAL_CONTEXT, None)
                .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM translations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_failed_row_is_revived_preserving_id() {
        let conn = test_conn();
        let id = queue_one(&conn, "Hello", "de");
        save_translations_sync(
            &conn,
            &[TranslationUpdate {
                translation_id: id,
                status: TranslationStatus::Failed,
                translated_text: None,
                engine_name: Some("debug".into()),
                engine_version: Some("v1".into()),
                error: Some("boom".into()),
                attempts: 3,
            }],
        )
        .unwrap();
        assert_eq!(status_of(&conn, id), "FAILED");

        let content_id = upsert_content_sync(&conn, "Hello").unwrap();
        let revived = ensure_pending_sync(
            &conn,
            content_id,
            &["de".to_string()],
            None,
            "v2",
            GLOBAL_CONTEXT,
            None,
        )
        .unwrap();
        assert_eq!(revived, 1);
        assert_eq!(status_of(&conn, id), "PENDING");
    }

    #[test]
    fn test_claim_marks_translating() {
        let conn = test_conn();
        let id = queue_one(&conn, "Hello", "de");

        let batch = claim_batch_sync(
            &conn,
            "de",
            &[TranslationStatus::Pending, TranslationStatus::Failed],
            10,
        )
        .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].translation_id, id);
        assert_eq!(batch[0].value, "Hello");
        assert_eq!(status_of(&conn, id), "TRANSLATING");

        // A second claim finds nothing
        let again = claim_batch_sync(&conn, "de", &[TranslationStatus::Pending], 10).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_claim_respects_language_and_batch_size() {
        let conn = test_conn();
        queue_one(&conn, "one", "de");
        queue_one(&conn, "two", "de");
        queue_one(&conn, "three", "fr");

        let batch = claim_batch_sync(&conn, "de", &[TranslationStatus::Pending], 1).unwrap();
        assert_eq!(batch.len(), 1);

        let rest = claim_batch_sync(&conn, "de", &[TranslationStatus::Pending], 10).unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_save_failed_appends_dead_letter() {
        let conn = test_conn();
        let id = queue_one(&conn, "Hello", "de");
        claim_batch_sync(&conn, "de", &[TranslationStatus::Pending], 10).unwrap();

        save_translations_sync(
            &conn,
            &[TranslationUpdate {
                translation_id: id,
                status: TranslationStatus::Failed,
                translated_text: None,
                engine_name: Some("debug".into()),
                engine_version: Some("v1".into()),
                error: Some("upstream 500".into()),
                attempts: 3,
            }],
        )
        .unwrap();

        let letters = dead_letters_sync(&conn, 10).unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].translation_id, id);
        assert_eq!(letters[0].last_error, "upstream 500");
        assert_eq!(letters[0].attempts, 3);
    }

    #[test]
    fn test_save_success_does_not_touch_dead_letters() {
        let conn = test_conn();
        let id = queue_one(&conn, "Hello", "de");
        claim_batch_sync(&conn, "de", &[TranslationStatus::Pending], 10).unwrap();

        save_translations_sync(
            &conn,
            &[TranslationUpdate {
                translation_id: id,
                status: TranslationStatus::Translated,
                translated_text: Some("Hallo".into()),
                engine_name: Some("debug".into()),
                engine_version: Some("v1".into()),
                error: None,
                attempts: 1,
            }],
        )
        .unwrap();

        assert_eq!(status_of(&conn, id), "TRANSLATED");
        assert!(dead_letters_sync(&conn, 10).unwrap().is_empty());
        let stored = get_translation_sync(&conn, "Hello", "de", GLOBAL_CONTEXT)
            .unwrap()
            .unwrap();
        assert_eq!(stored.translated_text.as_deref(), Some("Hallo"));
    }

    #[test]
    fn test_release_claims() {
        let conn = test_conn();
        let id = queue_one(&conn, "Hello", "de");
        claim_batch_sync(&conn, "de", &[TranslationStatus::Pending], 10).unwrap();

        let released = release_claims_sync(&conn, &[id]).unwrap();
        assert_eq!(released, 1);
        assert_eq!(status_of(&conn, id), "PENDING");

        // Releasing a non-claimed row is a no-op
        assert_eq!(release_claims_sync(&conn, &[id]).unwrap(), 0);
    }

    #[test]
    fn test_recover_stale_claims() {
        let conn = test_conn();
        let id = queue_one(&conn, "Hello", "de");
        claim_batch_sync(&conn, "de", &[TranslationStatus::Pending], 10).unwrap();

        // Fresh claims are not recovered
        assert_eq!(recover_stale_sync(&conn, Duration::from_secs(600)).unwrap(), 0);

        // Backdate the claim and recover it
        conn.execute(
            "UPDATE translations SET last_updated_at = datetime('now', '-2 hours')
             WHERE translation_id = ?",
            [id],
        )
        .unwrap();
        assert_eq!(recover_stale_sync(&conn, Duration::from_secs(600)).unwrap(), 1);
        assert_eq!(status_of(&conn, id), "PENDING");
    }
}
