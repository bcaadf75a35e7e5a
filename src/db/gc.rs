// src/db/gc.rs
// Garbage collection of stale sources and orphaned content

use crate::types::GcReport;
use anyhow::Result;
use rusqlite::{Connection, params};

/// Collect stale state in one transaction:
///
/// 1. Sources whose last_seen_at is older than the retention window
///    (date-granular comparison) are deleted.
/// 2. Content no longer referenced by any source and carrying no queued work
///    (no PENDING or TRANSLATING row) is deleted; its terminal translations
///    cascade away with it.
///
/// `dry_run` performs the identical statements and rolls back, so the
/// returned counts match what a real run would delete.
pub fn garbage_collect_sync(
    conn: &Connection,
    retention_days: u32,
    dry_run: bool,
) -> Result<GcReport> {
    let tx = conn.unchecked_transaction()?;
    let cutoff = format!("-{retention_days} days");

    let deleted_sources = tx.execute(
        "DELETE FROM sources WHERE DATE(last_seen_at) < DATE('now', ?1)",
        params![cutoff],
    )? as u64;

    // Orphan candidates, evaluated after the source sweep above.
    let deleted_translations: u64 = tx.query_row(
        "SELECT COUNT(*) FROM translations t
         WHERE t.content_id IN (
             SELECT c.content_id FROM content c
             WHERE NOT EXISTS (SELECT 1 FROM sources s WHERE s.content_id = c.content_id)
               AND NOT EXISTS (
                   SELECT 1 FROM translations q
                   WHERE q.content_id = c.content_id
                     AND q.status IN ('PENDING', 'TRANSLATING')
               )
         )",
        [],
        |row| row.get::<_, i64>(0),
    )? as u64;

    let deleted_content = tx.execute(
        "DELETE FROM content
         WHERE NOT EXISTS (SELECT 1 FROM sources s WHERE s.content_id = content.content_id)
           AND NOT EXISTS (
               SELECT 1 FROM translations q
               WHERE q.content_id = content.content_id
                 AND q.status IN ('PENDING', 'TRANSLATING')
           )",
        [],
    )? as u64;

    let report = GcReport {
        deleted_sources,
        deleted_content,
        deleted_translations,
    };

    if dry_run {
        tracing::debug!(?report, "GC dry run, rolling back");
        // Dropping the transaction without commit rolls everything back.
    } else {
        tx.commit()?;
    }
    Ok(report)
}
