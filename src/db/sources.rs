// src/db/sources.rs
// Source rows: business-id associations to content

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

/// Upsert a business-id association and bump last_seen_at.
pub fn upsert_source_sync(
    conn: &Connection,
    business_id: &str,
    content_id: i64,
    context_hash: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sources (business_id, content_id, context_hash, last_seen_at)
         VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
         ON CONFLICT(business_id) DO UPDATE SET
             content_id = excluded.content_id,
             context_hash = excluded.context_hash,
             last_seen_at = CURRENT_TIMESTAMP",
        params![business_id, content_id, context_hash],
    )?;
    Ok(())
}

/// Bump last_seen_at only. Returns false when the business id is unknown.
pub fn touch_source_sync(conn: &Connection, business_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE sources SET last_seen_at = CURRENT_TIMESTAMP WHERE business_id = ?",
        params![business_id],
    )?;
    Ok(changed > 0)
}

/// Find a business id referring to this (content, context) pair, for result
/// enrichment. When several match, the lexicographically first wins so the
/// answer is stable.
pub fn get_business_id_sync(
    conn: &Connection,
    content_id: i64,
    context_hash: &str,
) -> Result<Option<String>> {
    let business_id = conn
        .query_row(
            "SELECT business_id FROM sources
             WHERE content_id = ?1 AND context_hash = ?2
             ORDER BY business_id LIMIT 1",
            params![content_id, context_hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(business_id)
}
