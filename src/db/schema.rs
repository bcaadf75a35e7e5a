// src/db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Current schema version. Bump together with a migration arm in
/// `run_all_migrations`.
const SCHEMA_VERSION: i64 = 1;

/// Run all schema setup and migrations.
///
/// Called during pool creation. Idempotent - base tables use IF NOT EXISTS
/// and migrations check the recorded version before making changes.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let version = current_version(conn)?;
    if version > SCHEMA_VERSION {
        anyhow::bail!(
            "database schema version {version} is newer than this build supports ({SCHEMA_VERSION})"
        );
    }
    // Future migrations go here, gated on `version < n`, each bumping the
    // recorded version as its last statement.
    if version < SCHEMA_VERSION {
        set_version(conn, SCHEMA_VERSION)?;
    }
    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);
    Ok(version)
}

fn set_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Database schema SQL
pub const SCHEMA: &str = r#"
-- =======================================
-- CONTENT: deduplicated source texts
-- =======================================
CREATE TABLE IF NOT EXISTS content (
    content_id INTEGER PRIMARY KEY,
    value TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- SOURCES: business-id associations
-- =======================================
CREATE TABLE IF NOT EXISTS sources (
    business_id TEXT PRIMARY KEY,
    content_id INTEGER NOT NULL REFERENCES content(content_id) ON DELETE CASCADE,
    context_hash TEXT NOT NULL DEFAULT '__GLOBAL__',
    last_seen_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_sources_content ON sources(content_id);
CREATE INDEX IF NOT EXISTS idx_sources_last_seen ON sources(last_seen_at);

-- =======================================
-- TRANSLATIONS: the persistent job queue
-- =======================================
CREATE TABLE IF NOT EXISTS translations (
    translation_id INTEGER PRIMARY KEY,
    content_id INTEGER NOT NULL REFERENCES content(content_id) ON DELETE CASCADE,
    source_lang TEXT,
    target_lang TEXT NOT NULL,
    context_hash TEXT NOT NULL DEFAULT '__GLOBAL__',
    context_json TEXT,
    translated_text TEXT,
    engine_name TEXT,
    engine_version TEXT,
    status TEXT NOT NULL DEFAULT 'PENDING',
    last_updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (content_id, target_lang, context_hash)
);
-- Covering index for claim queries
CREATE INDEX IF NOT EXISTS idx_translations_claim
    ON translations(target_lang, status, last_updated_at);

-- =======================================
-- DEAD LETTERS: exhausted retries (append-only)
-- =======================================
CREATE TABLE IF NOT EXISTS dead_letters (
    id INTEGER PRIMARY KEY,
    translation_id INTEGER NOT NULL,
    content_id INTEGER NOT NULL,
    target_lang TEXT NOT NULL,
    context_hash TEXT NOT NULL,
    last_error TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    moved_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_dead_letters_translation ON dead_letters(translation_id);

-- =======================================
-- SCHEMA VERSION
-- =======================================
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn open_conn() -> Connection {
        #[allow(clippy::unwrap_used)]
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON").unwrap();
        conn
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = open_conn();
        run_all_migrations(&conn).unwrap();
        run_all_migrations(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let conn = open_conn();
        run_all_migrations(&conn).unwrap();
        set_version(&conn, SCHEMA_VERSION + 10).unwrap();
        assert!(run_all_migrations(&conn).is_err());
    }

    #[test]
    fn test_translation_key_unique() {
        let conn = open_conn();
        run_all_migrations(&conn).unwrap();
        conn.execute("INSERT INTO content (value) VALUES ('Hello')", [])
            .unwrap();
        let content_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO translations (content_id, target_lang, context_hash) VALUES (?, 'de', '__GLOBAL__')",
            [content_id],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO translations (content_id, target_lang, context_hash) VALUES (?, 'de', '__GLOBAL__')",
            [content_id],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_cascade_delete_translations() {
        let conn = open_conn();
        run_all_migrations(&conn).unwrap();
        conn.execute("INSERT INTO content (value) VALUES ('Hello')", [])
            .unwrap();
        let content_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO translations (content_id, target_lang) VALUES (?, 'de')",
            [content_id],
        )
        .unwrap();
        conn.execute("DELETE FROM content WHERE content_id = ?", [content_id])
            .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM translations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
