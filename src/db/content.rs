// src/db/content.rs
// Content rows: deduplicated source texts

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

/// Insert the text if unseen and return its content_id.
///
/// `value` is unique; repeated calls with the same text return the same id.
pub fn upsert_content_sync(conn: &Connection, value: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO content (value) VALUES (?) ON CONFLICT(value) DO NOTHING",
        params![value],
    )?;
    let id = conn.query_row(
        "SELECT content_id FROM content WHERE value = ?",
        params![value],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Look up a content_id without creating it.
pub fn get_content_id_sync(conn: &Connection, value: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT content_id FROM content WHERE value = ?",
            params![value],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        super::super::schema::run_all_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let conn = test_conn();
        let a = upsert_content_sync(&conn, "Hello").unwrap();
        let b = upsert_content_sync(&conn, "Hello").unwrap();
        assert_eq!(a, b);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM content", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_distinct_values_get_distinct_ids() {
        let conn = test_conn();
        let a = upsert_content_sync(&conn, "Hello").unwrap();
        let b = upsert_content_sync(&conn, "World").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_content_id_missing() {
        let conn = test_conn();
        assert_eq!(get_content_id_sync(&conn, "nope").unwrap(), None);
    }
}
