use rusqlite::Connection;

use anas_core::AnasError;

/// Connection-level settings. `auto_vacuum` only takes effect on a fresh
/// database file, so it must run before the first table is created.
pub fn configure(conn: &Connection, wal: bool) -> Result<(), AnasError> {
    conn.execute_batch("PRAGMA auto_vacuum=INCREMENTAL;")
        .map_err(|e| AnasError::Storage(e.to_string()))?;
    if wal {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| AnasError::Storage(e.to_string()))?;
    }
    Ok(())
}

pub fn init_db(conn: &Connection) -> Result<(), AnasError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            expires_at INTEGER -- epoch millis, NULL = never
        );

        CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at)
            WHERE expires_at IS NOT NULL;
        ",
    )
    .map_err(|e| AnasError::Storage(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_db() {
        let conn = Connection::open_in_memory().unwrap();
        configure(&conn, false).unwrap();
        init_db(&conn).unwrap();
        // Second call should be idempotent
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_kv_table_exists() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };

        assert_eq!(tables, vec!["kv".to_string()]);
    }
}
