use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use anas_core::{AnasError, AnasResult, Clock, KvStore, SystemClock};

use crate::schema::{configure, init_db};

/// Expired rows removed per compaction batch. The lock is released between
/// batches so foreground reads and writes interleave with a long sweep.
const COMPACT_BATCH: i64 = 512;

/// Durable store on a single SQLite connection.
///
/// Every operation takes the connection lock, so point operations are
/// atomic and isolated from each other, and a scan runs inside one read
/// transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn new(path: &Path) -> AnasResult<Self> {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: &Path, clock: Arc<dyn Clock>) -> AnasResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AnasError::Storage(format!("cannot create db directory: {e}"))
                })?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| AnasError::Storage(format!("cannot open database: {e}")))?;
        configure(&conn, true)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    pub fn in_memory() -> AnasResult<Self> {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> AnasResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AnasError::Storage(format!("cannot open in-memory db: {e}")))?;
        configure(&conn, false)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn lock(&self) -> AnasResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AnasError::Storage("store lock poisoned".into()))
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|t| {
            let ms = i64::try_from(t.as_millis()).unwrap_or(i64::MAX);
            self.clock.now_ms().saturating_add(ms)
        })
    }
}

/// Smallest string greater than every string starting with `prefix`, or
/// `None` when no such bound exists (empty prefix or all `char::MAX`).
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let mut next = last as u32 + 1;
        // skip the surrogate gap
        if (0xD800..=0xDFFF).contains(&next) {
            next = 0xE000;
        }
        if let Some(c) = char::from_u32(next) {
            chars.push(c);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// KvStore impl
// ---------------------------------------------------------------------------

impl KvStore for SqliteStore {
    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AnasResult<()> {
        let expires_at = self.expiry(ttl);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )
        .map_err(|e| AnasError::Storage(e.to_string()))?;
        Ok(())
    }

    fn put_many(&self, entries: &[(&str, &[u8])], ttl: Option<Duration>) -> AnasResult<()> {
        let expires_at = self.expiry(ttl);
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| AnasError::Storage(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                )
                .map_err(|e| AnasError::Storage(e.to_string()))?;
            for (key, value) in entries {
                stmt.execute(params![key, value, expires_at])
                    .map_err(|e| AnasError::Storage(e.to_string()))?;
            }
        }
        tx.commit().map_err(|e| AnasError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get(&self, key: &str) -> AnasResult<Vec<u8>> {
        let now = self.clock.now_ms();
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![key, now],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| AnasError::Storage(e.to_string()))?
        .ok_or_else(|| AnasError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> AnasResult<()> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| AnasError::Storage(e.to_string()))?;
        if removed == 0 {
            debug!(key, "delete of absent key");
        }
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> AnasResult<bool> {
        let now = self.clock.now_ms();
        let expires_at = self.expiry(ttl);
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AnasError::Storage(e.to_string()))?;
        let current: Option<Vec<u8>> = tx
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AnasError::Storage(e.to_string()))?;
        let Some(value) = f(current.as_deref()) else {
            return Ok(false);
        };
        tx.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )
        .map_err(|e| AnasError::Storage(e.to_string()))?;
        tx.commit().map_err(|e| AnasError::Storage(e.to_string()))?;
        Ok(true)
    }

    fn visit(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> bool,
    ) -> AnasResult<()> {
        let now = self.clock.now_ms();
        let upper = prefix_upper_bound(prefix);
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| AnasError::Storage(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare(
                    "SELECT key, value FROM kv
                     WHERE key >= ?1 AND (?2 IS NULL OR key < ?2)
                       AND (expires_at IS NULL OR expires_at > ?3)
                     ORDER BY key",
                )
                .map_err(|e| AnasError::Storage(e.to_string()))?;
            let mut rows = stmt
                .query(params![prefix, upper, now])
                .map_err(|e| AnasError::Storage(e.to_string()))?;
            while let Some(row) = rows.next().map_err(|e| AnasError::Storage(e.to_string()))? {
                let key: String = row.get(0).map_err(|e| AnasError::Storage(e.to_string()))?;
                let value: Vec<u8> = row.get(1).map_err(|e| AnasError::Storage(e.to_string()))?;
                if !visitor(&key, &value) {
                    break;
                }
            }
        }
        tx.commit().map_err(|e| AnasError::Storage(e.to_string()))?;
        Ok(())
    }

    fn compact(&self) -> AnasResult<usize> {
        let mut total = 0usize;
        loop {
            let now = self.clock.now_ms();
            let removed = {
                let conn = self.lock()?;
                conn.execute(
                    "DELETE FROM kv WHERE rowid IN (
                         SELECT rowid FROM kv
                         WHERE expires_at IS NOT NULL AND expires_at <= ?1
                         LIMIT ?2)",
                    params![now, COMPACT_BATCH],
                )
                .map_err(|e| AnasError::Storage(e.to_string()))?
            };
            total += removed;
            if removed == 0 {
                break;
            }
        }

        if total > 0 {
            let conn = self.lock()?;
            conn.execute_batch("PRAGMA incremental_vacuum;")
                .map_err(|e| AnasError::Storage(e.to_string()))?;
        }
        Ok(total)
    }
}
