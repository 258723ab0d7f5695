use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::error::AnasResult;

/// Durable key-value engine with optional per-entry expiry.
///
/// Keys are `<namespace>/<id>` strings and values opaque bytes. An entry put
/// with a TTL is unobservable to `get`/`scan` once the TTL has elapsed;
/// `compact` reclaims the space later.
pub trait KvStore: Send + Sync {
    // Point operations
    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> AnasResult<()>;
    fn put_many(&self, entries: &[(&str, &[u8])], ttl: Option<Duration>) -> AnasResult<()>;
    /// Fails with `NotFound` when the key is absent or expired.
    fn get(&self, key: &str) -> AnasResult<Vec<u8>>;
    /// Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> AnasResult<()>;
    /// Read-modify-write `key` as one atomic step. `f` sees the live value,
    /// if any, and returns the replacement or `None` to leave the entry as
    /// it is. Returns whether a replacement was written.
    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> AnasResult<bool>;

    // Iteration
    /// Visit live entries under `prefix` in key order against one snapshot.
    /// The visitor returns `false` to stop early.
    fn visit(&self, prefix: &str, visitor: &mut dyn FnMut(&str, &[u8]) -> bool)
        -> AnasResult<()>;

    fn scan(&self, prefix: &str, limit: Option<usize>) -> AnasResult<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        if limit == Some(0) {
            return Ok(out);
        }
        self.visit(prefix, &mut |key, value| {
            out.push((key.to_string(), value.to_vec()));
            limit.map_or(true, |l| out.len() < l)
        })?;
        Ok(out)
    }

    // Maintenance
    /// Reclaim expired entries. Returns the number of entries removed.
    fn compact(&self) -> AnasResult<usize>;
}

/// Millisecond wall clock used for expiry decisions.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Default TTL policy: zero or negative hours disables expiry. Values too
/// large to represent saturate to `Duration::MAX`.
pub fn ttl_from_hours(hours: i64) -> Option<Duration> {
    let hours = u64::try_from(hours).ok().filter(|h| *h > 0)?;
    Some(
        hours
            .checked_mul(3600)
            .map_or(Duration::MAX, Duration::from_secs),
    )
}
