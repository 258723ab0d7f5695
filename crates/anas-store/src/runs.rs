use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use anas_core::{AnasError, AnasResult, KvStore, RunMetadata, RunRecord};

pub const RUN_NAMESPACE: &str = "run";

fn run_key(id: &str) -> String {
    format!("{RUN_NAMESPACE}/{id}")
}

/// Run records under `run/<id>`, written with the process-wide TTL.
#[derive(Clone)]
pub struct RunRepository {
    store: Arc<dyn KvStore>,
    ttl: Option<Duration>,
}

impl RunRepository {
    pub fn new(store: Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    pub fn save(&self, id: &str, record: &RunRecord) -> AnasResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.store.put(&run_key(id), &bytes, self.ttl)?;
        info!(run_id = id, items = record.total_items(), "run stored");
        Ok(())
    }

    pub fn get(&self, id: &str) -> AnasResult<RunRecord> {
        let bytes = self.store.get(&run_key(id))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AnasError::Storage(format!("corrupt run record '{id}': {e}")))
    }

    /// Metadata for stored runs in key order. `limit == 0` lists everything.
    /// Entries that fail to decode are logged and skipped.
    pub fn list_metadata(&self, limit: usize) -> AnasResult<Vec<RunMetadata>> {
        let prefix = format!("{RUN_NAMESPACE}/");
        let mut runs = Vec::new();
        self.store.visit(&prefix, &mut |key, value| {
            let id = key.strip_prefix(prefix.as_str()).unwrap_or(key);
            match serde_json::from_slice::<RunRecord>(value) {
                Ok(record) => runs.push(RunMetadata::project(id, &record)),
                Err(e) => warn!(key, "skipping undecodable run record: {e}"),
            }
            limit == 0 || runs.len() < limit
        })?;
        Ok(runs)
    }

    /// The run with the greatest run date. Key order says nothing about
    /// time, so every run is listed and compared.
    pub fn latest(&self) -> AnasResult<RunRecord> {
        let runs = self.list_metadata(0)?;
        let newest = runs
            .iter()
            .max_by(|a, b| a.run_date.cmp(&b.run_date))
            .ok_or_else(|| AnasError::NotFound("no runs stored".into()))?;
        self.get(&newest.id)
    }

    pub fn delete(&self, id: &str) -> AnasResult<()> {
        self.store.delete(&run_key(id))?;
        info!(run_id = id, "run deleted (if it existed)");
        Ok(())
    }

    pub fn exists(&self, id: &str) -> AnasResult<bool> {
        match self.store.get(&run_key(id)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
