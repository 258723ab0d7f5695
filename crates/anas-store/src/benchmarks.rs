use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use anas_core::{AnasError, AnasResult, BenchmarkResult, KvStore};

pub const BENCHMARK_NAMESPACE: &str = "benchmark";
/// `benchmark-run/<runId>` holds the id of the most recently created
/// benchmark for that run.
pub const RUN_INDEX_NAMESPACE: &str = "benchmark-run";

fn benchmark_key(id: &str) -> String {
    format!("{BENCHMARK_NAMESPACE}/{id}")
}

fn run_index_key(run_id: &str) -> String {
    format!("{RUN_INDEX_NAMESPACE}/{run_id}")
}

/// Result of [`BenchmarkRepository::fail_unfinished`].
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// The stored record was unfinished and now carries the failure.
    Failed(BenchmarkResult),
    /// The stored record had already finished and was left untouched.
    AlreadyFinished(BenchmarkResult),
}

/// Benchmark results under `benchmark/<benchmarkId>`.
///
/// A run may accumulate several benchmarks. Lookup by run follows the run
/// index to the newest one and falls back to a linear scan of every stored
/// benchmark when the index entry is gone; that scan costs one decode per
/// benchmark still held by the store.
#[derive(Clone)]
pub struct BenchmarkRepository {
    store: Arc<dyn KvStore>,
    ttl: Option<Duration>,
}

impl BenchmarkRepository {
    pub fn new(store: Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    /// Store a newly created benchmark and point the run index at it.
    pub fn create(&self, result: &BenchmarkResult) -> AnasResult<()> {
        let bytes = serde_json::to_vec(result)?;
        let key = benchmark_key(&result.benchmark_id);
        let index_key = run_index_key(&result.run_id);
        self.store.put_many(
            &[
                (key.as_str(), bytes.as_slice()),
                (index_key.as_str(), result.benchmark_id.as_bytes()),
            ],
            self.ttl,
        )?;
        info!(
            benchmark_id = %result.benchmark_id,
            run_id = %result.run_id,
            "benchmark created"
        );
        Ok(())
    }

    /// Overwrite an existing benchmark record (status transitions, final
    /// outcome). The run index is left untouched.
    pub fn save(&self, result: &BenchmarkResult) -> AnasResult<()> {
        let bytes = serde_json::to_vec(result)?;
        self.store
            .put(&benchmark_key(&result.benchmark_id), &bytes, self.ttl)?;
        debug!(
            benchmark_id = %result.benchmark_id,
            status = %result.status,
            "benchmark saved"
        );
        Ok(())
    }

    /// Fail benchmark `id` with `reason` unless it is already `completed` or
    /// `failed`. The status check and the write happen in one store
    /// transaction, so an outcome recorded concurrently is never replaced.
    pub fn fail_unfinished(&self, id: &str, reason: &str) -> AnasResult<FailOutcome> {
        let mut outcome: Option<AnasResult<FailOutcome>> = None;
        self.store
            .update(&benchmark_key(id), self.ttl, &mut |current| {
                let bytes = current?;
                let mut result = match serde_json::from_slice::<BenchmarkResult>(bytes) {
                    Ok(result) => result,
                    Err(e) => {
                        outcome = Some(Err(AnasError::Storage(format!(
                            "corrupt benchmark '{id}': {e}"
                        ))));
                        return None;
                    }
                };
                if result.status.is_terminal() {
                    outcome = Some(Ok(FailOutcome::AlreadyFinished(result)));
                    return None;
                }
                result.fail(reason);
                match serde_json::to_vec(&result) {
                    Ok(encoded) => {
                        outcome = Some(Ok(FailOutcome::Failed(result)));
                        Some(encoded)
                    }
                    Err(e) => {
                        outcome = Some(Err(e.into()));
                        None
                    }
                }
            })?;
        let outcome =
            outcome.unwrap_or_else(|| Err(AnasError::NotFound(format!("benchmark '{id}'"))))?;
        if let FailOutcome::Failed(result) = &outcome {
            info!(benchmark_id = id, run_id = %result.run_id, reason, "benchmark failed");
        }
        Ok(outcome)
    }

    pub fn get_by_benchmark_id(&self, id: &str) -> AnasResult<BenchmarkResult> {
        let bytes = self.store.get(&benchmark_key(id))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AnasError::Storage(format!("corrupt benchmark '{id}': {e}")))
    }

    pub fn get_by_run_id(&self, run_id: &str) -> AnasResult<BenchmarkResult> {
        match self.store.get(&run_index_key(run_id)) {
            Ok(bytes) => {
                let benchmark_id = String::from_utf8_lossy(&bytes).into_owned();
                match self.get_by_benchmark_id(&benchmark_id) {
                    Ok(result) if result.run_id == run_id => return Ok(result),
                    Ok(_) => warn!(run_id, benchmark_id = %benchmark_id, "run index points at another run"),
                    Err(e) if e.is_not_found() => {
                        debug!(run_id, benchmark_id = %benchmark_id, "run index is stale")
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.scan_for_run(run_id)
    }

    /// Linear scan over `benchmark/`, newest `created_at` wins.
    fn scan_for_run(&self, run_id: &str) -> AnasResult<BenchmarkResult> {
        let mut newest: Option<BenchmarkResult> = None;
        self.each(|result| {
            if result.run_id == run_id
                && newest
                    .as_ref()
                    .map_or(true, |n| result.created_at > n.created_at)
            {
                newest = Some(result);
            }
        })?;
        newest.ok_or_else(|| {
            AnasError::NotFound(format!("benchmark results for run ID '{run_id}'"))
        })
    }

    /// Benchmarks still `queued` or `processing`.
    pub fn list_unfinished(&self) -> AnasResult<Vec<BenchmarkResult>> {
        let mut out = Vec::new();
        self.each(|result| {
            if !result.status.is_terminal() {
                out.push(result);
            }
        })?;
        Ok(out)
    }

    fn each(&self, mut f: impl FnMut(BenchmarkResult)) -> AnasResult<()> {
        let prefix = format!("{BENCHMARK_NAMESPACE}/");
        self.store.visit(&prefix, &mut |key, value| {
            match serde_json::from_slice::<BenchmarkResult>(value) {
                Ok(result) => f(result),
                Err(e) => warn!(key, "skipping undecodable benchmark: {e}"),
            }
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anas_core::{BenchmarkStatus, Persona};
    use chrono::{Duration as ChronoDuration, Utc};

    use crate::SqliteStore;

    fn repo() -> (Arc<SqliteStore>, BenchmarkRepository) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        (store.clone(), BenchmarkRepository::new(store, None))
    }

    fn queued(run_id: &str) -> BenchmarkResult {
        BenchmarkResult::queued(run_id, &Persona::default())
    }

    #[test]
    fn test_create_and_get_by_id() {
        let (_, repo) = repo();
        let result = queued("r1");
        repo.create(&result).unwrap();
        assert_eq!(repo.get_by_benchmark_id(&result.benchmark_id).unwrap(), result);
    }

    #[test]
    fn test_get_by_id_unknown() {
        let (_, repo) = repo();
        assert!(repo.get_by_benchmark_id("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_by_run_id_follows_index() {
        let (_, repo) = repo();
        let mut result = queued("r1");
        repo.create(&result).unwrap();
        result.quality_score = 75.0;
        result.mark(BenchmarkStatus::Completed);
        repo.save(&result).unwrap();

        let found = repo.get_by_run_id("r1").unwrap();
        assert_eq!(found.status, BenchmarkStatus::Completed);
        assert_eq!(found.quality_score, 75.0);
    }

    #[test]
    fn test_get_by_run_id_unknown() {
        let (_, repo) = repo();
        repo.create(&queued("other")).unwrap();
        assert!(repo.get_by_run_id("r1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_scan_fallback_picks_newest() {
        let (store, repo) = repo();
        let mut old = queued("r1");
        old.created_at = Utc::now() - ChronoDuration::hours(2);
        let mut new = queued("r1");
        new.created_at = Utc::now();
        repo.save(&new).unwrap();
        repo.save(&old).unwrap();
        repo.create(&queued("r2")).unwrap();
        store.put("benchmark/junk", b"not json", None).unwrap();

        let found = repo.get_by_run_id("r1").unwrap();
        assert_eq!(found.benchmark_id, new.benchmark_id);
    }

    #[test]
    fn test_stale_index_falls_back_to_scan() {
        let (store, repo) = repo();
        let first = queued("r1");
        repo.create(&first).unwrap();
        let second = queued("r1");
        repo.create(&second).unwrap();
        store
            .delete(&format!("benchmark/{}", second.benchmark_id))
            .unwrap();

        let found = repo.get_by_run_id("r1").unwrap();
        assert_eq!(found.benchmark_id, first.benchmark_id);
    }

    #[test]
    fn test_index_points_at_latest_created() {
        let (_, repo) = repo();
        let first = queued("r1");
        repo.create(&first).unwrap();
        let second = queued("r1");
        repo.create(&second).unwrap();
        // finishing the older benchmark later must not steal the index
        let mut first_done = first.clone();
        first_done.mark(BenchmarkStatus::Completed);
        repo.save(&first_done).unwrap();

        assert_eq!(
            repo.get_by_run_id("r1").unwrap().benchmark_id,
            second.benchmark_id
        );
    }

    #[test]
    fn test_fail_unfinished_rewrites_pending() {
        let (_, repo) = repo();
        let mut result = queued("r1");
        result.mark(BenchmarkStatus::Processing);
        repo.create(&result).unwrap();

        let outcome = repo
            .fail_unfinished(&result.benchmark_id, "cancelled")
            .unwrap();
        let FailOutcome::Failed(failed) = outcome else {
            panic!("processing benchmark should be failed");
        };
        assert_eq!(failed.status, BenchmarkStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("cancelled"));
        assert_eq!(repo.get_by_benchmark_id(&result.benchmark_id).unwrap(), failed);
    }

    #[test]
    fn test_fail_unfinished_keeps_finished_outcome() {
        let (_, repo) = repo();
        let stale = queued("r1");
        repo.create(&stale).unwrap();
        let mut done = stale.clone();
        done.quality_score = 75.0;
        done.total_items = 1;
        done.mark(BenchmarkStatus::Completed);
        repo.save(&done).unwrap();

        let outcome = repo.fail_unfinished(&stale.benchmark_id, "cancelled").unwrap();
        assert_eq!(outcome, FailOutcome::AlreadyFinished(done.clone()));
        assert_eq!(repo.get_by_benchmark_id(&stale.benchmark_id).unwrap(), done);
    }

    #[test]
    fn test_fail_unfinished_unknown_and_corrupt() {
        let (store, repo) = repo();
        assert!(repo.fail_unfinished("nope", "cancelled").unwrap_err().is_not_found());

        store.put("benchmark/junk", b"not json", None).unwrap();
        assert!(matches!(
            repo.fail_unfinished("junk", "cancelled"),
            Err(AnasError::Storage(_))
        ));
        assert_eq!(store.get("benchmark/junk").unwrap(), b"not json");
    }

    #[test]
    fn test_list_unfinished() {
        let (_, repo) = repo();
        let pending = queued("r1");
        repo.create(&pending).unwrap();
        let mut processing = queued("r2");
        processing.mark(BenchmarkStatus::Processing);
        repo.create(&processing).unwrap();
        let mut failed = queued("r3");
        failed.fail("boom");
        repo.create(&failed).unwrap();

        let mut ids: Vec<String> = repo
            .list_unfinished()
            .unwrap()
            .into_iter()
            .map(|r| r.run_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["r1".to_string(), "r2".to_string()]);
    }
}
