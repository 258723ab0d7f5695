use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use anas_core::{
    AnasError, AnasResult, BenchmarkResult, BenchmarkStatus, BenchmarkTicket, GradingError,
};
use anas_store::FailOutcome;

use crate::pipeline::BenchmarkPipeline;

pub const QUEUED_MESSAGE: &str = "Benchmark queued for processing";
pub const INTERRUPTED_REASON: &str = "interrupted";

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared between a job and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> Result<(), GradingError> {
        if self.is_cancelled() {
            Err(GradingError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

struct Job {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Creates benchmarks and runs them as detached jobs on the blocking pool.
///
/// Every method except [`join`](Self::join) and [`shutdown`](Self::shutdown)
/// does blocking store I/O; `create` must run inside a Tokio runtime.
#[derive(Clone)]
pub struct BenchmarkService {
    pipeline: BenchmarkPipeline,
    jobs: Arc<Mutex<HashMap<String, Job>>>,
    estimate: Duration,
}

impl BenchmarkService {
    pub fn new(pipeline: BenchmarkPipeline, estimate: Duration) -> Self {
        Self {
            pipeline,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            estimate,
        }
    }

    fn jobs(&self) -> AnasResult<MutexGuard<'_, HashMap<String, Job>>> {
        self.jobs
            .lock()
            .map_err(|e| AnasError::Storage(format!("job table poisoned: {e}")))
    }

    pub fn create(&self, run_id: &str) -> AnasResult<BenchmarkTicket> {
        let run = self.pipeline.runs().get(run_id)?;
        let result = BenchmarkResult::queued(run_id, &run.persona);
        self.pipeline.benchmarks().create(&result)?;

        let benchmark_id = result.benchmark_id.clone();
        let token = CancellationToken::new();
        let ticket = BenchmarkTicket {
            id: benchmark_id.clone(),
            status: BenchmarkStatus::Queued,
            message: QUEUED_MESSAGE.to_string(),
            estimated_completion_time: Utc::now()
                + chrono::Duration::from_std(self.estimate).unwrap_or(chrono::Duration::zero()),
        };

        // Held across spawn so the job cannot deregister before it is registered.
        let mut jobs = self.jobs()?;
        let pipeline = self.pipeline.clone();
        let table = self.jobs.clone();
        let job_token = token.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let id = result.benchmark_id.clone();
            pipeline.run(result, &job_token);
            if let Ok(mut jobs) = table.lock() {
                jobs.remove(&id);
            }
        });
        jobs.insert(
            benchmark_id.clone(),
            Job {
                token,
                handle: Some(handle),
            },
        );
        info!(benchmark_id = %benchmark_id, run_id, "benchmark queued");
        Ok(ticket)
    }

    pub fn get_by_run(&self, run_id: &str) -> AnasResult<BenchmarkResult> {
        self.pipeline.benchmarks().get_by_run_id(run_id)
    }

    pub fn get_by_id(&self, benchmark_id: &str) -> AnasResult<BenchmarkResult> {
        self.pipeline.benchmarks().get_by_benchmark_id(benchmark_id)
    }

    /// Request cancellation of a running benchmark. Returns the record as
    /// currently stored; the job writes the `failed` outcome itself.
    pub fn cancel(&self, benchmark_id: &str) -> AnasResult<BenchmarkResult> {
        let current = self.get_by_id(benchmark_id)?;
        if current.status.is_terminal() {
            return Err(already_finished(&current));
        }
        let live = self
            .jobs()?
            .get(benchmark_id)
            .map(|job| job.token.cancel())
            .is_some();
        if live {
            info!(benchmark_id, "benchmark cancellation requested");
            return Ok(current);
        }
        self.fail_orphan(benchmark_id, &GradingError::Cancelled.to_string())
    }

    /// Fail a benchmark no job in this process owns. The stored status is
    /// checked again as part of the write, so a job that finished after the
    /// caller's read keeps its outcome.
    fn fail_orphan(&self, benchmark_id: &str, reason: &str) -> AnasResult<BenchmarkResult> {
        match self
            .pipeline
            .benchmarks()
            .fail_unfinished(benchmark_id, reason)?
        {
            FailOutcome::Failed(result) => Ok(result),
            FailOutcome::AlreadyFinished(result) => Err(already_finished(&result)),
        }
    }

    /// Number of benchmarks this process is still running.
    pub fn active(&self) -> usize {
        self.jobs().map(|jobs| jobs.len()).unwrap_or(0)
    }

    /// Wait for one job to finish. Returns immediately if it is unknown or
    /// already being awaited elsewhere.
    pub async fn join(&self, benchmark_id: &str) {
        let handle = match self.jobs() {
            Ok(mut jobs) => jobs.get_mut(benchmark_id).and_then(|job| job.handle.take()),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(benchmark_id, "benchmark job panicked: {e}");
            }
        }
    }

    /// Cancel every job and wait for all of them to record their outcome.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = match self.jobs() {
            Ok(mut jobs) => jobs
                .iter_mut()
                .filter_map(|(id, job)| {
                    job.token.cancel();
                    job.handle.take().map(|h| (id.clone(), h))
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        if !handles.is_empty() {
            info!(jobs = handles.len(), "cancelling running benchmarks");
        }
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(benchmark_id = %id, "benchmark job panicked: {e}");
            }
        }
    }

    /// Mark benchmarks a previous process left `queued` or `processing` as
    /// failed. Returns how many were rewritten.
    pub fn recover_interrupted(&self) -> AnasResult<usize> {
        let unfinished = self.pipeline.benchmarks().list_unfinished()?;
        let owned: Vec<String> = self.jobs()?.keys().cloned().collect();
        let mut recovered = 0;
        for result in unfinished {
            if owned.contains(&result.benchmark_id) {
                continue;
            }
            match self
                .pipeline
                .benchmarks()
                .fail_unfinished(&result.benchmark_id, INTERRUPTED_REASON)?
            {
                FailOutcome::Failed(_) => {
                    warn!(
                        benchmark_id = %result.benchmark_id,
                        run_id = %result.run_id,
                        status = %result.status,
                        "benchmark interrupted by restart"
                    );
                    recovered += 1;
                }
                FailOutcome::AlreadyFinished(done) => {
                    debug!(
                        benchmark_id = %done.benchmark_id,
                        status = %done.status,
                        "benchmark finished before recovery"
                    );
                }
            }
        }
        Ok(recovered)
    }
}

fn already_finished(result: &BenchmarkResult) -> AnasError {
    AnasError::Validation(format!(
        "benchmark '{}' is already {}",
        result.benchmark_id, result.status
    ))
}
