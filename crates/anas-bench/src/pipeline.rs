use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use anas_core::{
    AnasError, AnasResult, BenchmarkResult, BenchmarkStatus, Evaluation, GradeRequest, Grader,
    GradingError, OutputSchema,
};
use anas_store::{BenchmarkRepository, RunRepository};

use crate::aggregate;
use crate::jobs::CancellationToken;
use crate::prompt::{self, PromptTemplate};
use crate::reconcile::{self, MatchedPair};
use crate::verdict;

/// One benchmark pass: load the run, reconcile it, grade every matched pair
/// and persist the aggregated outcome.
#[derive(Clone)]
pub struct BenchmarkPipeline {
    runs: RunRepository,
    benchmarks: BenchmarkRepository,
    grader: Arc<dyn Grader>,
    template: Arc<PromptTemplate>,
    schema: Arc<OutputSchema>,
}

impl BenchmarkPipeline {
    pub fn new(
        runs: RunRepository,
        benchmarks: BenchmarkRepository,
        grader: Arc<dyn Grader>,
        template: PromptTemplate,
    ) -> Self {
        Self {
            runs,
            benchmarks,
            grader,
            template: Arc::new(template),
            schema: Arc::new(OutputSchema::evaluation()),
        }
    }

    pub fn runs(&self) -> &RunRepository {
        &self.runs
    }

    pub fn benchmarks(&self) -> &BenchmarkRepository {
        &self.benchmarks
    }

    /// Drive `result` from `queued` to a terminal status. Persistence
    /// failures are logged; the final record is returned either way.
    pub fn run(&self, mut result: BenchmarkResult, token: &CancellationToken) -> BenchmarkResult {
        let started = std::time::Instant::now();
        if token.is_cancelled() {
            result.fail(GradingError::Cancelled.to_string());
            self.persist(&result);
            return result;
        }

        result.mark(BenchmarkStatus::Processing);
        self.persist(&result);

        match self.evaluate(&result.run_id, token) {
            Ok((evaluations, missing)) => aggregate::complete(&mut result, evaluations, missing),
            Err(e) => {
                let reason = failure_reason(&e);
                warn!(benchmark_id = %result.benchmark_id, run_id = %result.run_id, "benchmark failed: {reason}");
                result.fail(reason);
            }
        }
        self.persist(&result);
        info!(
            benchmark_id = %result.benchmark_id,
            run_id = %result.run_id,
            status = %result.status,
            total_items = result.total_items,
            quality_score = result.quality_score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "benchmark finished"
        );
        result
    }

    fn evaluate(
        &self,
        run_id: &str,
        token: &CancellationToken,
    ) -> AnasResult<(BTreeMap<String, Evaluation>, Vec<String>)> {
        let run = self.runs.get(run_id)?;
        let system_prompt = self.template.render(&run.persona)?;
        let rec = reconcile::reconcile(&run);
        debug!(
            run_id,
            matched = rec.matched.len(),
            missing = rec.missing.len(),
            dropped = rec.dropped,
            unmatched = rec.unmatched.len(),
            "run reconciled"
        );

        let mut evaluations = BTreeMap::new();
        for pair in &rec.matched {
            token.checkpoint()?;
            match self.grade_pair(&system_prompt, pair) {
                Ok(eval) => {
                    evaluations.insert(pair.item.id.clone(), eval);
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => warn!(run_id, item_id = %pair.item.id, "item skipped: {e}"),
            }
        }
        Ok((evaluations, rec.missing))
    }

    fn grade_pair(
        &self,
        system_prompt: &str,
        pair: &MatchedPair<'_>,
    ) -> Result<Evaluation, GradingError> {
        let user_prompts = [prompt::user_prompt(pair)];
        let request = GradeRequest {
            system_prompt,
            user_prompts: &user_prompts,
            image_urls: &[],
            schema: &self.schema,
            temperature: 0.0,
            max_tokens: None,
        };
        let raw = self.grader.grade(&request)?;
        verdict::parse_verdict(&raw)
    }

    fn persist(&self, result: &BenchmarkResult) {
        if let Err(e) = self.benchmarks.save(result) {
            error!(
                benchmark_id = %result.benchmark_id,
                status = %result.status,
                "failed to persist benchmark: {e}"
            );
        }
    }
}

fn failure_reason(err: &AnasError) -> String {
    match err {
        AnasError::Grading(e) => e.to_string(),
        AnasError::NotFound(what) => format!("run disappeared before grading: {what}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry, pipeline, store_run, verdict_json, ScriptedGrader};
    use anas_core::QualityRating;

    #[test]
    fn test_missing_item_counts_toward_total() {
        let grader = ScriptedGrader::new()
            .respond("A", verdict_json("Excellent", true))
            .respond("C", verdict_json("Good", true));
        let (p, _) = pipeline(grader);
        let run = store_run(
            &p,
            "r1",
            vec![
                entry("A", "A"),
                entry("B", ""),
                entry("C", "C"),
            ],
        );

        let result = p.run(
            BenchmarkResult::queued(&run.run_id, &run.persona),
            &CancellationToken::new(),
        );
        assert_eq!(result.status, BenchmarkStatus::Completed);
        assert_eq!(result.total_items, 3);
        assert_eq!(result.missing_items, vec!["B".to_string()]);
        assert_eq!(
            result.detailed_evaluations["B"].quality_rating,
            QualityRating::Poor
        );
        assert!((result.quality_score - 175.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rating_mix_score() {
        let grader = ScriptedGrader::new()
            .respond("A", verdict_json("Excellent", true))
            .respond("B", verdict_json("Good", true))
            .respond("C", verdict_json("Poor", false));
        let (p, _) = pipeline(grader);
        let run = store_run(
            &p,
            "r1",
            vec![entry("A", "A"), entry("B", "B"), entry("C", "C")],
        );
        let result = p.run(
            BenchmarkResult::queued(&run.run_id, &run.persona),
            &CancellationToken::new(),
        );
        assert!((result.quality_score - 58.333_333).abs() < 1e-4);
        assert!((result.relevance_accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert!(result.missing_items.is_empty());
    }

    #[test]
    fn test_item_failure_is_skipped() {
        // B gets no scripted answer and fails; C answers garbage
        let grader = ScriptedGrader::new()
            .respond("A", verdict_json("Good", true))
            .respond("C", "not a verdict".to_string());
        let (p, _) = pipeline(grader);
        let run = store_run(
            &p,
            "r1",
            vec![entry("A", "A"), entry("B", "B"), entry("C", "C")],
        );
        let result = p.run(
            BenchmarkResult::queued(&run.run_id, &run.persona),
            &CancellationToken::new(),
        );
        assert_eq!(result.status, BenchmarkStatus::Completed);
        assert_eq!(result.total_items, 1);
        assert!(result.detailed_evaluations.contains_key("A"));
        assert!(result.missing_items.is_empty());
    }

    #[test]
    fn test_template_failure_fails_benchmark() {
        let grader = ScriptedGrader::new().respond("A", verdict_json("Good", true));
        let calls = grader.calls();
        let (p, _) = pipeline(grader);
        let mut run = store_run(&p, "r1", vec![entry("A", "A")]);
        run.persona.persona_identity.clear();
        p.runs().save("r1", &run).unwrap();

        let result = p.run(
            BenchmarkResult::queued("r1", &run.persona),
            &CancellationToken::new(),
        );
        assert_eq!(result.status, BenchmarkStatus::Failed);
        assert!(result.failure_reason.as_deref().unwrap().contains("no identity"));
        assert_eq!(result.total_items, 0);
        assert_eq!(result.quality_score, 0.0);
        assert!(result.detailed_evaluations.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        let stored = p.benchmarks().get_by_run_id("r1").unwrap();
        assert_eq!(stored, result);
    }

    #[test]
    fn test_cancelled_before_start() {
        let (p, _) = pipeline(ScriptedGrader::new());
        let run = store_run(&p, "r1", vec![entry("A", "A")]);
        let token = CancellationToken::new();
        token.cancel();
        let result = p.run(BenchmarkResult::queued("r1", &run.persona), &token);
        assert_eq!(result.failure_reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_empty_run_completes_with_zeros() {
        let (p, _) = pipeline(ScriptedGrader::new());
        let run = store_run(&p, "r1", Vec::new());
        let result = p.run(
            BenchmarkResult::queued("r1", &run.persona),
            &CancellationToken::new(),
        );
        assert_eq!(result.status, BenchmarkStatus::Completed);
        assert_eq!(result.total_items, 0);
        assert_eq!(result.relevance_accuracy, 0.0);
        assert!(!result.is_failed());
    }

    #[test]
    fn test_grader_sees_fixed_request_shape() {
        let grader = ScriptedGrader::new().respond("A", verdict_json("Fair", true));
        let requests = grader.requests();
        let (p, _) = pipeline(grader);
        let run = store_run(&p, "r1", vec![entry("A", "A")]);
        p.run(
            BenchmarkResult::queued("r1", &run.persona),
            &CancellationToken::new(),
        );
        let seen = requests.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let req = &seen[0];
        assert_eq!(req.user_prompt_count, 1);
        assert_eq!(req.image_count, 0);
        assert_eq!(req.temperature, 0.0);
        assert_eq!(req.max_tokens, None);
        assert_eq!(req.schema_name, "benchmark_evaluation");
        assert!(req.system_prompt.contains("The persona is a reader of release notes"));
    }
}
