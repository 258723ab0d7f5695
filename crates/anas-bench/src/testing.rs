//! Fixtures shared by the pipeline and job tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anas_core::{
    EntrySummary, GeneratedItem, GradeRequest, Grader, GradingError, Persona, RunRecord,
};
use anas_store::{BenchmarkRepository, RunRepository, SqliteStore};

use crate::pipeline::BenchmarkPipeline;
use crate::prompt::PromptTemplate;
use crate::reconcile::extract_source_id;

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub system_prompt: String,
    pub user_prompt_count: usize,
    pub image_count: usize,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub schema_name: String,
}

/// Answers by source identifier; unknown identifiers fail the call.
/// Optionally blocks every call until released.
#[derive(Default)]
pub struct ScriptedGrader {
    answers: HashMap<String, String>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
    gate: Option<Arc<AtomicBool>>,
}

impl ScriptedGrader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, id: &str, answer: String) -> Self {
        self.answers.insert(id.to_string(), answer);
        self
    }

    /// Calls block until the returned flag is set.
    pub fn gated(mut self) -> (Self, Arc<AtomicBool>) {
        let gate = Arc::new(AtomicBool::new(false));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<SeenRequest>>> {
        self.requests.clone()
    }
}

impl Grader for ScriptedGrader {
    fn grade(&self, request: &GradeRequest<'_>) -> Result<String, GradingError> {
        if let Some(gate) = &self.gate {
            while !gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(SeenRequest {
            system_prompt: request.system_prompt.to_string(),
            user_prompt_count: request.user_prompts.len(),
            image_count: request.image_urls.len(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            schema_name: request.schema.name.clone(),
        });
        let prompt = request.user_prompts.first().map(String::as_str).unwrap_or("");
        let id = extract_source_id(prompt).unwrap_or("");
        self.answers
            .get(id)
            .cloned()
            .ok_or_else(|| GradingError::Call(format!("no scripted answer for '{id}'")))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn verdict_json(rating: &str, relevance_correct: bool) -> String {
    serde_json::json!({
        "quality_rating": rating,
        "quality_explanation": format!("rated {rating}"),
        "relevance_correct": relevance_correct,
        "relevance_explanation": "checked against exclusions",
    })
    .to_string()
}

/// An entry whose raw input carries `ID: <source_id>` and whose generated
/// item is `<generated_id>`.
pub fn entry(source_id: &str, generated_id: &str) -> EntrySummary {
    EntrySummary {
        raw_input: format!("ID: {source_id}\nTitle: post {source_id}\nbody"),
        results: GeneratedItem {
            id: generated_id.into(),
            title: format!("summary of {source_id}"),
            summary: "short".into(),
            is_relevant: true,
            ..GeneratedItem::default()
        },
        processing_time_ms: Some(10),
    }
}

pub fn persona() -> Persona {
    Persona {
        name: "release-watcher".into(),
        persona_identity: "a reader of release notes".into(),
        focus_areas: vec!["new versions".into()],
        exclusion_criteria: vec!["marketing".into()],
        ..Persona::default()
    }
}

pub fn pipeline(grader: ScriptedGrader) -> (BenchmarkPipeline, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let runs = RunRepository::new(store.clone(), None);
    let benchmarks = BenchmarkRepository::new(store.clone(), None);
    let p = BenchmarkPipeline::new(runs, benchmarks, Arc::new(grader), PromptTemplate::default());
    (p, store)
}

pub fn store_run(p: &BenchmarkPipeline, id: &str, entries: Vec<EntrySummary>) -> RunRecord {
    let mut record = RunRecord::new(persona(), entries);
    record.run_id = id.to_string();
    let record = record.accept().unwrap();
    p.runs().save(id, &record).unwrap();
    record
}
