use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::Persona;

// ---------------------------------------------------------------------------
// Quality rating
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityRating {
    pub const ALL: [QualityRating; 4] = [Self::Excellent, Self::Good, Self::Fair, Self::Poor];

    /// Contribution of one evaluation to the quality score (0-100).
    pub fn weight(self) -> f64 {
        match self {
            Self::Excellent => 100.0,
            Self::Good => 75.0,
            Self::Fair => 50.0,
            Self::Poor => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
        }
    }
}

impl fmt::Display for QualityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QualityRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("invalid quality rating: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Per-item evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub quality_rating: QualityRating,
    pub quality_explanation: String,
    pub relevance_correct: bool,
    pub relevance_explanation: String,
}

impl Evaluation {
    /// Forced verdict for an item that existed in the source material but
    /// has no generated counterpart.
    pub fn missing() -> Self {
        Self {
            quality_rating: QualityRating::Poor,
            quality_explanation: "Item was present in raw input but missing from processed results"
                .into(),
            relevance_correct: false,
            relevance_explanation: "Unable to assess relevance as item was not processed".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Benchmark result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl BenchmarkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for BenchmarkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one benchmark invocation over a run.
///
/// `failure_reason` is the authoritative failure signal: an empty run also
/// produces zero aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkResult {
    pub benchmark_id: String,
    pub run_id: String,
    pub status: BenchmarkStatus,
    pub total_items: usize,
    pub relevance_accuracy: f64,
    pub quality_score: f64,
    #[serde(default)]
    pub detailed_evaluations: BTreeMap<String, Evaluation>,
    #[serde(default)]
    pub missing_items: Vec<String>,
    #[serde(default)]
    pub persona_name: String,
    #[serde(default)]
    pub persona_focus_areas: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl BenchmarkResult {
    pub fn queued(run_id: &str, persona: &Persona) -> Self {
        let now = Utc::now();
        Self {
            benchmark_id: ulid::Ulid::new().to_string(),
            run_id: run_id.to_string(),
            status: BenchmarkStatus::Queued,
            total_items: 0,
            relevance_accuracy: 0.0,
            quality_score: 0.0,
            detailed_evaluations: BTreeMap::new(),
            missing_items: Vec::new(),
            persona_name: persona.name.clone(),
            persona_focus_areas: persona.focus_areas.clone(),
            created_at: now,
            timestamp: now,
            failure_reason: None,
        }
    }

    pub fn mark(&mut self, status: BenchmarkStatus) {
        self.status = status;
        self.timestamp = Utc::now();
    }

    /// Turn this result into a failure record: identifiers, timestamps and a
    /// reason, with every aggregate reset.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.total_items = 0;
        self.relevance_accuracy = 0.0;
        self.quality_score = 0.0;
        self.detailed_evaluations.clear();
        self.missing_items.clear();
        self.failure_reason = Some(reason.into());
        self.mark(BenchmarkStatus::Failed);
    }

    pub fn is_failed(&self) -> bool {
        self.failure_reason.is_some()
    }
}

/// Acknowledgement returned when a benchmark is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkTicket {
    pub id: String,
    pub status: BenchmarkStatus,
    pub message: String,
    pub estimated_completion_time: DateTime<Utc>,
}
