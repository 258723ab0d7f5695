use std::collections::BTreeMap;

use anas_core::{BenchmarkResult, BenchmarkStatus, Evaluation};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub total_items: usize,
    /// Fraction of evaluations with a correct relevance flag, in [0, 1].
    pub relevance_accuracy: f64,
    /// Mean rating weight, in [0, 100].
    pub quality_score: f64,
}

/// Fold evaluations into summary statistics. An empty set yields zeros.
pub fn summarize<'a>(evaluations: impl IntoIterator<Item = &'a Evaluation>) -> Summary {
    let mut total = 0usize;
    let mut relevant = 0usize;
    let mut weight = 0.0f64;
    for eval in evaluations {
        total += 1;
        if eval.relevance_correct {
            relevant += 1;
        }
        weight += eval.quality_rating.weight();
    }
    if total == 0 {
        return Summary {
            total_items: 0,
            relevance_accuracy: 0.0,
            quality_score: 0.0,
        };
    }
    Summary {
        total_items: total,
        relevance_accuracy: relevant as f64 / total as f64,
        quality_score: weight / total as f64,
    }
}

/// Fill in a completed result from the graded items and the identifiers
/// that had no generated counterpart.
pub fn complete(
    result: &mut BenchmarkResult,
    mut evaluations: BTreeMap<String, Evaluation>,
    missing: Vec<String>,
) {
    for id in &missing {
        evaluations.insert(id.clone(), Evaluation::missing());
    }
    let summary = summarize(evaluations.values());
    result.total_items = summary.total_items;
    result.relevance_accuracy = summary.relevance_accuracy;
    result.quality_score = summary.quality_score;
    result.detailed_evaluations = evaluations;
    result.missing_items = missing;
    result.failure_reason = None;
    result.mark(BenchmarkStatus::Completed);
}
