//! Decoding of grader output into an [`Evaluation`].
//!
//! Models occasionally wrap their JSON in markdown fences or a sentence of
//! prose, so the outermost `{...}` object is cut out first. What is left is
//! decoded strictly: every field must be present, no others are allowed and
//! the rating must be one of the four known values.

use serde::Deserialize;

use anas_core::{Evaluation, GradingError, QualityRating};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GradedVerdict {
    quality_rating: String,
    quality_explanation: String,
    relevance_correct: bool,
    relevance_explanation: String,
}

/// Strip code fences and surrounding prose, keeping the outermost object.
fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

pub fn parse_verdict(raw: &str) -> Result<Evaluation, GradingError> {
    let body = extract_object(raw)
        .ok_or_else(|| GradingError::Parse(format!("no JSON object in {} bytes", raw.len())))?;
    let verdict: GradedVerdict =
        serde_json::from_str(body).map_err(|e| GradingError::Parse(e.to_string()))?;
    let quality_rating = verdict
        .quality_rating
        .parse::<QualityRating>()
        .map_err(GradingError::Parse)?;
    Ok(Evaluation {
        quality_rating,
        quality_explanation: verdict.quality_explanation,
        relevance_correct: verdict.relevance_correct,
        relevance_explanation: verdict.relevance_explanation,
    })
}
