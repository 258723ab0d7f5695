//! Typed description of the structured output the grader must produce.
//!
//! The schema is built from types rather than assembled as an ad-hoc JSON
//! map, and `validate_evaluation` is run once at startup so a drift between
//! the schema and [`Evaluation`](crate::Evaluation) fails fast.

use serde_json::{json, Map, Value};

use crate::benchmark::QualityRating;
use crate::error::{AnasError, AnasResult};

pub const QUALITY_RATING: &str = "quality_rating";
pub const QUALITY_EXPLANATION: &str = "quality_explanation";
pub const RELEVANCE_CORRECT: &str = "relevance_correct";
pub const RELEVANCE_EXPLANATION: &str = "relevance_explanation";

/// The four fields every per-item verdict must carry.
pub const EVALUATION_FIELDS: [&str; 4] = [
    QUALITY_RATING,
    QUALITY_EXPLANATION,
    RELEVANCE_CORRECT,
    RELEVANCE_EXPLANATION,
];

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    String { allowed: Option<Vec<String>> },
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub name: String,
    pub description: String,
    pub kind: PropertyKind,
}

impl PropertySchema {
    fn string(name: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: PropertyKind::String { allowed: None },
        }
    }

    fn boolean(name: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: PropertyKind::Boolean,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub description: String,
    pub properties: Vec<PropertySchema>,
    pub required: Vec<String>,
    pub additional_properties: bool,
}

impl OutputSchema {
    /// Schema for one benchmark evaluation verdict.
    pub fn evaluation() -> Self {
        let ratings = QualityRating::ALL
            .iter()
            .map(|r| r.as_str().to_string())
            .collect();
        Self {
            name: "benchmark_evaluation".into(),
            description: "an object representing a benchmark evaluation result (quality and relevance)"
                .into(),
            properties: vec![
                PropertySchema {
                    name: QUALITY_RATING.into(),
                    description: "Descriptive rating for summary quality".into(),
                    kind: PropertyKind::String {
                        allowed: Some(ratings),
                    },
                },
                PropertySchema::string(QUALITY_EXPLANATION, "Detailed explanation of the rating"),
                PropertySchema::string(RELEVANCE_EXPLANATION, "Explanation of relevance assessment"),
                PropertySchema::boolean(
                    RELEVANCE_CORRECT,
                    "Whether IsRelevant flag was set correctly",
                ),
            ],
            required: EVALUATION_FIELDS.iter().map(|f| f.to_string()).collect(),
            additional_properties: false,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Check that this schema constrains output to exactly the evaluation
    /// fields, with the rating enumerated over every [`QualityRating`].
    pub fn validate_evaluation(&self) -> AnasResult<()> {
        let mut required: Vec<&str> = self.required.iter().map(String::as_str).collect();
        required.sort_unstable();
        let mut expected = EVALUATION_FIELDS.to_vec();
        expected.sort_unstable();
        if required != expected {
            return Err(AnasError::Config(format!(
                "schema '{}' must require exactly {expected:?}, got {required:?}",
                self.name
            )));
        }
        if self.properties.len() != EVALUATION_FIELDS.len() || self.additional_properties {
            return Err(AnasError::Config(format!(
                "schema '{}' must not allow properties beyond the evaluation fields",
                self.name
            )));
        }

        match self.property(QUALITY_RATING).map(|p| &p.kind) {
            Some(PropertyKind::String {
                allowed: Some(values),
            }) => {
                let names: Vec<&str> = QualityRating::ALL.iter().map(|r| r.as_str()).collect();
                if values.len() != names.len() || !names.iter().all(|n| values.iter().any(|v| v == n))
                {
                    return Err(AnasError::Config(format!(
                        "{QUALITY_RATING} must enumerate {names:?}, got {values:?}"
                    )));
                }
            }
            _ => {
                return Err(AnasError::Config(format!(
                    "{QUALITY_RATING} must be an enumerated string"
                )))
            }
        }

        for field in [QUALITY_EXPLANATION, RELEVANCE_EXPLANATION] {
            if !matches!(
                self.property(field).map(|p| &p.kind),
                Some(PropertyKind::String { .. })
            ) {
                return Err(AnasError::Config(format!("{field} must be a string")));
            }
        }
        if !matches!(
            self.property(RELEVANCE_CORRECT).map(|p| &p.kind),
            Some(PropertyKind::Boolean)
        ) {
            return Err(AnasError::Config(format!(
                "{RELEVANCE_CORRECT} must be a boolean"
            )));
        }
        Ok(())
    }

    /// JSON Schema document for the wire.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for prop in &self.properties {
            let value = match &prop.kind {
                PropertyKind::String { allowed: None } => json!({
                    "type": "string",
                    "description": prop.description,
                }),
                PropertyKind::String {
                    allowed: Some(values),
                } => json!({
                    "type": "string",
                    "description": prop.description,
                    "enum": values,
                }),
                PropertyKind::Boolean => json!({
                    "type": "boolean",
                    "description": prop.description,
                }),
            };
            properties.insert(prop.name.clone(), value);
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
            "additionalProperties": self.additional_properties,
        })
    }
}
