use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AnasError, AnasResult};

const MAX_RUN_ID_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// One submitted batch of generated item summaries under a single persona.
///
/// Fields the auditor does not interpret (model names, processing times,
/// image and web summaries...) are kept in `extra` so a stored run reads
/// back exactly as the producer sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    #[serde(default)]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub entry_summaries: Vec<EntrySummary>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunRecord {
    pub fn new(persona: Persona, entry_summaries: Vec<EntrySummary>) -> Self {
        Self {
            run_id: String::new(),
            run_date: None,
            persona,
            entry_summaries,
            extra: Map::new(),
        }
    }

    /// Prepare a submitted record for storage: assign an identifier and a
    /// run date when the producer left them out, and reject identifiers that
    /// cannot live inside a store key.
    pub fn accept(mut self) -> AnasResult<Self> {
        let trimmed = self.run_id.trim();
        if trimmed.is_empty() {
            self.run_id = ulid::Ulid::new().to_string();
        } else {
            validate_run_id(trimmed)?;
            self.run_id = trimmed.to_string();
        }
        if self.run_date.is_none() {
            self.run_date = Some(Utc::now());
        }
        Ok(self)
    }

    pub fn total_items(&self) -> usize {
        self.entry_summaries.len()
    }
}

pub fn validate_run_id(id: &str) -> AnasResult<()> {
    if id.is_empty() {
        return Err(AnasError::Validation("run id is empty".into()));
    }
    if id.len() > MAX_RUN_ID_LEN {
        return Err(AnasError::Validation(format!(
            "run id longer than {MAX_RUN_ID_LEN} bytes"
        )));
    }
    if id.contains('/') || id.chars().any(char::is_control) {
        return Err(AnasError::Validation(format!(
            "run id '{}' contains '/' or control characters",
            id.escape_default()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Persona
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub persona_identity: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub exclusion_criteria: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Generated items
// ---------------------------------------------------------------------------

/// A generated item paired with the raw source text it was derived from.
/// The raw text is expected to carry an `ID: <identifier>` line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    #[serde(default)]
    pub raw_input: String,
    #[serde(default)]
    pub results: GeneratedItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub comment_summary: String,
    #[serde(default, rename = "imageDescription", alias = "imageSummary")]
    pub image_summary: String,
    #[serde(default)]
    pub web_content_summary: String,
    #[serde(default)]
    pub is_relevant: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Listing projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub id: String,
    pub persona_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<usize>,
}

impl RunMetadata {
    /// Project a stored record. The identifier comes from the store key, not
    /// the payload, so a record whose embedded id disagrees is still listed
    /// under the key it can be fetched by.
    pub fn project(key_id: &str, record: &RunRecord) -> Self {
        Self {
            id: key_id.to_string(),
            persona_name: record.persona.name.clone(),
            run_date: record.run_date,
            total_items: Some(record.total_items()),
        }
    }
}

/// Acknowledgement returned when a run is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReceipt {
    pub id: String,
    pub status: String,
    pub message: String,
}

impl RunReceipt {
    pub fn stored(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: "stored".into(),
            message: "Run data successfully received and stored".into(),
        }
    }
}
