//! Grading prompts.
//!
//! The system prompt is a persona-specific template with three slots:
//! `{{persona_identity}}`, `{{focus_areas}}` and `{{exclusion_criteria}}`.
//! List slots render as one `* item` line per entry.

use std::fmt::Write as _;
use std::path::Path;

use anas_core::{AnasError, AnasResult, GeneratedItem, GradingError, Persona};

use crate::reconcile::MatchedPair;

pub const DEFAULT_TEMPLATE: &str = "\
You are an expert in evaluating AI-generated content. Your task is to evaluate the quality of the following post summary, focusing purely on how well it summarizes and analyzes the content.

The persona is {{persona_identity}}

The persona's focus areas are:
{{focus_areas}}
The summary should be marked as irrelevant if it matches:
{{exclusion_criteria}}
For each summary, evaluate how well it summarizes the post, focusing on the following criteria:

1. Summary Quality (choose one):
   - Excellent: Comprehensive summary that captures all key details and provides a clear, well-structured overview
   - Good: Clear summary with some details but lacks depth or clarity
   - Fair: Basic summary with some details but lacks depth or clarity
   - Poor: Incomplete or unclear summary lacking essential details

2. Evaluation Criteria:
   - Comprehensiveness: Does it capture all key details?
   - Technical Accuracy: If technical details are provided, are they accurate?
   - Clarity: Is the information presented in a clear, well-structured manner?
   - Comment Integration: Are community discussions and feedback well-analyzed?

3. Relevance Assessment (separate from quality rating):
   - Check if the original content matches any exclusion criteria. If it does, the IsRelevant flag should be false.
   - Evaluate if the IsRelevant flag is set appropriately
   - Assess if the relevance explanation is clear and justified

Respond with a JSON object containing:
{
  \"quality_rating\": string,  // One of: \"Excellent\", \"Good\", \"Fair\", \"Poor\"
  \"quality_explanation\": string,  // Detailed explanation of the summary quality
  \"relevance_correct\": boolean,  // Whether IsRelevant flag was set correctly based on exclusion criteria
  \"relevance_explanation\": string // Explanation of relevance assessment
}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    PersonaIdentity,
    FocusAreas,
    ExclusionCriteria,
}

impl Slot {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "persona_identity" => Some(Self::PersonaIdentity),
            "focus_areas" => Some(Self::FocusAreas),
            "exclusion_criteria" => Some(Self::ExclusionCriteria),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(Slot),
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        // the built-in template is covered by tests
        Self::parse(DEFAULT_TEMPLATE).unwrap_or_else(|_| Self {
            segments: vec![Segment::Text(DEFAULT_TEMPLATE.to_string())],
        })
    }
}

impl PromptTemplate {
    pub fn parse(source: &str) -> Result<Self, GradingError> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                GradingError::Template(format!(
                    "unterminated slot at byte {}",
                    source.len() - rest.len() + start
                ))
            })?;
            let name = after[..end].trim();
            let slot = Slot::parse(name)
                .ok_or_else(|| GradingError::Template(format!("unknown slot '{name}'")))?;
            segments.push(Segment::Slot(slot));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn from_file(path: &Path) -> AnasResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            AnasError::Config(format!("reading prompt template {}: {e}", path.display()))
        })?;
        Ok(Self::parse(&source)?)
    }

    /// Render the system prompt for `persona`.
    pub fn render(&self, persona: &Persona) -> Result<String, GradingError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Slot(Slot::PersonaIdentity) => {
                    let identity = persona.persona_identity.trim();
                    if identity.is_empty() {
                        return Err(GradingError::Template(format!(
                            "persona '{}' has no identity",
                            persona.name
                        )));
                    }
                    out.push_str(identity);
                }
                Segment::Slot(Slot::FocusAreas) => push_list(&mut out, &persona.focus_areas),
                Segment::Slot(Slot::ExclusionCriteria) => {
                    push_list(&mut out, &persona.exclusion_criteria)
                }
            }
        }
        Ok(out)
    }
}

fn push_list(out: &mut String, items: &[String]) {
    for item in items {
        let _ = writeln!(out, "* {item}");
    }
}

/// Render a generated item the way the grader sees it.
pub fn format_item(item: &GeneratedItem) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "Title: {}", item.title);
    let _ = writeln!(s, "ID: {}", item.id);
    let _ = writeln!(s, "Summary: {}", item.summary);
    let _ = writeln!(s, "Comment Summary: {}", item.comment_summary);
    let _ = writeln!(s, "Image Summary: {}", item.image_summary);
    let _ = writeln!(s, "Web Summary: {}", item.web_content_summary);
    let _ = writeln!(s, "IsRelevant: {}", item.is_relevant);
    s
}

pub fn user_prompt(pair: &MatchedPair<'_>) -> String {
    format!(
        "Source Material:\n{}\n\nGenerated Summary:\n{}\n",
        pair.source_text,
        format_item(pair.item)
    )
}
