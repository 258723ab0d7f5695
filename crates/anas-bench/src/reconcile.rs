//! Alignment of generated items against the source material they claim to
//! summarize.
//!
//! The only cross-reference between the two is the `ID: <identifier>` line
//! embedded in each item's raw input, so the source index is built from
//! those lines first and the generated items are matched against it second.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use anas_core::{GeneratedItem, RunRecord};

const ID_PREFIX: &str = "ID: ";

/// A generated item and the source text it was matched to.
#[derive(Debug, Clone, Copy)]
pub struct MatchedPair<'a> {
    pub item: &'a GeneratedItem,
    pub source_text: &'a str,
}

#[derive(Debug, Default)]
pub struct Reconciliation<'a> {
    /// In stored generated-item order.
    pub matched: Vec<MatchedPair<'a>>,
    /// Source identifiers with no generated item, in first-appearance order.
    pub missing: Vec<String>,
    /// Generated items with an empty identifier.
    pub dropped: usize,
    /// Generated identifiers with no source entry.
    pub unmatched: Vec<String>,
}

/// Value of the first `ID: ` line, trimmed. `None` if there is no such line
/// or its value is blank.
pub fn extract_source_id(raw: &str) -> Option<&str> {
    raw.lines()
        .find_map(|line| line.strip_prefix(ID_PREFIX))
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

pub fn reconcile(run: &RunRecord) -> Reconciliation<'_> {
    // Pass 1: identifier -> source text. A repeated identifier keeps its
    // first position but takes the latest text.
    let mut order: Vec<&str> = Vec::new();
    let mut sources: HashMap<&str, &str> = HashMap::new();
    for entry in &run.entry_summaries {
        if let Some(id) = extract_source_id(&entry.raw_input) {
            if sources.insert(id, entry.raw_input.as_str()).is_none() {
                order.push(id);
            }
        }
    }

    // Pass 2: align generated items.
    let mut out = Reconciliation::default();
    let mut seen: HashSet<&str> = HashSet::new();
    for entry in &run.entry_summaries {
        let item = &entry.results;
        if item.id.is_empty() {
            warn!(run_id = %run.run_id, "generated item with empty id dropped");
            out.dropped += 1;
            continue;
        }
        seen.insert(item.id.as_str());
        match sources.get(item.id.as_str()) {
            Some(&source_text) => out.matched.push(MatchedPair { item, source_text }),
            None => {
                warn!(run_id = %run.run_id, item_id = %item.id, "no source input for generated item");
                out.unmatched.push(item.id.clone());
            }
        }
    }

    out.missing = order
        .into_iter()
        .filter(|id| !seen.contains(id))
        .map(str::to_string)
        .collect();
    out
}
