//! Step recording for audit and replay
//!
//! Every state-changing turn appends a `ProcessStepRecord` carrying a deep
//! snapshot of the workflow state after it ran. The history is append-only
//! except for suffix truncation when a replay rewinds it.

use crate::classifier::Intent;
use crate::state::{ContextSnapshot, ContextStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use tracing::debug;

/// Characters kept in a response preview
pub const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStepRecord {
    pub step_index: usize,
    pub phase: Intent,
    pub label: String,
    pub thinking: Vec<String>,
    pub response: String,
    pub response_preview: String,
    pub context_after: ContextSnapshot,
    pub recorded_at: DateTime<Utc>,
    /// SHA-256 of `context_after` at record time
    pub context_hash: String,
}

/// Ordered step timeline for one session
#[derive(Debug, Clone, Default)]
pub struct StepHistory {
    records: Vec<ProcessStepRecord>,
}

impl StepHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record for a state-changing intent.
    ///
    /// Returns the new step index, or `None` for read-only intents.
    pub fn record(
        &mut self,
        intent: Intent,
        response: &str,
        thinking: &[String],
        store: &ContextStore,
    ) -> Option<usize> {
        if !intent.is_state_changing() {
            return None;
        }

        let step_index = self.records.len();
        let context_after = store.snapshot();
        let context_hash = compute_snapshot_hash(&context_after);
        let label = step_label(intent, response);

        debug!(step_index, phase = %intent, label = %label, "Recording step");

        self.records.push(ProcessStepRecord {
            step_index,
            phase: intent,
            label,
            thinking: thinking.to_vec(),
            response: response.to_string(),
            response_preview: response_preview(response),
            context_after,
            recorded_at: Utc::now(),
            context_hash,
        });

        Some(step_index)
    }

    pub fn records(&self) -> &[ProcessStepRecord] {
        &self.records
    }

    pub fn get(&self, step_index: usize) -> Option<&ProcessStepRecord> {
        self.records.get(step_index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keep only the first `len` steps
    pub fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }

    /// Check a record's snapshot against the hash taken when it was recorded
    pub fn verify_integrity(&self, step_index: usize) -> bool {
        self.records
            .get(step_index)
            .map(|record| compute_snapshot_hash(&record.context_after) == record.context_hash)
            .unwrap_or(false)
    }

    /// Timeline as markdown, one line per step
    pub fn render(&self) -> String {
        if self.records.is_empty() {
            return "No steps recorded yet.".to_string();
        }

        let mut out = String::from("### Process log\n\n");
        for record in &self.records {
            out.push_str(&format!(
                "{}. **{}** ({}): {}\n",
                record.step_index,
                record.label,
                record.recorded_at.format("%H:%M:%S"),
                record.response_preview.replace('\n', " ")
            ));
        }
        out
    }
}

const DRAFT_LABEL_PREFIX: &str = "Draft: ";

/// Generic label from the intent; drafting steps use the first markdown heading
pub fn step_label(intent: Intent, response: &str) -> String {
    if intent == Intent::DraftSection {
        if let Some(heading) = first_heading(response) {
            return format!("{}{}", DRAFT_LABEL_PREFIX, heading);
        }
    }
    intent.step_label().to_string()
}

/// Section name recorded in a drafting step's label
pub fn drafted_section_name(label: &str) -> Option<&str> {
    label.strip_prefix(DRAFT_LABEL_PREFIX)
}

fn first_heading(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().trim_matches('*').trim().to_string())
        .filter(|heading| !heading.is_empty())
}

/// First `PREVIEW_CHARS` characters, with `...` when cut
pub fn response_preview(response: &str) -> String {
    let mut chars = response.chars();
    let preview: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Compute SHA256 hash of a snapshot for integrity verification
/// Streams JSON directly into the hasher
pub fn compute_snapshot_hash(snapshot: &ContextSnapshot) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), snapshot).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Requirement;

    #[test]
    fn test_read_only_intents_are_not_recorded() {
        let mut history = StepHistory::new();
        let store = ContextStore::new();

        assert_eq!(history.record(Intent::General, "hi", &[], &store), None);
        assert_eq!(history.record(Intent::ShowLog, "log", &[], &store), None);
        assert!(history.is_empty());
    }

    #[test]
    fn test_step_indices_are_contiguous() {
        let mut history = StepHistory::new();
        let store = ContextStore::new();

        for intent in [Intent::AnalyzeDeal, Intent::General, Intent::DiscoverRequirements, Intent::CheckCompliance] {
            history.record(intent, "done", &[], &store);
        }

        assert_eq!(history.len(), 3);
        for (i, record) in history.records().iter().enumerate() {
            assert_eq!(record.step_index, i);
        }
    }

    #[test]
    fn test_recorded_snapshot_is_immutable() {
        let mut history = StepHistory::new();
        let mut store = ContextStore::new();
        store.workflow.requirements.push(Requirement::new("amount", "Amount"));

        history.record(Intent::DiscoverRequirements, "found 1", &[], &store);
        store.workflow.requirements[0].set_value("EUR 10m");
        store.workflow.requirements.push(Requirement::new("tenor", "Tenor"));

        let snapshot = &history.get(0).unwrap().context_after;
        assert_eq!(snapshot.requirements.len(), 1);
        assert!(!snapshot.requirements[0].is_filled());
        assert!(history.verify_integrity(0));
    }

    #[test]
    fn test_draft_label_uses_heading() {
        assert_eq!(
            step_label(Intent::DraftSection, "## Executive Summary\n\nAcme is..."),
            "Draft: Executive Summary"
        );
        assert_eq!(step_label(Intent::DraftSection, "⚠️ No structure yet"), "Draft section");
        assert_eq!(step_label(Intent::AnalyzeDeal, "# Heading"), "Analyze deal");
        assert_eq!(drafted_section_name("Draft: Executive Summary"), Some("Executive Summary"));
        assert_eq!(drafted_section_name("Draft section"), None);
    }

    #[test]
    fn test_response_preview() {
        let short = "short answer";
        assert_eq!(response_preview(short), short);

        let long = "é".repeat(250);
        let preview = response_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);

        let exact = "x".repeat(PREVIEW_CHARS);
        assert_eq!(response_preview(&exact), exact);
    }

    #[test]
    fn test_truncate_and_render() {
        let mut history = StepHistory::new();
        let store = ContextStore::new();
        history.record(Intent::AnalyzeDeal, "a", &[], &store);
        history.record(Intent::GenerateStructure, "b", &[], &store);

        history.truncate(1);
        assert_eq!(history.len(), 1);
        assert!(history.render().contains("**Analyze deal**"));
        assert!(!history.verify_integrity(5));
    }
}
