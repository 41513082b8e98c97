//! Context Store
//!
//! Single source of truth for one conversation session. The replay-relevant
//! part lives in `WorkflowState`, a fixed-field struct: a snapshot is simply an
//! owned clone of it, so the allow-list cannot drift from the fields restored.
//! Counters and UI flags sit outside it and survive restores.

use crate::error::OrchestrationError;
use crate::models::{
    Analysis, ComplianceCheck, ExampleUsage, Requirement, SearchRecord, SectionDescriptor,
    SectionDraft, SourcesUsed, UploadedFile,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Keys captured by snapshots, in field order
pub const SNAPSHOT_KEYS: [&str; 15] = [
    "uploaded_files",
    "teaser_text",
    "teaser_filename",
    "example_text",
    "example_filename",
    "analysis",
    "requirements",
    "compliance_result",
    "compliance_checks",
    "structure",
    "drafts",
    "current_section_index",
    "user_comments",
    "rag_searches",
    "examples_used",
];

/// Keys that are readable and writable but never snapshotted
pub const EPHEMERAL_KEYS: [&str; 2] = ["turn_count", "awaiting_approval"];

/// Replay-relevant session state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub uploaded_files: BTreeMap<String, UploadedFile>,
    pub teaser_text: String,
    pub teaser_filename: Option<String>,
    pub example_text: String,
    pub example_filename: Option<String>,
    pub analysis: Option<Analysis>,
    pub requirements: Vec<Requirement>,
    pub compliance_result: String,
    pub compliance_checks: Vec<ComplianceCheck>,
    pub structure: Vec<SectionDescriptor>,
    pub drafts: BTreeMap<String, SectionDraft>,
    /// Next undrafted section; always within `0..=structure.len()`
    pub current_section_index: usize,
    pub user_comments: Vec<String>,
    pub rag_searches: Vec<SearchRecord>,
    pub examples_used: Vec<ExampleUsage>,
}

/// Deep copy of `WorkflowState` taken after a step ran
pub type ContextSnapshot = WorkflowState;

impl WorkflowState {
    pub fn has_teaser(&self) -> bool {
        !self.teaser_text.trim().is_empty()
    }

    pub fn has_example(&self) -> bool {
        !self.example_text.trim().is_empty()
    }

    /// The section `current_section_index` points at, if drafting is not finished
    pub fn next_undrafted(&self) -> Option<(usize, &SectionDescriptor)> {
        self.structure
            .get(self.current_section_index)
            .map(|section| (self.current_section_index, section))
    }

    pub fn drafting_complete(&self) -> bool {
        !self.structure.is_empty() && self.current_section_index >= self.structure.len()
    }

    fn clamp_section_index(&mut self) {
        self.current_section_index = self.current_section_index.min(self.structure.len());
    }
}

/// Which slot an upload landed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Teaser,
    Example,
    Supporting,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Teaser => "teaser",
            FileRole::Example => "example",
            FileRole::Supporting => "supporting document",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    pub workflow: WorkflowState,
    /// Conversation turns processed in this session
    pub turn_count: u64,
    /// Last response asked the user to confirm before moving on
    pub awaiting_approval: bool,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =============================
    // Key-based access
    // =============================

    pub fn get(&self, key: &str) -> Option<Value> {
        let wf = &self.workflow;
        let value = match key {
            "uploaded_files" => serde_json::to_value(&wf.uploaded_files),
            "teaser_text" => serde_json::to_value(&wf.teaser_text),
            "teaser_filename" => serde_json::to_value(&wf.teaser_filename),
            "example_text" => serde_json::to_value(&wf.example_text),
            "example_filename" => serde_json::to_value(&wf.example_filename),
            "analysis" => serde_json::to_value(&wf.analysis),
            "requirements" => serde_json::to_value(&wf.requirements),
            "compliance_result" => serde_json::to_value(&wf.compliance_result),
            "compliance_checks" => serde_json::to_value(&wf.compliance_checks),
            "structure" => serde_json::to_value(&wf.structure),
            "drafts" => serde_json::to_value(&wf.drafts),
            "current_section_index" => serde_json::to_value(wf.current_section_index),
            "user_comments" => serde_json::to_value(&wf.user_comments),
            "rag_searches" => serde_json::to_value(&wf.rag_searches),
            "examples_used" => serde_json::to_value(&wf.examples_used),
            "turn_count" => serde_json::to_value(self.turn_count),
            "awaiting_approval" => serde_json::to_value(self.awaiting_approval),
            _ => return None,
        };
        value.ok()
    }

    /// Overwrite one key. The value must have the key's shape.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let wf = &mut self.workflow;
        match key {
            "uploaded_files" => wf.uploaded_files = serde_json::from_value(value)?,
            "teaser_text" => wf.teaser_text = serde_json::from_value(value)?,
            "teaser_filename" => wf.teaser_filename = serde_json::from_value(value)?,
            "example_text" => wf.example_text = serde_json::from_value(value)?,
            "example_filename" => wf.example_filename = serde_json::from_value(value)?,
            "analysis" => wf.analysis = serde_json::from_value(value)?,
            "requirements" => wf.requirements = serde_json::from_value(value)?,
            "compliance_result" => wf.compliance_result = serde_json::from_value(value)?,
            "compliance_checks" => wf.compliance_checks = serde_json::from_value(value)?,
            "structure" => wf.structure = serde_json::from_value(value)?,
            "drafts" => wf.drafts = serde_json::from_value(value)?,
            "current_section_index" => wf.current_section_index = serde_json::from_value(value)?,
            "user_comments" => wf.user_comments = serde_json::from_value(value)?,
            "rag_searches" => wf.rag_searches = serde_json::from_value(value)?,
            "examples_used" => wf.examples_used = serde_json::from_value(value)?,
            "turn_count" => self.turn_count = serde_json::from_value(value)?,
            "awaiting_approval" => self.awaiting_approval = serde_json::from_value(value)?,
            _ => return Err(OrchestrationError::UnknownContextKey(key.to_string())),
        }
        self.workflow.clamp_section_index();
        Ok(())
    }

    // =============================
    // Snapshot / restore
    // =============================

    pub fn snapshot(&self) -> ContextSnapshot {
        self.workflow.clone()
    }

    /// Overwrite the allow-listed fields; counters and flags are left alone
    pub fn restore(&mut self, snapshot: &ContextSnapshot) {
        self.workflow = snapshot.clone();
        self.workflow.clamp_section_index();
    }

    /// Apply a snapshot given as JSON, key by key.
    ///
    /// Missing or malformed keys are skipped and returned; the rest are applied.
    pub fn restore_partial(&mut self, snapshot: &Value) -> Vec<&'static str> {
        let mut skipped = Vec::new();

        for key in SNAPSHOT_KEYS {
            match snapshot.get(key) {
                Some(value) => {
                    if let Err(e) = self.set(key, value.clone()) {
                        debug!(key, error = %e, "Skipping malformed snapshot key");
                        skipped.push(key);
                    }
                }
                None => skipped.push(key),
            }
        }

        skipped
    }

    /// Back to fresh defaults, keeping the teaser and example uploads
    pub fn reset_preserving_uploads(&mut self) {
        let teaser_text = std::mem::take(&mut self.workflow.teaser_text);
        let teaser_filename = self.workflow.teaser_filename.take();
        let example_text = std::mem::take(&mut self.workflow.example_text);
        let example_filename = self.workflow.example_filename.take();

        self.workflow = WorkflowState {
            teaser_text,
            teaser_filename,
            example_text,
            example_filename,
            ..WorkflowState::default()
        };
    }

    // =============================
    // Uploads
    // =============================

    /// Add a file to the registry and slot it as teaser or example.
    ///
    /// Names mentioning example/template/sample go to the example slot,
    /// names mentioning teaser go to the teaser slot; anything else fills
    /// whichever of the two is still empty, teaser first.
    pub fn register_upload(&mut self, file: UploadedFile) -> FileRole {
        let lowered = file.name.to_lowercase();
        let wf = &mut self.workflow;

        let role = if ["example", "template", "sample"].iter().any(|k| lowered.contains(k)) {
            FileRole::Example
        } else if lowered.contains("teaser")
            || wf.teaser_filename.as_deref() == Some(file.name.as_str())
        {
            FileRole::Teaser
        } else if wf.example_filename.as_deref() == Some(file.name.as_str()) {
            FileRole::Example
        } else if !wf.has_teaser() {
            FileRole::Teaser
        } else if !wf.has_example() {
            FileRole::Example
        } else {
            FileRole::Supporting
        };

        match role {
            FileRole::Teaser => {
                wf.teaser_text = file.content.clone();
                wf.teaser_filename = Some(file.name.clone());
            }
            FileRole::Example => {
                wf.example_text = file.content.clone();
                wf.example_filename = Some(file.name.clone());
            }
            FileRole::Supporting => {}
        }

        debug!(file = %file.name, ?role, "Registered upload");
        wf.uploaded_files.insert(file.name.clone(), file);
        role
    }

    pub fn mark_analyzed(&mut self, filename: &str) {
        if let Some(file) = self.workflow.uploaded_files.get_mut(filename) {
            file.analyzed = true;
        }
    }

    // =============================
    // Summaries
    // =============================

    pub fn sources_used(&self) -> SourcesUsed {
        let wf = &self.workflow;
        SourcesUsed {
            rag_searches: wf.rag_searches.len(),
            examples_used: wf.examples_used.len(),
            files_analyzed: wf.uploaded_files.values().filter(|f| f.analyzed).count(),
        }
    }

    /// Which workflow steps are complete, one line each
    pub fn state_summary(&self) -> String {
        let wf = &self.workflow;
        let mut lines = Vec::with_capacity(7);

        lines.push(match &wf.teaser_filename {
            Some(name) if wf.has_teaser() => format!("Teaser: uploaded ({})", name),
            _ => "Teaser: not uploaded".to_string(),
        });
        lines.push(match &wf.example_filename {
            Some(name) if wf.has_example() => format!("Example: uploaded ({})", name),
            _ => "Example: not uploaded".to_string(),
        });
        lines.push(match &wf.analysis {
            Some(analysis) => format!(
                "Analysis: done (approach: {}, method: {})",
                analysis.approach.as_deref().unwrap_or("unknown"),
                analysis.method.as_deref().unwrap_or("unknown")
            ),
            None => "Analysis: not done".to_string(),
        });
        lines.push(if wf.requirements.is_empty() {
            "Requirements: not discovered".to_string()
        } else {
            format!(
                "Requirements: {} discovered, {} filled",
                wf.requirements.len(),
                wf.requirements.iter().filter(|r| r.is_filled()).count()
            )
        });
        lines.push(if wf.compliance_result.is_empty() && wf.compliance_checks.is_empty() {
            "Compliance: not checked".to_string()
        } else {
            format!("Compliance: checked ({} checks)", wf.compliance_checks.len())
        });
        lines.push(if wf.structure.is_empty() {
            "Structure: not generated".to_string()
        } else {
            format!("Structure: {} sections", wf.structure.len())
        });
        if !wf.structure.is_empty() {
            lines.push(format!(
                "Drafting: {}/{} sections drafted",
                wf.drafts.len(),
                wf.structure.len()
            ));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_structure(n: usize) -> ContextStore {
        let mut store = ContextStore::new();
        store.workflow.structure = (0..n)
            .map(|i| SectionDescriptor::new(format!("Section {}", i), ""))
            .collect();
        store
    }

    #[test]
    fn test_snapshot_is_a_deep_copy() {
        let mut store = ContextStore::new();
        store.workflow.requirements = vec![Requirement::new("tenor", "Tenor")];
        let snapshot = store.snapshot();

        store.workflow.requirements[0].set_value("5 years");
        store.workflow.user_comments.push("later".into());

        assert!(!snapshot.requirements[0].is_filled());
        assert!(snapshot.user_comments.is_empty());
    }

    #[test]
    fn test_restore_leaves_ephemeral_fields() {
        let mut store = ContextStore::new();
        let snapshot = store.snapshot();

        store.turn_count = 7;
        store.awaiting_approval = true;
        store.workflow.compliance_result = "ok".into();
        store.restore(&snapshot);

        assert_eq!(store.turn_count, 7);
        assert!(store.awaiting_approval);
        assert!(store.workflow.compliance_result.is_empty());
    }

    #[test]
    fn test_ephemeral_keys_are_readable_but_not_snapshotted() {
        let store = ContextStore::new();
        let snapshot = serde_json::to_value(store.snapshot()).unwrap();

        for key in EPHEMERAL_KEYS {
            assert!(store.get(key).is_some(), "{} should be readable", key);
            assert!(snapshot.get(key).is_none(), "{} leaked into the snapshot", key);
            assert!(!SNAPSHOT_KEYS.contains(&key));
        }
        for key in SNAPSHOT_KEYS {
            assert!(snapshot.get(key).is_some(), "{} missing from the snapshot", key);
        }
    }

    #[test]
    fn test_get_and_set_by_key() {
        let mut store = store_with_structure(2);

        store.set("teaser_text", json!("Acme seeks EUR 25m")).unwrap();
        assert_eq!(store.get("teaser_text"), Some(json!("Acme seeks EUR 25m")));

        store.set("turn_count", json!(3)).unwrap();
        assert_eq!(store.get("turn_count"), Some(json!(3)));

        assert!(store.get("nonexistent").is_none());
        assert!(matches!(
            store.set("nonexistent", json!(1)),
            Err(OrchestrationError::UnknownContextKey(_))
        ));
        assert!(store.set("requirements", json!("not a list")).is_err());
    }

    #[test]
    fn test_section_index_is_clamped() {
        let mut store = store_with_structure(2);
        store.set("current_section_index", json!(9)).unwrap();
        assert_eq!(store.workflow.current_section_index, 2);
        assert!(store.workflow.drafting_complete());
    }

    #[test]
    fn test_restore_partial_skips_missing_keys() {
        let mut store = ContextStore::new();
        store.workflow.example_text = "keep me".into();

        let skipped = store.restore_partial(&json!({
            "teaser_text": "restored teaser",
            "requirements": [{ "id": "amount", "name": "Amount", "value": "10m" }],
            "structure": "garbage"
        }));

        assert_eq!(store.workflow.teaser_text, "restored teaser");
        assert!(store.workflow.requirements[0].is_filled());
        assert_eq!(store.workflow.example_text, "keep me");
        assert!(skipped.contains(&"example_text"));
        assert!(skipped.contains(&"structure"));
        assert!(!skipped.contains(&"teaser_text"));
    }

    #[test]
    fn test_reset_preserving_uploads() {
        let mut store = ContextStore::new();
        store.register_upload(UploadedFile::new("teaser.txt", "deal"));
        store.register_upload(UploadedFile::new("example_pack.md", "# Example"));
        store.workflow.analysis = Some(Analysis::default());
        store.workflow.user_comments.push("note".into());

        store.reset_preserving_uploads();

        assert_eq!(store.workflow.teaser_text, "deal");
        assert_eq!(store.workflow.example_filename.as_deref(), Some("example_pack.md"));
        assert!(store.workflow.analysis.is_none());
        assert!(store.workflow.user_comments.is_empty());
        assert!(store.workflow.uploaded_files.is_empty());
    }

    #[test]
    fn test_register_upload_roles() {
        let mut store = ContextStore::new();

        assert_eq!(store.register_upload(UploadedFile::new("credit_pack_template.docx", "T")), FileRole::Example);
        assert_eq!(store.register_upload(UploadedFile::new("acme.pdf", "A")), FileRole::Teaser);
        assert_eq!(store.register_upload(UploadedFile::new("financials.xlsx", "F")), FileRole::Supporting);
        assert_eq!(store.register_upload(UploadedFile::new("acme.pdf", "A v2")), FileRole::Teaser);

        assert_eq!(store.workflow.teaser_text, "A v2");
        assert_eq!(store.workflow.uploaded_files.len(), 3);
    }

    #[test]
    fn test_sources_used_counts_analyzed_files() {
        let mut store = ContextStore::new();
        store.register_upload(UploadedFile::new("teaser.pdf", "x"));
        store.mark_analyzed("teaser.pdf");
        store.mark_analyzed("missing.pdf");

        assert_eq!(store.sources_used().files_analyzed, 1);
    }

    #[test]
    fn test_state_summary() {
        let mut store = store_with_structure(3);
        store.workflow.analysis = Some(Analysis {
            text: "..".into(),
            approach: Some("Full assessment".into()),
            method: None,
            thinking: vec![],
        });

        let summary = store.state_summary();
        assert!(summary.contains("Teaser: not uploaded"));
        assert!(summary.contains("approach: Full assessment, method: unknown"));
        assert!(summary.contains("Drafting: 0/3 sections drafted"));
    }
}
