//! Core data models for the credit pack workflow

use crate::classifier::Intent;
use crate::search::SearchStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequirementStatus {
    Filled,
    Empty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum CheckStatus {
    Pass,
    Fail,
    Review,
}

impl From<String> for CheckStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pass" | "passed" | "ok" | "compliant" => CheckStatus::Pass,
            "fail" | "failed" | "breach" | "non-compliant" => CheckStatus::Fail,
            _ => CheckStatus::Review,
        }
    }
}

/// What a handler did, for the front end to react to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    Analyzed,
    AnalysisEnhanced,
    RequirementsDiscovered,
    DataProvided,
    ComplianceChecked,
    StructureGenerated,
    SectionDrafted,
    DraftingComplete,
    Answered,
    StateShown,
    LogShown,
}

//
// ================= Uploads =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub content: String,
    pub file_type: String,
    #[serde(default)]
    pub analyzed: bool,
}

impl UploadedFile {
    /// File type is taken from the extension, `txt` when there is none
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        let file_type = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "txt".to_string());

        Self {
            name,
            content: content.into(),
            file_type,
            analyzed: false,
        }
    }
}

//
// ================= Analysis =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Analysis {
    pub text: String,
    /// Assessment approach the analyst settled on (e.g. full credit assessment)
    #[serde(default)]
    pub approach: Option<String>,
    /// Origination method (e.g. new facility, renewal)
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub thinking: Vec<String>,
}

//
// ================= Requirements =================
//

/// A data point the credit pack needs.
///
/// `status` is derived from `value` and cannot be set independently:
/// it is `Filled` exactly when the trimmed value is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "RequirementRecord")]
pub struct Requirement {
    pub id: String,
    pub name: String,
    value: String,
    status: RequirementStatus,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub source: Option<String>,
}

#[derive(Deserialize)]
struct RequirementRecord {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

impl From<RequirementRecord> for Requirement {
    fn from(record: RequirementRecord) -> Self {
        let id = if record.id.trim().is_empty() {
            slugify(&record.name)
        } else {
            record.id
        };

        let mut requirement = Requirement::new(id, record.name);
        requirement.category = record.category;
        requirement.priority = record.priority;
        requirement.source = record.source;
        requirement.set_value(record.value.map(scalar_text).unwrap_or_default());
        requirement
    }
}

/// Models often return amounts and flags as bare JSON numbers or booleans
fn scalar_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

impl Requirement {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value: String::new(),
            status: RequirementStatus::Empty,
            category: None,
            priority: None,
            source: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.set_value(value);
        self
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into().trim().to_string();
        self.status = if self.value.is_empty() {
            RequirementStatus::Empty
        } else {
            RequirementStatus::Filled
        };
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn status(&self) -> RequirementStatus {
        self.status
    }

    pub fn is_filled(&self) -> bool {
        self.status == RequirementStatus::Filled
    }

    /// Case-insensitive match against either the id or the display name
    pub fn matches(&self, key: &str) -> bool {
        let key = key.trim();
        self.id.eq_ignore_ascii_case(key)
            || self.name.eq_ignore_ascii_case(key)
            || slugify(&self.name) == slugify(key)
    }
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

//
// ================= Compliance =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComplianceCheck {
    pub criterion: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub reference: Option<String>,
}

//
// ================= Document =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub detail_level: Option<String>,
}

impl SectionDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            detail_level: None,
        }
    }
}

/// One question a specialist put to another while working
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentQuery {
    pub from: String,
    pub to: String,
    pub query: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionDraft {
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facts_used: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_items: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_queries: Option<Vec<AgentQuery>>,
}

impl SectionDraft {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            facts_used: None,
            missing_items: None,
            agent_queries: None,
        }
    }
}

//
// ================= Source tracking =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchRecord {
    pub query: String,
    pub purpose: String,
    pub status: SearchStatus,
    pub result_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExampleUsage {
    pub filename: String,
    pub purpose: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourcesUsed {
    pub rag_searches: usize,
    pub examples_used: usize,
    pub files_analyzed: usize,
}

//
// ================= Final Result =================
//

/// What the chat front end renders for every turn, errors included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResponse {
    pub intent: Intent,
    pub response: String,
    pub thinking: Vec<String>,
    pub reasoning: Option<String>,
    pub action: Option<ActionTag>,
    pub requires_approval: bool,
    pub next_suggestion: Option<String>,
    pub agent_communication: Option<Vec<AgentQuery>>,
    pub sources_used: SourcesUsed,
    pub is_error: bool,
    /// Index of the step this turn was recorded as, if it was recorded
    pub step_index: Option<usize>,
}

impl fmt::Display for RequirementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequirementStatus::Filled => "filled",
            RequirementStatus::Empty => "empty",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Review => "REVIEW",
        };
        write!(f, "{}", s)
    }
}
