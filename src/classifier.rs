//! Intent Classifier
//!
//! Maps a free-text user message onto one of a fixed set of workflow intents
//! with a single constrained model call. Anything the model returns outside
//! the enumerated labels, and any failed call, resolves to `Intent::General`.
//! Fallbacks are logged and counted so misrouting stays visible.

use crate::llm::{supports_thinking, LlmClient, LlmRequest};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    AnalyzeDeal,
    EnhanceAnalysis,
    DiscoverRequirements,
    ProvideData,
    CheckCompliance,
    GenerateStructure,
    DraftSection,
    General,
    ShowState,
    ShowLog,
}

impl Intent {
    pub const ALL: [Intent; 10] = [
        Intent::AnalyzeDeal,
        Intent::EnhanceAnalysis,
        Intent::DiscoverRequirements,
        Intent::ProvideData,
        Intent::CheckCompliance,
        Intent::GenerateStructure,
        Intent::DraftSection,
        Intent::General,
        Intent::ShowState,
        Intent::ShowLog,
    ];

    /// Wire label, as offered to the model and used in serialized records
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::AnalyzeDeal => "analyze_deal",
            Intent::EnhanceAnalysis => "enhance_analysis",
            Intent::DiscoverRequirements => "discover_requirements",
            Intent::ProvideData => "provide_data",
            Intent::CheckCompliance => "check_compliance",
            Intent::GenerateStructure => "generate_structure",
            Intent::DraftSection => "draft_section",
            Intent::General => "general",
            Intent::ShowState => "show_state",
            Intent::ShowLog => "show_log",
        }
    }

    pub fn from_label(label: &str) -> Option<Intent> {
        Intent::ALL.into_iter().find(|intent| intent.as_str() == label)
    }

    /// Only these intents are recorded on the step timeline
    pub fn is_state_changing(&self) -> bool {
        !matches!(self, Intent::General | Intent::ShowState | Intent::ShowLog)
    }

    /// Human-readable label for the step timeline
    pub fn step_label(&self) -> &'static str {
        match self {
            Intent::AnalyzeDeal => "Analyze deal",
            Intent::EnhanceAnalysis => "Enhance analysis",
            Intent::DiscoverRequirements => "Discover requirements",
            Intent::ProvideData => "Provide data",
            Intent::CheckCompliance => "Check compliance",
            Intent::GenerateStructure => "Generate structure",
            Intent::DraftSection => "Draft section",
            Intent::General => "Answer question",
            Intent::ShowState => "Show state",
            Intent::ShowLog => "Show log",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Intent::AnalyzeDeal => "analyze the uploaded deal teaser",
            Intent::EnhanceAnalysis => "refine or correct the existing deal analysis",
            Intent::DiscoverRequirements => "work out which data points the credit pack needs",
            Intent::ProvideData => "the user supplies values for requirements or extra facts",
            Intent::CheckCompliance => "check the deal against credit guidelines",
            Intent::GenerateStructure => "propose the section structure of the credit pack",
            Intent::DraftSection => "draft the next (or a named) section of the credit pack",
            Intent::General => "any other question or conversation",
            Intent::ShowState => "show what has been done so far",
            Intent::ShowLog => "show the step history / process log",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

lazy_static! {
    static ref INTENT_MENU: String = Intent::ALL
        .iter()
        .map(|intent| format!("- {}: {}", intent.as_str(), intent.description()))
        .collect::<Vec<_>>()
        .join("\n");
}

/// Outcome of one classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub intent: Intent,
    /// What the model actually said, when it said anything
    pub raw_label: Option<String>,
    pub fell_back: bool,
}

/// LLM-backed intent classifier
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
    fallbacks: AtomicU64,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Number of times classification fell back to `general`
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// A label is a handful of tokens, but thinking models spend their
    /// hidden reasoning from the same output budget
    fn request(&self, prompt: String) -> LlmRequest {
        let max_tokens = if supports_thinking(&self.model) { 1024 } else { 20 };
        LlmRequest::new(prompt, &self.model)
            .with_temperature(self.temperature)
            .with_max_tokens(max_tokens)
            .with_thoughts(false)
    }

    /// Classify a message. Never fails; notes go into `thinking`.
    pub async fn classify(
        &self,
        message: &str,
        state_summary: &str,
        recent_turns: &str,
        thinking: &mut Vec<String>,
    ) -> Classification {
        let request = self.request(build_prompt(message, state_summary, recent_turns));

        let reply = match self.llm.call(&request).await {
            Ok(reply) => reply.text,
            Err(e) => {
                warn!(error = %e, "Intent classification call failed, falling back to general");
                thinking.push(format!("⚠️ Intent classification failed ({}), treating as general", e));
                return self.fallback(None);
            }
        };

        match parse_label(&reply) {
            Some(intent) => {
                debug!(intent = %intent, "Intent classified");
                thinking.push(format!("Intent: {}", intent));
                Classification {
                    intent,
                    raw_label: Some(reply.trim().to_string()),
                    fell_back: false,
                }
            }
            None => {
                warn!(label = %reply.trim(), "Classifier returned an unknown intent, falling back to general");
                thinking.push(format!(
                    "⚠️ Unrecognised intent {:?}, treating as general",
                    reply.trim()
                ));
                self.fallback(Some(reply.trim().to_string()))
            }
        }
    }

    fn fallback(&self, raw_label: Option<String>) -> Classification {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        Classification {
            intent: Intent::General,
            raw_label,
            fell_back: true,
        }
    }
}

fn build_prompt(message: &str, state_summary: &str, recent_turns: &str) -> String {
    format!(
        r#"You route messages in a credit pack drafting assistant.

Workflow order: upload -> analyze_deal -> discover_requirements -> check_compliance -> generate_structure -> draft_section

CURRENT STATE:
{}

RECENT CONVERSATION:
{}

USER MESSAGE:
{}

Valid intents:
{}

Reply with exactly one intent label from the list and nothing else."#,
        state_summary,
        if recent_turns.trim().is_empty() { "(none)" } else { recent_turns },
        message,
        *INTENT_MENU,
    )
}

/// Find the first valid label on the first non-empty line of the reply
fn parse_label(reply: &str) -> Option<Intent> {
    let line = reply.lines().map(str::trim).find(|l| !l.is_empty())?;

    line.to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .map(|token| token.replace('-', "_"))
        .find_map(|token| Intent::from_label(&token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    fn classifier(llm: Arc<ScriptedLlm>) -> IntentClassifier {
        IntentClassifier::new(llm, "test-model", 0.0)
    }

    #[test]
    fn test_parse_label_variants() {
        assert_eq!(parse_label("draft_section"), Some(Intent::DraftSection));
        assert_eq!(parse_label("  `check-compliance`.\n"), Some(Intent::CheckCompliance));
        assert_eq!(parse_label("Intent: ANALYZE_DEAL"), Some(Intent::AnalyzeDeal));
        assert_eq!(parse_label("write_poem"), None);
        assert_eq!(parse_label(""), None);
    }

    #[test]
    fn test_state_changing_intents() {
        let recorded: Vec<_> = Intent::ALL
            .into_iter()
            .filter(Intent::is_state_changing)
            .collect();
        assert_eq!(recorded.len(), 7);
        assert!(!Intent::General.is_state_changing());
        assert!(!Intent::ShowLog.is_state_changing());
    }

    #[test]
    fn test_labels_round_trip_through_serde() {
        for intent in Intent::ALL {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent.as_str()));
        }
    }

    #[test]
    fn test_request_budget_leaves_room_for_thinking_models() {
        let llm = Arc::new(ScriptedLlm::new(Vec::<String>::new()));

        let flash = IntentClassifier::new(llm.clone(), "gemini-2.0-flash", 0.0).request("hi".into());
        assert_eq!(flash.max_tokens, 20);
        assert!(!flash.include_thoughts);

        let thinking = IntentClassifier::new(llm, "gemini-2.5-flash", 0.0).request("hi".into());
        assert!(thinking.max_tokens >= 1024);
        assert!(!thinking.include_thoughts);
    }

    #[tokio::test]
    async fn test_valid_label_is_used() {
        let llm = Arc::new(ScriptedLlm::new(["generate_structure"]));
        let classifier = classifier(llm.clone());
        let mut thinking = Vec::new();

        let result = classifier
            .classify("propose the sections please", "analysis: done", "", &mut thinking)
            .await;

        assert_eq!(result.intent, Intent::GenerateStructure);
        assert!(!result.fell_back);
        assert_eq!(classifier.fallback_count(), 0);
        assert!(llm.prompts()[0].contains("propose the sections please"));
    }

    #[tokio::test]
    async fn test_unknown_label_falls_back_to_general() {
        let llm = Arc::new(ScriptedLlm::new(["summon_dragon"]));
        let classifier = classifier(llm);
        let mut thinking = Vec::new();

        let result = classifier.classify("hello", "", "", &mut thinking).await;

        assert_eq!(result.intent, Intent::General);
        assert!(result.fell_back);
        assert_eq!(result.raw_label.as_deref(), Some("summon_dragon"));
        assert_eq!(classifier.fallback_count(), 1);
        assert!(thinking[0].contains("Unrecognised intent"));
    }

    #[tokio::test]
    async fn test_call_failure_falls_back_to_general() {
        let llm = Arc::new(ScriptedLlm::new(Vec::<String>::new()));
        llm.push_failure("503 Service Unavailable");
        let classifier = classifier(llm);
        let mut thinking = Vec::new();

        let result = classifier.classify("analyze it", "", "", &mut thinking).await;

        assert_eq!(result.intent, Intent::General);
        assert!(result.raw_label.is_none());
        assert_eq!(classifier.fallback_count(), 1);
    }
}
