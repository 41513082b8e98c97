//! Specialist agents
//!
//! The orchestrator never prompts a model for domain work itself. It hands
//! that to three specialists: the analyst (teaser analysis, requirements,
//! answering colleagues' questions), the compliance advisor and the writer.

use crate::config::OrchestratorConfig;
use crate::llm::LlmClient;
use crate::models::{
    Analysis, AgentQuery, ComplianceCheck, Requirement, SectionDescriptor, SectionDraft,
};
use crate::search::SearchHit;
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub mod llm;
pub use llm::{AgentModel, LlmAnalyst, LlmComplianceAdvisor, LlmWriter};

/// Everything the writer gets to see when drafting one section
#[derive(Debug, Clone, Default)]
pub struct DraftingContext<'a> {
    pub teaser_text: &'a str,
    pub analysis_text: &'a str,
    pub requirements: &'a [Requirement],
    pub compliance_result: &'a str,
    /// Earlier sections in document order, already formatted
    pub previously_drafted: String,
    pub user_comments: &'a [String],
    pub instruction: Option<&'a str>,
}

#[async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(&self, teaser_text: &str) -> Result<Analysis>;

    async fn enhance_analysis(
        &self,
        current: &Analysis,
        instruction: &str,
        teaser_text: &str,
    ) -> Result<Analysis>;

    async fn discover_requirements(
        &self,
        analysis_text: &str,
        approach: Option<&str>,
        method: Option<&str>,
        guidelines: &[SearchHit],
    ) -> Result<Vec<Requirement>>;

    /// Answer a question another specialist has about the deal
    async fn answer_query(&self, query: &str, analysis_text: &str) -> Result<String>;
}

#[async_trait]
pub trait ComplianceAdvisor: Send + Sync {
    async fn assess_compliance(
        &self,
        requirements: &[Requirement],
        teaser_text: &str,
        analysis_text: &str,
        guidelines: &[SearchHit],
    ) -> Result<(String, Vec<ComplianceCheck>)>;
}

#[async_trait]
pub trait Writer: Send + Sync {
    async fn generate_structure(
        &self,
        example_text: &str,
        approach: Option<&str>,
        method: Option<&str>,
        analysis_text: &str,
    ) -> Result<Vec<SectionDescriptor>>;

    async fn draft_section(
        &self,
        section: &SectionDescriptor,
        context: &DraftingContext<'_>,
    ) -> Result<SectionDraft>;
}

/// The three specialists one orchestrator works with
#[derive(Clone)]
pub struct Specialists {
    pub analyst: Arc<dyn Analyst>,
    pub compliance: Arc<dyn ComplianceAdvisor>,
    pub writer: Arc<dyn Writer>,
}

impl Specialists {
    /// Model-backed specialists; the writer routes its questions to the same analyst
    pub fn from_llm(llm: Arc<dyn LlmClient>, config: &OrchestratorConfig) -> Self {
        let agent_model = AgentModel::new(
            llm.clone(),
            &config.agent_model,
            config.agent_temperature,
            config.max_output_tokens,
        );
        let writer_model = AgentModel::new(
            llm,
            &config.writer_model,
            config.agent_temperature,
            config.max_output_tokens,
        );

        let analyst: Arc<dyn Analyst> = Arc::new(LlmAnalyst::new(agent_model.clone()));
        Self {
            compliance: Arc::new(LlmComplianceAdvisor::new(agent_model)),
            writer: Arc::new(LlmWriter::new(writer_model, analyst.clone())),
            analyst,
        }
    }

    pub fn mock() -> Self {
        Self {
            analyst: Arc::new(MockAnalyst::default()),
            compliance: Arc::new(MockComplianceAdvisor::default()),
            writer: Arc::new(MockWriter::default()),
        }
    }
}

//
// ========== Mock specialists ==========
//
// Deterministic stand-ins that keep the workflow runnable without a model.
// `failing()` variants return `AgentError` from every call.

fn mock_failure<T>(agent: &str) -> Result<T> {
    Err(crate::error::OrchestrationError::AgentError(format!(
        "{} unavailable",
        agent
    )))
}

#[derive(Default)]
pub struct MockAnalyst {
    fail: bool,
}

impl MockAnalyst {
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl Analyst for MockAnalyst {
    async fn analyze(&self, teaser_text: &str) -> Result<Analysis> {
        if self.fail {
            return mock_failure("analyst");
        }
        let headline = teaser_text.lines().next().unwrap_or_default();
        Ok(Analysis {
            text: format!("Deal analysis: {}", headline),
            approach: Some("Full credit assessment".to_string()),
            method: Some("New facility".to_string()),
            thinking: vec!["Read teaser".to_string()],
        })
    }

    async fn enhance_analysis(
        &self,
        current: &Analysis,
        instruction: &str,
        _teaser_text: &str,
    ) -> Result<Analysis> {
        if self.fail {
            return mock_failure("analyst");
        }
        let mut enhanced = current.clone();
        enhanced.text = format!("{}\n\nRevised: {}", current.text, instruction);
        Ok(enhanced)
    }

    async fn discover_requirements(
        &self,
        _analysis_text: &str,
        _approach: Option<&str>,
        _method: Option<&str>,
        guidelines: &[SearchHit],
    ) -> Result<Vec<Requirement>> {
        if self.fail {
            return mock_failure("analyst");
        }
        let mut requirements = vec![
            Requirement::new("borrower", "Borrower name").with_value("Acme Logistics GmbH"),
            Requirement::new("facility_amount", "Facility amount"),
            Requirement::new("tenor", "Tenor"),
        ];
        if let Some(hit) = guidelines.first() {
            requirements[1].source = Some(hit.title.clone());
        }
        Ok(requirements)
    }

    async fn answer_query(&self, query: &str, _analysis_text: &str) -> Result<String> {
        if self.fail {
            return mock_failure("analyst");
        }
        Ok(format!("Answer to: {}", query))
    }
}

#[derive(Default)]
pub struct MockComplianceAdvisor {
    fail: bool,
}

impl MockComplianceAdvisor {
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl ComplianceAdvisor for MockComplianceAdvisor {
    async fn assess_compliance(
        &self,
        requirements: &[Requirement],
        _teaser_text: &str,
        _analysis_text: &str,
        guidelines: &[SearchHit],
    ) -> Result<(String, Vec<ComplianceCheck>)> {
        if self.fail {
            return mock_failure("compliance advisor");
        }
        let filled = requirements.iter().filter(|r| r.is_filled()).count();
        let text = format!(
            "Compliance assessment over {} requirement(s), {} filled, {} guideline excerpt(s).",
            requirements.len(),
            filled,
            guidelines.len()
        );
        let checks = vec![ComplianceCheck {
            criterion: "Data completeness".to_string(),
            status: if filled == requirements.len() {
                crate::models::CheckStatus::Pass
            } else {
                crate::models::CheckStatus::Review
            },
            evidence: format!("{}/{} requirements filled", filled, requirements.len()),
            reference: None,
        }];
        Ok((text, checks))
    }
}

/// Writer that echoes its inputs so tests can see what it was given
#[derive(Default)]
pub struct MockWriter {
    fail: bool,
    sections: Vec<String>,
    seen_contexts: Mutex<Vec<String>>,
}

impl MockWriter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Structure to return instead of the default three sections
    pub fn with_sections<I, S>(sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sections: sections.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// `previously_drafted` of every draft call, in call order
    pub fn seen_contexts(&self) -> Vec<String> {
        self.seen_contexts
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Writer for MockWriter {
    async fn generate_structure(
        &self,
        example_text: &str,
        _approach: Option<&str>,
        _method: Option<&str>,
        _analysis_text: &str,
    ) -> Result<Vec<SectionDescriptor>> {
        if self.fail {
            return mock_failure("writer");
        }
        let names: Vec<String> = if self.sections.is_empty() {
            vec![
                "Executive Summary".to_string(),
                "Borrower Profile".to_string(),
                "Risk Assessment".to_string(),
            ]
        } else {
            self.sections.clone()
        };
        let basis = if example_text.is_empty() { "standard" } else { "example" };
        Ok(names
            .into_iter()
            .map(|name| SectionDescriptor::new(name, format!("From {} layout", basis)))
            .collect())
    }

    async fn draft_section(
        &self,
        section: &SectionDescriptor,
        context: &DraftingContext<'_>,
    ) -> Result<SectionDraft> {
        if self.fail {
            return mock_failure("writer");
        }
        if let Ok(mut seen) = self.seen_contexts.lock() {
            seen.push(context.previously_drafted.clone());
        }

        let mut content = format!("Content for {}.", section.name);
        if let Some(instruction) = context.instruction {
            content.push_str(&format!(" Instruction: {}", instruction));
        }

        let mut draft = SectionDraft::new(section.name.clone(), content);
        draft.agent_queries = Some(vec![AgentQuery {
            from: "writer".to_string(),
            to: "analyst".to_string(),
            query: format!("Key facts for {}?", section.name),
            response: "See analysis".to_string(),
        }]);
        Ok(draft)
    }
}
