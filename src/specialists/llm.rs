//! Model-backed specialists
//!
//! Each specialist is a prompt plus a parser around an `LlmClient`.
//! Structured replies (requirements, checks, sections) are requested as JSON
//! and parsed leniently; prose replies carry marker lines that are lifted out.

use super::{Analyst, ComplianceAdvisor, DraftingContext, Writer};
use crate::error::OrchestrationError;
use crate::llm::{strip_code_fence, LlmClient, LlmRequest, LlmResponse};
use crate::models::{
    AgentQuery, Analysis, ComplianceCheck, Requirement, SectionDescriptor, SectionDraft,
};
use crate::search::{format_hits, SearchHit};
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Model settings shared by every specialist call
#[derive(Clone)]
pub struct AgentModel {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl AgentModel {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    async fn ask(&self, system: &str, prompt: String) -> Result<LlmResponse> {
        let request = LlmRequest::new(prompt, &self.model)
            .with_system(system)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        self.llm.call(&request).await
    }
}

//
// ================= Analyst =================
//

const ANALYST_SYSTEM: &str = "You are a senior credit analyst preparing a bank credit pack. \
Be factual, cite the teaser, and say explicitly when information is missing.";

pub struct LlmAnalyst {
    model: AgentModel,
}

impl LlmAnalyst {
    pub fn new(model: AgentModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Analyst for LlmAnalyst {
    async fn analyze(&self, teaser_text: &str) -> Result<Analysis> {
        let prompt = format!(
            r#"Analyze this deal teaser for a credit pack.

TEASER:
---
{}
---

Cover borrower, facility, purpose, financials, security and key risks.
End with exactly two lines:
APPROACH: <assessment approach>
METHOD: <origination method>"#,
            teaser_text
        );

        let reply = self.model.ask(ANALYST_SYSTEM, prompt).await?;
        Ok(parse_analysis(reply, None))
    }

    async fn enhance_analysis(
        &self,
        current: &Analysis,
        instruction: &str,
        teaser_text: &str,
    ) -> Result<Analysis> {
        let prompt = format!(
            r#"Revise the deal analysis below following the user's instruction.
Return the full revised analysis, keeping the closing APPROACH:/METHOD: lines.

INSTRUCTION:
{}

CURRENT ANALYSIS:
---
{}
---

TEASER:
---
{}
---"#,
            instruction, current.text, teaser_text
        );

        let reply = self.model.ask(ANALYST_SYSTEM, prompt).await?;
        Ok(parse_analysis(reply, Some(current)))
    }

    async fn discover_requirements(
        &self,
        analysis_text: &str,
        approach: Option<&str>,
        method: Option<&str>,
        guidelines: &[SearchHit],
    ) -> Result<Vec<Requirement>> {
        let prompt = format!(
            r#"List the data points a credit pack needs for this deal.

APPROACH: {}
METHOD: {}

ANALYSIS:
---
{}
---

PROCEDURE EXCERPTS:
{}

Return ONLY a JSON array. Each item:
{{"id": "snake_case_id", "name": "Display name", "value": "value from the analysis or empty", "category": "...", "priority": "high|medium|low", "source": "where the value or need comes from"}}"#,
            approach.unwrap_or("unknown"),
            method.unwrap_or("unknown"),
            analysis_text,
            format_hits(guidelines),
        );

        let reply = self.model.ask(ANALYST_SYSTEM, prompt).await?;
        let requirements: Vec<Requirement> = parse_json_list(&reply.text, "requirements")?;
        debug!(count = requirements.len(), "Requirements parsed");
        Ok(requirements)
    }

    async fn answer_query(&self, query: &str, analysis_text: &str) -> Result<String> {
        let prompt = format!(
            "A colleague drafting the credit pack asks:\n{}\n\nAnswer briefly from this analysis only:\n---\n{}\n---",
            query, analysis_text
        );
        let reply = self.model.ask(ANALYST_SYSTEM, prompt).await?;
        Ok(reply.text.trim().to_string())
    }
}

fn parse_analysis(reply: LlmResponse, previous: Option<&Analysis>) -> Analysis {
    let approach = extract_field(&reply.text, "approach")
        .or_else(|| previous.and_then(|p| p.approach.clone()));
    let method = extract_field(&reply.text, "method")
        .or_else(|| previous.and_then(|p| p.method.clone()));

    Analysis {
        text: reply.text.trim().to_string(),
        approach,
        method,
        thinking: reply.thinking,
    }
}

/// Value of a `Name: value` line, tolerant of bullets and bold markers
fn extract_field(text: &str, name: &str) -> Option<String> {
    text.lines().rev().find_map(|line| {
        let cleaned = line.trim().trim_start_matches(['*', '-', '#', ' ']);
        let (key, value) = cleaned.split_once(':')?;
        if key.trim().trim_matches('*').eq_ignore_ascii_case(name) {
            let value = value.trim().trim_matches('*').trim();
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

//
// ================= Compliance advisor =================
//

const COMPLIANCE_SYSTEM: &str = "You are a credit compliance advisor. Assess deals strictly \
against the guideline excerpts provided and flag anything you cannot verify.";

pub struct LlmComplianceAdvisor {
    model: AgentModel,
}

impl LlmComplianceAdvisor {
    pub fn new(model: AgentModel) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ComplianceAdvisor for LlmComplianceAdvisor {
    async fn assess_compliance(
        &self,
        requirements: &[Requirement],
        teaser_text: &str,
        analysis_text: &str,
        guidelines: &[SearchHit],
    ) -> Result<(String, Vec<ComplianceCheck>)> {
        let requirement_lines = requirements
            .iter()
            .map(|r| {
                let value = if r.is_filled() { r.value() } else { "(missing)" };
                format!("- {}: {}", r.name, value)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"Assess this deal for compliance.

REQUIREMENTS:
{}

ANALYSIS:
---
{}
---

TEASER:
---
{}
---

GUIDELINE EXCERPTS:
{}

Write the assessment in markdown, then a ```json fenced array of checks:
[{{"criterion": "...", "status": "pass|fail|review", "evidence": "...", "reference": "guideline reference"}}]"#,
            requirement_lines,
            analysis_text,
            teaser_text,
            format_hits(guidelines),
        );

        let reply = self.model.ask(COMPLIANCE_SYSTEM, prompt).await?;
        Ok(split_assessment(&reply.text))
    }
}

/// Separate the prose assessment from its fenced JSON checks
fn split_assessment(reply: &str) -> (String, Vec<ComplianceCheck>) {
    let Some(start) = reply.find("```json") else {
        return (reply.trim().to_string(), Vec::new());
    };

    let after = &reply[start + 7..];
    let Some(end) = after.find("```") else {
        return (reply[..start].trim().to_string(), Vec::new());
    };

    let checks = serde_json::from_str::<Vec<ComplianceCheck>>(after[..end].trim())
        .unwrap_or_else(|e| {
            warn!(error = %e, "Compliance checks block did not parse");
            Vec::new()
        });

    let mut text = reply[..start].trim_end().to_string();
    let rest = after[end + 3..].trim();
    if !rest.is_empty() {
        text.push_str("\n\n");
        text.push_str(rest);
    }

    (text, checks)
}

//
// ================= Writer =================
//

const WRITER_SYSTEM: &str = "You are a credit pack writer. Write in formal banking prose, \
use only facts you were given, and never invent figures.";

pub struct LlmWriter {
    model: AgentModel,
    analyst: Arc<dyn Analyst>,
}

impl LlmWriter {
    pub fn new(model: AgentModel, analyst: Arc<dyn Analyst>) -> Self {
        Self { model, analyst }
    }

    fn draft_prompt(section: &SectionDescriptor, context: &DraftingContext<'_>) -> String {
        let facts = context
            .requirements
            .iter()
            .filter(|r| r.is_filled())
            .map(|r| format!("- {}: {}", r.name, r.value()))
            .collect::<Vec<_>>()
            .join("\n");

        let comments = if context.user_comments.is_empty() {
            "(none)".to_string()
        } else {
            context.user_comments.join("\n")
        };

        format!(
            r#"Draft the "{}" section of the credit pack.
Section guidance: {}
Detail level: {}
{}
KNOWN FACTS:
{}

ANALYSIS:
---
{}
---

COMPLIANCE:
---
{}
---

USER COMMENTS:
{}

PREVIOUSLY DRAFTED SECTIONS:
{}

Write the section body in markdown without repeating its title.
After the body you may add marker lines:
[FACT] <fact you relied on>
[MISSING] <information you needed but did not have>
[ASK_ANALYST] <question for the analyst>"#,
            section.name,
            section.description,
            section.detail_level.as_deref().unwrap_or("standard"),
            context
                .instruction
                .map(|i| format!("Additional instruction: {}\n", i))
                .unwrap_or_default(),
            if facts.is_empty() { "(none)".to_string() } else { facts },
            context.analysis_text,
            context.compliance_result,
            comments,
            if context.previously_drafted.is_empty() {
                "(none)"
            } else {
                context.previously_drafted.as_str()
            },
        )
    }
}

#[async_trait]
impl Writer for LlmWriter {
    async fn generate_structure(
        &self,
        example_text: &str,
        approach: Option<&str>,
        method: Option<&str>,
        analysis_text: &str,
    ) -> Result<Vec<SectionDescriptor>> {
        let example = if example_text.trim().is_empty() {
            "(no example provided, use a standard credit pack layout)"
        } else {
            example_text
        };

        let prompt = format!(
            r#"Propose the section structure for this credit pack.

APPROACH: {}
METHOD: {}

EXAMPLE CREDIT PACK:
---
{}
---

ANALYSIS:
---
{}
---

Return ONLY a JSON array in document order:
[{{"name": "Section name", "description": "what it covers", "detail_level": "brief|standard|detailed"}}]"#,
            approach.unwrap_or("unknown"),
            method.unwrap_or("unknown"),
            example,
            analysis_text,
        );

        let reply = self.model.ask(WRITER_SYSTEM, prompt).await?;
        let sections: Vec<SectionDescriptor> = parse_json_list(&reply.text, "structure")?;
        if sections.is_empty() {
            return Err(OrchestrationError::AgentError(
                "writer proposed an empty structure".to_string(),
            ));
        }
        Ok(sections)
    }

    async fn draft_section(
        &self,
        section: &SectionDescriptor,
        context: &DraftingContext<'_>,
    ) -> Result<SectionDraft> {
        let first = self
            .model
            .ask(WRITER_SYSTEM, Self::draft_prompt(section, context))
            .await?;
        let mut parsed = parse_draft(&first.text, &section.name);

        let mut queries = Vec::new();
        for question in std::mem::take(&mut parsed.questions) {
            let response = match self.analyst.answer_query(&question, context.analysis_text).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!(error = %e, "Analyst could not answer writer query");
                    format!("(no answer: {})", e)
                }
            };
            queries.push(AgentQuery {
                from: "writer".to_string(),
                to: "analyst".to_string(),
                query: question,
                response,
            });
        }

        if !queries.is_empty() {
            let answers = queries
                .iter()
                .map(|q| format!("Q: {}\nA: {}", q.query, q.response))
                .collect::<Vec<_>>()
                .join("\n\n");
            let revision = format!(
                "{}\n\nYOUR EARLIER DRAFT:\n---\n{}\n---\n\nTHE ANALYST ANSWERED:\n{}\n\nRevise the draft using these answers. Do not ask further questions.",
                Self::draft_prompt(section, context),
                parsed.content,
                answers
            );
            let second = self.model.ask(WRITER_SYSTEM, revision).await?;
            parsed = parse_draft(&second.text, &section.name);
        }

        Ok(SectionDraft {
            name: section.name.clone(),
            content: parsed.content,
            facts_used: non_empty(parsed.facts),
            missing_items: non_empty(parsed.missing),
            agent_queries: non_empty(queries),
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct ParsedDraft {
    content: String,
    facts: Vec<String>,
    missing: Vec<String>,
    questions: Vec<String>,
}

/// Lift marker lines out of a draft and drop a leading title that repeats the section name
fn parse_draft(reply: &str, section_name: &str) -> ParsedDraft {
    let mut parsed = ParsedDraft::default();
    let mut body = Vec::new();

    for line in reply.lines() {
        let trimmed = line.trim();
        if let Some(fact) = trimmed.strip_prefix("[FACT]") {
            parsed.facts.push(fact.trim().to_string());
        } else if let Some(missing) = trimmed.strip_prefix("[MISSING]") {
            parsed.missing.push(missing.trim().to_string());
        } else if let Some(question) = trimmed.strip_prefix("[ASK_ANALYST]") {
            parsed.questions.push(question.trim().to_string());
        } else {
            body.push(line);
        }
    }

    let first_content = body.iter().position(|l| !l.trim().is_empty());
    if let Some(i) = first_content {
        let title = body[i].trim().trim_start_matches('#').trim();
        if body[i].trim().starts_with('#') && title.eq_ignore_ascii_case(section_name) {
            body.remove(i);
        }
    }

    parsed.content = body.join("\n").trim().to_string();
    parsed
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// Parse a JSON array from a model reply: bare, fenced, or embedded in prose
fn parse_json_list<T: DeserializeOwned>(reply: &str, what: &str) -> Result<Vec<T>> {
    let candidate = serde_json::from_str::<Value>(strip_code_fence(reply))
        .ok()
        .or_else(|| {
            let start = reply.find('[')?;
            let end = reply.rfind(']')?;
            (end > start)
                .then(|| serde_json::from_str::<Value>(&reply[start..=end]).ok())
                .flatten()
        })
        .ok_or_else(|| {
            OrchestrationError::AgentError(format!("could not find a JSON {} list in reply", what))
        })?;

    // Models sometimes wrap the list in an object
    let items = if candidate.is_array() {
        candidate
    } else {
        candidate
            .get(what)
            .or_else(|| candidate.as_object()?.values().find(|v| v.is_array()))
            .cloned()
            .unwrap_or(Value::Null)
    };

    serde_json::from_value(items).map_err(|e| {
        OrchestrationError::AgentError(format!("malformed {} list: {}", what, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::specialists::MockAnalyst;

    fn model(llm: Arc<ScriptedLlm>) -> AgentModel {
        AgentModel::new(llm, "test-model", 0.2, 1024)
    }

    #[test]
    fn test_extract_field() {
        let text = "Borrower is Acme.\n\n**APPROACH:** Full credit assessment\n- Method: Renewal";
        assert_eq!(extract_field(text, "approach").as_deref(), Some("Full credit assessment"));
        assert_eq!(extract_field(text, "method").as_deref(), Some("Renewal"));
        assert_eq!(extract_field(text, "tenor"), None);
    }

    #[test]
    fn test_parse_json_list_variants() {
        let bare: Vec<SectionDescriptor> =
            parse_json_list(r#"[{"name": "Summary"}]"#, "structure").unwrap();
        assert_eq!(bare[0].name, "Summary");

        let prose: Vec<SectionDescriptor> = parse_json_list(
            "Here you go:\n```json\n[{\"name\": \"A\"}, {\"name\": \"B\"}]\n```\nThanks",
            "structure",
        )
        .unwrap();
        assert_eq!(prose.len(), 2);

        let wrapped: Vec<Requirement> = parse_json_list(
            r#"{"requirements": [{"name": "Tenor", "value": "5y"}]}"#,
            "requirements",
        )
        .unwrap();
        assert!(wrapped[0].is_filled());

        assert!(parse_json_list::<SectionDescriptor>("no json here", "structure").is_err());
    }

    #[test]
    fn test_split_assessment() {
        let reply = "Deal is broadly compliant.\n\n```json\n[{\"criterion\": \"LTV\", \"status\": \"pass\", \"evidence\": \"62%\"}]\n```";
        let (text, checks) = split_assessment(reply);
        assert_eq!(text, "Deal is broadly compliant.");
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].criterion, "LTV");

        let (text, checks) = split_assessment("No checks possible.");
        assert_eq!(text, "No checks possible.");
        assert!(checks.is_empty());
    }

    #[test]
    fn test_parse_draft_markers() {
        let reply = "## Executive Summary\n\nAcme requests EUR 25m.\n[FACT] Amount EUR 25m\n[MISSING] Audited 2023 accounts\n[ASK_ANALYST] What is the DSCR?";
        let parsed = parse_draft(reply, "Executive Summary");

        assert_eq!(parsed.content, "Acme requests EUR 25m.");
        assert_eq!(parsed.facts, vec!["Amount EUR 25m"]);
        assert_eq!(parsed.missing, vec!["Audited 2023 accounts"]);
        assert_eq!(parsed.questions, vec!["What is the DSCR?"]);
    }

    #[tokio::test]
    async fn test_analyst_parses_approach_and_method() {
        let llm = Arc::new(ScriptedLlm::new([
            "Acme Logistics seeks a EUR 25m term loan.\nAPPROACH: Full credit assessment\nMETHOD: New facility",
        ]));
        let analyst = LlmAnalyst::new(model(llm.clone()));

        let analysis = analyst.analyze("Acme teaser").await.unwrap();
        assert_eq!(analysis.approach.as_deref(), Some("Full credit assessment"));
        assert_eq!(analysis.method.as_deref(), Some("New facility"));
        assert!(llm.prompts()[0].contains("Acme teaser"));
    }

    #[tokio::test]
    async fn test_enhance_keeps_previous_approach() {
        let llm = Arc::new(ScriptedLlm::new(["Revised analysis without closing lines."]));
        let analyst = LlmAnalyst::new(model(llm));
        let current = Analysis {
            text: "old".into(),
            approach: Some("Short form".into()),
            method: Some("Renewal".into()),
            thinking: vec![],
        };

        let enhanced = analyst
            .enhance_analysis(&current, "stress the FX risk", "teaser")
            .await
            .unwrap();
        assert_eq!(enhanced.text, "Revised analysis without closing lines.");
        assert_eq!(enhanced.approach.as_deref(), Some("Short form"));
    }

    #[tokio::test]
    async fn test_writer_routes_questions_to_analyst() {
        let llm = Arc::new(ScriptedLlm::new([
            "First pass.\n[ASK_ANALYST] What is the leverage?",
            "Leverage is 3.1x per the analyst.\n[FACT] Leverage 3.1x",
        ]));
        let writer = LlmWriter::new(model(llm.clone()), Arc::new(MockAnalyst::default()));
        let section = SectionDescriptor::new("Financial Analysis", "Key ratios");
        let context = DraftingContext {
            analysis_text: "Leverage 3.1x",
            ..DraftingContext::default()
        };

        let draft = writer.draft_section(&section, &context).await.unwrap();

        assert_eq!(draft.name, "Financial Analysis");
        assert_eq!(draft.content, "Leverage is 3.1x per the analyst.");
        assert_eq!(draft.facts_used, Some(vec!["Leverage 3.1x".to_string()]));
        let queries = draft.agent_queries.unwrap();
        assert_eq!(queries[0].query, "What is the leverage?");
        assert_eq!(queries[0].response, "Answer to: What is the leverage?");
        assert!(llm.prompts()[1].contains("THE ANALYST ANSWERED"));
    }

    #[tokio::test]
    async fn test_structure_must_not_be_empty() {
        let llm = Arc::new(ScriptedLlm::new(["[]"]));
        let writer = LlmWriter::new(model(llm), Arc::new(MockAnalyst::default()));

        let err = writer.generate_structure("", None, None, "analysis").await.unwrap_err();
        assert!(err.to_string().contains("empty structure"));
    }
}
