//! Intent handlers
//!
//! Each handler checks its own prerequisite and returns a `HandlerResult`.
//! Prerequisite failures are `Precondition` errors with a suggestion for the
//! step to do first; collaborator failures are wrapped as `Collaborator`.

use super::Orchestrator;
use crate::classifier::Intent;
use crate::error::OrchestrationError;
use crate::llm::LlmRequest;
use crate::models::{
    ActionTag, AgentQuery, CheckStatus, ExampleUsage, SearchRecord, SectionDescriptor,
};
use crate::search::SearchHit;
use crate::specialists::DraftingContext;
use thiserror::Error;
use tracing::{debug, info, warn};

const GENERAL_SYSTEM: &str = "You are a credit pack assistant helping a banker prepare a \
credit application. Answer concisely and point to the next workflow step when useful.";

/// What a handler produced on success
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub response: String,
    pub reasoning: Option<String>,
    pub action: Option<ActionTag>,
    pub requires_approval: bool,
    pub next_suggestion: Option<String>,
    pub agent_communication: Option<Vec<AgentQuery>>,
}

impl HandlerOutcome {
    pub fn new(response: impl Into<String>, action: ActionTag) -> Self {
        Self {
            response: response.into(),
            action: Some(action),
            ..Self::default()
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.next_suggestion = Some(suggestion.into());
        self
    }

    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    /// A workflow step that must come first has not been done
    #[error("{message}")]
    Precondition { message: String, suggestion: String },

    #[error(transparent)]
    Collaborator(#[from] OrchestrationError),
}

pub type HandlerResult = std::result::Result<HandlerOutcome, HandlerError>;

impl HandlerError {
    fn precondition(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        HandlerError::Precondition {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Error result the user sees, with a note in the thinking log
    pub fn into_outcome(self, intent: Intent, thinking: &mut Vec<String>) -> HandlerOutcome {
        match self {
            HandlerError::Precondition { message, suggestion } => {
                thinking.push(format!("⚠️ Precondition not met: {}", message));
                HandlerOutcome {
                    response: format!("⚠️ {}", message),
                    next_suggestion: Some(suggestion),
                    ..HandlerOutcome::default()
                }
            }
            HandlerError::Collaborator(e) => {
                thinking.push(format!("⚠️ {} failed: {}", intent.step_label(), e));
                HandlerOutcome {
                    response: format!("❌ {} failed: {}", intent.step_label(), e),
                    next_suggestion: Some(
                        "Try again, or replay an earlier step from the process log.".to_string(),
                    ),
                    ..HandlerOutcome::default()
                }
            }
        }
    }
}

fn needs_teaser() -> HandlerError {
    HandlerError::precondition(
        "No deal teaser has been uploaded yet.",
        "Upload the deal teaser first, then ask me to analyze the deal.",
    )
}

fn needs_analysis() -> HandlerError {
    HandlerError::precondition(
        "The deal has not been analyzed yet.",
        "Analyze the deal first (e.g. \"analyze the teaser\").",
    )
}

fn needs_requirements() -> HandlerError {
    HandlerError::precondition(
        "No requirements have been discovered yet.",
        "Discover requirements first (e.g. \"discover requirements\").",
    )
}

fn needs_structure() -> HandlerError {
    HandlerError::precondition(
        "There is no document structure to draft from yet.",
        "Generate structure first (e.g. \"generate structure\"), then draft section by section.",
    )
}

impl Orchestrator {
    // =============================
    // Analysis
    // =============================

    pub(super) async fn analyze_deal(&mut self, thinking: &mut Vec<String>) -> HandlerResult {
        let wf = &self.store.workflow;
        if !wf.has_teaser() {
            return Err(needs_teaser());
        }

        thinking.push("🔍 Analyst reading the teaser".to_string());
        let analysis = self.specialists.analyst.analyze(&wf.teaser_text).await?;
        thinking.extend(analysis.thinking.iter().cloned());

        let mut response = analysis.text.clone();
        response.push_str(&format!(
            "\n\n**Approach:** {}\n**Method:** {}",
            analysis.approach.as_deref().unwrap_or("not determined"),
            analysis.method.as_deref().unwrap_or("not determined")
        ));

        if let Some(filename) = self.store.workflow.teaser_filename.clone() {
            self.store.mark_analyzed(&filename);
        }
        self.store.workflow.analysis = Some(analysis);
        info!("Deal analyzed");

        Ok(HandlerOutcome::new(response, ActionTag::Analyzed)
            .with_reasoning("Teaser analyzed to settle the assessment approach and method")
            .with_suggestion("If the analysis looks right, ask me to discover requirements.")
            .requiring_approval())
    }

    pub(super) async fn enhance_analysis(
        &mut self,
        message: &str,
        thinking: &mut Vec<String>,
    ) -> HandlerResult {
        let wf = &self.store.workflow;
        let current = wf.analysis.as_ref().ok_or_else(needs_analysis)?;

        thinking.push("✏️ Analyst revising the analysis".to_string());
        let enhanced = self
            .specialists
            .analyst
            .enhance_analysis(current, message, &wf.teaser_text)
            .await?;
        thinking.extend(enhanced.thinking.iter().cloned());

        let response = enhanced.text.clone();
        self.store.workflow.analysis = Some(enhanced);

        Ok(HandlerOutcome::new(response, ActionTag::AnalysisEnhanced)
            .with_suggestion("Discover requirements when you are happy with the analysis.")
            .requiring_approval())
    }

    // =============================
    // Requirements
    // =============================

    pub(super) async fn discover_requirements(&mut self, thinking: &mut Vec<String>) -> HandlerResult {
        let analysis = self
            .store
            .workflow
            .analysis
            .clone()
            .ok_or_else(needs_analysis)?;

        let query = format!(
            "credit pack requirements {} {}",
            analysis.approach.as_deref().unwrap_or_default(),
            analysis.method.as_deref().unwrap_or_default()
        );
        let (guidelines, notice) = self
            .search_guidelines(query.trim(), "requirements discovery", thinking)
            .await;

        thinking.push("📋 Analyst listing required data points".to_string());
        let requirements = self
            .specialists
            .analyst
            .discover_requirements(
                &analysis.text,
                analysis.approach.as_deref(),
                analysis.method.as_deref(),
                &guidelines,
            )
            .await?;

        let filled = requirements.iter().filter(|r| r.is_filled()).count();
        let mut response = format!(
            "### Requirements\n\n{} data point(s) identified, {} already filled from the analysis.\n\n",
            requirements.len(),
            filled
        );
        for requirement in &requirements {
            let (mark, value) = if requirement.is_filled() {
                ("✅", requirement.value())
            } else {
                ("⬜", "missing")
            };
            response.push_str(&format!("- {} **{}**: {}\n", mark, requirement.name, value));
        }
        if let Some(notice) = notice {
            response.push_str(&notice);
        }

        let suggestion = if filled < requirements.len() {
            "Provide missing values as `name: value` lines, or check compliance."
        } else {
            "All requirements are filled. Ask me to check compliance."
        };

        info!(count = requirements.len(), filled, "Requirements discovered");
        self.store.workflow.requirements = requirements;

        Ok(HandlerOutcome::new(response, ActionTag::RequirementsDiscovered).with_suggestion(suggestion))
    }

    /// Fill requirements from `name: value` lines; anything else becomes a comment
    pub(super) fn provide_data(&mut self, message: &str, thinking: &mut Vec<String>) -> HandlerResult {
        let wf = &mut self.store.workflow;
        if wf.requirements.is_empty() {
            return Err(needs_requirements());
        }

        let mut updated = Vec::new();
        let mut unmatched = Vec::new();

        for line in message.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let assignment = line
                .split_once(':')
                .or_else(|| line.split_once('='))
                .map(|(key, value)| (key.trim().trim_start_matches(['-', '*', ' ']), value.trim()))
                .filter(|(_, value)| !value.is_empty());

            let matched = assignment.and_then(|(key, value)| {
                let requirement = wf.requirements.iter_mut().find(|r| r.matches(key))?;
                requirement.set_value(value);
                Some(requirement.name.clone())
            });

            match matched {
                Some(name) => updated.push(name),
                None => unmatched.push(line),
            }
        }

        if !unmatched.is_empty() {
            wf.user_comments.push(unmatched.join("\n"));
        }

        let remaining = wf.requirements.iter().filter(|r| !r.is_filled()).count();
        thinking.push(format!(
            "📝 {} requirement(s) updated, {} still missing",
            updated.len(),
            remaining
        ));
        debug!(updated = updated.len(), remaining, "Data provided");

        let mut response = if updated.is_empty() {
            "No requirement names matched, so I kept your message as a comment for the writer."
                .to_string()
        } else {
            format!("Updated: {}.", updated.join(", "))
        };
        if !updated.is_empty() && !unmatched.is_empty() {
            response.push_str(" The rest is kept as a comment for the writer.");
        }
        response.push_str(&format!("\n\n{} requirement(s) still missing.", remaining));

        let suggestion = if remaining == 0 {
            "All requirements are filled. Ask me to check compliance."
        } else {
            "Provide the remaining values, or check compliance with what we have."
        };

        Ok(HandlerOutcome::new(response, ActionTag::DataProvided).with_suggestion(suggestion))
    }

    // =============================
    // Compliance
    // =============================

    pub(super) async fn check_compliance(&mut self, thinking: &mut Vec<String>) -> HandlerResult {
        if self.store.workflow.requirements.is_empty() {
            return Err(needs_requirements());
        }

        let query = match &self.store.workflow.analysis {
            Some(analysis) => format!(
                "credit compliance guidelines {}",
                analysis.approach.as_deref().unwrap_or_default()
            ),
            None => "credit compliance guidelines".to_string(),
        };
        let (guidelines, notice) = self
            .search_guidelines(query.trim(), "compliance check", thinking)
            .await;

        thinking.push("⚖️ Compliance advisor assessing the deal".to_string());
        let wf = &self.store.workflow;
        let analysis_text = wf.analysis.as_ref().map(|a| a.text.as_str()).unwrap_or_default();
        let (assessment, checks) = self
            .specialists
            .compliance
            .assess_compliance(&wf.requirements, &wf.teaser_text, analysis_text, &guidelines)
            .await?;

        let mut response = format!("### Compliance assessment\n\n{}", assessment);
        if !checks.is_empty() {
            response.push_str("\n\n| Criterion | Status | Evidence |\n|---|---|---|\n");
            for check in &checks {
                response.push_str(&format!(
                    "| {} | {} | {} |\n",
                    check.criterion, check.status, check.evidence
                ));
            }
        }
        if let Some(notice) = notice {
            response.push_str(&notice);
        }

        let failed = checks.iter().filter(|c| c.status == CheckStatus::Fail).count();
        info!(checks = checks.len(), failed, "Compliance checked");

        self.store.workflow.compliance_result = assessment;
        self.store.workflow.compliance_checks = checks;

        let suggestion = if failed > 0 {
            "Resolve the failed checks, or generate structure and address them in the pack."
        } else {
            "Ask me to generate the document structure next."
        };

        Ok(HandlerOutcome::new(response, ActionTag::ComplianceChecked).with_suggestion(suggestion))
    }

    // =============================
    // Document
    // =============================

    pub(super) async fn generate_structure(&mut self, thinking: &mut Vec<String>) -> HandlerResult {
        let wf = &self.store.workflow;
        let analysis = wf.analysis.as_ref().ok_or_else(needs_analysis)?;

        let example_used = match (&wf.example_filename, wf.has_example()) {
            (Some(filename), true) => {
                thinking.push(format!("📄 Following the layout of {}", filename));
                Some(ExampleUsage {
                    filename: filename.clone(),
                    purpose: "section structure".to_string(),
                })
            }
            _ => {
                thinking.push("📄 No example uploaded, using a standard layout".to_string());
                None
            }
        };

        let structure = self
            .specialists
            .writer
            .generate_structure(
                &wf.example_text,
                analysis.approach.as_deref(),
                analysis.method.as_deref(),
                &analysis.text,
            )
            .await?;

        let structure = with_unique_names(structure);
        let mut response = String::from("### Proposed structure\n\n");
        for (i, section) in structure.iter().enumerate() {
            response.push_str(&format!("{}. **{}**", i + 1, section.name));
            if !section.description.is_empty() {
                response.push_str(&format!(": {}", section.description));
            }
            response.push('\n');
        }

        let suggestion = structure
            .first()
            .map(|s| format!("Approve the structure and say \"draft\" to write {}.", s.name))
            .unwrap_or_default();

        info!(sections = structure.len(), "Structure generated");
        let wf = &mut self.store.workflow;
        if let Some(usage) = example_used {
            wf.examples_used.push(usage);
        }
        wf.structure = structure;
        wf.drafts.clear();
        wf.current_section_index = 0;

        Ok(HandlerOutcome::new(response, ActionTag::StructureGenerated)
            .with_suggestion(suggestion)
            .requiring_approval())
    }

    /// Draft the section `target` resolves to
    pub(super) async fn draft_section(
        &mut self,
        message: &str,
        target: DraftTarget,
        thinking: &mut Vec<String>,
    ) -> HandlerResult {
        let wf = &self.store.workflow;
        if wf.structure.is_empty() {
            return Err(needs_structure());
        }

        let chosen = match target {
            DraftTarget::FromMessage => {
                requested_redraft(message, &wf.structure, |name| wf.drafts.contains_key(name))
                    .or_else(|| wf.next_undrafted())
            }
            DraftTarget::Next => wf.next_undrafted(),
            DraftTarget::Section(index) => wf.structure.get(index).map(|section| (index, section)),
        };
        let (index, section) = match chosen {
            Some((index, section)) => (index, section.clone()),
            None => {
                thinking.push("✅ Every section already has a draft".to_string());
                return Ok(HandlerOutcome::new(
                    format!(
                        "Drafting complete: all {} sections are drafted. Ask to rewrite a section by name.",
                        wf.structure.len()
                    ),
                    ActionTag::DraftingComplete,
                )
                .with_suggestion("Review the pack, or replay any step from the process log to revise it."));
            }
        };
        let is_redraft = wf.drafts.contains_key(&section.name);

        thinking.push(format!(
            "✍️ Writer {} section {} of {}: {}",
            if is_redraft { "re-drafting" } else { "drafting" },
            index + 1,
            wf.structure.len(),
            section.name
        ));

        let previously_drafted = wf.structure[..index]
            .iter()
            .filter_map(|s| wf.drafts.get(&s.name))
            .map(|d| format!("## {}\n{}", d.name, d.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let instruction = Some(message.trim()).filter(|m| !m.is_empty());
        let context = DraftingContext {
            teaser_text: &wf.teaser_text,
            analysis_text: wf.analysis.as_ref().map(|a| a.text.as_str()).unwrap_or_default(),
            requirements: &wf.requirements,
            compliance_result: &wf.compliance_result,
            previously_drafted,
            user_comments: &wf.user_comments,
            instruction,
        };

        let draft = self.specialists.writer.draft_section(&section, &context).await?;

        let mut response = format!("## {}\n\n{}", section.name, draft.content);
        if let Some(missing) = draft.missing_items.as_ref().filter(|m| !m.is_empty()) {
            response.push_str("\n\n**Missing information:**\n");
            for item in missing {
                response.push_str(&format!("- {}\n", item));
            }
        }
        let agent_communication = draft.agent_queries.clone();

        let wf = &mut self.store.workflow;
        wf.drafts.insert(section.name.clone(), draft);
        // Skip past every section that now has a draft
        while wf
            .next_undrafted()
            .is_some_and(|(_, next)| wf.drafts.contains_key(&next.name))
        {
            wf.current_section_index += 1;
        }
        info!(section = %section.name, index, redraft = is_redraft, "Section drafted");

        let suggestion = match wf.next_undrafted() {
            Some((_, next)) => format!("Say \"draft\" to write {} next.", next.name),
            None => "All sections are drafted. Review the pack or ask to rewrite a section.".to_string(),
        };

        let mut outcome = HandlerOutcome::new(response, ActionTag::SectionDrafted).with_suggestion(suggestion);
        outcome.agent_communication = agent_communication;
        Ok(outcome)
    }

    // =============================
    // Conversation
    // =============================

    pub(super) async fn answer_general(
        &mut self,
        message: &str,
        thinking: &mut Vec<String>,
    ) -> HandlerResult {
        let prompt = format!(
            "CURRENT STATE:\n{}\n\nRECENT CONVERSATION:\n{}\n\nUSER: {}",
            self.store.state_summary(),
            self.conversation
                .format_recent(self.config.classifier_history_turns),
            message
        );
        let request = LlmRequest::new(prompt, &self.config.agent_model)
            .with_system(GENERAL_SYSTEM)
            .with_temperature(self.config.agent_temperature)
            .with_max_tokens(self.config.max_output_tokens);

        let reply = self.llm.call(&request).await?;
        thinking.extend(reply.thinking);

        Ok(HandlerOutcome::new(reply.text.trim(), ActionTag::Answered))
    }

    pub(super) fn show_state(&self) -> HandlerOutcome {
        let wf = &self.store.workflow;
        let mut response = format!("### Current state\n\n{}", self.store.state_summary());

        if !wf.structure.is_empty() {
            response.push_str("\n\n");
            for (i, section) in wf.structure.iter().enumerate() {
                let mark = if wf.drafts.contains_key(&section.name) { "✅" } else { "⬜" };
                response.push_str(&format!("{} {}. {}\n", mark, i + 1, section.name));
            }
        }

        HandlerOutcome::new(response, ActionTag::StateShown)
    }

    pub(super) fn show_log(&self) -> HandlerOutcome {
        HandlerOutcome::new(self.history.render(), ActionTag::LogShown)
            .with_suggestion("Replay any step by its number to re-run it with a new instruction.")
    }

    // =============================
    // Search
    // =============================

    /// Run a guideline search and record it.
    ///
    /// Failures never abort the turn: the hits are empty and a data-sources
    /// notice comes back for the response.
    async fn search_guidelines(
        &mut self,
        query: &str,
        purpose: &str,
        thinking: &mut Vec<String>,
    ) -> (Vec<SearchHit>, Option<String>) {
        let outcome = self
            .search
            .search(query, self.config.search_num_results)
            .await;

        self.store.workflow.rag_searches.push(SearchRecord {
            query: query.to_string(),
            purpose: purpose.to_string(),
            status: outcome.status,
            result_count: outcome.results.len(),
            error: outcome.error.clone(),
        });

        if outcome.is_ok() {
            thinking.push(format!("🔎 {} guideline excerpt(s) for {}", outcome.results.len(), purpose));
            return (outcome.results, None);
        }

        let reason = outcome
            .error
            .unwrap_or_else(|| OrchestrationError::SearchError("unknown failure".into()).to_string());
        warn!(query, purpose, error = %reason, "Guideline search failed, continuing without it");
        thinking.push(format!("⚠️ Guideline search failed ({}), continuing without it", reason));

        let notice = format!(
            "\n\n---\n_Data sources: the guideline search was unavailable ({}), so this {} does not cite procedure documents._",
            reason, purpose
        );
        (Vec::new(), Some(notice))
    }
}

/// Which section a draft turn writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DraftTarget {
    /// An explicitly requested re-draft, otherwise the next undrafted section
    FromMessage,
    /// The next undrafted section, whatever the message mentions
    Next,
    /// The section at this structure index
    Section(usize),
}

const REDRAFT_VERBS: [&str; 6] = ["redraft", "re-draft", "rewrite", "re-write", "redo", "revise"];

/// The drafted section a message asks to rewrite.
///
/// Only names that follow a rewrite verb count, so a message that merely
/// refers to an earlier section still drafts the next one.
fn requested_redraft<'a>(
    message: &str,
    structure: &'a [SectionDescriptor],
    is_drafted: impl Fn(&str) -> bool,
) -> Option<(usize, &'a SectionDescriptor)> {
    let lowered = message.to_lowercase();
    let verb_end = REDRAFT_VERBS
        .iter()
        .filter_map(|verb| lowered.find(verb).map(|at| at + verb.len()))
        .min()?;
    let rest = &lowered[verb_end..];

    structure
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.name.trim().is_empty() && is_drafted(&s.name))
        .filter_map(|(i, s)| rest.find(&s.name.to_lowercase()).map(|at| (at, i, s)))
        .min_by_key(|(at, _, s)| (*at, std::cmp::Reverse(s.name.len())))
        .map(|(_, i, s)| (i, s))
}

/// Drafts are keyed by section name, so repeated names get a numeric suffix
fn with_unique_names(mut structure: Vec<SectionDescriptor>) -> Vec<SectionDescriptor> {
    let mut seen = std::collections::HashSet::new();
    for section in structure.iter_mut() {
        let base = section.name.trim().to_string();
        let mut name = base.clone();
        let mut n = 2;
        while !seen.insert(name.to_lowercase()) {
            name = format!("{} ({})", base, n);
            n += 1;
        }
        section.name = name;
    }
    structure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::llm::ScriptedLlm;
    use crate::models::{Analysis, Requirement};
    use crate::search::{SearchOutcome, StaticSearch};
    use crate::specialists::Specialists;
    use std::sync::Arc;

    fn orchestrator(llm: ScriptedLlm) -> Orchestrator {
        Orchestrator::new(
            Arc::new(llm),
            Specialists::mock(),
            Arc::new(StaticSearch::new(SearchOutcome::ok(vec![]))),
            OrchestratorConfig::default(),
        )
    }

    fn with_requirements() -> Orchestrator {
        let mut o = orchestrator(ScriptedLlm::new(Vec::<String>::new()));
        o.store.workflow.requirements = vec![
            Requirement::new("facility_amount", "Facility amount"),
            Requirement::new("tenor", "Tenor"),
        ];
        o
    }

    #[test]
    fn test_provide_data_fills_by_id_or_name() {
        let mut o = with_requirements();
        let mut thinking = Vec::new();

        let outcome = o
            .provide_data("Facility Amount: EUR 25m\n- TENOR = 5 years", &mut thinking)
            .unwrap();

        assert!(o.store.workflow.requirements.iter().all(|r| r.is_filled()));
        assert_eq!(o.store.workflow.requirements[1].value(), "5 years");
        assert!(outcome.response.contains("0 requirement(s) still missing"));
        assert!(o.store.workflow.user_comments.is_empty());
    }

    #[test]
    fn test_provide_data_keeps_unmatched_text_as_comment() {
        let mut o = with_requirements();
        let mut thinking = Vec::new();

        let outcome = o
            .provide_data("The sponsor is committed to an equity cure.\ntenor: 7y", &mut thinking)
            .unwrap();

        assert!(outcome.response.starts_with("Updated: Tenor."));
        assert_eq!(
            o.store.workflow.user_comments,
            vec!["The sponsor is committed to an equity cure.".to_string()]
        );
        assert!(!o.store.workflow.requirements[0].is_filled());
    }

    #[test]
    fn test_provide_data_needs_requirements() {
        let mut o = orchestrator(ScriptedLlm::new(Vec::<String>::new()));
        let err = o.provide_data("tenor: 5y", &mut Vec::new()).unwrap_err();

        match err {
            HandlerError::Precondition { suggestion, .. } => {
                assert!(suggestion.contains("Discover requirements"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_requested_redraft_prefers_longest_match() {
        let structure = vec![
            SectionDescriptor::new("Risk", ""),
            SectionDescriptor::new("Risk Assessment", ""),
            SectionDescriptor::new("Summary", ""),
        ];

        let found = requested_redraft("redo the risk assessment", &structure, |_| true);
        assert_eq!(found.map(|(i, _)| i), Some(1));

        let undrafted = requested_redraft("redo the summary", &structure, |n| n != "Summary");
        assert!(undrafted.is_none());
    }

    #[test]
    fn test_requested_redraft_needs_an_explicit_verb() {
        let structure = vec![
            SectionDescriptor::new("Executive Summary", ""),
            SectionDescriptor::new("Borrower Profile", ""),
        ];

        let mention = requested_redraft(
            "Draft the next section; build on the executive summary",
            &structure,
            |_| true,
        );
        assert!(mention.is_none());

        // The section named right after the verb wins over a later reference
        let found = requested_redraft(
            "Please rewrite the borrower profile to match the executive summary",
            &structure,
            |_| true,
        );
        assert_eq!(found.map(|(i, _)| i), Some(1));
    }

    #[test]
    fn test_duplicate_section_names_get_suffixes() {
        let structure = with_unique_names(vec![
            SectionDescriptor::new("Summary", ""),
            SectionDescriptor::new("Appendix", ""),
            SectionDescriptor::new("appendix ", ""),
            SectionDescriptor::new("Appendix", ""),
        ]);

        let names: Vec<_> = structure.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Summary", "Appendix", "appendix (2)", "Appendix (3)"]);
    }

    #[test]
    fn test_precondition_outcome_carries_suggestion() {
        let mut thinking = Vec::new();
        let outcome = needs_structure().into_outcome(Intent::DraftSection, &mut thinking);

        assert!(outcome.response.starts_with("⚠️"));
        assert!(outcome.next_suggestion.unwrap().contains("Generate structure first"));
        assert_eq!(outcome.action, None);
        assert_eq!(thinking.len(), 1);
    }

    #[tokio::test]
    async fn test_structure_records_example_usage_and_resets_drafts() {
        let mut o = orchestrator(ScriptedLlm::new(Vec::<String>::new()));
        o.store.workflow.analysis = Some(Analysis::default());
        o.store.workflow.example_text = "# Example pack".to_string();
        o.store.workflow.example_filename = Some("example_pack.md".to_string());
        o.store.workflow.current_section_index = 2;

        let outcome = o.generate_structure(&mut Vec::new()).await.unwrap();

        assert!(outcome.requires_approval);
        let wf = &o.store.workflow;
        assert_eq!(wf.current_section_index, 0);
        assert_eq!(wf.examples_used.len(), 1);
        assert_eq!(wf.examples_used[0].filename, "example_pack.md");
        assert_eq!(wf.structure[0].description, "From example layout");
    }

    #[tokio::test]
    async fn test_general_answer_sees_state_summary() {
        let llm = Arc::new(ScriptedLlm::new(["Upload a teaser to begin."]));
        let mut o = Orchestrator::new(
            llm.clone(),
            Specialists::mock(),
            Arc::new(StaticSearch::new(SearchOutcome::ok(vec![]))),
            OrchestratorConfig::default(),
        );

        let outcome = o.answer_general("what now?", &mut Vec::new()).await.unwrap();

        assert_eq!(outcome.response, "Upload a teaser to begin.");
        assert_eq!(outcome.action, Some(ActionTag::Answered));
        assert!(llm.prompts()[0].contains("Teaser: not uploaded"));
    }

    #[test]
    fn test_show_log_is_read_only() {
        let o = orchestrator(ScriptedLlm::new(Vec::<String>::new()));
        let before = o.store.snapshot();

        let outcome = tokio_test::block_on(async { o.show_log() });

        assert_eq!(outcome.response, "No steps recorded yet.");
        assert_eq!(o.store.snapshot(), before);
    }
}
