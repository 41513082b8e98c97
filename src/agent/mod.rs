//! Main orchestrator
//!
//! One orchestrator per conversation session:
//! MESSAGE → CLASSIFY → DISPATCH → RECORD STEP → RESPOND
//!
//! Replay rewinds the context store to the snapshot before a recorded step,
//! drops the later steps and re-runs that step's handler.

mod handlers;

pub use handlers::{HandlerError, HandlerOutcome, HandlerResult};

use crate::audit::{drafted_section_name, ProcessStepRecord, StepHistory};
use crate::classifier::{Intent, IntentClassifier};
use crate::config::OrchestratorConfig;
use crate::error::OrchestrationError;
use crate::gemini::GeminiClient;
use crate::llm::LlmClient;
use crate::memory::{ConversationHistory, ConversationMessage, MessageRole};
use crate::models::{OrchestratorResponse, UploadedFile};
use crate::search::{create_search_client, SearchClient};
use crate::specialists::Specialists;
use crate::state::ContextStore;
use crate::Result;
use handlers::DraftTarget;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Orchestrator {
    store: ContextStore,
    history: StepHistory,
    conversation: ConversationHistory,
    classifier: IntentClassifier,
    llm: Arc<dyn LlmClient>,
    specialists: Specialists,
    search: Arc<dyn SearchClient>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        specialists: Specialists,
        search: Arc<dyn SearchClient>,
        config: OrchestratorConfig,
    ) -> Self {
        let classifier = IntentClassifier::new(
            llm.clone(),
            &config.classifier_model,
            config.classifier_temperature,
        );

        Self {
            store: ContextStore::new(),
            history: StepHistory::new(),
            conversation: ConversationHistory::new(),
            classifier,
            llm,
            specialists,
            search,
            config,
        }
    }

    /// Gemini-backed orchestrator. Without an API key the specialists are
    /// mocks and every model call reports the missing key.
    pub fn from_config(config: OrchestratorConfig) -> Self {
        let llm: Arc<dyn LlmClient> = Arc::new(GeminiClient::new(config.gemini_api_key.clone()));
        let specialists = if config.has_api_key() {
            Specialists::from_llm(llm.clone(), &config)
        } else {
            warn!("GEMINI_API_KEY not set, using mock specialists");
            Specialists::mock()
        };
        let search = create_search_client(&config);

        Self::new(llm, specialists, search, config)
    }

    /// Handle one user turn. Never fails: problems come back as error responses.
    pub async fn process_message(
        &mut self,
        message: &str,
        uploaded_files: Vec<UploadedFile>,
    ) -> OrchestratorResponse {
        let mut thinking = Vec::new();

        for file in uploaded_files {
            let name = file.name.clone();
            let role = self.store.register_upload(file);
            thinking.push(format!("📎 {} registered as {}", name, role.as_str()));
        }

        self.store.turn_count += 1;

        let recent = self
            .conversation
            .format_recent(self.config.classifier_history_turns);
        let classification = self
            .classifier
            .classify(message, &self.store.state_summary(), &recent, &mut thinking)
            .await;
        let intent = classification.intent;

        info!(
            turn = self.store.turn_count,
            intent = %intent,
            fell_back = classification.fell_back,
            "Orchestrator: dispatching message"
        );

        let result = self.dispatch(intent, message, &mut thinking).await;
        let response = self.finish(intent, result, thinking);

        self.remember_turn(message, intent, &response);
        response
    }

    /// Rewind to just before `step_index` and run that step again.
    ///
    /// An empty instruction re-runs the step as `Re-run: <label>`.
    pub async fn replay_from_step(
        &mut self,
        step_index: usize,
        instruction: &str,
    ) -> OrchestratorResponse {
        let (phase, label) = match self.rewind_to(step_index) {
            Ok(rewound) => rewound,
            Err(e) => {
                warn!(step_index, error = %e, "Replay rejected");
                return self.replay_rejected(e);
            }
        };

        let message = match instruction.trim() {
            "" => format!("Re-run: {}", label),
            trimmed => trimmed.to_string(),
        };

        info!(step_index, phase = %phase, label = %label, "Orchestrator: replaying step");

        self.store.turn_count += 1;
        let mut thinking = vec![format!("⏪ Replaying step {} ({})", step_index, label)];

        // A replayed draft rewrites the section it wrote, not one the new instruction mentions
        let result = match phase {
            Intent::DraftSection => {
                let target = self.replayed_draft_target(&label);
                self.draft_section(&message, target, &mut thinking).await
            }
            _ => self.dispatch(phase, &message, &mut thinking).await,
        };
        let response = self.finish(phase, result, thinking);

        self.remember_turn(&message, phase, &response);
        response
    }

    fn replayed_draft_target(&self, label: &str) -> DraftTarget {
        drafted_section_name(label)
            .and_then(|name| {
                self.store
                    .workflow
                    .structure
                    .iter()
                    .position(|section| section.name == name)
            })
            .map_or(DraftTarget::Next, DraftTarget::Section)
    }

    pub fn get_step_history(&self) -> &[ProcessStepRecord] {
        self.history.records()
    }

    pub fn context(&self) -> &ContextStore {
        &self.store
    }

    pub fn conversation(&self) -> &ConversationHistory {
        &self.conversation
    }

    pub fn classifier_fallbacks(&self) -> u64 {
        self.classifier.fallback_count()
    }

    /// Restore the state a step started from and drop it and everything after.
    ///
    /// Returns the step's phase and label. Step 0 starts from a fresh store
    /// that keeps the teaser and example uploads.
    fn rewind_to(&mut self, step_index: usize) -> Result<(Intent, String)> {
        let record = self
            .history
            .get(step_index)
            .ok_or(OrchestrationError::InvalidStepIndex {
                index: step_index,
                len: self.history.len(),
            })?;
        let rewound = (record.phase, record.label.clone());

        if step_index == 0 {
            self.store.reset_preserving_uploads();
        } else if let Some(previous) = self.history.get(step_index - 1) {
            self.store.restore(&previous.context_after);
        }

        self.history.truncate(step_index);
        debug!(step_index, kept = self.history.len(), "History truncated for replay");

        Ok(rewound)
    }

    async fn dispatch(
        &mut self,
        intent: Intent,
        message: &str,
        thinking: &mut Vec<String>,
    ) -> HandlerResult {
        match intent {
            Intent::AnalyzeDeal => self.analyze_deal(thinking).await,
            Intent::EnhanceAnalysis => self.enhance_analysis(message, thinking).await,
            Intent::DiscoverRequirements => self.discover_requirements(thinking).await,
            Intent::ProvideData => self.provide_data(message, thinking),
            Intent::CheckCompliance => self.check_compliance(thinking).await,
            Intent::GenerateStructure => self.generate_structure(thinking).await,
            Intent::DraftSection => {
                self.draft_section(message, DraftTarget::FromMessage, thinking)
                    .await
            }
            Intent::General => self.answer_general(message, thinking).await,
            Intent::ShowState => Ok(self.show_state()),
            Intent::ShowLog => Ok(self.show_log()),
        }
    }

    /// Turn a handler result into the public response and record the step
    fn finish(
        &mut self,
        intent: Intent,
        result: HandlerResult,
        mut thinking: Vec<String>,
    ) -> OrchestratorResponse {
        let is_error = result.is_err();
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(intent = %intent, error = %e, "Handler returned an error result");
                e.into_outcome(intent, &mut thinking)
            }
        };

        let step_index = self
            .history
            .record(intent, &outcome.response, &thinking, &self.store);
        self.store.awaiting_approval = outcome.requires_approval && !is_error;

        OrchestratorResponse {
            intent,
            response: outcome.response,
            thinking,
            reasoning: outcome.reasoning,
            action: outcome.action,
            requires_approval: outcome.requires_approval && !is_error,
            next_suggestion: outcome.next_suggestion,
            agent_communication: outcome.agent_communication,
            sources_used: self.store.sources_used(),
            is_error,
            step_index,
        }
    }

    fn replay_rejected(&self, error: OrchestrationError) -> OrchestratorResponse {
        let suggestion = match self.history.len() {
            0 => "No steps have been recorded yet, so there is nothing to replay.".to_string(),
            len => format!("Choose a step between 0 and {}.", len - 1),
        };

        OrchestratorResponse {
            intent: Intent::ShowLog,
            response: format!("⚠️ {}", error),
            thinking: Vec::new(),
            reasoning: None,
            action: None,
            requires_approval: false,
            next_suggestion: Some(suggestion),
            agent_communication: None,
            sources_used: self.store.sources_used(),
            is_error: true,
            step_index: None,
        }
    }

    fn remember_turn(&mut self, message: &str, intent: Intent, response: &OrchestratorResponse) {
        self.conversation.add_message(ConversationMessage::new(
            MessageRole::User,
            message.to_string(),
            Some(intent),
        ));
        self.conversation.add_message(ConversationMessage::new(
            MessageRole::Agent,
            response.response.clone(),
            Some(intent),
        ));
    }
}
