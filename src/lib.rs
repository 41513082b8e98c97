//! Credit Pack Orchestrator
//!
//! A conversational agent that walks a banker through building a credit pack:
//! - Routes every message to one workflow intent with an LLM classifier
//! - Delegates domain work to analyst, compliance and writer specialists
//! - Keeps per-session workflow state in a single context store
//! - Records a snapshot after each state-changing step
//! - Replays any recorded step with a new instruction, discarding later steps
//!
//! TURN LOOP:
//! MESSAGE → CLASSIFY → DISPATCH → RECORD STEP → RESPOND

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod gemini;
pub mod llm;
pub mod memory;
pub mod models;
pub mod search;
pub mod specialists;
pub mod state;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use classifier::Intent;
pub use config::OrchestratorConfig;
pub use models::*;
