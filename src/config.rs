//! Environment-driven configuration
//!
//! Binaries call `dotenv::dotenv()` first, so a local `.env` works too.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub gemini_api_key: String,
    pub classifier_model: String,
    pub agent_model: String,
    pub writer_model: String,
    pub classifier_temperature: f32,
    pub agent_temperature: f32,
    pub max_output_tokens: u32,
    pub search_base_url: Option<String>,
    pub search_num_results: usize,
    /// How many recent conversation turns the classifier sees
    pub classifier_history_turns: usize,
    pub port: u16,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            classifier_model: DEFAULT_MODEL.to_string(),
            agent_model: DEFAULT_MODEL.to_string(),
            writer_model: DEFAULT_MODEL.to_string(),
            classifier_temperature: 0.0,
            agent_temperature: 0.3,
            max_output_tokens: 4096,
            search_base_url: None,
            search_num_results: 5,
            classifier_history_turns: 4,
            port: 8080,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            classifier_model: env::var("CLASSIFIER_MODEL").unwrap_or(defaults.classifier_model),
            agent_model: env::var("AGENT_MODEL").unwrap_or(defaults.agent_model),
            writer_model: env::var("WRITER_MODEL").unwrap_or(defaults.writer_model),
            classifier_temperature: parse_var("CLASSIFIER_TEMPERATURE", defaults.classifier_temperature)?,
            agent_temperature: parse_var("AGENT_TEMPERATURE", defaults.agent_temperature)?,
            max_output_tokens: parse_var("MAX_OUTPUT_TOKENS", defaults.max_output_tokens)?,
            search_base_url: env::var("SEARCH_API_BASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            search_num_results: parse_var("SEARCH_NUM_RESULTS", defaults.search_num_results)?,
            classifier_history_turns: parse_var(
                "CLASSIFIER_HISTORY_TURNS",
                defaults.classifier_history_turns,
            )?,
            port: match env::var("PORT").or_else(|_| env::var("API_PORT")) {
                Ok(raw) => parse_value("PORT", &raw)?,
                Err(_) => defaults.port,
            },
        })
    }

    pub fn has_api_key(&self) -> bool {
        !self.gemini_api_key.is_empty() && self.gemini_api_key != "your_gemini_api_key_here"
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        OrchestrationError::ConfigError(format!("{} has an invalid value: {:?}", name, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        let tokens: u32 = parse_value("MAX_OUTPUT_TOKENS", " 2048 ").unwrap();
        assert_eq!(tokens, 2048);

        let err = parse_value::<u16>("PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.classifier_model, DEFAULT_MODEL);
        assert!(!config.has_api_key());
        assert!(config.search_base_url.is_none());
    }
}
