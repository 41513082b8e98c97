//! Language-model seam
//!
//! Everything that talks to a hosted model goes through `LlmClient`,
//! so handlers and specialists can run against a scripted model in tests.

use crate::error::OrchestrationError;
use crate::Result;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask thinking-capable models to return their thought parts
    pub include_thoughts: bool,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            model: model.into(),
            temperature: 0.3,
            max_tokens: 1024,
            include_thoughts: true,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_thoughts(mut self, include_thoughts: bool) -> Self {
        self.include_thoughts = include_thoughts;
        self
    }
}

/// Models in the 2.5 family and explicit thinking variants think before
/// answering, and their thoughts count against the output budget
pub fn supports_thinking(model: &str) -> bool {
    model.contains("2.5") || model.contains("thinking")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmResponse {
    pub text: String,
    /// Reasoning parts the model chose to expose, in order
    pub thinking: Vec<String>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            thinking: Vec::new(),
        }
    }
}

/// Trait for a hosted language model
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

/// Replays canned replies in order and keeps every prompt it was sent.
///
/// `Err` entries surface as `LlmError`; an exhausted script is an error too.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(reply.into()));
        }
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(message.into()));
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }

        let next = self
            .replies
            .lock()
            .map_err(|_| OrchestrationError::LlmError("script lock poisoned".to_string()))?
            .pop_front();

        match next {
            Some(Ok(text)) => Ok(LlmResponse::text(text)),
            Some(Err(message)) => Err(OrchestrationError::LlmError(message)),
            None => Err(OrchestrationError::LlmError(
                "no scripted reply left".to_string(),
            )),
        }
    }
}

/// Strip a ```json fence (or any fence) around a model reply
pub fn strip_code_fence(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_llm_replays_in_order() {
        let llm = ScriptedLlm::new(["first", "second"]);
        llm.push_failure("quota exceeded");

        let req = LlmRequest::new("hello", "test-model");
        assert_eq!(llm.call(&req).await.unwrap().text, "first");
        assert_eq!(llm.call(&req).await.unwrap().text, "second");
        assert!(llm.call(&req).await.unwrap_err().to_string().contains("quota"));
        assert!(llm.call(&req).await.is_err());
        assert_eq!(llm.prompts().len(), 4);
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fence("  plain "), "plain");
    }
}
