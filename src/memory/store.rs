//! Conversation history storage
//!
//! Bounded, in-order log of user and agent turns for one session

use crate::classifier::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Turns kept before the oldest are dropped
pub const DEFAULT_MAX_MESSAGES: usize = 200;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// A single message in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
    /// Intent the turn was routed to, if any
    pub intent: Option<Intent>,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: String, intent: Option<Intent>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content,
            intent,
        }
    }
}

/// Conversation history for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: VecDeque<ConversationMessage>,
    max_messages: usize,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_MESSAGES)
    }

    pub fn with_capacity(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// Add a message, dropping the oldest once full
    pub fn add_message(&mut self, message: ConversationMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    /// The `count` most recent messages, oldest first
    pub fn recent_messages(&self, count: usize) -> impl Iterator<Item = &ConversationMessage> {
        let skip = self.messages.len().saturating_sub(count);
        self.messages.iter().skip(skip)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Recent turns as `User: ...` / `Agent: ...` lines, each cut to 300 chars
    pub fn format_recent(&self, count: usize) -> String {
        self.recent_messages(count)
            .map(|msg| {
                let role_str = match msg.role {
                    MessageRole::User => "User",
                    MessageRole::Agent => "Agent",
                };
                let content: String = msg.content.chars().take(300).collect();
                format!("{}: {}", role_str, content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_history() {
        let mut history = ConversationHistory::new();

        history.add_message(ConversationMessage::new(
            MessageRole::User,
            "Analyze the teaser".to_string(),
            Some(Intent::AnalyzeDeal),
        ));
        history.add_message(ConversationMessage::new(
            MessageRole::Agent,
            "The borrower is a mid-cap logistics company...".to_string(),
            None,
        ));

        assert_eq!(history.message_count(), 2);
        assert_eq!(
            history.format_recent(4),
            "User: Analyze the teaser\nAgent: The borrower is a mid-cap logistics company..."
        );
    }

    #[test]
    fn test_recent_messages_are_chronological() {
        let mut history = ConversationHistory::new();
        for i in 0..6 {
            history.add_message(ConversationMessage::new(
                MessageRole::User,
                format!("Question {}", i),
                None,
            ));
        }

        let recent: Vec<_> = history.recent_messages(2).map(|m| m.content.as_str()).collect();
        assert_eq!(recent, vec!["Question 4", "Question 5"]);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut history = ConversationHistory::with_capacity(3);
        for i in 0..5 {
            history.add_message(ConversationMessage::new(
                MessageRole::User,
                format!("m{}", i),
                None,
            ));
        }

        assert_eq!(history.message_count(), 3);
        assert_eq!(history.messages().next().unwrap().content, "m2");
    }
}
