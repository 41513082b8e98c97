//! Conversation memory
//!
//! Keeps the recent chat turns of a session so the classifier and the
//! general-question handler can see what was just said.

pub mod store;

pub use store::{ConversationHistory, ConversationMessage, MessageRole};
