//! Conversation data model: messages, the conversation being built, and the welcome preamble.
//!
//! The welcome preamble is shown at the top of every fresh view and every transcript, but it is
//! never part of a [`Conversation`], so it is never sent to the remote application.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Greeting rendered above every conversation.
pub const WELCOME_MESSAGE: &str = "<b>I'm your tech and finance assistant</b>, happy to answer your questions!<br>\
Type <code>/reset</code> to clear the conversation and start a new session.<br>\
Past conversations are listed under \"History\" on the left.";

/// Shown for `/help`.
pub const HELP_MESSAGE: &str = "Available commands:\n\n/reset - save this conversation and start a new one\n/new - same as /reset\n/help - show this help message";

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message: plain text for the user, HTML-ish text for the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The live conversation: real messages, the remote continuation token, and the transcript file
/// it is saved to (once one has been allocated).
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub messages: Vec<Message>,
    /// Opaque session id returned by the remote application; echoed on the next call.
    pub session_id: Option<String>,
    /// File name (not path) inside the transcript directory.
    pub transcript_file: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Drop messages, token, and file binding.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.session_id = None;
        self.transcript_file = None;
    }

    /// Keep the token when the remote side sent a non-empty one.
    pub fn update_session_id(&mut self, session_id: Option<&str>) {
        if let Some(id) = session_id.map(str::trim).filter(|s| !s.is_empty()) {
            self.session_id = Some(id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
        let m: Message = serde_json::from_str(r#"{"role":"user","content":"q"}"#).unwrap();
        assert_eq!(m, Message::user("q"));
    }

    #[test]
    fn session_id_only_replaced_by_non_empty() {
        let mut c = Conversation::new();
        c.update_session_id(Some("abc"));
        c.update_session_id(None);
        c.update_session_id(Some("  "));
        assert_eq!(c.session_id.as_deref(), Some("abc"));
        c.update_session_id(Some("def"));
        assert_eq!(c.session_id.as_deref(), Some("def"));
    }

    #[test]
    fn clear_resets_everything() {
        let mut c = Conversation::new();
        c.push(Message::user("x"));
        c.session_id = Some("s".into());
        c.transcript_file = Some("chat_20240101000000.html".into());
        c.clear();
        assert!(c.is_empty());
        assert!(c.session_id.is_none());
        assert!(c.transcript_file.is_none());
    }
}
