//! The session model: sessions, messages and their content.
//!
//! A [`Session`] value is owned by exactly one component at a time.  The registry holds the
//! at-rest copies and the reconciler holds the one that is mid-stream; neither hands out mutable
//! references, so the two mutation helpers here are the only ways a message list changes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::observability::SESSION_MUTATE_SKIPPED;

/// Role of a message author.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User role.
    User,

    /// Assistant role.
    Assistant,
}

/// One block of structured content.
///
/// Only `text` blocks are interpreted; every other field rides along untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentBlock {
    /// The block type, e.g. `text` or `image`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Text payload for `text` blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Remaining block fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

/// The content of a message, which can be either a string or an array of content blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),

    /// An array of content blocks.
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// The text of this content.  For blocks, the text blocks concatenated in order.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter(|block| block.kind == "text")
                .filter_map(|block| block.text.as_deref())
                .collect(),
        }
    }

    /// True when there is no text at all.
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl<T: AsRef<str>> From<T> for MessageContent {
    fn from(content: T) -> Self {
        MessageContent::Text(content.as_ref().to_string())
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// The role of the author.
    pub role: MessageRole,

    /// The content of the message.
    pub content: MessageContent,

    /// Provider that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,

    /// Model that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Human-friendly model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_display_name: Option<String>,

    /// When the message was written.
    #[serde(
        default,
        with = "crate::utils::time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<OffsetDateTime>,
}

impl Message {
    /// Create a new message with the given role and content.
    pub fn new(role: MessageRole, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            model_provider: None,
            model_name: None,
            model_display_name: None,
            timestamp: None,
        }
    }

    /// Create a user message stamped with the current time.
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::User, content).with_timestamp(OffsetDateTime::now_utc())
    }

    /// Create an assistant message stamped with the current time.
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Assistant, content).with_timestamp(OffsetDateTime::now_utc())
    }

    /// Create the empty assistant message a streaming response grows into.
    pub fn placeholder() -> Self {
        Self::assistant(MessageContent::default())
    }

    /// Attach model attribution.
    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.model_provider = Some(provider.into());
        self.model_name = Some(model.into());
        self
    }

    /// Attach a display name for the model.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.model_display_name = Some(display_name.into());
        self
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// True for assistant messages.
    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }
}

/// A conversation as the backend stores it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Server-assigned opaque identifier.
    pub id: String,

    /// Display title.
    pub title: String,

    /// Messages in insertion order.
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Creation time.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Last server-side update.
    #[serde(with = "crate::utils::time")]
    pub updated_at: OffsetDateTime,

    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Whether the session is pinned in the sidebar.
    #[serde(default, rename = "is_pinned")]
    pub pinned: bool,
}

impl Session {
    /// Create an empty session.  Real sessions come from the backend; this is for callers that
    /// need a value before the first round-trip and for tests.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: Map::new(),
            pinned: false,
        }
    }

    /// Returns the session with `message` appended at the end.
    pub fn append_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Applies `transform` to the content of the final message if it is an assistant message.
    ///
    /// Returns whether the transform ran.  A non-assistant (or missing) last message means two
    /// writers raced on the same slot; the guard logs it and leaves the session untouched.
    pub fn mutate_last_message<F>(&mut self, transform: F) -> bool
    where
        F: FnOnce(&mut MessageContent),
    {
        match self.messages.last_mut() {
            Some(last) if last.is_assistant() => {
                transform(&mut last.content);
                true
            }
            last => {
                SESSION_MUTATE_SKIPPED.click();
                tracing::warn!(
                    session_id = %self.id,
                    last_role = ?last.map(|m| m.role),
                    "last message is not an assistant message; mutation skipped"
                );
                false
            }
        }
    }

    /// The final message, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The number of messages in the session.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Fields a session update may change.  At least one must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUpdate {
    /// New title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// New pin state.
    #[serde(rename = "is_pinned", skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
}

impl SessionUpdate {
    /// An update that renames the session.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            pinned: None,
        }
    }

    /// An update that pins or unpins the session.
    pub fn pinned(pinned: bool) -> Self {
        Self {
            title: None,
            pinned: Some(pinned),
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.pinned.is_none()
    }
}

/// Aggregate counts over a session list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Number of sessions.
    pub total_sessions: usize,
    /// Messages across all sessions.
    pub total_messages: usize,
    /// Number of pinned sessions.
    pub pinned_sessions: usize,
    /// Messages per session, rounded to the nearest integer.
    pub average_messages: usize,
}

impl SessionStats {
    /// Compute statistics for `sessions`.
    pub fn from_sessions(sessions: &[Session]) -> Self {
        let total_sessions = sessions.len();
        let total_messages = sessions.iter().map(Session::message_count).sum();
        let pinned_sessions = sessions.iter().filter(|s| s.pinned).count();
        let average_messages = if total_sessions > 0 {
            (total_messages as f64 / total_sessions as f64).round() as usize
        } else {
            0
        };
        Self {
            total_sessions,
            total_messages,
            pinned_sessions,
            average_messages,
        }
    }
}
