//! Conversation and outbound payload types
//!
//! These are the wire shapes shared between the engine and delivery layers:
//! conversation turns (also fed to the LLM collaborator), the normalized
//! render payload handed to a transport, and the scheduler's ready
//! notification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt turn
    System,

    /// Learner turn
    User,

    /// Model turn
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of a dialog conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    /// Role of the turn's author
    pub role: Role,

    /// Content of the turn
    pub content: String,
}

impl Turn {
    /// Create a new system turn
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a new user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A score/max-score pair attached to an evaluated answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScorePair {
    pub score: f64,
    pub max_score: f64,
}

impl ScorePair {
    pub fn new(score: f64, max_score: f64) -> Self {
        Self { score, max_score }
    }

    /// Whether the answer earned the full score
    pub fn is_full(&self) -> bool {
        self.score >= self.max_score
    }
}

/// A selectable button attached to a rendered element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Button {
    /// Visible label
    pub text: String,

    /// Stable payload the transport echoes back on selection
    pub payload: String,
}

/// How the element's text should be interpreted by the transport
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParseMode {
    #[default]
    Markdown,

    /// Legacy scripts also spell this "HTML!" to force HTML on dialog turns
    #[serde(alias = "HTML!")]
    Html,
}

/// Normalized outbound payload for one rendered element
///
/// This is the whole of what a delivery layer (chat transport or HTTP API)
/// receives; the engine never addresses a transport directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedElement {
    /// Identifier of the element inside its course
    pub element_id: String,

    /// Type tag of the element ("message", "quiz", ...)
    pub element_type: String,

    /// Text to present, if any
    pub text: Option<String>,

    /// How to interpret `text`
    pub parse_mode: ParseMode,

    /// Whether the transport may render a link preview
    pub link_preview: bool,

    /// Resolved media URLs, if any
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub media: Vec<String>,

    /// Answer/continue buttons, if any
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub buttons: Vec<Button>,

    /// Whether progression pauses until the learner responds
    pub waits_for_input: bool,
}

/// Notification emitted when a waiting entry comes due
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadyNotification {
    pub chat_id: i64,
    pub course_id: String,

    /// Element to continue from; `None` resumes normal navigation
    pub target_element_id: Option<String>,
}
