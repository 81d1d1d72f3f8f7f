use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A thread's log is a closed sum type, tagged with an explicit
/// discriminator rather than relying on structural shape. Only `Message`
/// is part of the conversation the engine sees; the rest are sidecar
/// traces allowed in the same log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    #[serde(rename = "message")]
    Message {
        role: Role,
        text: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        summary: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "file_send")]
    FileSend { path: String, timestamp: DateTime<Utc> },
    #[serde(rename = "note_share")]
    NoteShare { text: String, timestamp: DateTime<Utc> },
    #[serde(rename = "pin_change")]
    PinChange { pinned: bool, timestamp: DateTime<Utc> },
}

impl Event {
    pub fn user_message(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Event::Message {
            role: Role::User,
            text: text.into(),
            timestamp: at,
        }
    }

    pub fn assistant_message(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Event::Message {
            role: Role::Assistant,
            text: text.into(),
            timestamp: at,
        }
    }

    pub fn as_message(&self) -> Option<(Role, &str)> {
        match self {
            Event::Message { role, text, .. } => Some((*role, text.as_str())),
            _ => None,
        }
    }
}
