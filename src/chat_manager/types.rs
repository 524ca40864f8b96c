use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A web-search citation attached to an assistant message. `matched_text`
/// must occur in the owning message's content; citations that cannot be
/// located are dropped during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    #[serde(alias = "text")]
    pub matched_text: String,
    #[serde(default)]
    pub start_offset: usize,
    #[serde(default)]
    pub end_offset: usize,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_prompts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

impl Message {
    pub fn user(content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.to_string(),
            follow_up_prompts: None,
            citations: None,
        }
    }

    /// Empty assistant message appended before streaming begins; its content
    /// grows as deltas arrive.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            follow_up_prompts: None,
            citations: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub profile_id: String,
    pub title: String,
    pub created_at: u64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Session {
    pub fn new(profile_id: &str, title: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            profile_id: profile_id.to_string(),
            title: title.to_string(),
            created_at: now_millis().unwrap_or(0),
            messages: Vec::new(),
            is_loading: false,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnStatus {
    /// The stream ran to completion.
    Completed,
    /// The user (or a superseding send) stopped the stream; partial content
    /// was kept.
    Stopped,
    /// Transport failure or timeout; the session carries `last_error`.
    Failed,
}

/// Result of one send-message turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub session_id: String,
    pub request_id: String,
    pub status: TurnStatus,
    pub assistant_message: Message,
}
