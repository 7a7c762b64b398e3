use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

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

/// Where a message sits among the children of its parent.
///
/// Only user messages branch. An assistant reply is always the single default
/// continuation of the user message that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSlot {
    UserBranch(u32),
    AssistantReply,
}

impl BranchSlot {
    /// Effective 1-based position among peers.
    pub fn number(&self) -> u32 {
        match self {
            BranchSlot::UserBranch(n) => *n,
            BranchSlot::AssistantReply => 1,
        }
    }

    /// Whether the path continues through this node when descending.
    pub fn is_default(&self) -> bool {
        matches!(self, BranchSlot::AssistantReply | BranchSlot::UserBranch(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Parent message id, or the room id for root-level messages.
    #[serde(default)]
    pub parent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_num: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(parent_id: impl Into<String>, content: impl Into<String>, branch_num: u32) -> Self {
        Self {
            id: new_message_id(),
            role: Role::User,
            content: content.into(),
            reasoning: None,
            parent_id: parent_id.into(),
            branch_num: Some(branch_num),
            model_name: None,
            created_at: Utc::now(),
        }
    }

    /// An empty assistant reply waiting to be filled by the stream assembler.
    pub fn pending_reply(parent_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::Assistant,
            content: String::new(),
            reasoning: None,
            parent_id: parent_id.into(),
            branch_num: None,
            model_name: Some(model_name.into()),
            created_at: Utc::now(),
        }
    }

    pub fn slot(&self) -> BranchSlot {
        match self.role {
            Role::Assistant => BranchSlot::AssistantReply,
            Role::User => BranchSlot::UserBranch(self.branch_num.unwrap_or(1)),
        }
    }
}

/// Time-ordered identifier for messages and rooms.
pub fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}
