use serde::{Deserialize, Serialize};

use crate::config::FALLBACK_MODEL_ID;

use super::llm_model::LlmModel;
use super::message::{new_message_id, Message};

/// One independent conversation bound to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    /// Older blobs omit the model when the catalog had not loaded yet.
    #[serde(default = "fallback_model")]
    pub model: LlmModel,
    /// Every message of the room in creation order, not tree order.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Room {
    pub fn new(name: impl Into<String>, model: LlmModel) -> Self {
        Self {
            id: new_message_id(),
            name: name.into(),
            model,
            messages: Vec::new(),
        }
    }
}

fn fallback_model() -> LlmModel {
    LlmModel::bare(FALLBACK_MODEL_ID)
}
