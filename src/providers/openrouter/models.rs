use serde::{Deserialize, Serialize};

use crate::models::LlmModel;

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct OpenRouterRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [OpenRouterMessage],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenRouterMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing)]
    pub reasoning: Option<String>,
}

// --- Response types (non-streaming) ---

#[derive(Debug, Deserialize)]
pub struct OpenRouterResponse {
    pub choices: Vec<OpenRouterChoice>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterChoice {
    pub message: OpenRouterMessage,
}

// --- Catalog ---

#[derive(Debug, Deserialize)]
pub struct OpenRouterModelList {
    pub data: Vec<LlmModel>,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterCredits {
    pub data: OpenRouterCreditsData,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterCreditsData {
    pub total_credits: f64,
    pub total_usage: f64,
}

// --- Error types ---

#[derive(Debug, Deserialize)]
pub struct OpenRouterErrorResponse {
    pub error: OpenRouterErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct OpenRouterErrorDetail {
    pub message: String,
}
