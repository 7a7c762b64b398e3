use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use url::Url;

use super::models::*;
use crate::models::LlmModel;
use crate::providers::traits::{CompletionTransport, ModelCatalog};
use crate::providers::types::{
    ChatMessage, ChatRequest, ChatResponse, ChunkStream, Credits, ProviderError,
};

pub struct OpenRouterProvider {
    client: Client,
    base: Url,
}

impl OpenRouterProvider {
    pub fn new(base_url: &str) -> Result<Self, ProviderError> {
        // Url::join drops the last segment unless the base ends with '/'.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base = Url::parse(&normalized).map_err(|e| {
            ProviderError::RequestFailed(format!("Invalid base URL {}: {}", base_url, e))
        })?;
        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base
            .join(path)
            .map_err(|e| ProviderError::RequestFailed(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn build_messages(messages: &[ChatMessage]) -> Vec<OpenRouterMessage> {
        messages
            .iter()
            .map(|m| OpenRouterMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
                reasoning: None,
            })
            .collect()
    }

    fn parse_error_message(status: StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<OpenRouterErrorResponse>(body) {
            return format!("HTTP {}: {}", status.as_u16(), parsed.error.message);
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    fn retry_after(response: &Response) -> Option<u64> {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Map non-success statuses to errors, passing successful responses through.
    async fn check_status(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: Self::retry_after(&response),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        Ok(response)
    }

    async fn post_completion(&self, request: &ChatRequest, stream: bool) -> Result<Response, ProviderError> {
        let url = self.endpoint("chat/completions")?;
        let messages = Self::build_messages(&request.messages);
        let body = OpenRouterRequest {
            model: &request.model,
            messages: &messages,
            stream,
            temperature: request.temperature,
        };

        tracing::debug!(
            "POST {} model={} messages={} stream={}",
            url,
            request.model,
            messages.len(),
            stream
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        Self::check_status(response).await
    }

    /// Account balance for the settings screen.
    pub async fn credits(&self, api_key: &str) -> Result<Credits, ProviderError> {
        let response = self
            .client
            .get(self.endpoint("credits")?)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let credits: OpenRouterCredits = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse credits: {}", e)))?;

        Ok(Credits {
            total_credits: credits.data.total_credits,
            total_usage: credits.data.total_usage,
        })
    }
}

#[async_trait]
impl CompletionTransport for OpenRouterProvider {
    async fn send_message(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self.post_completion(&request, false).await?;

        let parsed: OpenRouterResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        Ok(ChatResponse {
            content: message.content.unwrap_or_default(),
            reasoning: message.reasoning.filter(|r| !r.is_empty()),
            model: parsed.model.unwrap_or(request.model),
        })
    }

    async fn stream_message(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.post_completion(&request, true).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProviderError::NetworkError(format!("Stream error: {}", e))))
            .boxed())
    }
}

#[async_trait]
impl ModelCatalog for OpenRouterProvider {
    async fn list_models(&self) -> Result<Vec<LlmModel>, ProviderError> {
        let response = self
            .client
            .get(self.endpoint("models")?)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let list: OpenRouterModelList = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse model list: {}", e)))?;

        Ok(list.data)
    }
}
