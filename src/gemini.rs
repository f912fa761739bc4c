//! Gemini API client
//!
//! The generation model is an opaque text-completion collaborator behind the
//! `GenerationModel` trait. Uses a long-lived reqwest::Client for connection
//! pooling.

use crate::error::CompanionError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Trait for the external text-completion service
#[async_trait::async_trait]
pub trait GenerationModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> crate::Result<String>;
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl GenerationModel for GeminiClient {
    async fn complete(&self, prompt: &str) -> crate::Result<String> {
        if self.api_key.is_empty() {
            return Err(CompanionError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
        };

        info!("Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                CompanionError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(CompanionError::LlmError(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            CompanionError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        let answer = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| CompanionError::LlmError("Empty response from Gemini".to_string()))?;

        Ok(answer)
    }
}

/// Mock model for development & testing
/// Keeps the system functional without LLM dependency
pub struct MockModel {
    reply: String,
    extraction_reply: String,
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            reply: "Got it! Tell me more. 😊".to_string(),
            extraction_reply: "[]".to_string(),
        }
    }

    pub fn with_replies(reply: impl Into<String>, extraction_reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            extraction_reply: extraction_reply.into(),
        }
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl GenerationModel for MockModel {
    async fn complete(&self, prompt: &str) -> crate::Result<String> {
        // Extraction prompts ask for a JSON array; everything else is chat.
        if prompt.starts_with("Extract factual information") {
            Ok(self.extraction_reply.clone())
        } else {
            Ok(self.reply.clone())
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "Hello there".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
        };

        let json = serde_json::to_string(&request);
        assert!(json.is_ok());
        assert!(json.unwrap().contains("Hello there"));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = GeminiClient::new(String::new());
        let result = client.complete("hi").await;
        assert!(result.is_err());
        let error_msg = result.unwrap_err().to_string();
        assert!(error_msg.contains("GEMINI_API_KEY"));
    }

    #[tokio::test]
    async fn test_mock_model_routes_extraction_prompts() {
        let model = MockModel::with_replies("chat", r#"[{"fact": "x", "confidence": 0.9}]"#);
        let chat = model.complete("Say hi").await.unwrap();
        assert_eq!(chat, "chat");

        let extraction = model
            .complete("Extract factual information about the user from this conversation snippet.")
            .await
            .unwrap();
        assert!(extraction.starts_with('['));
    }
}
