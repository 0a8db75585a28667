//! Ollama client implementation.
//!
//! Talks to a local Ollama server over its native HTTP API: `/api/generate`
//! for completions (streamed as NDJSON), `/api/chat` for dialog, and
//! `/api/tags` for installed models. JSON-mode generation passes the schema
//! through the `format` field.

use crate::client::{ChatMessage, ChatRole, GenerationParams, LanguageModel, RawDeltaStream};
use crate::config::LlmConfig;
use crate::error::{LlmError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Client for a local Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    config: LlmConfig,
    client: Client,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::Http)?;
        Ok(Self { config, client })
    }

    fn model_for(&self, params: &GenerationParams) -> String {
        params
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone())
    }

    fn options_for(&self, params: &GenerationParams) -> Option<HashMap<&'static str, Value>> {
        let mut options = HashMap::new();
        if let Some(t) = params.temperature {
            options.insert("temperature", Value::from(t));
        }
        if let Some(p) = params.top_p {
            options.insert("top_p", Value::from(p));
        }
        if let Some(n) = params.max_tokens {
            options.insert("num_predict", Value::from(n));
        }
        if options.is_empty() {
            None
        } else {
            Some(options)
        }
    }

    async fn post_generate(&self, body: &GenerateRequest<'_>) -> Result<GenerateResponse> {
        let url = format!("{}/api/generate", self.config.base_url);
        let response = self.client.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 404 {
                return Err(LlmError::ModelNotFound(body.model.clone()));
            }
            return Err(LlmError::Provider(format!("ollama {status}: {text}")));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = GenerateRequest {
            model: self.model_for(params),
            prompt,
            stream: false,
            format: None,
            options: self.options_for(params),
        };
        Ok(self.post_generate(&body).await?.response)
    }

    async fn chat(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String> {
        let url = format!("{}/api/chat", self.config.base_url);
        let body = ChatRequest {
            model: self.model_for(params),
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: false,
            options: self.options_for(params),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!("ollama {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(parsed.message.content)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<RawDeltaStream> {
        let url = format!("{}/api/generate", self.config.base_url);
        let body = GenerateRequest {
            model: self.model_for(params),
            prompt,
            stream: true,
            format: None,
            options: self.options_for(params),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!("ollama {status}: {text}")));
        }

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut pending = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(LlmError::Http)?;
                pending.extend_from_slice(&chunk);
                // NDJSON: one JSON object per line; a chunk may carry a
                // partial line, which stays in `pending`.
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let piece: GenerateResponse = serde_json::from_str(line)
                        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                    if !piece.response.is_empty() {
                        yield piece.response;
                    }
                    if piece.done {
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn generate_json(
        &self,
        prompt: &str,
        schema: &Value,
        params: &GenerationParams,
    ) -> Result<String> {
        let body = GenerateRequest {
            model: self.model_for(params),
            prompt,
            stream: false,
            format: Some(schema.clone()),
            options: self.options_for(params),
        };
        Ok(self.post_generate(&body).await?.response)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.config.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(LlmError::ServiceUnavailable(format!(
                "ollama tags returned {}",
                response.status()
            )));
        }

        let parsed: TagsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

// Ollama API types

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: String,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<HashMap<&'static str, Value>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<HashMap<&'static str, Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for OllamaMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: match msg.role {
                ChatRole::System => "system".to_string(),
                ChatRole::User => "user".to_string(),
                ChatRole::Assistant => "assistant".to_string(),
            },
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}
