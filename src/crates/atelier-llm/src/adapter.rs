//! The adapter layer over a [`LanguageModel`] backend.
//!
//! Adds the policies the raw client does not carry: a concurrency semaphore
//! (at most one outstanding call per physical connection), per-call
//! timeouts, retry with exponential backoff for transient failures, and
//! structured output with schema validation and manual-parse fallback.

use crate::client::{ChatMessage, GenerationParams, LanguageModel};
use crate::config::{AdapterConfig, StructuredOutputConfig};
use crate::error::{LlmError, Result};
use crate::stream::{Piece, ThinkSplitter};
use crate::structured::parse_validated;
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A classified streaming delta after `<think>` separation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    Thinking(String),
    Text(String),
    /// The stream ended inside an unterminated reasoning region.
    Interrupted,
}

/// Stream of classified deltas.
pub type SplitDeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// Policy-bearing facade used by all agents.
pub struct LlmAdapter {
    client: Arc<dyn LanguageModel>,
    semaphore: Arc<Semaphore>,
    config: AdapterConfig,
    structured: StructuredOutputConfig,
}

impl LlmAdapter {
    pub fn new(
        client: Arc<dyn LanguageModel>,
        config: AdapterConfig,
        structured: StructuredOutputConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_inflight.max(1)));
        Self {
            client,
            semaphore,
            config,
            structured,
        }
    }

    pub fn structured_config(&self) -> &StructuredOutputConfig {
        &self.structured
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(self.config.call_timeout, op()).await;
            let error = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => LlmError::Timeout(self.config.call_timeout.as_secs()),
            };
            if !error.is_retryable() || attempt >= self.config.max_retries {
                return Err(error);
            }
            let backoff = self.config.backoff_base * 2u32.pow(attempt);
            let jitter_ms = rand::thread_rng().gen_range(0..100);
            tracing::debug!(%error, attempt, "retrying LLM call after backoff");
            tokio::time::sleep(backoff + std::time::Duration::from_millis(jitter_ms)).await;
            attempt += 1;
        }
    }

    /// Single-shot completion.
    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let _permit = self.acquire().await?;
        self.with_retry(|| self.client.generate(prompt, params))
            .await
    }

    /// Dialog completion.
    pub async fn chat(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String> {
        let _permit = self.acquire().await?;
        self.with_retry(|| self.client.chat(messages, params)).await
    }

    /// Streaming completion with reasoning deltas split from answer text.
    ///
    /// The connection permit is held until the returned stream is dropped,
    /// so aborting the caller closes the slot within one read interval.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<SplitDeltaStream> {
        let permit = self.acquire().await?;
        let raw = self
            .with_retry(|| self.client.generate_stream(prompt, params))
            .await?;

        let stream = try_stream! {
            let _permit = permit;
            let mut raw = raw;
            let mut splitter = ThinkSplitter::new();
            while let Some(chunk) = raw.next().await {
                let chunk = chunk?;
                for piece in splitter.push(&chunk) {
                    yield delta_from(piece);
                }
            }
            let (tail, interrupted) = splitter.finish();
            for piece in tail {
                yield delta_from(piece);
            }
            if interrupted {
                yield StreamDelta::Interrupted;
            }
        };
        Ok(Box::pin(stream))
    }

    /// Schema-constrained generation returning the validated JSON value.
    ///
    /// Retries schema failures up to the structured-output retry budget; the
    /// final failure is a [`LlmError::StructuredOutput`].
    pub async fn generate_structured_value(
        &self,
        prompt: &str,
        schema: &Value,
        params: &GenerationParams,
    ) -> Result<Value> {
        let _permit = self.acquire().await?;
        let attempts = self.structured.max_retries + 1;
        let mut last_error = String::new();
        for attempt in 0..attempts {
            let response = match self
                .with_retry(|| self.client.generate_json(prompt, schema, params))
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_retryable() => {
                    last_error = e.to_string();
                    continue;
                }
                Err(e) => return Err(e),
            };
            match parse_validated(&response, schema) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "structured output rejected");
                    last_error = e.to_string();
                }
            }
        }
        Err(LlmError::StructuredOutput {
            attempts,
            message: last_error,
        })
    }

    /// Schema-constrained generation deserialized into `T`.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        prompt: &str,
        schema: &Value,
        params: &GenerationParams,
    ) -> Result<T> {
        let value = self.generate_structured_value(prompt, schema, params).await?;
        serde_json::from_value(value).map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    /// Structured generation with a manual-parser safety net.
    ///
    /// An agent that declares a schema never receives raw text: either the
    /// schema-validated object or the manual parser's result comes back.
    pub async fn generate_with_fallback<T, F>(
        &self,
        prompt: &str,
        schema: &Value,
        params: &GenerationParams,
        manual_parser: F,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> Option<T>,
    {
        if self.structured.enabled {
            match self.generate_structured(prompt, schema, params).await {
                Ok(value) => return Ok(value),
                Err(e @ LlmError::StructuredOutput { .. }) => {
                    if !self.structured.fallback_to_manual_parsing {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, "falling back to manual parsing");
                }
                Err(e) => return Err(e),
            }
        }

        let text = self.generate(prompt, params).await?;
        manual_parser(&text).ok_or_else(|| LlmError::StructuredOutput {
            attempts: self.structured.max_retries + 1,
            message: "manual parsing produced no result".to_string(),
        })
    }

    /// Names of the models installed on the backend.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        self.client.list_models().await
    }

    /// Backend liveness.
    pub async fn is_available(&self) -> bool {
        self.client.is_available().await
    }

    async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LlmError::Fatal("adapter connection pool closed".to_string()))
    }
}

fn delta_from(piece: Piece) -> StreamDelta {
    match piece {
        Piece::Thinking(t) => StreamDelta::Thinking(t),
        Piece::Text(t) => StreamDelta::Text(t),
    }
}
