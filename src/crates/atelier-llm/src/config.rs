//! Configuration for the LLM adapter.

use std::time::Duration;

/// Connection settings for the local model backend.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the backend, e.g. `http://localhost:11434`.
    pub base_url: String,
    /// Default model name used when a call does not override it.
    pub model: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Adapter-level policy: concurrency cap, retries, per-call budget.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Maximum simultaneous inflight calls across all tasks.
    pub max_inflight: usize,
    /// Per-call budget enforced by the adapter on top of HTTP timeouts.
    pub call_timeout: Duration,
    /// Retries for transient failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    pub backoff_base: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_inflight: 2,
            call_timeout: Duration::from_secs(60),
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Structured-output policy.
#[derive(Debug, Clone)]
pub struct StructuredOutputConfig {
    pub enabled: bool,
    /// Schema-validation retries before giving up.
    pub max_retries: u32,
    /// Fall back to a manual parser when schema generation keeps failing.
    pub fallback_to_manual_parsing: bool,
}

impl Default for StructuredOutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            fallback_to_manual_parsing: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = LlmConfig::new("http://localhost:11434/", "qwen2.5-coder");
        assert_eq!(config.base_url, "http://localhost:11434");
    }
}
