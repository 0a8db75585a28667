//! Server configuration.
//!
//! Loaded from a TOML file; every key has a default so a missing file or a
//! partial file still yields a working configuration. The Ollama base URL
//! can be overridden through `ATELIER_OLLAMA_URL`.

use atelier_core::domain::Complexity;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub llm: LlmSection,
    pub default: DefaultSection,
    pub structured_output: StructuredOutputSection,
    pub incremental_coding: IncrementalSection,
    pub code_retrieval: RetrievalSection,
    pub multi_agent_debate: DebateSection,
    pub persistence: PersistenceSection,
    pub logging: LoggingSection,
    pub debug: DebugSection,
}

impl Config {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&text)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ATELIER_OLLAMA_URL") {
            self.llm.base_url = url;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: String,
    /// Simultaneous inflight LLM calls across all tasks.
    pub max_inflight: usize,
    pub call_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            max_inflight: 2,
            call_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultSection {
    pub default_model: String,
    pub max_iterations: u32,
    pub temperature: f32,
    pub enable_web: bool,
    pub output_dir: String,
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            default_model: "qwen2.5-coder:7b".to_string(),
            max_iterations: 3,
            temperature: 0.7,
            enable_web: false,
            output_dir: "./output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StructuredOutputSection {
    pub enabled: bool,
    pub max_retries: u32,
    pub enabled_agents: Vec<String>,
    pub fallback_to_manual_parsing: bool,
}

impl Default for StructuredOutputSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            enabled_agents: vec![
                "intent".to_string(),
                "planner".to_string(),
                "debugger".to_string(),
                "reflection".to_string(),
            ],
            fallback_to_manual_parsing: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IncrementalSection {
    pub enabled: bool,
    pub min_complexity: Complexity,
    pub max_fix_attempts: u32,
    /// Quick-validation budget per step, in milliseconds.
    pub validation_timeout: u64,
}

impl Default for IncrementalSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_complexity: Complexity::Complex,
            max_fix_attempts: 3,
            validation_timeout: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub enabled: bool,
    pub sources: Vec<String>,
    pub num_examples: usize,
    pub embedding_model: String,
    /// Re-index cadence in minutes.
    pub reindex_interval: u64,
    pub min_quality: f64,
    /// Project tree to index on startup; empty disables project indexing.
    pub project_root: String,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            enabled: true,
            sources: vec!["local".to_string(), "history".to_string()],
            num_examples: 3,
            embedding_model: "nomic-embed-text".to_string(),
            reindex_interval: 30,
            min_quality: 0.5,
            project_root: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebateSection {
    pub enabled: bool,
    pub max_rounds: usize,
    pub min_complexity: Complexity,
    pub reviewers: Vec<String>,
    pub reviewer_model: String,
}

impl Default for DebateSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rounds: 3,
            min_complexity: Complexity::Medium,
            reviewers: vec![
                "security".to_string(),
                "performance".to_string(),
                "correctness".to_string(),
            ],
            reviewer_model: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSection {
    pub enabled: bool,
    pub checkpoint_directory: String,
    pub max_checkpoint_age_hours: u64,
    pub auto_pause_on_disconnect: bool,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            enabled: true,
            checkpoint_directory: "./checkpoints".to_string(),
            max_checkpoint_age_hours: 24,
            auto_pause_on_disconnect: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub enable_file: bool,
    pub enable_console: bool,
    pub enable_memory: bool,
    pub log_file: String,
    pub memory_max_events: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_file: false,
            enable_console: true,
            enable_memory: false,
            log_file: "atelier.log".to_string(),
            memory_max_events: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugSection {
    pub under_the_hood_enabled: bool,
    pub log_level: String,
    pub save_logs_to_file: bool,
    pub max_logs_in_memory: usize,
}

impl Default for DebugSection {
    fn default() -> Self {
        Self {
            under_the_hood_enabled: false,
            log_level: "debug".to_string(),
            save_logs_to_file: false,
            max_logs_in_memory: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.default.max_iterations, 3);
        assert_eq!(config.server.port, 8765);
        assert!(config.structured_output.enabled);
        assert_eq!(config.multi_agent_debate.max_rounds, 3);
        assert_eq!(config.persistence.max_checkpoint_age_hours, 24);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
[default]
default_model = "deepseek-r1:8b"
max_iterations = 5

[multi_agent_debate]
enabled = false

[incremental_coding]
min_complexity = "medium"
"#,
        )
        .unwrap();

        assert_eq!(config.default.default_model, "deepseek-r1:8b");
        assert_eq!(config.default.max_iterations, 5);
        assert!((config.default.temperature - 0.7).abs() < 1e-6);
        assert!(!config.multi_agent_debate.enabled);
        assert_eq!(config.incremental_coding.min_complexity, Complexity::Medium);
        assert!(config.code_retrieval.enabled);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Path::new("/nonexistent/atelier.toml")).unwrap();
        assert_eq!(config.llm.base_url, "http://localhost:11434");
    }
}
