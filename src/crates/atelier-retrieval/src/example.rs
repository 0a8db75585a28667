//! Indexed code examples and their quality heuristic.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where an example came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExampleSource {
    Local,
    History,
    External,
}

impl ExampleSource {
    /// Re-ranking bonus: locally indexed project code is preferred.
    pub fn bonus(&self) -> f64 {
        match self {
            ExampleSource::Local => 1.0,
            _ => 0.5,
        }
    }
}

/// A code fragment with a short description, injected as a few-shot example.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExample {
    /// Content-addressed id: SHA-256 of the canonicalized code.
    pub id: String,
    pub code: String,
    pub description: String,
    pub source: ExampleSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    pub quality_score: f64,
}

impl CodeExample {
    pub fn new(
        code: impl Into<String>,
        description: impl Into<String>,
        source: ExampleSource,
    ) -> Self {
        let code = code.into();
        Self {
            id: canonical_hash(&code),
            quality_score: quality_score(&code),
            code,
            description: description.into(),
            source,
            file_path: None,
            language: None,
            relevance_score: None,
        }
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Hash of the code with per-line trailing whitespace and surrounding blank
/// lines stripped, so formatting-only duplicates collapse to one id.
pub fn canonical_hash(code: &str) -> String {
    let canonical: Vec<&str> = code.lines().map(|l| l.trim_end()).collect();
    let mut slice = canonical.as_slice();
    while slice.first().is_some_and(|l| l.is_empty()) {
        slice = &slice[1..];
    }
    while slice.last().is_some_and(|l| l.is_empty()) {
        slice = &slice[..slice.len() - 1];
    }
    let mut hasher = Sha256::new();
    hasher.update(slice.join("\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Structural quality signal in `[0, 1]`.
pub fn quality_score(code: &str) -> f64 {
    let mut score: f64 = 0.5;

    if code.contains("def ") || code.contains("class ") {
        score += 0.1;
    }
    if code.contains("\"\"\"") || code.contains("'''") {
        score += 0.1;
    }
    if code.contains("->") {
        score += 0.1;
    }
    if code.lines().any(|l| {
        let t = l.trim_start();
        t == "return" || t.starts_with("return ")
    }) {
        score += 0.05;
    }

    if code.contains("TODO") || code.contains("FIXME") {
        score -= 0.1;
    }
    let pass_count = code.lines().filter(|l| l.trim() == "pass").count();
    if pass_count > 1 {
        score -= 0.1;
    }
    if code.len() < 50 {
        score -= 0.1;
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"def add(a: int, b: int) -> int:
    """Add two integers."""
    return a + b
"#;

    #[test]
    fn quality_rewards_structure() {
        // 0.5 + def + docstring + hint + return = 0.85; length ≥ 50.
        assert!((quality_score(GOOD) - 0.85).abs() < 1e-9);
    }

    #[test]
    fn quality_penalizes_markers_and_stubs() {
        let stub = "def a():\n    pass\n\ndef b():\n    pass\n# TODO finish\n";
        // 0.5 + def - TODO - excessive pass = 0.4
        assert!((quality_score(stub) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn quality_penalizes_tiny_snippets() {
        let tiny = "x = 1";
        // 0.5 - short = 0.4
        assert!((quality_score(tiny) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn quality_is_clamped() {
        let awful = "# TODO\npass\npass\nx";
        let score = quality_score(awful);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn hash_ignores_trailing_whitespace_and_blank_edges() {
        let a = "def f():\n    return 1\n";
        let b = "\ndef f():   \n    return 1\n\n\n";
        assert_eq!(canonical_hash(a), canonical_hash(b));

        let c = "def f():\n    return 2\n";
        assert_ne!(canonical_hash(a), canonical_hash(c));
    }

    #[test]
    fn example_gets_id_and_quality_on_construction() {
        let ex = CodeExample::new(GOOD, "Add two integers", ExampleSource::Local)
            .with_language("python");
        assert_eq!(ex.id.len(), 64);
        assert!(ex.quality_score > 0.8);
        assert_eq!(ex.source.bonus(), 1.0);
        assert_eq!(ExampleSource::History.bonus(), 0.5);
    }
}
