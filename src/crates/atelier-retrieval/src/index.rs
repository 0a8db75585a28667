//! The example index: project walking, history contribution, re-ranked
//! similarity search.

use crate::embedder::Embedder;
use crate::error::Result;
use crate::example::{CodeExample, ExampleSource};
use crate::store::VectorStore;
use atelier_analysis::{FunctionEntity, PythonAnalyzer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use walkdir::WalkDir;

/// Weights of the combined ranking score.
const W_RELEVANCE: f64 = 0.6;
const W_QUALITY: f64 = 0.3;
const W_SOURCE: f64 = 0.1;

/// Index settings.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Minimum quality score for an example to be served.
    pub min_quality: f64,
    /// Re-index cadence for the background walker.
    pub reindex_interval: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_quality: 0.5,
            reindex_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Embedding-backed few-shot example index.
///
/// Shared and append-mostly: reads go straight to the store, writes
/// serialize through an internal mutex.
pub struct ExampleIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    analyzer: PythonAnalyzer,
    config: IndexConfig,
    write_lock: Mutex<()>,
}

impl ExampleIndex {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: IndexConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            analyzer: PythonAnalyzer::new(),
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Walk a project tree and index every eligible function.
    ///
    /// Eligible: a top-level function or method with a docstring, or whose
    /// name is longer than two characters. Returns the number of examples
    /// upserted.
    pub async fn index_project(&self, root: &Path) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut indexed = 0;

        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "py"))
        {
            let path = entry.path();
            let Ok(source) = std::fs::read_to_string(path) else {
                continue;
            };
            let analysis = self.analyzer.analyze_source(&source, path.to_str());
            if analysis.error.is_some() {
                tracing::debug!(path = %path.display(), "skipping unparseable file");
                continue;
            }

            for func in analysis.all_functions() {
                if func.docstring.is_none() && func.name.chars().count() <= 2 {
                    continue;
                }
                let Some(code) = slice_lines(&source, func.start_line, func.end_line) else {
                    continue;
                };
                let example = build_example(func, code, path);
                self.upsert(example).await?;
                indexed += 1;
            }
        }

        tracing::info!(indexed, root = %root.display(), "project indexing complete");
        Ok(indexed)
    }

    /// Record a validated generation under source `history`.
    pub async fn add_from_history(&self, task_text: &str, code: &str) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let example = CodeExample::new(code, task_text, ExampleSource::History)
            .with_language("python");
        let id = example.id.clone();
        let text = embedding_text(&example);
        let embedding = self.embedder.embed(&text).await?;
        self.store.upsert(embedding, example).await?;
        Ok(id)
    }

    async fn upsert(&self, example: CodeExample) -> Result<()> {
        let text = embedding_text(&example);
        let embedding = self.embedder.embed(&text).await?;
        self.store.upsert(embedding, example).await
    }

    /// Top `n` examples for a query, re-ranked by the combined score
    /// `0.6·relevance + 0.3·quality + 0.1·source_bonus`.
    pub async fn find_similar(
        &self,
        query: &str,
        n: usize,
        sources: &[ExampleSource],
        language: Option<&str>,
    ) -> Result<Vec<CodeExample>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        // Over-fetch so that filtering still leaves n candidates.
        let candidates = self.store.query(&embedding, n * 4).await?;

        let mut ranked: Vec<(CodeExample, f64)> = candidates
            .into_iter()
            .filter(|(example, _)| sources.is_empty() || sources.contains(&example.source))
            .filter(|(example, _)| {
                language.is_none() || example.language.as_deref() == language
            })
            .filter(|(example, _)| example.quality_score >= self.config.min_quality)
            .map(|(mut example, distance)| {
                let relevance = (1.0 - distance as f64).clamp(-1.0, 1.0);
                example.relevance_score = Some(relevance);
                let combined = W_RELEVANCE * relevance
                    + W_QUALITY * example.quality_score
                    + W_SOURCE * example.source.bonus();
                (example, combined)
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        ranked.truncate(n);
        Ok(ranked.into_iter().map(|(example, _)| example).collect())
    }

    /// Number of indexed examples.
    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// Spawn the periodic project re-indexer.
    pub fn spawn_reindexer(
        self: &Arc<Self>,
        root: std::path::PathBuf,
    ) -> tokio::task::JoinHandle<()> {
        let index = Arc::clone(self);
        let interval = index.config.reindex_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it, the initial index is
            // done on startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = index.index_project(&root).await {
                    tracing::warn!(%e, "periodic re-index failed");
                }
            }
        })
    }
}

fn embedding_text(example: &CodeExample) -> String {
    format!("{}\n{}", example.description, example.code)
}

fn build_example(func: &FunctionEntity, code: String, path: &Path) -> CodeExample {
    let description = func
        .docstring
        .clone()
        .unwrap_or_else(|| format!("{} ({})", func.name, func.signature));
    CodeExample::new(code, description, ExampleSource::Local)
        .with_file_path(path.display().to_string())
        .with_language("python")
}

fn slice_lines(source: &str, start_line: usize, end_line: usize) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    if start_line == 0 || start_line > end_line || end_line > lines.len() {
        return None;
    }
    Some(lines[start_line - 1..end_line].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;

    /// Deterministic toy embedder: letter-frequency vector.
    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut vector = vec![0.0f32; 26];
            for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
                let idx = (c.to_ascii_lowercase() as u8 - b'a') as usize;
                vector[idx] += 1.0;
            }
            Ok(vector)
        }
    }

    fn index() -> Arc<ExampleIndex> {
        Arc::new(ExampleIndex::new(
            Arc::new(HashEmbedder),
            Arc::new(InMemoryVectorStore::new()),
            IndexConfig::default(),
        ))
    }

    const BINARY_SEARCH: &str = r#"def binary_search(items: list, target: int) -> int:
    """Binary search over sorted items."""
    low, high = 0, len(items) - 1
    while low <= high:
        mid = (low + high) // 2
        if items[mid] == target:
            return mid
        if items[mid] < target:
            low = mid + 1
        else:
            high = mid - 1
    return -1
"#;

    #[tokio::test]
    async fn round_trip_index_and_find() {
        let index = index();
        let id = index
            .add_from_history("Binary search over sorted items.", BINARY_SEARCH)
            .await
            .unwrap();

        let hits = index
            .find_similar(
                "Binary search over sorted items.",
                1,
                &[ExampleSource::History],
                Some("python"),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert!(hits[0].relevance_score.unwrap() > 0.5);
    }

    #[tokio::test]
    async fn source_filter_excludes_other_sources() {
        let index = index();
        index
            .add_from_history("sorting helper", "def sort_it(xs):\n    return sorted(xs)\n")
            .await
            .unwrap();

        let hits = index
            .find_similar("sorting helper", 5, &[ExampleSource::Local], None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn low_quality_examples_are_not_served() {
        let index = index();
        // Tiny snippet: quality 0.4, below the 0.5 default threshold.
        index.add_from_history("tiny", "x = 1").await.unwrap();

        let hits = index.find_similar("tiny", 5, &[], None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn ranking_is_stable_across_calls() {
        let index = index();
        index.add_from_history("parse numbers from text", BINARY_SEARCH).await.unwrap();
        index
            .add_from_history(
                "parse numbers quickly",
                "def parse_numbers(text: str) -> list:\n    \"\"\"Parse numbers.\"\"\"\n    return [int(t) for t in text.split()]\n",
            )
            .await
            .unwrap();

        let first = index.find_similar("parse numbers", 2, &[], None).await.unwrap();
        let second = index.find_similar("parse numbers", 2, &[], None).await.unwrap();
        let ids: Vec<&str> = first.iter().map(|e| e.id.as_str()).collect();
        let ids_again: Vec<&str> = second.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ids_again);
    }

    #[tokio::test]
    async fn index_project_walks_python_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("util.py"), BINARY_SEARCH).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not code").unwrap();
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(
            dir.path().join("pkg").join("more.py"),
            "def helper(x):\n    \"\"\"Help.\"\"\"\n    return x\n",
        )
        .unwrap();

        let index = index();
        let count = index.index_project(dir.path()).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(index.count().await.unwrap(), 2);

        let hits = index
            .find_similar("Binary search over sorted items.", 1, &[ExampleSource::Local], None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].file_path.as_deref().unwrap().ends_with("util.py"));
    }

    #[tokio::test]
    async fn short_nameless_functions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // Two-char name, no docstring: ineligible.
        std::fs::write(dir.path().join("m.py"), "def go(x):\n    return x\n").unwrap();
        let index = index();
        let count = index.index_project(dir.path()).await.unwrap();
        assert_eq!(count, 0);
    }
}
