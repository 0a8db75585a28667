//! Vector store seam and the in-memory cosine implementation.

use crate::error::Result;
use crate::example::CodeExample;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Similarity index over example embeddings.
///
/// Reads are lock-free or shared; writers serialize internally. Distances
/// are cosine distances in `[0, 2]`, smaller is closer.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, embedding: Vec<f32>, example: CodeExample) -> Result<()>;

    /// Top `n` nearest examples with their distances, deterministically
    /// ordered (distance, then id).
    async fn query(&self, embedding: &[f32], n: usize) -> Result<Vec<(CodeExample, f32)>>;

    async fn count(&self) -> Result<usize>;
}

/// Process-local store with exhaustive cosine scan.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<String, (Vec<f32>, CodeExample)>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, embedding: Vec<f32>, example: CodeExample) -> Result<()> {
        self.entries
            .write()
            .insert(example.id.clone(), (embedding, example));
        Ok(())
    }

    async fn query(&self, embedding: &[f32], n: usize) -> Result<Vec<(CodeExample, f32)>> {
        let entries = self.entries.read();
        let mut scored: Vec<(CodeExample, f32)> = entries
            .values()
            .map(|(vec, example)| (example.clone(), cosine_distance(embedding, vec)))
            .collect();
        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(n);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }
}

/// `1 − cosine_similarity`; orthogonal vectors are at distance 1.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example::ExampleSource;

    fn example(code: &str) -> CodeExample {
        CodeExample::new(code, "desc", ExampleSource::Local)
    }

    #[test]
    fn cosine_distance_basics() {
        assert!((cosine_distance(&[1.0, 0.0], &[1.0, 0.0])).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_content() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![1.0, 0.0], example("def f():\n    return 1\n"))
            .await
            .unwrap();
        store
            .upsert(vec![1.0, 0.0], example("def f():\n    return 1\n"))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn query_orders_by_distance_then_id() {
        let store = InMemoryVectorStore::new();
        store.upsert(vec![1.0, 0.0], example("a = 1")).await.unwrap();
        store.upsert(vec![0.9, 0.1], example("b = 2")).await.unwrap();
        store.upsert(vec![0.0, 1.0], example("c = 3")).await.unwrap();

        let hits = store.query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].1 <= hits[1].1);
        assert!(hits[0].1.abs() < 1e-6);

        // Deterministic: a second identical query returns the same order.
        let again = store.query(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|(e, _)| e.id.as_str()).collect();
        let ids_again: Vec<&str> = again.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, ids_again);
    }
}
