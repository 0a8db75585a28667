//! Retrieval-augmented context for code generation.
//!
//! An [`ExampleIndex`] holds content-addressed [`CodeExample`]s behind two
//! seams: an [`Embedder`] (`embed(text) → vector`) and a [`VectorStore`]
//! (`upsert`/`query` over a similarity index). Project code is harvested by
//! walking the tree through the AST analyzer; validated generations flow
//! back in under source `history`; lookups re-rank cosine hits by a
//! combined relevance/quality/source score.

pub mod embedder;
pub mod error;
pub mod example;
pub mod index;
pub mod store;

pub use embedder::{Embedder, OllamaEmbedder};
pub use error::{Result, RetrievalError};
pub use example::{canonical_hash, quality_score, CodeExample, ExampleSource};
pub use index::{ExampleIndex, IndexConfig};
pub use store::{cosine_distance, InMemoryVectorStore, VectorStore};
