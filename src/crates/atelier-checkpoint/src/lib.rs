//! Durable checkpoint backends for atelier tasks.
//!
//! Implements the [`CheckpointStore`](atelier_core::checkpoint::CheckpointStore)
//! seam from `atelier-core`:
//!
//! - [`FileCheckpointStore`] — one directory per task with `metadata.json`
//!   and `state.json`, written atomically (temp file + rename) so readers
//!   never observe a torn write; includes the TTL sweeper.
//! - [`InMemoryCheckpointStore`] — process-local store for tests.

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
