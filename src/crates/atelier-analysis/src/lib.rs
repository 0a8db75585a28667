//! Source analysis and generated-code validation.
//!
//! Three concerns share this crate because they all look at Python source:
//!
//! - [`ast`] — tree-sitter-backed structural analysis (functions, classes,
//!   imports, calls, docstrings, cyclomatic complexity);
//! - [`depgraph`] — a name-level dependency graph with PageRank centrality
//!   and bounded BFS dependency walks;
//! - [`quick`] / [`tools`] — subprocess validators: the 5-second quick
//!   harness gating each generation step, and the full three-tool pass
//!   (tests, typing, security lint) behind the [`CodeValidator`] seam.

pub mod ast;
pub mod depgraph;
pub mod error;
pub mod quick;
pub mod tools;

pub use ast::{ClassEntity, FileAnalysis, FunctionEntity, PythonAnalyzer};
pub use depgraph::{DependencyGraph, EdgeKind};
pub use error::{AnalysisError, Result};
pub use quick::{QuickValidator, QuickVerdict};
pub use tools::{CodeValidator, ToolValidator};
