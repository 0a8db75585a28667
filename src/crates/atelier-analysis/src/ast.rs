//! Python source analysis backed by tree-sitter.
//!
//! Extracts the structural facts the researcher and retrieval index consume:
//! imports, top-level functions, classes with their methods, call sites,
//! docstrings, and cyclomatic complexity. A parse failure never propagates —
//! it yields an empty [`FileAnalysis`] with the `error` field set so callers
//! continue with degraded context.

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

/// A function or method extracted from a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionEntity {
    pub name: String,
    pub signature: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    pub complexity: u32,
    pub loc: usize,
    pub calls: Vec<String>,
}

/// A class with its bases and methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassEntity {
    pub name: String,
    pub bases: Vec<String>,
    pub methods: Vec<FunctionEntity>,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
}

/// Structural facts for one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub imports: Vec<String>,
    pub functions: Vec<FunctionEntity>,
    pub classes: Vec<ClassEntity>,
    pub calls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileAnalysis {
    fn failed(path: Option<String>, error: impl Into<String>) -> Self {
        Self {
            path,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Every function in the file, including methods.
    pub fn all_functions(&self) -> impl Iterator<Item = &FunctionEntity> {
        self.functions
            .iter()
            .chain(self.classes.iter().flat_map(|c| c.methods.iter()))
    }
}

/// Python analyzer; cheap to construct, one parser per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonAnalyzer;

impl PythonAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze in-memory source. Never fails; see [`FileAnalysis::error`].
    pub fn analyze_source(&self, source: &str, path: Option<&str>) -> FileAnalysis {
        let path = path.map(String::from);
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
            return FileAnalysis::failed(path, format!("language load failed: {e}"));
        }
        let Some(tree) = parser.parse(source, None) else {
            return FileAnalysis::failed(path, "parser produced no tree");
        };
        let root = tree.root_node();
        if root.has_error() {
            return FileAnalysis::failed(path, "syntax error in source");
        }

        let bytes = source.as_bytes();
        let mut analysis = FileAnalysis {
            path,
            ..Default::default()
        };

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "import_statement" | "import_from_statement" => {
                    analysis.imports.extend(import_names(child, bytes));
                }
                "function_definition" => {
                    if let Some(func) = function_entity(child, bytes) {
                        analysis.functions.push(func);
                    }
                }
                "decorated_definition" => {
                    if let Some(def) = child.child_by_field_name("definition") {
                        match def.kind() {
                            "function_definition" => {
                                if let Some(func) = function_entity(def, bytes) {
                                    analysis.functions.push(func);
                                }
                            }
                            "class_definition" => {
                                if let Some(class) = class_entity(def, bytes) {
                                    analysis.classes.push(class);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                "class_definition" => {
                    if let Some(class) = class_entity(child, bytes) {
                        analysis.classes.push(class);
                    }
                }
                _ => {}
            }
        }

        visit(root, &mut |node| {
            if node.kind() == "call" {
                if let Some(name) = call_name(node, bytes) {
                    analysis.calls.push(name);
                }
            }
        });

        analysis
    }

    /// Analyze a file on disk.
    pub fn analyze_file(&self, path: &std::path::Path) -> FileAnalysis {
        match std::fs::read_to_string(path) {
            Ok(source) => self.analyze_source(&source, path.to_str()),
            Err(e) => FileAnalysis::failed(
                path.to_str().map(String::from),
                format!("read failed: {e}"),
            ),
        }
    }
}

fn text<'a>(node: Node, bytes: &'a [u8]) -> &'a str {
    node.utf8_text(bytes).unwrap_or("")
}

fn visit(node: Node, f: &mut impl FnMut(Node)) {
    f(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, f);
    }
}

fn import_names(node: Node, bytes: &[u8]) -> Vec<String> {
    if node.kind() == "import_from_statement" {
        return node
            .child_by_field_name("module_name")
            .map(|m| vec![text(m, bytes).to_string()])
            .unwrap_or_default();
    }
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "dotted_name" => names.push(text(child, bytes).to_string()),
            "aliased_import" => {
                if let Some(name) = child.child_by_field_name("name") {
                    names.push(text(name, bytes).to_string());
                }
            }
            _ => {}
        }
    }
    names
}

fn function_entity(node: Node, bytes: &[u8]) -> Option<FunctionEntity> {
    let name = text(node.child_by_field_name("name")?, bytes).to_string();
    let params = node
        .child_by_field_name("parameters")
        .map(|p| text(p, bytes).to_string())
        .unwrap_or_else(|| "()".to_string());
    let signature = match node.child_by_field_name("return_type") {
        Some(ret) => format!("def {name}{params} -> {}", text(ret, bytes)),
        None => format!("def {name}{params}"),
    };

    let start_line = node.start_position().row + 1;
    let end_line = node.end_position().row + 1;
    let body = node.child_by_field_name("body");

    let mut calls = Vec::new();
    if let Some(body) = body {
        visit(body, &mut |n| {
            if n.kind() == "call" {
                if let Some(name) = call_name(n, bytes) {
                    calls.push(name);
                }
            }
        });
    }

    Some(FunctionEntity {
        docstring: body.and_then(|b| docstring(b, bytes)),
        complexity: cyclomatic_complexity(node),
        loc: end_line.saturating_sub(start_line) + 1,
        name,
        signature,
        start_line,
        end_line,
        calls,
    })
}

fn class_entity(node: Node, bytes: &[u8]) -> Option<ClassEntity> {
    let name = text(node.child_by_field_name("name")?, bytes).to_string();
    let mut bases = Vec::new();
    if let Some(superclasses) = node.child_by_field_name("superclasses") {
        let mut cursor = superclasses.walk();
        for arg in superclasses.named_children(&mut cursor) {
            if matches!(arg.kind(), "identifier" | "attribute") {
                bases.push(text(arg, bytes).to_string());
            }
        }
    }

    let body = node.child_by_field_name("body");
    let mut methods = Vec::new();
    if let Some(body) = body {
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            let def = if child.kind() == "decorated_definition" {
                child.child_by_field_name("definition")
            } else {
                Some(child)
            };
            if let Some(def) = def.filter(|d| d.kind() == "function_definition") {
                if let Some(method) = function_entity(def, bytes) {
                    methods.push(method);
                }
            }
        }
    }

    Some(ClassEntity {
        docstring: body.and_then(|b| docstring(b, bytes)),
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        name,
        bases,
        methods,
    })
}

/// First statement of a block, when it is a bare string literal.
fn docstring(body: Node, bytes: &[u8]) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    Some(clean_string_literal(text(expr, bytes)))
}

fn clean_string_literal(raw: &str) -> String {
    let trimmed = raw
        .trim_start_matches(['r', 'b', 'u', 'f', 'R', 'B', 'U', 'F']);
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if trimmed.starts_with(quote) && trimmed.ends_with(quote) && trimmed.len() >= 2 * quote.len()
        {
            return trimmed[quote.len()..trimmed.len() - quote.len()]
                .trim()
                .to_string();
        }
    }
    trimmed.trim().to_string()
}

fn call_name(node: Node, bytes: &[u8]) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    match function.kind() {
        "identifier" => Some(text(function, bytes).to_string()),
        "attribute" => function
            .child_by_field_name("attribute")
            .map(|a| text(a, bytes).to_string()),
        _ => None,
    }
}

/// 1 + one per conditional branch, + extra operands of short-circuit chains.
fn cyclomatic_complexity(node: Node) -> u32 {
    let mut complexity = 1;
    visit(node, &mut |n| {
        match n.kind() {
            "if_statement" | "elif_clause" | "while_statement" | "for_statement"
            | "except_clause" | "conditional_expression" => complexity += 1,
            // Each `and`/`or` node contributes one additional operand.
            "boolean_operator" => complexity += 1,
            _ => {}
        }
    });
    complexity
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
import os
from collections import OrderedDict

def helper(x):
    """Double the input."""
    return x * 2

def process(items, flag=True):
    """Process items.

    Longer description here.
    """
    results = []
    for item in items:
        if flag and item > 0:
            results.append(helper(item))
        elif item < 0:
            results.append(0)
    return results

class Cache(OrderedDict):
    """A tiny cache."""

    def get_or(self, key, default=None):
        if key in self:
            return self[key]
        return default
"#;

    #[test]
    fn extracts_imports_functions_and_classes() {
        let analysis = PythonAnalyzer::new().analyze_source(SAMPLE, Some("sample.py"));
        assert!(analysis.error.is_none());
        assert_eq!(analysis.imports, vec!["os", "collections"]);

        let names: Vec<&str> = analysis.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["helper", "process"]);

        assert_eq!(analysis.classes.len(), 1);
        let class = &analysis.classes[0];
        assert_eq!(class.name, "Cache");
        assert_eq!(class.bases, vec!["OrderedDict"]);
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.methods[0].name, "get_or");
    }

    #[test]
    fn signatures_and_docstrings() {
        let analysis = PythonAnalyzer::new().analyze_source(SAMPLE, None);
        let helper = &analysis.functions[0];
        assert_eq!(helper.signature, "def helper(x)");
        assert_eq!(helper.docstring.as_deref(), Some("Double the input."));

        let process = &analysis.functions[1];
        assert!(process.docstring.as_deref().unwrap().starts_with("Process items."));
        assert!(process.loc >= 10);
    }

    #[test]
    fn complexity_counts_branches_and_boolean_operands() {
        let analysis = PythonAnalyzer::new().analyze_source(SAMPLE, None);
        let process = &analysis.functions[1];
        // 1 base + for + if + elif + one `and` operand.
        assert_eq!(process.complexity, 5);

        let helper = &analysis.functions[0];
        assert_eq!(helper.complexity, 1);
    }

    #[test]
    fn function_calls_are_collected() {
        let analysis = PythonAnalyzer::new().analyze_source(SAMPLE, None);
        let process = &analysis.functions[1];
        assert!(process.calls.contains(&"helper".to_string()));
        assert!(process.calls.contains(&"append".to_string()));
    }

    #[test]
    fn return_type_appears_in_signature() {
        let source = "def add(a: int, b: int) -> int:\n    return a + b\n";
        let analysis = PythonAnalyzer::new().analyze_source(source, None);
        assert_eq!(analysis.functions[0].signature, "def add(a: int, b: int) -> int");
    }

    #[test]
    fn parse_failure_yields_degraded_analysis() {
        let analysis = PythonAnalyzer::new().analyze_source("def broken(:\n", Some("bad.py"));
        assert!(analysis.error.is_some());
        assert!(analysis.functions.is_empty());
        assert_eq!(analysis.path.as_deref(), Some("bad.py"));
    }

    #[test]
    fn all_functions_includes_methods() {
        let analysis = PythonAnalyzer::new().analyze_source(SAMPLE, None);
        let names: Vec<&str> = analysis.all_functions().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"get_or"));
        assert_eq!(names.len(), 3);
    }
}
