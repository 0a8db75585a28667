//! Shared plumbing for stage agents.

use atelier_core::error::WorkflowError;
use atelier_core::state::AgentState;
use atelier_core::stream::EventEmitter;
use atelier_llm::{GenerationParams, LlmAdapter, ReasoningState, StreamDelta};
use futures::StreamExt;

/// Sampling parameters derived from the task options.
pub fn params_for(state: &AgentState) -> GenerationParams {
    GenerationParams {
        model: Some(state.model.clone()),
        temperature: state.options.temperature,
        top_p: state.options.top_p,
        max_tokens: state.options.max_tokens,
    }
}

/// Map an adapter error into a recoverable stage error.
pub fn stage_err(stage: &str, error: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::stage(stage, error)
}

/// Strip a fenced code block from a model response, or return the trimmed
/// text when no fence is present.
pub fn extract_code(text: &str) -> String {
    for fence in ["```python", "```py", "```"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            let body = body.strip_prefix('\n').unwrap_or(body);
            if let Some(end) = body.find("```") {
                return body[..end].trim_end().to_string();
            }
        }
    }
    text.trim().to_string()
}

/// Streamed generation that mirrors reasoning deltas onto the event stream
/// and returns the collected answer text.
pub async fn generate_streaming(
    adapter: &LlmAdapter,
    prompt: &str,
    params: &GenerationParams,
    emitter: &EventEmitter,
) -> Result<String, WorkflowError> {
    let stage = emitter.stage().to_string();
    let mut stream = adapter
        .generate_stream(prompt, params)
        .await
        .map_err(|e| stage_err(&stage, e))?;

    let mut reasoning = ReasoningState::new();
    let mut announced = false;
    let mut text = String::new();

    while let Some(delta) = stream.next().await {
        match delta.map_err(|e| stage_err(&stage, e))? {
            StreamDelta::Thinking(piece) => {
                if !announced {
                    announced = true;
                    reasoning.begin();
                    emitter.thinking_started().await;
                }
                reasoning.push(&piece);
                emitter
                    .thinking_delta(piece, reasoning.total_chars(), reasoning.elapsed_ms())
                    .await;
            }
            StreamDelta::Text(piece) => text.push_str(&piece),
            StreamDelta::Interrupted => {
                reasoning.interrupt();
                emitter.thinking_interrupted("missing closing delimiter").await;
            }
        }
    }

    if announced && reasoning.status != atelier_llm::ReasoningStatus::Interrupted {
        reasoning.complete();
        emitter
            .thinking_completed(
                reasoning.summary(),
                reasoning.total_chars(),
                reasoning.elapsed_ms(),
            )
            .await;
    }

    Ok(text)
}

/// Every `.py` file under `root`, depth-first.
pub fn walk_python_files(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "py") {
                files.push(path);
            }
        }
    }
    files
}

/// Token-shingle overlap of `generated` against `example`, in `[0, 1]`.
///
/// The ratio is the fraction of the generated text's k-token shingles that
/// also occur in the example, so 1.0 means a verbatim copy.
pub fn shingle_overlap(generated: &str, example: &str, k: usize) -> f64 {
    let generated_shingles = shingles(generated, k);
    if generated_shingles.is_empty() {
        return 0.0;
    }
    let example_shingles = shingles(example, k);
    let hits = generated_shingles
        .iter()
        .filter(|s| example_shingles.contains(*s))
        .count();
    hits as f64 / generated_shingles.len() as f64
}

fn shingles(text: &str, k: usize) -> std::collections::HashSet<u64> {
    use sha2::{Digest, Sha256};
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .collect();
    let mut set = std::collections::HashSet::new();
    if tokens.len() < k {
        if !tokens.is_empty() {
            let mut hasher = Sha256::new();
            hasher.update(tokens.join(" ").as_bytes());
            let digest = hasher.finalize();
            set.insert(u64::from_le_bytes(digest[..8].try_into().unwrap()));
        }
        return set;
    }
    for window in tokens.windows(k) {
        let mut hasher = Sha256::new();
        hasher.update(window.join(" ").as_bytes());
        let digest = hasher.finalize();
        set.insert(u64::from_le_bytes(digest[..8].try_into().unwrap()));
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_code_prefers_python_fence() {
        let text = "Sure!\n```python\ndef f():\n    return 1\n```\nHope that helps.";
        assert_eq!(extract_code(text), "def f():\n    return 1");
    }

    #[test]
    fn extract_code_falls_back_to_plain_text() {
        let text = "def f():\n    return 1\n";
        assert_eq!(extract_code(text), "def f():\n    return 1");
    }

    #[test]
    fn extract_code_handles_bare_fence() {
        let text = "```\nx = 1\n```";
        assert_eq!(extract_code(text), "x = 1");
    }

    #[test]
    fn identical_text_has_full_overlap() {
        let code = "def add(a, b):\n    return a + b\n";
        assert!((shingle_overlap(code, code, 5) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_text_has_no_overlap() {
        let a = "def add(a, b):\n    return a + b";
        let b = "class Cache:\n    def evict(self):\n        self.items.clear()";
        assert_eq!(shingle_overlap(a, b, 5), 0.0);
    }

    #[test]
    fn partial_copy_scores_between() {
        let example = "def add(a, b):\n    return a + b\n";
        let generated = format!("{example}\ndef extra(x):\n    total = x * 3\n    return total - 1\n");
        let overlap = shingle_overlap(&generated, example, 5);
        assert!(overlap > 0.1 && overlap < 0.9, "overlap was {overlap}");
    }
}
