//! In-process metrics aggregated for `GET /api/metrics`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Default)]
struct StageMetrics {
    calls: u64,
    errors: u64,
    total_time_ms: u64,
}

#[derive(Default)]
struct ModelMetrics {
    calls: u64,
    total_tokens: u64,
    total_time_ms: u64,
}

struct Inner {
    total: u64,
    successful: u64,
    failed: u64,
    total_time_ms: u64,
    total_iterations: u64,
    stages: HashMap<String, StageMetrics>,
    models: HashMap<String, ModelMetrics>,
    feedback_positive: u64,
    feedback_negative: u64,
    last_updated: DateTime<Utc>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            total_time_ms: 0,
            total_iterations: 0,
            stages: HashMap::new(),
            models: HashMap::new(),
            feedback_positive: 0,
            feedback_negative: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Process-wide metrics registry.
#[derive(Default)]
pub struct MetricsRegistry {
    inner: RwLock<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_generation(&self, success: bool, duration_ms: u64, iterations: u32) {
        let mut inner = self.inner.write();
        inner.total += 1;
        if success {
            inner.successful += 1;
        } else {
            inner.failed += 1;
        }
        inner.total_time_ms += duration_ms;
        inner.total_iterations += iterations as u64;
        inner.last_updated = Utc::now();
    }

    pub fn record_stage(&self, stage: &str, duration_ms: u64, error: bool) {
        let mut inner = self.inner.write();
        let entry = inner.stages.entry(stage.to_string()).or_default();
        entry.calls += 1;
        entry.total_time_ms += duration_ms;
        if error {
            entry.errors += 1;
        }
        inner.last_updated = Utc::now();
    }

    pub fn record_model_call(&self, model: &str, tokens: u64, duration_ms: u64) {
        let mut inner = self.inner.write();
        let entry = inner.models.entry(model.to_string()).or_default();
        entry.calls += 1;
        entry.total_tokens += tokens;
        entry.total_time_ms += duration_ms;
        inner.last_updated = Utc::now();
    }

    pub fn record_feedback(&self, positive: bool) {
        let mut inner = self.inner.write();
        if positive {
            inner.feedback_positive += 1;
        } else {
            inner.feedback_negative += 1;
        }
        inner.last_updated = Utc::now();
    }

    /// The `GET /api/metrics` payload.
    pub fn snapshot(&self) -> Value {
        let inner = self.inner.read();
        let avg = |total: u64, count: u64| {
            if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            }
        };

        let mut stages: Vec<Value> = inner
            .stages
            .iter()
            .map(|(stage, m)| {
                json!({
                    "stage": stage,
                    "avg_time_ms": avg(m.total_time_ms, m.calls),
                    "calls": m.calls,
                    "errors": m.errors,
                })
            })
            .collect();
        stages.sort_by(|a, b| a["stage"].as_str().cmp(&b["stage"].as_str()));

        let mut models: Vec<Value> = inner
            .models
            .iter()
            .map(|(model, m)| {
                json!({
                    "model": model,
                    "calls": m.calls,
                    "avg_tokens": avg(m.total_tokens, m.calls),
                    "avg_time_ms": avg(m.total_time_ms, m.calls),
                })
            })
            .collect();
        models.sort_by(|a, b| a["model"].as_str().cmp(&b["model"].as_str()));

        json!({
            "generation": {
                "total": inner.total,
                "successful": inner.successful,
                "failed": inner.failed,
                "avg_time_ms": avg(inner.total_time_ms, inner.total),
                "avg_iterations": avg(inner.total_iterations, inner.total),
                "success_rate": if inner.total == 0 { 0.0 } else {
                    inner.successful as f64 / inner.total as f64
                },
            },
            "stages": stages,
            "models": models,
            "feedback": {
                "positive": inner.feedback_positive,
                "negative": inner.feedback_negative,
            },
            "last_updated": inner.last_updated.to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_aggregates() {
        let metrics = MetricsRegistry::new();
        metrics.record_generation(true, 1_000, 0);
        metrics.record_generation(false, 3_000, 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["generation"]["total"], json!(2));
        assert_eq!(snapshot["generation"]["successful"], json!(1));
        assert_eq!(snapshot["generation"]["avg_time_ms"], json!(2000.0));
        assert_eq!(snapshot["generation"]["avg_iterations"], json!(1.0));
        assert_eq!(snapshot["generation"]["success_rate"], json!(0.5));
    }

    #[test]
    fn stage_errors_are_counted() {
        let metrics = MetricsRegistry::new();
        metrics.record_stage("coding", 500, false);
        metrics.record_stage("coding", 1_500, true);

        let snapshot = metrics.snapshot();
        let coding = snapshot["stages"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["stage"] == json!("coding"))
            .unwrap();
        assert_eq!(coding["calls"], json!(2));
        assert_eq!(coding["errors"], json!(1));
        assert_eq!(coding["avg_time_ms"], json!(1000.0));
    }

    #[test]
    fn empty_registry_snapshot_is_well_formed() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot["generation"]["success_rate"], json!(0.0));
        assert!(snapshot["stages"].as_array().unwrap().is_empty());
        assert!(snapshot["last_updated"].is_string());
    }
}
