//! Per-adapter-call metrics (spec §4.10), grounded on the teacher's
//! workspace dependency on `prometheus` (used there for process metrics;
//! here it backs the call histogram and bounded-cardinality error-class
//! counters this spec requires).

use std::time::Duration;

use prometheus::{HistogramVec, IntCounterVec, Opts, Registry};

use codemind_core::CodeMindError;

/// Bounded set of error classes derived from an error string,
/// case-insensitive (spec §4.10).
pub fn classify_error(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("nil") || lower.contains("uninitialized") || lower.contains("uninitialised") {
        return "nil_client";
    }
    if lower.contains("timeout")
        || lower.contains("deadline")
        || lower.contains("cancelled")
        || lower.contains("canceled")
    {
        return "timeout";
    }
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("api key")
    {
        return "auth";
    }
    if lower.contains("429") || lower.contains("rate limit") {
        return "rate_limit";
    }
    if lower.contains("server error")
        || lower.contains("internal")
        || lower.contains("500")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
    {
        return "server";
    }
    "unknown"
}

/// Records per-call durations, outcomes, and error classes for every
/// adapter call (spec §4.10).
pub struct Observability {
    registry: Registry,
    calls_total: IntCounterVec,
    errors_by_class: IntCounterVec,
    duration_seconds: HistogramVec,
}

impl Observability {
    pub fn new() -> Self {
        let registry = Registry::new();

        let calls_total = IntCounterVec::new(
            Opts::new("codemind_llm_calls_total", "Total adapter calls by provider and status"),
            &["provider", "status"],
        )
        .expect("valid metric definition");

        let errors_by_class = IntCounterVec::new(
            Opts::new("codemind_llm_errors_total", "Adapter errors by provider and error class"),
            &["provider", "class"],
        )
        .expect("valid metric definition");

        let duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("codemind_llm_call_duration_seconds", "Adapter call duration"),
            &["provider"],
        )
        .expect("valid metric definition");

        registry.register(Box::new(calls_total.clone())).expect("register calls_total");
        registry
            .register(Box::new(errors_by_class.clone()))
            .expect("register errors_by_class");
        registry
            .register(Box::new(duration_seconds.clone()))
            .expect("register duration_seconds");

        Self {
            registry,
            calls_total,
            errors_by_class,
            duration_seconds,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_success(&self, provider: &str, duration: Duration) {
        self.calls_total.with_label_values(&[provider, "success"]).inc();
        self.duration_seconds.with_label_values(&[provider]).observe(duration.as_secs_f64());
    }

    pub fn record_error(&self, provider: &str, error: &CodeMindError, duration: Duration) {
        self.calls_total.with_label_values(&[provider, "error"]).inc();
        self.duration_seconds.with_label_values(&[provider]).observe(duration.as_secs_f64());
        let class = classify_error(&error.to_string());
        self.errors_by_class.with_label_values(&[provider, class]).inc();
    }
}

impl Default for Observability {
    fn default() -> Self {
        Self::new()
    }
}
