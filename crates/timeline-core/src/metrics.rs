//! Process-wide Prometheus metrics, scraped at `GET /metrics`.
//!
//! Mirrors the teacher's `prometheus`-crate convention: lazily
//! constructed, registered on first use, falling back to an unregistered
//! instance rather than panicking if registration ever fails.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};

pub static POSTS_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter("timeline_posts_created_total", "Total posts accepted by intake")
});

pub static FANOUT_EVENTS_PUBLISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "timeline_fanout_events_published_total",
        "post_created events published for regular authors",
    )
});

pub static FANOUT_EVENTS_PROCESSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "timeline_fanout_events_processed_total",
        "Events processed by the fan-out worker, labeled by outcome",
        &["outcome"],
    )
});

pub static FANOUT_POISON_MESSAGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "timeline_fanout_poison_messages_total",
        "Malformed event payloads acked without processing",
    )
});

pub static TIMELINE_READS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "timeline_reads_total",
        "Timeline reads, labeled by source",
        &["source"],
    )
});

fn register_counter(name: &str, help: &str) -> IntCounter {
    match IntCounter::new(name, help) {
        Ok(counter) => {
            if let Err(err) = prometheus::default_registry().register(Box::new(counter.clone())) {
                tracing::warn!(metric = name, error = %err, "failed to register counter");
            }
            counter
        }
        Err(err) => {
            tracing::warn!(metric = name, error = %err, "failed to create counter");
            IntCounter::new(format!("{name}_fallback"), help).expect("fallback counter")
        }
    }
}

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let opts = Opts::new(name, help);
    match IntCounterVec::new(opts, labels) {
        Ok(counter) => {
            if let Err(err) = prometheus::default_registry().register(Box::new(counter.clone())) {
                tracing::warn!(metric = name, error = %err, "failed to register counter vec");
            }
            counter
        }
        Err(err) => {
            tracing::warn!(metric = name, error = %err, "failed to create counter vec");
            IntCounterVec::new(Opts::new(format!("{name}_fallback"), help), labels)
                .expect("fallback counter vec")
        }
    }
}

/// Renders the process registry in Prometheus text exposition format.
pub fn render() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}
