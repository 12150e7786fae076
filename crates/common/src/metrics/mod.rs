//! Metrics and observability utilities
//!
//! Prometheus-style metrics for the retrieval pipeline, indexing worker
//! and analytics. Binaries install an exporter; library code only records.

use metrics::{counter, describe_counter, describe_histogram, gauge, describe_gauge, histogram, Unit};
use std::time::{Duration, Instant};

/// Prefix for all SecondBrain RAG metrics
pub const METRICS_PREFIX: &str = "secondbrain";

/// Buckets for pipeline stage latency (in seconds)
pub const STAGE_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s, the default stage timeout
];

fn name(suffix: &str) -> String {
    format!("{}_{}", METRICS_PREFIX, suffix)
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Retrieval
    describe_counter!(name("retrievals_total"), Unit::Count, "Total retrieve_context calls");
    describe_histogram!(
        name("retrieval_duration_seconds"),
        Unit::Seconds,
        "End-to-end retrieval latency in seconds"
    );
    describe_histogram!(
        name("stage_duration_seconds"),
        Unit::Seconds,
        "Per-stage retrieval latency in seconds"
    );
    describe_counter!(
        name("stage_degradations_total"),
        Unit::Count,
        "Stages that failed or timed out and fell back"
    );
    describe_gauge!(name("retrieval_results_count"), Unit::Count, "Notes in the last context");
    describe_counter!(name("rerank_candidates_total"), Unit::Count, "Rerank candidates by outcome");

    // Providers
    describe_counter!(name("embedding_requests_total"), Unit::Count, "Embedding API requests");
    describe_histogram!(
        name("embedding_duration_seconds"),
        Unit::Seconds,
        "Embedding latency in seconds"
    );
    describe_counter!(name("embedding_errors_total"), Unit::Count, "Embedding API errors");
    describe_counter!(name("generation_requests_total"), Unit::Count, "Structured generation calls");
    describe_histogram!(
        name("generation_duration_seconds"),
        Unit::Seconds,
        "Structured generation latency in seconds"
    );

    // Indexing
    describe_counter!(name("notes_indexed_total"), Unit::Count, "Notes indexed by outcome");
    describe_counter!(name("chunks_created_total"), Unit::Count, "Chunks written");
    describe_histogram!(
        name("note_index_duration_seconds"),
        Unit::Seconds,
        "Per-note indexing latency in seconds"
    );
    describe_counter!(name("indexing_jobs_total"), Unit::Count, "Indexing jobs by final status");

    // Analytics
    describe_counter!(name("feedback_total"), Unit::Count, "Feedback attached to query logs");
    describe_gauge!(name("topic_clusters"), Unit::Count, "Clusters from the last clustering run");

    tracing::info!("Metrics registered");
}

/// Times one pipeline stage; the histogram is written on `finish`
pub struct StageTimer {
    start: Instant,
    stage: &'static str,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self { start: Instant::now(), stage }
    }

    /// Record the stage and return elapsed milliseconds
    pub fn finish(self) -> u64 {
        let elapsed = self.start.elapsed();
        histogram!(name("stage_duration_seconds"), "stage" => self.stage).record(elapsed.as_secs_f64());
        elapsed.as_millis() as u64
    }
}

/// Record a completed retrieval
pub fn record_retrieval(elapsed: Duration, result_count: usize, retrieval_skipped: bool) {
    let outcome = if retrieval_skipped { "skipped" } else { "retrieved" };
    counter!(name("retrievals_total"), "outcome" => outcome).increment(1);
    histogram!(name("retrieval_duration_seconds"), "outcome" => outcome).record(elapsed.as_secs_f64());
    gauge!(name("retrieval_results_count")).set(result_count as f64);
}

pub fn record_degradation(stage: &str) {
    counter!(name("stage_degradations_total"), "stage" => stage.to_string()).increment(1);
}

pub fn record_rerank(kept: usize, dropped: usize, failed: usize) {
    counter!(name("rerank_candidates_total"), "outcome" => "kept").increment(kept as u64);
    counter!(name("rerank_candidates_total"), "outcome" => "below_threshold").increment(dropped as u64);
    counter!(name("rerank_candidates_total"), "outcome" => "failed").increment(failed as u64);
}

/// Helper to record embedding metrics
pub fn record_embedding(model: &str, batch_size: usize, elapsed: Duration, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        name("embedding_requests_total"),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(name("embedding_duration_seconds"), "model" => model.to_string())
            .record(elapsed.as_secs_f64());
        tracing::trace!(model, batch_size, "embedding batch recorded");
    } else {
        counter!(name("embedding_errors_total"), "model" => model.to_string()).increment(1);
    }
}

pub fn record_generation(provider: &str, schema: &str, elapsed: Duration, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        name("generation_requests_total"),
        "provider" => provider.to_string(),
        "schema" => schema.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        name("generation_duration_seconds"),
        "provider" => provider.to_string(),
        "schema" => schema.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Helper to record per-note indexing metrics
pub fn record_note_indexed(elapsed: Duration, chunks_created: usize, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(name("notes_indexed_total"), "status" => status).increment(1);
    if success {
        counter!(name("chunks_created_total")).increment(chunks_created as u64);
    }
    histogram!(name("note_index_duration_seconds")).record(elapsed.as_secs_f64());
}

pub fn record_job_finished(status: &str) {
    counter!(name("indexing_jobs_total"), "status" => status.to_string()).increment(1);
}

pub fn record_feedback(feedback: &str) {
    counter!(name("feedback_total"), "feedback" => feedback.to_string()).increment(1);
}

pub fn record_clusters(count: usize) {
    gauge!(name("topic_clusters")).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in STAGE_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_stage_timer_reports_elapsed() {
        let timer = StageTimer::start("embedding");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.finish() >= 5);
    }

    #[test]
    fn test_prefixed_names() {
        assert_eq!(name("feedback_total"), "secondbrain_feedback_total");
    }
}
