//! Aggregates over retrieval logs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use secondbrain_common::errors::Result;
use secondbrain_common::models::{Feedback, RagQueryLog};
use secondbrain_common::store::QueryLogStore;

/// Upper bound on logs scanned per aggregate
const SUMMARY_WINDOW: usize = 10_000;

/// Average stage latencies in milliseconds over the logs where the stage ran
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AverageTimings {
    pub total_ms: Option<f64>,
    pub expansion_ms: Option<f64>,
    pub embedding_ms: Option<f64>,
    pub vector_search_ms: Option<f64>,
    pub lexical_search_ms: Option<f64>,
    pub rerank_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_queries: usize,
    pub timings: AverageTimings,
    pub avg_retrieved: Option<f64>,
    pub avg_final: Option<f64>,
    pub avg_cosine_score: Option<f64>,
    pub avg_rerank_score: Option<f64>,
    pub thumbs_up: usize,
    pub thumbs_down: usize,
    /// Share of feedback that was positive; None without feedback
    pub thumbs_up_rate: Option<f64>,
    /// Stage name to number of queries where it degraded
    pub degraded_stages: BTreeMap<String, usize>,
    /// Feature name to number of queries it was active for
    pub features: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicCount {
    pub cluster: i32,
    pub label: String,
    pub queries: usize,
    pub thumbs_down: usize,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

pub fn summarize(logs: &[RagQueryLog]) -> PerformanceSummary {
    let mut total = Mean::default();
    let mut expansion = Mean::default();
    let mut embedding = Mean::default();
    let mut vector = Mean::default();
    let mut lexical = Mean::default();
    let mut rerank_ms = Mean::default();
    let mut retrieved = Mean::default();
    let mut final_count = Mean::default();
    let mut cosine = Mean::default();
    let mut rerank_score = Mean::default();

    let mut summary = PerformanceSummary {
        total_queries: logs.len(),
        ..Default::default()
    };

    for log in logs {
        let t = &log.timings;
        total.add(Some(t.total_ms as f64));
        expansion.add(t.expansion_ms.map(|v| v as f64));
        embedding.add(t.embedding_ms.map(|v| v as f64));
        vector.add(t.vector_search_ms.map(|v| v as f64));
        lexical.add(t.lexical_search_ms.map(|v| v as f64));
        rerank_ms.add(t.rerank_ms.map(|v| v as f64));
        retrieved.add(Some(log.retrieved_count as f64));
        final_count.add(Some(log.final_count as f64));
        cosine.add(log.scores.avg_cosine_score.map(f64::from));
        rerank_score.add(log.scores.avg_rerank_score.map(f64::from));

        match log.user_feedback {
            Some(Feedback::ThumbsUp) => summary.thumbs_up += 1,
            Some(Feedback::ThumbsDown) => summary.thumbs_down += 1,
            None => {}
        }
        for stage in &log.degraded_stages {
            *summary.degraded_stages.entry(stage.clone()).or_default() += 1;
        }
        for feature in &log.features {
            *summary.features.entry(feature.clone()).or_default() += 1;
        }
    }

    summary.timings = AverageTimings {
        total_ms: total.get(),
        expansion_ms: expansion.get(),
        embedding_ms: embedding.get(),
        vector_search_ms: vector.get(),
        lexical_search_ms: lexical.get(),
        rerank_ms: rerank_ms.get(),
    };
    summary.avg_retrieved = retrieved.get();
    summary.avg_final = final_count.get();
    summary.avg_cosine_score = cosine.get();
    summary.avg_rerank_score = rerank_score.get();

    let rated = summary.thumbs_up + summary.thumbs_down;
    summary.thumbs_up_rate = (rated > 0).then(|| summary.thumbs_up as f64 / rated as f64);
    summary
}

/// Queries per assigned topic, largest first; unclustered logs are left out
pub fn topic_counts(logs: &[RagQueryLog]) -> Vec<TopicCount> {
    let mut by_cluster: BTreeMap<i32, TopicCount> = BTreeMap::new();
    for log in logs {
        let (Some(cluster), Some(label)) = (log.topic_cluster, log.topic_label.as_ref()) else {
            continue;
        };
        let entry = by_cluster.entry(cluster).or_insert_with(|| TopicCount {
            cluster,
            label: label.clone(),
            queries: 0,
            thumbs_down: 0,
        });
        entry.queries += 1;
        if log.user_feedback == Some(Feedback::ThumbsDown) {
            entry.thumbs_down += 1;
        }
    }

    let mut counts: Vec<TopicCount> = by_cluster.into_values().collect();
    counts.sort_by(|a, b| b.queries.cmp(&a.queries).then_with(|| a.cluster.cmp(&b.cluster)));
    counts
}

/// Read-side aggregates for one user
#[derive(Clone)]
pub struct QueryInsights {
    logs: Arc<dyn QueryLogStore>,
}

impl QueryInsights {
    pub fn new(logs: Arc<dyn QueryLogStore>) -> Self {
        Self { logs }
    }

    #[instrument(skip(self))]
    pub async fn performance_summary(&self, user_id: &str, since: Option<DateTime<Utc>>) -> Result<PerformanceSummary> {
        let logs = self.logs.list_logs(user_id, since, SUMMARY_WINDOW).await?;
        Ok(summarize(&logs))
    }

    #[instrument(skip(self))]
    pub async fn topic_distribution(&self, user_id: &str) -> Result<Vec<TopicCount>> {
        let logs = self.logs.list_logs(user_id, None, SUMMARY_WINDOW).await?;
        Ok(topic_counts(&logs))
    }
}
