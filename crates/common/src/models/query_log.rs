//! Retrieval analytics records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// Thumbs up / down attached after the fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    ThumbsUp,
    ThumbsDown,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::ThumbsUp => "thumbs_up",
            Feedback::ThumbsDown => "thumbs_down",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "thumbs_up" | "up" => Ok(Feedback::ThumbsUp),
            "thumbs_down" | "down" => Ok(Feedback::ThumbsDown),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown feedback '{}'", other),
            }),
        }
    }
}

/// Per-stage wall-clock timings in milliseconds; `None` when the stage did not run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub expansion_ms: Option<u64>,
    pub embedding_ms: Option<u64>,
    pub vector_search_ms: Option<u64>,
    pub lexical_search_ms: Option<u64>,
    pub rerank_ms: Option<u64>,
    pub total_ms: u64,
}

/// Score aggregates over the final result set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub avg_cosine_score: Option<f32>,
    pub top_cosine_score: Option<f32>,
    pub avg_rerank_score: Option<f32>,
    pub top_rerank_score: Option<f32>,
}

impl ScoreSummary {
    pub fn from_scores(cosine: &[f32], rerank: &[f32]) -> Self {
        Self {
            avg_cosine_score: mean(cosine),
            top_cosine_score: max(cosine),
            avg_rerank_score: mean(rerank),
            top_rerank_score: max(rerank),
        }
    }
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

fn max(values: &[f32]) -> Option<f32> {
    values.iter().copied().fold(None, |acc, v| match acc {
        Some(m) if m >= v => Some(m),
        _ => Some(v),
    })
}

/// One row per retrieval invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagQueryLog {
    pub id: Uuid,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub query: String,
    pub timings: StageTimings,
    pub retrieved_count: u32,
    pub final_count: u32,
    pub scores: ScoreSummary,
    /// Feature flags active for this query
    pub features: Vec<String>,
    /// Stages that failed and fell back
    pub degraded_stages: Vec<String>,
    pub hyde_key_concepts: Vec<String>,
    pub user_feedback: Option<Feedback>,
    pub feedback_category: Option<String>,
    pub feedback_comment: Option<String>,
    pub feedback_at: Option<DateTime<Utc>>,
    pub topic_cluster: Option<i32>,
    pub topic_label: Option<String>,
    pub query_embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl RagQueryLog {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            conversation_id: None,
            query: query.into(),
            timings: StageTimings::default(),
            retrieved_count: 0,
            final_count: 0,
            scores: ScoreSummary::default(),
            features: Vec::new(),
            degraded_stages: Vec::new(),
            hyde_key_concepts: Vec::new(),
            user_feedback: None,
            feedback_category: None,
            feedback_comment: None,
            feedback_at: None,
            topic_cluster: None,
            topic_label: None,
            query_embedding: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_feedback(&self) -> bool {
        self.user_feedback.is_some()
    }
}

/// Feedback payload for `QueryLogStore::attach_feedback`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackInput {
    pub feedback: Feedback,
    pub category: Option<String>,
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_summary() {
        let summary = ScoreSummary::from_scores(&[0.5, 0.9, 0.7], &[]);
        assert_eq!(summary.top_cosine_score, Some(0.9));
        assert!((summary.avg_cosine_score.unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(summary.avg_rerank_score, None);
    }

    #[test]
    fn test_feedback_parse() {
        assert_eq!(Feedback::parse("up").unwrap(), Feedback::ThumbsUp);
        assert_eq!(Feedback::parse("thumbs_down").unwrap(), Feedback::ThumbsDown);
        assert!(Feedback::parse("meh").is_err());
    }
}
