//! User feedback on retrievals
//!
//! Feedback is attached to a `RagQueryLog` after the fact, exactly once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use secondbrain_common::errors::{AppError, Result};
use secondbrain_common::metrics;
use secondbrain_common::models::{FeedbackInput, RagQueryLog};
use secondbrain_common::store::QueryLogStore;

const MAX_COMMENT_CHARS: usize = 2000;
const MAX_CATEGORY_CHARS: usize = 64;
const MAX_LIST_LIMIT: usize = 500;

/// A thumbs-down query with what is known about how it was served
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowFeedbackQuery {
    pub log_id: Uuid,
    pub query: String,
    pub category: Option<String>,
    pub comment: Option<String>,
    pub final_count: u32,
    pub top_cosine_score: Option<f32>,
    pub top_rerank_score: Option<f32>,
    pub degraded_stages: Vec<String>,
    pub topic_label: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<RagQueryLog> for LowFeedbackQuery {
    fn from(log: RagQueryLog) -> Self {
        Self {
            log_id: log.id,
            query: log.query,
            category: log.feedback_category,
            comment: log.feedback_comment,
            final_count: log.final_count,
            top_cosine_score: log.scores.top_cosine_score,
            top_rerank_score: log.scores.top_rerank_score,
            degraded_stages: log.degraded_stages,
            topic_label: log.topic_label,
            created_at: log.created_at,
        }
    }
}

#[derive(Clone)]
pub struct FeedbackService {
    logs: Arc<dyn QueryLogStore>,
}

impl FeedbackService {
    pub fn new(logs: Arc<dyn QueryLogStore>) -> Self {
        Self { logs }
    }

    /// Attach feedback to one of the user's logs
    ///
    /// A second attachment is `FeedbackAlreadyRecorded`; a log of another
    /// user is reported as not found.
    #[instrument(skip(self, input), fields(feedback = input.feedback.as_str()))]
    pub async fn attach_feedback(&self, log_id: Uuid, user_id: &str, input: FeedbackInput) -> Result<RagQueryLog> {
        let input = normalize(input)?;
        let log = self.logs.attach_feedback(log_id, user_id, &input).await?;
        metrics::record_feedback(input.feedback.as_str());
        info!("Feedback recorded");
        Ok(log)
    }

    /// Thumbs-down queries, newest first
    pub async fn low_feedback_queries(&self, user_id: &str, limit: usize) -> Result<Vec<LowFeedbackQuery>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let logs = self.logs.low_feedback_logs(user_id, limit).await?;
        Ok(logs.into_iter().map(LowFeedbackQuery::from).collect())
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize(input: FeedbackInput) -> Result<FeedbackInput> {
    let category = trimmed(input.category);
    let comment = trimmed(input.comment);

    if category.as_ref().is_some_and(|c| c.chars().count() > MAX_CATEGORY_CHARS) {
        return Err(AppError::validation(
            "category",
            format!("category must be at most {} characters", MAX_CATEGORY_CHARS),
        ));
    }
    if comment.as_ref().is_some_and(|c| c.chars().count() > MAX_COMMENT_CHARS) {
        return Err(AppError::validation(
            "comment",
            format!("comment must be at most {} characters", MAX_COMMENT_CHARS),
        ));
    }

    Ok(FeedbackInput {
        feedback: input.feedback,
        category: category.map(|c| c.to_lowercase()),
        comment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secondbrain_common::models::Feedback;

    fn input(category: Option<&str>, comment: Option<&str>) -> FeedbackInput {
        FeedbackInput {
            feedback: Feedback::ThumbsDown,
            category: category.map(String::from),
            comment: comment.map(String::from),
        }
    }

    #[test]
    fn test_normalize_trims_and_lowercases() {
        let normalized = normalize(input(Some("  Irrelevant "), Some("   "))).unwrap();
        assert_eq!(normalized.category.as_deref(), Some("irrelevant"));
        assert_eq!(normalized.comment, None);
    }

    #[test]
    fn test_normalize_rejects_long_comment() {
        let long = "x".repeat(MAX_COMMENT_CHARS + 1);
        let err = normalize(input(None, Some(&long))).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
