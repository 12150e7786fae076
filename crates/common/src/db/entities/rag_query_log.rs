//! RAG query log entity

use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::models::{Feedback, RagQueryLog, ScoreSummary, StageTimings};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rag_query_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: String,

    pub conversation_id: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub query: String,

    // Stage timings (ms)
    pub expansion_ms: Option<i64>,
    pub embedding_ms: Option<i64>,
    pub vector_search_ms: Option<i64>,
    pub lexical_search_ms: Option<i64>,
    pub rerank_ms: Option<i64>,
    pub total_ms: i64,

    pub retrieved_count: i32,
    pub final_count: i32,

    pub avg_cosine_score: Option<f32>,
    pub top_cosine_score: Option<f32>,
    pub avg_rerank_score: Option<f32>,
    pub top_rerank_score: Option<f32>,

    pub features: Json,
    pub degraded_stages: Json,
    pub hyde_key_concepts: Json,

    pub user_feedback: Option<String>,
    pub feedback_category: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub feedback_comment: Option<String>,
    pub feedback_at: Option<DateTimeWithTimeZone>,

    pub topic_cluster: Option<i32>,
    pub topic_label: Option<String>,

    /// JSON array of floats
    pub query_embedding: Option<Json>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

fn ms(v: Option<u64>) -> Option<i64> {
    v.map(|v| v.min(i64::MAX as u64) as i64)
}

fn strings(v: Json) -> Vec<String> {
    serde_json::from_value(v).unwrap_or_default()
}

impl From<Model> for RagQueryLog {
    fn from(row: Model) -> Self {
        RagQueryLog {
            id: row.id,
            user_id: row.user_id,
            conversation_id: row.conversation_id,
            query: row.query,
            timings: StageTimings {
                expansion_ms: row.expansion_ms.map(|v| v.max(0) as u64),
                embedding_ms: row.embedding_ms.map(|v| v.max(0) as u64),
                vector_search_ms: row.vector_search_ms.map(|v| v.max(0) as u64),
                lexical_search_ms: row.lexical_search_ms.map(|v| v.max(0) as u64),
                rerank_ms: row.rerank_ms.map(|v| v.max(0) as u64),
                total_ms: row.total_ms.max(0) as u64,
            },
            retrieved_count: row.retrieved_count.max(0) as u32,
            final_count: row.final_count.max(0) as u32,
            scores: ScoreSummary {
                avg_cosine_score: row.avg_cosine_score,
                top_cosine_score: row.top_cosine_score,
                avg_rerank_score: row.avg_rerank_score,
                top_rerank_score: row.top_rerank_score,
            },
            features: strings(row.features),
            degraded_stages: strings(row.degraded_stages),
            hyde_key_concepts: strings(row.hyde_key_concepts),
            user_feedback: row.user_feedback.as_deref().and_then(|f| Feedback::parse(f).ok()),
            feedback_category: row.feedback_category,
            feedback_comment: row.feedback_comment,
            feedback_at: row.feedback_at.map(|t| t.with_timezone(&chrono::Utc)),
            topic_cluster: row.topic_cluster,
            topic_label: row.topic_label,
            query_embedding: row.query_embedding.and_then(|v| serde_json::from_value(v).ok()),
            created_at: row.created_at.with_timezone(&chrono::Utc),
        }
    }
}

impl From<&RagQueryLog> for ActiveModel {
    fn from(log: &RagQueryLog) -> Self {
        ActiveModel {
            id: Set(log.id),
            user_id: Set(log.user_id.clone()),
            conversation_id: Set(log.conversation_id.clone()),
            query: Set(log.query.clone()),
            expansion_ms: Set(ms(log.timings.expansion_ms)),
            embedding_ms: Set(ms(log.timings.embedding_ms)),
            vector_search_ms: Set(ms(log.timings.vector_search_ms)),
            lexical_search_ms: Set(ms(log.timings.lexical_search_ms)),
            rerank_ms: Set(ms(log.timings.rerank_ms)),
            total_ms: Set(ms(Some(log.timings.total_ms)).unwrap_or(0)),
            retrieved_count: Set(log.retrieved_count as i32),
            final_count: Set(log.final_count as i32),
            avg_cosine_score: Set(log.scores.avg_cosine_score),
            top_cosine_score: Set(log.scores.top_cosine_score),
            avg_rerank_score: Set(log.scores.avg_rerank_score),
            top_rerank_score: Set(log.scores.top_rerank_score),
            features: Set(serde_json::json!(log.features)),
            degraded_stages: Set(serde_json::json!(log.degraded_stages)),
            hyde_key_concepts: Set(serde_json::json!(log.hyde_key_concepts)),
            user_feedback: Set(log.user_feedback.map(|f| f.as_str().to_string())),
            feedback_category: Set(log.feedback_category.clone()),
            feedback_comment: Set(log.feedback_comment.clone()),
            feedback_at: Set(log.feedback_at.map(Into::into)),
            topic_cluster: Set(log.topic_cluster),
            topic_label: Set(log.topic_label.clone()),
            query_embedding: Set(log.query_embedding.as_ref().map(|v| serde_json::json!(v))),
            created_at: Set(log.created_at.into()),
        }
    }
}
