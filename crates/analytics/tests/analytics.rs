//! Feedback, aggregates and clustering over the in-memory log store

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_test::assert_ok;
use uuid::Uuid;

use secondbrain_analytics::{FeedbackService, QueryInsights, TopicClusterer};
use secondbrain_common::config::AnalyticsConfig;
use secondbrain_common::embeddings::{Embedder, MockEmbedder};
use secondbrain_common::errors::AppError;
use secondbrain_common::models::{Feedback, FeedbackInput, RagQueryLog};
use secondbrain_common::store::memory::InMemoryStore;
use secondbrain_common::store::QueryLogStore;

const USER: &str = "user-1";

const BREAD: &[&str] = &[
    "sourdough starter feeding schedule",
    "how wet should sourdough dough be",
    "sourdough starter smells sour",
    "best flour for sourdough bread",
];

const RUST: &[&str] = &[
    "rust borrow checker lifetimes",
    "why does the rust borrow checker complain",
    "rust lifetimes in structs",
    "rust borrow rules for closures",
];

fn thumbs(feedback: Feedback) -> FeedbackInput {
    FeedbackInput {
        feedback,
        category: None,
        comment: None,
    }
}

async fn seed_log(store: &InMemoryStore, user: &str, query: &str, embedder: Option<&MockEmbedder>) -> RagQueryLog {
    let mut log = RagQueryLog::new(user, query);
    log.timings.total_ms = 120;
    log.final_count = 3;
    if let Some(embedder) = embedder {
        log.query_embedding = Some(embedder.embed(query).await.unwrap());
    }
    store.insert_log(&log).await.unwrap();
    log
}

#[tokio::test]
async fn test_feedback_is_attached_once() {
    let store = Arc::new(InMemoryStore::new());
    let service = FeedbackService::new(store.clone());
    let log = seed_log(&store, USER, "sourdough starter", None).await;

    let input = FeedbackInput {
        feedback: Feedback::ThumbsDown,
        category: Some(" Irrelevant ".into()),
        comment: Some("wrong note".into()),
    };
    let updated = service.attach_feedback(log.id, USER, input).await.unwrap();
    assert_eq!(updated.user_feedback, Some(Feedback::ThumbsDown));
    assert_eq!(updated.feedback_category.as_deref(), Some("irrelevant"));
    assert!(updated.feedback_at.is_some());

    let err = service
        .attach_feedback(log.id, USER, thumbs(Feedback::ThumbsUp))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::FeedbackAlreadyRecorded { .. }));
    assert!(err.is_conflict());

    let stored = store.find_log(log.id).await.unwrap().unwrap();
    assert_eq!(stored.user_feedback, Some(Feedback::ThumbsDown));
}

#[tokio::test]
async fn test_feedback_on_foreign_or_missing_log_is_not_found() {
    let store = Arc::new(InMemoryStore::new());
    let service = FeedbackService::new(store.clone());
    let log = seed_log(&store, "someone-else", "tax forms", None).await;

    let err = service
        .attach_feedback(log.id, USER, thumbs(Feedback::ThumbsUp))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::QueryLogNotFound { .. }));

    let err = service
        .attach_feedback(Uuid::now_v7(), USER, thumbs(Feedback::ThumbsUp))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::QueryLogNotFound { .. }));
}

#[tokio::test]
async fn test_low_feedback_queries_lists_thumbs_down_only() {
    let store = Arc::new(InMemoryStore::new());
    let service = FeedbackService::new(store.clone());

    let bad = seed_log(&store, USER, "where is my passport scan", None).await;
    let good = seed_log(&store, USER, "sourdough hydration", None).await;
    seed_log(&store, USER, "no feedback here", None).await;
    service.attach_feedback(bad.id, USER, thumbs(Feedback::ThumbsDown)).await.unwrap();
    service.attach_feedback(good.id, USER, thumbs(Feedback::ThumbsUp)).await.unwrap();

    let low = service.low_feedback_queries(USER, 10).await.unwrap();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].log_id, bad.id);
    assert_eq!(low[0].query, "where is my passport scan");
}

#[tokio::test]
async fn test_performance_summary_respects_since() {
    let store = Arc::new(InMemoryStore::new());
    let insights = QueryInsights::new(store.clone());
    let feedback = FeedbackService::new(store.clone());

    let mut old = RagQueryLog::new(USER, "old query");
    old.created_at = Utc::now() - Duration::days(30);
    old.timings.total_ms = 9000;
    store.insert_log(&old).await.unwrap();

    let recent = seed_log(&store, USER, "recent query", None).await;
    seed_log(&store, USER, "another recent query", None).await;
    feedback.attach_feedback(recent.id, USER, thumbs(Feedback::ThumbsUp)).await.unwrap();

    let all = insights.performance_summary(USER, None).await.unwrap();
    assert_eq!(all.total_queries, 3);

    let week = insights
        .performance_summary(USER, Some(Utc::now() - Duration::days(7)))
        .await
        .unwrap();
    assert_eq!(week.total_queries, 2);
    assert_eq!(week.timings.total_ms, Some(120.0));
    assert_eq!(week.thumbs_up, 1);
    assert_eq!(week.thumbs_up_rate, Some(1.0));
}

fn config() -> AnalyticsConfig {
    AnalyticsConfig {
        min_clusters: 2,
        max_clusters: 20,
        batch_limit: 1000,
        seed: 42,
        max_iterations: 50,
    }
}

async fn seed_topics(store: &InMemoryStore) -> (Vec<Uuid>, Vec<Uuid>) {
    let embedder = MockEmbedder::new(256);
    let mut bread = Vec::new();
    for q in BREAD {
        bread.push(seed_log(store, USER, q, Some(&embedder)).await.id);
    }
    let mut rust = Vec::new();
    for q in RUST {
        rust.push(seed_log(store, USER, q, Some(&embedder)).await.id);
    }
    (bread, rust)
}

#[tokio::test]
async fn test_clustering_groups_and_labels_topics() {
    let store = Arc::new(InMemoryStore::new());
    let (bread, rust) = seed_topics(&store).await;

    let report = assert_ok!(TopicClusterer::new(store.clone(), config()).run(Some(USER)).await);
    assert_eq!(report.logs_considered, 8);
    assert_eq!(report.topics.len(), 2);
    assert_eq!(report.topics.iter().map(|t| t.size).sum::<usize>(), 8);

    let cluster_of = |log: &RagQueryLog| log.topic_cluster.unwrap();
    let mut bread_clusters = Vec::new();
    for id in &bread {
        bread_clusters.push(cluster_of(&store.find_log(*id).await.unwrap().unwrap()));
    }
    let mut rust_clusters = Vec::new();
    for id in &rust {
        rust_clusters.push(cluster_of(&store.find_log(*id).await.unwrap().unwrap()));
    }
    assert!(bread_clusters.iter().all(|c| *c == bread_clusters[0]));
    assert!(rust_clusters.iter().all(|c| *c == rust_clusters[0]));
    assert_ne!(bread_clusters[0], rust_clusters[0]);

    let bread_label = store.find_log(bread[0]).await.unwrap().unwrap().topic_label.unwrap();
    let rust_label = store.find_log(rust[0]).await.unwrap().unwrap().topic_label.unwrap();
    assert!(bread_label.starts_with("sourdough"));
    assert!(rust_label.starts_with("rust"));

    let distribution = QueryInsights::new(store.clone()).topic_distribution(USER).await.unwrap();
    assert_eq!(distribution.len(), 2);
    assert_eq!(distribution.iter().map(|t| t.queries).sum::<usize>(), 8);
}

#[tokio::test]
async fn test_clustering_is_repeatable() {
    let store = Arc::new(InMemoryStore::new());
    seed_topics(&store).await;
    let clusterer = TopicClusterer::new(store.clone(), config());

    let first = clusterer.run(Some(USER)).await.unwrap();
    let second = clusterer.run(Some(USER)).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_clustering_needs_two_embedded_queries() {
    let store = Arc::new(InMemoryStore::new());
    let embedder = MockEmbedder::new(64);
    let only = seed_log(&store, USER, "sourdough", Some(&embedder)).await;
    seed_log(&store, USER, "no embedding", None).await;

    let report = TopicClusterer::new(store.clone(), config()).run(Some(USER)).await.unwrap();
    assert_eq!(report.logs_considered, 1);
    assert!(report.topics.is_empty());
    assert_eq!(store.find_log(only.id).await.unwrap().unwrap().topic_cluster, None);
}

#[tokio::test]
async fn test_clustering_skips_mismatched_dimensions() {
    let store = Arc::new(InMemoryStore::new());
    seed_topics(&store).await;
    let odd = seed_log(&store, USER, "legacy embedding", Some(&MockEmbedder::new(32))).await;

    let report = TopicClusterer::new(store.clone(), config()).run(Some(USER)).await.unwrap();
    assert_eq!(report.logs_considered, 8);
    assert_eq!(store.find_log(odd.id).await.unwrap().unwrap().topic_cluster, None);
}
