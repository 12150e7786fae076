//! Topic clustering
//!
//! Offline batch job over logged query embeddings. Queries are grouped
//! with seeded spherical k-means (cosine similarity, k-means++ seeding),
//! each cluster is labelled with its most frequent content words, and the
//! topic is written back onto every log row.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use secondbrain_common::config::AnalyticsConfig;
use secondbrain_common::embeddings::cosine_similarity;
use secondbrain_common::errors::Result;
use secondbrain_common::metrics;
use secondbrain_common::models::RagQueryLog;
use secondbrain_common::store::QueryLogStore;

const LABEL_TERMS: usize = 3;
const RESTARTS: usize = 5;
const FALLBACK_LABEL: &str = "misc";

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "in", "on", "at", "to", "for", "of",
    "with", "by", "from", "and", "or", "but", "not", "this", "that", "these", "those", "it", "its",
    "as", "do", "does", "did", "has", "have", "had", "can", "could", "will", "would", "should",
    "may", "might", "what", "which", "who", "whom", "when", "where", "why", "how", "about", "my",
    "me", "i", "you", "your", "we", "our", "they", "their", "there", "here", "notes", "note",
    "any", "all", "some", "tell", "show", "find",
];

/// Number of clusters for `n` points: sqrt(n/2) within `[min, max]`, never above `n`
pub fn choose_k(n: usize, min_clusters: usize, max_clusters: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let lo = min_clusters.min(max_clusters).max(1);
    let hi = max_clusters.max(min_clusters).max(1);
    let k = ((n as f64 / 2.0).sqrt().round() as usize).clamp(lo, hi);
    k.min(n)
}

fn normalized(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

/// Index of the most similar centroid; ties go to the lowest index
fn nearest(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_sim = f32::NEG_INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let sim = cosine_similarity(point, c);
        if sim > best_sim {
            best = i;
            best_sim = sim;
        }
    }
    best
}

/// k-means++: later centers are drawn with probability proportional to
/// squared cosine distance from the closest chosen center
fn seed_centroids(points: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];

    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| {
                let closest = centroids
                    .iter()
                    .map(|c| cosine_similarity(p, c))
                    .fold(f32::NEG_INFINITY, f32::max);
                let distance = (1.0 - closest).max(0.0) as f64;
                distance * distance
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let pick = if total <= f64::EPSILON {
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        };
        centroids.push(points[pick].clone());
    }
    centroids
}

/// One Lloyd run from k-means++ seeds; returns assignments and cohesion
/// (summed similarity of each point to its centroid)
fn lloyd(points: &[Vec<f32>], k: usize, max_iterations: usize, rng: &mut StdRng) -> (Vec<usize>, f32) {
    let dimension = points[0].len();
    let mut centroids = seed_centroids(points, k, rng);
    let mut assignments: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();

    for iteration in 0..max_iterations {
        let mut sums = vec![vec![0.0f32; dimension]; k];
        let mut counts = vec![0usize; k];
        for (p, &cluster) in points.iter().zip(&assignments) {
            counts[cluster] += 1;
            for (s, x) in sums[cluster].iter_mut().zip(p) {
                *s += x;
            }
        }
        for (cluster, sum) in sums.into_iter().enumerate() {
            // an empty cluster keeps its previous centroid
            if counts[cluster] > 0 {
                centroids[cluster] = normalized(&sum);
            }
        }

        let next: Vec<usize> = points.iter().map(|p| nearest(p, &centroids)).collect();
        if next == assignments {
            debug!(iteration, "k-means converged");
            break;
        }
        assignments = next;
    }

    let cohesion = points
        .iter()
        .zip(&assignments)
        .map(|(p, &cluster)| cosine_similarity(p, &centroids[cluster]))
        .sum();
    (assignments, cohesion)
}

/// Cluster assignment per point, in `0..k`; best of several seeded restarts
pub fn kmeans(vectors: &[Vec<f32>], k: usize, max_iterations: usize, seed: u64) -> Vec<usize> {
    if vectors.is_empty() || k == 0 {
        return Vec::new();
    }
    let points: Vec<Vec<f32>> = vectors.iter().map(|v| normalized(v)).collect();
    let k = k.min(points.len());

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<(Vec<usize>, f32)> = None;
    for _ in 0..RESTARTS {
        let (assignments, cohesion) = lloyd(&points, k, max_iterations, &mut rng);
        if best.as_ref().map_or(true, |(_, b)| cohesion > *b) {
            best = Some((assignments, cohesion));
        }
    }
    best.map(|(assignments, _)| assignments).unwrap_or_default()
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
}

/// Most frequent content words across the queries, joined with " / "
pub fn label_for<'a>(queries: impl IntoIterator<Item = &'a str>) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for query in queries {
        for term in terms(query) {
            *counts.entry(term).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    if ranked.is_empty() {
        return FALLBACK_LABEL.to_string();
    }
    ranked
        .into_iter()
        .take(LABEL_TERMS)
        .map(|(term, _)| term)
        .collect::<Vec<_>>()
        .join(" / ")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicSummary {
    pub cluster: i32,
    pub label: String,
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusteringReport {
    pub logs_considered: usize,
    /// Largest first
    pub topics: Vec<TopicSummary>,
}

pub struct TopicClusterer {
    logs: Arc<dyn QueryLogStore>,
    config: AnalyticsConfig,
}

impl TopicClusterer {
    pub fn new(logs: Arc<dyn QueryLogStore>, config: AnalyticsConfig) -> Self {
        Self { logs, config }
    }

    /// Cluster logged queries of one user, or of everyone when `user_id` is None
    #[instrument(skip(self))]
    pub async fn run(&self, user_id: Option<&str>) -> Result<ClusteringReport> {
        let logs = self.logs.logs_for_clustering(user_id, self.config.batch_limit).await?;
        let logs = Self::usable(logs);

        if logs.len() < 2 {
            info!(logs = logs.len(), "Not enough embedded queries to cluster");
            return Ok(ClusteringReport {
                logs_considered: logs.len(),
                topics: Vec::new(),
            });
        }

        let vectors: Vec<Vec<f32>> = logs
            .iter()
            .filter_map(|l| l.query_embedding.clone())
            .collect();
        let k = choose_k(vectors.len(), self.config.min_clusters, self.config.max_clusters);
        let assignments = kmeans(&vectors, k, self.config.max_iterations, self.config.seed);

        let mut groups: Vec<Vec<&RagQueryLog>> = vec![Vec::new(); k];
        for (log, &cluster) in logs.iter().zip(&assignments) {
            groups[cluster].push(log);
        }
        groups.retain(|g| !g.is_empty());
        // stable ids: largest cluster first
        groups.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut topics = Vec::with_capacity(groups.len());
        for (id, members) in groups.iter().enumerate() {
            let cluster = id as i32;
            let label = label_for(members.iter().map(|l| l.query.as_str()));
            for log in members {
                self.logs.assign_topic(log.id, cluster, &label).await?;
            }
            topics.push(TopicSummary {
                cluster,
                label,
                size: members.len(),
            });
        }

        metrics::record_clusters(topics.len());
        info!(logs = logs.len(), clusters = topics.len(), "Topic clustering finished");
        Ok(ClusteringReport {
            logs_considered: logs.len(),
            topics,
        })
    }

    /// Keep logs whose embedding matches the dominant dimension
    fn usable(logs: Vec<RagQueryLog>) -> Vec<RagQueryLog> {
        let mut dims: HashMap<usize, usize> = HashMap::new();
        for len in logs.iter().filter_map(|l| l.query_embedding.as_ref().map(Vec::len)) {
            *dims.entry(len).or_default() += 1;
        }
        let Some(dimension) = dims
            .into_iter()
            .filter(|(len, _)| *len > 0)
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(len, _)| len)
        else {
            return Vec::new();
        };

        let total = logs.len();
        let kept: Vec<RagQueryLog> = logs
            .into_iter()
            .filter(|l| l.query_embedding.as_ref().map(Vec::len) == Some(dimension))
            .collect();
        if kept.len() < total {
            warn!(skipped = total - kept.len(), dimension, "Skipped queries with mismatched embeddings");
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(i: usize, jitter: f32) -> Vec<f32> {
        let mut v = vec![jitter; 4];
        v[i] = 1.0;
        v
    }

    #[test]
    fn test_choose_k() {
        assert_eq!(choose_k(0, 2, 20), 0);
        assert_eq!(choose_k(1, 2, 20), 1);
        assert_eq!(choose_k(8, 2, 20), 2);
        assert_eq!(choose_k(200, 2, 20), 10);
        assert_eq!(choose_k(5000, 2, 20), 20);
        // inverted bounds are tolerated
        assert_eq!(choose_k(200, 20, 2), 10);
    }

    #[test]
    fn test_kmeans_separates_obvious_groups() {
        let vectors = vec![axis(0, 0.0), axis(1, 0.05), axis(0, 0.1), axis(1, 0.0), axis(0, 0.05)];
        let a = kmeans(&vectors, 2, 20, 7);
        assert_eq!(a.len(), 5);
        assert_eq!(a[0], a[2]);
        assert_eq!(a[0], a[4]);
        assert_eq!(a[1], a[3]);
        assert_ne!(a[0], a[1]);
    }

    #[test]
    fn test_kmeans_is_deterministic_for_a_seed() {
        let vectors: Vec<Vec<f32>> = (0..12).map(|i| axis(i % 3, (i as f32) * 0.01)).collect();
        assert_eq!(kmeans(&vectors, 3, 50, 42), kmeans(&vectors, 3, 50, 42));
    }

    #[test]
    fn test_kmeans_identical_points() {
        let vectors = vec![axis(2, 0.0); 4];
        let a = kmeans(&vectors, 2, 10, 1);
        assert_eq!(a.len(), 4);
        assert!(a.iter().all(|&c| c < 2));
    }

    #[test]
    fn test_label_skips_stop_words() {
        let label = label_for([
            "what did I write about sourdough starter",
            "sourdough hydration ratio",
            "how do I feed a sourdough starter",
        ]);
        assert_eq!(label, "sourdough / starter / feed");
    }

    #[test]
    fn test_label_fallback() {
        assert_eq!(label_for(["is it", "a an"]), FALLBACK_LABEL);
    }
}
