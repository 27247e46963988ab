//! Embedding-based relevance ranking.

use crate::trace::Document;
use crate::{Embedder, Error, Result};

/// Cosine similarity in [-1, 1].
///
/// Zero when either vector has zero norm, when either is empty, or when their dimensions
/// disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Mean cosine similarity over every (query chunk, document chunk) pair.
pub fn average_pair_score(query: &[Vec<f32>], doc: &[Vec<f32>]) -> f64 {
    let mut total = 0.0;
    let mut n = 0usize;
    for q in query.iter().filter(|v| !v.is_empty()) {
        for d in doc.iter().filter(|v| !v.is_empty()) {
            total += cosine_similarity(q, d);
            n += 1;
        }
    }
    if n == 0 {
        0.0
    } else {
        total / n as f64
    }
}

/// Score `documents` against `query` and keep those at or above `threshold_percent` (0–100).
///
/// Documents without embeddings are skipped rather than scored. The sort is stable, so equal
/// scores keep their input order. A failure to embed the query fails the whole batch.
pub async fn rank_by_relevance(
    embedder: &dyn Embedder,
    documents: Vec<Document>,
    query: &str,
    threshold_percent: f64,
) -> Result<Vec<Document>> {
    let threshold = threshold_percent.clamp(0.0, 100.0) / 100.0;
    let query_embedding = embedder
        .embed(query)
        .await
        .map_err(|e| Error::Embed(format!("query embedding: {e}")))?;

    let mut ranked: Vec<Document> = documents
        .into_iter()
        .filter(|d| !d.embeddings.is_empty())
        .map(|mut d| {
            d.score = average_pair_score(&query_embedding, &d.embeddings);
            d
        })
        .filter(|d| d.score >= threshold)
        .collect();
    for d in &ranked {
        tracing::debug!(title = %d.title, score = d.score, "ranked");
    }
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(ranked)
}
