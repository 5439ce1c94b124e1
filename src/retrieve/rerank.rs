//! File-proximity reranker.
//!
//! Chunks colocated in a file that already ranks highly usually share
//! context with the best hits, so they get a small boost. The per-file cap
//! keeps one large file from monopolizing the top-K.

use std::collections::{HashMap, HashSet};

use crate::models::RetrievedChunk;
use crate::store::SearchHit;

/// Top-N candidates by raw vector score whose files become anchors.
const ANCHOR_CANDIDATES: usize = 3;

/// Boost added per chunk in an anchor file.
const PROXIMITY_BOOST: f32 = 0.08;

/// Total boost cap per file: at most two boosted chunks.
const MAX_BOOST_PER_FILE: f32 = 0.16;

/// Two passes over the candidate list: anchor selection by raw vector
/// score, then a capped boost for candidates in anchor files. Final order
/// is `vector_score + proximity_boost` descending, ties broken by higher
/// `vector_score`, then by retrieval order.
pub fn rerank_by_proximity(hits: Vec<SearchHit>, top_k: usize) -> Vec<RetrievedChunk> {
    // Pass 1: anchor set.
    let mut by_raw_score: Vec<&SearchHit> = hits.iter().collect();
    by_raw_score.sort_by(|a, b| {
        b.vector_score
            .partial_cmp(&a.vector_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let anchor_files: HashSet<String> = by_raw_score
        .iter()
        .take(ANCHOR_CANDIDATES)
        .map(|h| h.chunk.file_path.clone())
        .collect();

    // Pass 2: boost, walking the list in retrieval order so the cap goes to
    // the earliest (best) chunks of each anchor file.
    let mut boost_spent: HashMap<String, f32> = HashMap::new();
    let mut ranked: Vec<(usize, RetrievedChunk)> = hits
        .into_iter()
        .enumerate()
        .map(|(order, hit)| {
            let proximity_boost = if anchor_files.contains(&hit.chunk.file_path) {
                let spent = boost_spent
                    .entry(hit.chunk.file_path.clone())
                    .or_insert(0.0);
                if *spent + PROXIMITY_BOOST <= MAX_BOOST_PER_FILE + f32::EPSILON {
                    *spent += PROXIMITY_BOOST;
                    PROXIMITY_BOOST
                } else {
                    0.0
                }
            } else {
                0.0
            };

            let score = hit.vector_score + proximity_boost;
            (
                order,
                RetrievedChunk {
                    chunk: hit.chunk,
                    vector_score: hit.vector_score,
                    proximity_boost,
                    score,
                },
            )
        })
        .collect();

    ranked.sort_by(|(order_a, a), (order_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.vector_score
                    .partial_cmp(&a.vector_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(order_a.cmp(order_b))
    });

    ranked
        .into_iter()
        .take(top_k)
        .map(|(_, chunk)| chunk)
        .collect()
}
