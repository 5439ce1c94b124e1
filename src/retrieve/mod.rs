//! Query-time retrieval: embed the query, run scoped cosine search, rerank
//! by file proximity.
//!
//! The retriever refuses to mix embedding spaces: when the stored model
//! does not match the configured client's model the read fails with
//! `SchemaMismatch` instead of returning garbage similarities.

pub mod context;
pub mod rerank;

use std::time::Instant;

use crate::embed::{self, EmbeddingClient};
use crate::error::{RagError, Result};
use crate::models::RetrievedChunk;
use crate::store::ChunkStore;

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub candidate_multiplier: usize,
    pub min_score: f32,
    pub file_filter: Option<String>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 8,
            candidate_multiplier: 3,
            min_score: 0.3,
            file_filter: None,
        }
    }
}

#[derive(Debug)]
pub struct RetrievalOutcome {
    pub chunks: Vec<RetrievedChunk>,
    pub total_candidates: usize,
    pub duration_ms: u64,
}

/// Guard the read path: the repository must have an index whose model
/// matches the requesting client's. Returns the index record.
pub async fn ensure_compatible_index(
    store: &dyn ChunkStore,
    repo_id: &str,
    model: &str,
) -> Result<crate::models::RepoIndexRecord> {
    let record = store
        .get_index(repo_id)
        .await?
        .ok_or_else(|| RagError::not_found(format!("repository {repo_id} is not indexed")))?;

    match record.embedding_model.as_deref() {
        Some(stored) if stored == model => Ok(record),
        Some(stored) => Err(RagError::schema_mismatch(format!(
            "index for {repo_id} was embedded with {stored}, but the configured model is {model}"
        ))),
        None => Err(RagError::not_found(format!(
            "repository {repo_id} has no completed index yet"
        ))),
    }
}

pub async fn retrieve(
    store: &dyn ChunkStore,
    embedder: &dyn EmbeddingClient,
    repo_id: &str,
    query: &str,
    options: &RetrievalOptions,
) -> Result<RetrievalOutcome> {
    let started = Instant::now();

    let query = query.trim();
    if query.is_empty() {
        return Err(RagError::bad_input("query is required"));
    }
    if options.top_k == 0 {
        return Err(RagError::bad_input("topK must be positive"));
    }

    ensure_compatible_index(store, repo_id, embedder.model()).await?;

    let query_embedding = embed::embed_query(embedder, query).await?;

    let fetch_limit = options.top_k.saturating_mul(options.candidate_multiplier.max(1));
    let hits = store
        .search(
            repo_id,
            &query_embedding,
            fetch_limit,
            options.min_score,
            options.file_filter.as_deref(),
        )
        .await?;
    let total_candidates = hits.len();

    let chunks = rerank::rerank_by_proximity(hits, options.top_k);

    tracing::debug!(
        repo = repo_id,
        candidates = total_candidates,
        returned = chunks.len(),
        "retrieval complete"
    );

    Ok(RetrievalOutcome {
        chunks,
        total_candidates,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}
