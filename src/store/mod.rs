//! Chunk persistence: the single point of shared mutable state.
//!
//! Writes for a repository are serialized by a per-repo lock held for the
//! duration of the write transaction; reads are lock-free and see the
//! transaction as their consistency boundary. The [`ChunkStore`] trait
//! keeps the Postgres backend and the in-memory test/dev backend behind
//! one interface.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, EmbeddedChunk, IndexStatus, RepoIndexRecord, WriteStrategy};

/// Bumped when the chunk row shape changes incompatibly; a stored index
/// with a different version is fully reindexed on the next write.
pub const CHUNK_SCHEMA_VERSION: i32 = 1;

/// Metadata accompanying one write call.
#[derive(Debug, Clone)]
pub struct WriteMeta {
    pub repo_id: String,
    pub commit_hash: String,
    pub default_branch: String,
    pub model: String,
}

/// What the writer did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub strategy: WriteStrategy,
    pub chunks_written: usize,
}

/// A raw candidate from cosine search, before reranking.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub vector_score: f32,
}

/// The slice of a stored index record the write decision needs.
#[derive(Debug, Clone)]
pub struct PriorIndex {
    pub status: IndexStatus,
    pub commit_hash: Option<String>,
    pub model: Option<String>,
    pub schema_version: i32,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// The index record for a repository, if one was ever created.
    async fn get_index(&self, repo_id: &str) -> Result<Option<RepoIndexRecord>>;

    /// Create the record if absent and transition it to `indexing`.
    async fn mark_indexing(&self, repo_id: &str, default_branch: &str) -> Result<()>;

    /// Transition to `failed`, leaving the prior ready snapshot (chunks,
    /// commit hash, model) untouched: availability over freshness.
    async fn mark_failed(&self, repo_id: &str) -> Result<()>;

    /// Persist an embedded chunk set under the per-repo lock, choosing
    /// skip / upsert / full-reindex per [`decide_strategy`]. All writes in
    /// one call are one transaction.
    async fn write(&self, embedded: Vec<EmbeddedChunk>, meta: &WriteMeta) -> Result<WriteOutcome>;

    /// Cosine search scoped to one repository. Returns up to `limit` hits
    /// with `vector_score >= min_score`, best first. `file_filter` limits
    /// hits to paths with the given prefix.
    async fn search(
        &self,
        repo_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
        file_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>>;
}

/// The write-strategy decision. Pure; both backends call it under their
/// per-repo lock.
pub fn decide_strategy(
    prior: Option<&PriorIndex>,
    commit_hash: &str,
    model: &str,
) -> WriteStrategy {
    let Some(prior) = prior else {
        return WriteStrategy::Upsert;
    };

    if prior.status == IndexStatus::Ready
        && prior.commit_hash.as_deref() == Some(commit_hash)
        && prior.model.as_deref() == Some(model)
    {
        return WriteStrategy::Skipped;
    }

    if prior.schema_version != CHUNK_SCHEMA_VERSION {
        return WriteStrategy::FullReindex;
    }
    if let Some(prev_model) = prior.model.as_deref() {
        if prev_model != model {
            return WriteStrategy::FullReindex;
        }
    }

    WriteStrategy::Upsert
}

/// Cosine similarity clamped to `[0, 1]`. Stored vectors are
/// unit-normalized at write time, so this equals `1 − cosine distance`.
pub fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}

/// Unit-normalize a vector in place. Zero vectors stay zero.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
