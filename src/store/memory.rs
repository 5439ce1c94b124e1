//! In-memory chunk store.
//!
//! Same strategy decision and lifecycle semantics as the Postgres backend,
//! with a per-repo async mutex map standing in for the advisory lock.
//! Backs the test suite and token-less development runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::Result;
use crate::models::{EmbeddedChunk, IndexStatus, RepoIndexRecord};

use super::{
    cosine_score, decide_strategy, normalize, ChunkStore, PriorIndex, SearchHit, WriteMeta,
    WriteOutcome, CHUNK_SCHEMA_VERSION,
};
use crate::models::WriteStrategy;

#[derive(Debug, Clone)]
struct StoredIndex {
    status: IndexStatus,
    commit_hash: Option<String>,
    default_branch: Option<String>,
    model: Option<String>,
    chunk_count: usize,
    schema_version: i32,
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredChunk {
    chunk: crate::models::Chunk,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct RepoEntry {
    record: Option<StoredIndex>,
    chunks: Vec<StoredChunk>,
}

#[derive(Default)]
pub struct MemoryStore {
    repos: RwLock<HashMap<String, RepoEntry>>,
    write_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_lock_for(&self, repo_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock();
        locks
            .entry(repo_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn prior_of(entry: &RepoEntry) -> Option<PriorIndex> {
        entry.record.as_ref().map(|r| PriorIndex {
            status: r.status,
            commit_hash: r.commit_hash.clone(),
            model: r.model.clone(),
            schema_version: r.schema_version,
        })
    }

    /// Total stored chunks across all repos; test helper.
    pub fn chunk_count(&self) -> usize {
        self.repos.read().values().map(|e| e.chunks.len()).sum()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn get_index(&self, repo_id: &str) -> Result<Option<RepoIndexRecord>> {
        let repos = self.repos.read();
        Ok(repos.get(repo_id).and_then(|entry| {
            entry.record.as_ref().map(|r| RepoIndexRecord {
                repo_id: repo_id.to_string(),
                status: r.status,
                commit_hash: r.commit_hash.clone(),
                default_branch: r.default_branch.clone(),
                embedding_model: r.model.clone(),
                chunk_count: r.chunk_count,
                updated_at: r.updated_at,
            })
        }))
    }

    async fn mark_indexing(&self, repo_id: &str, default_branch: &str) -> Result<()> {
        let mut repos = self.repos.write();
        let entry = repos.entry(repo_id.to_string()).or_default();
        match &mut entry.record {
            Some(record) => {
                record.status = IndexStatus::Indexing;
                record.default_branch = Some(default_branch.to_string());
                record.updated_at = Utc::now();
            }
            None => {
                entry.record = Some(StoredIndex {
                    status: IndexStatus::Indexing,
                    commit_hash: None,
                    default_branch: Some(default_branch.to_string()),
                    model: None,
                    chunk_count: 0,
                    schema_version: CHUNK_SCHEMA_VERSION,
                    updated_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, repo_id: &str) -> Result<()> {
        let mut repos = self.repos.write();
        if let Some(record) = repos.get_mut(repo_id).and_then(|e| e.record.as_mut()) {
            // Only the status flips; the prior snapshot fields stay.
            record.status = IndexStatus::Failed;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn write(&self, embedded: Vec<EmbeddedChunk>, meta: &WriteMeta) -> Result<WriteOutcome> {
        let lock = self.write_lock_for(&meta.repo_id);
        let _guard = lock.lock().await;

        let strategy = {
            let repos = self.repos.read();
            let prior = repos.get(&meta.repo_id).and_then(|e| Self::prior_of(e));
            decide_strategy(prior.as_ref(), &meta.commit_hash, &meta.model)
        };

        if strategy == WriteStrategy::Skipped {
            tracing::info!(repo = %meta.repo_id, commit = %meta.commit_hash, "write skipped: commit already indexed");
            return Ok(WriteOutcome {
                strategy,
                chunks_written: 0,
            });
        }

        let mut incoming: Vec<StoredChunk> = embedded
            .into_iter()
            .map(|e| StoredChunk {
                chunk: e.chunk,
                embedding: e.embedding,
            })
            .collect();
        for stored in &mut incoming {
            normalize(&mut stored.embedding);
        }
        let chunks_written = incoming.len();

        let mut repos = self.repos.write();
        let entry = repos.entry(meta.repo_id.clone()).or_default();

        // The incoming set is the complete snapshot for the commit, so both
        // strategies leave the same rows behind; upsert vs full-reindex only
        // differs in row churn on the SQL backend.
        entry.chunks = incoming;

        entry.record = Some(StoredIndex {
            status: IndexStatus::Ready,
            commit_hash: Some(meta.commit_hash.clone()),
            default_branch: Some(meta.default_branch.clone()),
            model: Some(meta.model.clone()),
            chunk_count: entry.chunks.len(),
            schema_version: CHUNK_SCHEMA_VERSION,
            updated_at: Utc::now(),
        });

        tracing::info!(
            repo = %meta.repo_id,
            strategy = strategy.as_str(),
            chunks = chunks_written,
            "write complete"
        );

        Ok(WriteOutcome {
            strategy,
            chunks_written,
        })
    }

    async fn search(
        &self,
        repo_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
        file_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let repos = self.repos.read();
        let Some(entry) = repos.get(repo_id) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = entry
            .chunks
            .iter()
            .filter(|s| {
                file_filter
                    .map(|prefix| s.chunk.file_path.starts_with(prefix))
                    .unwrap_or(true)
            })
            .map(|s| SearchHit {
                chunk: s.chunk.clone(),
                vector_score: cosine_score(query_embedding, &s.embedding),
            })
            .filter(|h| h.vector_score >= min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.vector_score
                .partial_cmp(&a.vector_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use uuid::Uuid;

    fn embedded(repo_id: &str, path: &str, index: usize, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                id: Uuid::new_v4(),
                repo_id: repo_id.into(),
                file_path: path.into(),
                language: "rust".into(),
                symbol_name: None,
                start_line: 1,
                end_line: 5,
                content: format!("chunk {index} of {path}"),
                chunk_index: index,
            },
            embedding: vector,
        }
    }

    fn meta(repo_id: &str, commit: &str, model: &str) -> WriteMeta {
        WriteMeta {
            repo_id: repo_id.into(),
            commit_hash: commit.into(),
            default_branch: "main".into(),
            model: model.into(),
        }
    }

    #[tokio::test]
    async fn test_first_write_is_upsert_then_skip() {
        let store = MemoryStore::new();
        let chunks = vec![embedded("a/b", "src/main.rs", 0, vec![1.0, 0.0, 0.0])];

        let first = store
            .write(chunks.clone(), &meta("a/b", "c1", "m1"))
            .await
            .unwrap();
        assert!(matches!(
            first.strategy,
            WriteStrategy::Upsert | WriteStrategy::FullReindex
        ));
        assert_eq!(first.chunks_written, 1);

        let second = store.write(chunks, &meta("a/b", "c1", "m1")).await.unwrap();
        assert_eq!(second.strategy, WriteStrategy::Skipped);
        assert_eq!(second.chunks_written, 0);
        assert_eq!(store.chunk_count(), 1);
    }

    #[tokio::test]
    async fn test_model_change_triggers_full_reindex() {
        let store = MemoryStore::new();
        store
            .write(
                vec![embedded("a/b", "old.rs", 0, vec![1.0, 0.0, 0.0])],
                &meta("a/b", "c1", "model-one"),
            )
            .await
            .unwrap();

        let outcome = store
            .write(
                vec![embedded("a/b", "new.rs", 0, vec![0.0, 1.0, 0.0])],
                &meta("a/b", "c1", "model-two"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.strategy, WriteStrategy::FullReindex);

        // Old-model chunks are gone.
        let record = store.get_index("a/b").await.unwrap().unwrap();
        assert_eq!(record.embedding_model.as_deref(), Some("model-two"));
        assert_eq!(record.chunk_count, 1);
        let hits = store
            .search("a/b", &[0.0, 1.0, 0.0], 10, 0.0, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.file_path, "new.rs");
    }

    #[tokio::test]
    async fn test_upsert_removes_stale_chunks() {
        let store = MemoryStore::new();
        store
            .write(
                vec![
                    embedded("a/b", "keep.rs", 0, vec![1.0, 0.0, 0.0]),
                    embedded("a/b", "gone.rs", 0, vec![0.0, 1.0, 0.0]),
                ],
                &meta("a/b", "c1", "m1"),
            )
            .await
            .unwrap();

        store
            .write(
                vec![embedded("a/b", "keep.rs", 0, vec![1.0, 0.0, 0.0])],
                &meta("a/b", "c2", "m1"),
            )
            .await
            .unwrap();

        let hits = store
            .search("a/b", &[0.0, 1.0, 0.0], 10, 0.0, None)
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.chunk.file_path != "gone.rs"));
        assert_eq!(store.chunk_count(), 1);
    }

    #[tokio::test]
    async fn test_ready_status_and_counts() {
        let store = MemoryStore::new();
        store.mark_indexing("a/b", "main").await.unwrap();
        let record = store.get_index("a/b").await.unwrap().unwrap();
        assert_eq!(record.status, IndexStatus::Indexing);

        store
            .write(
                vec![embedded("a/b", "x.rs", 0, vec![1.0, 0.0, 0.0])],
                &meta("a/b", "c1", "m1"),
            )
            .await
            .unwrap();
        let record = store.get_index("a/b").await.unwrap().unwrap();
        assert_eq!(record.status, IndexStatus::Ready);
        assert_eq!(record.chunk_count, 1);
        assert_eq!(record.commit_hash.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_prior_snapshot() {
        let store = MemoryStore::new();
        store
            .write(
                vec![embedded("a/b", "x.rs", 0, vec![1.0, 0.0, 0.0])],
                &meta("a/b", "c1", "m1"),
            )
            .await
            .unwrap();

        store.mark_failed("a/b").await.unwrap();
        let record = store.get_index("a/b").await.unwrap().unwrap();
        assert_eq!(record.status, IndexStatus::Failed);
        // Snapshot fields survive and the chunks are still searchable.
        assert_eq!(record.commit_hash.as_deref(), Some("c1"));
        assert_eq!(record.chunk_count, 1);
        let hits = store
            .search("a/b", &[1.0, 0.0, 0.0], 10, 0.0, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_write_marks_ready_with_zero_chunks() {
        let store = MemoryStore::new();
        let outcome = store
            .write(Vec::new(), &meta("a/b", "c1", "m1"))
            .await
            .unwrap();
        assert_eq!(outcome.chunks_written, 0);
        let record = store.get_index("a/b").await.unwrap().unwrap();
        assert_eq!(record.status, IndexStatus::Ready);
        assert_eq!(record.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_search_scoped_to_repo() {
        let store = MemoryStore::new();
        store
            .write(
                vec![embedded("a/b", "x.rs", 0, vec![1.0, 0.0, 0.0])],
                &meta("a/b", "c1", "m1"),
            )
            .await
            .unwrap();
        store
            .write(
                vec![embedded("c/d", "y.rs", 0, vec![1.0, 0.0, 0.0])],
                &meta("c/d", "c1", "m1"),
            )
            .await
            .unwrap();

        let hits = store
            .search("a/b", &[1.0, 0.0, 0.0], 10, 0.0, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.repo_id, "a/b");
    }

    #[tokio::test]
    async fn test_search_respects_min_score_and_limit() {
        let store = MemoryStore::new();
        store
            .write(
                vec![
                    embedded("a/b", "close.rs", 0, vec![1.0, 0.0, 0.0]),
                    embedded("a/b", "far.rs", 0, vec![0.0, 1.0, 0.0]),
                ],
                &meta("a/b", "c1", "m1"),
            )
            .await
            .unwrap();

        let hits = store
            .search("a/b", &[1.0, 0.0, 0.0], 10, 0.5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.file_path, "close.rs");
        assert!(hits[0].vector_score >= 0.5);
    }

    #[tokio::test]
    async fn test_search_file_filter_prefix() {
        let store = MemoryStore::new();
        store
            .write(
                vec![
                    embedded("a/b", "src/auth/login.rs", 0, vec![1.0, 0.0, 0.0]),
                    embedded("a/b", "docs/guide.md", 0, vec![1.0, 0.0, 0.0]),
                ],
                &meta("a/b", "c1", "m1"),
            )
            .await
            .unwrap();

        let hits = store
            .search("a/b", &[1.0, 0.0, 0.0], 10, 0.0, Some("src/"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.file_path.starts_with("src/"));
    }

    #[tokio::test]
    async fn test_search_unknown_repo_is_empty() {
        let store = MemoryStore::new();
        let hits = store
            .search("no/repo", &[1.0, 0.0], 10, 0.0, None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
