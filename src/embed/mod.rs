//! Embedding: turning chunks into fixed-dimension vectors.
//!
//! Asymmetric retrieval models are trained with distinct task types for
//! the two sides of the search. Documents are embedded with
//! `RETRIEVAL_DOCUMENT` at index time and queries with `RETRIEVAL_QUERY`
//! at query time; mixing the two degrades recall and is treated as a bug,
//! so the task type is threaded through every call explicitly.

pub mod local;
pub mod remote;

use std::time::Instant;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::models::{Chunk, EmbeddedChunk};
use crate::retry;

/// Which side of the retrieval pair a text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            TaskType::RetrievalQuery => "RETRIEVAL_QUERY",
        }
    }
}

/// Capability to embed a batch of texts. Implementations preserve input
/// order and return exactly one vector per text.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier recorded on the index for space compatibility.
    fn model(&self) -> &str;

    /// Output vector dimension.
    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>>;
}

/// The text actually sent to the embedding model for a chunk: a one-line
/// grounding header (file path, symbol if any, language) followed by the
/// chunk body. This is the single source of truth for document-side
/// representation; re-embedding for evaluation must go through it too.
pub fn embed_text(chunk: &Chunk) -> String {
    match &chunk.symbol_name {
        Some(symbol) => format!(
            "{} · {} · {}\n{}",
            chunk.file_path, symbol, chunk.language, chunk.content
        ),
        None => format!("{} · {}\n{}", chunk.file_path, chunk.language, chunk.content),
    }
}

/// Result of embedding a chunk set.
#[derive(Debug)]
pub struct EmbedOutcome {
    pub embedded: Vec<EmbeddedChunk>,
    pub model: String,
    pub tokens_used_estimate: usize,
    pub duration_ms: u64,
}

/// Embed chunks in bounded sequential batches.
///
/// A batch that fails after retries aborts the whole run and the partial
/// output is discarded: a `ready` index must be complete for its commit,
/// so half-embedded chunk sets are never handed to the writer.
pub async fn embed_chunks(
    client: &dyn EmbeddingClient,
    chunks: Vec<Chunk>,
    batch_size: usize,
    batch_pause_ms: u64,
) -> Result<EmbedOutcome> {
    let started = Instant::now();
    let batch_size = batch_size.max(1);
    let mut embedded = Vec::with_capacity(chunks.len());
    let mut tokens_used_estimate = 0usize;

    let total_batches = chunks.len().div_ceil(batch_size);
    for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(embed_text).collect();
        tokens_used_estimate += texts.iter().map(|t| t.len() / 4).sum::<usize>();

        let vectors = retry::with_backoff("embed batch", || {
            client.embed_batch(&texts, TaskType::RetrievalDocument)
        })
        .await?;

        if vectors.len() != batch.len() {
            return Err(RagError::upstream(format!(
                "embedding service returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        for vector in &vectors {
            check_dimension(vector, client.dimension())?;
        }

        embedded.extend(
            batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding }),
        );

        tracing::debug!(
            batch = batch_no + 1,
            of = total_batches,
            "embedded {} chunks",
            embedded.len()
        );

        // Pace consecutive remote calls; no pause after the final batch.
        if batch_no + 1 < total_batches && batch_pause_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(batch_pause_ms)).await;
        }
    }

    Ok(EmbedOutcome {
        embedded,
        model: client.model().to_string(),
        tokens_used_estimate,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Embed a single query with the query-side task type.
pub async fn embed_query(client: &dyn EmbeddingClient, query: &str) -> Result<Vec<f32>> {
    let texts = vec![query.to_string()];
    let vectors = retry::with_backoff("embed query", || {
        client.embed_batch(&texts, TaskType::RetrievalQuery)
    })
    .await?;
    let vector = vectors
        .into_iter()
        .next()
        .ok_or_else(|| RagError::upstream("embedding service returned no vector for query"))?;
    check_dimension(&vector, client.dimension())?;
    Ok(vector)
}

/// A wrong-sized vector means the response belongs to a different
/// embedding space. Fail fast; retrying cannot fix it.
fn check_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(RagError::schema_mismatch(format!(
            "embedding dimension {} does not match expected {expected}",
            vector.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use uuid::Uuid;

    fn chunk(path: &str, symbol: Option<&str>, content: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            repo_id: "a/b".into(),
            file_path: path.into(),
            language: "rust".into(),
            symbol_name: symbol.map(|s| s.to_string()),
            start_line: 1,
            end_line: 2,
            content: content.into(),
            chunk_index: 0,
        }
    }

    /// Scripted embedding client: records batch sizes and task types.
    struct ScriptedClient {
        dimension: usize,
        fail_batches: usize,
        calls: Mutex<Vec<(usize, TaskType)>>,
    }

    impl ScriptedClient {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                fail_batches: 0,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for ScriptedClient {
        fn model(&self) -> &str {
            "scripted-test-model"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed_batch(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>> {
            let mut calls = self.calls.lock();
            calls.push((texts.len(), task));
            if calls.len() <= self.fail_batches {
                return Err(RagError::upstream("scripted failure"));
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
        }
    }

    // ── embed text ──────────────────────────────────────

    #[test]
    fn test_embed_text_includes_grounding_header() {
        let c = chunk("src/auth.rs", Some("login"), "fn login() {}");
        let text = embed_text(&c);
        assert!(text.starts_with("src/auth.rs · login · rust\n"));
        assert!(text.ends_with("fn login() {}"));
    }

    #[test]
    fn test_embed_text_without_symbol() {
        let c = chunk("README.md", None, "# Title");
        let text = embed_text(&c);
        assert!(text.starts_with("README.md · rust\n"));
    }

    // ── batch driver ────────────────────────────────────

    #[tokio::test]
    async fn test_batches_bounded_and_ordered() {
        let client = ScriptedClient::new(768);
        let chunks: Vec<Chunk> = (0..250)
            .map(|i| {
                let mut c = chunk("f.rs", None, &format!("content {i}"));
                c.chunk_index = i;
                c
            })
            .collect();

        let outcome = embed_chunks(&client, chunks, 100, 0).await.unwrap();
        assert_eq!(outcome.embedded.len(), 250);
        assert_eq!(outcome.model, "scripted-test-model");
        assert!(outcome.tokens_used_estimate > 0);
        // Order preserved
        for (i, e) in outcome.embedded.iter().enumerate() {
            assert_eq!(e.chunk.chunk_index, i);
        }

        let calls = client.calls.lock();
        assert_eq!(
            calls.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
        for (_, task) in calls.iter() {
            assert_eq!(*task, TaskType::RetrievalDocument);
        }
    }

    #[tokio::test]
    async fn test_documents_and_queries_use_distinct_task_types() {
        let client = ScriptedClient::new(768);
        embed_chunks(&client, vec![chunk("a.rs", None, "x")], 100, 0)
            .await
            .unwrap();
        embed_query(&client, "how does auth work?").await.unwrap();

        let calls = client.calls.lock();
        assert_eq!(calls[0].1, TaskType::RetrievalDocument);
        assert_eq!(calls[1].1, TaskType::RetrievalQuery);
    }

    #[tokio::test]
    async fn test_transient_batch_failure_is_retried() {
        let client = ScriptedClient {
            dimension: 768,
            fail_batches: 2,
            calls: Mutex::new(Vec::new()),
        };
        let outcome = embed_chunks(&client, vec![chunk("a.rs", None, "x")], 100, 0)
            .await
            .unwrap();
        assert_eq!(outcome.embedded.len(), 1);
        assert_eq!(client.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_discards_partials() {
        // First batch succeeds, everything after fails permanently.
        struct FailSecond {
            calls: Mutex<usize>,
        }

        #[async_trait]
        impl EmbeddingClient for FailSecond {
            fn model(&self) -> &str {
                "fail-second"
            }
            fn dimension(&self) -> usize {
                768
            }
            async fn embed_batch(
                &self,
                texts: &[String],
                _task: TaskType,
            ) -> Result<Vec<Vec<f32>>> {
                let mut calls = self.calls.lock();
                *calls += 1;
                if *calls == 1 {
                    Ok(texts.iter().map(|_| vec![0.1; 768]).collect())
                } else {
                    Err(RagError::upstream("hard down"))
                }
            }
        }

        let client = FailSecond {
            calls: Mutex::new(0),
        };
        let chunks: Vec<Chunk> = (0..150).map(|i| chunk("f.rs", None, &format!("{i}"))).collect();
        let result = embed_chunks(&client, chunks, 100, 0).await;
        assert!(result.is_err(), "partial embeddings must not be returned");
    }

    #[tokio::test]
    async fn test_wrong_dimension_fails_fast() {
        let client = ScriptedClient::new(512);
        // Driver expects the client's own dimension, so lie about it via a
        // wrapper expecting 768.
        struct Wrong(ScriptedClient);

        #[async_trait]
        impl EmbeddingClient for Wrong {
            fn model(&self) -> &str {
                "wrong"
            }
            fn dimension(&self) -> usize {
                768
            }
            async fn embed_batch(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>> {
                self.0.embed_batch(texts, task).await
            }
        }

        let wrong = Wrong(client);
        let result = embed_chunks(&wrong, vec![chunk("a.rs", None, "x")], 100, 0).await;
        assert!(matches!(result, Err(RagError::SchemaMismatch(_))));
        // SchemaMismatch is not retryable: exactly one upstream call.
        assert_eq!(wrong.0.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_chunk_set() {
        let client = ScriptedClient::new(768);
        let outcome = embed_chunks(&client, Vec::new(), 100, 0).await.unwrap();
        assert!(outcome.embedded.is_empty());
        assert_eq!(outcome.tokens_used_estimate, 0);
        assert!(client.calls.lock().is_empty());
    }
}
