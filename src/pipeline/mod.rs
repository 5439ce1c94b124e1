//! Query pipeline driver: embedding → retrieval → ranking → context →
//! generation, surfaced as a totally ordered stream of typed events.
//!
//! The driver is the only writer to the event channel, so event order over
//! one request is the program order here: no stage reports done before its
//! predecessors, the ranked list precedes the first token, and the stream
//! ends with either the generation stage or a single terminal error.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RetrievalConfig;
use crate::embed::{self, EmbeddingClient};
use crate::error::{RagError, Result};
use crate::llm::{ChatClient, ChatMessage};
use crate::models::QueryRequest;
use crate::retrieve::{self, context, rerank};
use crate::store::ChunkStore;

/// The five pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Embedding,
    Retrieval,
    Ranking,
    Context,
    Generation,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Embedding => "embedding",
            PipelineStage::Retrieval => "retrieval",
            PipelineStage::Ranking => "ranking",
            PipelineStage::Context => "context",
            PipelineStage::Generation => "generation",
        }
    }
}

/// One wire event. Names and payload shapes are stable.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Stage {
        stage: PipelineStage,
        payload: serde_json::Value,
    },
    Token {
        text: String,
    },
    Error {
        kind: &'static str,
        message: String,
    },
}

impl PipelineEvent {
    /// SSE event name: `stage:<name>`, `token`, or `error`.
    pub fn event_name(&self) -> String {
        match self {
            PipelineEvent::Stage { stage, .. } => format!("stage:{}", stage.as_str()),
            PipelineEvent::Token { .. } => "token".to_string(),
            PipelineEvent::Error { .. } => "error".to_string(),
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            PipelineEvent::Stage { payload, .. } => payload.clone(),
            PipelineEvent::Token { text } => serde_json::json!({ "text": text }),
            PipelineEvent::Error { kind, message } => {
                serde_json::json!({ "kind": kind, "message": message })
            }
        }
    }
}

/// Everything the driver needs, injected once at construction.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn ChunkStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub chat: Arc<dyn ChatClient>,
    pub retrieval: RetrievalConfig,
    pub context_char_budget: usize,
}

/// Run the pipeline in a background task; events arrive on the returned
/// channel. A failure at any stage produces a single terminal error event.
pub fn spawn_pipeline(
    deps: PipelineDeps,
    request: QueryRequest,
    cancel: CancellationToken,
) -> mpsc::Receiver<PipelineEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        if let Err(err) = drive(&deps, &request, &cancel, &tx).await {
            tracing::warn!(repo = %request.repo_id, error = %err, "pipeline failed");
            let _ = tx
                .send(PipelineEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                })
                .await;
        }
    });
    rx
}

async fn drive(
    deps: &PipelineDeps,
    request: &QueryRequest,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<PipelineEvent>,
) -> Result<()> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(RagError::bad_input("query is required"));
    }
    let top_k = request.top_k.unwrap_or(deps.retrieval.top_k).clamp(1, 50);

    // ── embedding ─────────────────────────────────────────
    let started = Instant::now();
    retrieve::ensure_compatible_index(deps.store.as_ref(), &request.repo_id, deps.embedder.model())
        .await?;
    let query_embedding = embed::embed_query(deps.embedder.as_ref(), query).await?;
    checkpoint(cancel)?;
    emit(
        tx,
        PipelineStage::Embedding,
        serde_json::json!({
            "status": "done",
            "durationMs": started.elapsed().as_millis() as u64,
            "model": deps.embedder.model(),
        }),
    )
    .await?;

    // ── retrieval ─────────────────────────────────────────
    let started = Instant::now();
    let fetch_limit = top_k.saturating_mul(deps.retrieval.candidate_multiplier.max(1));
    let hits = deps
        .store
        .search(
            &request.repo_id,
            &query_embedding,
            fetch_limit,
            deps.retrieval.min_score,
            None,
        )
        .await?;
    checkpoint(cancel)?;
    emit(
        tx,
        PipelineStage::Retrieval,
        serde_json::json!({
            "status": "done",
            "durationMs": started.elapsed().as_millis() as u64,
            "totalCandidates": hits.len(),
        }),
    )
    .await?;

    // ── ranking ───────────────────────────────────────────
    let started = Instant::now();
    let ranked = rerank::rerank_by_proximity(hits, top_k);
    emit(
        tx,
        PipelineStage::Ranking,
        serde_json::json!({
            "status": "done",
            "durationMs": started.elapsed().as_millis() as u64,
            "chunks": &ranked,
        }),
    )
    .await?;

    // ── context ───────────────────────────────────────────
    let started = Instant::now();
    let assembled = context::assemble(query, &ranked, &request.repo_id, deps.context_char_budget);
    emit(
        tx,
        PipelineStage::Context,
        serde_json::json!({
            "status": "done",
            "durationMs": started.elapsed().as_millis() as u64,
            "tokenEstimate": assembled.token_estimate,
            "includedChunks": assembled.included_chunks,
            "citations": &assembled.citations,
        }),
    )
    .await?;

    // ── generation ────────────────────────────────────────
    let started = Instant::now();
    let answer = if assembled.citations.is_empty() {
        context::NO_CONTEXT_ANSWER.to_string()
    } else {
        let messages = vec![
            ChatMessage::system(assembled.system_prompt.clone()),
            ChatMessage::user(assembled.user_prompt.clone()),
        ];
        let mut stream = deps.chat.stream_chat(messages).await?;
        let mut answer = String::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // The partial answer is discarded with the abort.
                    return Err(RagError::Cancelled);
                }
                delta = stream.next() => {
                    match delta {
                        Some(Ok(text)) => {
                            answer.push_str(&text);
                            if tx.send(PipelineEvent::Token { text }).await.is_err() {
                                // Receiver is gone; nobody wants the answer.
                                return Err(RagError::Cancelled);
                            }
                        }
                        Some(Err(err)) => return Err(err),
                        None => break,
                    }
                }
            }
        }
        answer
    };

    emit(
        tx,
        PipelineStage::Generation,
        serde_json::json!({
            "status": "done",
            "durationMs": started.elapsed().as_millis() as u64,
            "answer": answer,
        }),
    )
    .await?;

    Ok(())
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(RagError::Cancelled)
    } else {
        Ok(())
    }
}

async fn emit(
    tx: &mpsc::Sender<PipelineEvent>,
    stage: PipelineStage,
    payload: serde_json::Value,
) -> Result<()> {
    tx.send(PipelineEvent::Stage { stage, payload })
        .await
        .map_err(|_| RagError::Cancelled)
}
