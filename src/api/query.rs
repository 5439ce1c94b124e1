use std::convert::Infallible;

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::embed::EmbeddingClient;
use crate::error::RagError;
use crate::llm::{ChatClient, ChatMessage};
use crate::models::{QueryMeta, QueryRequest, QueryResponse};
use crate::pipeline::{self, PipelineEvent};
use crate::retrieve::{self, context, RetrievalOptions};
use crate::state::AppState;

/// POST /rag/query - synchronous grounded answer.
///
/// Waits for the complete answer; a failure anywhere returns an error and
/// no partial result.
pub async fn query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, RagError> {
    let options = RetrievalOptions {
        top_k: req
            .top_k
            .unwrap_or(state.config.retrieval.top_k)
            .clamp(1, 50),
        candidate_multiplier: state.config.retrieval.candidate_multiplier,
        min_score: state.config.retrieval.min_score,
        file_filter: None,
    };

    let outcome = retrieve::retrieve(
        state.store.as_ref(),
        state.embedder.as_ref(),
        &req.repo_id,
        &req.query,
        &options,
    )
    .await?;

    let assembled = context::assemble(
        &req.query,
        &outcome.chunks,
        &req.repo_id,
        state.config.context_char_budget,
    );

    let answer = if assembled.citations.is_empty() {
        context::NO_CONTEXT_ANSWER.to_string()
    } else {
        let messages = vec![
            ChatMessage::system(assembled.system_prompt.clone()),
            ChatMessage::user(assembled.user_prompt.clone()),
        ];
        let mut stream = state.chat.stream_chat(messages).await?;
        let mut answer = String::new();
        while let Some(delta) = stream.next().await {
            answer.push_str(&delta?);
        }
        answer
    };

    Ok(Json(QueryResponse {
        answer,
        citations: assembled.citations,
        chunks: outcome.chunks,
        meta: QueryMeta {
            model: state.embedder.model().to_string(),
            total_candidates: outcome.total_candidates,
            retrieval_ms: outcome.duration_ms,
            token_estimate: assembled.token_estimate,
        },
    }))
}

/// POST /rag/pipeline - the staged pipeline as a server-sent event stream.
///
/// Dropping the response (client disconnect) cancels the in-flight
/// pipeline, aborting LLM streaming and discarding the partial answer.
pub async fn pipeline(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let rx = pipeline::spawn_pipeline(state.pipeline_deps(), req, cancel.clone());
    let guard = cancel.drop_guard();

    let stream = event_stream(rx, guard);

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream),
    )
}

fn event_stream(
    rx: tokio::sync::mpsc::Receiver<PipelineEvent>,
    guard: tokio_util::sync::DropGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        let sse = Event::default()
            .event(event.event_name())
            .data(event.payload().to_string());
        Some((Ok(sse), (rx, guard)))
    })
}
