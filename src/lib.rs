//! # repo-rag
//!
//! A code-aware Retrieval-Augmented Generation engine: ingest a public
//! GitHub repository, decompose it into semantically meaningful chunks,
//! embed them into a vector space, persist them in an
//! approximate-nearest-neighbor store, and serve grounded,
//! citation-bearing answers to questions about the code.
//!
//! ## Architecture
//!
//! ```text
//!  Indexing (background plane, worker pool)
//!
//!  ┌─────────┐   ┌────────┐   ┌─────────┐   ┌──────────┐   ┌─────────┐
//!  │ Fetcher  │ → │ Filter │ → │ Chunker │ → │ Embedder │ → │ Writer  │
//!  │ (GitHub) │   │ (pure) │   │ ast/win │   │ batched  │   │ pgvector│
//!  └─────────┘   └────────┘   └─────────┘   └──────────┘   └─────────┘
//!
//!  Querying (request plane, per request)
//!
//!  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌────────────┐
//!  │ Retriever  │ → │ Proximity │ → │  Context  │ → │ Generation │
//!  │ embed+cos  │   │  rerank   │   │ [N] cites │   │ SSE tokens │
//!  └───────────┘   └───────────┘   └───────────┘   └────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for every knob
//! - [`error`] - The crate-wide error taxonomy and HTTP mapping
//! - [`models`] - Shared data types: chunks, citations, index records, DTOs
//! - [`github`] - Repository snapshot fetching over the GitHub REST API
//! - [`ingest`] - File filtering and symbol-aware / sliding-window chunking
//! - [`embed`] - Batch embedding with task types and a local dev fallback
//! - [`store`] - Chunk persistence: Postgres + pgvector, and in-memory
//! - [`retrieve`] - Cosine retrieval, file-proximity rerank, context assembly
//! - [`llm`] - Streaming chat client for the generation stage
//! - [`pipeline`] - The staged query pipeline emitting typed SSE events
//! - [`jobs`] - The asynchronous ingestion queue and worker pool
//! - [`api`] - Axum handlers for the indexing and query endpoints
//! - [`state`] - Shared application state wiring the capabilities together

pub mod api;
pub mod config;
pub mod embed;
pub mod error;
pub mod github;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod retrieve;
pub mod retry;
pub mod state;
pub mod store;
