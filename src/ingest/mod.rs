//! Ingestion pipeline stages: filtering fetched files and chunking the
//! survivors. Both stages are pure and CPU-bound; the job runner drives
//! them between the fetcher and the embedder.

pub mod chunker;
pub mod filter;
