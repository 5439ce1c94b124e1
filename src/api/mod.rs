//! HTTP handlers: thin glue between axum and the pipeline modules.

pub mod index;
pub mod query;
