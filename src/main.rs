use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use repo_rag::api;
use repo_rag::config::Config;
use repo_rag::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        embedding_model = %config.embedding.model,
        llm_model = %config.llm.model,
        "starting repo-rag"
    );

    let state = AppState::new(config.clone()).await?;

    let app = Router::new()
        .route("/index", post(api::index::enqueue_index))
        .route("/index/status/{job_id}", get(api::index::job_status))
        .route("/rag/query", post(api::query::query))
        .route("/rag/pipeline", post(api::query::pipeline))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
