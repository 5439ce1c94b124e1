use std::sync::Arc;

use crate::config::Config;
use crate::embed::local::LocalHashEmbedder;
use crate::embed::remote::RemoteEmbeddingClient;
use crate::embed::EmbeddingClient;
use crate::github::GithubClient;
use crate::jobs::{JobDeps, JobRunner};
use crate::llm::{ChatClient, HttpChatClient};
use crate::pipeline::PipelineDeps;
use crate::store::memory::MemoryStore;
use crate::store::postgres::PostgresStore;
use crate::store::ChunkStore;

/// Shared application state. Clients and pools are constructed once at
/// startup and injected; nothing is reinitialized mid-flight.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ChunkStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub chat: Arc<dyn ChatClient>,
    pub jobs: Arc<JobRunner>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let store: Arc<dyn ChunkStore> = match &config.database_url {
            Some(url) => Arc::new(PostgresStore::connect(url).await?),
            None => {
                tracing::warn!(
                    "DATABASE_URL is not set; using the in-memory store (development only)"
                );
                Arc::new(MemoryStore::new())
            }
        };

        let embedder: Arc<dyn EmbeddingClient> = match &config.embedding.api_key {
            Some(key) => Arc::new(RemoteEmbeddingClient::new(
                http.clone(),
                &config.embedding,
                key.clone(),
            )),
            None => {
                tracing::warn!(
                    "EMBEDDING_API_KEY is not set; using the local fallback embedder (development only)"
                );
                Arc::new(LocalHashEmbedder::new())
            }
        };

        let fetcher = Arc::new(GithubClient::new(http.clone(), &config.github));
        let chat: Arc<dyn ChatClient> = Arc::new(HttpChatClient::new(http, config.llm.clone()));

        let jobs = Arc::new(JobRunner::start(
            JobDeps {
                fetcher,
                store: store.clone(),
                embedder: embedder.clone(),
                chunking: config.chunking,
                embedding_batch_size: config.embedding.batch_size,
                embedding_batch_pause_ms: config.embedding.batch_pause_ms,
            },
            config.jobs,
        ));

        Ok(Self {
            config,
            store,
            embedder,
            chat,
            jobs,
        })
    }

    pub fn pipeline_deps(&self) -> PipelineDeps {
        PipelineDeps {
            store: self.store.clone(),
            embedder: self.embedder.clone(),
            chat: self.chat.clone(),
            retrieval: self.config.retrieval,
            context_char_budget: self.config.context_char_budget,
        }
    }
}
