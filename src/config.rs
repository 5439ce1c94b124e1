use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,
    /// Postgres connection string. When unset the process runs against the
    /// in-memory store (development only).
    pub database_url: Option<String>,
    /// Git host API configuration
    pub github: GithubConfig,
    /// Embedding service configuration
    pub embedding: EmbeddingConfig,
    /// Chat LLM configuration
    pub llm: LlmConfig,
    /// Retrieval knobs
    pub retrieval: RetrievalConfig,
    /// Chunking knobs
    pub chunking: ChunkingConfig,
    /// Character budget for the assembled context prompt
    pub context_char_budget: usize,
    /// Background ingestion configuration
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// REST API base URL
    pub base_url: String,
    /// Bearer token; optional, raises anonymous rate limits
    pub token: Option<String>,
    /// Maximum concurrent blob downloads per job
    pub fetch_fan_out: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// API key; when absent the local fallback model is used
    pub api_key: Option<String>,
    /// Base URL for the embedding API
    pub base_url: String,
    /// Model identifier, recorded per index for space compatibility
    pub model: String,
    /// Expected output dimension; a mismatching response fails the batch
    pub dimension: usize,
    /// Maximum chunks per remote call
    pub batch_size: usize,
    /// Pause between consecutive batches, milliseconds
    pub batch_pause_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for an OpenAI-compatible chat API
    pub base_url: String,
    /// Chat model name
    pub model: String,
    /// API key
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Final result count
    pub top_k: usize,
    /// Candidate pool is top_k × this before reranking
    pub candidate_multiplier: usize,
    /// Candidates below this vector score are discarded
    pub min_score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Hard cap on characters per chunk
    pub max_chunk_chars: usize,
    /// Sliding-window target size in lines
    pub window_lines: usize,
    /// Sliding-window overlap in lines
    pub window_overlap: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Fixed worker pool size for the ingestion queue
    pub worker_concurrency: usize,
    /// Bounded queue capacity
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            database_url: None,
            github: GithubConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            chunking: ChunkingConfig::default(),
            context_char_budget: 24_000,
            jobs: JobsConfig::default(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: None,
            fetch_fan_out: 8,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "text-embedding-004".to_string(),
            dimension: 768,
            batch_size: 100,
            batch_pause_ms: 200,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            candidate_multiplier: 3,
            min_score: 0.3,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 8_000,
            window_lines: 40,
            window_overlap: 8,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 2,
            queue_capacity: 64,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("REPO_RAG_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Ok(token) = std::env::var("GIT_HOST_TOKEN") {
            config.github.token = Some(token);
        }
        if let Ok(url) = std::env::var("GIT_HOST_API_URL") {
            config.github.base_url = url;
        }
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
            config.embedding.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Ok(val) = std::env::var("REPO_RAG_TOP_K") {
            if let Ok(v) = val.parse() {
                config.retrieval.top_k = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_RAG_CANDIDATE_MULTIPLIER") {
            if let Ok(v) = val.parse() {
                config.retrieval.candidate_multiplier = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_RAG_MIN_SCORE") {
            if let Ok(v) = val.parse() {
                config.retrieval.min_score = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_RAG_MAX_CHUNK_CHARS") {
            if let Ok(v) = val.parse() {
                config.chunking.max_chunk_chars = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_RAG_CONTEXT_CHAR_BUDGET") {
            if let Ok(v) = val.parse() {
                config.context_char_budget = v;
            }
        }
        if let Ok(val) = std::env::var("REPO_RAG_WORKER_CONCURRENCY") {
            if let Ok(v) = val.parse::<usize>() {
                config.jobs.worker_concurrency = v.max(1);
            }
        }
        if let Ok(val) = std::env::var("REPO_RAG_FETCH_FAN_OUT") {
            if let Ok(v) = val.parse::<usize>() {
                config.github.fetch_fan_out = v.clamp(1, 8);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_knobs() {
        let config = Config::default();
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.candidate_multiplier, 3);
        assert!((config.retrieval.min_score - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.chunking.max_chunk_chars, 8_000);
        assert_eq!(config.context_char_budget, 24_000);
        assert_eq!(config.jobs.worker_concurrency, 2);
        assert_eq!(config.github.fetch_fan_out, 8);
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.embedding.batch_size, 100);
    }

    #[test]
    fn test_default_embedding_has_no_key() {
        let config = Config::default();
        assert!(config.embedding.api_key.is_none());
        assert!(config.github.token.is_none());
    }
}
