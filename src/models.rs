use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A repository identity: the pair (owner, name).
///
/// The canonical string form `"owner/name"` is used as the scoping key for
/// every chunk and index record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Canonical `"owner/name"` string.
    pub fn repo_id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A file pulled from the repository tree at a pinned commit.
#[derive(Debug, Clone)]
pub struct RepoFile {
    pub path: String,
    pub language: String,
    pub size_bytes: u64,
    pub content: String,
}

/// A consistent snapshot of a repository: all files enumerated against a
/// single commit hash, never against a moving branch head.
#[derive(Debug, Clone)]
pub struct RepoSnapshot {
    pub commit_hash: String,
    pub default_branch: String,
    pub files: Vec<RepoFile>,
}

/// The unit of retrieval. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: Uuid,
    pub repo_id: String,
    pub file_path: String,
    pub language: String,
    pub symbol_name: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub chunk_index: usize,
}

/// A chunk paired with its embedding vector. Transient: this pairing only
/// exists between the embedder and the writer.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk coming back from retrieval, enriched with its scores.
///
/// `score = vector_score + proximity_boost`; the reranker keeps the
/// components so callers can see why a chunk ranked where it did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub vector_score: f32,
    pub proximity_boost: f32,
    pub score: f32,
}

/// How a file was decomposed into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkStrategy {
    Ast,
    SlidingWindow,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Ast => "ast",
            ChunkStrategy::SlidingWindow => "sliding-window",
        }
    }
}

/// What the vector store writer decided to do for one ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteStrategy {
    Skipped,
    Upsert,
    FullReindex,
}

impl WriteStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStrategy::Skipped => "skipped",
            WriteStrategy::Upsert => "upsert",
            WriteStrategy::FullReindex => "full-reindex",
        }
    }
}

/// Lifecycle status of a repository index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Pending,
    Indexing,
    Ready,
    Failed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Pending => "pending",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Ready => "ready",
            IndexStatus::Failed => "failed",
        }
    }
}

/// One row of `repo_index`: the authoritative record for a repository.
///
/// `status == Ready` implies the chunk set for `commit_hash` is complete
/// and was embedded with `embedding_model`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoIndexRecord {
    pub repo_id: String,
    pub status: IndexStatus,
    pub commit_hash: Option<String>,
    pub default_branch: Option<String>,
    pub embedding_model: Option<String>,
    pub chunk_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// A citation key (`"[1]"`, `"[2]"`, …) resolved to a source location.
/// Keys are injective within a single answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub key: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
}

/// Externally visible job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

// ─── Wire types ──────────────────────────────────────────

/// `POST /index` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub github_url: String,
}

/// `POST /index` response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexResponse {
    pub job_id: Uuid,
}

/// Terminal result of a completed ingestion job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub repo_id: String,
    pub commit_hash: String,
    pub strategy: WriteStrategy,
    pub chunks_written: usize,
}

/// `GET /index/status/{jobId}` response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /rag/query` and `POST /rag/pipeline` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub repo_id: String,
    pub query: String,
    pub top_k: Option<usize>,
}

/// Timing and sizing metadata attached to a synchronous answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMeta {
    pub model: String,
    pub total_candidates: usize,
    pub retrieval_ms: u64,
    pub token_estimate: usize,
}

/// `POST /rag/query` response body. Either the full answer with its
/// citation map or an error; never a partial answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub chunks: Vec<RetrievedChunk>,
    pub meta: QueryMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_id_canonical_form() {
        let repo = RepoRef::new("rust-lang", "cargo");
        assert_eq!(repo.repo_id(), "rust-lang/cargo");
        assert_eq!(repo.to_string(), "rust-lang/cargo");
    }

    #[test]
    fn test_chunk_strategy_wire_names() {
        assert_eq!(
            serde_json::to_string(&ChunkStrategy::SlidingWindow).unwrap(),
            "\"sliding-window\""
        );
        assert_eq!(serde_json::to_string(&ChunkStrategy::Ast).unwrap(), "\"ast\"");
        assert_eq!(ChunkStrategy::SlidingWindow.as_str(), "sliding-window");
    }

    #[test]
    fn test_write_strategy_wire_names() {
        assert_eq!(
            serde_json::to_string(&WriteStrategy::FullReindex).unwrap(),
            "\"full-reindex\""
        );
        assert_eq!(WriteStrategy::Skipped.as_str(), "skipped");
        assert_eq!(WriteStrategy::Upsert.as_str(), "upsert");
    }

    #[test]
    fn test_job_state_terminality() {
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_index_request_wire_shape() {
        let req: IndexRequest =
            serde_json::from_str(r#"{"githubUrl": "https://github.com/a/b"}"#).unwrap();
        assert_eq!(req.github_url, "https://github.com/a/b");
    }

    #[test]
    fn test_query_request_optional_top_k() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"repoId": "a/b", "query": "how?"}"#).unwrap();
        assert_eq!(req.repo_id, "a/b");
        assert!(req.top_k.is_none());

        let req: QueryRequest =
            serde_json::from_str(r#"{"repoId": "a/b", "query": "how?", "topK": 4}"#).unwrap();
        assert_eq!(req.top_k, Some(4));
    }

    #[test]
    fn test_retrieved_chunk_flattens_chunk_fields() {
        let rc = RetrievedChunk {
            chunk: Chunk {
                id: Uuid::new_v4(),
                repo_id: "a/b".into(),
                file_path: "src/main.rs".into(),
                language: "rust".into(),
                symbol_name: Some("main".into()),
                start_line: 1,
                end_line: 3,
                content: "fn main() {}".into(),
                chunk_index: 0,
            },
            vector_score: 0.9,
            proximity_boost: 0.08,
            score: 0.98,
        };
        let json = serde_json::to_value(&rc).unwrap();
        assert_eq!(json["filePath"], "src/main.rs");
        assert_eq!(json["vectorScore"], 0.9);
    }
}
