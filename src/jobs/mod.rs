//! Asynchronous ingestion: a bounded in-process queue drained by a fixed
//! worker pool.
//!
//! One job runs the full indexing pipeline for one repository: fetch →
//! filter → chunk → embed → write, with per-stage progress checkpoints.
//! At most one non-terminal job exists per repo key; enqueueing a repo
//! that is already waiting or active returns the existing job id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ChunkingConfig, JobsConfig};
use crate::embed::{self, local::LOCAL_MODEL_TAG, EmbeddingClient};
use crate::error::{RagError, Result};
use crate::github::RepoFetcher;
use crate::ingest::{chunker, filter};
use crate::models::{Chunk, JobResult, JobState, JobStatusResponse, RepoRef};
use crate::store::{ChunkStore, WriteMeta};

/// Progress checkpoints per stage, ending at 100 on write completion.
const PROGRESS_FETCHED: u8 = 25;
const PROGRESS_FILTERED: u8 = 30;
const PROGRESS_CHUNKED: u8 = 45;
const PROGRESS_EMBEDDED: u8 = 80;
const PROGRESS_DONE: u8 = 100;

/// Everything a worker needs to execute one job.
#[derive(Clone)]
pub struct JobDeps {
    pub fetcher: Arc<dyn RepoFetcher>,
    pub store: Arc<dyn ChunkStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub chunking: ChunkingConfig,
    pub embedding_batch_size: usize,
    pub embedding_batch_pause_ms: u64,
}

#[derive(Debug, Clone)]
struct JobRecord {
    repo_id: String,
    state: JobState,
    progress: u8,
    result: Option<JobResult>,
    error: Option<String>,
    cancel: CancellationToken,
}

struct QueuedJob {
    id: Uuid,
    repo: RepoRef,
}

type JobMap = Arc<RwLock<HashMap<Uuid, JobRecord>>>;

pub struct JobRunner {
    tx: mpsc::Sender<QueuedJob>,
    jobs: JobMap,
    /// Non-terminal job per repo key; the idempotence guard.
    by_repo: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl JobRunner {
    /// Spawn the worker pool and return the queue handle.
    pub fn start(deps: JobDeps, config: JobsConfig) -> Self {
        let (tx, rx) = mpsc::channel::<QueuedJob>(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let jobs: JobMap = Arc::new(RwLock::new(HashMap::new()));
        let by_repo: Arc<RwLock<HashMap<String, Uuid>>> = Arc::new(RwLock::new(HashMap::new()));

        for worker_id in 0..config.worker_concurrency.max(1) {
            let rx = rx.clone();
            let jobs = jobs.clone();
            let by_repo = by_repo.clone();
            let deps = deps.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, rx, jobs, by_repo, deps).await;
            });
        }

        Self { tx, jobs, by_repo }
    }

    /// Queue an ingestion for a repository. Returns the existing job id if
    /// one is already waiting or active for the same repo key.
    pub fn enqueue(&self, repo: RepoRef) -> Result<Uuid> {
        let repo_id = repo.repo_id();

        {
            let by_repo = self.by_repo.read();
            if let Some(existing) = by_repo.get(&repo_id) {
                let jobs = self.jobs.read();
                if let Some(job) = jobs.get(existing) {
                    if !job.state.is_terminal() {
                        tracing::info!(repo = %repo_id, job = %existing, "reusing in-flight job");
                        return Ok(*existing);
                    }
                }
            }
        }

        let id = Uuid::new_v4();
        let record = JobRecord {
            repo_id: repo_id.clone(),
            state: JobState::Waiting,
            progress: 0,
            result: None,
            error: None,
            cancel: CancellationToken::new(),
        };
        self.jobs.write().insert(id, record);
        self.by_repo.write().insert(repo_id.clone(), id);

        match self.tx.try_send(QueuedJob { id, repo }) {
            Ok(()) => {
                tracing::info!(repo = %repo_id, job = %id, "ingestion queued");
                Ok(id)
            }
            Err(_) => {
                self.jobs.write().remove(&id);
                self.by_repo.write().remove(&repo_id);
                Err(RagError::internal("ingestion queue is full"))
            }
        }
    }

    pub fn status(&self, job_id: &Uuid) -> Option<JobStatusResponse> {
        let jobs = self.jobs.read();
        jobs.get(job_id).map(|job| JobStatusResponse {
            state: job.state,
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
        })
    }

    /// Request cancellation. Returns false for unknown or finished jobs.
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        let jobs = self.jobs.read();
        match jobs.get(job_id) {
            Some(job) if !job.state.is_terminal() => {
                job.cancel.cancel();
                true
            }
            _ => false,
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
    jobs: JobMap,
    by_repo: Arc<RwLock<HashMap<String, Uuid>>>,
    deps: JobDeps,
) {
    loop {
        // Hold the receiver lock only long enough to pop one job.
        let queued = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(queued) = queued else {
            break; // Queue closed; runner dropped.
        };

        let cancel = {
            let mut jobs = jobs.write();
            let Some(job) = jobs.get_mut(&queued.id) else {
                continue;
            };
            job.state = JobState::Active;
            job.progress = 1;
            job.cancel.clone()
        };

        let repo_id = queued.repo.repo_id();
        tracing::info!(worker = worker_id, repo = %repo_id, job = %queued.id, "job started");

        let progress_jobs = jobs.clone();
        let progress_id = queued.id;
        let report = move |p: u8| {
            if let Some(job) = progress_jobs.write().get_mut(&progress_id) {
                job.progress = p;
            }
        };

        let outcome = run_index_job(&deps, &queued.repo, &cancel, &report).await;

        {
            let mut jobs = jobs.write();
            if let Some(job) = jobs.get_mut(&queued.id) {
                match &outcome {
                    Ok(result) => {
                        job.state = JobState::Completed;
                        job.progress = PROGRESS_DONE;
                        job.result = Some(result.clone());
                    }
                    Err(err) => {
                        job.state = JobState::Failed;
                        job.error = Some(err.to_string());
                    }
                }
            }
        }

        if let Err(err) = &outcome {
            tracing::error!(worker = worker_id, repo = %repo_id, job = %queued.id, error = %err, "job failed");
            // The prior ready snapshot, if any, stays in place.
            if let Err(mark_err) = deps.store.mark_failed(&repo_id).await {
                tracing::warn!(repo = %repo_id, error = %mark_err, "could not mark index failed");
            }
        } else {
            tracing::info!(worker = worker_id, repo = %repo_id, job = %queued.id, "job completed");
        }

        let mut by_repo = by_repo.write();
        if by_repo.get(&repo_id) == Some(&queued.id) {
            by_repo.remove(&repo_id);
        }
    }
}

/// Execute fetch → filter → chunk → embed → write for one repository.
async fn run_index_job(
    deps: &JobDeps,
    repo: &RepoRef,
    cancel: &CancellationToken,
    report: &(dyn Fn(u8) + Send + Sync),
) -> Result<JobResult> {
    let repo_id = repo.repo_id();

    // ── fetch ─────────────────────────────────────────────
    let snapshot = tokio::select! {
        _ = cancel.cancelled() => return Err(RagError::Cancelled),
        snapshot = deps.fetcher.fetch(repo) => snapshot?,
    };
    report(PROGRESS_FETCHED);
    tracing::info!(repo = %repo_id, commit = %snapshot.commit_hash, files = snapshot.files.len(), "snapshot fetched");

    let model = deps.embedder.model().to_string();
    let prior = deps.store.get_index(&repo_id).await?;

    // The development fallback never overwrites an index built by a real
    // model; re-point the store or configure credentials instead.
    if model == LOCAL_MODEL_TAG {
        if let Some(prior_model) = prior.as_ref().and_then(|r| r.embedding_model.as_deref()) {
            if prior_model != LOCAL_MODEL_TAG {
                return Err(RagError::schema_mismatch(format!(
                    "refusing to replace the {prior_model} index for {repo_id} with development embeddings"
                )));
            }
        }
    }

    let meta = WriteMeta {
        repo_id: repo_id.clone(),
        commit_hash: snapshot.commit_hash.clone(),
        default_branch: snapshot.default_branch.clone(),
        model: model.clone(),
    };

    // Same commit, same model, already ready: let the writer confirm the
    // skip without paying for chunking and embedding again.
    if let Some(record) = &prior {
        if record.status == crate::models::IndexStatus::Ready
            && record.commit_hash.as_deref() == Some(snapshot.commit_hash.as_str())
            && record.embedding_model.as_deref() == Some(model.as_str())
        {
            let outcome = deps.store.write(Vec::new(), &meta).await?;
            report(PROGRESS_DONE);
            return Ok(JobResult {
                repo_id,
                commit_hash: snapshot.commit_hash,
                strategy: outcome.strategy,
                chunks_written: outcome.chunks_written,
            });
        }
    }

    deps.store
        .mark_indexing(&repo_id, &snapshot.default_branch)
        .await?;

    // ── filter ────────────────────────────────────────────
    let file_count = snapshot.files.len();
    let outcome = filter::filter_files(snapshot.files);
    report(PROGRESS_FILTERED);
    tracing::info!(
        repo = %repo_id,
        accepted = outcome.accepted.len(),
        rejected = outcome.rejected.len(),
        total = file_count,
        "files filtered"
    );
    for rejected in &outcome.rejected {
        tracing::debug!(path = %rejected.path, reason = rejected.reason.as_str(), "file rejected");
    }

    // ── chunk (CPU-bound, off the async threads) ──────────
    let chunking = deps.chunking;
    let chunk_repo_id = repo_id.clone();
    let accepted = outcome.accepted;
    let chunks: Vec<Chunk> = tokio::task::spawn_blocking(move || {
        let mut chunks = Vec::new();
        for file in &accepted {
            let set = chunker::chunk_file(
                &chunk_repo_id,
                &file.path,
                &file.language,
                &file.content,
                &chunking,
            );
            chunks.extend(set.chunks);
        }
        chunks
    })
    .await?;
    if cancel.is_cancelled() {
        return Err(RagError::Cancelled);
    }
    report(PROGRESS_CHUNKED);
    tracing::info!(repo = %repo_id, chunks = chunks.len(), "chunking complete");

    // ── embed ─────────────────────────────────────────────
    let embed_outcome = tokio::select! {
        _ = cancel.cancelled() => return Err(RagError::Cancelled),
        outcome = embed::embed_chunks(
            deps.embedder.as_ref(),
            chunks,
            deps.embedding_batch_size,
            deps.embedding_batch_pause_ms,
        ) => outcome?,
    };
    report(PROGRESS_EMBEDDED);
    tracing::info!(
        repo = %repo_id,
        embedded = embed_outcome.embedded.len(),
        tokens_estimate = embed_outcome.tokens_used_estimate,
        duration_ms = embed_outcome.duration_ms,
        "embedding complete"
    );

    // ── write ─────────────────────────────────────────────
    let outcome = deps.store.write(embed_outcome.embedded, &meta).await?;
    report(PROGRESS_DONE);

    Ok(JobResult {
        repo_id,
        commit_hash: snapshot.commit_hash,
        strategy: outcome.strategy,
        chunks_written: outcome.chunks_written,
    })
}
