//! GitHub REST client implementing [`RepoFetcher`].
//!
//! Resolution order matters: default branch, then the head commit of that
//! branch, then the recursive tree against the commit hash. Enumerating
//! against the branch name instead would race concurrent pushes.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::GithubConfig;
use crate::error::{RagError, Result};
use crate::ingest::filter::detect_language;
use crate::models::{RepoFile, RepoRef, RepoSnapshot};
use crate::retry;

use super::RepoFetcher;

/// Blobs larger than this are not downloaded at all; the tree's `size`
/// field makes the round-trip unnecessary. The filter's own size cap is
/// lower and handles the accounting for everything that is fetched.
const MAX_FETCH_BYTES: u64 = 1_048_576; // 1 MiB

#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    fan_out: usize,
}

#[derive(Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Deserialize)]
struct CommitInfo {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

impl GithubClient {
    pub fn new(http: reqwest::Client, config: &GithubConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            fan_out: config.fetch_fan_out.max(1),
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(url)
            .header("User-Agent", "repo-rag")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let resp = self
            .request(url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        let resp = check_status(resp, what).await?;
        resp.json::<T>()
            .await
            .map_err(|e| RagError::upstream(format!("malformed {what} response: {e}")))
    }

    async fn resolve_default_branch(&self, repo: &RepoRef) -> Result<String> {
        let url = format!("{}/repos/{}/{}", self.base_url, repo.owner, repo.name);
        let info: RepoInfo = self.get_json(&url, "repository metadata").await?;
        Ok(info.default_branch)
    }

    async fn resolve_head_commit(&self, repo: &RepoRef, branch: &str) -> Result<String> {
        let url = format!(
            "{}/repos/{}/{}/commits/{branch}",
            self.base_url, repo.owner, repo.name
        );
        let info: CommitInfo = self.get_json(&url, "branch head commit").await?;
        Ok(info.sha)
    }

    async fn list_tree(&self, repo: &RepoRef, commit: &str) -> Result<Vec<TreeEntry>> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{commit}?recursive=1",
            self.base_url, repo.owner, repo.name
        );
        let tree: TreeResponse = self.get_json(&url, "repository tree").await?;
        if tree.truncated {
            tracing::warn!(
                repo = %repo,
                "tree listing was truncated by the API; indexing the returned subset"
            );
        }
        Ok(tree.tree)
    }

    async fn fetch_blob(&self, repo: &RepoRef, commit: &str, path: &str) -> Result<String> {
        let url = format!(
            "{}/repos/{}/{}/contents/{path}?ref={commit}",
            self.base_url, repo.owner, repo.name
        );
        let resp = self
            .request(&url)
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await?;
        let resp = check_status(resp, "file contents").await?;
        let bytes = resp.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl RepoFetcher for GithubClient {
    async fn fetch(&self, repo: &RepoRef) -> Result<RepoSnapshot> {
        let default_branch =
            retry::with_backoff("resolve default branch", || self.resolve_default_branch(repo))
                .await?;
        let commit_hash = retry::with_backoff("resolve head commit", || {
            self.resolve_head_commit(repo, &default_branch)
        })
        .await?;
        tracing::info!(repo = %repo, branch = %default_branch, commit = %commit_hash, "resolved snapshot");

        let entries = retry::with_backoff("list tree", || self.list_tree(repo, &commit_hash))
            .await?
            .into_iter()
            .filter(|e| e.kind == "blob")
            .filter(|e| match e.size {
                Some(size) if size > MAX_FETCH_BYTES => {
                    tracing::debug!(path = %e.path, size, "skipping oversized blob before download");
                    false
                }
                _ => true,
            })
            .collect::<Vec<_>>();

        tracing::info!(repo = %repo, blobs = entries.len(), "enumerated tree");

        // Bounded fan-out: at most `fan_out` blob downloads in flight.
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.fan_out));
        let mut handles = Vec::with_capacity(entries.len());

        for entry in &entries {
            let permit_sem = semaphore.clone();
            let path = entry.path.clone();
            let size = entry.size.unwrap_or(0);
            let this = self.clone();
            let repo = repo.clone();
            let commit = commit_hash.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit_sem.acquire_owned().await;
                let content = retry::with_backoff("fetch blob", || {
                    this.fetch_blob(&repo, &commit, &path)
                })
                .await;
                (path, size, content)
            }));
        }

        let mut files = Vec::with_capacity(handles.len());
        for handle in handles {
            let (path, size, content) = handle.await?;
            match content {
                Ok(content) => {
                    let language = detect_language(&path);
                    files.push(RepoFile {
                        path,
                        language,
                        size_bytes: size,
                        content,
                    });
                }
                Err(err) => {
                    // A single unfetchable file never aborts the snapshot.
                    tracing::warn!(path = %path, error = %err, "dropping file: content fetch failed");
                }
            }
        }

        Ok(RepoSnapshot {
            commit_hash,
            default_branch,
            files,
        })
    }
}

/// Map a non-success response to the error taxonomy.
async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let rate_limit_exhausted = resp
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "0")
        .unwrap_or(false);
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = resp.text().await.unwrap_or_default();

    Err(match status.as_u16() {
        404 => RagError::not_found(format!("{what}: not found")),
        401 => RagError::unauthorized(format!("{what}: token rejected")),
        403 if rate_limit_exhausted => RagError::RateLimited { retry_after },
        403 => RagError::unauthorized(format!("{what}: forbidden: {body}")),
        429 => RagError::RateLimited { retry_after },
        s if s >= 500 => RagError::upstream(format!("{what}: upstream returned {status}: {body}")),
        _ => RagError::upstream(format!("{what}: unexpected status {status}: {body}")),
    })
}
