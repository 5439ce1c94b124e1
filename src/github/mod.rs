//! Git host access: repository snapshot fetching over the REST API.
//!
//! The fetcher resolves the default branch and its head commit first, then
//! enumerates the tree against that commit hash so every downstream stage
//! works from one consistent snapshot.

pub mod fetch;

pub use fetch::GithubClient;

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::models::{RepoRef, RepoSnapshot};

/// Capability to produce a consistent snapshot of a repository.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    async fn fetch(&self, repo: &RepoRef) -> Result<RepoSnapshot>;
}

/// Parse a GitHub repository URL into a [`RepoRef`].
///
/// Accepts `https://github.com/{owner}/{name}`, with or without a trailing
/// `.git` or `/`. Anything else is `BadInput`.
pub fn parse_repo_url(url: &str) -> Result<RepoRef> {
    let trimmed = url.trim();
    let rest = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("github.com/"))
        .ok_or_else(|| RagError::bad_input(format!("not a GitHub repository URL: {url}")))?;

    let mut parts = rest.trim_end_matches('/').splitn(2, '/');
    let owner = parts.next().unwrap_or_default();
    let name = parts
        .next()
        .unwrap_or_default()
        .trim_end_matches(".git");

    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return Err(RagError::bad_input(format!(
            "expected github.com/owner/name, got: {url}"
        )));
    }

    Ok(RepoRef::new(owner, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_url() {
        let repo = parse_repo_url("https://github.com/rust-lang/cargo").unwrap();
        assert_eq!(repo.owner, "rust-lang");
        assert_eq!(repo.name, "cargo");
    }

    #[test]
    fn test_parse_strips_git_suffix_and_slash() {
        assert_eq!(
            parse_repo_url("https://github.com/a/b.git").unwrap().name,
            "b"
        );
        assert_eq!(parse_repo_url("https://github.com/a/b/").unwrap().name, "b");
    }

    #[test]
    fn test_parse_without_scheme() {
        let repo = parse_repo_url("github.com/a/b").unwrap();
        assert_eq!(repo.repo_id(), "a/b");
    }

    #[test]
    fn test_parse_rejects_non_github() {
        assert!(parse_repo_url("https://gitlab.com/a/b").is_err());
        assert!(parse_repo_url("not a url").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_name() {
        assert!(parse_repo_url("https://github.com/onlyowner").is_err());
        assert!(parse_repo_url("https://github.com/").is_err());
    }

    #[test]
    fn test_parse_rejects_extra_segments() {
        assert!(parse_repo_url("https://github.com/a/b/tree/main").is_err());
    }
}
