//! Commit sources
//!
//! A commit source lists the commits that touched a path inside a lookback
//! window. Any failure surfaces as `SourceUnavailable` and is never retried
//! by the pipeline.

pub mod github;
pub mod local;

use crate::error::Result;
use crate::judgment::{CommitHistory, RepoRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use github::GithubCommitSource;
pub use local::LocalGitSource;

#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Commits on `repo` since `since`, newest first, optionally restricted
    /// to `path`.
    async fn list_commits(
        &self,
        repo: &RepoRef,
        path: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<CommitHistory>;
}
