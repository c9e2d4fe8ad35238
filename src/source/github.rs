//! GitHub REST commit source

use super::CommitSource;
use crate::config::Config;
use crate::error::{CourtError, Result};
use crate::judgment::{Commit, CommitHistory, Contributor, RepoRef};
use crate::util::sanitize_error_body;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::time::Duration;

const API_TIMEOUT_SECS: u64 = 30;
const COMMITS_PER_PAGE: u32 = 100;
const CONTRIBUTORS_PER_PAGE: u32 = 30;
/// Diff stats cost one request per commit, so only the newest are fetched.
const MAX_STAT_COMMITS: usize = 30;
const STAT_CONCURRENCY: usize = 4;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct CommitItem {
    sha: String,
    commit: CommitDetail,
    author: Option<GithubUser>,
    #[serde(default)]
    stats: Option<CommitStats>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    author: Option<GitSignature>,
}

#[derive(Debug, Deserialize)]
struct GitSignature {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitStats {
    additions: u32,
    deletions: u32,
}

#[derive(Debug, Deserialize)]
struct CommitWithStats {
    stats: CommitStats,
}

#[derive(Debug, Deserialize)]
struct ContributorItem {
    login: Option<String>,
    contributions: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: String,
}

impl CommitItem {
    fn into_commit(self) -> Commit {
        let signature = self.commit.author;
        let timestamp = signature
            .as_ref()
            .and_then(|s| s.date)
            .unwrap_or_else(Utc::now);
        let (author_username, author_avatar_url) = match self.author {
            Some(user) => (user.login, user.avatar_url),
            None => (
                signature
                    .and_then(|s| s.name)
                    .unwrap_or_else(|| "unknown".to_string()),
                None,
            ),
        };
        Commit {
            sha: self.sha,
            author_username,
            author_avatar_url,
            message: self.commit.message,
            timestamp,
            additions: self.stats.as_ref().map(|s| s.additions),
            deletions: self.stats.as_ref().map(|s| s.deletions),
        }
    }
}

/// Parse a `GET /repos/{owner}/{repo}/commits` body.
fn parse_commit_list(body: &str) -> Result<Vec<Commit>> {
    let items: Vec<CommitItem> = serde_json::from_str(body)
        .map_err(|e| CourtError::SourceUnavailable(format!("Unexpected commit list: {}", e)))?;
    Ok(items.into_iter().map(CommitItem::into_commit).collect())
}

fn parse_commit_stats(body: &str) -> Result<CommitStats> {
    let detailed: CommitWithStats = serde_json::from_str(body)
        .map_err(|e| CourtError::SourceUnavailable(format!("Unexpected commit detail: {}", e)))?;
    Ok(detailed.stats)
}

fn parse_contributors(body: &str) -> Result<Vec<Contributor>> {
    let items: Vec<ContributorItem> = serde_json::from_str(body)
        .map_err(|e| CourtError::SourceUnavailable(format!("Unexpected contributor list: {}", e)))?;
    Ok(items
        .into_iter()
        .filter_map(|item| {
            item.login.map(|login| Contributor {
                login,
                contributions: item.contributions,
            })
        })
        .collect())
}

fn api_error(status: reqwest::StatusCode, body: &str) -> CourtError {
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(body) {
        return CourtError::SourceUnavailable(format!(
            "GitHub API error ({}): {}",
            status, api_error.message
        ));
    }
    CourtError::SourceUnavailable(format!(
        "GitHub API error ({}): {}",
        status,
        sanitize_error_body(body)
    ))
}

// ============================================================================
// Client
// ============================================================================

pub struct GithubCommitSource {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GithubCommitSource {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .map_err(|e| CourtError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config.github_token();
        if token.is_none() {
            tracing::info!("no GitHub token configured; using unauthenticated rate limits");
        }
        Self::new(config.github_api_url.clone(), token)
    }

    async fn get<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
        parse: fn(&str) -> Result<T>,
    ) -> Result<T> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self
            .client
            .get(&url)
            .query(query)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "blame-court")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| CourtError::SourceUnavailable(format!("GitHub request failed: {}", e)))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            CourtError::SourceUnavailable(format!("Failed to read GitHub response: {}", e))
        })?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        parse(&body)
    }

    async fn commit_stats(&self, repo: &RepoRef, sha: &str) -> Result<CommitStats> {
        self.get(
            &format!("/repos/{}/{}/commits/{}", repo.owner, repo.name, sha),
            &[],
            parse_commit_stats,
        )
        .await
    }

    /// Fill additions/deletions for the newest commits. Failures leave the
    /// stats empty.
    async fn attach_stats(&self, repo: &RepoRef, commits: &mut [Commit]) {
        let limit = commits.len().min(MAX_STAT_COMMITS);
        let shas: Vec<String> = commits[..limit].iter().map(|c| c.sha.clone()).collect();
        let stats: Vec<Option<CommitStats>> = stream::iter(shas)
            .map(|sha| async move {
                match self.commit_stats(repo, &sha).await {
                    Ok(stats) => Some(stats),
                    Err(err) => {
                        tracing::debug!(%sha, error = %err, "skipping commit stats");
                        None
                    }
                }
            })
            .buffered(STAT_CONCURRENCY)
            .collect()
            .await;

        for (commit, stats) in commits.iter_mut().zip(stats) {
            if let Some(stats) = stats {
                commit.additions = Some(stats.additions);
                commit.deletions = Some(stats.deletions);
            }
        }
    }
}

#[async_trait]
impl CommitSource for GithubCommitSource {
    async fn list_commits(
        &self,
        repo: &RepoRef,
        path: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<CommitHistory> {
        let mut query = vec![
            ("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("per_page", COMMITS_PER_PAGE.to_string()),
        ];
        if let Some(path) = path {
            query.push(("path", path.to_string()));
        }

        let mut commits = self
            .get(
                &format!("/repos/{}/{}/commits", repo.owner, repo.name),
                &query,
                parse_commit_list,
            )
            .await?;
        commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.attach_stats(repo, &mut commits).await;

        let contributors = match self
            .get(
                &format!("/repos/{}/{}/contributors", repo.owner, repo.name),
                &[("per_page", CONTRIBUTORS_PER_PAGE.to_string())],
                parse_contributors,
            )
            .await
        {
            Ok(contributors) => Some(contributors),
            Err(err) => {
                tracing::warn!(repo = %repo, error = %err, "contributors unavailable");
                None
            }
        };

        tracing::info!(repo = %repo, path, commits = commits.len(), "fetched commit history");
        Ok(CommitHistory {
            commits,
            contributors,
        })
    }
}
