//! Commit source backed by a local clone
//!
//! Walks history with libgit2 instead of calling GitHub, which makes the CLI
//! usable offline. Usernames are git author names, and there are no avatars.

use super::CommitSource;
use crate::error::{CourtError, Result};
use crate::judgment::{Commit, CommitHistory, Contributor, RepoRef};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use git2::{DiffOptions, Repository, Sort};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn git_error(err: git2::Error) -> CourtError {
    CourtError::SourceUnavailable(format!("git: {}", err.message()))
}

pub struct LocalGitSource {
    path: PathBuf,
}

impl LocalGitSource {
    /// Fails early if `path` is not inside a git repository.
    pub fn new(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).map_err(git_error)?;
        let root = repo
            .workdir()
            .unwrap_or_else(|| repo.path())
            .to_path_buf();
        Ok(Self { path: root })
    }

    /// Owner and name from the `origin` remote, if it points at GitHub.
    pub fn remote_repo(&self) -> Option<RepoRef> {
        let repo = Repository::open(&self.path).ok()?;
        let remote = repo.find_remote("origin").ok()?;
        RepoRef::parse(remote.url()?).ok()
    }

    fn walk(&self, path: Option<&str>, since: DateTime<Utc>) -> Result<CommitHistory> {
        let repo = Repository::open(&self.path).map_err(git_error)?;
        if repo.is_empty().map_err(git_error)? {
            return Ok(CommitHistory::default());
        }

        let mut revwalk = repo.revwalk().map_err(git_error)?;
        revwalk.set_sorting(Sort::TIME).map_err(git_error)?;
        revwalk.push_head().map_err(git_error)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            let oid = oid.map_err(git_error)?;
            let commit = repo.find_commit(oid).map_err(git_error)?;

            let timestamp = Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .unwrap_or_else(Utc::now);
            if timestamp < since {
                break;
            }

            let tree = commit.tree().map_err(git_error)?;
            let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
            let mut opts = DiffOptions::new();
            if let Some(path) = path {
                opts.pathspec(path);
            }
            let diff = repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))
                .map_err(git_error)?;
            if path.is_some() && diff.deltas().len() == 0 {
                continue;
            }
            let stats = diff.stats().map_err(git_error)?;

            let author = commit.author();
            commits.push(Commit {
                sha: oid.to_string(),
                author_username: author.name().unwrap_or("unknown").to_string(),
                author_avatar_url: None,
                message: commit.message().unwrap_or("").trim_end().to_string(),
                timestamp,
                additions: u32::try_from(stats.insertions()).ok(),
                deletions: u32::try_from(stats.deletions()).ok(),
            });
        }

        let contributors = window_contributors(&commits);
        Ok(CommitHistory {
            commits,
            contributors: Some(contributors),
        })
    }
}

/// Commit counts per author within the window, most active first.
fn window_contributors(commits: &[Commit]) -> Vec<Contributor> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for commit in commits {
        *counts.entry(commit.author_username.as_str()).or_insert(0) += 1;
    }
    let mut contributors: Vec<Contributor> = counts
        .into_iter()
        .map(|(login, contributions)| Contributor {
            login: login.to_string(),
            contributions,
        })
        .collect();
    contributors.sort_by(|a, b| {
        b.contributions
            .cmp(&a.contributions)
            .then_with(|| a.login.cmp(&b.login))
    });
    contributors
}

#[async_trait]
impl CommitSource for LocalGitSource {
    async fn list_commits(
        &self,
        repo: &RepoRef,
        path: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<CommitHistory> {
        let source = LocalGitSource {
            path: self.path.clone(),
        };
        let path = path.map(str::to_string);
        let history = tokio::task::spawn_blocking(move || source.walk(path.as_deref(), since))
            .await
            .map_err(|e| CourtError::SourceUnavailable(format!("git walk panicked: {}", e)))??;

        tracing::info!(
            repo = %repo,
            root = %self.path.display(),
            commits = history.commits.len(),
            "read local commit history"
        );
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use git2::{Signature, Time};
    use std::fs;

    fn commit_file(repo: &Repository, file: &str, author: &str, message: &str, at: DateTime<Utc>) {
        let root = repo.workdir().unwrap();
        let full = root.join(file);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, format!("{message}\n")).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

        let sig = Signature::new(
            author,
            &format!("{author}@example.com"),
            &Time::new(at.timestamp(), 0),
        )
        .unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap();
    }

    fn fixture() -> (tempfile::TempDir, LocalGitSource) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let now = Utc::now();
        commit_file(&repo, "README.md", "carol", "Initial import", now - Duration::days(30));
        commit_file(&repo, "src/payment.ts", "alice", "Add totals", now - Duration::days(5));
        commit_file(&repo, "docs/notes.md", "alice", "Write notes", now - Duration::days(3));
        commit_file(&repo, "src/payment.ts", "bob", "Hotfix totals", now - Duration::days(1));
        let source = LocalGitSource::new(dir.path()).unwrap();
        (dir, source)
    }

    #[tokio::test]
    async fn test_window_excludes_older_commits() {
        let (_dir, source) = fixture();
        let history = source
            .list_commits(
                &RepoRef::new("acme", "payments"),
                None,
                Utc::now() - Duration::days(7),
            )
            .await
            .unwrap();
        let messages: Vec<_> = history.commits.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["Hotfix totals", "Write notes", "Add totals"]);
        assert_eq!(history.commits[0].author_username, "bob");
        assert_eq!(history.commits[0].additions, Some(1));
    }

    #[tokio::test]
    async fn test_path_filter() {
        let (_dir, source) = fixture();
        let history = source
            .list_commits(
                &RepoRef::new("acme", "payments"),
                Some("src/payment.ts"),
                Utc::now() - Duration::days(7),
            )
            .await
            .unwrap();
        let authors: Vec<_> = history
            .commits
            .iter()
            .map(|c| c.author_username.as_str())
            .collect();
        assert_eq!(authors, vec!["bob", "alice"]);

        let contributors = history.contributors.unwrap();
        assert_eq!(contributors.len(), 2);
        assert!(contributors.iter().all(|c| c.contributions == 1));
    }

    #[tokio::test]
    async fn test_empty_repository_has_no_commits() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let source = LocalGitSource::new(dir.path()).unwrap();
        let history = source
            .list_commits(&RepoRef::new("a", "b"), None, Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert!(history.commits.is_empty());
    }

    #[test]
    fn test_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LocalGitSource::new(dir.path()),
            Err(CourtError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn test_contributors_sorted_by_activity() {
        let commits = vec![
            crate::testing::commit("bob", "a", 1),
            crate::testing::commit("alice", "b", 2),
            crate::testing::commit("bob", "c", 3),
        ];
        let contributors = window_contributors(&commits);
        assert_eq!(contributors[0].login, "bob");
        assert_eq!(contributors[0].contributions, 2);
    }
}
