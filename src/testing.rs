//! Fakes and fixtures for unit tests

use crate::error::{CourtError, Result};
use crate::judgment::{
    Commit, CommitHistory, Judgment, JudgmentStatus, NewJudgment, RepoRef,
};
use crate::llm::prompts::{IncidentContext, MessageContext};
use crate::llm::LlmProvider;
use crate::source::CommitSource;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

enum Script {
    Queue(VecDeque<String>),
    Repeat(String),
    /// First route whose needle appears in the prompt answers
    Routed(Vec<(String, String)>),
    /// Every call fails the way a provider refusing the API key does
    Rejected,
}

/// LLM provider that answers from a script and records what it was asked.
pub struct ScriptedProvider {
    script: Mutex<Script>,
    fail_first: AtomicU32,
    delay: Option<Duration>,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
    budgets: Mutex<Vec<u32>>,
}

impl ScriptedProvider {
    fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            fail_first: AtomicU32::new(0),
            delay: None,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
            budgets: Mutex::new(Vec::new()),
        }
    }

    /// Answer with each response in turn, then fail with a transport error.
    pub fn new<'a>(responses: impl IntoIterator<Item = &'a str>) -> Self {
        Self::with_script(Script::Queue(
            responses.into_iter().map(str::to_string).collect(),
        ))
    }

    pub fn repeating(response: &str) -> Self {
        Self::with_script(Script::Repeat(response.to_string()))
    }

    pub fn rejecting_key() -> Self {
        Self::with_script(Script::Rejected)
    }

    pub fn routed<'a>(routes: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::with_script(Script::Routed(
            routes
                .into_iter()
                .map(|(needle, response)| (needle.to_string(), response.to_string()))
                .collect(),
        ))
    }

    /// The first `n` calls fail with a transport error.
    pub fn failing_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn token_budgets(&self) -> Vec<u32> {
        self.budgets.lock().unwrap().clone()
    }

    fn next_response(&self, prompt: &str) -> Result<String> {
        let mut script = self.script.lock().unwrap();
        match &mut *script {
            Script::Queue(queue) => queue
                .pop_front()
                .ok_or_else(|| CourtError::Transport("script exhausted".into())),
            Script::Repeat(response) => Ok(response.clone()),
            Script::Routed(routes) => routes
                .iter()
                .find(|(needle, _)| prompt.contains(needle.as_str()))
                .map(|(_, response)| response.clone())
                .ok_or_else(|| CourtError::Transport("no route for prompt".into())),
            Script::Rejected => Err(CourtError::Config("scripted rejected the API key".into())),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.budgets.lock().unwrap().push(max_output_tokens);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(CourtError::Transport("connection reset".into()));
        }
        self.next_response(prompt)
    }
}

/// Commit source serving a fixed history
pub struct StaticCommitSource {
    history: CommitHistory,
    unavailable: bool,
    calls: AtomicU32,
    windows: Mutex<Vec<(RepoRef, Option<String>, DateTime<Utc>)>>,
}

impl StaticCommitSource {
    pub fn new(history: CommitHistory) -> Self {
        Self {
            history,
            unavailable: false,
            calls: AtomicU32::new(0),
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(CommitHistory::default())
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn windows(&self) -> Vec<(RepoRef, Option<String>, DateTime<Utc>)> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommitSource for StaticCommitSource {
    async fn list_commits(
        &self,
        repo: &RepoRef,
        path: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<CommitHistory> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.windows
            .lock()
            .unwrap()
            .push((repo.clone(), path.map(str::to_string), since));
        if self.unavailable {
            return Err(CourtError::SourceUnavailable("github is down".into()));
        }
        Ok(self.history.clone())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn commit(author: &str, message: &str, days_ago: i64) -> Commit {
    Commit {
        sha: format!("{:0<40}", format!("{}{}", author, days_ago)),
        author_username: author.to_string(),
        author_avatar_url: Some(format!("https://avatars.example/{}", author)),
        message: message.to_string(),
        timestamp: Utc::now() - ChronoDuration::days(days_ago),
        additions: Some(10),
        deletions: Some(2),
    }
}

pub fn new_judgment() -> NewJudgment {
    NewJudgment {
        repo_owner: "acme".into(),
        repo_name: "payments".into(),
        title: "Checkout returns 500".into(),
        description: Some("TypeError: cannot read 'amount' of undefined".into()),
        file_path: Some("src/api/payment.ts".into()),
        period_days: 7,
    }
}

pub fn judgment(status: JudgmentStatus) -> Judgment {
    let mut judgment = new_judgment()
        .into_judgment(Utc::now())
        .unwrap();
    judgment.status = status;
    judgment
}

pub fn incident() -> IncidentContext {
    IncidentContext::from_judgment(&judgment(JudgmentStatus::Pending))
}

pub fn message_context() -> MessageContext {
    MessageContext {
        project: "acme/payments".into(),
        incident_title: "Checkout returns 500".into(),
        target_username: "bob".into(),
        responsibility: 70,
        commit_message: Some("Hotfix totals".into()),
        reason: "Last touched total()".into(),
    }
}
