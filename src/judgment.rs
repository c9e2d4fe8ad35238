//! Judgments, suspects and blames
//!
//! A judgment is one incident investigation. Analysis attaches a ranked list of
//! suspects; blame composition derives a tone-leveled message bundle from the
//! top suspect.

use crate::error::{CourtError, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum title length accepted when opening a case
pub const MAX_TITLE_CHARS: usize = 200;
/// Lookback window bounds, in days
pub const MIN_PERIOD_DAYS: u32 = 1;
pub const MAX_PERIOD_DAYS: u32 = 90;
pub const DEFAULT_PERIOD_DAYS: u32 = 7;
/// A judgment names between one and five suspects
pub const MAX_SUSPECTS: usize = 5;

// ============================================================================
// Commit history
// ============================================================================

/// A commit as supplied by a commit source. Identified by `sha`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub author_username: String,
    pub author_avatar_url: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub additions: Option<u32>,
    pub deletions: Option<u32>,
}

impl Commit {
    /// First line of the commit message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub login: String,
    pub contributions: u32,
}

/// Commits for a path over a window, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitHistory {
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub contributors: Option<Vec<Contributor>>,
}

// ============================================================================
// Repository reference
// ============================================================================

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

    /// Parse `owner/repo` or a GitHub URL in https, scheme-less or ssh form.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let path = if let Some(rest) = value.strip_prefix("git@github.com:") {
            rest.to_string()
        } else if value.contains("github.com") {
            match url::Url::parse(value) {
                Ok(parsed) => parsed.path().to_string(),
                Err(_) => value
                    .split("github.com")
                    .nth(1)
                    .unwrap_or_default()
                    .to_string(),
            }
        } else {
            value.to_string()
        };

        let path = path.trim_start_matches(['/', ':']).trim_end_matches('/');
        let mut parts = path.split('/');
        match (parts.next(), parts.next()) {
            (Some(owner), Some(name)) if !owner.is_empty() && !name.is_empty() => {
                Ok(Self::new(owner, name.trim_end_matches(".git")))
            }
            _ => Err(CourtError::InvalidInput(format!(
                "repository must be 'owner/repo' or a GitHub URL, got '{}'",
                value
            ))),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ============================================================================
// Judgment
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgmentStatus {
    Pending,
    Completed,
}

impl JudgmentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            JudgmentStatus::Pending => "pending",
            JudgmentStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for JudgmentStatus {
    type Err = CourtError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JudgmentStatus::Pending),
            "completed" => Ok(JudgmentStatus::Completed),
            other => Err(CourtError::InvalidInput(format!(
                "unknown judgment status '{}'",
                other
            ))),
        }
    }
}

/// Request to open a new case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJudgment {
    pub repo_owner: String,
    pub repo_name: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    #[serde(default = "default_period_days")]
    pub period_days: u32,
}

fn default_period_days() -> u32 {
    DEFAULT_PERIOD_DAYS
}

impl NewJudgment {
    pub fn validate(&self) -> Result<()> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(CourtError::InvalidInput("title must not be empty".into()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(CourtError::InvalidInput(format!(
                "title must be at most {} characters",
                MAX_TITLE_CHARS
            )));
        }
        if !(MIN_PERIOD_DAYS..=MAX_PERIOD_DAYS).contains(&self.period_days) {
            return Err(CourtError::InvalidInput(format!(
                "period_days must be between {} and {}",
                MIN_PERIOD_DAYS, MAX_PERIOD_DAYS
            )));
        }
        if self.repo_owner.trim().is_empty() || self.repo_name.trim().is_empty() {
            return Err(CourtError::InvalidInput(
                "repository owner and name are required".into(),
            ));
        }
        Ok(())
    }

    /// Validate and stamp a pending judgment with a fresh id and case number.
    pub fn into_judgment(self, now: DateTime<Utc>) -> Result<Judgment> {
        self.validate()?;
        Ok(Judgment {
            id: Uuid::new_v4(),
            case_number: case_number(now),
            repo_owner: self.repo_owner.trim().to_string(),
            repo_name: self.repo_name.trim().to_string(),
            title: self.title.trim().to_string(),
            description: self.description.filter(|d| !d.trim().is_empty()),
            file_path: self.file_path.filter(|p| !p.trim().is_empty()),
            period_days: self.period_days,
            status: JudgmentStatus::Pending,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub id: Uuid,
    pub case_number: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub period_days: u32,
    pub status: JudgmentStatus,
    pub created_at: DateTime<Utc>,
}

impl Judgment {
    pub fn repo(&self) -> RepoRef {
        RepoRef::new(&self.repo_owner, &self.repo_name)
    }

    /// Start of the commit lookback window
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(self.period_days))
    }

    /// Analysis may only run once per judgment.
    pub fn ensure_pending(&self) -> Result<()> {
        match self.status {
            JudgmentStatus::Pending => Ok(()),
            JudgmentStatus::Completed => Err(CourtError::InvalidState(format!(
                "judgment {} was already analyzed",
                self.case_number
            ))),
        }
    }

    /// Blame may only be composed against a completed analysis.
    pub fn ensure_completed(&self) -> Result<()> {
        match self.status {
            JudgmentStatus::Completed => Ok(()),
            JudgmentStatus::Pending => Err(CourtError::InvalidState(format!(
                "judgment {} has not been analyzed yet",
                self.case_number
            ))),
        }
    }
}

/// `YYYY-NNNN-NNNN-NNNN`, each group in 1000..=9999.
pub fn case_number(now: DateTime<Utc>) -> String {
    let bytes = *Uuid::new_v4().as_bytes();
    let groups: Vec<String> = bytes
        .chunks(2)
        .take(3)
        .map(|pair| {
            let raw = u16::from_be_bytes([pair[0], pair[1]]);
            (1000 + u32::from(raw) % 9000).to_string()
        })
        .collect();
    format!("{}-{}", now.year(), groups.join("-"))
}

// ============================================================================
// Suspects
// ============================================================================

/// A suspect before persistence. The analyzer fills the first three fields;
/// the rest come from commit enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspectDraft {
    pub username: String,
    pub responsibility: u8,
    pub reason: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub commit_count: u32,
    #[serde(default)]
    pub last_commit_message: Option<String>,
    #[serde(default)]
    pub last_commit_date: Option<DateTime<Utc>>,
}

impl SuspectDraft {
    pub fn new(username: impl Into<String>, responsibility: u8, reason: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            responsibility,
            reason: reason.into(),
            avatar_url: None,
            commit_count: 0,
            last_commit_message: None,
            last_commit_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspect {
    pub id: Uuid,
    pub judgment_id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub responsibility: u8,
    pub reason: String,
    pub commit_count: u32,
    pub last_commit_message: Option<String>,
    pub last_commit_date: Option<DateTime<Utc>>,
}

impl Suspect {
    pub fn from_draft(judgment_id: Uuid, draft: SuspectDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            judgment_id,
            username: draft.username,
            avatar_url: draft.avatar_url,
            responsibility: draft.responsibility,
            reason: draft.reason,
            commit_count: draft.commit_count,
            last_commit_message: draft.last_commit_message,
            last_commit_date: draft.last_commit_date,
        }
    }
}

// ============================================================================
// Blame
// ============================================================================

/// Tone preset for blame messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Mild,
    Medium,
    Spicy,
}

impl Intensity {
    pub const ALL: [Intensity; 3] = [Intensity::Mild, Intensity::Medium, Intensity::Spicy];

    pub fn label(&self) -> &'static str {
        match self {
            Intensity::Mild => "mild",
            Intensity::Medium => "medium",
            Intensity::Spicy => "spicy",
        }
    }

    /// Example tone handed to the model
    pub fn tone(&self) -> &'static str {
        match self {
            Intensity::Mild => "gentle and friendly, like a teammate nudging over coffee",
            Intensity::Medium => "direct but polite, like a code reviewer who means it",
            Intensity::Spicy => {
                "witty and playfully roasting, humorous but never crossing the line into insult"
            }
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Three sentences per intensity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameMessages {
    pub mild: Vec<String>,
    pub medium: Vec<String>,
    pub spicy: Vec<String>,
}

impl BlameMessages {
    pub fn get(&self, intensity: Intensity) -> &[String] {
        match intensity {
            Intensity::Mild => &self.mild,
            Intensity::Medium => &self.medium,
            Intensity::Spicy => &self.spicy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlamePayload {
    pub target_username: String,
    pub target_avatar: Option<String>,
    pub responsibility: u8,
    pub reason: String,
    pub messages: BlameMessages,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blame {
    pub id: Uuid,
    pub judgment_id: Uuid,
    #[serde(flatten)]
    pub payload: BlamePayload,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}
