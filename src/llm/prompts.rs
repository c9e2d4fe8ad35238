//! Prompt templates for the analysis and message paths
//!
//! Both builders are pure: the same inputs always produce the same text, so the
//! provider adapters never carry prompt wording of their own.

use crate::judgment::{CommitHistory, Intensity, Judgment, MAX_SUSPECTS};
use crate::util::truncate;
use serde_json::json;

/// Per-commit message budget inside a prompt
const MAX_COMMIT_MESSAGE_CHARS: usize = 400;
const MAX_PROMPT_CONTRIBUTORS: usize = 30;

/// Incident facts handed to the analysis prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentContext {
    pub project: String,
    pub title: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
}

impl IncidentContext {
    pub fn from_judgment(judgment: &Judgment) -> Self {
        Self {
            project: judgment.repo().to_string(),
            title: judgment.title.clone(),
            description: judgment.description.clone(),
            file_path: judgment.file_path.clone(),
        }
    }
}

/// Facts about the chosen target handed to the message prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub project: String,
    pub incident_title: String,
    pub target_username: String,
    pub responsibility: u8,
    pub commit_message: Option<String>,
    pub reason: String,
}

const ANALYSIS_RUBRIC: &str = r#"You are the presiding judge of a blameless-but-honest incident court.
Apportion responsibility for the incident among the commit authors below.

JUDGING RULES:
- The last person to modify the affected code bears the most responsibility
- Commits whose message, timing or diff relate to the incident raise responsibility
- More recent commits weigh more than older ones
- Choose between 1 and {max_suspects} suspects, only from the listed authors
- Responsibilities are integers from 0 to 100 and MUST sum to exactly 100
- Sort suspects by responsibility, highest first
- "reason" is one short sentence explaining the verdict for that suspect

OUTPUT FORMAT:
Respond with JSON only. No prose, no markdown, no code fences.
{"suspects":[{"username":"author-login","responsibility":60,"reason":"Last modified the failing function an hour before the incident"}]}"#;

/// Analysis prompt: the fixed judging rubric, then the incident, target file,
/// every commit in the window and contributor stats.
pub fn analysis_prompt(incident: &IncidentContext, history: &CommitHistory) -> String {
    let commits: Vec<serde_json::Value> = history
        .commits
        .iter()
        .map(|commit| {
            json!({
                "sha": commit.sha,
                "author": commit.author_username,
                "message": truncate(commit.message.trim(), MAX_COMMIT_MESSAGE_CHARS),
                "date": commit.timestamp.to_rfc3339(),
                "additions": commit.additions,
                "deletions": commit.deletions,
            })
        })
        .collect();

    let commits_text = if commits.is_empty() {
        "none".to_string()
    } else {
        to_pretty(&serde_json::Value::Array(commits))
    };

    let contributors_text = match history.contributors.as_deref() {
        Some(list) if !list.is_empty() => {
            let rows: Vec<serde_json::Value> = list
                .iter()
                .take(MAX_PROMPT_CONTRIBUTORS)
                .map(|c| json!({"login": c.login, "contributions": c.contributions}))
                .collect();
            to_pretty(&serde_json::Value::Array(rows))
        }
        _ => "none".to_string(),
    };

    format!(
        "{rubric}\n\n\
         PROJECT: {project}\n\
         INCIDENT: {title}\n\
         DESCRIPTION:\n{description}\n\n\
         AFFECTED FILE: {file}\n\n\
         COMMITS (newest first, {total} in window):\n{commits}\n\n\
         CONTRIBUTOR STATS:\n{contributors}\n",
        rubric = ANALYSIS_RUBRIC.replace("{max_suspects}", &MAX_SUSPECTS.to_string()),
        project = incident.project,
        title = incident.title,
        description = incident
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("(no description provided)"),
        file = incident.file_path.as_deref().unwrap_or("(whole repository)"),
        total = history.commits.len(),
        commits = commits_text,
        contributors = contributors_text,
    )
}

/// Message prompt for one intensity level.
pub fn message_prompt(ctx: &MessageContext, intensity: Intensity) -> String {
    format!(
        "You write short blame messages for a light-hearted incident court.\n\n\
         PROJECT: {project}\n\
         INCIDENT: {title}\n\
         TARGET: @{user}\n\
         RESPONSIBILITY: {pct}%\n\
         MOST RELEVANT COMMIT: {commit}\n\
         VERDICT: {reason}\n\n\
         INTENSITY: {label} ({tone})\n\n\
         Write exactly three short sentences addressed to @{user} in that tone.\n\
         The last sentence must end with a fitting emoji.\n\
         Respond with a JSON array of three strings only, no prose and no code fences:\n\
         [\"first sentence\", \"second sentence\", \"third sentence 🔥\"]",
        project = ctx.project,
        title = ctx.incident_title,
        user = ctx.target_username,
        pct = ctx.responsibility,
        commit = ctx
            .commit_message
            .as_deref()
            .map(|m| truncate(m.lines().next().unwrap_or("").trim(), MAX_COMMIT_MESSAGE_CHARS))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "(unknown)".to_string()),
        reason = ctx.reason,
        label = intensity.label(),
        tone = intensity.tone(),
    )
}

fn to_pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
