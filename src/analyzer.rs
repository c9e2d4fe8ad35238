//! Responsibility analysis
//!
//! Prompt → model → fence stripping → schema validation, retried as a unit.
//! The same retry-wrapped path produces blame messages for the composer.

use crate::config::Config;
use crate::error::{CourtError, Result};
use crate::judgment::{Commit, CommitHistory, Intensity, SuspectDraft};
use crate::llm::parse::{apply_sum_policy, parse_messages, parse_suspects, SumPolicy};
use crate::llm::prompts::{analysis_prompt, message_prompt, IncidentContext, MessageContext};
use crate::llm::{LlmGateway, RetryPolicy};

pub struct ResponsibilityAnalyzer {
    gateway: LlmGateway,
    analysis_retry: RetryPolicy,
    message_retry: RetryPolicy,
    sum_policy: SumPolicy,
}

impl ResponsibilityAnalyzer {
    pub fn new(gateway: LlmGateway) -> Self {
        Self {
            gateway,
            analysis_retry: RetryPolicy::default(),
            message_retry: RetryPolicy::default(),
            sum_policy: SumPolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(LlmGateway::from_config(config)?)
            .with_retry(config.retry_policy())
            .with_sum_policy(config.sum_policy))
    }

    /// Use `policy` for both the analysis and the message path.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.analysis_retry = policy;
        self.message_retry = policy;
        self
    }

    pub fn with_message_retry(mut self, policy: RetryPolicy) -> Self {
        self.message_retry = policy;
        self
    }

    pub fn with_sum_policy(mut self, policy: SumPolicy) -> Self {
        self.sum_policy = policy;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.gateway.provider_name()
    }

    /// Ask the model who is responsible.
    ///
    /// Returns validated drafts in the model's order; ranking is the caller's
    /// job. Malformed output and transport failures are retried per the
    /// analysis policy, after which `AnalysisFailed` carries the last cause.
    pub async fn analyze(
        &self,
        incident: &IncidentContext,
        history: &CommitHistory,
    ) -> Result<Vec<SuspectDraft>> {
        let prompt = analysis_prompt(incident, history);
        tracing::debug!(
            provider = self.gateway.provider_name(),
            commits = history.commits.len(),
            prompt_chars = prompt.len(),
            "requesting responsibility analysis"
        );

        let gateway = &self.gateway;
        let prompt = prompt.as_str();
        let sum_policy = self.sum_policy;
        self.analysis_retry
            .run("analysis", |_| async move {
                let response = gateway.complete_analysis(prompt).await?;
                let suspects = parse_suspects(&response)?;
                apply_sum_policy(suspects, sum_policy)
            })
            .await
            .map_err(|exhausted| CourtError::AnalysisFailed {
                attempts: exhausted.attempts,
                source: Box::new(exhausted.last_error),
            })
    }

    /// Three sentences for one intensity, retried per the message policy.
    pub async fn generate_messages(
        &self,
        ctx: &MessageContext,
        intensity: Intensity,
    ) -> Result<Vec<String>> {
        let prompt = message_prompt(ctx, intensity);
        let label = format!("{} messages", intensity);

        let gateway = &self.gateway;
        let prompt = prompt.as_str();
        self.message_retry
            .run(&label, |_| async move {
                let response = gateway.complete_message(prompt).await?;
                parse_messages(&response)
            })
            .await
            .map_err(|exhausted| CourtError::MessageGenerationFailed {
                intensity,
                attempts: exhausted.attempts,
                source: Box::new(exhausted.last_error),
            })
    }
}

/// Order by responsibility, highest first. Stable, so ties keep model order.
pub fn rank_suspects(mut drafts: Vec<SuspectDraft>) -> Vec<SuspectDraft> {
    drafts.sort_by(|a, b| b.responsibility.cmp(&a.responsibility));
    drafts
}

/// Fill avatar, commit count and latest commit from the history.
pub fn enrich_suspects(drafts: Vec<SuspectDraft>, commits: &[Commit]) -> Vec<SuspectDraft> {
    drafts
        .into_iter()
        .map(|mut draft| {
            let mut matching: Vec<&Commit> = commits
                .iter()
                .filter(|c| c.author_username == draft.username)
                .collect();
            matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

            draft.commit_count = matching.len() as u32;
            if let Some(latest) = matching.first() {
                draft.last_commit_message = Some(latest.message.clone());
                draft.last_commit_date = Some(latest.timestamp);
            }
            draft.avatar_url = matching.iter().find_map(|c| c.author_avatar_url.clone());
            draft
        })
        .collect()
}
