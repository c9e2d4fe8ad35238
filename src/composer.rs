//! Blame composition
//!
//! Picks the top suspect of a completed judgment and has the model write three
//! sentences at each intensity. The three generations run concurrently and
//! the first failure aborts the composition.

use crate::analyzer::ResponsibilityAnalyzer;
use crate::error::{CourtError, Result};
use crate::judgment::{BlameMessages, BlamePayload, Intensity, Judgment, Suspect};
use crate::llm::prompts::MessageContext;
use std::sync::Arc;

pub struct BlameComposer {
    analyzer: Arc<ResponsibilityAnalyzer>,
}

impl BlameComposer {
    pub fn new(analyzer: Arc<ResponsibilityAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Build the blame payload for `judgment`.
    ///
    /// Nothing is persisted here; callers upsert the result so that a failed
    /// composition never leaves a partial blame behind.
    pub async fn compose(&self, judgment: &Judgment, suspects: &[Suspect]) -> Result<BlamePayload> {
        judgment.ensure_completed()?;
        let target = select_target(suspects).ok_or_else(|| {
            CourtError::InvalidState(format!(
                "judgment {} has no suspects to blame",
                judgment.case_number
            ))
        })?;

        let ctx = MessageContext {
            project: judgment.repo().to_string(),
            incident_title: judgment.title.clone(),
            target_username: target.username.clone(),
            responsibility: target.responsibility,
            commit_message: target.last_commit_message.clone(),
            reason: target.reason.clone(),
        };

        tracing::info!(
            case = %judgment.case_number,
            target = %target.username,
            responsibility = target.responsibility,
            "composing blame"
        );

        let (mild, medium, spicy) = futures::future::try_join3(
            self.analyzer.generate_messages(&ctx, Intensity::Mild),
            self.analyzer.generate_messages(&ctx, Intensity::Medium),
            self.analyzer.generate_messages(&ctx, Intensity::Spicy),
        )
        .await?;

        Ok(BlamePayload {
            target_username: target.username.clone(),
            target_avatar: target.avatar_url.clone(),
            responsibility: target.responsibility,
            reason: target.reason.clone(),
            messages: BlameMessages { mild, medium, spicy },
        })
    }
}

/// Highest responsibility wins; on ties the earliest suspect in `suspects`.
pub fn select_target(suspects: &[Suspect]) -> Option<&Suspect> {
    suspects.iter().fold(None, |best: Option<&Suspect>, s| match best {
        Some(b) if b.responsibility >= s.responsibility => Some(b),
        _ => Some(s),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judgment::{JudgmentStatus, SuspectDraft};
    use crate::llm::{LlmGateway, RetryPolicy};
    use crate::testing::{judgment, ScriptedProvider};
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    const MILD: &str = r#"["Hey bob.", "Totals broke a bit.", "Coffee's on you ☕"]"#;
    const MEDIUM: &str = r#"["Bob.", "Your hotfix broke checkout.", "Please add a test 🙏"]"#;
    const SPICY: &str = r#"["Bob!", "Checkout is on fire.", "Bring the extinguisher 🔥"]"#;

    fn routed() -> ScriptedProvider {
        ScriptedProvider::routed([
            ("INTENSITY: mild", MILD),
            ("INTENSITY: medium", MEDIUM),
            ("INTENSITY: spicy", SPICY),
        ])
    }

    fn composer(provider: &Arc<ScriptedProvider>) -> BlameComposer {
        let analyzer = ResponsibilityAnalyzer::new(LlmGateway::new(provider.clone()))
            .with_retry(RetryPolicy::immediate(3));
        BlameComposer::new(Arc::new(analyzer))
    }

    fn suspects(pairs: &[(&str, u8)]) -> Vec<Suspect> {
        let judgment_id = Uuid::new_v4();
        pairs
            .iter()
            .map(|(name, r)| Suspect::from_draft(judgment_id, SuspectDraft::new(*name, *r, "touched it")))
            .collect()
    }

    #[test]
    fn test_highest_responsibility_is_target() {
        let list = suspects(&[("alice", 30), ("bob", 70)]);
        assert_eq!(select_target(&list).unwrap().username, "bob");
    }

    #[test]
    fn test_tie_goes_to_first_occurrence() {
        let list = suspects(&[("alice", 70), ("bob", 70)]);
        assert_eq!(select_target(&list).unwrap().username, "alice");
        assert!(select_target(&[]).is_none());
    }

    #[tokio::test]
    async fn test_compose_fills_every_intensity() {
        let provider = Arc::new(routed());
        let payload = composer(&provider)
            .compose(
                &judgment(JudgmentStatus::Completed),
                &suspects(&[("alice", 30), ("bob", 70)]),
            )
            .await
            .unwrap();

        assert_eq!(payload.target_username, "bob");
        assert_eq!(payload.responsibility, 70);
        for intensity in Intensity::ALL {
            assert_eq!(payload.messages.get(intensity).len(), 3);
        }
        assert_eq!(payload.messages.spicy[2], "Bring the extinguisher 🔥");
        assert_eq!(provider.calls(), 3);

        let value = serde_json::to_value(&payload.messages).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["medium", "mild", "spicy"]);
    }

    #[tokio::test]
    async fn test_intensities_are_generated_concurrently() {
        let delay = Duration::from_millis(200);
        let provider = Arc::new(routed().with_delay(delay));
        let started = Instant::now();
        composer(&provider)
            .compose(&judgment(JudgmentStatus::Completed), &suspects(&[("bob", 100)]))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(provider.calls(), 3);
        // One round trip of latency, not three back to back.
        assert!(elapsed >= delay);
        assert!(elapsed < delay * 2, "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_pending_judgment_makes_no_calls() {
        let provider = Arc::new(routed());
        let err = composer(&provider)
            .compose(&judgment(JudgmentStatus::Pending), &suspects(&[("bob", 100)]))
            .await
            .unwrap_err();
        assert!(matches!(err, CourtError::InvalidState(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_suspects_is_invalid_state() {
        let provider = Arc::new(routed());
        let err = composer(&provider)
            .compose(&judgment(JudgmentStatus::Completed), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CourtError::InvalidState(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_one_failing_intensity_fails_composition() {
        let provider = Arc::new(ScriptedProvider::routed([
            ("INTENSITY: mild", MILD),
            ("INTENSITY: medium", r#"["just one"]"#),
            ("INTENSITY: spicy", SPICY),
        ]));
        let err = composer(&provider)
            .compose(&judgment(JudgmentStatus::Completed), &suspects(&[("bob", 100)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CourtError::MessageGenerationFailed {
                intensity: Intensity::Medium,
                ..
            }
        ));
    }
}
