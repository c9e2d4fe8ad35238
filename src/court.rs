//! The court: drives a judgment from opening to blame.
//!
//! Owns the ordering rules between the pipeline stages. Analysis runs once on
//! a pending judgment; its suspects are stored in the same store transition
//! that marks the judgment completed. Blame composition only runs against
//! completed ones.

use crate::analyzer::{enrich_suspects, rank_suspects, ResponsibilityAnalyzer};
use crate::composer::BlameComposer;
use crate::error::{CourtError, Result};
use crate::judgment::{Blame, Judgment, NewJudgment, Suspect};
use crate::llm::prompts::IncidentContext;
use crate::source::CommitSource;
use crate::store::{JudgmentPage, JudgmentStore, ListQuery};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// A judgment with everything attached to it
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    #[serde(flatten)]
    pub judgment: Judgment,
    pub suspects: Vec<Suspect>,
    pub blame: Option<Blame>,
}

/// Validate and store a new pending judgment.
pub async fn open_case(store: &dyn JudgmentStore, request: NewJudgment) -> Result<Judgment> {
    let judgment = store
        .create_judgment(request.into_judgment(Utc::now())?)
        .await?;
    tracing::info!(
        case = %judgment.case_number,
        id = %judgment.id,
        repo = %judgment.repo(),
        "opened case"
    );
    Ok(judgment)
}

async fn find_judgment(store: &dyn JudgmentStore, id: Uuid) -> Result<Judgment> {
    store.find_judgment(id).await?.ok_or(CourtError::NotFound(id))
}

pub async fn load_report(store: &dyn JudgmentStore, id: Uuid) -> Result<CaseReport> {
    let judgment = find_judgment(store, id).await?;
    let suspects = store.find_suspects(id).await?;
    let blame = store.find_blame(id).await?;
    Ok(CaseReport {
        judgment,
        suspects,
        blame,
    })
}

pub struct Court {
    source: Arc<dyn CommitSource>,
    store: Arc<dyn JudgmentStore>,
    analyzer: Arc<ResponsibilityAnalyzer>,
    composer: BlameComposer,
}

impl Court {
    pub fn new(
        source: Arc<dyn CommitSource>,
        store: Arc<dyn JudgmentStore>,
        analyzer: Arc<ResponsibilityAnalyzer>,
    ) -> Self {
        let composer = BlameComposer::new(analyzer.clone());
        Self {
            source,
            store,
            analyzer,
            composer,
        }
    }

    pub async fn open_case(&self, request: NewJudgment) -> Result<Judgment> {
        open_case(self.store.as_ref(), request).await
    }

    async fn judgment(&self, id: Uuid) -> Result<Judgment> {
        find_judgment(self.store.as_ref(), id).await
    }

    /// Fetch commits, ask the model, store the ranked suspects and complete
    /// the judgment.
    pub async fn analyze(&self, id: Uuid) -> Result<CaseReport> {
        let judgment = self.judgment(id).await?;
        judgment.ensure_pending()?;

        let since = judgment.since(Utc::now());
        let history = self
            .source
            .list_commits(&judgment.repo(), judgment.file_path.as_deref(), since)
            .await?;
        if history.commits.is_empty() {
            return Err(CourtError::InvalidInput(format!(
                "no commits found for {} in the last {} days",
                judgment.repo(),
                judgment.period_days
            )));
        }

        let drafts = self
            .analyzer
            .analyze(&IncidentContext::from_judgment(&judgment), &history)
            .await?;
        let drafts = enrich_suspects(rank_suspects(drafts), &history.commits);

        let (judgment, suspects) = self.store.complete_with_suspects(id, drafts).await?;
        tracing::info!(
            case = %judgment.case_number,
            suspects = suspects.len(),
            top = suspects.first().map(|s| s.username.as_str()).unwrap_or(""),
            "judgment completed"
        );

        Ok(CaseReport {
            judgment,
            suspects,
            blame: None,
        })
    }

    /// Compose and upsert the blame for a completed judgment.
    pub async fn compose_blame(&self, id: Uuid) -> Result<Blame> {
        let judgment = self.judgment(id).await?;
        judgment.ensure_completed()?;
        let suspects = self.store.find_suspects(id).await?;
        let payload = self.composer.compose(&judgment, &suspects).await?;
        let blame = self.store.upsert_blame(id, payload).await?;
        tracing::info!(case = %judgment.case_number, target = %blame.payload.target_username, "blame stored");
        Ok(blame)
    }

    pub async fn report(&self, id: Uuid) -> Result<CaseReport> {
        load_report(self.store.as_ref(), id).await
    }

    pub async fn list(&self, query: ListQuery) -> Result<JudgmentPage> {
        self.store.list_judgments(query).await
    }

    /// Record the rendered image for an existing blame.
    pub async fn attach_image(&self, id: Uuid, image_url: &str) -> Result<Blame> {
        let url = url::Url::parse(image_url)
            .map_err(|e| CourtError::InvalidInput(format!("invalid image url: {}", e)))?;
        self.store.set_blame_image(id, url.to_string()).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete_judgment(id).await?;
        tracing::info!(%id, "deleted judgment");
        Ok(())
    }
}
