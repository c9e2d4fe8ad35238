//! Persistence for judgments, suspects and blames
//!
//! The pipeline talks to storage only through [`JudgmentStore`]. Both bundled
//! stores keep the whole court record as one [`StoreState`] and differ only in
//! where that state lives.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::{CourtError, Result};
use crate::judgment::{
    Blame, BlamePayload, Judgment, JudgmentStatus, Suspect, SuspectDraft, MAX_SUSPECTS,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Filter and page for [`JudgmentStore::list_judgments`]. Pages start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub status: Option<JudgmentStatus>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl ListQuery {
    pub fn with_status(status: Option<JudgmentStatus>) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(CourtError::InvalidInput("page starts at 1".into()));
        }
        if self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            return Err(CourtError::InvalidInput(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }
        Ok(())
    }

    fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.per_page as usize)
    }
}

/// A listed judgment and whether it already has a blame
#[derive(Debug, Clone, Serialize)]
pub struct JudgmentSummary {
    #[serde(flatten)]
    pub judgment: Judgment,
    pub has_blame: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgmentPage {
    pub items: Vec<JudgmentSummary>,
    /// Matching judgments across all pages
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
}

#[async_trait]
pub trait JudgmentStore: Send + Sync {
    async fn create_judgment(&self, judgment: Judgment) -> Result<Judgment>;

    async fn find_judgment(&self, id: Uuid) -> Result<Option<Judgment>>;

    /// Newest first, optionally filtered by status.
    async fn list_judgments(&self, query: ListQuery) -> Result<JudgmentPage>;

    /// Persist suspects in the given order. Only a pending judgment without
    /// suspects accepts them.
    async fn create_suspects(&self, judgment_id: Uuid, drafts: Vec<SuspectDraft>)
        -> Result<Vec<Suspect>>;

    /// Suspects in the order they were created.
    async fn find_suspects(&self, judgment_id: Uuid) -> Result<Vec<Suspect>>;

    /// Pending → completed. Fails with `InvalidState` if the judgment was
    /// already completed, so the transition happens at most once.
    async fn mark_completed(&self, judgment_id: Uuid) -> Result<Judgment>;

    /// `create_suspects` and `mark_completed` as one transition: either both
    /// happen or neither does.
    async fn complete_with_suspects(
        &self,
        judgment_id: Uuid,
        drafts: Vec<SuspectDraft>,
    ) -> Result<(Judgment, Vec<Suspect>)>;

    /// Create or fully replace the judgment's blame. A replaced blame loses
    /// its rendered image.
    async fn upsert_blame(&self, judgment_id: Uuid, payload: BlamePayload) -> Result<Blame>;

    async fn find_blame(&self, judgment_id: Uuid) -> Result<Option<Blame>>;

    async fn set_blame_image(&self, judgment_id: Uuid, image_url: String) -> Result<Blame>;

    /// Remove the judgment along with its suspects and blame.
    async fn delete_judgment(&self, judgment_id: Uuid) -> Result<()>;
}

/// Everything a store persists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreState {
    pub judgments: Vec<Judgment>,
    pub suspects: Vec<Suspect>,
    pub blames: Vec<Blame>,
}

impl StoreState {
    fn judgment_ref(&self, id: Uuid) -> Result<&Judgment> {
        self.judgments
            .iter()
            .find(|j| j.id == id)
            .ok_or(CourtError::NotFound(id))
    }

    fn judgment_mut(&mut self, id: Uuid) -> Result<&mut Judgment> {
        self.judgments
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(CourtError::NotFound(id))
    }

    fn require_judgment(&self, id: Uuid) -> Result<()> {
        self.judgment_ref(id).map(|_| ())
    }

    pub fn insert_judgment(&mut self, judgment: Judgment) -> Result<Judgment> {
        if self.judgments.iter().any(|j| j.id == judgment.id) {
            return Err(CourtError::Store(format!(
                "judgment {} already exists",
                judgment.id
            )));
        }
        self.judgments.push(judgment.clone());
        Ok(judgment)
    }

    pub fn judgment(&self, id: Uuid) -> Option<Judgment> {
        self.judgments.iter().find(|j| j.id == id).cloned()
    }

    pub fn list(&self, query: &ListQuery) -> JudgmentPage {
        let mut matching: Vec<&Judgment> = self
            .judgments
            .iter()
            .filter(|j| query.status.is_none_or(|s| j.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let items = matching
            .iter()
            .skip(query.offset())
            .take(query.per_page as usize)
            .map(|j| JudgmentSummary {
                judgment: (*j).clone(),
                has_blame: self.blames.iter().any(|b| b.judgment_id == j.id),
            })
            .collect();

        JudgmentPage {
            items,
            total: matching.len(),
            page: query.page,
            per_page: query.per_page,
        }
    }

    pub fn add_suspects(&mut self, judgment_id: Uuid, drafts: Vec<SuspectDraft>) -> Result<Vec<Suspect>> {
        self.judgment_ref(judgment_id)?.ensure_pending()?;
        if self.suspects.iter().any(|s| s.judgment_id == judgment_id) {
            return Err(CourtError::InvalidState(format!(
                "judgment {} already has suspects",
                judgment_id
            )));
        }
        if drafts.is_empty() || drafts.len() > MAX_SUSPECTS {
            return Err(CourtError::InvalidInput(format!(
                "expected between 1 and {} suspects, got {}",
                MAX_SUSPECTS,
                drafts.len()
            )));
        }
        let created: Vec<Suspect> = drafts
            .into_iter()
            .map(|draft| Suspect::from_draft(judgment_id, draft))
            .collect();
        self.suspects.extend(created.iter().cloned());
        Ok(created)
    }

    pub fn suspects(&self, judgment_id: Uuid) -> Vec<Suspect> {
        self.suspects
            .iter()
            .filter(|s| s.judgment_id == judgment_id)
            .cloned()
            .collect()
    }

    pub fn complete(&mut self, judgment_id: Uuid) -> Result<Judgment> {
        let judgment = self.judgment_mut(judgment_id)?;
        judgment.ensure_pending()?;
        judgment.status = JudgmentStatus::Completed;
        Ok(judgment.clone())
    }

    pub fn complete_with_suspects(
        &mut self,
        judgment_id: Uuid,
        drafts: Vec<SuspectDraft>,
    ) -> Result<(Judgment, Vec<Suspect>)> {
        let suspects = self.add_suspects(judgment_id, drafts)?;
        let judgment = self.complete(judgment_id)?;
        Ok((judgment, suspects))
    }

    pub fn upsert_blame(&mut self, judgment_id: Uuid, payload: BlamePayload) -> Result<Blame> {
        self.require_judgment(judgment_id)?;
        if let Some(existing) = self.blames.iter_mut().find(|b| b.judgment_id == judgment_id) {
            existing.payload = payload;
            existing.image_url = None;
            existing.created_at = Utc::now();
            return Ok(existing.clone());
        }
        let blame = Blame {
            id: Uuid::new_v4(),
            judgment_id,
            payload,
            image_url: None,
            created_at: Utc::now(),
        };
        self.blames.push(blame.clone());
        Ok(blame)
    }

    pub fn blame(&self, judgment_id: Uuid) -> Option<Blame> {
        self.blames
            .iter()
            .find(|b| b.judgment_id == judgment_id)
            .cloned()
    }

    pub fn set_blame_image(&mut self, judgment_id: Uuid, image_url: String) -> Result<Blame> {
        let blame = self
            .blames
            .iter_mut()
            .find(|b| b.judgment_id == judgment_id)
            .ok_or(CourtError::NotFound(judgment_id))?;
        blame.image_url = Some(image_url);
        Ok(blame.clone())
    }

    pub fn remove(&mut self, judgment_id: Uuid) -> Result<()> {
        self.require_judgment(judgment_id)?;
        self.judgments.retain(|j| j.id != judgment_id);
        self.suspects.retain(|s| s.judgment_id != judgment_id);
        self.blames.retain(|b| b.judgment_id != judgment_id);
        Ok(())
    }
}

/// Somewhere a [`StoreState`] can be read and updated as a unit.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreState) -> T + Send + 'static;

    /// Apply `f`; the change is kept only if `f` succeeds.
    async fn update<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreState) -> Result<T> + Send + 'static;
}

#[async_trait]
impl<B: StateBackend> JudgmentStore for B {
    async fn create_judgment(&self, judgment: Judgment) -> Result<Judgment> {
        self.update(move |state| state.insert_judgment(judgment)).await
    }

    async fn find_judgment(&self, id: Uuid) -> Result<Option<Judgment>> {
        self.read(move |state| state.judgment(id)).await
    }

    async fn list_judgments(&self, query: ListQuery) -> Result<JudgmentPage> {
        query.validate()?;
        self.read(move |state| state.list(&query)).await
    }

    async fn create_suspects(
        &self,
        judgment_id: Uuid,
        drafts: Vec<SuspectDraft>,
    ) -> Result<Vec<Suspect>> {
        self.update(move |state| state.add_suspects(judgment_id, drafts))
            .await
    }

    async fn find_suspects(&self, judgment_id: Uuid) -> Result<Vec<Suspect>> {
        self.read(move |state| state.suspects(judgment_id)).await
    }

    async fn mark_completed(&self, judgment_id: Uuid) -> Result<Judgment> {
        self.update(move |state| state.complete(judgment_id)).await
    }

    async fn complete_with_suspects(
        &self,
        judgment_id: Uuid,
        drafts: Vec<SuspectDraft>,
    ) -> Result<(Judgment, Vec<Suspect>)> {
        self.update(move |state| state.complete_with_suspects(judgment_id, drafts))
            .await
    }

    async fn upsert_blame(&self, judgment_id: Uuid, payload: BlamePayload) -> Result<Blame> {
        self.update(move |state| state.upsert_blame(judgment_id, payload))
            .await
    }

    async fn find_blame(&self, judgment_id: Uuid) -> Result<Option<Blame>> {
        self.read(move |state| state.blame(judgment_id)).await
    }

    async fn set_blame_image(&self, judgment_id: Uuid, image_url: String) -> Result<Blame> {
        self.update(move |state| state.set_blame_image(judgment_id, image_url))
            .await
    }

    async fn delete_judgment(&self, judgment_id: Uuid) -> Result<()> {
        self.update(move |state| state.remove(judgment_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judgment::BlameMessages;
    use crate::testing::judgment;

    fn payload(first: &str) -> BlamePayload {
        BlamePayload {
            target_username: "bob".into(),
            target_avatar: None,
            responsibility: 70,
            reason: "Last touched total()".into(),
            messages: BlameMessages {
                mild: vec![first.into(), "b".into(), "c ☕".into()],
                medium: vec!["d".into(), "e".into(), "f 🙏".into()],
                spicy: vec!["g".into(), "h".into(), "i 🔥".into()],
            },
        }
    }

    #[test]
    fn test_completion_happens_once() {
        let mut state = StoreState::default();
        let j = state.insert_judgment(judgment(JudgmentStatus::Pending)).unwrap();
        assert_eq!(state.complete(j.id).unwrap().status, JudgmentStatus::Completed);
        assert!(matches!(state.complete(j.id), Err(CourtError::InvalidState(_))));
        assert!(matches!(
            state.complete(Uuid::new_v4()),
            Err(CourtError::NotFound(_))
        ));
    }

    #[test]
    fn test_suspects_keep_creation_order() {
        let mut state = StoreState::default();
        let j = state.insert_judgment(judgment(JudgmentStatus::Pending)).unwrap();
        state
            .add_suspects(
                j.id,
                vec![SuspectDraft::new("bob", 70, "r"), SuspectDraft::new("alice", 30, "r")],
            )
            .unwrap();
        let names: Vec<_> = state.suspects(j.id).into_iter().map(|s| s.username).collect();
        assert_eq!(names, vec!["bob", "alice"]);
        assert!(state.add_suspects(Uuid::new_v4(), vec![]).is_err());
    }

    #[test]
    fn test_upsert_replaces_messages_and_clears_image() {
        let mut state = StoreState::default();
        let j = state.insert_judgment(judgment(JudgmentStatus::Completed)).unwrap();
        let first = state.upsert_blame(j.id, payload("old")).unwrap();
        state
            .set_blame_image(j.id, "https://img.example/1.png".into())
            .unwrap();

        let second = state.upsert_blame(j.id, payload("new")).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.payload.messages.mild[0], "new");
        assert!(second.image_url.is_none());
        assert_eq!(state.blames.len(), 1);
    }

    #[test]
    fn test_list_filters_and_orders_newest_first() {
        let mut state = StoreState::default();
        let mut older = judgment(JudgmentStatus::Completed);
        older.created_at -= chrono::Duration::days(1);
        let newer = judgment(JudgmentStatus::Pending);
        state.insert_judgment(older.clone()).unwrap();
        state.insert_judgment(newer.clone()).unwrap();

        let all: Vec<_> = state
            .list(&ListQuery::default())
            .items
            .into_iter()
            .map(|s| s.judgment.id)
            .collect();
        assert_eq!(all, vec![newer.id, older.id]);
        let pending = state.list(&ListQuery::with_status(Some(JudgmentStatus::Pending)));
        assert_eq!(pending.total, 1);
        assert_eq!(pending.items[0].judgment.id, newer.id);
    }

    #[test]
    fn test_list_pages_and_flags_blames() {
        let mut state = StoreState::default();
        let mut ids = Vec::new();
        for age in 0..5 {
            let mut j = judgment(JudgmentStatus::Completed);
            j.created_at -= chrono::Duration::hours(age);
            ids.push(state.insert_judgment(j).unwrap().id);
        }
        state.upsert_blame(ids[3], payload("a")).unwrap();

        let page = state.list(&ListQuery {
            status: None,
            page: 2,
            per_page: 2,
        });
        assert_eq!(page.total, 5);
        assert_eq!(page.page, 2);
        let listed: Vec<_> = page.items.iter().map(|s| (s.judgment.id, s.has_blame)).collect();
        assert_eq!(listed, vec![(ids[2], false), (ids[3], true)]);

        let past_end = state.list(&ListQuery {
            status: None,
            page: 4,
            per_page: 2,
        });
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.total, 5);
    }

    #[test]
    fn test_list_query_bounds() {
        assert!(ListQuery::default().validate().is_ok());
        let zero_page = ListQuery {
            page: 0,
            ..ListQuery::default()
        };
        assert!(matches!(zero_page.validate(), Err(CourtError::InvalidInput(_))));
        let huge = ListQuery {
            per_page: MAX_PER_PAGE + 1,
            ..ListQuery::default()
        };
        assert!(matches!(huge.validate(), Err(CourtError::InvalidInput(_))));
    }

    #[test]
    fn test_suspects_only_land_once_on_pending_judgments() {
        let mut state = StoreState::default();
        let j = state.insert_judgment(judgment(JudgmentStatus::Pending)).unwrap();
        state.add_suspects(j.id, vec![SuspectDraft::new("bob", 100, "r")]).unwrap();
        assert!(matches!(
            state.add_suspects(j.id, vec![SuspectDraft::new("eve", 100, "r")]),
            Err(CourtError::InvalidState(_))
        ));

        let done = state.insert_judgment(judgment(JudgmentStatus::Completed)).unwrap();
        assert!(matches!(
            state.add_suspects(done.id, vec![SuspectDraft::new("bob", 100, "r")]),
            Err(CourtError::InvalidState(_))
        ));

        let fresh = state.insert_judgment(judgment(JudgmentStatus::Pending)).unwrap();
        let six = (0..6).map(|i| SuspectDraft::new(format!("dev-{i}"), 10, "r")).collect();
        assert!(matches!(
            state.add_suspects(fresh.id, six),
            Err(CourtError::InvalidInput(_))
        ));
        assert!(matches!(
            state.add_suspects(fresh.id, vec![]),
            Err(CourtError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_complete_with_suspects_is_all_or_nothing() {
        let mut state = StoreState::default();
        let j = state.insert_judgment(judgment(JudgmentStatus::Pending)).unwrap();
        let (done, suspects) = state
            .complete_with_suspects(j.id, vec![SuspectDraft::new("bob", 100, "r")])
            .unwrap();
        assert_eq!(done.status, JudgmentStatus::Completed);
        assert_eq!(suspects.len(), 1);

        assert!(matches!(
            state.complete_with_suspects(j.id, vec![SuspectDraft::new("eve", 100, "r")]),
            Err(CourtError::InvalidState(_))
        ));
        let names: Vec<_> = state.suspects(j.id).into_iter().map(|s| s.username).collect();
        assert_eq!(names, vec!["bob"]);
    }

    #[test]
    fn test_remove_cascades() {
        let mut state = StoreState::default();
        let j = state.insert_judgment(judgment(JudgmentStatus::Pending)).unwrap();
        state
            .complete_with_suspects(j.id, vec![SuspectDraft::new("bob", 100, "r")])
            .unwrap();
        state.upsert_blame(j.id, payload("a")).unwrap();

        state.remove(j.id).unwrap();
        assert!(state.judgment(j.id).is_none());
        assert!(state.suspects(j.id).is_empty());
        assert!(state.blame(j.id).is_none());
        assert!(matches!(state.remove(j.id), Err(CourtError::NotFound(_))));
    }
}
