use super::{StateBackend, StoreState};
use crate::error::{CourtError, Result};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

/// Process-local store, used by tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| CourtError::Store("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl StateBackend for MemoryStore {
    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreState) -> T + Send + 'static,
    {
        Ok(f(&*self.lock()?))
    }

    async fn update<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreState) -> Result<T> + Send + 'static,
    {
        let mut guard = self.lock()?;
        let mut draft = guard.clone();
        let value = f(&mut draft)?;
        *guard = draft;
        Ok(value)
    }
}
