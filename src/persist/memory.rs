use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::persist::types::{MatchRecord, PersistError, PersistResult, ResultRow};
use crate::persist::MatchStore;

/// Keeps saved matches in process. Used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryMatchStore {
    matches: Mutex<Vec<(MatchRecord, Vec<ResultRow>)>>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.matches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.lock().is_empty()
    }

    pub fn all(&self) -> Vec<(MatchRecord, Vec<ResultRow>)> {
        self.matches.lock().clone()
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn save_match(&self, record: &MatchRecord, results: &[ResultRow]) -> PersistResult<()> {
        let mut matches = self.matches.lock();
        // saving twice replaces
        matches.retain(|(r, _)| r.match_id != record.match_id);
        matches.push((record.clone(), results.to_vec()));
        Ok(())
    }

    async fn load_match(&self, match_id: Uuid) -> PersistResult<(MatchRecord, Vec<ResultRow>)> {
        self.matches
            .lock()
            .iter()
            .find(|(r, _)| r.match_id == match_id)
            .cloned()
            .ok_or(PersistError::NotFound(match_id))
    }
}
