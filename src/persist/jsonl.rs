use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::persist::json::{match_from_json, match_to_json};
use crate::persist::types::{MatchRecord, PersistError, PersistResult, ResultRow};
use crate::persist::MatchStore;

/// Appends one JSON document per match to a local file.
#[derive(Debug)]
pub struct JsonlMatchStore {
    path: PathBuf,
    // serializes appends from this process
    write_lock: Mutex<()>,
}

impl JsonlMatchStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub async fn load_all(&self) -> PersistResult<Vec<(MatchRecord, Vec<ResultRow>)>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content.lines().filter(|l| !l.trim().is_empty()).map(match_from_json).collect()
    }
}

#[async_trait]
impl MatchStore for JsonlMatchStore {
    async fn save_match(&self, record: &MatchRecord, results: &[ResultRow]) -> PersistResult<()> {
        let mut line = match_to_json(record, results)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(match_id = %record.match_id, path = %self.path.display(), "Appended match");
        Ok(())
    }

    async fn load_match(&self, match_id: Uuid) -> PersistResult<(MatchRecord, Vec<ResultRow>)> {
        // last write wins
        self.load_all()
            .await?
            .into_iter()
            .rev()
            .find(|(r, _)| r.match_id == match_id)
            .ok_or(PersistError::NotFound(match_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn record() -> MatchRecord {
        MatchRecord {
            match_id: Uuid::new_v4(),
            symbol: "SPY".into(),
            duration_secs: 300,
            target_mark: 10_000,
            starting_value: 100_000,
            day: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            synthetic_day: true,
            state: "complete".into(),
            final_mark: 11_000,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
        }
    }

    fn row(match_id: Uuid) -> ResultRow {
        ResultRow {
            match_id,
            user_id: "alice".into(),
            account_id: "a1".into(),
            starting_cash: 50_000,
            starting_shares: 5,
            starting_value: 100_000,
            final_cash: 0,
            final_shares: 15,
            final_value: 165_000,
            pnl: 65_000,
            rank: 1,
        }
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let path = std::env::temp_dir().join(format!("lobx-arena-{}.jsonl", Uuid::new_v4()));
        let store = JsonlMatchStore::new(&path);
        assert!(store.load_all().await.unwrap().is_empty());

        let first = record();
        let second = record();
        store.save_match(&first, &[row(first.match_id)]).await.unwrap();
        store.save_match(&second, &[]).await.unwrap();

        let (loaded, rows) = store.load_match(first.match_id).await.unwrap();
        assert_eq!(loaded, first);
        assert_eq!(rows, vec![row(first.match_id)]);
        assert_eq!(store.load_all().await.unwrap().len(), 2);
        assert!(matches!(store.load_match(Uuid::new_v4()).await, Err(PersistError::NotFound(_))));

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_corrupt_line_is_reported() {
        let path = std::env::temp_dir().join(format!("lobx-arena-{}.jsonl", Uuid::new_v4()));
        tokio::fs::write(&path, "{not json}\n").await.unwrap();
        let store = JsonlMatchStore::new(&path);
        assert!(matches!(store.load_all().await, Err(PersistError::Serialization(_))));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_memory_store_replaces_on_resave() {
        use crate::persist::memory::InMemoryMatchStore;
        let store = InMemoryMatchStore::new();
        let rec = record();
        store.save_match(&rec, &[]).await.unwrap();
        store.save_match(&rec, &[row(rec.match_id)]).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load_match(rec.match_id).await.unwrap().1.len(), 1);
    }
}
