pub mod types;
pub use types::*;
pub mod json;
pub mod memory;
pub mod jsonl;
pub mod postgres;
use async_trait::async_trait;
use uuid::Uuid;

/// Where finished matches go. Saving is best effort from the caller's side.
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn save_match(&self, record: &MatchRecord, results: &[ResultRow]) -> PersistResult<()>;
    async fn load_match(&self, match_id: Uuid) -> PersistResult<(MatchRecord, Vec<ResultRow>)>;
}
