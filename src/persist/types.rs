use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::game::types::Participant;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("match {0} not found")]
    NotFound(Uuid),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// One finished (or abandoned) match, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: Uuid,
    pub symbol: String,
    pub duration_secs: i64,
    pub target_mark: i64,
    pub starting_value: i64,
    /// Session date of the replayed day
    pub day: NaiveDate,
    pub synthetic_day: bool,
    pub state: String,
    pub final_mark: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One settled participant's line in the results table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub match_id: Uuid,
    pub user_id: String,
    pub account_id: String,
    pub starting_cash: i64,
    pub starting_shares: i64,
    pub starting_value: i64,
    pub final_cash: i64,
    pub final_shares: i64,
    pub final_value: i64,
    pub pnl: i64,
    pub rank: i32,
}

impl ResultRow {
    /// None until the participant has been settled.
    pub fn from_participant(match_id: Uuid, p: &Participant) -> Option<Self> {
        Some(Self {
            match_id,
            user_id: p.user_id.clone(),
            account_id: p.account_id.clone(),
            starting_cash: p.starting_cash,
            starting_shares: p.starting_shares,
            starting_value: p.starting_value,
            final_cash: p.final_cash?,
            final_shares: p.final_shares?,
            final_value: p.final_value?,
            pnl: p.pnl?,
            rank: p.rank? as i32,
        })
    }
}
