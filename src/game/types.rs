use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    Lobby,
    PreMatch,
    Trading,
    Settlement,
    Complete,
}

impl MatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::Lobby => "lobby",
            MatchState::PreMatch => "pre_match",
            MatchState::Trading => "trading",
            MatchState::Settlement => "settlement",
            MatchState::Complete => "complete",
        }
    }

    /// Participants may only come and go before trading opens.
    pub fn accepts_participants(&self) -> bool {
        matches!(self, MatchState::Lobby | MatchState::PreMatch)
    }
}

impl std::fmt::Display for MatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub symbol: String,
    pub duration_secs: u64,
    /// Cents; the replayed day is normalized to open here
    pub target_mark: i64,
    pub pre_match_secs: u64,
    /// Cents
    pub starting_value: i64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            duration_secs: 300,
            target_mark: 10_000,
            pre_match_secs: 10,
            starting_value: 100_000,
        }
    }
}

/// One player in one match. Final fields are filled once by settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub account_id: String,
    pub join_order: u32,
    pub starting_cash: i64,
    pub starting_shares: i64,
    pub starting_value: i64,
    pub final_cash: Option<i64>,
    pub final_shares: Option<i64>,
    pub final_value: Option<i64>,
    pub pnl: Option<i64>,
    pub rank: Option<u32>,
}

impl Participant {
    pub fn is_settled(&self) -> bool {
        self.rank.is_some()
    }
}

/// Pushed to match subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    StateChanged { from: MatchState, to: MatchState },
    Ended { final_mark: i64, results: Vec<Participant> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("cannot {op} while {from}")]
    InvalidTransition { from: MatchState, op: &'static str },
    #[error("user {user_id} already joined")]
    AlreadyJoined { user_id: String },
    #[error("user {user_id} is not in this match")]
    NotParticipant { user_id: String },
}
