//! Outbound push events and the sink they are handed to.
//!
//! Transport is someone else's problem: the core calls `notify` and moves on.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::game::types::{MatchState, Participant};
use crate::market_data::normaliser::cents_to_dollars;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    MatchState {
        match_id: String,
        state: MatchState,
        symbol: String,
        duration_secs: u64,
        mark: i64,
        participants: Vec<Participant>,
    },
    Countdown {
        match_id: String,
        seconds_remaining: u64,
    },
    PriceTick {
        match_id: String,
        mark: i64,
        market_time: Option<chrono::NaiveDateTime>,
        remaining_secs: u64,
        progress: f64,
    },
    MatchResults {
        match_id: String,
        final_mark: i64,
        results: Vec<Participant>,
    },
}

impl BroadcastEvent {
    pub fn match_id(&self) -> &str {
        match self {
            BroadcastEvent::MatchState { match_id, .. }
            | BroadcastEvent::Countdown { match_id, .. }
            | BroadcastEvent::PriceTick { match_id, .. }
            | BroadcastEvent::MatchResults { match_id, .. } => match_id,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Fire-and-forget event sink.
pub trait Broadcaster: Send + Sync {
    fn notify(&self, event: BroadcastEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn notify(&self, _event: BroadcastEvent) {}
}

/// Logs every event; price ticks at debug so they don't drown the rest.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn notify(&self, event: BroadcastEvent) {
        match &event {
            BroadcastEvent::PriceTick { match_id, mark, remaining_secs, .. } => {
                tracing::debug!(%match_id, mark, remaining_secs, "price_tick");
            }
            BroadcastEvent::Countdown { match_id, seconds_remaining } => {
                info!(%match_id, seconds_remaining, "countdown");
            }
            BroadcastEvent::MatchState { match_id, state, participants, .. } => {
                info!(%match_id, ?state, participants = participants.len(), "match_state");
            }
            BroadcastEvent::MatchResults { match_id, final_mark, results } => {
                let mark = cents_to_dollars(*final_mark);
                for p in results {
                    let pnl = p.pnl.map(cents_to_dollars).unwrap_or_default();
                    info!(%match_id, %mark, user = %p.user_id, rank = ?p.rank, %pnl, "match_results");
                }
            }
        }
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: mpsc::UnboundedSender<BroadcastEvent>,
}

impl ChannelBroadcaster {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BroadcastEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn notify(&self, event: BroadcastEvent) {
        let _ = self.tx.send(event);
    }
}
