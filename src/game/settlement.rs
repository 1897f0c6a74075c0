//! End-of-match valuation and ranking.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::game::types::Participant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalPosition {
    pub cash: i64,
    pub shares: i64,
}

/// Whoever executed the orders knows where each account ended up.
pub trait PositionFetcher: Send + Sync {
    fn final_position(&self, account_id: &str) -> Option<FinalPosition>;
}

impl<F> PositionFetcher for F
where
    F: Fn(&str) -> Option<FinalPosition> + Send + Sync,
{
    fn final_position(&self, account_id: &str) -> Option<FinalPosition> {
        self(account_id)
    }
}

/// Value every participant at `final_mark` and rank them.
///
/// Ranks run 1..=n by final value descending. The sort is stable over join
/// order, so of two equal values the earlier joiner ranks better. An account
/// the fetcher does not know keeps its starting position.
pub fn settle(participants: &[Participant], final_mark: i64, fetcher: &dyn PositionFetcher) -> Vec<Participant> {
    let mut results: Vec<Participant> = participants
        .iter()
        .map(|p| {
            let pos = fetcher.final_position(&p.account_id).unwrap_or_else(|| {
                warn!(user = %p.user_id, account = %p.account_id, "No final position, using starting split");
                FinalPosition { cash: p.starting_cash, shares: p.starting_shares }
            });
            let final_value = pos.cash + pos.shares * final_mark;
            Participant {
                final_cash: Some(pos.cash),
                final_shares: Some(pos.shares),
                final_value: Some(final_value),
                pnl: Some(final_value - p.starting_value),
                ..p.clone()
            }
        })
        .collect();

    results.sort_by_key(|p| p.join_order);
    results.sort_by(|a, b| b.final_value.cmp(&a.final_value));
    for (i, p) in results.iter_mut().enumerate() {
        p.rank = Some(i as u32 + 1);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn participant(user: &str, join_order: u32) -> Participant {
        Participant {
            user_id: user.to_string(),
            account_id: format!("acct-{user}"),
            join_order,
            starting_cash: 50_000,
            starting_shares: 5,
            starting_value: 100_000,
            final_cash: None,
            final_shares: None,
            final_value: None,
            pnl: None,
            rank: None,
        }
    }

    fn fetcher(positions: Vec<(&str, i64, i64)>) -> impl PositionFetcher {
        let map: HashMap<String, FinalPosition> = positions
            .into_iter()
            .map(|(acct, cash, shares)| (acct.to_string(), FinalPosition { cash, shares }))
            .collect();
        move |acct: &str| map.get(acct).copied()
    }

    #[test]
    fn test_final_value_and_pnl() {
        let ps = vec![participant("alice", 0)];
        let results = settle(&ps, 11_000, &fetcher(vec![("acct-alice", 0, 15)]));
        let alice = &results[0];
        assert_eq!(alice.final_value, Some(165_000));
        assert_eq!(alice.pnl, Some(65_000));
        assert_eq!(alice.rank, Some(1));
        assert!(alice.is_settled());
    }

    #[test]
    fn test_ranking_by_value() {
        let ps = vec![participant("a", 0), participant("b", 1)];
        let results = settle(&ps, 10_000, &fetcher(vec![("acct-a", 50_000, 10), ("acct-b", 65_000, 10)]));
        let rank_of = |u: &str| results.iter().find(|p| p.user_id == u).and_then(|p| p.rank);
        assert_eq!(rank_of("a"), Some(2));
        assert_eq!(rank_of("b"), Some(1));
        assert_eq!(results[0].user_id, "b");
    }

    #[test]
    fn test_ties_go_to_earlier_joiner() {
        // listed out of join order on purpose
        let ps = vec![participant("late", 3), participant("early", 1), participant("mid", 2)];
        let f = fetcher(vec![("acct-late", 100_000, 0), ("acct-early", 100_000, 0), ("acct-mid", 100_000, 0)]);
        let results = settle(&ps, 10_000, &f);
        let order: Vec<_> = results.iter().map(|p| (p.user_id.as_str(), p.rank)).collect();
        assert_eq!(order, vec![("early", Some(1)), ("mid", Some(2)), ("late", Some(3))]);
    }

    #[test]
    fn test_missing_position_keeps_starting_split() {
        let ps = vec![participant("ghost", 0)];
        let results = settle(&ps, 10_000, &fetcher(vec![]));
        assert_eq!(results[0].final_cash, Some(50_000));
        assert_eq!(results[0].final_shares, Some(5));
        assert_eq!(results[0].pnl, Some(0));
    }
}
