//! Ranking engine.
//!
//! The leaderboard is derived, never stored: it is recomputed from player
//! scores after every scoring event. Order is score descending, then the
//! player who reached their score first, then join order. Ranks are the
//! resulting 1-based positions, so no two entries share a rank.

use std::cmp::Reverse;

use quizcast_protocol::LeaderboardEntry;

use crate::Player;

/// Builds the leaderboard from players in any order.
pub fn rank<'a>(players: impl IntoIterator<Item = &'a Player>) -> Vec<LeaderboardEntry> {
    let mut ordered: Vec<&Player> = players.into_iter().collect();
    ordered.sort_by_key(|p| (Reverse(p.score), p.scored_at.unwrap_or(u64::MAX), p.join_order));
    ordered
        .into_iter()
        .enumerate()
        .map(|(position, p)| LeaderboardEntry {
            rank: position as u32 + 1,
            player_id: p.id,
            name: p.name.clone(),
            score: p.score,
        })
        .collect()
}

/// Whether entries are in non-increasing score order.
pub fn is_sorted(entries: &[LeaderboardEntry]) -> bool {
    entries.windows(2).all(|w| w[0].score >= w[1].score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizcast_protocol::PlayerId;

    fn player(id: u64, score: u32, scored_at: Option<u64>) -> Player {
        Player {
            id: PlayerId(id),
            name: format!("p{id}"),
            score,
            connected: true,
            ever_connected: true,
            join_order: id,
            scored_at,
        }
    }

    fn ids(entries: &[LeaderboardEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.player_id.0).collect()
    }

    #[test]
    fn test_rank_orders_by_score_descending() {
        let players = [player(1, 10, Some(1)), player(2, 30, Some(3)), player(3, 20, Some(2))];
        let board = rank(&players);
        assert_eq!(ids(&board), vec![2, 3, 1]);
        assert_eq!(board.iter().map(|e| e.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(is_sorted(&board));
    }

    #[test]
    fn test_rank_tie_goes_to_earliest_achievement() {
        // Player 3 joined last but reached 20 first.
        let players = [player(1, 20, Some(7)), player(3, 20, Some(4))];
        assert_eq!(ids(&rank(&players)), vec![3, 1]);
    }

    #[test]
    fn test_rank_zero_scores_fall_back_to_join_order() {
        let players = [player(4, 0, None), player(2, 0, None), player(9, 0, None)];
        assert_eq!(ids(&rank(&players)), vec![2, 4, 9]);
    }

    #[test]
    fn test_rank_empty_roster_is_empty_board() {
        assert!(rank(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_is_sorted_detects_disorder() {
        let mut board = rank(&[player(1, 5, Some(1)), player(2, 1, Some(2))]);
        assert!(is_sorted(&board));
        board.swap(0, 1);
        assert!(!is_sorted(&board));
    }
}
