// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard ranking.
//!
//! Rows come from the remote store's aggregate collection. Any rank the
//! server attached is ignored: the order is always recomputed here so that
//! it is total and matches the requested dimension. When the remote store is
//! unreachable or has no rows, a fixed synthetic population is ranked instead
//! so callers always get a usable board.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::GatewayError;
use crate::models::{LeaderboardEntry, LeaderboardRow, SortDimension, UserRankSummary};
use crate::services::gamification::level_for_xp;

/// Name shown for users who never set one.
const ANONYMOUS_NAME: &str = "Anonymous";

/// Source of raw leaderboard rows.
#[async_trait]
pub trait LeaderboardSource: Send + Sync {
    /// The `limit` rows highest on `dimension`'s primary key, so a capped
    /// fetch still holds the top of that dimension. The order within the
    /// result is not relied on.
    async fn leaderboard_rows(
        &self,
        dimension: SortDimension,
        limit: Option<usize>,
    ) -> Result<Vec<LeaderboardRow>, GatewayError>;

    /// Number of rows in the whole population, however many are fetched.
    async fn population_size(&self) -> Result<usize, GatewayError>;
}

/// `round(100 * completed / created)`, or 0 when nothing was created.
pub fn completion_rate(goals_completed: u32, goals_created: u32) -> u32 {
    if goals_created == 0 {
        return 0;
    }
    (100.0 * f64::from(goals_completed) / f64::from(goals_created)).round() as u32
}

fn best_streak(row: &LeaderboardRow) -> u32 {
    row.highest_streak.max(row.daily_streak)
}

/// (primary, secondary) sort key for `dimension`; both sort descending.
fn sort_key(row: &LeaderboardRow, dimension: SortDimension) -> (u64, u64) {
    match dimension {
        SortDimension::Xp => (row.total_xp, u64::from(row.goals_completed)),
        SortDimension::Goals => (u64::from(row.goals_completed), row.total_xp),
        SortDimension::Streak => (u64::from(best_streak(row)), row.total_xp),
    }
}

/// Total order for `dimension`. Rows equal on both keys fall back to id.
fn compare(a: &LeaderboardRow, b: &LeaderboardRow, dimension: SortDimension) -> Ordering {
    sort_key(b, dimension)
        .cmp(&sort_key(a, dimension))
        .then_with(|| a.id.cmp(&b.id))
}

fn to_entry(row: &LeaderboardRow, rank: u32) -> LeaderboardEntry {
    LeaderboardEntry {
        id: row.id.clone(),
        name: row
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_NAME.to_string()),
        level: level_for_xp(row.total_xp),
        total_xp: row.total_xp,
        goals_completed: row.goals_completed,
        goals_created: row.goals_created,
        daily_streak: row.daily_streak,
        highest_streak: best_streak(row),
        total_sessions: row.total_sessions,
        completion_rate: completion_rate(row.goals_completed, row.goals_created),
        rank,
    }
}

/// Rank `rows` by `dimension` and keep the first `limit` entries.
///
/// Ranks are dense and 1-based; truncation happens after ranking so the
/// kept entries carry their true ranks.
pub fn rank(
    rows: &[LeaderboardRow],
    dimension: SortDimension,
    limit: Option<usize>,
) -> Vec<LeaderboardEntry> {
    let mut sorted: Vec<&LeaderboardRow> = rows.iter().collect();
    sorted.sort_by(|a, b| compare(a, b, dimension));
    // A user listed twice keeps only their best-placed row.
    let mut seen = HashSet::new();
    sorted.retain(|row| seen.insert(row.id.clone()));

    sorted
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, row)| to_entry(row, u32::try_from(i + 1).unwrap_or(u32::MAX)))
        .collect()
}

/// `user_id`'s rank among `rows` by `dimension`, if present.
pub fn position(rows: &[LeaderboardRow], dimension: SortDimension, user_id: &str) -> Option<u32> {
    rank(rows, dimension, None)
        .into_iter()
        .find(|entry| entry.id == user_id)
        .map(|entry| entry.rank)
}

/// A user's ranks in every dimension of the same population.
pub fn rank_summary(rows: &[LeaderboardRow], user_id: &str) -> UserRankSummary {
    let total_users = rank(rows, SortDimension::Xp, None).len();

    UserRankSummary {
        rank_by_xp: position(rows, SortDimension::Xp, user_id),
        rank_by_goals: position(rows, SortDimension::Goals, user_id),
        rank_by_streak: position(rows, SortDimension::Streak, user_id),
        total_users: u32::try_from(total_users).unwrap_or(u32::MAX),
    }
}

/// Fixed population shown when the remote store has nothing to offer.
pub fn synthetic_population() -> Vec<LeaderboardRow> {
    // (id, name, xp, completed, created, streak, highest, sessions)
    const ROWS: [(&str, &str, u64, u32, u32, u32, u32, u32); 10] = [
        ("demo-01", "Avery", 12_450, 58, 64, 21, 34, 97),
        ("demo-02", "Jordan", 9_870, 47, 55, 12, 29, 81),
        ("demo-03", "Sam", 9_870, 41, 50, 30, 30, 76),
        ("demo-04", "Riley", 7_320, 39, 52, 5, 18, 64),
        ("demo-05", "Quinn", 6_100, 33, 40, 9, 14, 52),
        ("demo-06", "Morgan", 4_780, 33, 37, 2, 22, 45),
        ("demo-07", "Casey", 3_150, 20, 31, 7, 9, 33),
        ("demo-08", "Taylor", 2_200, 14, 25, 0, 6, 21),
        ("demo-09", "Drew", 1_050, 8, 12, 3, 3, 11),
        ("demo-10", "Alex", 400, 3, 9, 1, 2, 6),
    ];

    ROWS.iter()
        .map(
            |&(id, name, xp, completed, created, streak, highest, sessions)| LeaderboardRow {
                id: id.to_string(),
                name: Some(name.to_string()),
                total_xp: xp,
                goals_completed: completed,
                goals_created: created,
                daily_streak: streak,
                highest_streak: highest,
                total_sessions: sessions,
                server_rank: None,
            },
        )
        .collect()
}

/// A ranked board plus where its rows came from.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Leaderboard {
    pub dimension: SortDimension,
    pub entries: Vec<LeaderboardEntry>,
    /// True when the synthetic population was used
    pub synthetic: bool,
}

/// Fetches rows from a [`LeaderboardSource`] and ranks them.
#[derive(Clone)]
pub struct LeaderboardService<S> {
    source: S,
    population_cap: usize,
    timeout: Duration,
}

impl<S: LeaderboardSource> LeaderboardService<S> {
    pub fn new(source: S, population_cap: usize, timeout: Duration) -> Self {
        Self {
            source,
            population_cap,
            timeout,
        }
    }

    /// Rows to rank by `dimension`, falling back to the synthetic population.
    async fn population(&self, dimension: SortDimension) -> (Vec<LeaderboardRow>, bool) {
        let fetched = tokio::time::timeout(
            self.timeout,
            self.source
                .leaderboard_rows(dimension, Some(self.population_cap)),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GatewayError::Unavailable(
                "Leaderboard fetch timed out".to_string(),
            ))
        });

        match fetched {
            Ok(rows) if !rows.is_empty() => (rows, false),
            Ok(_) => {
                tracing::info!("Leaderboard empty, using synthetic population");
                (synthetic_population(), true)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kind = e.kind(),
                    "Leaderboard fetch failed, using synthetic population"
                );
                (synthetic_population(), true)
            }
        }
    }

    pub async fn leaderboard(&self, dimension: SortDimension, limit: usize) -> Leaderboard {
        let (rows, synthetic) = self.population(dimension).await;
        let entries = rank(&rows, dimension, Some(limit));
        tracing::debug!(
            dimension = dimension.as_str(),
            entries = entries.len(),
            synthetic,
            "Leaderboard ranked"
        );
        Leaderboard {
            dimension,
            entries,
            synthetic,
        }
    }

    /// Rank `user_id` in each dimension against that dimension's own capped
    /// population, and count every user rather than only the fetched ones.
    pub async fn user_rank(&self, user_id: &str) -> UserRankSummary {
        let mut ranks = Vec::with_capacity(SortDimension::ALL.len());
        let mut fetched = 0;
        for dimension in SortDimension::ALL {
            let (rows, synthetic) = self.population(dimension).await;
            if synthetic {
                return rank_summary(&rows, user_id);
            }
            fetched = fetched.max(rows.len());
            ranks.push(position(&rows, dimension, user_id));
        }

        let counted = tokio::time::timeout(self.timeout, self.source.population_size())
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::Unavailable(
                    "Leaderboard count timed out".to_string(),
                ))
            });
        let total_users = match counted {
            Ok(count) => count.max(fetched),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kind = e.kind(),
                    "Leaderboard count failed, reporting fetched rows"
                );
                fetched
            }
        };

        UserRankSummary {
            rank_by_xp: ranks[0],
            rank_by_goals: ranks[1],
            rank_by_streak: ranks[2],
            total_users: u32::try_from(total_users).unwrap_or(u32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, xp: u64, completed: u32, highest: u32) -> LeaderboardRow {
        LeaderboardRow {
            id: id.to_string(),
            name: Some(id.to_uppercase()),
            total_xp: xp,
            goals_completed: completed,
            goals_created: completed + 2,
            daily_streak: 0,
            highest_streak: highest,
            total_sessions: 1,
            server_rank: None,
        }
    }

    fn ids(entries: &[LeaderboardEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_completion_rate() {
        assert_eq!(completion_rate(0, 0), 0);
        assert_eq!(completion_rate(1, 3), 33);
        assert_eq!(completion_rate(2, 3), 67);
        assert_eq!(completion_rate(5, 5), 100);
    }

    #[test]
    fn test_xp_ties_broken_by_goals() {
        let rows = vec![row("a", 500, 1, 0), row("b", 500, 4, 0), row("c", 900, 0, 0)];
        let entries = rank(&rows, SortDimension::Xp, None);
        assert_eq!(ids(&entries), vec!["c", "b", "a"]);
        assert_eq!(
            entries.iter().map(|e| e.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_goals_ties_broken_by_xp() {
        let rows = vec![row("a", 100, 3, 0), row("b", 300, 3, 0), row("c", 50, 7, 0)];
        let entries = rank(&rows, SortDimension::Goals, None);
        assert_eq!(ids(&entries), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_streak_uses_highest_streak_then_xp() {
        let rows = vec![row("a", 100, 0, 9), row("b", 300, 0, 9), row("c", 50, 0, 2)];
        let entries = rank(&rows, SortDimension::Streak, None);
        assert_eq!(ids(&entries), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_server_rank_is_ignored() {
        let mut low = row("low", 10, 0, 0);
        low.server_rank = Some(1);
        let mut high = row("high", 999, 0, 0);
        high.server_rank = Some(2);

        let entries = rank(&[low, high], SortDimension::Xp, None);
        assert_eq!(ids(&entries), vec!["high", "low"]);
    }

    #[test]
    fn test_identical_rows_ordered_by_id() {
        let rows = vec![row("zed", 100, 1, 1), row("amy", 100, 1, 1)];
        let entries = rank(&rows, SortDimension::Xp, None);
        assert_eq!(ids(&entries), vec!["amy", "zed"]);
    }

    #[test]
    fn test_limit_truncates_after_ranking() {
        let rows = synthetic_population();
        let entries = rank(&rows, SortDimension::Goals, Some(3));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[2].rank, 3);
    }

    #[test]
    fn test_duplicate_user_rows_collapse() {
        let rows = vec![row("a", 100, 1, 0), row("a", 50, 1, 0), row("b", 70, 1, 0)];
        let entries = rank(&rows, SortDimension::Xp, None);
        assert_eq!(ids(&entries), vec!["a", "b"]);
        assert_eq!(entries[0].total_xp, 100);
    }

    #[test]
    fn test_entry_level_and_name_derived() {
        let mut r = row("a", 2500, 1, 0);
        r.name = None;
        let entries = rank(&[r], SortDimension::Xp, None);
        assert_eq!(entries[0].level, 3);
        assert_eq!(entries[0].name, ANONYMOUS_NAME);
    }

    #[test]
    fn test_synthetic_population_ranks_densely() {
        for dimension in SortDimension::ALL {
            let entries = rank(&synthetic_population(), dimension, None);
            assert!(!entries.is_empty());
            for (i, entry) in entries.iter().enumerate() {
                assert_eq!(entry.rank as usize, i + 1);
            }
        }
    }

    #[test]
    fn test_rank_summary_agrees_with_board() {
        let rows = synthetic_population();
        let summary = rank_summary(&rows, "demo-03");
        let by_streak = rank(&rows, SortDimension::Streak, None);
        let expected = by_streak.iter().find(|e| e.id == "demo-03").unwrap().rank;

        assert_eq!(summary.rank_by_streak, Some(expected));
        assert_eq!(summary.total_users, 10);
        // Sam ties Jordan on XP with fewer goals completed.
        assert_eq!(summary.rank_by_xp, Some(3));
    }

    #[test]
    fn test_rank_summary_for_unknown_user() {
        let summary = rank_summary(&synthetic_population(), "nobody");
        assert_eq!(summary.rank_by_xp, None);
        assert_eq!(summary.total_users, 10);
    }
}
