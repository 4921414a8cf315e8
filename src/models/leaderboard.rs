// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard rows (raw, from the remote store) and ranked entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Raw aggregate row as maintained by the remote store.
///
/// Stored at `leaderboard/{id}`. `server_rank` is whatever rank the server
/// computed and is never used for ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub total_xp: u64,
    #[serde(default)]
    pub goals_completed: u32,
    #[serde(default)]
    pub goals_created: u32,
    #[serde(default)]
    pub daily_streak: u32,
    #[serde(default)]
    pub highest_streak: u32,
    #[serde(default)]
    pub total_sessions: u32,
    #[serde(default)]
    pub server_rank: Option<u32>,
}

/// Ranked, displayable leaderboard entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LeaderboardEntry {
    pub id: String,
    pub name: String,
    pub level: u32,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total_xp: u64,
    pub goals_completed: u32,
    pub goals_created: u32,
    pub daily_streak: u32,
    pub highest_streak: u32,
    pub total_sessions: u32,
    /// Percentage of created goals that were completed (0-100)
    pub completion_rate: u32,
    /// Dense 1-based rank
    pub rank: u32,
}

/// Dimension the leaderboard is sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum SortDimension {
    #[default]
    Xp,
    Goals,
    Streak,
}

impl SortDimension {
    pub const ALL: [SortDimension; 3] = [
        SortDimension::Xp,
        SortDimension::Goals,
        SortDimension::Streak,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortDimension::Xp => "xp",
            SortDimension::Goals => "goals",
            SortDimension::Streak => "streak",
        }
    }

    /// Row field holding this dimension's primary sort key.
    pub fn primary_field(self) -> &'static str {
        match self {
            SortDimension::Xp => "total_xp",
            SortDimension::Goals => "goals_completed",
            SortDimension::Streak => "highest_streak",
        }
    }
}

impl fmt::Display for SortDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown sort dimension: {0} (expected xp, goals or streak)")]
pub struct ParseSortDimensionError(String);

impl FromStr for SortDimension {
    type Err = ParseSortDimensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xp" => Ok(SortDimension::Xp),
            "goals" => Ok(SortDimension::Goals),
            "streak" => Ok(SortDimension::Streak),
            _ => Err(ParseSortDimensionError(s.to_string())),
        }
    }
}

/// A user's position in each leaderboard dimension.
///
/// Ranks are `None` when the user is not part of the ranked population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserRankSummary {
    pub rank_by_xp: Option<u32>,
    pub rank_by_goals: Option<u32>,
    pub rank_by_streak: Option<u32>,
    pub total_users: u32,
}
