// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Gamification engine: XP awards, levels, and daily streaks.
//!
//! Everything here is a pure function of its inputs. Callers persist the
//! returned profile; nothing in this module touches storage.

use chrono::{DateTime, Utc};
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::{Difficulty, Goal, UserProfile};

/// XP needed to advance one level.
pub const XP_PER_LEVEL: u64 = 1000;

/// Level for an XP total: `floor(xp / XP_PER_LEVEL) + 1`.
pub fn level_for_xp(xp: u64) -> u32 {
    u32::try_from(xp / XP_PER_LEVEL + 1).unwrap_or(u32::MAX)
}

/// Where an XP total sits within its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LevelProgress {
    pub level: u32,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub xp_into_level: u64,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub xp_to_next_level: u64,
}

pub fn level_progress(xp: u64) -> LevelProgress {
    let xp_into_level = xp % XP_PER_LEVEL;
    LevelProgress {
        level: level_for_xp(xp),
        xp_into_level,
        xp_to_next_level: XP_PER_LEVEL - xp_into_level,
    }
}

/// How early a goal was completed relative to its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTiming {
    /// More than 75% of the allotted time left
    Early,
    /// More than 50% left, or no deadline at all
    OnTime,
    /// More than 25% left
    Late,
    /// 25% or less left, or past the deadline
    Overdue,
}

impl CompletionTiming {
    pub fn from_time_remaining(percentage: Option<f64>) -> Self {
        match percentage {
            None => CompletionTiming::OnTime,
            Some(p) if p > 75.0 => CompletionTiming::Early,
            Some(p) if p > 50.0 => CompletionTiming::OnTime,
            Some(p) if p > 25.0 => CompletionTiming::Late,
            Some(_) => CompletionTiming::Overdue,
        }
    }

    pub fn multiplier(self) -> f64 {
        match self {
            CompletionTiming::Early => 1.5,
            CompletionTiming::OnTime => 1.3,
            CompletionTiming::Late => 1.1,
            CompletionTiming::Overdue => 0.7,
        }
    }
}

pub fn difficulty_multiplier(difficulty: Difficulty) -> f64 {
    match difficulty {
        Difficulty::Easy => 1.0,
        Difficulty::Medium => 1.5,
        Difficulty::Hard => 2.0,
    }
}

/// Percentage of the allotted time (creation to deadline) still left at
/// `completed_at`. Negative once the deadline has passed; `None` without a
/// deadline.
pub fn time_remaining_percentage(
    created_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
    completed_at: DateTime<Utc>,
) -> Option<f64> {
    let deadline = deadline?;
    let allotted = (deadline - created_at).num_milliseconds();
    let remaining = (deadline - completed_at).num_milliseconds();

    if allotted <= 0 {
        // Deadline at or before creation: nothing was allotted.
        return Some(if remaining > 0 { 100.0 } else { 0.0 });
    }

    Some(remaining as f64 * 100.0 / allotted as f64)
}

/// `round(base_xp * difficulty multiplier * timing multiplier)`.
pub fn goal_xp(base_xp: u64, difficulty: Difficulty, time_remaining: Option<f64>) -> u64 {
    let timing = CompletionTiming::from_time_remaining(time_remaining);
    let xp = base_xp as f64 * difficulty_multiplier(difficulty) * timing.multiplier();
    xp.round() as u64
}

/// XP earned by completing `goal` at `completed_at`.
pub fn xp_for_completion(goal: &Goal, completed_at: DateTime<Utc>) -> u64 {
    let remaining = time_remaining_percentage(goal.created_at, goal.deadline, completed_at);
    goal_xp(goal.xp_value, goal.difficulty, remaining)
}

/// Add XP and re-derive the level.
pub fn award_xp(mut profile: UserProfile, xp: u64, now: DateTime<Utc>) -> UserProfile {
    profile.total_xp = profile.total_xp.saturating_add(xp);
    profile.level = level_for_xp(profile.total_xp);
    profile.updated_at = now;
    profile
}

/// Apply one qualifying activity at `now` to the daily streak.
///
/// Days are compared as UTC calendar dates. Calling this again on the same
/// day leaves the streak unchanged.
pub fn update_streak(mut profile: UserProfile, now: DateTime<Utc>) -> UserProfile {
    let today = now.date_naive();

    profile.daily_streak = match profile.last_activity {
        None => 1,
        Some(last) => {
            let last_day = last.date_naive();
            if last_day >= today {
                // Same day (or a clock-skewed future timestamp).
                profile.daily_streak
            } else if last_day.succ_opt() == Some(today) {
                profile.daily_streak.saturating_add(1)
            } else {
                1
            }
        }
    };

    profile.highest_streak = profile.highest_streak.max(profile.daily_streak);
    profile.last_activity = Some(match profile.last_activity {
        Some(last) if last > now => last,
        _ => now,
    });
    profile.updated_at = now;
    profile
}

/// Outcome of completing a goal: the XP granted and the profile after both
/// the award and the streak update.
#[derive(Debug, Clone)]
pub struct CompletionReward {
    pub xp_awarded: u64,
    pub profile: UserProfile,
}

/// Goal completion counts as a qualifying activity as well as earning XP.
pub fn reward_completion(
    profile: UserProfile,
    goal: &Goal,
    completed_at: DateTime<Utc>,
) -> CompletionReward {
    let xp_awarded = xp_for_completion(goal, completed_at);
    let profile = award_xp(profile, xp_awarded, completed_at);
    let profile = update_streak(profile, completed_at);
    CompletionReward {
        xp_awarded,
        profile,
    }
}
