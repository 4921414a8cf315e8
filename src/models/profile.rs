// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User profile model for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::services::gamification::level_for_xp;

/// Coaching tone the assistant should use with this user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Supportive,
    Direct,
    Playful,
    Analytical,
}

/// Per-user assistant preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Preferences {
    #[serde(default)]
    pub voice_enabled: bool,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default = "default_true")]
    pub memory_enabled: bool,
    #[serde(default)]
    pub tone: Tone,
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            voice_enabled: false,
            voice_id: None,
            memory_enabled: true,
            tone: Tone::default(),
        }
    }
}

/// User profile with gamification counters.
///
/// Stored at `users/{id}` remotely and under the `profile/{id}` cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserProfile {
    /// User ID (also used as document ID)
    pub id: String,
    /// Display name (may be None until the user sets one)
    #[serde(default)]
    pub name: Option<String>,
    /// Accumulated experience points
    #[serde(default)]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total_xp: u64,
    /// Level derived from `total_xp`
    #[serde(default = "default_level")]
    pub level: u32,
    /// Consecutive calendar days with activity
    #[serde(default)]
    pub daily_streak: u32,
    /// Best streak ever reached
    #[serde(default)]
    pub highest_streak: u32,
    /// Last qualifying activity
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_level() -> u32 {
    1
}

impl UserProfile {
    /// Fresh profile for a user seen for the first time.
    pub fn new(id: impl Into<String>, name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name,
            total_xp: 0,
            level: 1,
            daily_streak: 0,
            highest_streak: 0,
            last_activity: None,
            preferences: Preferences::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-derive `level` from `total_xp`.
    ///
    /// Profiles read from either store pass through here so a stale stored
    /// level can never disagree with the XP total.
    pub fn normalized(mut self) -> Self {
        self.level = level_for_xp(self.total_xp);
        self.highest_streak = self.highest_streak.max(self.daily_streak);
        self
    }
}
