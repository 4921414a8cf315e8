// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Goal model for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// How hard the user judged the goal to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// A goal declared by the user or the coaching flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Goal {
    /// Goal ID (`local-` prefixed until the remote store accepts it)
    pub id: String,
    pub description: String,
    /// Base XP before multipliers
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub xp_value: u64,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Self-reported motivation, 1 to 10
    pub motivation: u8,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_reasoning: Option<String>,
    /// XP granted at completion
    #[serde(default)]
    #[cfg_attr(feature = "binding-generation", ts(type = "number | null"))]
    pub xp_awarded: Option<u64>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Owning conversation
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Goal {
    /// Completion fields are present exactly when the goal is completed.
    pub fn is_consistent(&self) -> bool {
        let fields_set = self.completed_at.is_some() && self.completion_reasoning.is_some();
        let fields_clear = self.completed_at.is_none()
            && self.completion_reasoning.is_none()
            && self.xp_awarded.is_none();
        if self.completed {
            fields_set
        } else {
            fields_clear
        }
    }

    /// Mark the goal completed. Completion happens once; later calls return
    /// the goal unchanged.
    pub fn mark_completed(mut self, reasoning: String, at: DateTime<Utc>, xp_awarded: u64) -> Self {
        if self.completed {
            return self;
        }
        self.completed = true;
        self.completed_at = Some(at);
        self.completion_reasoning = Some(reasoning);
        self.xp_awarded = Some(xp_awarded);
        self
    }
}
