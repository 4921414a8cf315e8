// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod gamification;
pub mod leaderboard;
pub mod reconciler;

pub use leaderboard::{Leaderboard, LeaderboardService, LeaderboardSource};
pub use reconciler::{
    ConversationUpdate, GoalCompletion, MessageAppend, NewGoal, NewMessage, ProfileUpdate,
    Reconciler, SyncReport, SyncStatus, WriteOutcome,
};
