// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod conversation;
pub mod goal;
pub mod leaderboard;
pub mod profile;

pub use conversation::{Conversation, Message, Role};
pub use goal::{Difficulty, Goal};
pub use leaderboard::{LeaderboardEntry, LeaderboardRow, SortDimension, UserRankSummary};
pub use profile::{Preferences, Tone, UserProfile};
