// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Questlog: offline-first data and gamification core for a coaching journal
//!
//! Profiles, goals and conversations are written to a local cache first and
//! reconciled with Firestore whenever it answers. XP, levels, streaks and the
//! leaderboard are derived by pure functions on top.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::FirestoreGateway;
use services::{LeaderboardService, Reconciler};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub reconciler: Reconciler<FirestoreGateway>,
    pub leaderboard: LeaderboardService<FirestoreGateway>,
}
