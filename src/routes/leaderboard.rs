// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard routes. Never fail on remote errors: a synthetic board is
//! served instead.

use crate::error::{AppError, Result};
use crate::models::{SortDimension, UserRankSummary};
use crate::services::Leaderboard;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leaderboard", get(get_leaderboard))
        .route("/api/users/{user_id}/rank", get(get_user_rank))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    /// `xp`, `goals` or `streak`; defaults to `xp`
    pub sort: Option<String>,
    pub limit: Option<usize>,
}

async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Leaderboard>> {
    let dimension = match query.sort.as_deref() {
        Some(raw) => raw
            .parse::<SortDimension>()
            .map_err(|e| AppError::BadRequest(e.to_string()))?,
        None => SortDimension::default(),
    };
    let limit = query
        .limit
        .unwrap_or(state.config.leaderboard_default_limit)
        .min(state.config.leaderboard_population_cap);

    Ok(Json(state.leaderboard.leaderboard(dimension, limit).await))
}

async fn get_user_rank(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserRankSummary>> {
    Ok(Json(state.leaderboard.user_rank(&user_id).await))
}
