// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard service tests: ranking real rows and falling back to the
//! synthetic population.

use questlog::models::{LeaderboardRow, SortDimension};
use questlog::services::LeaderboardService;
use std::time::Duration;

mod common;
use common::MemoryGateway;

fn row(id: &str, xp: u64, completed: u32, streak: u32) -> LeaderboardRow {
    LeaderboardRow {
        id: id.to_string(),
        name: Some(format!("User {}", id)),
        total_xp: xp,
        goals_completed: completed,
        goals_created: completed * 2,
        daily_streak: streak,
        highest_streak: streak,
        total_sessions: 3,
        server_rank: None,
    }
}

fn service(gateway: &MemoryGateway, cap: usize) -> LeaderboardService<MemoryGateway> {
    LeaderboardService::new(gateway.clone(), cap, Duration::from_millis(500))
}

#[tokio::test]
async fn test_empty_remote_uses_synthetic_population() {
    let gateway = MemoryGateway::new();
    let board = service(&gateway, 100)
        .leaderboard(SortDimension::Xp, 50)
        .await;

    assert!(board.synthetic);
    assert_eq!(board.entries.len(), 10);
    assert_eq!(board.entries[0].rank, 1);
    assert_eq!(board.entries[9].rank, 10);
}

#[tokio::test]
async fn test_unavailable_remote_uses_synthetic_population() {
    let gateway = MemoryGateway::new();
    gateway.set_leaderboard(vec![row("a", 10, 1, 1)]);
    gateway.set_online(false);

    let board = service(&gateway, 100)
        .leaderboard(SortDimension::Goals, 3)
        .await;
    assert!(board.synthetic);
    assert_eq!(board.entries.len(), 3);
}

#[tokio::test]
async fn test_real_rows_are_ranked_by_requested_dimension() {
    let gateway = MemoryGateway::new();
    gateway.set_leaderboard(vec![
        row("a", 3000, 2, 9),
        row("b", 1000, 8, 1),
        row("c", 2000, 5, 4),
    ]);
    let service = service(&gateway, 100);

    let ids = |board: questlog::services::Leaderboard| -> Vec<String> {
        board.entries.into_iter().map(|e| e.id).collect()
    };

    assert_eq!(
        ids(service.leaderboard(SortDimension::Xp, 10).await),
        vec!["a", "c", "b"]
    );
    assert_eq!(
        ids(service.leaderboard(SortDimension::Goals, 10).await),
        vec!["b", "c", "a"]
    );
    assert_eq!(
        ids(service.leaderboard(SortDimension::Streak, 10).await),
        vec!["a", "c", "b"]
    );
}

#[tokio::test]
async fn test_limit_applies_after_ranking() {
    let gateway = MemoryGateway::new();
    gateway.set_leaderboard(vec![
        row("low", 100, 1, 1),
        row("top", 900, 1, 1),
        row("mid", 500, 1, 1),
    ]);

    let board = service(&gateway, 100)
        .leaderboard(SortDimension::Xp, 1)
        .await;
    assert!(!board.synthetic);
    assert_eq!(board.entries.len(), 1);
    assert_eq!(board.entries[0].id, "top");
    assert_eq!(board.entries[0].rank, 1);
}

#[tokio::test]
async fn test_server_rank_and_level_are_not_trusted() {
    let gateway = MemoryGateway::new();
    let mut claimed_first = row("x", 500, 1, 1);
    claimed_first.server_rank = Some(1);
    gateway.set_leaderboard(vec![claimed_first, row("y", 2500, 1, 1)]);

    let board = service(&gateway, 100)
        .leaderboard(SortDimension::Xp, 10)
        .await;
    assert_eq!(board.entries[0].id, "y");
    assert_eq!(board.entries[0].level, 3);
    assert_eq!(board.entries[1].rank, 2);
}

#[tokio::test]
async fn test_user_rank_summary() {
    let gateway = MemoryGateway::new();
    gateway.set_leaderboard(vec![
        row("a", 3000, 2, 9),
        row("b", 1000, 8, 1),
        row("c", 2000, 5, 4),
    ]);
    let service = service(&gateway, 100);

    let summary = service.user_rank("b").await;
    assert_eq!(summary.rank_by_xp, Some(3));
    assert_eq!(summary.rank_by_goals, Some(1));
    assert_eq!(summary.rank_by_streak, Some(3));
    assert_eq!(summary.total_users, 3);

    let unknown = service.user_rank("zz").await;
    assert_eq!(unknown.rank_by_xp, None);
    assert_eq!(unknown.total_users, 3);
}

#[tokio::test]
async fn test_capped_population_is_fetched_per_dimension() {
    let gateway = MemoryGateway::new();
    let mut rows: Vec<LeaderboardRow> = (0..20)
        .map(|i| row(&format!("u{:02}", i), 100 * (i + 1), 1, 1))
        .collect();
    // Barely any XP, but more goals than anyone
    rows.push(row("grinder", 10, 50, 1));
    gateway.set_leaderboard(rows);
    let service = service(&gateway, 5);

    let by_goals = service.leaderboard(SortDimension::Goals, 10).await;
    assert!(!by_goals.synthetic);
    assert_eq!(by_goals.entries.len(), 5);
    assert_eq!(by_goals.entries[0].id, "grinder");
    assert_eq!(by_goals.entries[0].rank, 1);

    let by_xp = service.leaderboard(SortDimension::Xp, 10).await;
    assert_eq!(by_xp.entries[0].id, "u19");
    assert!(by_xp.entries.iter().all(|e| e.id != "grinder"));

    let summary = service.user_rank("grinder").await;
    assert_eq!(summary.rank_by_goals, Some(1));
    assert_eq!(summary.rank_by_xp, None);
    assert_eq!(summary.total_users, 21);

    let top = service.user_rank("u19").await;
    assert_eq!(top.rank_by_xp, Some(1));
    assert_eq!(top.total_users, 21);
}
