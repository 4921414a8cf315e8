// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use questlog::config::Config;
use questlog::db::{canonical_id, Entity, EntityStore, FirestoreGateway, LocalCache, Scope};
use questlog::error::GatewayError;
use questlog::models::{LeaderboardRow, SortDimension};
use questlog::routes::create_router;
use questlog::services::{LeaderboardService, LeaderboardSource, Reconciler};
use questlog::AppState;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Fixed instant on 2024-03-`day` at `hour`:00 UTC.
#[allow(dead_code)]
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

/// Create a gateway connected to the Firestore emulator.
#[allow(dead_code)]
pub async fn test_gateway() -> FirestoreGateway {
    FirestoreGateway::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// In-memory remote store with switches for the failures the reconciler has
/// to survive.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    docs: Arc<Mutex<HashMap<String, BTreeMap<String, Value>>>>,
    leaderboard: Arc<Mutex<Vec<LeaderboardRow>>>,
    offline: Arc<AtomicBool>,
    drop_create_replies: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Store creates but answer `Unavailable`, as if the reply was lost.
    pub fn set_drop_create_replies(&self, drop: bool) {
        self.drop_create_replies.store(drop, Ordering::SeqCst);
    }

    /// Seed a document directly, bypassing the switches.
    pub fn put_remote<T: Entity>(&self, scope: &Scope, entity: &T) {
        let value = serde_json::to_value(entity).unwrap();
        self.docs
            .lock()
            .unwrap()
            .entry(T::KIND.cache_key(scope))
            .or_default()
            .insert(entity.id().to_string(), value);
    }

    pub fn remote_all<T: Entity>(&self, scope: &Scope) -> Vec<T> {
        self.docs
            .lock()
            .unwrap()
            .get(&T::KIND.cache_key(scope))
            .map(|docs| {
                docs.values()
                    .map(|v| serde_json::from_value(v.clone()).unwrap())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_leaderboard(&self, rows: Vec<LeaderboardRow>) {
        *self.leaderboard.lock().unwrap() = rows;
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(GatewayError::Unavailable("memory gateway offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn decode<T: Entity>(value: &Value) -> Result<T, GatewayError> {
        serde_json::from_value::<T>(value.clone())
            .map(Entity::normalize)
            .map_err(|e| GatewayError::InvalidInput(e.to_string()))
    }
}

#[async_trait]
impl EntityStore for MemoryGateway {
    type Error = GatewayError;

    async fn list<T: Entity>(&self, scope: &Scope) -> Result<Vec<T>, GatewayError> {
        self.check()?;
        let docs = self.docs.lock().unwrap();
        docs.get(&T::KIND.cache_key(scope))
            .map(|d| d.values().map(Self::decode::<T>).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn find<T: Entity>(&self, scope: &Scope, id: &str) -> Result<Option<T>, GatewayError> {
        self.check()?;
        let docs = self.docs.lock().unwrap();
        docs.get(&T::KIND.cache_key(scope))
            .and_then(|d| d.get(id))
            .map(Self::decode::<T>)
            .transpose()
    }

    async fn create<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<T, GatewayError> {
        self.check()?;
        let stored = entity.clone().with_id(canonical_id(entity.id()).to_string());
        {
            let mut docs = self.docs.lock().unwrap();
            let collection = docs.entry(T::KIND.cache_key(scope)).or_default();
            if collection.contains_key(stored.id()) {
                return Err(GatewayError::Conflict(format!(
                    "{} already exists",
                    stored.id()
                )));
            }
            collection.insert(
                stored.id().to_string(),
                serde_json::to_value(&stored).unwrap(),
            );
        }
        if self.drop_create_replies.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("reply lost".to_string()));
        }
        Ok(stored)
    }

    async fn upsert<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<T, GatewayError> {
        self.check()?;
        self.put_remote(scope, entity);
        Ok(entity.clone())
    }

    async fn remove<T: Entity>(&self, scope: &Scope, id: &str) -> Result<(), GatewayError> {
        self.check()?;
        if let Some(docs) = self.docs.lock().unwrap().get_mut(&T::KIND.cache_key(scope)) {
            docs.remove(id);
        }
        Ok(())
    }
}

#[async_trait]
impl LeaderboardSource for MemoryGateway {
    async fn leaderboard_rows(
        &self,
        dimension: SortDimension,
        limit: Option<usize>,
    ) -> Result<Vec<LeaderboardRow>, GatewayError> {
        self.check()?;
        let mut rows = self.leaderboard.lock().unwrap().clone();
        // Like the real query: highest on the primary key first, then capped.
        rows.sort_by_key(|row| {
            Reverse(match dimension {
                SortDimension::Xp => row.total_xp,
                SortDimension::Goals => u64::from(row.goals_completed),
                SortDimension::Streak => u64::from(row.highest_streak),
            })
        });
        Ok(match limit {
            Some(limit) => rows.into_iter().take(limit).collect(),
            None => rows,
        })
    }

    async fn population_size(&self) -> Result<usize, GatewayError> {
        self.check()?;
        Ok(self.leaderboard.lock().unwrap().len())
    }
}

/// Reconciler over a fresh temporary cache and an in-memory remote store.
#[allow(dead_code)]
pub fn memory_reconciler() -> (TempDir, MemoryGateway, Reconciler<MemoryGateway>) {
    let dir = tempfile::tempdir().unwrap();
    let gateway = MemoryGateway::new();
    let reconciler = Reconciler::new(
        LocalCache::open(dir.path()).unwrap(),
        gateway.clone(),
        Duration::from_millis(500),
    );
    (dir, gateway, reconciler)
}

/// Create a test app with an offline remote store and a temporary cache.
/// Returns the router, the shared state, and the cache directory guard.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        cache_dir: dir.path().to_path_buf(),
        gateway_timeout: Duration::from_millis(200),
        ..Config::default()
    };

    let cache = LocalCache::open(&config.cache_dir).unwrap();
    let gateway = FirestoreGateway::new_offline();

    let state = Arc::new(AppState {
        reconciler: Reconciler::new(cache, gateway.clone(), config.gateway_timeout),
        leaderboard: LeaderboardService::new(
            gateway,
            config.leaderboard_population_cap,
            config.gateway_timeout,
        ),
        config,
    });

    (create_router(state.clone()), state, dir)
}
