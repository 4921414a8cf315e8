// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Offline-first reconciliation between the local cache and the remote store.
//!
//! Reads ask the remote store first and fold its answer into the cache:
//! entries the remote store returns replace the cached copies unless a local
//! write to them is still pending, and entries only the cache knows are kept.
//! When the remote store cannot answer, the cache is served as is.
//!
//! Writes land in the cache before anything else and are then offered to the
//! remote store. A write the remote store did not confirm goes on a per-user
//! pending ledger (itself a cache value) and is offered again at the start of
//! the next operation for that user, or by [`Reconciler::sync_pending`].
//! Remote failures never fail an operation; only a failed cache write does.
//!
//! Every public operation runs under its user's lock, so two requests for the
//! same user never interleave their read-modify-write of the cache.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::db::{
    canonical_id, is_local_id, new_local_id, Entity, EntityKind, EntityStore, LocalCache, Scope,
};
use crate::error::{AppError, GatewayError, Result};
use crate::models::{Conversation, Difficulty, Goal, Message, Preferences, Role, UserProfile};
use crate::services::gamification;

/// Whether the remote store has confirmed a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    /// Durable locally, waiting for the remote store.
    Pending(String),
}

/// A value as it now stands in the cache, and whether it reached the remote
/// store.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome<T> {
    pub value: T,
    pub sync: SyncStatus,
}

impl<T> WriteOutcome<T> {
    pub fn is_synced(&self) -> bool {
        self.sync == SyncStatus::Synced
    }
}

/// Fields a profile update may change. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub preferences: Option<Preferences>,
}

#[derive(Debug, Clone)]
pub struct NewGoal {
    pub description: String,
    pub xp_value: u64,
    pub difficulty: Difficulty,
    pub motivation: u8,
    pub deadline: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationUpdate {
    pub title: Option<String>,
    pub completed: Option<bool>,
    pub category: Option<String>,
    pub ai_label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub is_voice: bool,
}

/// Result of completing a goal.
#[derive(Debug, Clone, Serialize)]
pub struct GoalCompletion {
    pub goal: WriteOutcome<Goal>,
    pub profile: WriteOutcome<UserProfile>,
    /// XP granted by this call; zero when the goal was already completed.
    pub xp_awarded: u64,
    pub newly_completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageAppend {
    pub conversation: WriteOutcome<Conversation>,
    pub message: WriteOutcome<Message>,
}

/// Counts from one pass over the pending ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SyncReport {
    /// Writes the remote store confirmed.
    pub pushed: usize,
    /// Ledger entries whose entity is no longer cached.
    pub dropped: usize,
    /// Writes still waiting.
    pub remaining: usize,
}

/// A write the remote store has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PendingWrite {
    kind: EntityKind,
    #[serde(default)]
    conversation_id: Option<String>,
    id: String,
}

impl PendingWrite {
    fn new(kind: EntityKind, scope: &Scope, id: &str) -> Self {
        Self {
            kind,
            conversation_id: scope.conversation_id.clone(),
            id: id.to_string(),
        }
    }

    /// Replay order: a conversation must exist remotely before its goals and
    /// messages, and a completed goal is confirmed before the profile that
    /// holds its XP, the same order `complete_goal` writes them in.
    fn order(&self) -> u8 {
        match self.kind {
            EntityKind::Conversation => 0,
            EntityKind::Goal => 1,
            EntityKind::Profile => 2,
            EntityKind::Message => 3,
        }
    }

    fn is_in(&self, kind: EntityKind, scope: &Scope) -> bool {
        self.kind == kind && self.conversation_id == scope.conversation_id
    }
}

fn pending_key(user_id: &str) -> String {
    format!("pending/{}", urlencoding::encode(user_id))
}

enum Push<T> {
    Stored(T),
    Failed(GatewayError),
    /// Not attempted: the parent conversation has no remote id yet.
    Deferred(String),
}

enum Replay {
    Synced,
    Gone,
    Failed(GatewayError),
    Deferred,
}

/// Server copies win, except for ids in `held`: those are local writes the
/// server has not confirmed, and the cached copy stands. Entries only the
/// cache holds are kept after the server's.
fn merge_by_id<T: Entity>(remote: Vec<T>, local: Vec<T>, held: &HashSet<String>) -> Vec<T> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<T> = remote
        .into_iter()
        .filter(|e| seen.insert(e.id().to_string()))
        .map(|e| {
            if !held.contains(e.id()) {
                return e;
            }
            local
                .iter()
                .find(|l| l.id() == e.id())
                .cloned()
                .unwrap_or(e)
        })
        .collect();
    merged.extend(local.into_iter().filter(|e| seen.insert(e.id().to_string())));
    merged
}

fn visible<T: Entity>(entities: Vec<T>) -> Vec<T> {
    entities.into_iter().filter(|e| !e.is_hidden()).collect()
}

/// Holds a user's lock. Dropping it releases the lock and forgets the
/// user's mutex once nobody else is waiting on it.
struct UserGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    user_id: String,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means only the
        // map still refers to the mutex.
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Coordinates the local cache and a remote store.
#[derive(Clone)]
pub struct Reconciler<G> {
    cache: LocalCache,
    gateway: G,
    timeout: Duration,
    user_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl<G> Reconciler<G>
where
    G: EntityStore<Error = GatewayError>,
{
    pub fn new(cache: LocalCache, gateway: G, timeout: Duration) -> Self {
        Self {
            cache,
            gateway,
            timeout,
            user_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    async fn lock_user(&self, user_id: &str) -> UserGuard {
        let lock = self
            .user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        UserGuard {
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.user_locks),
            user_id: user_id.to_string(),
        }
    }

    /// Take the user's lock and replay whatever is still pending for them.
    async fn begin(&self, user_id: &str) -> Result<UserGuard> {
        let guard = self.lock_user(user_id).await;
        self.flush_pending(user_id).await?;
        Ok(guard)
    }

    /// Run a gateway call under the configured timeout.
    async fn remote<O, F>(&self, op: &'static str, call: F) -> std::result::Result<O, GatewayError>
    where
        F: Future<Output = std::result::Result<O, GatewayError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(GatewayError::Unavailable(format!(
                    "{} timed out after {}ms",
                    op,
                    self.timeout.as_millis()
                )))
            })
    }

    // ---------------------------------------------------------------------
    // Read path
    // ---------------------------------------------------------------------

    async fn read_merged<T: Entity>(&self, scope: &Scope) -> Result<Vec<T>> {
        let local: Vec<T> = self.cache.list(scope).await?;

        let remote = match self.remote("list", self.gateway.list::<T>(scope)).await {
            Ok(remote) => remote,
            Err(GatewayError::NotFound(_)) => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    kind = T::KIND.as_str(),
                    user_id = %scope.user_id,
                    error = %e,
                    "Remote read failed, serving cached copy"
                );
                return Ok(local);
            }
        };

        let held: HashSet<String> = self
            .ledger(&scope.user_id)
            .into_iter()
            .filter(|w| w.is_in(T::KIND, scope))
            .map(|w| w.id)
            .collect();
        let merged = merge_by_id(remote, local, &held);
        if let Err(e) = self.cache.replace_all(scope, &merged) {
            // The merged answer is still correct; only the cache is stale.
            tracing::error!(
                kind = T::KIND.as_str(),
                user_id = %scope.user_id,
                error = %e,
                "Failed to write merged read back to cache"
            );
        }
        Ok(merged)
    }

    /// Look an entity up through a fresh merged read. A temporary id also
    /// matches the canonical id it was re-keyed to.
    async fn find_entity<T: Entity>(&self, scope: &Scope, id: &str) -> Result<Option<T>> {
        let canonical = canonical_id(id);
        Ok(self
            .read_merged::<T>(scope)
            .await?
            .into_iter()
            .find(|e| e.id() == id || e.id() == canonical))
    }

    // ---------------------------------------------------------------------
    // Write path
    // ---------------------------------------------------------------------

    async fn write<T: Entity>(&self, scope: &Scope, entity: T) -> Result<WriteOutcome<T>> {
        self.cache.upsert(scope, &entity).await?;

        let pending = PendingWrite::new(T::KIND, scope, entity.id());
        let reason = match self.push(scope, &entity).await? {
            Push::Stored(stored) => {
                self.clear_pending(&scope.user_id, &pending)?;
                return Ok(WriteOutcome {
                    value: stored,
                    sync: SyncStatus::Synced,
                });
            }
            Push::Failed(e) => e.to_string(),
            Push::Deferred(reason) => reason,
        };

        self.enqueue(&scope.user_id, vec![pending])?;
        Ok(WriteOutcome {
            value: entity,
            sync: SyncStatus::Pending(reason),
        })
    }

    /// Offer one entity to the remote store and fold the answer into the
    /// cache.
    async fn push<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<Push<T>> {
        if let Some(parent) = scope.conversation_id.as_deref().filter(|c| is_local_id(c)) {
            return Ok(Push::Deferred(format!(
                "Conversation {} not yet stored remotely",
                parent
            )));
        }

        let attempt = if is_local_id(entity.id()) {
            self.remote("create", self.gateway.create(scope, entity))
                .await
        } else {
            self.remote("upsert", self.gateway.upsert(scope, entity))
                .await
        };

        let attempt = match attempt {
            Err(GatewayError::Conflict(reason)) => {
                self.remote_copy_after_conflict(scope, entity, reason)
                    .await
            }
            other => other,
        };

        match attempt {
            Ok(stored) => {
                self.adopt(scope, entity.id(), &stored).await?;
                Ok(Push::Stored(stored))
            }
            Err(e) => {
                tracing::warn!(
                    kind = T::KIND.as_str(),
                    user_id = %scope.user_id,
                    id = entity.id(),
                    error_kind = e.kind(),
                    error = %e,
                    "Remote write not confirmed"
                );
                Ok(Push::Failed(e))
            }
        }
    }

    /// The remote copy wins a conflict. Without one to fetch, the conflict
    /// stands and the local write stays pending.
    async fn remote_copy_after_conflict<T: Entity>(
        &self,
        scope: &Scope,
        entity: &T,
        reason: String,
    ) -> std::result::Result<T, GatewayError> {
        let id = canonical_id(entity.id());
        match self.remote("find", self.gateway.find::<T>(scope, id)).await? {
            Some(remote) => {
                tracing::info!(
                    kind = T::KIND.as_str(),
                    user_id = %scope.user_id,
                    id,
                    "Write conflict resolved in favour of remote copy"
                );
                Ok(remote)
            }
            None => Err(GatewayError::Conflict(reason)),
        }
    }

    /// Replace the cached copy with the stored one, moving it to its
    /// canonical id if that changed.
    async fn adopt<T: Entity>(&self, scope: &Scope, old_id: &str, stored: &T) -> Result<()> {
        if stored.id() != old_id {
            self.cache.remove::<T>(scope, old_id).await?;
            if T::KIND == EntityKind::Conversation {
                self.rekey_conversation(&scope.user_id, old_id, stored.id())
                    .await?;
            }
            tracing::debug!(
                kind = T::KIND.as_str(),
                user_id = %scope.user_id,
                old_id,
                new_id = stored.id(),
                "Entity re-keyed"
            );
        }
        self.cache.upsert(scope, stored).await?;
        Ok(())
    }

    /// Carry everything hanging off a conversation over to its new id.
    async fn rekey_conversation(&self, user_id: &str, old_id: &str, new_id: &str) -> Result<()> {
        let old_scope = Scope::conversation(user_id, old_id);
        let new_scope = Scope::conversation(user_id, new_id);
        let old_key = EntityKind::Message.cache_key(&old_scope);

        let existing: Vec<Message> = self.cache.list(&new_scope).await?;
        if existing.is_empty() {
            self.cache
                .rename(&old_key, &EntityKind::Message.cache_key(&new_scope))?;
        } else {
            let moved: Vec<Message> = self.cache.list(&old_scope).await?;
            self.cache
                .replace_all(&new_scope, &merge_by_id(existing, moved, &HashSet::new()))?;
            self.cache.delete(&old_key)?;
        }

        let user_scope = Scope::user(user_id);
        let mut goals: Vec<Goal> = self.cache.list(&user_scope).await?;
        let mut relinked = Vec::new();
        for goal in goals
            .iter_mut()
            .filter(|g| g.session_id.as_deref() == Some(old_id))
        {
            goal.session_id = Some(new_id.to_string());
            relinked.push(PendingWrite::new(EntityKind::Goal, &user_scope, &goal.id));
        }
        if !relinked.is_empty() {
            self.cache.replace_all(&user_scope, &goals)?;
            self.enqueue(user_id, relinked)?;
        }

        let mut ledger = self.ledger(user_id);
        let mut moved_any = false;
        for write in ledger.iter_mut().filter(|w| {
            w.kind == EntityKind::Message && w.conversation_id.as_deref() == Some(old_id)
        }) {
            write.conversation_id = Some(new_id.to_string());
            moved_any = true;
        }
        if moved_any {
            self.cache.put(&pending_key(user_id), &ledger)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Pending ledger
    // ---------------------------------------------------------------------

    fn ledger(&self, user_id: &str) -> Vec<PendingWrite> {
        self.cache.get(&pending_key(user_id)).unwrap_or_default()
    }

    fn enqueue(&self, user_id: &str, writes: Vec<PendingWrite>) -> Result<()> {
        let mut ledger = self.ledger(user_id);
        let before = ledger.len();
        for write in writes {
            if !ledger.contains(&write) {
                ledger.push(write);
            }
        }
        if ledger.len() != before {
            self.cache.put(&pending_key(user_id), &ledger)?;
        }
        Ok(())
    }

    fn clear_pending(&self, user_id: &str, write: &PendingWrite) -> Result<()> {
        let mut ledger = self.ledger(user_id);
        let before = ledger.len();
        ledger.retain(|w| w != write);
        if ledger.len() != before {
            self.cache.put(&pending_key(user_id), &ledger)?;
        }
        Ok(())
    }

    /// Wrap a value read back from the cache with its ledger state.
    fn current<T: Entity>(&self, scope: &Scope, value: T) -> WriteOutcome<T> {
        let pending = PendingWrite::new(T::KIND, scope, value.id());
        let sync = if self.ledger(&scope.user_id).contains(&pending) {
            SyncStatus::Pending("Awaiting remote confirmation".to_string())
        } else {
            SyncStatus::Synced
        };
        WriteOutcome { value, sync }
    }

    /// Offer every pending write to the remote store, parents first. Stops at
    /// the first `Unavailable`, since the rest would only time out too.
    async fn flush_pending(&self, user_id: &str) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut attempted: Vec<PendingWrite> = Vec::new();

        loop {
            // Re-read every round: a re-keyed conversation rewrites the
            // ledger entries of its messages.
            let next = self
                .ledger(user_id)
                .into_iter()
                .filter(|w| !attempted.contains(w))
                .min_by_key(PendingWrite::order);
            let Some(write) = next else { break };
            attempted.push(write.clone());

            match self.replay(user_id, &write).await? {
                Replay::Synced => {
                    report.pushed += 1;
                    self.clear_pending(user_id, &write)?;
                }
                Replay::Gone => {
                    report.dropped += 1;
                    self.clear_pending(user_id, &write)?;
                }
                Replay::Failed(GatewayError::Unavailable(_)) => break,
                Replay::Failed(_) | Replay::Deferred => {}
            }
        }

        report.remaining = self.ledger(user_id).len();
        if report.pushed + report.dropped > 0 {
            tracing::debug!(
                user_id,
                pushed = report.pushed,
                dropped = report.dropped,
                remaining = report.remaining,
                "Pending writes replayed"
            );
        }
        Ok(report)
    }

    async fn replay(&self, user_id: &str, write: &PendingWrite) -> Result<Replay> {
        let scope = Scope {
            user_id: user_id.to_string(),
            conversation_id: write.conversation_id.clone(),
        };
        match write.kind {
            EntityKind::Profile => self.replay_one::<UserProfile>(&scope, &write.id).await,
            EntityKind::Goal => self.replay_one::<Goal>(&scope, &write.id).await,
            EntityKind::Conversation => self.replay_one::<Conversation>(&scope, &write.id).await,
            EntityKind::Message => self.replay_one::<Message>(&scope, &write.id).await,
        }
    }

    async fn replay_one<T: Entity>(&self, scope: &Scope, id: &str) -> Result<Replay> {
        let Some(entity) = self.cache.find::<T>(scope, id).await? else {
            return Ok(Replay::Gone);
        };
        Ok(match self.push(scope, &entity).await? {
            Push::Stored(_) => Replay::Synced,
            Push::Failed(e) => Replay::Failed(e),
            Push::Deferred(_) => Replay::Deferred,
        })
    }

    /// Put every cached entity that still carries a temporary id on the
    /// ledger, in case an earlier ledger update was lost.
    async fn enqueue_local_ids(&self, user_id: &str) -> Result<()> {
        let user_scope = Scope::user(user_id);
        let goals: Vec<Goal> = self.cache.list(&user_scope).await?;
        let conversations: Vec<Conversation> = self.cache.list(&user_scope).await?;

        let mut writes: Vec<PendingWrite> = goals
            .iter()
            .filter(|g| is_local_id(&g.id))
            .map(|g| PendingWrite::new(EntityKind::Goal, &user_scope, &g.id))
            .chain(
                conversations
                    .iter()
                    .filter(|c| is_local_id(&c.id))
                    .map(|c| PendingWrite::new(EntityKind::Conversation, &user_scope, &c.id)),
            )
            .collect();

        for conversation in &conversations {
            let scope = Scope::conversation(user_id, &conversation.id);
            let messages: Vec<Message> = self.cache.list(&scope).await?;
            writes.extend(
                messages
                    .iter()
                    .filter(|m| is_local_id(&m.id))
                    .map(|m| PendingWrite::new(EntityKind::Message, &scope, &m.id)),
            );
        }

        self.enqueue(user_id, writes)
    }

    /// Push everything the remote store has not confirmed for `user_id`.
    pub async fn sync_pending(&self, user_id: &str) -> Result<SyncReport> {
        let _guard = self.lock_user(user_id).await;
        self.enqueue_local_ids(user_id).await?;
        let report = self.flush_pending(user_id).await?;

        tracing::info!(
            user_id,
            pushed = report.pushed,
            dropped = report.dropped,
            remaining = report.remaining,
            "Sync pass finished"
        );
        Ok(report)
    }

    // ---------------------------------------------------------------------
    // Profile
    // ---------------------------------------------------------------------

    async fn profile_locked(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self
            .read_merged::<UserProfile>(&Scope::user(user_id))
            .await?
            .into_iter()
            .find(|p| p.id == user_id))
    }

    async fn profile_or_new(&self, user_id: &str, now: DateTime<Utc>) -> Result<UserProfile> {
        Ok(self
            .profile_locked(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::new(user_id, None, now)))
    }

    /// The user's profile, or `None` if neither store has one yet.
    pub async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let _guard = self.begin(user_id).await?;
        self.profile_locked(user_id).await
    }

    /// Fetch the profile, creating a fresh one on first use.
    pub async fn ensure_profile(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome<UserProfile>> {
        let _guard = self.begin(user_id).await?;
        let scope = Scope::user(user_id);

        match self.profile_locked(user_id).await? {
            Some(profile) => Ok(self.current(&scope, profile)),
            None => {
                tracing::info!(user_id, "Creating profile");
                self.write(&scope, UserProfile::new(user_id, None, now))
                    .await
            }
        }
    }

    /// Change the display name and/or preferences, creating the profile if
    /// needed.
    pub async fn update_profile(
        &self,
        user_id: &str,
        update: ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome<UserProfile>> {
        let _guard = self.begin(user_id).await?;

        let mut profile = self.profile_or_new(user_id, now).await?;
        if let Some(name) = update.name {
            profile.name = Some(name);
        }
        if let Some(preferences) = update.preferences {
            profile.preferences = preferences;
        }
        profile.updated_at = now;

        self.write(&Scope::user(user_id), profile).await
    }

    /// Count a qualifying activity toward the daily streak.
    pub async fn record_activity(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome<UserProfile>> {
        let _guard = self.begin(user_id).await?;

        let profile = gamification::update_streak(self.profile_or_new(user_id, now).await?, now);
        self.write(&Scope::user(user_id), profile).await
    }

    // ---------------------------------------------------------------------
    // Goals
    // ---------------------------------------------------------------------

    /// Goals in creation order.
    pub async fn list_goals(&self, user_id: &str) -> Result<Vec<Goal>> {
        let _guard = self.begin(user_id).await?;

        let mut goals = visible(self.read_merged::<Goal>(&Scope::user(user_id)).await?);
        goals.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(goals)
    }

    pub async fn create_goal(
        &self,
        user_id: &str,
        new_goal: NewGoal,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome<Goal>> {
        if new_goal.description.trim().is_empty() {
            return Err(AppError::BadRequest(
                "Goal description must not be empty".to_string(),
            ));
        }
        if !(1..=10).contains(&new_goal.motivation) {
            return Err(AppError::BadRequest(format!(
                "Motivation must be between 1 and 10, got {}",
                new_goal.motivation
            )));
        }

        let _guard = self.begin(user_id).await?;

        let goal = Goal {
            id: new_local_id(),
            description: new_goal.description.trim().to_string(),
            xp_value: new_goal.xp_value,
            difficulty: new_goal.difficulty,
            motivation: new_goal.motivation,
            completed: false,
            completed_at: None,
            completion_reasoning: None,
            xp_awarded: None,
            deadline: new_goal.deadline,
            created_at: now,
            session_id: new_goal.session_id,
        };
        tracing::info!(user_id, goal_id = %goal.id, "Creating goal");

        self.write(&Scope::user(user_id), goal).await
    }

    /// Complete a goal, award its XP and count it as the day's activity.
    ///
    /// A goal is rewarded once: completing it again returns it unchanged.
    pub async fn complete_goal(
        &self,
        user_id: &str,
        goal_id: &str,
        reasoning: String,
        now: DateTime<Utc>,
    ) -> Result<GoalCompletion> {
        let _guard = self.begin(user_id).await?;
        let scope = Scope::user(user_id);

        let goal: Goal = self
            .find_entity(&scope, goal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Goal {} not found", goal_id)))?;
        let stored_profile = self.profile_locked(user_id).await?;

        if goal.completed {
            tracing::debug!(user_id, goal_id, "Goal already completed");
            let profile = match stored_profile {
                Some(profile) => self.current(&scope, profile),
                None => {
                    self.write(&scope, UserProfile::new(user_id, None, now))
                        .await?
                }
            };
            return Ok(GoalCompletion {
                goal: self.current(&scope, goal),
                profile,
                xp_awarded: 0,
                newly_completed: false,
            });
        }

        let profile = stored_profile.unwrap_or_else(|| UserProfile::new(user_id, None, now));
        let reward = gamification::reward_completion(profile, &goal, now);
        let goal = goal.mark_completed(reasoning, now, reward.xp_awarded);

        // Goal first: a crash between the two writes loses the award instead
        // of granting it twice.
        let goal = self.write(&scope, goal).await?;
        let profile = self.write(&scope, reward.profile).await?;

        tracing::info!(
            user_id,
            goal_id = %goal.value.id,
            xp_awarded = reward.xp_awarded,
            total_xp = profile.value.total_xp,
            level = profile.value.level,
            "Goal completed"
        );

        Ok(GoalCompletion {
            goal,
            profile,
            xp_awarded: reward.xp_awarded,
            newly_completed: true,
        })
    }

    // ---------------------------------------------------------------------
    // Conversations and messages
    // ---------------------------------------------------------------------

    /// Conversations that are not deleted, most recently active first.
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let _guard = self.begin(user_id).await?;

        let mut conversations =
            visible(self.read_merged::<Conversation>(&Scope::user(user_id)).await?);
        conversations.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(conversations)
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome<Conversation>> {
        let _guard = self.begin(user_id).await?;

        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| Conversation::title_from_message(""));
        self.write(
            &Scope::user(user_id),
            Conversation::new(new_local_id(), title, now),
        )
        .await
    }

    async fn live_conversation(&self, user_id: &str, conversation_id: &str) -> Result<Conversation> {
        self.find_entity::<Conversation>(&Scope::user(user_id), conversation_id)
            .await?
            .filter(|c| !c.soft_deleted)
            .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", conversation_id)))
    }

    pub async fn update_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        update: ConversationUpdate,
    ) -> Result<WriteOutcome<Conversation>> {
        let _guard = self.begin(user_id).await?;

        let mut conversation = self.live_conversation(user_id, conversation_id).await?;
        if let Some(title) = update.title {
            conversation.title = title;
        }
        if let Some(completed) = update.completed {
            conversation.completed = completed;
        }
        if let Some(category) = update.category {
            conversation.category = category;
        }
        if let Some(ai_label) = update.ai_label {
            conversation.ai_label = Some(ai_label);
        }

        self.write(&Scope::user(user_id), conversation).await
    }

    /// Hide a conversation from list reads. Its messages stay cached.
    pub async fn soft_delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<WriteOutcome<Conversation>> {
        let _guard = self.begin(user_id).await?;

        let mut conversation: Conversation = self
            .find_entity(&Scope::user(user_id), conversation_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Conversation {} not found", conversation_id))
            })?;
        conversation.soft_deleted = true;

        tracing::info!(user_id, conversation_id = %conversation.id, "Conversation deleted");
        self.write(&Scope::user(user_id), conversation).await
    }

    /// Messages of a conversation, oldest first.
    pub async fn list_messages(&self, user_id: &str, conversation_id: &str) -> Result<Vec<Message>> {
        let _guard = self.begin(user_id).await?;

        let conversation = self.live_conversation(user_id, conversation_id).await?;
        let mut messages = self
            .read_merged::<Message>(&Scope::conversation(user_id, &conversation.id))
            .await?;
        messages.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(messages)
    }

    /// Append a message and bump the conversation's `updated_at`.
    ///
    /// Without a conversation id, or with one neither store knows, the
    /// message starts a new conversation titled after it.
    pub async fn append_message(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<MessageAppend> {
        if message.content.trim().is_empty() {
            return Err(AppError::BadRequest(
                "Message content must not be empty".to_string(),
            ));
        }

        let _guard = self.begin(user_id).await?;
        let user_scope = Scope::user(user_id);

        let known = match conversation_id {
            Some(id) => self.find_entity::<Conversation>(&user_scope, id).await?,
            None => None,
        };
        let mut conversation = match known {
            Some(c) if c.soft_deleted => {
                return Err(AppError::NotFound(format!(
                    "Conversation {} not found",
                    c.id
                )))
            }
            Some(c) => c,
            None => {
                let id = conversation_id
                    .map(str::to_string)
                    .unwrap_or_else(new_local_id);
                tracing::info!(user_id, conversation_id = %id, "Starting conversation");
                Conversation::new(id, Conversation::title_from_message(&message.content), now)
            }
        };
        conversation.updated_at = now;
        let conversation = self.write(&user_scope, conversation).await?;

        let message = Message {
            id: new_local_id(),
            role: message.role,
            content: message.content,
            timestamp: now,
            is_voice: message.is_voice,
        };
        let message = self
            .write(
                &Scope::conversation(user_id, &conversation.value.id),
                message,
            )
            .await?;

        Ok(MessageAppend {
            conversation,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FirestoreGateway;
    use chrono::TimeZone;
    use tempfile::{tempdir, TempDir};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).unwrap()
    }

    fn offline() -> (TempDir, Reconciler<FirestoreGateway>) {
        let dir = tempdir().unwrap();
        let cache = LocalCache::open(dir.path()).unwrap();
        let reconciler = Reconciler::new(
            cache,
            FirestoreGateway::new_offline(),
            Duration::from_millis(200),
        );
        (dir, reconciler)
    }

    fn new_goal(description: &str) -> NewGoal {
        NewGoal {
            description: description.to_string(),
            xp_value: 100,
            difficulty: Difficulty::Medium,
            motivation: 7,
            deadline: None,
            session_id: None,
        }
    }

    fn goal(id: &str, description: &str) -> Goal {
        Goal {
            id: id.to_string(),
            description: description.to_string(),
            xp_value: 10,
            difficulty: Difficulty::Easy,
            motivation: 5,
            completed: false,
            completed_at: None,
            completion_reasoning: None,
            xp_awarded: None,
            deadline: None,
            created_at: at(1, 0),
            session_id: None,
        }
    }

    #[test]
    fn test_merge_prefers_remote_and_keeps_local_only() {
        let remote = vec![goal("g1", "server"), goal("g2", "server")];
        let local = vec![goal("g1", "cached"), goal("local-x", "offline")];

        let merged = merge_by_id(remote, local, &HashSet::new());
        let ids: Vec<&str> = merged.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2", "local-x"]);
        assert_eq!(merged[0].description, "server");
    }

    #[test]
    fn test_merge_keeps_unconfirmed_local_copy() {
        let remote = vec![goal("g1", "server"), goal("g2", "server")];
        let local = vec![goal("g1", "cached"), goal("g2", "cached")];
        let held: HashSet<String> = ["g2".to_string()].into();

        let merged = merge_by_id(remote, local, &held);
        let descriptions: Vec<&str> = merged.iter().map(|g| g.description.as_str()).collect();
        assert_eq!(descriptions, vec!["server", "cached"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let remote = vec![goal("g1", "server")];
        let none = HashSet::new();
        let once = merge_by_id(remote.clone(), vec![goal("local-x", "offline")], &none);
        let twice = merge_by_id(remote, once.clone(), &none);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_pending_order_puts_parents_first_and_goals_before_profile() {
        let user = Scope::user("u1");
        let conv = Scope::conversation("u1", "c1");
        let mut writes = [
            PendingWrite::new(EntityKind::Message, &conv, "m1"),
            PendingWrite::new(EntityKind::Goal, &user, "g1"),
            PendingWrite::new(EntityKind::Conversation, &user, "c1"),
            PendingWrite::new(EntityKind::Profile, &user, "u1"),
        ];
        writes.sort_by_key(PendingWrite::order);
        let kinds: Vec<EntityKind> = writes.iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntityKind::Conversation,
                EntityKind::Goal,
                EntityKind::Profile,
                EntityKind::Message
            ]
        );
    }

    #[tokio::test]
    async fn test_offline_write_is_pending_and_readable() {
        let (_dir, reconciler) = offline();

        let outcome = reconciler
            .create_goal("u1", new_goal("Walk daily"), at(1, 9))
            .await
            .unwrap();
        assert!(!outcome.is_synced());
        assert!(is_local_id(&outcome.value.id));

        let goals = reconciler.list_goals("u1").await.unwrap();
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].description, "Walk daily");

        let report = reconciler.sync_pending("u1").await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn test_fetch_profile_absent_then_ensured() {
        let (_dir, reconciler) = offline();

        assert!(reconciler.fetch_profile("u1").await.unwrap().is_none());
        let created = reconciler.ensure_profile("u1", at(1, 9)).await.unwrap();
        assert_eq!(created.value.level, 1);

        let again = reconciler.ensure_profile("u1", at(2, 9)).await.unwrap();
        assert_eq!(again.value.created_at, at(1, 9));
        assert!(matches!(again.sync, SyncStatus::Pending(_)));
    }

    #[tokio::test]
    async fn test_complete_goal_awards_once() {
        let (_dir, reconciler) = offline();
        let goal = reconciler
            .create_goal("u1", new_goal("Stretch"), at(1, 9))
            .await
            .unwrap()
            .value;

        let first = reconciler
            .complete_goal("u1", &goal.id, "Done".to_string(), at(1, 18))
            .await
            .unwrap();
        assert!(first.newly_completed);
        // 100 base, medium, no deadline counts as on time: 100 * 1.5 * 1.3
        assert_eq!(first.xp_awarded, 195);
        assert_eq!(first.profile.value.total_xp, 195);
        assert_eq!(first.profile.value.daily_streak, 1);

        let second = reconciler
            .complete_goal("u1", &goal.id, "Again".to_string(), at(1, 19))
            .await
            .unwrap();
        assert!(!second.newly_completed);
        assert_eq!(second.xp_awarded, 0);
        assert_eq!(second.profile.value.total_xp, 195);
        assert_eq!(
            second.goal.value.completion_reasoning.as_deref(),
            Some("Done")
        );
    }

    #[tokio::test]
    async fn test_complete_unknown_goal_is_not_found() {
        let (_dir, reconciler) = offline();
        let err = reconciler
            .complete_goal("u1", "missing", "Done".to_string(), at(1, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_goal_rejects_bad_motivation() {
        let (_dir, reconciler) = offline();
        let mut bad = new_goal("Run");
        bad.motivation = 11;
        assert!(matches!(
            reconciler.create_goal("u1", bad, at(1, 9)).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_first_message_creates_conversation() {
        let (_dir, reconciler) = offline();

        let appended = reconciler
            .append_message(
                "u1",
                None,
                NewMessage {
                    role: Role::User,
                    content: "I keep skipping breakfast".to_string(),
                    is_voice: false,
                },
                at(2, 8),
            )
            .await
            .unwrap();
        assert_eq!(appended.conversation.value.title, "I keep skipping breakfast");

        let conversation_id = appended.conversation.value.id.clone();
        reconciler
            .append_message(
                "u1",
                Some(&conversation_id),
                NewMessage {
                    role: Role::Assistant,
                    content: "What gets in the way?".to_string(),
                    is_voice: false,
                },
                at(2, 9),
            )
            .await
            .unwrap();

        let messages = reconciler
            .list_messages("u1", &conversation_id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);

        let conversations = reconciler.list_conversations("u1").await.unwrap();
        assert_eq!(conversations[0].updated_at, at(2, 9));
    }

    #[tokio::test]
    async fn test_soft_deleted_conversation_is_hidden() {
        let (_dir, reconciler) = offline();
        let conversation = reconciler
            .create_conversation("u1", Some("Sleep".to_string()), at(1, 9))
            .await
            .unwrap()
            .value;

        reconciler
            .soft_delete_conversation("u1", &conversation.id)
            .await
            .unwrap();
        assert!(reconciler.list_conversations("u1").await.unwrap().is_empty());
        assert!(matches!(
            reconciler.list_messages("u1", &conversation.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_completed_goal_without_profile_stores_one() {
        let (_dir, reconciler) = offline();
        let scope = Scope::user("u1");
        let done = goal("g1", "Read").mark_completed("Done".to_string(), at(1, 9), 10);
        reconciler.cache.upsert(&scope, &done).await.unwrap();

        let again = reconciler
            .complete_goal("u1", "g1", "Again".to_string(), at(1, 10))
            .await
            .unwrap();
        assert!(!again.newly_completed);
        assert_eq!(again.xp_awarded, 0);
        assert!(matches!(again.profile.sync, SyncStatus::Pending(_)));

        let stored = reconciler.fetch_profile("u1").await.unwrap();
        assert_eq!(stored.map(|p| p.total_xp), Some(0));
    }

    #[tokio::test]
    async fn test_user_locks_are_released() {
        let (_dir, reconciler) = offline();

        let held = reconciler.lock_user("u1").await;
        assert_eq!(reconciler.user_locks.len(), 1);
        drop(held);
        assert!(reconciler.user_locks.is_empty());

        for user in ["u1", "u2", "u3"] {
            reconciler.ensure_profile(user, at(1, 9)).await.unwrap();
        }
        assert!(reconciler.user_locks.is_empty());
    }
}
