// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user API routes: profile, goals, conversations and sync.
//!
//! Every write answers with the value as stored locally plus its sync state.
//! A `pending` state is still a success: the write is durable on this side
//! and will reach the remote store on a later attempt.

use crate::error::{AppError, Result};
use crate::models::{Conversation, Difficulty, Goal, Message, Preferences, Role, UserProfile};
use crate::services::gamification::{level_progress, LevelProgress};
use crate::services::{
    ConversationUpdate, NewGoal, NewMessage, ProfileUpdate, SyncReport, SyncStatus, WriteOutcome,
};
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/users/{user_id}/profile",
            get(get_profile).put(put_profile),
        )
        .route("/api/users/{user_id}/activity", post(record_activity))
        .route(
            "/api/users/{user_id}/goals",
            get(list_goals).post(create_goal),
        )
        .route(
            "/api/users/{user_id}/goals/{goal_id}/complete",
            post(complete_goal),
        )
        .route(
            "/api/users/{user_id}/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/users/{user_id}/conversations/{conversation_id}",
            patch(update_conversation).delete(delete_conversation),
        )
        .route(
            "/api/users/{user_id}/conversations/{conversation_id}/messages",
            get(list_messages).post(append_message),
        )
        .route("/api/users/{user_id}/messages", post(start_conversation))
        .route("/api/users/{user_id}/sync", post(sync))
}

/// Either half of a combined write still waiting makes the whole response
/// pending.
fn combined_sync(first: &SyncStatus, second: &SyncStatus) -> SyncStatus {
    match (first, second) {
        (SyncStatus::Pending(reason), _) | (_, SyncStatus::Pending(reason)) => {
            SyncStatus::Pending(reason.clone())
        }
        _ => SyncStatus::Synced,
    }
}

// ─── Profile ─────────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfileResponse {
    pub profile: UserProfile,
    pub progress: LevelProgress,
    /// Absent on reads
    pub sync: Option<SyncStatus>,
}

impl ProfileResponse {
    fn new(profile: UserProfile, sync: Option<SyncStatus>) -> Self {
        Self {
            progress: level_progress(profile.total_xp),
            profile,
            sync,
        }
    }
}

impl From<WriteOutcome<UserProfile>> for ProfileResponse {
    fn from(outcome: WriteOutcome<UserProfile>) -> Self {
        Self::new(outcome.value, Some(outcome.sync))
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 80))]
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferences: Option<Preferences>,
}

/// Get a profile. 404 until the profile has been created.
async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ProfileResponse>> {
    let profile = state
        .reconciler
        .fetch_profile(&user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", user_id)))?;

    Ok(Json(ProfileResponse::new(profile, None)))
}

/// Create the profile if needed and apply any changes in the body.
async fn put_profile(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>> {
    request.validate()?;
    let now = Utc::now();

    let outcome = if request.name.is_none() && request.preferences.is_none() {
        state.reconciler.ensure_profile(&user_id, now).await?
    } else {
        let update = ProfileUpdate {
            name: request.name.map(|n| n.trim().to_string()),
            preferences: request.preferences,
        };
        state
            .reconciler
            .update_profile(&user_id, update, now)
            .await?
    };

    Ok(Json(outcome.into()))
}

async fn record_activity(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ProfileResponse>> {
    let outcome = state
        .reconciler
        .record_activity(&user_id, Utc::now())
        .await?;
    Ok(Json(outcome.into()))
}

// ─── Goals ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CreateGoalRequest {
    #[validate(length(min = 1, max = 500))]
    pub description: String,
    #[validate(range(min = 1, max = 10000))]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub xp_value: u64,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[validate(range(min = 1, max = 10))]
    pub motivation: u8,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Conversation the goal came out of
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct GoalResponse {
    pub goal: Goal,
    pub sync: SyncStatus,
}

async fn list_goals(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Goal>>> {
    Ok(Json(state.reconciler.list_goals(&user_id).await?))
}

async fn create_goal(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<CreateGoalRequest>,
) -> Result<Json<GoalResponse>> {
    request.validate()?;

    let new_goal = NewGoal {
        description: request.description,
        xp_value: request.xp_value,
        difficulty: request.difficulty,
        motivation: request.motivation,
        deadline: request.deadline,
        session_id: request.session_id,
    };
    let outcome = state
        .reconciler
        .create_goal(&user_id, new_goal, Utc::now())
        .await?;

    Ok(Json(GoalResponse {
        goal: outcome.value,
        sync: outcome.sync,
    }))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CompleteGoalRequest {
    /// Why the user considers the goal done
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CompleteGoalResponse {
    pub goal: Goal,
    pub profile: UserProfile,
    pub progress: LevelProgress,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub xp_awarded: u64,
    /// False when the goal had already been completed
    pub newly_completed: bool,
    pub sync: SyncStatus,
}

async fn complete_goal(
    State(state): State<Arc<AppState>>,
    Path((user_id, goal_id)): Path<(String, String)>,
    Json(request): Json<CompleteGoalRequest>,
) -> Result<Json<CompleteGoalResponse>> {
    request.validate()?;

    let completion = state
        .reconciler
        .complete_goal(&user_id, &goal_id, request.reasoning, Utc::now())
        .await?;

    Ok(Json(CompleteGoalResponse {
        sync: combined_sync(&completion.goal.sync, &completion.profile.sync),
        progress: level_progress(completion.profile.value.total_xp),
        goal: completion.goal.value,
        profile: completion.profile.value,
        xp_awarded: completion.xp_awarded,
        newly_completed: completion.newly_completed,
    }))
}

// ─── Conversations ───────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CreateConversationRequest {
    #[validate(length(max = 200))]
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UpdateConversationRequest {
    #[validate(length(min = 1, max = 200))]
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[validate(length(min = 1, max = 50))]
    #[serde(default)]
    pub category: Option<String>,
    #[validate(length(min = 1, max = 100))]
    #[serde(default)]
    pub ai_label: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConversationResponse {
    pub conversation: Conversation,
    pub sync: SyncStatus,
}

impl From<WriteOutcome<Conversation>> for ConversationResponse {
    fn from(outcome: WriteOutcome<Conversation>) -> Self {
        Self {
            conversation: outcome.value,
            sync: outcome.sync,
        }
    }
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Conversation>>> {
    Ok(Json(state.reconciler.list_conversations(&user_id).await?))
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<Json<ConversationResponse>> {
    request.validate()?;
    let outcome = state
        .reconciler
        .create_conversation(&user_id, request.title, Utc::now())
        .await?;
    Ok(Json(outcome.into()))
}

async fn update_conversation(
    State(state): State<Arc<AppState>>,
    Path((user_id, conversation_id)): Path<(String, String)>,
    Json(request): Json<UpdateConversationRequest>,
) -> Result<Json<ConversationResponse>> {
    request.validate()?;
    let update = ConversationUpdate {
        title: request.title,
        completed: request.completed,
        category: request.category,
        ai_label: request.ai_label,
    };
    let outcome = state
        .reconciler
        .update_conversation(&user_id, &conversation_id, update)
        .await?;
    Ok(Json(outcome.into()))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path((user_id, conversation_id)): Path<(String, String)>,
) -> Result<Json<ConversationResponse>> {
    let outcome = state
        .reconciler
        .soft_delete_conversation(&user_id, &conversation_id)
        .await?;
    Ok(Json(outcome.into()))
}

// ─── Messages ────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AppendMessageRequest {
    pub role: Role,
    #[validate(length(min = 1, max = 20000))]
    pub content: String,
    #[serde(default)]
    pub is_voice: bool,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct MessageResponse {
    pub conversation: Conversation,
    pub message: Message,
    pub sync: SyncStatus,
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path((user_id, conversation_id)): Path<(String, String)>,
) -> Result<Json<Vec<Message>>> {
    Ok(Json(
        state
            .reconciler
            .list_messages(&user_id, &conversation_id)
            .await?,
    ))
}

async fn append(
    state: &AppState,
    user_id: &str,
    conversation_id: Option<&str>,
    request: AppendMessageRequest,
) -> Result<Json<MessageResponse>> {
    request.validate()?;

    let message = NewMessage {
        role: request.role,
        content: request.content,
        is_voice: request.is_voice,
    };
    let appended = state
        .reconciler
        .append_message(user_id, conversation_id, message, Utc::now())
        .await?;

    Ok(Json(MessageResponse {
        sync: combined_sync(&appended.conversation.sync, &appended.message.sync),
        conversation: appended.conversation.value,
        message: appended.message.value,
    }))
}

async fn append_message(
    State(state): State<Arc<AppState>>,
    Path((user_id, conversation_id)): Path<(String, String)>,
    Json(request): Json<AppendMessageRequest>,
) -> Result<Json<MessageResponse>> {
    append(&state, &user_id, Some(&conversation_id), request).await
}

/// First message of a new conversation.
async fn start_conversation(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<AppendMessageRequest>,
) -> Result<Json<MessageResponse>> {
    append(&state, &user_id, None, request).await
}

// ─── Sync ────────────────────────────────────────────────────

async fn sync(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<SyncReport>> {
    Ok(Json(state.reconciler.sync_pending(&user_id).await?))
}
