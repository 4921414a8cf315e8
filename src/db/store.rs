// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The entity store capability shared by the local cache and the remote
//! gateway.
//!
//! Both stores hold the same four entity kinds, addressed by a [`Scope`]
//! (owning user, plus the conversation for messages) and the entity id. The
//! reconciler is written once against this trait and never branches on the
//! concrete store.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::db::collections;
use crate::models::{Conversation, Goal, Message, UserProfile};

/// Prefix for ids minted locally before the remote store has seen the entity.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Mint a temporary id for an entity created locally.
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4())
}

/// Whether an id is still a temporary local id.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// The id a remote store gives an entity created under `id`.
///
/// Deterministic, so a create that is retried after a lost response collides
/// with the first one instead of duplicating it.
pub fn canonical_id(id: &str) -> &str {
    id.strip_prefix(LOCAL_ID_PREFIX).unwrap_or(id)
}

/// The entity kinds the stores know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Profile,
    Goal,
    Conversation,
    Message,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Profile => "profile",
            EntityKind::Goal => "goal",
            EntityKind::Conversation => "conversation",
            EntityKind::Message => "message",
        }
    }

    /// Remote collection name.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Profile => collections::USERS,
            EntityKind::Goal => collections::GOALS,
            EntityKind::Conversation => collections::CONVERSATIONS,
            EntityKind::Message => collections::MESSAGES,
        }
    }

    /// Local cache key holding every entity of this kind for `scope`.
    ///
    /// `profile/{user}`, `goals/{user}`, `conversations/{user}`,
    /// `messages/{user}/{conversation}`. Each id is percent-encoded, so a `/`
    /// inside one cannot shift it into the next segment.
    pub fn cache_key(self, scope: &Scope) -> String {
        let user = urlencoding::encode(&scope.user_id);
        match self {
            EntityKind::Profile => format!("profile/{}", user),
            EntityKind::Goal => format!("goals/{}", user),
            EntityKind::Conversation => format!("conversations/{}", user),
            EntityKind::Message => format!(
                "messages/{}/{}",
                user,
                urlencoding::encode(scope.conversation_id.as_deref().unwrap_or_default())
            ),
        }
    }
}

/// Where an entity lives: the owning user, and for messages the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub user_id: String,
    pub conversation_id: Option<String>,
}

impl Scope {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: None,
        }
    }

    pub fn conversation(user_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: Some(conversation_id.into()),
        }
    }
}

/// A domain entity that can be stored in an [`EntityStore`].
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    /// Same entity under a new id (server id assignment).
    fn with_id(self, id: String) -> Self;

    /// Repair derived fields on values read back from a store.
    fn normalize(self) -> Self {
        self
    }

    /// Hidden entities stay stored but are left out of list reads.
    fn is_hidden(&self) -> bool {
        false
    }
}

impl Entity for UserProfile {
    const KIND: EntityKind = EntityKind::Profile;

    fn id(&self) -> &str {
        &self.id
    }

    fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    fn normalize(self) -> Self {
        self.normalized()
    }
}

impl Entity for Goal {
    const KIND: EntityKind = EntityKind::Goal;

    fn id(&self) -> &str {
        &self.id
    }

    fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }
}

impl Entity for Conversation {
    const KIND: EntityKind = EntityKind::Conversation;

    fn id(&self) -> &str {
        &self.id
    }

    fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    fn is_hidden(&self) -> bool {
        self.soft_deleted
    }
}

impl Entity for Message {
    const KIND: EntityKind = EntityKind::Message;

    fn id(&self) -> &str {
        &self.id
    }

    fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }
}

/// Typed storage for domain entities.
///
/// `create` has insert semantics: a store that already holds an entity with
/// the same id may answer with a conflict. A store that assigns ids maps a
/// temporary id through [`canonical_id`]. `create` and `upsert` return the
/// entity as stored, which can carry the canonical id.
#[async_trait]
pub trait EntityStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Every entity of kind `T` in `scope`, hidden ones included.
    async fn list<T: Entity>(&self, scope: &Scope) -> Result<Vec<T>, Self::Error>;

    async fn find<T: Entity>(&self, scope: &Scope, id: &str) -> Result<Option<T>, Self::Error>;

    async fn create<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<T, Self::Error>;

    async fn upsert<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<T, Self::Error>;

    async fn remove<T: Entity>(&self, scope: &Scope, id: &str) -> Result<(), Self::Error>;
}
