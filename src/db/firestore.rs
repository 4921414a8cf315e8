// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Remote gateway over Firestore.
//!
//! Document layout:
//! - `users/{user_id}` (profile)
//! - `users/{user_id}/goals/{goal_id}`
//! - `users/{user_id}/conversations/{conversation_id}`
//! - `users/{user_id}/conversations/{conversation_id}/messages/{message_id}`
//! - `leaderboard/{user_id}` (aggregates maintained server-side)
//!
//! Every failure is classified into a [`GatewayError`]; nothing here retries.

use async_trait::async_trait;
use firestore::errors::FirestoreError;
use serde::Deserialize;

use crate::db::collections;
use crate::db::store::{canonical_id, is_local_id, Entity, EntityKind, EntityStore, Scope};
use crate::error::GatewayError;
use crate::models::{LeaderboardRow, SortDimension};
use crate::services::leaderboard::LeaderboardSource;

/// Firestore-backed remote gateway.
#[derive(Clone)]
pub struct FirestoreGateway {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreGateway {
    /// Connect to Firestore.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, GatewayError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| {
                GatewayError::Unavailable(format!("Failed to connect to Firestore: {}", e))
            })?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, GatewayError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            GatewayError::Unavailable(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Gateway with no connection. Every call answers `Unavailable`.
    pub fn new_offline() -> Self {
        Self { client: None }
    }

    pub fn is_online(&self) -> bool {
        self.client.is_some()
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, GatewayError> {
        self.client
            .as_ref()
            .ok_or_else(|| GatewayError::Unavailable("Remote store not connected".to_string()))
    }

    /// Parent document path for entities of `kind` in `scope`.
    fn parent_for(&self, kind: EntityKind, scope: &Scope) -> Result<String, GatewayError> {
        let client = self.get_client()?;
        let path = match kind {
            EntityKind::Profile => return Ok(client.get_documents_path().clone()),
            EntityKind::Goal | EntityKind::Conversation => client
                .parent_path(collections::USERS, &scope.user_id)
                .map_err(classify)?,
            EntityKind::Message => {
                let conversation_id = scope.conversation_id.as_deref().ok_or_else(|| {
                    GatewayError::InvalidInput("Message scope without conversation".to_string())
                })?;
                client
                    .parent_path(collections::USERS, &scope.user_id)
                    .and_then(|p| p.at(collections::CONVERSATIONS, conversation_id))
                    .map_err(classify)?
            }
        };
        Ok(path.into())
    }
}

/// Map a Firestore error onto the gateway taxonomy.
fn classify(err: FirestoreError) -> GatewayError {
    let message = err.to_string();
    match err {
        FirestoreError::NetworkError(_) => GatewayError::Unavailable(message),
        FirestoreError::DatabaseError(ref db_err) if db_err.retry_possible => {
            GatewayError::Unavailable(message)
        }
        FirestoreError::DataNotFoundError(_) => GatewayError::NotFound(message),
        FirestoreError::DataConflictError(_) => GatewayError::Conflict(message),
        FirestoreError::InvalidParametersError(_)
        | FirestoreError::SerializeError(_)
        | FirestoreError::DeserializeError(_) => GatewayError::InvalidInput(message),
        _ => GatewayError::Unknown(message),
    }
}

#[async_trait]
impl EntityStore for FirestoreGateway {
    type Error = GatewayError;

    async fn list<T: Entity>(&self, scope: &Scope) -> Result<Vec<T>, GatewayError> {
        // The profile is a single document, not a collection.
        if T::KIND == EntityKind::Profile {
            return Ok(self
                .find::<T>(scope, &scope.user_id)
                .await?
                .into_iter()
                .collect());
        }

        let parent = self.parent_for(T::KIND, scope)?;
        let entities: Vec<T> = self
            .get_client()?
            .fluent()
            .select()
            .from(T::KIND.collection())
            .parent(&parent)
            .obj()
            .query()
            .await
            .map_err(classify)?;

        Ok(entities.into_iter().map(Entity::normalize).collect())
    }

    async fn find<T: Entity>(&self, scope: &Scope, id: &str) -> Result<Option<T>, GatewayError> {
        let parent = self.parent_for(T::KIND, scope)?;
        let entity: Option<T> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(T::KIND.collection())
            .parent(&parent)
            .obj()
            .one(id)
            .await
            .map_err(classify)?;

        Ok(entity.map(Entity::normalize))
    }

    /// Insert a new document under the canonical form of the entity's id.
    async fn create<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<T, GatewayError> {
        let parent = self.parent_for(T::KIND, scope)?;
        let entity = entity.clone().with_id(canonical_id(entity.id()).to_string());

        let stored: T = self
            .get_client()?
            .fluent()
            .insert()
            .into(T::KIND.collection())
            .document_id(entity.id())
            .parent(&parent)
            .object(&entity)
            .execute()
            .await
            .map_err(classify)?;

        tracing::debug!(
            kind = T::KIND.as_str(),
            user_id = %scope.user_id,
            id = stored.id(),
            "Remote document created"
        );
        Ok(stored.normalize())
    }

    async fn upsert<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<T, GatewayError> {
        if is_local_id(entity.id()) {
            return Err(GatewayError::InvalidInput(format!(
                "Cannot update {} with temporary id {}",
                T::KIND.as_str(),
                entity.id()
            )));
        }

        let parent = self.parent_for(T::KIND, scope)?;
        let stored: T = self
            .get_client()?
            .fluent()
            .update()
            .in_col(T::KIND.collection())
            .document_id(entity.id())
            .parent(&parent)
            .object(entity)
            .execute()
            .await
            .map_err(classify)?;

        Ok(stored.normalize())
    }

    async fn remove<T: Entity>(&self, scope: &Scope, id: &str) -> Result<(), GatewayError> {
        let parent = self.parent_for(T::KIND, scope)?;
        self.get_client()?
            .fluent()
            .delete()
            .from(T::KIND.collection())
            .document_id(id)
            .parent(&parent)
            .execute()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Result row of the leaderboard count aggregation.
#[derive(Debug, Deserialize)]
struct PopulationCount {
    count: usize,
}

#[async_trait]
impl LeaderboardSource for FirestoreGateway {
    async fn leaderboard_rows(
        &self,
        dimension: SortDimension,
        limit: Option<usize>,
    ) -> Result<Vec<LeaderboardRow>, GatewayError> {
        let query = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::LEADERBOARD)
            .order_by([(
                dimension.primary_field(),
                firestore::FirestoreQueryDirection::Descending,
            )]);

        let query = match limit {
            Some(limit) => query.limit(u32::try_from(limit).unwrap_or(u32::MAX)),
            None => query,
        };

        query.obj().query().await.map_err(classify)
    }

    async fn population_size(&self) -> Result<usize, GatewayError> {
        let counts: Vec<PopulationCount> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::LEADERBOARD)
            .aggregate(|a| a.fields([a.field("count").count()]))
            .obj()
            .query()
            .await
            .map_err(classify)?;
        Ok(counts.first().map_or(0, |c| c.count))
    }
}
