// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Disk-backed local cache.
//!
//! One JSON document per key, stored as `<dir>/<percent-encoded key>.json`.
//! Values survive process restarts and need no network. Writes go through a
//! temporary file that is renamed over the target, so a crash mid-write leaves
//! either the old value or the new one.
//!
//! A value that fails to decode is logged and treated as absent. The only
//! error callers ever see is [`CacheError::Durability`].

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::db::store::{Entity, EntityStore, Scope};
use crate::error::CacheError;

/// Local key-value cache of domain entities.
#[derive(Debug, Clone)]
pub struct LocalCache {
    dir: PathBuf,
}

impl LocalCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| CacheError::Durability {
            key: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(dir = %dir.display(), "Local cache opened");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }

    /// Read and decode the value at `key`.
    ///
    /// Distinguishes a miss (`Ok(None)`) from a corrupt value.
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let bytes = match fs::read(self.path_for(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Corruption {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Corruption {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    /// Read the value at `key`; missing and corrupt values are both absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Unreadable cache value treated as a miss");
                None
            }
        }
    }

    /// Store `value` at `key`, replacing any previous value.
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let durability = |reason: String| CacheError::Durability {
            key: key.to_string(),
            reason,
        };

        let bytes = serde_json::to_vec(value).map_err(|e| durability(e.to_string()))?;

        let target = self.path_for(key);
        // Unique temp name so two writers never share a partial file.
        let temp = target.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

        fs::write(&temp, &bytes).map_err(|e| durability(e.to_string()))?;
        if let Err(e) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(durability(e.to_string()));
        }

        tracing::trace!(key, bytes = bytes.len(), "Cache value written");
        Ok(())
    }

    /// Remove the value at `key`. Removing a missing key is not an error.
    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Durability {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Move the value at `from` to `to`, replacing whatever `to` held.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), CacheError> {
        match fs::rename(self.path_for(from), self.path_for(to)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Durability {
                key: to.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn read_list<T: Entity>(&self, scope: &Scope) -> Vec<T> {
        let key = T::KIND.cache_key(scope);
        self.get::<Vec<T>>(&key)
            .unwrap_or_default()
            .into_iter()
            .map(Entity::normalize)
            .collect()
    }

    fn write_list<T: Entity>(&self, scope: &Scope, entities: &[T]) -> Result<(), CacheError> {
        self.put(&T::KIND.cache_key(scope), entities)
    }

    /// Replace every cached entity of kind `T` in `scope`.
    pub fn replace_all<T: Entity>(&self, scope: &Scope, entities: &[T]) -> Result<(), CacheError> {
        self.write_list(scope, entities)
    }

    fn store_one<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<T, CacheError> {
        let mut entities: Vec<T> = self.read_list(scope);
        match entities.iter_mut().find(|e| e.id() == entity.id()) {
            Some(existing) => *existing = entity.clone(),
            None => entities.push(entity.clone()),
        }
        self.write_list(scope, &entities)?;
        Ok(entity.clone())
    }
}

#[async_trait]
impl EntityStore for LocalCache {
    type Error = CacheError;

    async fn list<T: Entity>(&self, scope: &Scope) -> Result<Vec<T>, CacheError> {
        Ok(self.read_list(scope))
    }

    async fn find<T: Entity>(&self, scope: &Scope, id: &str) -> Result<Option<T>, CacheError> {
        Ok(self
            .read_list::<T>(scope)
            .into_iter()
            .find(|e| e.id() == id))
    }

    /// Local creates never conflict; re-creating an id overwrites it.
    async fn create<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<T, CacheError> {
        self.store_one(scope, entity)
    }

    async fn upsert<T: Entity>(&self, scope: &Scope, entity: &T) -> Result<T, CacheError> {
        self.store_one(scope, entity)
    }

    async fn remove<T: Entity>(&self, scope: &Scope, id: &str) -> Result<(), CacheError> {
        let mut entities: Vec<T> = self.read_list(scope);
        let before = entities.len();
        entities.retain(|e| e.id() != id);
        if entities.len() != before {
            self.write_list(scope, &entities)?;
        }
        Ok(())
    }
}
