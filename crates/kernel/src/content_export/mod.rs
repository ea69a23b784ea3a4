//! Content storage abstraction and JSON export/import.
//!
//! Export/import only talks to a [`ContentStorage`]; the host CMS entity
//! system sits behind it. [`MemoryContentStorage`] backs the service and
//! the tests.

pub mod json;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

pub use json::{SyncReport, export_content, import_content};

use crate::models::ContentEntity;

/// Storage for content entities.
#[async_trait]
pub trait ContentStorage: Send + Sync {
    /// Entity types that currently have at least one entity.
    async fn entity_types(&self) -> Result<Vec<String>>;

    /// List all entities of a type, ordered by UUID.
    async fn list(&self, entity_type: &str) -> Result<Vec<ContentEntity>>;

    /// Load a single entity.
    async fn load(&self, entity_type: &str, uuid: Uuid) -> Result<Option<ContentEntity>>;

    /// Insert or replace an entity.
    async fn save(&self, entity: &ContentEntity) -> Result<()>;

    /// Delete an entity. Returns whether it existed.
    async fn delete(&self, entity_type: &str, uuid: Uuid) -> Result<bool>;
}

/// In-process content storage.
#[derive(Default)]
pub struct MemoryContentStorage {
    entities: RwLock<BTreeMap<(String, Uuid), ContentEntity>>,
}

impl MemoryContentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}

#[async_trait]
impl ContentStorage for MemoryContentStorage {
    async fn entity_types(&self) -> Result<Vec<String>> {
        let mut types: Vec<String> = self
            .entities
            .read()
            .keys()
            .map(|(entity_type, _)| entity_type.clone())
            .collect();
        types.dedup();
        Ok(types)
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<ContentEntity>> {
        Ok(self
            .entities
            .read()
            .iter()
            .filter(|((t, _), _)| t == entity_type)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn load(&self, entity_type: &str, uuid: Uuid) -> Result<Option<ContentEntity>> {
        Ok(self
            .entities
            .read()
            .get(&(entity_type.to_string(), uuid))
            .cloned())
    }

    async fn save(&self, entity: &ContentEntity) -> Result<()> {
        self.entities.write().insert(
            (entity.entity_type.clone(), entity.uuid),
            entity.clone(),
        );
        Ok(())
    }

    async fn delete(&self, entity_type: &str, uuid: Uuid) -> Result<bool> {
        Ok(self
            .entities
            .write()
            .remove(&(entity_type.to_string(), uuid))
            .is_some())
    }
}

impl std::fmt::Debug for MemoryContentStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContentStorage")
            .field("entities", &self.len())
            .finish()
    }
}
