//! Entity usage tracking.
//!
//! Records which entities reference which other entities, either through
//! reference fields (`{ "target_type", "target_uuid" }` values) or through
//! embeds in HTML text (`data-entity-type` / `data-entity-uuid`
//! attributes). Saving content enqueues a [`UsageWorkItem`]; the
//! [`UsageWorker`] drains the queue from cron and re-registers the usage
//! of each source entity.
//!
//! Processing is at-least-once. Re-processing an item is harmless because
//! registration replaces every row of the source.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::content_export::ContentStorage;
use crate::cron::Queue;
use crate::models::ContentEntity;

/// Queue name for usage work items.
pub const USAGE_QUEUE: &str = "entity_usage";

/// Opening tags, with quoted attribute values kept intact.
#[allow(clippy::expect_used)]
static EMBED_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<[a-z][a-z0-9-]*(?:[^>"']|"[^"]*"|'[^']*')*>"#)
        .expect("hardcoded regex must compile")
});

#[allow(clippy::expect_used)]
static EMBED_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\sdata-entity-(type|uuid)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("hardcoded regex must compile")
});

/// An entity identified by type and UUID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub uuid: Uuid,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            entity_type: entity_type.into(),
            uuid,
        }
    }
}

impl From<&ContentEntity> for EntityRef {
    fn from(entity: &ContentEntity) -> Self {
        Self::new(entity.entity_type.clone(), entity.uuid)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.uuid)
    }
}

/// How a source uses a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMethod {
    /// A reference field value.
    EntityReference,
    /// An embed inside HTML text.
    Embed,
}

/// One usage row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub source: EntityRef,
    pub target: EntityRef,
    pub method: UsageMethod,
    /// Number of references from source to target by this method.
    pub count: u32,
}

/// Collect the references an entity makes, with occurrence counts.
///
/// Self-references are ignored.
pub fn extract_references(entity: &ContentEntity) -> BTreeMap<(EntityRef, UsageMethod), u32> {
    let mut found = BTreeMap::new();
    for value in entity.fields.values() {
        collect_value(value, &mut found);
    }
    let source = EntityRef::from(entity);
    found.retain(|(target, _), _| *target != source);
    found
}

fn collect_value(value: &Value, found: &mut BTreeMap<(EntityRef, UsageMethod), u32>) {
    match value {
        Value::String(text) => {
            for target in extract_embeds(text) {
                *found.entry((target, UsageMethod::Embed)).or_default() += 1;
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_value(item, found);
            }
        }
        Value::Object(map) => {
            if let (Some(Value::String(target_type)), Some(Value::String(target_uuid))) =
                (map.get("target_type"), map.get("target_uuid"))
                && let Ok(uuid) = Uuid::parse_str(target_uuid)
                && !target_type.is_empty()
            {
                *found
                    .entry((
                        EntityRef::new(target_type.clone(), uuid),
                        UsageMethod::EntityReference,
                    ))
                    .or_default() += 1;
                return;
            }
            for item in map.values() {
                collect_value(item, found);
            }
        }
        _ => {}
    }
}

/// Find embedded entities in HTML.
///
/// A tag counts only when it carries both attributes and the UUID parses.
pub fn extract_embeds(html: &str) -> Vec<EntityRef> {
    let mut embeds = Vec::new();
    for tag in EMBED_TAG.find_iter(html) {
        let mut entity_type = None;
        let mut uuid = None;
        for caps in EMBED_ATTR.captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            match caps[1].to_ascii_lowercase().as_str() {
                "type" => entity_type = Some(value.trim().to_string()),
                _ => uuid = Uuid::parse_str(value.trim()).ok(),
            }
        }
        if let (Some(entity_type), Some(uuid)) = (entity_type, uuid)
            && !entity_type.is_empty()
        {
            embeds.push(EntityRef::new(entity_type, uuid));
        }
    }
    embeds
}

/// Usage registry.
#[derive(Default)]
pub struct EntityUsage {
    by_source: RwLock<BTreeMap<EntityRef, Vec<UsageRecord>>>,
}

impl EntityUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all usage rows of `entity` with what it currently references.
    ///
    /// Returns the number of distinct targets.
    pub fn register_source(&self, entity: &ContentEntity) -> usize {
        let source = EntityRef::from(entity);
        let records: Vec<UsageRecord> = extract_references(entity)
            .into_iter()
            .map(|((target, method), count)| UsageRecord {
                source: source.clone(),
                target,
                method,
                count,
            })
            .collect();

        let mut targets: Vec<&EntityRef> = records.iter().map(|r| &r.target).collect();
        targets.dedup();
        let target_count = targets.len();

        let mut by_source = self.by_source.write();
        if records.is_empty() {
            by_source.remove(&source);
        } else {
            by_source.insert(source, records);
        }
        target_count
    }

    /// Remove every row whose source is `source`. Returns whether any existed.
    pub fn remove_source(&self, source: &EntityRef) -> bool {
        self.by_source.write().remove(source).is_some()
    }

    /// Rows where `source` is the source.
    pub fn list_targets(&self, source: &EntityRef) -> Vec<UsageRecord> {
        self.by_source
            .read()
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Rows where `target` is the target, ordered by source.
    pub fn list_sources(&self, target: &EntityRef) -> Vec<UsageRecord> {
        self.by_source
            .read()
            .values()
            .flatten()
            .filter(|r| r.target == *target)
            .cloned()
            .collect()
    }

    /// Number of sources with at least one row.
    pub fn source_count(&self) -> usize {
        self.by_source.read().len()
    }
}

impl fmt::Debug for EntityUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityUsage")
            .field("sources", &self.source_count())
            .finish()
    }
}

/// Loads source entities for the worker.
#[async_trait]
pub trait EntityLoader: Send + Sync {
    async fn load_entity(&self, entity_type: &str, uuid: Uuid) -> Result<Option<ContentEntity>>;
}

#[async_trait]
impl<T: ContentStorage + ?Sized> EntityLoader for T {
    async fn load_entity(&self, entity_type: &str, uuid: Uuid) -> Result<Option<ContentEntity>> {
        self.load(entity_type, uuid).await
    }
}

/// Loader over a shared, type-erased storage.
pub struct StorageLoader(pub Arc<dyn ContentStorage>);

#[async_trait]
impl EntityLoader for StorageLoader {
    async fn load_entity(&self, entity_type: &str, uuid: Uuid) -> Result<Option<ContentEntity>> {
        self.0.load(entity_type, uuid).await
    }
}

/// What happened to the source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOperation {
    Update,
    Delete,
}

/// A queued request to recompute usage for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageWorkItem {
    pub entity_type: String,
    pub uuid: Uuid,
    pub op: UsageOperation,
}

impl UsageWorkItem {
    pub fn update(entity: &ContentEntity) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            uuid: entity.uuid,
            op: UsageOperation::Update,
        }
    }

    pub fn delete(entity_type: &str, uuid: Uuid) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            uuid,
            op: UsageOperation::Delete,
        }
    }

    fn source(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.uuid)
    }
}

/// Result of processing one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Usage re-registered with this many distinct targets.
    Processed { targets: usize },
    /// Source deleted; its rows were removed.
    Removed,
    /// The item could not be processed and was dropped.
    Skipped,
}

/// Counts from a [`UsageWorker::drain`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub processed: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl DrainSummary {
    pub fn total(&self) -> usize {
        self.processed + self.removed + self.skipped
    }
}

/// Queue worker that keeps [`EntityUsage`] current.
pub struct UsageWorker {
    queue: Arc<dyn Queue>,
    loader: Arc<dyn EntityLoader>,
    usage: Arc<EntityUsage>,
}

impl UsageWorker {
    pub fn new(queue: Arc<dyn Queue>, loader: Arc<dyn EntityLoader>, usage: Arc<EntityUsage>) -> Self {
        Self {
            queue,
            loader,
            usage,
        }
    }

    pub fn usage(&self) -> &Arc<EntityUsage> {
        &self.usage
    }

    /// Push a work item onto the usage queue.
    pub async fn enqueue(&self, item: &UsageWorkItem) -> Result<()> {
        let payload = serde_json::to_string(item).context("failed to serialize work item")?;
        self.queue.push(USAGE_QUEUE, &payload).await
    }

    /// Process a single item.
    ///
    /// Load failures and missing entities return [`ItemOutcome::Skipped`]
    /// so a bad item never stops the batch.
    pub async fn process_item(&self, item: &UsageWorkItem) -> ItemOutcome {
        let source = item.source();

        if item.op == UsageOperation::Delete {
            self.usage.remove_source(&source);
            debug!(source = %source, "removed usage for deleted entity");
            return ItemOutcome::Removed;
        }

        match self.loader.load_entity(&item.entity_type, item.uuid).await {
            Ok(Some(entity)) => {
                let targets = self.usage.register_source(&entity);
                debug!(source = %source, targets, "registered entity usage");
                ItemOutcome::Processed { targets }
            }
            Ok(None) => {
                debug!(source = %source, "usage source no longer exists, skipping");
                ItemOutcome::Skipped
            }
            Err(e) => {
                warn!(source = %source, error = %e, "failed to load usage source, skipping");
                ItemOutcome::Skipped
            }
        }
    }

    /// Process up to `limit` queued items without waiting for new ones.
    pub async fn drain(&self, limit: usize) -> Result<DrainSummary> {
        let mut summary = DrainSummary::default();

        while summary.total() < limit {
            let Some(payload) = self
                .queue
                .pop(USAGE_QUEUE, 0)
                .await
                .context("failed to pop usage item")?
            else {
                break;
            };

            let item: UsageWorkItem = match serde_json::from_str(&payload) {
                Ok(item) => item,
                Err(e) => {
                    warn!(error = %e, "dropping malformed usage item");
                    summary.skipped += 1;
                    continue;
                }
            };

            match self.process_item(&item).await {
                ItemOutcome::Processed { .. } => summary.processed += 1,
                ItemOutcome::Removed => summary.removed += 1,
                ItemOutcome::Skipped => summary.skipped += 1,
            }
        }

        Ok(summary)
    }
}

impl fmt::Debug for UsageWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageWorker")
            .field("usage", &self.usage)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::content_export::MemoryContentStorage;
    use crate::cron::MemoryQueue;

    const IMAGE: &str = "0194a000-0000-7000-8000-000000000001";
    const DOC: &str = "0194a000-0000-7000-8000-000000000002";
    const TERM: &str = "0194a000-0000-7000-8000-000000000003";

    fn uuid(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    fn article_with_refs() -> ContentEntity {
        ContentEntity::new("node", "article", "Refs")
            .with_field(
                "body",
                json!(format!(
                    r#"<p>See <drupal-media data-entity-type="media" data-entity-uuid="{IMAGE}"></drupal-media> and <a data-entity-type='media' data-entity-uuid='{DOC}' href="/doc">doc</a>.</p><img data-entity-type="media" data-entity-uuid="{IMAGE}">"#
                )),
            )
            .with_field(
                "field_tags",
                json!([{ "target_type": "taxonomy_term", "target_uuid": TERM }]),
            )
    }

    struct FailingLoader;

    #[async_trait]
    impl EntityLoader for FailingLoader {
        async fn load_entity(&self, _: &str, _: Uuid) -> Result<Option<ContentEntity>> {
            anyhow::bail!("storage offline")
        }
    }

    fn worker(loader: Arc<dyn EntityLoader>) -> UsageWorker {
        UsageWorker::new(
            Arc::new(MemoryQueue::new()),
            loader,
            Arc::new(EntityUsage::new()),
        )
    }

    #[test]
    fn extracts_embeds_in_any_quoting() {
        let embeds = extract_embeds(&format!(
            r#"<x data-entity-uuid={IMAGE} data-entity-type=media><y DATA-ENTITY-TYPE="file" data-entity-uuid="{DOC}">"#
        ));
        assert_eq!(
            embeds,
            vec![
                EntityRef::new("media", uuid(IMAGE)),
                EntityRef::new("file", uuid(DOC)),
            ]
        );
    }

    #[test]
    fn embed_requires_both_attributes_and_valid_uuid() {
        assert!(extract_embeds(r#"<img data-entity-type="media">"#).is_empty());
        assert!(extract_embeds(r#"<img data-entity-type="media" data-entity-uuid="nope">"#).is_empty());
        assert!(extract_embeds("<p>plain</p>").is_empty());
    }

    #[test]
    fn references_are_counted_per_method() {
        let refs = extract_references(&article_with_refs());
        assert_eq!(
            refs.get(&(EntityRef::new("media", uuid(IMAGE)), UsageMethod::Embed)),
            Some(&2)
        );
        assert_eq!(
            refs.get(&(EntityRef::new("media", uuid(DOC)), UsageMethod::Embed)),
            Some(&1)
        );
        assert_eq!(
            refs.get(&(
                EntityRef::new("taxonomy_term", uuid(TERM)),
                UsageMethod::EntityReference
            )),
            Some(&1)
        );
    }

    #[test]
    fn self_reference_is_ignored() {
        let mut entity = ContentEntity::new("node", "page", "Self");
        let own = entity.uuid.to_string();
        entity = entity.with_field("related", json!({ "target_type": "node", "target_uuid": own }));
        assert!(extract_references(&entity).is_empty());
    }

    #[test]
    fn register_source_replaces_rows() {
        let usage = EntityUsage::new();
        let mut entity = article_with_refs();
        assert_eq!(usage.register_source(&entity), 3);

        let image = EntityRef::new("media", uuid(IMAGE));
        assert_eq!(usage.list_sources(&image).len(), 1);

        entity.fields.remove("body");
        assert_eq!(usage.register_source(&entity), 1);
        assert!(usage.list_sources(&image).is_empty());
        assert_eq!(usage.list_targets(&EntityRef::from(&entity)).len(), 1);

        entity.fields.clear();
        assert_eq!(usage.register_source(&entity), 0);
        assert_eq!(usage.source_count(), 0);
    }

    #[tokio::test]
    async fn missing_entity_is_skipped() {
        let worker = worker(Arc::new(MemoryContentStorage::new()));
        let outcome = worker
            .process_item(&UsageWorkItem::update(&article_with_refs()))
            .await;
        assert_eq!(outcome, ItemOutcome::Skipped);
    }

    #[tokio::test]
    async fn load_failure_is_skipped_not_raised() {
        let worker = worker(Arc::new(FailingLoader));
        let outcome = worker
            .process_item(&UsageWorkItem::update(&article_with_refs()))
            .await;
        assert_eq!(outcome, ItemOutcome::Skipped);
        assert_eq!(worker.usage().source_count(), 0);
    }

    #[tokio::test]
    async fn drain_processes_queue_and_continues_past_failures() {
        let storage = Arc::new(MemoryContentStorage::new());
        let entity = article_with_refs();
        storage.save(&entity).await.unwrap();

        let queue = Arc::new(MemoryQueue::new());
        let worker = UsageWorker::new(queue.clone(), storage, Arc::new(EntityUsage::new()));

        worker
            .enqueue(&UsageWorkItem::delete("node", Uuid::now_v7()))
            .await
            .unwrap();
        queue.push(USAGE_QUEUE, "not json").await.unwrap();
        worker
            .enqueue(&UsageWorkItem::update(&ContentEntity::new("node", "page", "Gone")))
            .await
            .unwrap();
        worker.enqueue(&UsageWorkItem::update(&entity)).await.unwrap();

        let summary = worker.drain(10).await.unwrap();
        assert_eq!(
            summary,
            DrainSummary {
                processed: 1,
                removed: 1,
                skipped: 2
            }
        );
        assert_eq!(
            worker.usage().list_targets(&EntityRef::from(&entity)).len(),
            3
        );
        assert!(queue.is_empty(USAGE_QUEUE).await.unwrap());
    }

    #[tokio::test]
    async fn drain_respects_limit() {
        let queue = Arc::new(MemoryQueue::new());
        let worker = UsageWorker::new(
            queue.clone(),
            Arc::new(MemoryContentStorage::new()),
            Arc::new(EntityUsage::new()),
        );
        for _ in 0..5 {
            worker
                .enqueue(&UsageWorkItem::delete("node", Uuid::now_v7()))
                .await
                .unwrap();
        }
        assert_eq!(worker.drain(3).await.unwrap().total(), 3);
        assert_eq!(queue.len(USAGE_QUEUE).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_removes_rows() {
        let storage = Arc::new(MemoryContentStorage::new());
        let entity = article_with_refs();
        storage.save(&entity).await.unwrap();
        let worker = worker(storage);

        worker.process_item(&UsageWorkItem::update(&entity)).await;
        let outcome = worker
            .process_item(&UsageWorkItem::delete(&entity.entity_type, entity.uuid))
            .await;
        assert_eq!(outcome, ItemOutcome::Removed);
        assert_eq!(worker.usage().source_count(), 0);
    }
}
