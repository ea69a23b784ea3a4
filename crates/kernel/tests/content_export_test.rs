#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Content export/import through the public library API.

use std::sync::Arc;

use serde_json::json;

use marginalia_kernel::content_export::{
    ContentStorage, MemoryContentStorage, export_content, import_content,
};
use marginalia_kernel::cron::MemoryQueue;
use marginalia_kernel::models::ContentEntity;
use marginalia_kernel::services::entity_usage::{
    EntityRef, EntityUsage, UsageWorkItem, UsageWorker,
};
use marginalia_test_utils::TestDir;

#[tokio::test]
async fn imported_content_feeds_usage_tracking() {
    let dir = TestDir::new("import_usage");
    let media = ContentEntity::new("media", "image", "Photo");
    let article = ContentEntity::new("node", "article", "Story").with_field(
        "field_image",
        json!({ "target_type": "media", "target_uuid": media.uuid.to_string() }),
    );

    let source = MemoryContentStorage::new();
    source.save(&media).await.unwrap();
    source.save(&article).await.unwrap();
    export_content(&source, &dir, false).await.unwrap();

    let target = Arc::new(MemoryContentStorage::new());
    let report = import_content(target.as_ref(), &dir, false).await.unwrap();
    assert_eq!(report.total(), 2);

    let worker = UsageWorker::new(
        Arc::new(MemoryQueue::new()),
        target.clone(),
        Arc::new(EntityUsage::new()),
    );
    for entity in target.list("node").await.unwrap() {
        worker.enqueue(&UsageWorkItem::update(&entity)).await.unwrap();
    }
    worker.drain(10).await.unwrap();

    let sources = worker.usage().list_sources(&EntityRef::from(&media));
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].source, EntityRef::from(&article));
}

#[tokio::test]
async fn reimport_is_idempotent() {
    let dir = TestDir::new("reimport");
    let source = MemoryContentStorage::new();
    source
        .save(&ContentEntity::new("node", "page", "About"))
        .await
        .unwrap();
    export_content(&source, &dir, false).await.unwrap();

    let target = MemoryContentStorage::new();
    import_content(&target, &dir, false).await.unwrap();
    import_content(&target, &dir, false).await.unwrap();
    assert_eq!(target.len(), 1);
}
