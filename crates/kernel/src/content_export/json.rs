//! JSON content export/import.
//!
//! Every entity is written to its own file, `{dir}/{entity_type}/{uuid}.json`,
//! as the entity's JSON plus a `_meta` block. `_meta.exported_at` records
//! when the file was written and is ignored when deciding whether an
//! existing file is up to date, so re-exporting unchanged content leaves
//! the tree untouched.
//!
//! Import is idempotent: `ContentStorage::save()` performs upsert, so
//! re-running import after an interruption converges to the same state.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::ContentStorage;
use crate::models::ContentEntity;

/// Export format version written to `_meta.version`.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Key of the metadata block in each exported file.
const META_KEY: &str = "_meta";

/// Metadata field excluded from change detection.
const EXPORTED_AT_KEY: &str = "exported_at";

/// Maximum content file size (10 MB). Larger files are skipped on import.
const MAX_CONTENT_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Characters that are invalid in filenames on Windows/NTFS.
const WINDOWS_INVALID_CHARS: &[char] = &[':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExportMeta {
    version: u32,
    exported_at: String,
}

/// On-disk representation of one entity.
#[derive(Debug, Serialize, Deserialize)]
struct ExportDocument {
    #[serde(rename = "_meta")]
    meta: ExportMeta,
    #[serde(flatten)]
    entity: ContentEntity,
}

/// Result summary for content export/import operations.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    /// Files written (export) or entities saved (import), per entity type.
    pub counts: BTreeMap<String, usize>,
    /// Export: files left untouched because their content was current.
    pub unchanged: usize,
    /// Export: stale files removed by `clean`.
    pub removed: usize,
    pub warnings: Vec<String>,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Validate that an entity type is usable as a directory name.
///
/// Rejects path separators, parent-directory references, null bytes,
/// characters invalid on Windows and leading/trailing dots or whitespace.
fn validate_path_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        anyhow::bail!("path segment is empty");
    }
    if segment.contains('/') || segment.contains('\\') || segment.contains('\0') {
        anyhow::bail!("path segment contains path separator or null byte: {segment}");
    }
    if segment.contains("..") {
        anyhow::bail!("path segment contains '..': {segment}");
    }
    if let Some(c) = segment.chars().find(|c| WINDOWS_INVALID_CHARS.contains(c)) {
        anyhow::bail!("path segment contains character '{c}' invalid on Windows: {segment}");
    }
    if segment.starts_with('.') || segment.ends_with('.') {
        anyhow::bail!("path segment must not start or end with '.': {segment}");
    }
    if segment != segment.trim() {
        anyhow::bail!("path segment has leading/trailing whitespace: {segment}");
    }
    Ok(())
}

/// Generate the filename for an entity.
fn entity_filename(uuid: Uuid) -> String {
    format!("{uuid}.json")
}

/// Parse the UUID out of a content filename.
fn parse_content_filename(filename: &str) -> Option<Uuid> {
    let stem = filename.strip_suffix(".json")?;
    Uuid::parse_str(stem).ok()
}

/// Drop `_meta.exported_at` so two exports of the same entity compare equal.
fn without_export_timestamp(mut value: Value) -> Value {
    if let Some(meta) = value.get_mut(META_KEY).and_then(Value::as_object_mut) {
        meta.remove(EXPORTED_AT_KEY);
    }
    value
}

/// Whether the file at `path` already holds `fresh`, timestamps aside.
async fn is_current(path: &Path, fresh: &Value) -> bool {
    let Ok(existing) = tokio::fs::read_to_string(path).await else {
        return false;
    };
    let Ok(existing) = serde_json::from_str::<Value>(&existing) else {
        return false;
    };
    without_export_timestamp(existing) == without_export_timestamp(fresh.clone())
}

/// Serialize an entity to its export document.
fn export_document(entity: &ContentEntity, exported_at: &str) -> Result<Value> {
    let document = ExportDocument {
        meta: ExportMeta {
            version: EXPORT_FORMAT_VERSION,
            exported_at: exported_at.to_string(),
        },
        entity: entity.clone(),
    };
    serde_json::to_value(&document).context("failed to serialize entity")
}

/// Remove content files of one type directory that were not written in
/// this export.
///
/// Only `{uuid}.json` files are touched; anything else in the directory is
/// left alone. Deletion failures are warnings since the export itself has
/// already succeeded.
async fn clean_stale_files(
    dir: &Path,
    keep: &HashSet<String>,
    report: &mut SyncReport,
) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if parse_content_filename(name).is_none() || keep.contains(name) {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => report.removed += 1,
            Err(e) => report
                .warnings
                .push(format!("failed to remove stale file {}: {e}", path.display())),
        }
    }
    Ok(())
}

/// Export all content entities to JSON files under `dir`.
///
/// Files whose content is unchanged (ignoring the export timestamp) are not
/// rewritten. When `clean` is true, content files of exported types that
/// no longer correspond to an entity are removed after writing.
pub async fn export_content(
    storage: &dyn ContentStorage,
    dir: &Path,
    clean: bool,
) -> Result<SyncReport> {
    info!(dir = %dir.display(), clean, "Starting content export");

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let exported_at = chrono::Utc::now().to_rfc3339();
    let mut report = SyncReport::default();

    for entity_type in storage
        .entity_types()
        .await
        .context("failed to list entity types")?
    {
        if let Err(e) = validate_path_segment(&entity_type) {
            report
                .warnings
                .push(format!("skipping entity type with unsafe name: {e}"));
            continue;
        }

        let type_dir = dir.join(&entity_type);
        tokio::fs::create_dir_all(&type_dir)
            .await
            .with_context(|| format!("failed to create directory {}", type_dir.display()))?;

        let entities = storage
            .list(&entity_type)
            .await
            .with_context(|| format!("failed to list {entity_type} entities"))?;

        let mut written = 0usize;
        let mut current_files: HashSet<String> = HashSet::new();

        for entity in entities {
            let filename = entity_filename(entity.uuid);
            let path = type_dir.join(&filename);

            let document = match export_document(&entity, &exported_at) {
                Ok(d) => d,
                Err(e) => {
                    report
                        .warnings
                        .push(format!("{entity_type}/{filename}: {e:#}"));
                    continue;
                }
            };
            current_files.insert(filename.clone());

            if is_current(&path, &document).await {
                report.unchanged += 1;
                continue;
            }

            let mut json = match serde_json::to_string_pretty(&document) {
                Ok(json) => json,
                Err(e) => {
                    report
                        .warnings
                        .push(format!("failed to serialize {entity_type}/{filename}: {e}"));
                    continue;
                }
            };
            json.push('\n');

            match tokio::fs::write(&path, json).await {
                Ok(()) => written += 1,
                Err(e) => report
                    .warnings
                    .push(format!("failed to write {}: {e}", path.display())),
            }
        }

        if written > 0 {
            debug!(entity_type, count = written, "Exported entity type");
            report.counts.insert(entity_type.clone(), written);
        }

        if clean
            && let Err(e) = clean_stale_files(&type_dir, &current_files, &mut report).await
        {
            report
                .warnings
                .push(format!("failed to clean stale files: {e}"));
        }
    }

    info!(
        written = report.total(),
        unchanged = report.unchanged,
        removed = report.removed,
        "Content export complete"
    );

    Ok(report)
}

/// A parsed entity with the file it came from.
struct ParsedEntity {
    filename: String,
    entity: ContentEntity,
}

/// Import content entities from the per-type directories under `dir`.
///
/// 1. **Validation pass**: reads and parses every file, recording problems
///    as warnings.
/// 2. **Save pass**: upserts the parsed entities, type by type.
///
/// When `dry_run` is true only the validation pass runs.
pub async fn import_content(
    storage: &dyn ContentStorage,
    dir: &Path,
    dry_run: bool,
) -> Result<SyncReport> {
    info!(dir = %dir.display(), dry_run, "Starting content import");

    let mut report = SyncReport::default();
    let parsed = read_and_validate_dir(dir, &mut report.warnings).await?;

    if dry_run {
        for (entity_type, entities) in &parsed {
            if !entities.is_empty() {
                report.counts.insert(entity_type.clone(), entities.len());
            }
        }
        return Ok(report);
    }

    for (entity_type, entities) in &parsed {
        let mut count = 0usize;
        for pe in entities {
            if let Err(e) = storage.save(&pe.entity).await {
                report
                    .warnings
                    .push(format!("failed to save {entity_type}/{}: {e}", pe.filename));
                continue;
            }
            count += 1;
        }
        if count > 0 {
            debug!(entity_type, count, "Imported entity type");
            report.counts.insert(entity_type.clone(), count);
        }
    }

    info!(total = report.total(), "Content import complete");

    Ok(report)
}

/// Read every per-type directory under `dir`.
///
/// Returns entities grouped by type (directory name), sorted by filename.
/// Entries that are not plain directories are ignored.
async fn read_and_validate_dir(
    dir: &Path,
    warnings: &mut Vec<String>,
) -> Result<BTreeMap<String, Vec<ParsedEntity>>> {
    let mut grouped = BTreeMap::new();

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(entity_type) = path.file_name().and_then(|n| n.to_str()) else {
            warnings.push(format!(
                "skipping directory with non-UTF-8 name: {}",
                path.display()
            ));
            continue;
        };
        if entity_type.starts_with('.') {
            continue;
        }
        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                warnings.push(format!("failed to read metadata for {entity_type}: {e}"));
                continue;
            }
        };
        if !metadata.is_dir() {
            continue;
        }
        if let Err(e) = validate_path_segment(entity_type) {
            warnings.push(format!("skipping directory: {e}"));
            continue;
        }

        let entities = read_and_validate_files(&path, entity_type, warnings).await?;
        if !entities.is_empty() {
            grouped.insert(entity_type.to_string(), entities);
        }
    }

    Ok(grouped)
}

/// Read all content files of one entity type directory.
///
/// Parse errors, filename/content UUID mismatches and directory/type
/// mismatches are warnings, not failures. Duplicate UUIDs are skipped.
async fn read_and_validate_files(
    dir: &Path,
    entity_type: &str,
    warnings: &mut Vec<String>,
) -> Result<Vec<ParsedEntity>> {
    let mut parsed = Vec::new();

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        let filename = match path.file_name().map(|n| n.to_str()) {
            Some(Some(n)) if !n.starts_with('.') && n.ends_with(".json") => n.to_string(),
            Some(Some(_)) => continue, // non-matching filename, silently skip
            Some(None) => {
                warnings.push(format!(
                    "skipping file with non-UTF-8 name: {}",
                    path.display()
                ));
                continue;
            }
            None => continue,
        };
        let label = format!("{entity_type}/{filename}");

        // Skip symlinks to prevent reading files outside the content directory
        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                warnings.push(format!("failed to read metadata for {label}: {e}"));
                continue;
            }
        };
        if metadata.file_type().is_symlink() {
            warnings.push(format!("skipping symlink: {label}"));
            continue;
        }
        if metadata.len() > MAX_CONTENT_FILE_SIZE {
            warnings.push(format!(
                "skipping {label}: file size {} bytes exceeds limit of {} bytes",
                metadata.len(),
                MAX_CONTENT_FILE_SIZE
            ));
            continue;
        }

        let Some(filename_uuid) = parse_content_filename(&filename) else {
            warnings.push(format!("skipping {label}: filename is not a UUID"));
            continue;
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                warnings.push(format!("failed to read {}: {e}", path.display()));
                continue;
            }
        };

        let document: ExportDocument = match serde_json::from_str(&content) {
            Ok(d) => d,
            Err(e) => {
                warnings.push(format!("failed to parse {label}: {e}"));
                continue;
            }
        };
        if document.meta.version > EXPORT_FORMAT_VERSION {
            warnings.push(format!(
                "{label}: export format version {} is newer than supported version {}",
                document.meta.version, EXPORT_FORMAT_VERSION
            ));
        }

        let entity = document.entity;
        if entity.uuid != filename_uuid {
            warnings.push(format!(
                "{label}: filename UUID '{filename_uuid}' does not match content UUID '{}'",
                entity.uuid
            ));
        }
        if entity.entity_type != entity_type {
            warnings.push(format!(
                "{label}: directory '{entity_type}' does not match entity type '{}'",
                entity.entity_type
            ));
        }

        parsed.push(ParsedEntity { filename, entity });
    }

    // Sort by filename for deterministic ordering, then deduplicate
    parsed.sort_by(|a, b| a.filename.cmp(&b.filename));
    let mut seen: HashSet<Uuid> = HashSet::new();
    parsed.retain(|pe| {
        if seen.insert(pe.entity.uuid) {
            true
        } else {
            warnings.push(format!(
                "{entity_type}/{}: duplicate entity with UUID '{}' (skipped)",
                pe.filename, pe.entity.uuid
            ));
            false
        }
    });

    Ok(parsed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::content_export::MemoryContentStorage;

    use marginalia_test_utils::TestDir;

    fn article(uuid: &str, title: &str) -> ContentEntity {
        ContentEntity::new("node", "article", title)
            .with_uuid(Uuid::parse_str(uuid).unwrap())
            .with_field("body", json!("<p>Body</p>"))
    }

    const UUID_A: &str = "019483a7-b1c2-7def-8012-abcdef123456";
    const UUID_B: &str = "019483a7-b1c2-7def-8012-abcdef789012";

    // ── Filenames ──────────────────────────────────────────────────

    #[test]
    fn parse_content_filename_accepts_uuid() {
        assert_eq!(
            parse_content_filename(&format!("{UUID_A}.json")),
            Some(Uuid::parse_str(UUID_A).unwrap())
        );
    }

    #[test]
    fn parse_content_filename_rejects_others() {
        assert_eq!(parse_content_filename("readme.json"), None);
        assert_eq!(parse_content_filename(&format!("{UUID_A}.yml")), None);
        assert_eq!(parse_content_filename(".json"), None);
    }

    #[test]
    fn validate_path_segment_rejects_unsafe_names() {
        assert!(validate_path_segment("../etc").is_err());
        assert!(validate_path_segment("a/b").is_err());
        assert!(validate_path_segment("a\\b").is_err());
        assert!(validate_path_segment("a:b").is_err());
        assert!(validate_path_segment(".hidden").is_err());
        assert!(validate_path_segment(" node").is_err());
        assert!(validate_path_segment("").is_err());
        assert!(validate_path_segment("taxonomy_term").is_ok());
    }

    // ── Timestamp-insensitive comparison ─────────────────────────────

    #[test]
    fn export_timestamp_is_ignored_in_comparison() {
        let entity = article(UUID_A, "Hello");
        let first = export_document(&entity, "2026-01-01T00:00:00+00:00").unwrap();
        let second = export_document(&entity, "2026-06-01T12:00:00+00:00").unwrap();
        assert_ne!(first, second);
        assert_eq!(
            without_export_timestamp(first),
            without_export_timestamp(second)
        );
    }

    #[test]
    fn export_document_layout() {
        let doc = export_document(&article(UUID_A, "Hello"), "now").unwrap();
        assert_eq!(doc["_meta"]["version"], EXPORT_FORMAT_VERSION);
        assert_eq!(doc["_meta"]["exported_at"], "now");
        assert_eq!(doc["uuid"], UUID_A);
        assert_eq!(doc["entity_type"], "node");
        assert_eq!(doc["fields"]["body"], "<p>Body</p>");
    }

    // ── Filesystem ─────────────────────────────────────────────────

    #[tokio::test]
    async fn export_writes_one_file_per_entity() {
        let dir = TestDir::new("export_layout");
        let storage = MemoryContentStorage::new();
        storage.save(&article(UUID_A, "A")).await.unwrap();
        storage.save(&article(UUID_B, "B")).await.unwrap();

        let report = export_content(&storage, &dir, false).await.unwrap();
        assert_eq!(report.counts.get("node"), Some(&2));
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert!(dir.join("node").join(format!("{UUID_A}.json")).exists());
        assert!(dir.join("node").join(format!("{UUID_B}.json")).exists());
    }

    #[tokio::test]
    async fn re_export_leaves_unchanged_files_alone() {
        let dir = TestDir::new("export_idempotent");
        let storage = MemoryContentStorage::new();
        storage.save(&article(UUID_A, "A")).await.unwrap();

        export_content(&storage, &dir, false).await.unwrap();
        let path = dir.join("node").join(format!("{UUID_A}.json"));
        let before = std::fs::read_to_string(&path).unwrap();

        let report = export_content(&storage, &dir, false).await.unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(report.unchanged, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn re_export_rewrites_changed_entities() {
        let dir = TestDir::new("export_changed");
        let storage = MemoryContentStorage::new();
        storage.save(&article(UUID_A, "A")).await.unwrap();
        export_content(&storage, &dir, false).await.unwrap();

        storage.save(&article(UUID_A, "A, edited")).await.unwrap();
        let report = export_content(&storage, &dir, false).await.unwrap();
        assert_eq!(report.counts.get("node"), Some(&1));
        assert_eq!(report.unchanged, 0);

        let path = dir.join("node").join(format!("{UUID_A}.json"));
        assert!(std::fs::read_to_string(path).unwrap().contains("A, edited"));
    }

    #[tokio::test]
    async fn clean_removes_only_stale_content_files() {
        let dir = TestDir::new("export_clean");
        let storage = MemoryContentStorage::new();
        storage.save(&article(UUID_A, "A")).await.unwrap();

        let node_dir = dir.join("node");
        std::fs::create_dir_all(&node_dir).unwrap();
        std::fs::write(node_dir.join(format!("{UUID_B}.json")), "{}").unwrap();
        std::fs::write(node_dir.join("notes.txt"), "keep me").unwrap();

        let report = export_content(&storage, &dir, true).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(!node_dir.join(format!("{UUID_B}.json")).exists());
        assert!(node_dir.join("notes.txt").exists());
        assert!(node_dir.join(format!("{UUID_A}.json")).exists());
    }

    #[tokio::test]
    async fn export_then_import_restores_entities() {
        let dir = TestDir::new("round_trip");
        let source = MemoryContentStorage::new();
        let term = ContentEntity::new("taxonomy_term", "tags", "Rust");
        source.save(&article(UUID_A, "A")).await.unwrap();
        source.save(&term).await.unwrap();
        export_content(&source, &dir, false).await.unwrap();

        let target = MemoryContentStorage::new();
        let report = import_content(&target, &dir, false).await.unwrap();
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.total(), 2);
        let uuid = Uuid::parse_str(UUID_A).unwrap();
        assert_eq!(
            target.load("node", uuid).await.unwrap(),
            source.load("node", uuid).await.unwrap()
        );
        assert!(
            target
                .load("taxonomy_term", term.uuid)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn dry_run_counts_without_saving() {
        let dir = TestDir::new("dry_run");
        let source = MemoryContentStorage::new();
        source.save(&article(UUID_A, "A")).await.unwrap();
        export_content(&source, &dir, false).await.unwrap();

        let target = MemoryContentStorage::new();
        let report = import_content(&target, &dir, true).await.unwrap();
        assert_eq!(report.counts.get("node"), Some(&1));
        assert!(target.is_empty());
    }

    #[tokio::test]
    async fn import_skips_dotfiles_and_foreign_files() {
        let dir = TestDir::new("import_skip");
        let node_dir = dir.join("node");
        std::fs::create_dir_all(&node_dir).unwrap();
        std::fs::write(node_dir.join(".hidden.json"), "not json").unwrap();
        std::fs::write(node_dir.join("README.md"), "docs").unwrap();
        std::fs::create_dir_all(dir.join(".git")).unwrap();

        let target = MemoryContentStorage::new();
        let report = import_content(&target, &dir, false).await.unwrap();
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.total(), 0);
    }

    #[tokio::test]
    async fn import_warns_on_bad_json_and_keeps_going() {
        let dir = TestDir::new("import_bad_json");
        let source = MemoryContentStorage::new();
        source.save(&article(UUID_A, "A")).await.unwrap();
        export_content(&source, &dir, false).await.unwrap();
        std::fs::write(dir.join("node").join(format!("{UUID_B}.json")), "{ nope").unwrap();

        let target = MemoryContentStorage::new();
        let report = import_content(&target, &dir, false).await.unwrap();
        assert_eq!(report.total(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("failed to parse"));
    }

    #[tokio::test]
    async fn import_warns_on_non_uuid_filename() {
        let dir = TestDir::new("import_bad_name");
        let node_dir = dir.join("node");
        std::fs::create_dir_all(&node_dir).unwrap();
        std::fs::write(node_dir.join("about-us.json"), "{}").unwrap();

        let report = import_content(&MemoryContentStorage::new(), &dir, true)
            .await
            .unwrap();
        assert!(report.warnings[0].contains("filename is not a UUID"));
    }

    #[tokio::test]
    async fn import_warns_on_mismatches_and_skips_duplicates() {
        let dir = TestDir::new("import_mismatch");
        let source = MemoryContentStorage::new();
        source.save(&article(UUID_A, "A")).await.unwrap();
        export_content(&source, &dir, false).await.unwrap();

        // Same entity copied under another UUID filename and another type dir.
        let original = dir.join("node").join(format!("{UUID_A}.json"));
        std::fs::copy(&original, dir.join("node").join(format!("{UUID_B}.json"))).unwrap();
        std::fs::create_dir_all(dir.join("media")).unwrap();
        std::fs::copy(&original, dir.join("media").join(format!("{UUID_A}.json"))).unwrap();

        let report = import_content(&MemoryContentStorage::new(), &dir, true)
            .await
            .unwrap();
        let warnings = report.warnings.join("\n");
        assert!(warnings.contains("does not match content UUID"), "{warnings}");
        assert!(warnings.contains("duplicate entity"), "{warnings}");
        assert!(warnings.contains("directory 'media' does not match"), "{warnings}");
        assert_eq!(report.counts.get("node"), Some(&1));
        assert_eq!(report.counts.get("media"), Some(&1));
    }

    #[tokio::test]
    async fn import_missing_directory_is_an_error() {
        let dir = TestDir::new("import_missing");
        let missing = dir.join("nope");
        assert!(
            import_content(&MemoryContentStorage::new(), &missing, true)
                .await
                .is_err()
        );
    }
}
