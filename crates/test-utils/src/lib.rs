//! Marginalia test utilities.
//!
//! Helpers for unit and integration testing: temporary directories,
//! editor HTML fixtures, content entity JSON builders and assertion
//! utilities.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// RAII guard for test directories. Automatically removes the directory
/// on drop, guaranteeing cleanup even if the test panics.
#[derive(Debug)]
pub struct TestDir(PathBuf);

impl TestDir {
    /// Create a fresh, empty directory under the system temp dir.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[allow(clippy::expect_used)]
    pub fn new(name: &str) -> Self {
        let n = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "marginalia_test_{name}_{n}_{}",
            std::process::id()
        ));
        // Remove leftovers from a previous run, if any
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("failed to create test directory");
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Deref for TestDir {
    type Target = Path;
    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Editor HTML samples carrying collaboration markup.
pub mod html {
    /// A resolved comment thread around part of a paragraph.
    pub const COMMENTED: &str = r#"<p>Intro <comment-start name="thread-1"></comment-start>flagged text<comment-end name="thread-1"></comment-end> outro.</p>"#;

    /// Expected output for [`COMMENTED`].
    pub const COMMENTED_CLEAN: &str = "<p>Intro flagged text outro.</p>";

    /// A pending insertion suggestion.
    pub const INSERTION: &str = r#"<p>Hello <suggestion-start name="insertion:1"></suggestion-start>World<suggestion-end name="insertion:1"></suggestion-end></p>"#;

    /// Expected output for [`INSERTION`].
    pub const INSERTION_CLEAN: &str = "<p>Hello World</p>";

    /// A pending deletion suggestion.
    pub const DELETION: &str = r#"<p>Keep <suggestion-start name="deletion:2:user"></suggestion-start>drop this <strong>too</strong> <suggestion-end name="deletion:2:user"></suggestion-end>end.</p>"#;

    /// Expected output for [`DELETION`].
    pub const DELETION_CLEAN: &str = "<p>Keep end.</p>";

    /// Comment markers stored as attributes on an element.
    pub const ATTRIBUTE_MARKERS: &str = r#"<p data-comment-start-before="thread-2" data-comment-end-after="thread-2" class="lead">Marked paragraph</p>"#;

    /// Expected output for [`ATTRIBUTE_MARKERS`].
    pub const ATTRIBUTE_MARKERS_CLEAN: &str = r#"<p class="lead">Marked paragraph</p>"#;

    /// Plain HTML without any collaboration markup.
    pub const PLAIN: &str = r#"<h2>Title</h2><p>Some <em>plain</em> text with <a href="https://example.com">a link</a>.</p>"#;
}

/// Build a content entity as JSON, matching the wire shape of the content API.
pub fn entity_json(entity_type: &str, bundle: &str, label: &str) -> TestEntity {
    TestEntity {
        uuid: Uuid::now_v7(),
        entity_type: entity_type.to_string(),
        bundle: bundle.to_string(),
        label: label.to_string(),
        fields: json!({}),
    }
}

/// A content entity builder for creating test fixtures.
#[derive(Debug, Clone)]
pub struct TestEntity {
    pub uuid: Uuid,
    pub entity_type: String,
    pub bundle: String,
    pub label: String,
    pub fields: JsonValue,
}

impl TestEntity {
    /// Set a custom UUID.
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    /// Add a single field.
    pub fn with_field(mut self, name: &str, value: JsonValue) -> Self {
        if let Some(obj) = self.fields.as_object_mut() {
            obj.insert(name.to_string(), value);
        }
        self
    }

    /// Add an HTML body embedding the given entity.
    pub fn embedding(self, entity_type: &str, uuid: Uuid) -> Self {
        self.with_field(
            "body",
            json!(format!(
                r#"<p>Embedded:</p><drupal-media data-entity-type="{entity_type}" data-entity-uuid="{uuid}"></drupal-media>"#
            )),
        )
    }

    /// Add a reference field pointing at the given entity.
    pub fn referencing(self, field: &str, entity_type: &str, uuid: Uuid) -> Self {
        self.with_field(
            field,
            json!([{ "target_type": entity_type, "target_uuid": uuid.to_string() }]),
        )
    }

    /// The entity as a JSON value.
    pub fn build(&self) -> JsonValue {
        json!({
            "uuid": self.uuid.to_string(),
            "entity_type": self.entity_type,
            "bundle": self.bundle,
            "label": self.label,
            "fields": self.fields,
        })
    }
}

/// Assertion helpers for JSON content.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that a string does not contain a substring.
    pub fn not_contains(haystack: &str, needle: &str) {
        assert!(
            !haystack.contains(needle),
            "Expected string NOT to contain '{needle}'\nActual: {haystack}"
        );
    }
}
