//! Content entity model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

fn default_langcode() -> String {
    "en".to_string()
}

/// A content entity as exchanged with the host CMS.
///
/// `fields` holds field values keyed by field name. Text fields are HTML
/// strings; reference fields are objects with `target_type` and
/// `target_uuid`, or arrays of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntity {
    pub uuid: Uuid,
    pub entity_type: String,
    pub bundle: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_langcode")]
    pub langcode: String,
    /// Last change (Unix timestamp).
    #[serde(default)]
    pub changed: i64,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ContentEntity {
    /// Create a new entity with a fresh UUID.
    pub fn new(entity_type: &str, bundle: &str, label: &str) -> Self {
        Self {
            uuid: Uuid::now_v7(),
            entity_type: entity_type.to_string(),
            bundle: bundle.to_string(),
            label: label.to_string(),
            langcode: default_langcode(),
            changed: chrono::Utc::now().timestamp(),
            fields: Map::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Get a string field value.
    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// `entity_type:uuid`, used in logs and usage rows.
    pub fn key(&self) -> String {
        format!("{}:{}", self.entity_type, self.uuid)
    }
}
