//! Data models.

pub mod content_entity;

pub use content_entity::ContentEntity;
