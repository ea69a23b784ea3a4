//! Content processing.
//!
//! This module provides:
//! - collab_markup: removal of editor collaboration markup
//! - FilterPipeline: text format filtering for output
//! - HtmlDiff: word-level document diffs with change context

pub mod collab_markup;
pub mod diff;
pub mod filter;

pub use collab_markup::{strip_collaboration_markup, strip_collaboration_markup_with_stats};
pub use diff::{DiffResult, HtmlDiff};
pub use filter::{FilterPipeline, TextFilter};
