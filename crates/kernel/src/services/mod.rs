//! Kernel services.
//!
//! Services with runtime behavior beyond pure text processing: signing
//! collaboration tokens and tracking entity usage.

pub mod collaboration_token;
pub mod entity_usage;
