//! HTTP route handlers.

pub mod collaboration;
pub mod content;
pub mod cron;
pub mod diff;
pub mod filter;
pub mod health;
pub mod metrics;
