//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::content::diff::{DEFAULT_CONTEXT_WORDS, DEFAULT_SNIPPET_SEPARATOR};
use crate::services::collaboration_token::CollaborationRole;

/// Application configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,

    /// Collaboration service environment ID. Token issuance is disabled
    /// unless both this and the access key are set.
    pub ckeditor_environment_id: Option<String>,

    /// Collaboration service access key used to sign tokens.
    pub ckeditor_access_key: Option<String>,

    /// Role granted when a token request names none (default: writer).
    pub collaboration_default_role: CollaborationRole,

    /// Content export directory (default: ./content).
    pub content_export_dir: PathBuf,

    /// Words of context on each side of a change (default: 3).
    pub diff_context_words: usize,

    /// Separator between change snippets.
    pub diff_snippet_separator: String,

    /// Seconds between cron runs; 0 disables the scheduler (default: 60).
    pub cron_interval_secs: u64,

    /// Secret for `POST /cron/{key}`. When None, the HTTP trigger is disabled.
    pub cron_key: Option<String>,

    /// Usage queue items processed per cron run (default: 100).
    pub usage_batch_size: usize,
}

/// Read an optional variable, treating empty values as unset.
fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| vec!["*".to_string()]);

        let ckeditor_environment_id = optional_var("CKEDITOR_ENVIRONMENT_ID");
        let ckeditor_access_key = optional_var("CKEDITOR_ACCESS_KEY");

        let collaboration_default_role = match optional_var("COLLABORATION_DEFAULT_ROLE") {
            Some(role) => role
                .parse()
                .context("COLLABORATION_DEFAULT_ROLE must be reader, commentator or writer")?,
            None => CollaborationRole::Writer,
        };

        let content_export_dir = env::var("CONTENT_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./content"));

        let diff_context_words = env::var("DIFF_CONTEXT_WORDS")
            .unwrap_or_else(|_| DEFAULT_CONTEXT_WORDS.to_string())
            .parse()
            .context("DIFF_CONTEXT_WORDS must be a valid usize")?;

        let diff_snippet_separator = env::var("DIFF_SNIPPET_SEPARATOR")
            .unwrap_or_else(|_| DEFAULT_SNIPPET_SEPARATOR.to_string());

        let cron_interval_secs = env::var("CRON_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("CRON_INTERVAL_SECS must be a valid u64")?;

        let cron_key = optional_var("CRON_KEY");

        let usage_batch_size = env::var("USAGE_BATCH_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .context("USAGE_BATCH_SIZE must be a valid usize")?;

        Ok(Self {
            port,
            cors_allowed_origins,
            ckeditor_environment_id,
            ckeditor_access_key,
            collaboration_default_role,
            content_export_dir,
            diff_context_words,
            diff_snippet_separator,
            cron_interval_secs,
            cron_key,
            usage_batch_size,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            cors_allowed_origins: vec!["*".to_string()],
            ckeditor_environment_id: None,
            ckeditor_access_key: None,
            collaboration_default_role: CollaborationRole::Writer,
            content_export_dir: PathBuf::from("./content"),
            diff_context_words: DEFAULT_CONTEXT_WORDS,
            diff_snippet_separator: DEFAULT_SNIPPET_SEPARATOR.to_string(),
            cron_interval_secs: 60,
            cron_key: None,
            usage_batch_size: 100,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("ckeditor_environment_id", &self.ckeditor_environment_id)
            .field(
                "ckeditor_access_key",
                &self.ckeditor_access_key.as_ref().map(|_| "[redacted]"),
            )
            .field("collaboration_default_role", &self.collaboration_default_role)
            .field("content_export_dir", &self.content_export_dir)
            .field("diff_context_words", &self.diff_context_words)
            .field("cron_interval_secs", &self.cron_interval_secs)
            .field("cron_key", &self.cron_key.as_ref().map(|_| "[redacted]"))
            .field("usage_batch_size", &self.usage_batch_size)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let config = Config {
            ckeditor_access_key: Some("top-secret".to_string()),
            cron_key: Some("also-secret".to_string()),
            ..Config::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("top-secret"));
        assert!(!debug.contains("also-secret"));
        assert!(debug.contains("[redacted]"));
    }
}
