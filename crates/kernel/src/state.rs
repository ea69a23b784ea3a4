//! Application state shared across all handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::content::FilterPipeline;
use crate::content::diff::HtmlDiff;
use crate::content_export::{ContentStorage, MemoryContentStorage};
use crate::cron::{CronService, MemoryQueue, Queue};
use crate::metrics::Metrics;
use crate::services::collaboration_token::CollaborationTokenService;
use crate::services::entity_usage::{EntityUsage, StorageLoader, UsageWorker};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Content entities.
    storage: Arc<dyn ContentStorage>,

    /// Background work queues.
    queue: Arc<dyn Queue>,

    /// Entity usage worker and registry.
    usage_worker: Arc<UsageWorker>,

    /// Cron service for scheduled operations.
    cron: Arc<CronService>,

    /// Token issuance (available when the collaboration service is configured).
    tokens: Option<Arc<CollaborationTokenService>>,

    /// Document differ.
    differ: HtmlDiff,

    /// Prometheus metrics.
    metrics: Arc<Metrics>,

    content_export_dir: PathBuf,
    diff_context_words: usize,
    diff_snippet_separator: String,
    cron_key: Option<String>,
}

impl AppState {
    /// Create application state with in-process storage and queues.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_storage(
            config,
            Arc::new(MemoryContentStorage::new()),
            Arc::new(MemoryQueue::new()),
        )
    }

    /// Create application state over the given storage and queue.
    pub fn with_storage(
        config: &Config,
        storage: Arc<dyn ContentStorage>,
        queue: Arc<dyn Queue>,
    ) -> Result<Self> {
        let tokens = match (&config.ckeditor_environment_id, &config.ckeditor_access_key) {
            (Some(environment_id), Some(access_key)) => {
                let service = CollaborationTokenService::new(
                    environment_id,
                    access_key,
                    config.collaboration_default_role,
                )
                .context("failed to create collaboration token service")?;
                info!(environment_id = %service.environment_id(), "collaboration tokens enabled");
                Some(Arc::new(service))
            }
            _ => {
                info!("collaboration tokens disabled (CKEDITOR_ENVIRONMENT_ID/CKEDITOR_ACCESS_KEY not set)");
                None
            }
        };

        let metrics = Arc::new(Metrics::new());
        let usage_worker = Arc::new(UsageWorker::new(
            queue.clone(),
            Arc::new(StorageLoader(storage.clone())),
            Arc::new(EntityUsage::new()),
        ));
        let cron = Arc::new(CronService::new(
            usage_worker.clone(),
            metrics.clone(),
            config.usage_batch_size,
        ));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                storage,
                queue,
                usage_worker,
                cron,
                tokens,
                differ: HtmlDiff::default(),
                metrics,
                content_export_dir: config.content_export_dir.clone(),
                diff_context_words: config.diff_context_words,
                diff_snippet_separator: config.diff_snippet_separator.clone(),
                cron_key: config.cron_key.clone(),
            }),
        })
    }

    pub fn storage(&self) -> &Arc<dyn ContentStorage> {
        &self.inner.storage
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.inner.queue
    }

    pub fn usage_worker(&self) -> &Arc<UsageWorker> {
        &self.inner.usage_worker
    }

    pub fn cron(&self) -> &Arc<CronService> {
        &self.inner.cron
    }

    pub fn tokens(&self) -> Option<&Arc<CollaborationTokenService>> {
        self.inner.tokens.as_ref()
    }

    pub fn differ(&self) -> &HtmlDiff {
        &self.inner.differ
    }

    /// Filter pipeline for a text format name.
    pub fn pipeline(&self, format: &str) -> FilterPipeline {
        FilterPipeline::for_format(format)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn content_export_dir(&self) -> &Path {
        &self.inner.content_export_dir
    }

    pub fn diff_context_words(&self) -> usize {
        self.inner.diff_context_words
    }

    pub fn diff_snippet_separator(&self) -> &str {
        &self.inner.diff_snippet_separator
    }

    pub fn cron_key(&self) -> Option<&str> {
        self.inner.cron_key.as_deref()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tokens_enabled", &self.inner.tokens.is_some())
            .field("content_export_dir", &self.inner.content_export_dir)
            .finish()
    }
}
