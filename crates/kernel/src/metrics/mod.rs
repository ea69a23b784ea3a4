//! Prometheus metrics collection.
//!
//! Provides application metrics in Prometheus format.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::services::entity_usage::DrainSummary;

/// Text format labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FormatLabels {
    pub format: String,
}

/// Usage queue outcome labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// Documents run through a filter pipeline, by text format.
    pub documents_filtered: Family<FormatLabels, Counter>,

    /// Documents that contained collaboration markup.
    pub collaboration_markup_stripped: Counter,

    /// Collaboration tokens issued.
    pub tokens_issued: Counter,

    /// Document diffs computed.
    pub diffs_computed: Counter,

    /// Usage queue items handled, by outcome.
    pub usage_items: Family<OutcomeLabels, Counter>,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let documents_filtered = Family::<FormatLabels, Counter>::default();
        registry.register(
            "documents_filtered",
            "Documents run through a text format",
            documents_filtered.clone(),
        );

        let collaboration_markup_stripped = Counter::default();
        registry.register(
            "collaboration_markup_stripped",
            "Documents that had collaboration markup removed",
            collaboration_markup_stripped.clone(),
        );

        let tokens_issued = Counter::default();
        registry.register(
            "collaboration_tokens_issued",
            "Collaboration tokens issued",
            tokens_issued.clone(),
        );

        let diffs_computed = Counter::default();
        registry.register(
            "diffs_computed",
            "Document diffs computed",
            diffs_computed.clone(),
        );

        let usage_items = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "usage_items_processed",
            "Entity usage queue items handled",
            usage_items.clone(),
        );

        Self {
            registry,
            documents_filtered,
            collaboration_markup_stripped,
            tokens_issued,
            diffs_computed,
            usage_items,
        }
    }

    /// Record a filtered document.
    pub fn record_filter(&self, format: &str, had_markup: bool) {
        self.documents_filtered
            .get_or_create(&FormatLabels {
                format: format.to_string(),
            })
            .inc();
        if had_markup {
            self.collaboration_markup_stripped.inc();
        }
    }

    /// Record an issued token.
    pub fn record_token(&self) {
        self.tokens_issued.inc();
    }

    /// Record a computed diff.
    pub fn record_diff(&self) {
        self.diffs_computed.inc();
    }

    /// Record the outcome counts of a usage queue drain.
    pub fn record_usage_items(&self, summary: &DrainSummary) {
        for (outcome, count) in [
            ("processed", summary.processed),
            ("removed", summary.removed),
            ("skipped", summary.skipped),
        ] {
            if count > 0 {
                self.usage_items
                    .get_or_create(&OutcomeLabels {
                        outcome: outcome.to_string(),
                    })
                    .inc_by(count as u64);
            }
        }
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        // Prometheus encoding to String buffer is infallible
        #[allow(clippy::expect_used)]
        encode(&mut buffer, &self.registry).expect("encoding metrics");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_registered() {
        let metrics = Metrics::new();
        let output = metrics.encode();
        assert!(output.contains("collaboration_tokens_issued_total"));
        assert!(output.contains("diffs_computed_total"));
    }

    #[test]
    fn record_filter_labels_by_format() {
        let metrics = Metrics::new();
        metrics.record_filter("basic_html", true);
        metrics.record_filter("basic_html", false);

        let output = metrics.encode();
        assert!(output.contains(r#"documents_filtered_total{format="basic_html"} 2"#));
        assert!(output.contains("collaboration_markup_stripped_total 1"));
    }

    #[test]
    fn usage_outcomes_skip_zero_counts() {
        let metrics = Metrics::new();
        metrics.record_usage_items(&DrainSummary {
            processed: 2,
            removed: 0,
            skipped: 1,
        });

        let output = metrics.encode();
        assert!(output.contains(r#"usage_items_processed_total{outcome="processed"} 2"#));
        assert!(output.contains(r#"usage_items_processed_total{outcome="skipped"} 1"#));
        assert!(!output.contains(r#"outcome="removed""#));
    }
}
