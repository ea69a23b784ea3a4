//! Text format filter pipeline.
//!
//! Every format starts with collaboration markup stripping, so later
//! filters never see comment or suggestion markers:
//! - plain_text: strips markers, HTML-escapes all content
//! - basic_html: strips markers, sanitizes with ammonia, autolinks URLs
//! - full_html: strips markers only (trusted editors)

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::collab_markup;

/// Trait for text filters in the pipeline.
pub trait TextFilter: Send + Sync {
    /// Filter name for debugging.
    fn name(&self) -> &str;

    /// Process the input text and return filtered output.
    fn process(&self, input: &str) -> String;
}

/// Known text formats.
pub const FORMATS: &[&str] = &["plain_text", "basic_html", "full_html"];

/// Pipeline of text filters applied in sequence.
pub struct FilterPipeline {
    filters: Vec<Box<dyn TextFilter>>,
}

impl FilterPipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Add a filter to the pipeline.
    pub fn add<F: TextFilter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Create pipeline for a specific format.
    pub fn for_format(format: &str) -> Self {
        match format {
            "plain_text" => Self::plain_text(),
            "basic_html" => Self::basic_html(),
            "full_html" => Self::full_html(),
            _ => Self::plain_text(), // Default to safest option
        }
    }

    /// Create a plain text pipeline (escapes all HTML).
    pub fn plain_text() -> Self {
        Self::new()
            .add(CollaborationMarkupFilter)
            .add(HtmlEscapeFilter)
            .add(NewlineFilter)
    }

    /// Create a basic HTML pipeline (allows safe tags).
    pub fn basic_html() -> Self {
        Self::new()
            .add(CollaborationMarkupFilter)
            .add(SanitizeHtmlFilter)
            .add(UrlFilter)
    }

    /// Create a full HTML pipeline (markers removed, nothing else).
    pub fn full_html() -> Self {
        Self::new().add(CollaborationMarkupFilter)
    }

    /// Names of the filters in order.
    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Process text through all filters in the pipeline.
    pub fn process(&self, input: &str) -> String {
        self.filters
            .iter()
            .fold(input.to_string(), |acc, filter| filter.process(&acc))
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::plain_text()
    }
}

/// Filter that removes collaboration comments and accepts suggestions.
pub struct CollaborationMarkupFilter;

impl TextFilter for CollaborationMarkupFilter {
    fn name(&self) -> &str {
        "collaboration_markup"
    }

    fn process(&self, input: &str) -> String {
        let stripped = collab_markup::strip_collaboration_markup_with_stats(input);
        if !stripped.stats.is_empty() {
            debug!(
                comment_markers = stripped.stats.comment_markers,
                suggestion_markers = stripped.stats.suggestion_markers,
                deletions = stripped.stats.deletions_applied,
                "stripped collaboration markup"
            );
        }
        stripped.html
    }
}

/// Filter that escapes all HTML characters.
pub struct HtmlEscapeFilter;

impl TextFilter for HtmlEscapeFilter {
    fn name(&self) -> &str {
        "html_escape"
    }

    fn process(&self, input: &str) -> String {
        input
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#x27;")
    }
}

/// Filter that converts newlines to <br> tags.
pub struct NewlineFilter;

impl TextFilter for NewlineFilter {
    fn name(&self) -> &str {
        "newline"
    }

    fn process(&self, input: &str) -> String {
        input.replace('\n', "<br>\n")
    }
}

/// Filter that allows safe HTML tags and strips dangerous ones.
pub struct SanitizeHtmlFilter;

impl TextFilter for SanitizeHtmlFilter {
    fn name(&self) -> &str {
        "sanitize_html"
    }

    fn process(&self, input: &str) -> String {
        ammonia::clean(input)
    }
}

/// Bare URLs outside of attributes.
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid regex literal"));

/// Opening or closing `a` tags, whatever whitespace follows the name.
#[allow(clippy::expect_used)]
static ANCHOR_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(/?)a[\s>]").expect("valid regex literal"));

/// Filter that converts URLs to clickable links.
pub struct UrlFilter;

impl TextFilter for UrlFilter {
    fn name(&self) -> &str {
        "url"
    }

    fn process(&self, input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut last_end = 0;

        for mat in URL.find_iter(input) {
            let start = mat.start();
            let url = mat.as_str();

            // Already in an attribute, or already the text of a link.
            let prefix = &input[..start];
            let is_in_attr = prefix.ends_with("href=\"")
                || prefix.ends_with("href='")
                || prefix.ends_with("src=\"")
                || prefix.ends_with("src='")
                || (prefix.ends_with('>') && is_inside_anchor(prefix));

            result.push_str(&input[last_end..start]);

            if is_in_attr {
                result.push_str(url);
            } else {
                result.push_str(&format!(
                    r#"<a href="{url}" target="_blank" rel="noopener">{url}</a>"#
                ));
            }

            last_end = mat.end();
        }

        result.push_str(&input[last_end..]);
        result
    }
}

/// Whether the last opened `<a` in `prefix` has not been closed yet.
fn is_inside_anchor(prefix: &str) -> bool {
    ANCHOR_TAG
        .captures_iter(prefix)
        .last()
        .is_some_and(|caps| caps[1].is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escape_filter() {
        let filter = HtmlEscapeFilter;
        assert_eq!(
            filter.process("<script>alert('xss')</script>"),
            "&lt;script&gt;alert(&#x27;xss&#x27;)&lt;/script&gt;"
        );
    }

    #[test]
    fn newline_filter() {
        let filter = NewlineFilter;
        assert_eq!(filter.process("line1\nline2"), "line1<br>\nline2");
    }

    #[test]
    fn sanitize_removes_scripts() {
        let filter = SanitizeHtmlFilter;
        let input = "<p>Safe</p><script>alert('xss')</script><p>Also safe</p>";
        let output = filter.process(input);
        assert!(!output.contains("script"));
        assert!(output.contains("<p>Safe</p>"));
    }

    #[test]
    fn sanitize_removes_event_handlers() {
        let filter = SanitizeHtmlFilter;
        let output = filter.process(r#"<a href="/page" onclick="alert('xss')">Link</a>"#);
        assert!(!output.contains("onclick"));
    }

    #[test]
    fn sanitize_removes_javascript_urls() {
        let filter = SanitizeHtmlFilter;
        let output = filter.process(r#"<a href="javascript:alert('xss')">Link</a>"#);
        assert!(!output.contains("javascript:"));
    }

    #[test]
    fn url_filter_converts_urls() {
        let output = UrlFilter.process("Check out https://example.com for more info.");
        assert!(output.contains(r#"<a href="https://example.com""#));
    }

    #[test]
    fn url_filter_leaves_existing_links() {
        let input = r#"<a href="https://example.com">https://example.com</a>"#;
        assert_eq!(UrlFilter.process(input), input);
    }

    #[test]
    fn url_filter_leaves_links_with_any_whitespace_after_the_tag_name() {
        let filter = UrlFilter;
        for input in [
            "<a\nhref=\"https://example.com\">https://example.com</a>",
            "<A\thref=\"https://example.com\">https://example.com</A>",
            "<a>https://example.com</a>",
        ] {
            assert_eq!(filter.process(input), input);
        }
        let after = filter.process("<a\nhref=\"/x\">x</a> https://example.com");
        assert!(after.ends_with(r#"<a href="https://example.com" target="_blank" rel="noopener">https://example.com</a>"#));
    }

    #[test]
    fn url_filter_preserves_non_url_text() {
        let input = "No URLs here, just plain text.";
        assert_eq!(UrlFilter.process(input), input);
    }

    #[test]
    fn collaboration_filter_runs_first_in_every_format() {
        for format in FORMATS {
            let pipeline = FilterPipeline::for_format(format);
            assert_eq!(pipeline.filter_names()[0], "collaboration_markup");
        }
    }

    #[test]
    fn plain_text_pipeline_strips_markers_before_escaping() {
        let pipeline = FilterPipeline::plain_text();
        let input = r#"Hi <suggestion-start name="insertion:1"></suggestion-start>there<suggestion-end name="insertion:1"></suggestion-end>"#;
        assert_eq!(pipeline.process(input), "Hi there");
    }

    #[test]
    fn basic_html_pipeline_keeps_space_at_suggestion_boundary() {
        let pipeline = FilterPipeline::basic_html();
        let input = r#"<p>Hello <suggestion-start name="insertion:1"></suggestion-start>World<suggestion-end name="insertion:1"></suggestion-end> again</p>"#;
        assert_eq!(pipeline.process(input), "<p>Hello World again</p>");
    }

    #[test]
    fn basic_html_pipeline_removes_scripts() {
        let pipeline = FilterPipeline::basic_html();
        let output = pipeline.process("<p>Hello</p><script>bad</script>");
        assert!(output.contains("<p>Hello</p>"));
        assert!(!output.contains("script"));
    }

    #[test]
    fn full_html_pipeline_only_strips_markers() {
        let pipeline = FilterPipeline::full_html();
        let input = r#"<style>body{}</style><p data-comment-start-before="c">x</p>"#;
        assert_eq!(pipeline.process(input), "<style>body{}</style><p>x</p>");
    }

    #[test]
    fn filter_pipeline_default_is_plain_text() {
        let output = FilterPipeline::default().process("<b>bold</b>");
        assert!(output.contains("&lt;b&gt;"));
    }

    #[test]
    fn filter_pipeline_for_unknown_format() {
        let output = FilterPipeline::for_format("nonexistent").process("<i>italic</i>");
        assert!(output.contains("&lt;i&gt;"));
    }

    #[test]
    fn filter_names() {
        assert_eq!(CollaborationMarkupFilter.name(), "collaboration_markup");
        assert_eq!(HtmlEscapeFilter.name(), "html_escape");
        assert_eq!(NewlineFilter.name(), "newline");
        assert_eq!(SanitizeHtmlFilter.name(), "sanitize_html");
        assert_eq!(UrlFilter.name(), "url");
    }
}
