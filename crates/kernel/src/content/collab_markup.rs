//! Collaboration markup stripping.
//!
//! The collaborative editor stores review state inline in the document:
//! comment ranges and tracked-change suggestions are bracketed by marker
//! elements (`<comment-start>`, `<suggestion-end>`, ...) or, where an
//! element cannot be placed, by `data-*-start-before` style attributes on
//! a neighbouring element. Readers must never see any of it.
//!
//! Stripping is a single tokenizing pass over the serialized HTML:
//!
//! - comment markers and comment attributes are removed, content kept;
//! - `insertion` suggestions are accepted (markers removed, content kept);
//! - `deletion` suggestions are accepted (bracketed content removed);
//! - every other suggestion kind only loses its markers.
//!
//! Everything that is not marker markup keeps its original bytes, so
//! whitespace next to a removed marker survives untouched and running the
//! filter on clean HTML is the identity.

use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

/// Marker element names.
const COMMENT_START: &str = "comment-start";
const COMMENT_END: &str = "comment-end";
const SUGGESTION_START: &str = "suggestion-start";
const SUGGESTION_END: &str = "suggestion-end";

/// Suggestion kind whose accepted form removes the bracketed content.
const DELETION_KIND: &str = "deletion";

/// Elements whose content is raw text and never contains markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Elements that never have an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Regexes for the tokenizer. All are anchored at the slice start, and
/// outside quoted values none crosses a `<`, so a failed attempt ends at
/// the next tag opener instead of the end of the input.
///
/// # Panics
///
/// Panics if a hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<[!?][^<>]*>").expect("valid regex literal"));

#[allow(clippy::expect_used)]
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^<(/?)([A-Za-z][A-Za-z0-9:_.-]*)((?:[^<>"']|"[^"]*"|'[^']*')*)>"#)
        .expect("valid regex literal")
});

const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";

#[allow(clippy::expect_used)]
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("valid regex literal")
});

/// Where a marker attribute places its range boundary relative to the
/// element carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    StartBefore,
    StartAfter,
    EndBefore,
    EndAfter,
}

impl Anchor {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "start-before" => Some(Self::StartBefore),
            "start-after" => Some(Self::StartAfter),
            "end-before" => Some(Self::EndBefore),
            "end-after" => Some(Self::EndAfter),
            _ => None,
        }
    }
}

/// A marker attribute found on an ordinary element.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MarkerAttr {
    Comment,
    Suggestion { anchor: Anchor, names: Vec<String> },
}

/// Parse a `data-comment-*` / `data-suggestion-*` attribute name.
fn parse_marker_attr(name: &str, value: &str) -> Option<MarkerAttr> {
    if let Some(suffix) = name.strip_prefix("data-comment-") {
        return Anchor::from_suffix(suffix).map(|_| MarkerAttr::Comment);
    }
    let suffix = name.strip_prefix("data-suggestion-")?;
    let anchor = Anchor::from_suffix(suffix)?;
    let names = value
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    Some(MarkerAttr::Suggestion { anchor, names })
}

/// Suggestion kind encoded before the first `:` of a suggestion name.
fn suggestion_kind(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

fn is_deletion(name: &str) -> bool {
    suggestion_kind(name) == DELETION_KIND
}

#[derive(Debug)]
struct Attr<'a> {
    name: String,
    value: &'a str,
    /// Byte range inside the raw tag, including leading whitespace.
    span: Range<usize>,
}

#[derive(Debug)]
struct StartTag<'a> {
    name: String,
    raw: &'a str,
    attrs: Vec<Attr<'a>>,
    self_closing: bool,
}

impl StartTag<'_> {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|a| a.name == name).map(|a| a.value)
    }

    fn is_void(&self) -> bool {
        self.self_closing || VOID_ELEMENTS.contains(&self.name.as_str())
    }
}

#[derive(Debug)]
enum Token<'a> {
    Text(&'a str),
    /// HTML comments, doctypes and processing instructions.
    Other(&'a str),
    Start(StartTag<'a>),
    End { name: String, raw: &'a str },
}

fn is_marker_element(name: &str) -> bool {
    matches!(
        name,
        COMMENT_START | COMMENT_END | SUGGESTION_START | SUGGESTION_END
    )
}

fn parse_start_tag<'a>(raw: &'a str, name: &str, body_range: Range<usize>) -> StartTag<'a> {
    let body = &raw[body_range.clone()];
    let mut attrs = Vec::new();
    for caps in ATTRIBUTE.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(attr_name) = caps.get(1) else {
            continue;
        };
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());
        let leading_ws = body[..whole.start()]
            .chars()
            .rev()
            .take_while(|c| c.is_whitespace())
            .map(char::len_utf8)
            .sum::<usize>();
        let start = body_range.start + whole.start() - leading_ws;
        let end = body_range.start + whole.end();
        attrs.push(Attr {
            name: attr_name.as_str().to_ascii_lowercase(),
            value,
            span: start..end,
        });
    }
    StartTag {
        name: name.to_ascii_lowercase(),
        raw,
        attrs,
        self_closing: body.trim_end().ends_with('/'),
    }
}

/// Try to read one markup token at the start of `rest`.
///
/// `comments_close` turns false once a comment was found without a
/// terminator; no later comment can have one either.
fn read_markup<'a>(rest: &'a str, comments_close: &mut bool) -> Option<(Token<'a>, usize)> {
    if *comments_close && rest.starts_with(COMMENT_OPEN) {
        match rest[COMMENT_OPEN.len()..].find(COMMENT_CLOSE) {
            Some(offset) => {
                let len = COMMENT_OPEN.len() + offset + COMMENT_CLOSE.len();
                return Some((Token::Other(&rest[..len]), len));
            }
            None => *comments_close = false,
        }
    }
    if let Some(m) = DECLARATION.find(rest) {
        return Some((Token::Other(m.as_str()), m.end()));
    }
    let caps = TAG.captures(rest)?;
    let whole = caps.get(0)?;
    let raw = whole.as_str();
    let name = caps.get(2)?.as_str();
    let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
    let token = if closing {
        Token::End {
            name: name.to_ascii_lowercase(),
            raw,
        }
    } else {
        let body = caps.get(3)?;
        Token::Start(parse_start_tag(raw, name, body.range()))
    };
    Some((token, whole.end()))
}

/// Split HTML into tokens. Never fails: anything that does not parse as
/// markup is text.
fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;
    let mut comments_close = true;

    while let Some(offset) = input[pos..].find('<') {
        let at = pos + offset;
        let Some((token, len)) = read_markup(&input[at..], &mut comments_close) else {
            pos = at + 1;
            continue;
        };
        if text_start < at {
            tokens.push(Token::Text(&input[text_start..at]));
        }
        pos = at + len;
        text_start = pos;

        let raw_text_end = match &token {
            Token::Start(tag)
                if !tag.self_closing && RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) =>
            {
                let closing = format!("</{}", tag.name);
                Some(
                    find_ascii_case_insensitive(&input[pos..], &closing)
                        .map_or(input.len(), |i| pos + i),
                )
            }
            _ => None,
        };
        tokens.push(token);

        if let Some(end) = raw_text_end {
            if pos < end {
                tokens.push(Token::Text(&input[pos..end]));
            }
            pos = end;
            text_start = end;
        }
    }

    if text_start < input.len() {
        tokens.push(Token::Text(&input[text_start..]));
    }
    tokens
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

/// Counters describing what a strip pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkupStats {
    /// Comment marker elements and attributes removed.
    pub comment_markers: usize,
    /// Suggestion marker elements and attributes removed.
    pub suggestion_markers: usize,
    /// Deletion ranges whose content was dropped.
    pub deletions_applied: usize,
}

impl MarkupStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Result of a strip pass.
#[derive(Debug, Clone)]
pub struct Stripped {
    pub html: String,
    pub stats: MarkupStats,
}

/// An element that is open at the current position.
struct OpenElement {
    name: String,
    /// Cleaned start tag, kept so a suppressed tag can be revived.
    start_tag: String,
    emitted: bool,
    close_before: Vec<String>,
    close_after: Vec<String>,
}

struct Stripper {
    out: String,
    stats: MarkupStats,
    /// For each deletion start in document order, whether a matching end
    /// follows it.
    closable: Vec<bool>,
    /// Index of the next deletion start into `closable`.
    next_start: usize,
    /// Deletion ranges currently open.
    deleting: Vec<String>,
    open: Vec<OpenElement>,
}

impl Stripper {
    fn new(capacity: usize, closable: Vec<bool>) -> Self {
        Self {
            out: String::with_capacity(capacity),
            stats: MarkupStats::default(),
            closable,
            next_start: 0,
            deleting: Vec::new(),
            open: Vec::new(),
        }
    }

    fn is_deleting(&self) -> bool {
        !self.deleting.is_empty()
    }

    /// Called once per deletion start, in the order
    /// [`closable_deletion_starts`] enumerates them.
    fn open_deletion(&mut self, name: &str) {
        let closable = self.closable.get(self.next_start).copied().unwrap_or(false);
        self.next_start += 1;
        // Without a later end marker the range would swallow the rest of
        // the document; such a start is treated as a plain marker.
        if !closable || self.deleting.iter().any(|d| d == name) {
            return;
        }
        self.deleting.push(name.to_string());
        self.stats.deletions_applied += 1;
    }

    fn close_deletion(&mut self, name: &str) {
        let before = self.deleting.len();
        self.deleting.retain(|d| d != name);
        if before != self.deleting.len() && self.deleting.is_empty() {
            self.revive_suppressed();
        }
    }

    /// Elements opened inside a deletion range and still open after it
    /// get their start tag back, so their later end tag stays balanced.
    fn revive_suppressed(&mut self) {
        for element in self.open.iter_mut().filter(|e| !e.emitted) {
            self.out.push_str(&element.start_tag);
            element.emitted = true;
        }
    }

    fn emit_if_kept(&mut self, raw: &str) {
        if !self.is_deleting() {
            self.out.push_str(raw);
        }
    }

    fn marker_element(&mut self, tag: &StartTag<'_>) {
        let name = tag.attr("name").unwrap_or_default().trim();
        match tag.name.as_str() {
            COMMENT_START | COMMENT_END => self.stats.comment_markers += 1,
            SUGGESTION_START => {
                self.stats.suggestion_markers += 1;
                if is_deletion(name) {
                    self.open_deletion(name);
                }
            }
            SUGGESTION_END => {
                self.stats.suggestion_markers += 1;
                if is_deletion(name) {
                    self.close_deletion(name);
                }
            }
            _ => {}
        }
    }

    fn start_tag(&mut self, tag: &StartTag<'_>) {
        if is_marker_element(&tag.name) {
            self.marker_element(tag);
            return;
        }

        let mut cleaned = String::with_capacity(tag.raw.len());
        let mut last = 0;
        let mut anchored: Vec<(Anchor, String)> = Vec::new();
        for attr in &tag.attrs {
            let Some(marker) = parse_marker_attr(&attr.name, attr.value) else {
                continue;
            };
            cleaned.push_str(&tag.raw[last..attr.span.start]);
            last = attr.span.end;
            match marker {
                MarkerAttr::Comment => self.stats.comment_markers += 1,
                MarkerAttr::Suggestion { anchor, names } => {
                    self.stats.suggestion_markers += 1;
                    anchored.extend(
                        names
                            .into_iter()
                            .filter(|n| is_deletion(n))
                            .map(|n| (anchor, n)),
                    );
                }
            }
        }
        cleaned.push_str(&tag.raw[last..]);

        let names_at = |which: Anchor| -> Vec<String> {
            anchored
                .iter()
                .filter(|(a, _)| *a == which)
                .map(|(_, n)| n.clone())
                .collect()
        };

        for name in names_at(Anchor::StartBefore) {
            self.open_deletion(&name);
        }
        let emitted = !self.is_deleting();
        if emitted {
            self.out.push_str(&cleaned);
        }
        for name in names_at(Anchor::StartAfter) {
            self.open_deletion(&name);
        }

        if tag.is_void() {
            for name in names_at(Anchor::EndBefore)
                .into_iter()
                .chain(names_at(Anchor::EndAfter))
            {
                self.close_deletion(&name);
            }
            return;
        }

        self.open.push(OpenElement {
            name: tag.name.clone(),
            start_tag: cleaned,
            emitted,
            close_before: names_at(Anchor::EndBefore),
            close_after: names_at(Anchor::EndAfter),
        });
    }

    fn end_tag(&mut self, name: &str, raw: &str) {
        if is_marker_element(name) {
            return;
        }
        let Some(index) = self.open.iter().rposition(|e| e.name == name) else {
            // Stray end tag: passes through unless it sits in a deletion.
            self.emit_if_kept(raw);
            return;
        };

        // Elements above the match are closed implicitly.
        while self.open.len() > index + 1 {
            self.close_top(None);
        }
        self.close_top(Some(raw));
    }

    /// Pop the innermost open element, emitting `raw` as its end tag when
    /// its start tag made it into the output.
    fn close_top(&mut self, raw: Option<&str>) {
        let close_before = self
            .open
            .last_mut()
            .map(|e| std::mem::take(&mut e.close_before))
            .unwrap_or_default();
        // Closing here may revive the element itself, so it stays on the
        // stack until the range is closed.
        for name in &close_before {
            self.close_deletion(name);
        }
        let Some(element) = self.open.pop() else {
            return;
        };
        if let Some(raw) = raw
            && element.emitted
        {
            self.out.push_str(raw);
        }
        for name in &element.close_after {
            self.close_deletion(name);
        }
    }

    fn finish(mut self) -> Stripped {
        while !self.open.is_empty() {
            self.close_top(None);
        }
        Stripped {
            html: self.out,
            stats: self.stats,
        }
    }
}

/// Deletion names a start tag opens and closes, in the order the stripper
/// visits them.
#[derive(Debug, Default)]
struct DeletionBoundaries {
    starts: Vec<String>,
    ends: Vec<String>,
}

fn deletion_boundaries(tag: &StartTag<'_>) -> DeletionBoundaries {
    let mut boundaries = DeletionBoundaries::default();
    if is_marker_element(&tag.name) {
        let name = tag.attr("name").unwrap_or_default().trim();
        if is_deletion(name) {
            match tag.name.as_str() {
                SUGGESTION_START => boundaries.starts.push(name.to_string()),
                SUGGESTION_END => boundaries.ends.push(name.to_string()),
                _ => {}
            }
        }
        return boundaries;
    }

    let mut start_after = Vec::new();
    for attr in &tag.attrs {
        let Some(MarkerAttr::Suggestion { anchor, names }) =
            parse_marker_attr(&attr.name, attr.value)
        else {
            continue;
        };
        let names = names.into_iter().filter(|n| is_deletion(n));
        match anchor {
            Anchor::StartBefore => boundaries.starts.extend(names),
            Anchor::StartAfter => start_after.extend(names),
            Anchor::EndBefore | Anchor::EndAfter => boundaries.ends.extend(names),
        }
    }
    boundaries.starts.append(&mut start_after);
    boundaries
}

/// Decide for every deletion start whether a matching end follows it.
///
/// Each end closes at most one start, so a start placed after its end or
/// a second start reusing a closed name stays unclosable. Attribute ends
/// count from the tag carrying them, which is never before a start on the
/// same tag.
fn closable_deletion_starts(tokens: &[Token<'_>]) -> Vec<bool> {
    let mut starts: Vec<(usize, String)> = Vec::new();
    let mut ends: HashMap<String, VecDeque<usize>> = HashMap::new();
    for (index, token) in tokens.iter().enumerate() {
        let Token::Start(tag) = token else { continue };
        let boundaries = deletion_boundaries(tag);
        starts.extend(boundaries.starts.into_iter().map(|name| (index, name)));
        for name in boundaries.ends {
            ends.entry(name).or_default().push_back(index);
        }
    }

    starts
        .into_iter()
        .map(|(index, name)| {
            let Some(pending) = ends.get_mut(&name) else {
                return false;
            };
            while pending.front().is_some_and(|&end| end < index) {
                pending.pop_front();
            }
            pending.pop_front().is_some()
        })
        .collect()
}

/// Quick check for any collaboration marker text.
pub fn contains_collaboration_markup(html: &str) -> bool {
    ["comment-start", "comment-end", "suggestion-start", "suggestion-end"]
        .iter()
        .any(|marker| find_ascii_case_insensitive(html, marker).is_some())
}

/// Strip all comment and suggestion markup, accepting every suggestion.
pub fn strip_collaboration_markup(html: &str) -> String {
    strip_collaboration_markup_with_stats(html).html
}

/// Same as [`strip_collaboration_markup`], also reporting what was removed.
pub fn strip_collaboration_markup_with_stats(html: &str) -> Stripped {
    if !contains_collaboration_markup(html) {
        return Stripped {
            html: html.to_string(),
            stats: MarkupStats::default(),
        };
    }

    let tokens = tokenize(html);
    let mut stripper = Stripper::new(html.len(), closable_deletion_starts(&tokens));
    for token in &tokens {
        match token {
            Token::Text(text) | Token::Other(text) => stripper.emit_if_kept(text),
            Token::Start(tag) => stripper.start_tag(tag),
            Token::End { name, raw } => stripper.end_tag(name, raw),
        }
    }
    stripper.finish()
}
