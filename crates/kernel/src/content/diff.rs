//! HTML document diffing and change-context extraction.
//!
//! Both documents are split into tags, words and whitespace runs; tags
//! are compared as single units and never split. The highlighted output
//! carries exactly the new document's tags, with removed text wrapped in
//! `<del>` and inserted text wrapped in `<ins>`, so it is as balanced as
//! the new document itself.
//!
//! Collaboration markup is stripped from both sides first, otherwise every
//! comment marker the editor moved would show up as a change.

use std::ops::Range;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;
use similar::{Algorithm, DiffTag};

use super::collab_markup::strip_collaboration_markup;

/// Default number of context words shown around a change.
pub const DEFAULT_CONTEXT_WORDS: usize = 3;

/// Default separator placed between context snippets.
pub const DEFAULT_SNIPPET_SEPARATOR: &str = " <span class=\"diff-separator\">[…]</span> ";

/// Marker for context that was cut short.
const ELLIPSIS: &str = "…";

/// Time after which the diff settles for a coarser, still valid, result.
const DIFF_DEADLINE: Duration = Duration::from_secs(2);

const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";

/// Tags, whitespace runs, words and stray `<`. HTML comments are read by
/// [`tokenize`] itself. No alternative crosses a `<`, so every match ends
/// at the next tag opener at the latest.
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static DIFF_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:<[^<>]*>|\s+|[^<\s]+|<)").expect("valid regex literal")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Tag,
    Space,
    Word,
}

fn token_kind(token: &str) -> TokenKind {
    if token.len() > 1 && token.starts_with('<') && token.ends_with('>') {
        TokenKind::Tag
    } else if token.chars().all(char::is_whitespace) {
        TokenKind::Space
    } else {
        TokenKind::Word
    }
}

fn tokenize(html: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = html;
    // Once a comment has no terminator, no later one has either.
    let mut comments_close = true;

    while !rest.is_empty() {
        let mut len = 0;
        if comments_close && rest.starts_with(COMMENT_OPEN) {
            match rest[COMMENT_OPEN.len()..].find(COMMENT_CLOSE) {
                Some(offset) => len = COMMENT_OPEN.len() + offset + COMMENT_CLOSE.len(),
                None => comments_close = false,
            }
        }
        if len == 0 {
            len = DIFF_TOKEN.find(rest).map_or(rest.len(), |m| m.end());
        }
        let (token, tail) = rest.split_at(len);
        tokens.push(token);
        rest = tail;
    }
    tokens
}

/// Visible text of a token run, whitespace collapsed.
fn text_of(tokens: &[&str]) -> String {
    tokens
        .iter()
        .filter(|t| token_kind(t) == TokenKind::Word)
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Kind of a single change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Delete,
    Replace,
}

/// A textual change between two documents.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub kind: ChangeKind,
    /// Text removed from the old document.
    pub removed: String,
    /// Text added in the new document.
    pub inserted: String,
    /// Position of the change in the new document's word list.
    #[serde(skip)]
    words_at: Range<usize>,
}

/// Words surrounding a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeContext {
    pub before: String,
    pub after: String,
    /// Context was cut short before the change.
    pub truncated_before: bool,
    /// Context was cut short after the change.
    pub truncated_after: bool,
}

/// Result of diffing two HTML documents.
#[derive(Debug, Clone)]
pub struct DiffResult {
    html: String,
    changes: Vec<Change>,
    new_words: Vec<String>,
    identical: bool,
}

impl DiffResult {
    /// Highlighted diff HTML.
    pub fn html(&self) -> &str {
        &self.html
    }

    /// All textual changes, in document order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Whether the documents differ at all, markup included.
    pub fn has_changes(&self) -> bool {
        !self.identical
    }

    /// Text fragments that were added in the new document.
    pub fn added_content(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.kind != ChangeKind::Delete && !c.inserted.is_empty())
            .map(|c| c.inserted.as_str())
            .collect()
    }

    /// Up to `words` words on each side of `change`, taken from the new
    /// document.
    pub fn context(&self, change: &Change, words: usize) -> ChangeContext {
        let Range { start, end } = change.words_at.clone();
        let before_start = start.saturating_sub(words);
        let after_end = end.saturating_add(words).min(self.new_words.len());
        ChangeContext {
            before: self.new_words[before_start..start].join(" "),
            after: self.new_words[end..after_end].join(" "),
            truncated_before: before_start > 0,
            truncated_after: after_end < self.new_words.len(),
        }
    }

    /// One HTML snippet per change: context, removed text in `<del>`,
    /// inserted text in `<ins>`.
    pub fn context_snippets(&self, words: usize) -> Vec<String> {
        self.changes
            .iter()
            .map(|change| {
                let context = self.context(change, words);
                let mut parts: Vec<String> = Vec::new();
                if context.truncated_before {
                    parts.push(ELLIPSIS.to_string());
                }
                if !context.before.is_empty() {
                    parts.push(context.before);
                }
                if !change.removed.is_empty() {
                    parts.push(format!("<del>{}</del>", change.removed));
                }
                if !change.inserted.is_empty() {
                    parts.push(format!("<ins>{}</ins>", change.inserted));
                }
                if !context.after.is_empty() {
                    parts.push(context.after);
                }
                if context.truncated_after {
                    parts.push(ELLIPSIS.to_string());
                }
                parts.join(" ")
            })
            .collect()
    }
}

/// Join snippets with a visual separator, skipping empty ones.
pub fn join_snippets<S: AsRef<str>>(snippets: &[S], separator: &str) -> String {
    snippets
        .iter()
        .map(AsRef::as_ref)
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// HTML differ.
#[derive(Debug, Clone, Copy)]
pub struct HtmlDiff {
    strip_markup: bool,
}

impl Default for HtmlDiff {
    fn default() -> Self {
        Self { strip_markup: true }
    }
}

impl HtmlDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the documents as stored, collaboration markup included.
    pub fn keep_markup(mut self) -> Self {
        self.strip_markup = false;
        self
    }

    /// Diff two documents. Never fails: malformed markup is compared as
    /// whatever tokens it splits into.
    pub fn diff(&self, old: &str, new: &str) -> DiffResult {
        let (old, new) = if self.strip_markup {
            (
                strip_collaboration_markup(old),
                strip_collaboration_markup(new),
            )
        } else {
            (old.to_string(), new.to_string())
        };

        let old_tokens = tokenize(&old);
        let new_tokens = tokenize(&new);
        let ops = similar::capture_diff_slices_deadline(
            Algorithm::Myers,
            &old_tokens,
            &new_tokens,
            Some(Instant::now() + DIFF_DEADLINE),
        );

        // Word index of every new-document token boundary.
        let mut word_index = Vec::with_capacity(new_tokens.len() + 1);
        let mut new_words = Vec::new();
        for token in &new_tokens {
            word_index.push(new_words.len());
            if token_kind(token) == TokenKind::Word {
                new_words.push((*token).to_string());
            }
        }
        word_index.push(new_words.len());

        let mut html = String::with_capacity(new.len() + new.len() / 4);
        let mut changes = Vec::new();
        let mut identical = true;

        for op in &ops {
            let (tag, old_range, new_range) = op.as_tag_tuple();
            let removed = &old_tokens[old_range];
            let inserted = &new_tokens[new_range.clone()];
            match tag {
                DiffTag::Equal => {
                    for token in inserted {
                        html.push_str(token);
                    }
                    continue;
                }
                DiffTag::Delete | DiffTag::Insert | DiffTag::Replace => identical = false,
            }

            render_run(&mut html, removed, "del", "diffdel", false);
            render_run(&mut html, inserted, "ins", "diffins", true);

            let removed_text = text_of(removed);
            let inserted_text = text_of(inserted);
            let kind = match (removed_text.is_empty(), inserted_text.is_empty()) {
                // Markup-only change: visible in the HTML, not in the text.
                (true, true) => continue,
                (false, true) => ChangeKind::Delete,
                (true, false) => ChangeKind::Insert,
                (false, false) => ChangeKind::Replace,
            };
            changes.push(Change {
                kind,
                removed: removed_text,
                inserted: inserted_text,
                words_at: word_index[new_range.start]..word_index[new_range.end],
            });
        }

        DiffResult {
            html,
            changes,
            new_words,
            identical,
        }
    }
}

/// Emit a changed token run, wrapping text in `<{element}>`.
///
/// Tags of the new document are kept (outside the wrapper); tags of the old
/// document are dropped so the output follows the new structure.
fn render_run(out: &mut String, tokens: &[&str], element: &str, class: &str, keep_tags: bool) {
    let mut open = false;
    for token in tokens {
        match token_kind(token) {
            TokenKind::Tag => {
                if open {
                    out.push_str(&format!("</{element}>"));
                    open = false;
                }
                if keep_tags {
                    out.push_str(token);
                }
            }
            TokenKind::Space if !open => out.push_str(token),
            TokenKind::Space | TokenKind::Word => {
                if !open {
                    out.push_str(&format!("<{element} class=\"{class}\">"));
                    open = true;
                }
                out.push_str(token);
            }
        }
    }
    if open {
        out.push_str(&format!("</{element}>"));
    }
}
