//! Colour-coded annotation of log text.
//!
//! Text is split into spans, each either plain or tagged with one highlight
//! category. The leftmost match wins; at the same position the category with
//! the higher priority wins (error > warning > special > success), then the
//! longer word. Matching is case-insensitive.

use crate::config::HighlightWords;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Error,
    Warning,
    Special,
    Success,
}

impl Category {
    pub fn css_class(self) -> &'static str {
        match self {
            Category::Error => "hl-error",
            Category::Warning => "hl-warning",
            Category::Special => "hl-special",
            Category::Success => "hl-success",
        }
    }
}

/// A slice of the highlighted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span<'a> {
    pub kind: Option<Category>,
    pub text: &'a str,
}

impl Span<'_> {
    pub fn to_owned_span(&self) -> OwnedSpan {
        OwnedSpan {
            kind: self.kind,
            text: self.text.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedSpan {
    pub kind: Option<Category>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Highlighter {
    /// Sorted by category priority, then longest word first.
    words: Vec<(Category, String)>,
}

impl Highlighter {
    pub fn new(words: &HighlightWords) -> Self {
        let mut all = Vec::new();
        for (category, list) in [
            (Category::Error, &words.error),
            (Category::Warning, &words.warning),
            (Category::Special, &words.special),
            (Category::Success, &words.success),
        ] {
            all.extend(
                list.iter()
                    .filter(|w| !w.is_empty())
                    .map(|w| (category, w.clone())),
            );
        }
        all.sort_by(|(ca, wa), (cb, wb)| ca.cmp(cb).then(wb.chars().count().cmp(&wa.chars().count())));
        Self { words: all }
    }

    /// Lazily splits `text` into spans. The iterator can be cloned to restart.
    pub fn highlight<'a>(&'a self, text: &'a str) -> Spans<'a> {
        Spans {
            highlighter: self,
            text,
            pos: 0,
            pending: None,
        }
    }

    /// HTML with tagged spans wrapped in `<span class="hl-…">`.
    pub fn render_html(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for span in self.highlight(text) {
            match span.kind {
                Some(kind) => {
                    out.push_str("<span class=\"");
                    out.push_str(kind.css_class());
                    out.push_str("\">");
                    html_escape::encode_safe_to_string(span.text, &mut out);
                    out.push_str("</span>");
                }
                None => {
                    html_escape::encode_safe_to_string(span.text, &mut out);
                }
            }
        }
        out
    }

    /// Earliest match at or after `from`: (start, end, category).
    fn next_match(&self, text: &str, from: usize) -> Option<(usize, usize, Category)> {
        if self.words.is_empty() {
            return None;
        }
        for (offset, _) in text[from..].char_indices() {
            let start = from + offset;
            let rest = &text[start..];
            for (category, word) in &self.words {
                if let Some(len) = match_len(rest, word) {
                    return Some((start, start + len, *category));
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct Spans<'a> {
    highlighter: &'a Highlighter,
    text: &'a str,
    pos: usize,
    pending: Option<Span<'a>>,
}

impl<'a> Iterator for Spans<'a> {
    type Item = Span<'a>;

    fn next(&mut self) -> Option<Span<'a>> {
        if let Some(span) = self.pending.take() {
            return Some(span);
        }
        if self.pos >= self.text.len() {
            return None;
        }

        match self.highlighter.next_match(self.text, self.pos) {
            Some((start, end, category)) => {
                let tagged = Span {
                    kind: Some(category),
                    text: &self.text[start..end],
                };
                let plain = &self.text[self.pos..start];
                self.pos = end;
                if plain.is_empty() {
                    Some(tagged)
                } else {
                    self.pending = Some(tagged);
                    Some(Span {
                        kind: None,
                        text: plain,
                    })
                }
            }
            None => {
                let plain = &self.text[self.pos..];
                self.pos = self.text.len();
                Some(Span {
                    kind: None,
                    text: plain,
                })
            }
        }
    }
}

/// Byte length of the prefix of `haystack` equal to `needle`, ignoring case.
fn match_len(haystack: &str, needle: &str) -> Option<usize> {
    let mut hay = haystack.char_indices();
    for n in needle.chars() {
        let (_, h) = hay.next()?;
        if !h.to_lowercase().eq(n.to_lowercase()) {
            return None;
        }
    }
    Some(hay.next().map(|(i, _)| i).unwrap_or(haystack.len()))
}
