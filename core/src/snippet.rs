use crate::error::{Result, SearchError};
use crate::index::DocumentRecord;
use crate::profile::ContentDomain;
use crate::query::CacheStrategy;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::path::PathBuf;
use url::Url;

const WINDOW_BEFORE: usize = 100;
const WINDOW_AFTER: usize = 200;

/// A line of document text around the first query word match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextSnippet {
    /// The extracted text as found in the document.
    pub line: String,
    /// `line` with query words wrapped in `<em>`.
    pub highlighted: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaSnippet {
    pub domain: ContentDomain,
    pub href: Url,
    pub name: String,
    pub ranking: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snippet {
    Text(TextSnippet),
    Media(Vec<MediaSnippet>),
}

/// Produces snippet or media content for a resolved document.
pub trait SnippetLoader: Send + Sync {
    fn fetch_snippet(&self, record: &DocumentRecord, words: &[String], domain: ContentDomain, strategy: CacheStrategy) -> Result<Snippet>;
}

/// Loader reading the full texts the indexer stored next to the index.
#[derive(Debug, Clone)]
pub struct TextFileLoader {
    root: PathBuf,
}

impl TextFileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self { TextFileLoader { root: root.into() } }

    fn text_snippet(&self, record: &DocumentRecord, words: &[String], strategy: CacheStrategy) -> Result<TextSnippet> {
        let rel = record.text_path.as_ref().ok_or_else(|| SearchError::Snippet(format!("no text stored for {}", record.id)))?;
        let text = std::fs::read_to_string(self.root.join(rel))?;
        if text.trim().is_empty() {
            return Err(SearchError::Snippet(format!("empty text for {}", record.id)));
        }
        let patterns = word_patterns(words)?;
        let first = patterns.iter().find_map(|p| p.find(&text)).map(|m| m.start());
        let line = match first {
            Some(idx) => {
                let start = floor_boundary(&text, idx.saturating_sub(WINDOW_BEFORE));
                let end = ceil_boundary(&text, (idx + WINDOW_AFTER).min(text.len()));
                text[start..end].trim().to_string()
            }
            None if strategy == CacheStrategy::FetchAndVerify => {
                return Err(SearchError::Snippet(format!("no query word in {}", record.url)));
            }
            None => text.chars().take(WINDOW_AFTER).collect::<String>().trim().to_string(),
        };
        let highlighted = highlight_terms(&line, &patterns);
        Ok(TextSnippet { line, highlighted })
    }
}

impl SnippetLoader for TextFileLoader {
    fn fetch_snippet(&self, record: &DocumentRecord, words: &[String], domain: ContentDomain, strategy: CacheStrategy) -> Result<Snippet> {
        if domain.is_media() {
            let media = media_snippets(record, words, domain);
            if media.is_empty() {
                return Err(SearchError::Snippet(format!("no {domain} links in {}", record.url)));
            }
            return Ok(Snippet::Media(media));
        }
        self.text_snippet(record, words, strategy).map(Snippet::Text)
    }
}

/// Media links of `domain` in `record`, ranked by how many query words their
/// label or url carries.
pub fn media_snippets(record: &DocumentRecord, words: &[String], domain: ContentDomain) -> Vec<MediaSnippet> {
    let lowered: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    record
        .media
        .iter()
        .filter(|m| m.domain == domain)
        .map(|m| {
            let label = m.label.to_lowercase();
            let href = m.url.as_str().to_lowercase();
            let hits = lowered.iter().filter(|w| label.contains(w.as_str()) || href.contains(w.as_str())).count() as i64;
            let name = if m.label.is_empty() { m.url.path().rsplit('/').next().unwrap_or_default().to_string() } else { m.label.clone() };
            MediaSnippet { domain, href: m.url.clone(), name, ranking: (hits << 8) + (255 - (m.url.as_str().len() as i64).min(255)) }
        })
        .collect()
}

fn word_patterns(words: &[String]) -> Result<Vec<Regex>> {
    let mut patterns = Vec::with_capacity(words.len());
    for w in words.iter().map(|w| w.trim()).filter(|w| !w.is_empty()) {
        patterns.push(RegexBuilder::new(&regex::escape(w)).case_insensitive(true).build()?);
    }
    Ok(patterns)
}

fn highlight_terms(snippet: &str, patterns: &[Regex]) -> String {
    let mut s = snippet.to_string();
    for pat in patterns {
        s = pat.replace_all(&s, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string();
    }
    s
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
