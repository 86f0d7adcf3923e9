// In: src/reader/search.rs

//! Keyword and title-suggestion search over finished archives.
//!
//! Full-text search reads the index data the creator stored with each item
//! when indexing was enabled. Suggestions match title words by prefix and
//! need no index beyond the archive's title ordering. Both search eagerly:
//! a [`Search`] holds every hit, and result sets are windows onto it.

use std::fmt;
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::writer::item::GeoPosition;

use super::{Archive, Entry};

/// Mean Earth radius, in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Words of context kept around the first match in a snippet.
const SNIPPET_WORDS: usize = 24;

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn count_term(tokens: &[String], term: &str) -> u32 {
    tokens.iter().filter(|t| t.as_str() == term).count() as u32
}

/// Rebuilds `text` word by word, bolding the words `hit` accepts.
fn highlight(words: &[&str], hit: impl Fn(&str) -> bool) -> String {
    words
        .iter()
        .map(|w| {
            if tokenize(w).iter().any(|t| hit(t.as_str())) {
                format!("<b>{}</b>", w)
            } else {
                w.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

//==================================================================================
// I. Query
//==================================================================================

/// A circle on the globe, `distance` in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRange {
    pub latitude: f64,
    pub longitude: f64,
    pub distance: f64,
}

impl GeoRange {
    pub fn contains(&self, position: &GeoPosition) -> bool {
        let (lat1, lat2) = (self.latitude.to_radians(), position.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (position.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let meters = 2.0 * EARTH_RADIUS_M * a.sqrt().asin();
        meters <= self.distance
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub query: String,
    pub georange: Option<GeoRange>,
}

impl Query {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            georange: None,
        }
    }

    pub fn set_query(&mut self, query: impl Into<String>) -> &mut Self {
        self.query = query.into();
        self
    }

    pub fn set_georange(&mut self, latitude: f64, longitude: f64, distance: f64) -> &mut Self {
        self.georange = Some(GeoRange {
            latitude,
            longitude,
            distance,
        });
        self
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query)
    }
}

//==================================================================================
// II. Full-text search
//==================================================================================

/// One full-text hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    entry: Arc<Entry>,
    score: u32,
    snippet: String,
    word_count: u32,
    file_index: u32,
    zim_id: String,
}

impl SearchResult {
    pub fn entry(&self) -> &Arc<Entry> {
        &self.entry
    }

    pub fn path(&self) -> &str {
        self.entry.path()
    }

    pub fn title(&self) -> &str {
        self.entry.title()
    }

    /// Relevance from 0 to 100, relative to the best hit of the search.
    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    pub fn word_count(&self) -> u32 {
        self.word_count
    }

    /// Position of the hit's archive in the searcher.
    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    /// UUID of the hit's archive.
    pub fn zim_id(&self) -> &str {
        &self.zim_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchResultSet {
    results: Vec<SearchResult>,
}

impl SearchResultSet {
    pub fn size(&self) -> usize {
        self.results.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SearchResult> {
        self.results.iter()
    }
}

impl IntoIterator for SearchResultSet {
    type Item = SearchResult;
    type IntoIter = std::vec::IntoIter<SearchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// A query run against a [`Searcher`]'s archives, best hits first.
#[derive(Debug, Clone)]
pub struct Search {
    query: Query,
    hits: Vec<SearchResult>,
}

impl Search {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn get_estimated_matches(&self) -> usize {
        self.hits.len()
    }

    pub fn get_results(&self, start: usize, max_results: usize) -> SearchResultSet {
        SearchResultSet {
            results: self.hits.iter().skip(start).take(max_results).cloned().collect(),
        }
    }
}

/// Runs full-text queries over one or more archives.
pub struct Searcher {
    archives: Vec<Arc<Archive>>,
    verbose: bool,
}

impl Searcher {
    pub fn new(archive: Arc<Archive>) -> Self {
        Self {
            archives: vec![archive],
            verbose: false,
        }
    }

    pub fn from_archives(archives: Vec<Arc<Archive>>) -> Result<Self> {
        if archives.is_empty() {
            return Err(BridgeError::CallerError(
                "a searcher needs at least one archive".to_string(),
            ));
        }
        Ok(Self {
            archives,
            verbose: false,
        })
    }

    pub fn add_archive(&mut self, archive: Arc<Archive>) -> &mut Self {
        self.archives.push(archive);
        self
    }

    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    pub fn archive_count(&self) -> usize {
        self.archives.len()
    }

    /// Archives without a full-text index are skipped; it is an error if none
    /// has one. Every query word must occur in a hit.
    pub fn search(&self, query: &Query) -> Result<Search> {
        if !self.archives.iter().any(|a| a.has_fulltext_index()) {
            return Err(BridgeError::CallerError(
                "no archive in this searcher has a full-text index".to_string(),
            ));
        }
        let terms = tokenize(&query.query);
        let mut hits = Vec::new();
        if terms.is_empty() && query.georange.is_none() {
            return Ok(Search {
                query: query.clone(),
                hits,
            });
        }

        for (file_index, archive) in self.archives.iter().enumerate() {
            if !archive.has_fulltext_index() {
                continue;
            }
            let zim_id = archive.uuid_string();
            for entry in archive.entries() {
                let Some(item) = entry.item() else {
                    continue;
                };
                let Some(index) = item.index_data() else {
                    continue;
                };
                if let Some(range) = &query.georange {
                    match &index.position {
                        Some(position) if range.contains(position) => {}
                        _ => continue,
                    }
                }

                let title = tokenize(if index.title.is_empty() { entry.title() } else { index.title.as_str() });
                let content = tokenize(&index.content);
                let keywords = tokenize(&index.keywords);
                let mut score = 0u32;
                let mut all_found = true;
                for term in &terms {
                    let weight = 3 * count_term(&title, term)
                        + 2 * count_term(&keywords, term)
                        + count_term(&content, term);
                    if weight == 0 {
                        all_found = false;
                        break;
                    }
                    score += weight;
                }
                if !all_found {
                    continue;
                }

                hits.push(SearchResult {
                    entry: Arc::clone(entry),
                    score: score.max(1),
                    snippet: content_snippet(&index.content, &terms),
                    word_count: index.word_count,
                    file_index: file_index as u32,
                    zim_id: zim_id.clone(),
                });
            }
        }

        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path().cmp(b.path())));
        let best = hits.first().map(|h| h.score).unwrap_or(1);
        for hit in &mut hits {
            hit.score = hit.score * 100 / best;
        }
        if self.verbose {
            log::info!("search '{}' matched {} entries", query, hits.len());
        }
        log_metric!("event" = "search", "query" = &query.query, "hits" = &hits.len());
        Ok(Search {
            query: query.clone(),
            hits,
        })
    }
}

impl fmt::Debug for Searcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Searcher")
            .field("archives", &self.archives.len())
            .field("verbose", &self.verbose)
            .finish()
    }
}

/// A window of the content around the first matching word.
fn content_snippet(content: &str, terms: &[String]) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let is_hit = |t: &str| terms.iter().any(|term| term.as_str() == t);
    let first = words
        .iter()
        .position(|w| tokenize(w).iter().any(|t| is_hit(t.as_str())))
        .unwrap_or(0);
    let start = first.saturating_sub(SNIPPET_WORDS / 4);
    let end = (start + SNIPPET_WORDS).min(words.len());
    highlight(&words[start..end], is_hit)
}

//==================================================================================
// III. Suggestions
//==================================================================================

#[derive(Debug, Clone)]
pub struct SuggestionItem {
    entry: Arc<Entry>,
    snippet: String,
}

impl SuggestionItem {
    pub fn entry(&self) -> &Arc<Entry> {
        &self.entry
    }

    pub fn path(&self) -> &str {
        self.entry.path()
    }

    pub fn title(&self) -> &str {
        self.entry.title()
    }

    /// The title with the matched words in `<b>`.
    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    pub fn has_snippet(&self) -> bool {
        self.snippet != self.entry.title()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuggestionResultSet {
    results: Vec<SuggestionItem>,
}

impl SuggestionResultSet {
    pub fn size(&self) -> usize {
        self.results.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SuggestionItem> {
        self.results.iter()
    }
}

impl IntoIterator for SuggestionResultSet {
    type Item = SuggestionItem;
    type IntoIter = std::vec::IntoIter<SuggestionItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

#[derive(Debug, Clone)]
pub struct SuggestionSearch {
    hits: Vec<SuggestionItem>,
}

impl SuggestionSearch {
    pub fn get_estimated_matches(&self) -> usize {
        self.hits.len()
    }

    pub fn get_results(&self, start: usize, max_results: usize) -> SuggestionResultSet {
        SuggestionResultSet {
            results: self.hits.iter().skip(start).take(max_results).cloned().collect(),
        }
    }
}

/// Title suggestions for one archive.
pub struct SuggestionSearcher {
    archive: Arc<Archive>,
    verbose: bool,
}

impl SuggestionSearcher {
    pub fn new(archive: Arc<Archive>) -> Self {
        Self {
            archive,
            verbose: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    /// Entries whose title has a word starting with each word of `text`.
    /// Titles that start with the whole text come first, then title order.
    pub fn suggest(&self, text: &str) -> SuggestionSearch {
        let terms = tokenize(text);
        let needle = text.trim().to_lowercase();
        let mut leading = Vec::new();
        let mut others = Vec::new();
        if !terms.is_empty() {
            for entry in self.archive.iter_by_title() {
                let title_words = tokenize(entry.title());
                let matched = terms
                    .iter()
                    .all(|term| title_words.iter().any(|w| w.starts_with(term.as_str())));
                if !matched {
                    continue;
                }
                let words: Vec<&str> = entry.title().split_whitespace().collect();
                let snippet = highlight(&words, |t| terms.iter().any(|term| t.starts_with(term.as_str())));
                let hit = SuggestionItem {
                    snippet,
                    entry: Arc::clone(&entry),
                };
                if entry.title().to_lowercase().starts_with(&needle) {
                    leading.push(hit);
                } else {
                    others.push(hit);
                }
            }
        }
        leading.extend(others);
        if self.verbose {
            log::info!("suggestions for '{}': {}", text, leading.len());
        }
        SuggestionSearch { hits: leading }
    }
}

impl fmt::Debug for SuggestionSearcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuggestionSearcher")
            .field("archive", &self.archive)
            .field("verbose", &self.verbose)
            .finish()
    }
}
