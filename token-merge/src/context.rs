//! BM25 retrieval of key context for conflict spans.
//!
//! A throwaway index is built from the stable lines of a line-level merged
//! file. Lines between `<<<<<<<` and `>>>>>>>` are skipped so the answer
//! cannot leak into the context. Each indexed document holds the tokenized
//! (space-joined) form of one line, keyed by its 1-based line number.
//!
//! Each side of a conflict span is issued as its own query. Every query
//! token is quoted into an exact phrase, so punctuation-heavy code tokens
//! never reach the parser as operators. The phrases are OR-ed and scored
//! with BM25 (`k1 = 1.2`, `b = 0.75`; a phrase weighs the sum of its terms'
//! IDFs, as in Lucene). The top `k` documents are concatenated in rank order.

use std::collections::HashMap;

use thiserror::Error;

use crate::tokenizer::Tokenizer;
use crate::types::{ConflictRegionInfo, ContextResult, MARKER_OURS, MARKER_THEIRS};

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Returned for blank queries and queries that cannot be parsed.
pub const BLANK_CONTEXT: &str = " ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unterminated phrase starting at byte {0}")]
    UnterminatedPhrase(usize),
    #[error("query has no searchable terms")]
    Empty,
}

/// Lowercased runs of letters, digits and underscores.
pub fn analyze(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// One indexed line.
#[derive(Debug, Clone)]
pub struct ContextDocument {
    pub line: usize,
    pub content: String,
    terms: Vec<String>,
}

/// In-memory BM25 index over the stable lines of one merged file.
#[derive(Debug, Clone, Default)]
pub struct ContextIndex {
    docs: Vec<ContextDocument>,
    doc_freq: HashMap<String, usize>,
    avg_doc_len: f64,
}

impl ContextIndex {
    /// Index every line of `merged` that lies outside a conflict block.
    pub fn from_merged_file(merged: &str, tokenizer: &Tokenizer) -> Self {
        let mut lines = Vec::new();
        let mut in_conflict = false;
        for (idx, line) in merged.lines().enumerate() {
            if line.starts_with(MARKER_OURS) {
                in_conflict = true;
                continue;
            }
            if line.starts_with(MARKER_THEIRS) {
                in_conflict = false;
                continue;
            }
            if !in_conflict {
                lines.push((idx + 1, line));
            }
        }
        Self::build(lines, tokenizer)
    }

    /// Index `(line_number, raw_line)` pairs. Each line is tokenized first.
    pub fn build<'a>(
        lines: impl IntoIterator<Item = (usize, &'a str)>,
        tokenizer: &Tokenizer,
    ) -> Self {
        let docs: Vec<ContextDocument> = lines
            .into_iter()
            .map(|(line, raw)| {
                let content = tokenizer.tokenize_to_string(raw);
                let terms = analyze(&content);
                ContextDocument {
                    line,
                    content,
                    terms,
                }
            })
            .collect();

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;
        for doc in &docs {
            total_len += doc.terms.len();
            let mut seen: Vec<&String> = doc.terms.iter().collect();
            seen.sort();
            seen.dedup();
            for term in seen {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }
        let avg_doc_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / docs.len() as f64
        };

        Self {
            docs,
            doc_freq,
            avg_doc_len,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn documents(&self) -> &[ContextDocument] {
        &self.docs
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Rank documents for a parsed query. Ties keep line order.
    pub fn search(&self, query: &Query, top_k: usize) -> Vec<(&ContextDocument, f64)> {
        let weights: Vec<f64> = query
            .phrases
            .iter()
            .map(|p| p.iter().map(|t| self.idf(t)).sum())
            .collect();

        let mut scored: Vec<(&ContextDocument, f64)> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let score = self.score_doc(doc, query, &weights);
                (score > 0.0).then_some((doc, score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.line.cmp(&b.0.line))
        });
        scored.truncate(top_k);
        scored
    }

    fn score_doc(&self, doc: &ContextDocument, query: &Query, weights: &[f64]) -> f64 {
        if doc.terms.is_empty() || self.avg_doc_len == 0.0 {
            return 0.0;
        }
        let norm = 1.0 - B + B * (doc.terms.len() as f64 / self.avg_doc_len);
        query
            .phrases
            .iter()
            .zip(weights)
            .map(|(phrase, weight)| {
                let freq = phrase_freq(&doc.terms, phrase) as f64;
                if freq > 0.0 {
                    weight * (freq * (K1 + 1.0)) / (freq + K1 * norm)
                } else {
                    0.0
                }
            })
            .sum()
    }

    /// Retrieve context for one query string.
    ///
    /// Blank queries and unparseable queries yield [`BLANK_CONTEXT`].
    pub fn retrieve(&self, query_text: &str, top_k: usize) -> String {
        if query_text.trim().is_empty() {
            return BLANK_CONTEXT.to_string();
        }
        let query = match Query::parse(&quote_tokens(query_text)) {
            Ok(q) => q,
            Err(e) => {
                tracing::debug!(error = %e, "context query rejected");
                return BLANK_CONTEXT.to_string();
            }
        };
        let hits = self.search(&query, top_k);
        let contents: Vec<&str> = hits.iter().map(|(doc, _)| doc.content.as_str()).collect();
        contents.join(" ")
    }

    /// Retrieve ours/base/theirs context for every conflict span.
    pub fn retrieve_all(&self, info: &[ConflictRegionInfo], top_k: usize) -> Vec<ContextResult> {
        info.iter()
            .map(|region| ContextResult {
                ordinal: region.ordinal,
                ours: self.retrieve(&region.ours, top_k),
                base: self.retrieve(&region.base, top_k),
                theirs: self.retrieve(&region.theirs, top_k),
            })
            .collect()
    }
}

/// Number of positions where `phrase` occurs contiguously in `terms`.
fn phrase_freq(terms: &[String], phrase: &[String]) -> usize {
    if phrase.is_empty() || phrase.len() > terms.len() {
        return 0;
    }
    terms.windows(phrase.len()).filter(|w| *w == phrase).count()
}

/// Wrap every whitespace-separated token in double quotes, escaping quotes
/// and backslashes inside it.
pub fn quote_tokens(text: &str) -> String {
    let mut out = String::new();
    for token in text.split_whitespace() {
        out.push('"');
        for c in token.chars() {
            if c == '"' || c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
    }
    out
}

/// A disjunction of exact phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    phrases: Vec<Vec<String>>,
}

impl Query {
    /// Parse quoted phrases and bare words. Phrases whose text analyzes to
    /// no terms are dropped; a query left with nothing is an error.
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let mut phrases = Vec::new();
        let mut chars = input.char_indices().peekable();

        while let Some((start, c)) = chars.next() {
            if c == '"' {
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => text.push(c),
                    }
                }
                if !closed {
                    return Err(QueryError::UnterminatedPhrase(start));
                }
                phrases.push(analyze(&text));
            } else if !c.is_whitespace() {
                let mut word = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_whitespace() || next == '"' {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                phrases.extend(analyze(&word).into_iter().map(|t| vec![t]));
            }
        }

        phrases.retain(|p| !p.is_empty());
        if phrases.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(Self { phrases })
    }

    pub fn phrases(&self) -> &[Vec<String>] {
        &self.phrases
    }
}
