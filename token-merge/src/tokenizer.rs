//! Token-level lexing of conflict sides.
//!
//! The primary lexer parses the text with the tree-sitter grammar of the
//! configured language and emits the leaves of the concrete syntax tree in
//! source order. String literals, character literals and comments are kept
//! whole. Every newline in the source (between leaves or inside a kept-whole
//! leaf) becomes a [`Token::LineBreak`], so the line layout can be rebuilt
//! after merging.
//!
//! Conflict chunks are usually fragments rather than complete compilation
//! units, so the grammar often reports syntax errors. In that case, or when
//! no language is configured, the text is lexed with a Unicode
//! character-class tokenizer instead. The fallback is total: runs of
//! letters, marks and digits form one token, and every other visible
//! character is a token of its own.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::types::{Language, Lexer, Token, TokenStream, is_marker_line};

/// Reasons the grammar lexer rejects an input. Never surfaced to callers of
/// [`Tokenizer::tokenize`], which falls back instead.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("language error: {0}")]
    Language(String),
    #[error("parse failed")]
    ParseFailed,
    #[error("syntax tree contains errors")]
    Syntax,
    #[error("token collides with a conflict marker: {0}")]
    MarkerToken(String),
}

/// Lexes text into token streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokenizer {
    language: Option<Language>,
}

impl Tokenizer {
    /// `None` lexes everything with the Unicode rules.
    pub fn new(language: Option<Language>) -> Self {
        Self { language }
    }

    pub fn language(&self) -> Option<Language> {
        self.language
    }

    /// Tokenize `text`, keeping newlines as line-break tokens.
    pub fn tokenize(&self, text: &str) -> TokenStream {
        let text = normalize_newlines(text);
        if let Some(lang) = self.language {
            match lex_with_grammar(&text, lang) {
                Ok(tokens) => return TokenStream::new(tokens, Lexer::Grammar(lang)),
                Err(e) => {
                    tracing::debug!(language = ?lang, error = %e, "grammar lexing failed, using unicode tokenizer");
                }
            }
        }
        TokenStream::new(tokenize_unicode(&text), Lexer::Unicode)
    }

    /// Space-joined token text with line breaks dropped.
    ///
    /// This is the form that index documents and queries are built from.
    pub fn tokenize_to_string(&self, text: &str) -> String {
        let stream = self.tokenize(text);
        let words: Vec<&str> = stream.tokens().iter().filter_map(Token::as_text).collect();
        words.join(" ")
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Lex with tree-sitter, failing on any syntax error.
pub fn lex_with_grammar(source: &str, lang: Language) -> Result<Vec<Token>, LexError> {
    let ts_lang = get_tree_sitter_language(lang);
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&ts_lang)
        .map_err(|e| LexError::Language(e.to_string()))?;

    let tree = parser.parse(source, None).ok_or(LexError::ParseFailed)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(LexError::Syntax);
    }

    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut cursor = 0usize;
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if node.child_count() > 0 && !is_atomic_kind(node.kind()) {
            for i in (0..node.child_count()).rev() {
                if let Some(child) = node.child(i) {
                    stack.push(child);
                }
            }
            continue;
        }

        let start = node.start_byte().max(cursor);
        let end = node.end_byte();
        if end <= start {
            continue;
        }
        push_line_breaks(&mut tokens, &bytes[cursor..start]);
        let text = node.utf8_text(bytes).map_err(|_| LexError::ParseFailed)?;
        push_leaf(&mut tokens, text)?;
        cursor = end;
    }
    push_line_breaks(&mut tokens, &bytes[cursor.min(bytes.len())..]);

    Ok(tokens)
}

fn push_line_breaks(tokens: &mut Vec<Token>, gap: &[u8]) {
    for _ in gap.iter().filter(|&&b| b == b'\n') {
        tokens.push(Token::LineBreak);
    }
}

/// Push one leaf, splitting it at embedded newlines.
fn push_leaf(tokens: &mut Vec<Token>, text: &str) -> Result<(), LexError> {
    for (i, piece) in text.split('\n').enumerate() {
        if i > 0 {
            tokens.push(Token::LineBreak);
        }
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if is_marker_line(piece) {
            return Err(LexError::MarkerToken(piece.to_string()));
        }
        tokens.push(Token::text(piece));
    }
    Ok(())
}

/// Node kinds emitted as a single token even though the grammar gives them
/// children.
fn is_atomic_kind(kind: &str) -> bool {
    kind.contains("string")
        || kind.contains("comment")
        || kind == "character_literal"
        || kind == "char_literal"
        || kind == "text_block"
}

/// Get the tree-sitter Language object for a given language.
fn get_tree_sitter_language(lang: Language) -> tree_sitter::Language {
    let lang_ref = match lang {
        Language::Rust => tree_sitter_rust::LANGUAGE,
        Language::JavaScript => tree_sitter_javascript::LANGUAGE,
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
        Language::Python => tree_sitter_python::LANGUAGE,
        Language::Java => tree_sitter_java::LANGUAGE,
        Language::Go => tree_sitter_go::LANGUAGE,
        Language::C => tree_sitter_c::LANGUAGE,
        Language::Cpp => tree_sitter_cpp::LANGUAGE,
    };
    lang_ref.into()
}

/// Word runs (letters, marks, digits, optionally chained by an initial
/// quote) or a single punctuation or symbol character.
static UNICODE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{L}\p{M}\p{N}]+(?:\p{Pi}[\p{L}\p{M}\p{N}]+)*|[\p{P}\p{S}]")
        .expect("UNICODE_TOKEN_RE regex should compile")
});

/// Unicode character-class tokenizer.
///
/// Anything the pattern does not match is dropped (whitespace, controls,
/// format and private-use characters). `\n` becomes a line break.
pub fn tokenize_unicode(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            tokens.push(Token::LineBreak);
        }
        tokens.extend(
            UNICODE_TOKEN_RE
                .find_iter(line)
                .map(|m| Token::text(m.as_str())),
        );
    }
    tokens
}
