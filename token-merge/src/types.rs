//! Core types for token-level merging.
//!
//! Each side of a conflict is flattened into a [`TokenStream`]. Original
//! newlines survive the flattening as [`Token::LineBreak`], so the line
//! structure can be rebuilt once the merge has run at token granularity.

use std::fmt;

/// Opens a conflict span; followed by the ours tokens.
pub const MARKER_OURS: &str = "<<<<<<<";
/// Separates the ours tokens from the base tokens.
pub const MARKER_BASE: &str = "|||||||";
/// Separates the base tokens from the theirs tokens.
pub const MARKER_SEPARATOR: &str = "=======";
/// Closes a conflict span.
pub const MARKER_THEIRS: &str = ">>>>>>>";

/// The four marker literals in the order they appear within a conflict span.
pub const CONFLICT_MARKERS: [&str; 4] = [MARKER_OURS, MARKER_BASE, MARKER_SEPARATOR, MARKER_THEIRS];

/// Returns true if `line` starts with any of the four conflict markers.
pub fn is_marker_line(line: &str) -> bool {
    CONFLICT_MARKERS.iter().any(|m| line.starts_with(m))
}

/// A single lexical unit of a conflict side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    /// An ordinary code token. Never empty, never whitespace-only, never
    /// contains a newline.
    Text(String),
    /// Stands in for an original newline.
    LineBreak,
}

impl Token {
    pub fn text(value: impl Into<String>) -> Self {
        Token::Text(value.into())
    }

    pub fn is_line_break(&self) -> bool {
        matches!(self, Token::LineBreak)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Token::Text(s) => Some(s),
            Token::LineBreak => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Text(s) => f.write_str(s),
            Token::LineBreak => f.write_str("\n"),
        }
    }
}

/// Spelling of the line-break sentinel when tokens are staged one per line
/// for an external merge tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum LineBreakSentinel {
    /// `NewLineDZY`, the spelling used by the MergeBERT-derived datasets.
    ///
    /// A legal identifier. A source token spelled `NewLineDZY` decodes as a
    /// line break after staging, so restored output gains a newline there.
    NewLineDzy,
    /// `<NEWLINE>`. Neither lexer emits it as a single token.
    #[default]
    NewLineTag,
}

impl LineBreakSentinel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineBreakSentinel::NewLineDzy => "NewLineDZY",
            LineBreakSentinel::NewLineTag => "<NEWLINE>",
        }
    }

    /// Map a staged line back to a token.
    pub fn decode(&self, line: &str) -> Token {
        if line == self.as_str() {
            Token::LineBreak
        } else {
            Token::Text(line.to_string())
        }
    }

    /// Map a token to its staged line.
    pub fn encode<'a>(&self, token: &'a Token) -> &'a str {
        match token {
            Token::Text(s) => s,
            Token::LineBreak => self.as_str(),
        }
    }
}

/// Supported programming languages for tree-sitter lexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Python,
    Java,
    Go,
    C,
    Cpp,
}

impl Language {
    /// Infer language from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" => Some(Language::Rust),
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "tsx" => Some(Language::TypeScript),
            "py" => Some(Language::Python),
            "java" => Some(Language::Java),
            "go" => Some(Language::Go),
            "c" | "h" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" => Some(Language::Cpp),
            _ => None,
        }
    }
}

/// Which lexer produced a token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lexer {
    /// The tree-sitter grammar of the configured language.
    Grammar(Language),
    /// The Unicode character-class fallback.
    Unicode,
}

/// Ordered tokens of one conflict side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStream {
    tokens: Vec<Token>,
    lexer: Lexer,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>, lexer: Lexer) -> Self {
        Self { tokens, lexer }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn lexer(&self) -> Lexer {
        self.lexer
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of line-break sentinels, i.e. newlines in the source text.
    pub fn line_breaks(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_line_break()).count()
    }
}

/// One region of a token-level merge result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRegion {
    /// Tokens that merged cleanly, taken verbatim.
    Stable(Vec<Token>),
    /// Both sides changed the same base span in different ways.
    Conflict {
        ours: Vec<Token>,
        base: Vec<Token>,
        theirs: Vec<Token>,
    },
}

impl MergeRegion {
    pub fn is_conflict(&self) -> bool {
        matches!(self, MergeRegion::Conflict { .. })
    }
}

/// A token-level merge result: an ordered list of regions.
///
/// Adjacent stable regions are always coalesced and empty stable regions are
/// dropped, so conflict spans are maximal and never directly adjacent to an
/// empty stable span.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeResult {
    regions: Vec<MergeRegion>,
}

impl MergeResult {
    pub fn new(regions: impl IntoIterator<Item = MergeRegion>) -> Self {
        let mut result = Self::default();
        for region in regions {
            result.push(region);
        }
        result
    }

    /// Append a region, merging it into a preceding stable region if both
    /// are stable.
    pub fn push(&mut self, region: MergeRegion) {
        match region {
            MergeRegion::Stable(tokens) if tokens.is_empty() => {}
            MergeRegion::Stable(tokens) => match self.regions.last_mut() {
                Some(MergeRegion::Stable(existing)) => existing.extend(tokens),
                _ => self.regions.push(MergeRegion::Stable(tokens)),
            },
            conflict => self.regions.push(conflict),
        }
    }

    pub fn regions(&self) -> &[MergeRegion] {
        &self.regions
    }

    pub fn has_conflicts(&self) -> bool {
        self.regions.iter().any(MergeRegion::is_conflict)
    }

    pub fn conflict_count(&self) -> usize {
        self.regions.iter().filter(|r| r.is_conflict()).count()
    }

    /// Iterate over the conflict spans as `(ours, base, theirs)`.
    pub fn conflicts(&self) -> impl Iterator<Item = (&[Token], &[Token], &[Token])> {
        self.regions.iter().filter_map(|r| match r {
            MergeRegion::Conflict { ours, base, theirs } => {
                Some((ours.as_slice(), base.as_slice(), theirs.as_slice()))
            }
            MergeRegion::Stable(_) => None,
        })
    }
}

/// Key information: the joined token text of one conflict span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRegionInfo {
    /// 1-based position of the span within its merge result.
    pub ordinal: usize,
    pub ours: String,
    pub base: String,
    pub theirs: String,
}

/// Key context: retrieved lines for one conflict span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextResult {
    pub ordinal: usize,
    pub ours: String,
    pub base: String,
    pub theirs: String,
}
