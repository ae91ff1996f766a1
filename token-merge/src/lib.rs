//! # token-merge
//!
//! Token-level three-way merging for building merge-conflict datasets.
//!
//! ## Approach
//!
//! Each conflict tuple (ours, base, theirs and the developer's resolution)
//! goes through a fixed pipeline:
//!
//! 1. **Tokenize** every side with a tree-sitter grammar, keeping newlines as
//!    explicit line-break tokens. Sides the grammar rejects are lexed with a
//!    total Unicode character-class tokenizer instead.
//! 2. **Merge** the token streams with diff3 semantics, either in process or
//!    by staging one token per line and calling `git merge-file --diff3`.
//! 3. **Restore** the result to line-oriented text with the standard
//!    `<<<<<<<` / `|||||||` / `=======` / `>>>>>>>` markers.
//! 4. **Score** the candidate against the resolution (normalized edit
//!    distance by default).
//! 5. **Retrieve** supporting lines for each conflict span from a BM25 index
//!    over the stable lines of the file's line-level merge.
//!
//! ## Example
//!
//! ```rust
//! use token_merge::{ContextIndex, Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(PipelineConfig::default(), &std::env::temp_dir());
//! let outcome = pipeline
//!     .process("int x = 1;", "int x = 0;", "int x = 0;", "int x = 1;", &ContextIndex::default())
//!     .unwrap();
//!
//! assert!(outcome.can_merge_succeed);
//! assert_eq!(outcome.match_rate, 100.0);
//! ```

pub mod context;
pub mod diff3;
pub mod external;
pub mod merge;
pub mod pipeline;
pub mod restore;
pub mod scorer;
pub mod tokenizer;
pub mod types;

// Re-export primary public API
pub use context::{BLANK_CONTEXT, ContextIndex, QueryError};
pub use diff3::{Diff3Merger, diff3_merge};
pub use external::GitMergeFile;
pub use merge::{MergeBackend, MergeError, ThreeWayMerger};
pub use pipeline::{Pipeline, PipelineConfig, TupleOutcome};
pub use restore::{key_information, restore};
pub use scorer::ScorerKind;
pub use tokenizer::Tokenizer;
pub use types::{
    ConflictRegionInfo, ContextResult, Language, LineBreakSentinel, MergeRegion, MergeResult,
    Token, TokenStream,
};
