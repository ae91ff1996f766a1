//! Token-level merge pipeline for one conflict tuple.
//!
//! tokenize each side → three-way merge → restore to lines → score against
//! the developer resolution → extract key information → retrieve key
//! context from the file's index.
//!
//! Every strategy choice (lexer language, merge backend, scorer, staging
//! sentinel) is fixed by [`PipelineConfig`] for the whole run.

use std::path::Path;

use crate::context::ContextIndex;
use crate::merge::{MergeBackend, MergeError, ThreeWayMerger};
use crate::restore::{key_information, restore};
use crate::scorer::ScorerKind;
use crate::tokenizer::Tokenizer;
use crate::types::{
    ConflictRegionInfo, ContextResult, Language, LineBreakSentinel, Lexer, MARKER_OURS,
    MergeRegion, MergeResult, TokenStream,
};

/// Configuration for the tuple pipeline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct PipelineConfig {
    /// Grammar used for lexing. None = Unicode rules only.
    pub language: Option<Language>,
    /// Pick the grammar from the conflicted file's extension when it names
    /// a supported language, falling back to `language` otherwise.
    pub infer_language: bool,
    pub scorer: ScorerKind,
    /// Spelling of the line-break token in staged merge files.
    pub sentinel: LineBreakSentinel,
    pub backend: MergeBackend,
    /// Number of index documents concatenated per context query.
    pub top_k: usize,
    /// Skip merging when the sides' line counts differ by more than this.
    pub max_line_spread: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: Some(Language::Java),
            infer_language: true,
            scorer: ScorerKind::default(),
            sentinel: LineBreakSentinel::default(),
            backend: MergeBackend::default(),
            top_k: 1,
            max_line_spread: None,
        }
    }
}

/// Everything the dataset records about one processed tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleOutcome {
    /// False when the fit check skipped token-level merging.
    pub can_tokenize: bool,
    /// The restored candidate has no conflict start marker.
    pub can_merge_succeed: bool,
    pub match_rate: f64,
    pub token_level_result: String,
    pub key_information: Vec<ConflictRegionInfo>,
    pub key_context: Vec<ContextResult>,
    /// At least one side fell back to the Unicode tokenizer.
    pub fallback_tokenized: bool,
}

impl TupleOutcome {
    /// Outcome for a tuple that was not merged at token level.
    pub fn skipped() -> Self {
        Self {
            can_tokenize: false,
            can_merge_succeed: false,
            match_rate: 0.0,
            token_level_result: String::new(),
            key_information: Vec::new(),
            key_context: Vec::new(),
            fallback_tokenized: false,
        }
    }

    pub fn is_perfect(&self) -> bool {
        self.match_rate >= 100.0
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    tokenizer: Tokenizer,
    merger: Box<dyn ThreeWayMerger>,
}

impl Pipeline {
    /// `work_dir` is where backends that stage files create their
    /// per-tuple directories.
    pub fn new(config: PipelineConfig, work_dir: &Path) -> Self {
        let tokenizer = Tokenizer::new(config.language);
        let merger = config.backend.build(work_dir, config.sentinel);
        Self {
            config,
            tokenizer,
            merger,
        }
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Tokenizer for a tuple of `file_name`.
    pub fn tokenizer_for(&self, file_name: &str) -> Tokenizer {
        if !self.config.infer_language {
            return self.tokenizer;
        }
        Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| Language::from_extension(&ext.to_ascii_lowercase()))
            .map(|lang| Tokenizer::new(Some(lang)))
            .unwrap_or(self.tokenizer)
    }

    /// Run the full pipeline for one tuple with the configured language.
    pub fn process(
        &self,
        ours: &str,
        base: &str,
        theirs: &str,
        resolution: &str,
        index: &ContextIndex,
    ) -> Result<TupleOutcome, MergeError> {
        self.process_with(&self.tokenizer, ours, base, theirs, resolution, index)
    }

    /// Run the full pipeline for one tuple.
    ///
    /// Only a merge backend failure is an error. Lexing and context
    /// retrieval always recover.
    pub fn process_with(
        &self,
        tokenizer: &Tokenizer,
        ours: &str,
        base: &str,
        theirs: &str,
        resolution: &str,
        index: &ContextIndex,
    ) -> Result<TupleOutcome, MergeError> {
        let sides = [
            tokenizer.tokenize(ours),
            tokenizer.tokenize(base),
            tokenizer.tokenize(theirs),
        ];
        let line_counts = sides.each_ref().map(TokenStream::line_breaks);

        if !self.fits(&line_counts) {
            tracing::debug!(?line_counts, "line spread too large, skipping token-level merge");
            return Ok(TupleOutcome::skipped());
        }

        let fallback_tokenized = tokenizer.language().is_some()
            && sides.iter().any(|s| s.lexer() == Lexer::Unicode);

        let [ours, base, theirs] = &sides;
        let merged = self.merger.merge(ours, base, theirs)?;
        let candidate = restore(&merged);
        let key_information = key_information(&merged);
        let key_context = index.retrieve_all(&key_information, self.config.top_k);

        Ok(TupleOutcome {
            can_tokenize: true,
            can_merge_succeed: !candidate.contains(MARKER_OURS),
            match_rate: self.config.scorer.score(&candidate, resolution),
            token_level_result: candidate,
            key_information,
            key_context,
            fallback_tokenized,
        })
    }

    /// Outcome for a tuple whose merge backend failed: the candidate is the
    /// ours side, the content the merge was seeded with.
    pub fn unmerged(&self, tokenizer: &Tokenizer, ours: &str, resolution: &str) -> TupleOutcome {
        let ours = tokenizer.tokenize(ours);
        let fallback_tokenized = tokenizer.language().is_some() && ours.lexer() == Lexer::Unicode;
        let candidate = restore(&MergeResult::new([MergeRegion::Stable(ours.tokens().to_vec())]));
        TupleOutcome {
            can_tokenize: true,
            can_merge_succeed: !candidate.contains(MARKER_OURS),
            match_rate: self.config.scorer.score(&candidate, resolution),
            token_level_result: candidate,
            key_information: Vec::new(),
            key_context: Vec::new(),
            fallback_tokenized,
        }
    }

    fn fits(&self, line_counts: &[usize; 3]) -> bool {
        let Some(spread) = self.config.max_line_spread else {
            return true;
        };
        let max = line_counts.iter().max().copied().unwrap_or(0);
        let min = line_counts.iter().min().copied().unwrap_or(0);
        max - min <= spread
    }
}
