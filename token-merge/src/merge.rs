//! The three-way merge seam.
//!
//! Any strategy that turns `(ours, base, theirs)` token streams into a
//! [`MergeResult`] with diff3 stable/conflict semantics can sit behind
//! [`ThreeWayMerger`]. Two are provided: the in-process [`Diff3Merger`] and
//! [`GitMergeFile`], which stages the tokens one per line and delegates to
//! `git merge-file --diff3`.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::diff3::Diff3Merger;
use crate::external::GitMergeFile;
use crate::types::{LineBreakSentinel, MergeResult, TokenStream};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("failed to spawn merge program {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to stage merge input in {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed merge output at line {line}: {reason}")]
    MalformedOutput { line: usize, reason: String },
}

/// Computes a token-level three-way merge.
pub trait ThreeWayMerger {
    fn merge(
        &self,
        ours: &TokenStream,
        base: &TokenStream,
        theirs: &TokenStream,
    ) -> Result<MergeResult, MergeError>;
}

/// Which merge strategy a pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "kind", rename_all = "kebab-case")
)]
pub enum MergeBackend {
    /// In-process diff3.
    #[default]
    Diff3,
    /// Delegate to `git merge-file --diff3`.
    GitMergeFile {
        #[cfg_attr(feature = "serde", serde(default = "default_git_program"))]
        program: String,
        #[cfg_attr(feature = "serde", serde(default = "default_git_timeout_secs"))]
        timeout_secs: u64,
    },
}

impl MergeBackend {
    pub fn git() -> Self {
        MergeBackend::GitMergeFile {
            program: default_git_program(),
            timeout_secs: default_git_timeout_secs(),
        }
    }

    /// Instantiate the merger. `work_dir` is only used by backends that
    /// stage files.
    pub fn build(&self, work_dir: &Path, sentinel: LineBreakSentinel) -> Box<dyn ThreeWayMerger> {
        match self {
            MergeBackend::Diff3 => Box::new(Diff3Merger),
            MergeBackend::GitMergeFile {
                program,
                timeout_secs,
            } => Box::new(GitMergeFile::new(
                program.clone(),
                work_dir.to_path_buf(),
                Duration::from_secs(*timeout_secs),
                sentinel,
            )),
        }
    }
}

fn default_git_program() -> String {
    "git".into()
}

fn default_git_timeout_secs() -> u64 {
    30
}
