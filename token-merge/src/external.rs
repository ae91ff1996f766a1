//! `git merge-file --diff3` backend.
//!
//! Each side is staged as a file holding one token per line, with line
//! breaks written as the configured sentinel. The ours file is copied to a
//! `merged` file which git rewrites in place, so ours is the seed that the
//! base→theirs delta is applied to. The rewritten file is parsed back into
//! a [`MergeResult`].
//!
//! All staged files live in a per-tuple temporary directory that is removed
//! when the merge returns, on every path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::merge::{MergeError, ThreeWayMerger};
use crate::types::{
    LineBreakSentinel, MARKER_BASE, MARKER_OURS, MARKER_SEPARATOR, MARKER_THEIRS, MergeRegion,
    MergeResult, Token, TokenStream,
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Delegates merging to an external `git` executable.
#[derive(Debug, Clone)]
pub struct GitMergeFile {
    program: String,
    work_dir: PathBuf,
    timeout: Duration,
    sentinel: LineBreakSentinel,
}

impl GitMergeFile {
    pub fn new(
        program: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
        sentinel: LineBreakSentinel,
    ) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
            timeout,
            sentinel,
        }
    }
}

impl ThreeWayMerger for GitMergeFile {
    fn merge(
        &self,
        ours: &TokenStream,
        base: &TokenStream,
        theirs: &TokenStream,
    ) -> Result<MergeResult, MergeError> {
        let staging = StagingDir::create(&self.work_dir)?;
        let ours_path = staging.write_tokens("A.txt", ours, self.sentinel)?;
        let base_path = staging.write_tokens("O.txt", base, self.sentinel)?;
        let theirs_path = staging.write_tokens("B.txt", theirs, self.sentinel)?;
        let merged_path = staging.path().join("merged.txt");
        fs::copy(&ours_path, &merged_path).map_err(|source| MergeError::Staging {
            path: merged_path.clone(),
            source,
        })?;

        let mut child = Command::new(&self.program)
            .arg("merge-file")
            .arg("--diff3")
            .arg(&merged_path)
            .arg(&base_path)
            .arg(&theirs_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| MergeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        match wait_bounded(&mut child, self.timeout) {
            Ok(Some(status)) if status.success() => {}
            Ok(Some(status)) => match status.code() {
                // git reports the number of conflicts as the exit code
                Some(n) if (1..128).contains(&n) => {
                    tracing::debug!(conflicts = n, "git merge-file left conflicts");
                }
                _ => {
                    tracing::warn!(status = %status, "git merge-file exited abnormally, keeping staged content");
                }
            },
            Ok(None) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "git merge-file timed out, keeping staged content"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed waiting for git merge-file, keeping staged content");
            }
        }

        let output = fs::read_to_string(&merged_path).map_err(|source| MergeError::Staging {
            path: merged_path.clone(),
            source,
        })?;
        parse_merge_output(&output, self.sentinel)
    }
}

/// Wait for `child` at most `timeout`. Returns `None` (after killing the
/// child) if the deadline passes.
fn wait_bounded(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Per-tuple temporary directory, removed on drop.
struct StagingDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl StagingDir {
    fn create(work_dir: &Path) -> Result<Self, MergeError> {
        let staging_err = |source: io::Error| MergeError::Staging {
            path: work_dir.to_path_buf(),
            source,
        };
        fs::create_dir_all(work_dir).map_err(staging_err)?;
        let dir = tempfile::Builder::new()
            .prefix("tuple-")
            .tempdir_in(work_dir)
            .map_err(staging_err)?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn write_tokens(
        &self,
        name: &str,
        stream: &TokenStream,
        sentinel: LineBreakSentinel,
    ) -> Result<PathBuf, MergeError> {
        let path = self.path.join(name);
        let mut content = String::new();
        for token in stream.tokens() {
            content.push_str(sentinel.encode(token));
            content.push('\n');
        }
        fs::write(&path, content).map_err(|source| MergeError::Staging {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Stable,
    Ours,
    Base,
    Theirs,
}

/// Parse a one-token-per-line merge file with diff3-style markers.
///
/// Marker lines may carry a trailing label (git appends the file path).
/// A conflict without a `|||||||` section gets an empty base.
pub fn parse_merge_output(
    text: &str,
    sentinel: LineBreakSentinel,
) -> Result<MergeResult, MergeError> {
    let mut result = MergeResult::default();
    let mut section = Section::Stable;
    let mut stable = Vec::new();
    let mut ours = Vec::new();
    let mut base = Vec::new();
    let mut theirs = Vec::new();

    let malformed = |line: usize, reason: &str| MergeError::MalformedOutput {
        line,
        reason: reason.to_string(),
    };

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.starts_with(MARKER_OURS) {
            if section != Section::Stable {
                return Err(malformed(line_no, "nested conflict start"));
            }
            result.push(MergeRegion::Stable(std::mem::take(&mut stable)));
            section = Section::Ours;
        } else if line.starts_with(MARKER_BASE) {
            if section != Section::Ours {
                return Err(malformed(line_no, "base marker outside ours section"));
            }
            section = Section::Base;
        } else if line.starts_with(MARKER_SEPARATOR) {
            if section != Section::Ours && section != Section::Base {
                return Err(malformed(line_no, "separator outside conflict"));
            }
            section = Section::Theirs;
        } else if line.starts_with(MARKER_THEIRS) {
            if section != Section::Theirs {
                return Err(malformed(line_no, "conflict end before separator"));
            }
            result.push(MergeRegion::Conflict {
                ours: std::mem::take(&mut ours),
                base: std::mem::take(&mut base),
                theirs: std::mem::take(&mut theirs),
            });
            section = Section::Stable;
        } else if !line.is_empty() {
            let token: Token = sentinel.decode(line);
            match section {
                Section::Stable => stable.push(token),
                Section::Ours => ours.push(token),
                Section::Base => base.push(token),
                Section::Theirs => theirs.push(token),
            }
        }
    }

    if section != Section::Stable {
        return Err(malformed(text.lines().count(), "unterminated conflict"));
    }
    result.push(MergeRegion::Stable(stable));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff3::Diff3Merger;
    use crate::types::Lexer;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn stream(words: &[&str]) -> TokenStream {
        let tokens = words
            .iter()
            .map(|w| if *w == "\n" { Token::LineBreak } else { Token::text(*w) })
            .collect();
        TokenStream::new(tokens, Lexer::Unicode)
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_parse_git_output() {
        let text = "return\n<<<<<<< /tmp/x/merged.txt\na\n||||||| /tmp/x/O.txt\n0\n=======\nb\n>>>>>>> /tmp/x/B.txt\n;\nNewLineDZY\n";
        let result = parse_merge_output(text, LineBreakSentinel::NewLineDzy).unwrap();
        assert_eq!(
            result.regions(),
            &[
                MergeRegion::Stable(vec![Token::text("return")]),
                MergeRegion::Conflict {
                    ours: vec![Token::text("a")],
                    base: vec![Token::text("0")],
                    theirs: vec![Token::text("b")],
                },
                MergeRegion::Stable(vec![Token::text(";"), Token::LineBreak]),
            ]
        );
    }

    #[test]
    fn test_parse_without_base_section() {
        let text = "<<<<<<< ours\nx\n=======\ny\n>>>>>>> theirs\n";
        let result = parse_merge_output(text, LineBreakSentinel::NewLineDzy).unwrap();
        let (ours, base, theirs) = result.conflicts().next().unwrap();
        assert_eq!(ours, &[Token::text("x")]);
        assert!(base.is_empty());
        assert_eq!(theirs, &[Token::text("y")]);
    }

    #[test]
    fn test_parse_rejects_unterminated_conflict() {
        let text = "<<<<<<< ours\nx\n=======\ny\n";
        let err = parse_merge_output(text, LineBreakSentinel::NewLineDzy).unwrap_err();
        assert!(matches!(err, MergeError::MalformedOutput { .. }));
    }

    #[test]
    fn test_parse_rejects_nested_start() {
        let text = "<<<<<<< a\n<<<<<<< b\n";
        assert!(parse_merge_output(text, LineBreakSentinel::NewLineDzy).is_err());
    }

    #[test]
    fn test_spawn_failure_is_error_and_cleans_up() {
        let work = tempfile::tempdir().unwrap();
        let merger = GitMergeFile::new(
            "definitely-not-a-real-merge-program",
            work.path(),
            Duration::from_secs(1),
            LineBreakSentinel::NewLineDzy,
        );
        let s = stream(&["a"]);
        let err = merger.merge(&s, &s, &s).unwrap_err();
        assert!(matches!(err, MergeError::Spawn { .. }));
        assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
    }

    /// Small alphabet so repeated and discardable tokens are common.
    const ALPHABET: [&str; 6] = ["a", "b", "c", ";", ")", "\n"];

    fn random_tokens(rng: &mut StdRng, max_len: usize) -> Vec<&'static str> {
        let len = rng.random_range(0..=max_len);
        (0..len).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())]).collect()
    }

    fn random_edit(rng: &mut StdRng, base: &[&'static str]) -> Vec<&'static str> {
        let mut side = base.to_vec();
        for _ in 0..rng.random_range(0..=3) {
            let at = rng.random_range(0..=side.len());
            let token = ALPHABET[rng.random_range(0..ALPHABET.len())];
            match rng.random_range(0..3) {
                0 => side.insert(at, token),
                1 if at < side.len() => {
                    side.remove(at);
                }
                _ if at < side.len() => side[at] = token,
                _ => side.push(token),
            }
        }
        side
    }

    #[test]
    fn test_git_agrees_with_in_process_diff3() {
        if !git_available() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        let git = GitMergeFile::new(
            "git",
            work.path(),
            Duration::from_secs(30),
            LineBreakSentinel::NewLineTag,
        );
        let mut rng = StdRng::seed_from_u64(0x6d65_7267);

        for case in 0..400 {
            let base = random_tokens(&mut rng, 10);
            let (ours, theirs) = if case % 4 == 0 {
                (random_tokens(&mut rng, 10), random_tokens(&mut rng, 10))
            } else {
                (random_edit(&mut rng, &base), random_edit(&mut rng, &base))
            };
            let (o, b, t) = (stream(&ours), stream(&base), stream(&theirs));

            let external = git.merge(&o, &b, &t).unwrap();
            let internal = Diff3Merger.merge(&o, &b, &t).unwrap();
            assert_eq!(
                external, internal,
                "case {case}: ours={ours:?} base={base:?} theirs={theirs:?}"
            );
        }
        assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_git_cleanly_applies_shifted_deletion() {
        if !git_available() {
            return;
        }
        let work = tempfile::tempdir().unwrap();
        let git = GitMergeFile::new(
            "git",
            work.path(),
            Duration::from_secs(30),
            LineBreakSentinel::default(),
        );
        let ours = stream(&["c", "a", "\n", ";", ";", "b", "\n"]);
        let base = stream(&["c", "a", ";", ";", "b", "\n"]);
        let theirs = stream(&["c", "b", "a", ";", "b", "\n"]);

        let external = git.merge(&ours, &base, &theirs).unwrap();
        assert!(!external.has_conflicts());
        assert_eq!(external, Diff3Merger.merge(&ours, &base, &theirs).unwrap());
    }
}
