//! Rebuild line-oriented text from a token-level merge result.
//!
//! Ordinary tokens on the same line are joined with a single space, line
//! breaks become real newlines, and each conflict marker is written on a
//! line of its own. The conflict spans are also extracted as "key
//! information" for context retrieval.

use crate::types::{
    ConflictRegionInfo, MARKER_BASE, MARKER_OURS, MARKER_SEPARATOR, MARKER_THEIRS, MergeRegion,
    MergeResult, Token,
};

/// Accumulates restored text, tracking whether the current line has content.
#[derive(Debug, Default)]
struct LineWriter {
    out: String,
    line_open: bool,
}

impl LineWriter {
    fn push_tokens(&mut self, tokens: &[Token]) {
        for token in tokens {
            match token {
                Token::LineBreak => {
                    self.out.push('\n');
                    self.line_open = false;
                }
                Token::Text(text) => {
                    if self.line_open {
                        self.out.push(' ');
                    }
                    self.out.push_str(text);
                    self.line_open = true;
                }
            }
        }
    }

    fn push_marker(&mut self, marker: &str) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
        self.out.push_str(marker);
        self.out.push('\n');
        self.line_open = false;
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Restore a merge result to a line-level candidate.
pub fn restore(result: &MergeResult) -> String {
    let mut writer = LineWriter::default();
    for region in result.regions() {
        match region {
            MergeRegion::Stable(tokens) => writer.push_tokens(tokens),
            MergeRegion::Conflict { ours, base, theirs } => {
                writer.push_marker(MARKER_OURS);
                writer.push_tokens(ours);
                writer.push_marker(MARKER_BASE);
                writer.push_tokens(base);
                writer.push_marker(MARKER_SEPARATOR);
                writer.push_tokens(theirs);
                writer.push_marker(MARKER_THEIRS);
            }
        }
    }
    writer.finish()
}

/// Join tokens the way [`restore`] lays out a stable span.
pub fn join_tokens(tokens: &[Token]) -> String {
    let mut writer = LineWriter::default();
    writer.push_tokens(tokens);
    writer.finish()
}

/// One record per conflict span, numbered from 1.
pub fn key_information(result: &MergeResult) -> Vec<ConflictRegionInfo> {
    result
        .conflicts()
        .enumerate()
        .map(|(i, (ours, base, theirs))| ConflictRegionInfo {
            ordinal: i + 1,
            ours: join_tokens(ours),
            base: join_tokens(base),
            theirs: join_tokens(theirs),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff3::diff3_merge;
    use crate::tokenizer::Tokenizer;
    use crate::types::{CONFLICT_MARKERS, Language};

    fn strip(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_stable_layout() {
        let tokens = vec![
            Token::text("int"),
            Token::text("x"),
            Token::text(";"),
            Token::LineBreak,
            Token::text("y"),
        ];
        let result = MergeResult::new(vec![MergeRegion::Stable(tokens)]);
        assert_eq!(restore(&result), "int x ;\ny");
    }

    #[test]
    fn test_conflict_layout() {
        let result = MergeResult::new(vec![
            MergeRegion::Stable(vec![Token::text("return")]),
            MergeRegion::Conflict {
                ours: vec![Token::text("a")],
                base: vec![Token::text("0")],
                theirs: vec![Token::text("b")],
            },
            MergeRegion::Stable(vec![Token::text(";")]),
        ]);
        assert_eq!(
            restore(&result),
            "return\n<<<<<<<\na\n|||||||\n0\n=======\nb\n>>>>>>>\n;"
        );
    }

    #[test]
    fn test_empty_sides_keep_markers_on_own_lines() {
        let result = MergeResult::new(vec![MergeRegion::Conflict {
            ours: vec![],
            base: vec![Token::text("x"), Token::LineBreak],
            theirs: vec![],
        }]);
        assert_eq!(restore(&result), "<<<<<<<\n|||||||\nx\n=======\n>>>>>>>\n");
    }

    #[test]
    fn test_identity_merge_restores_text() {
        let tokenizer = Tokenizer::new(Some(Language::Java));
        let text = "public int f() {\n    return x + 1;\n}\n";
        let t = tokenizer.tokenize(text);
        let result = diff3_merge(t.tokens(), t.tokens(), t.tokens());
        let restored = restore(&result);
        assert_eq!(strip(&restored), strip(text));
        assert_eq!(restored.lines().count(), text.lines().count());
    }

    #[test]
    fn test_identity_merge_multi_line_inputs() {
        let tokenizer = Tokenizer::new(Some(Language::Java));
        let inputs = [
            "int a;\n\n\nint b;\n",
            "  \nfoo(1);\n   \n",
            "\n\n",
            "} else {\n  x = y;\n\n  foo(",
            "/* a\n   b */\nint x;",
            "String s = \"a { b\";\n// done\n",
            "a;\r\nb;\r\n",
            "na\u{EF}ve = \"\u{E9}\";\n\tq = r;",
        ];
        for text in inputs {
            let t = tokenizer.tokenize(text);
            let result = diff3_merge(t.tokens(), t.tokens(), t.tokens());
            assert!(!result.has_conflicts());
            let restored = restore(&result);
            assert_eq!(strip(&restored), strip(text), "{text:?}");
            assert_eq!(restored.lines().count(), text.lines().count(), "{text:?}");
        }
    }

    #[test]
    fn test_markers_counted_per_conflict() {
        let tokenizer = Tokenizer::new(None);
        let ours = tokenizer.tokenize("a = 1;\nb = 1;\nc = 1;");
        let base = tokenizer.tokenize("a = 0;\nb = 0;\nc = 0;");
        let theirs = tokenizer.tokenize("a = 2;\nb = 0;\nc = 2;");
        let result = diff3_merge(ours.tokens(), base.tokens(), theirs.tokens());
        assert_eq!(result.conflict_count(), 2);
        let restored = restore(&result);
        for marker in CONFLICT_MARKERS {
            let n = restored.lines().filter(|l| l.starts_with(marker)).count();
            assert_eq!(n, 2, "marker {marker}");
        }
        assert!(!restored.contains("NewLineDZY"));
    }

    #[test]
    fn test_key_information() {
        let result = MergeResult::new(vec![
            MergeRegion::Stable(vec![Token::text("return")]),
            MergeRegion::Conflict {
                ours: vec![Token::text("a"), Token::text("+"), Token::text("b")],
                base: vec![],
                theirs: vec![Token::text("c"), Token::LineBreak, Token::text("d")],
            },
        ]);
        let info = key_information(&result);
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].ordinal, 1);
        assert_eq!(info[0].ours, "a + b");
        assert_eq!(info[0].base, "");
        assert_eq!(info[0].theirs, "c\nd");
    }
}
