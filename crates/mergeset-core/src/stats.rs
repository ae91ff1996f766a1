use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use token_merge::TupleOutcome;

/// Conflicts and perfect matches for one source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTally {
    pub conflicts: usize,
    pub perfect: usize,
}

/// Counters for one batch run. Passed by `&mut` through the driver; there
/// is exactly one writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Every tuple seen, merged or not.
    pub line_all_count: usize,
    pub fit_merge: usize,
    pub unfit_merge: usize,
    /// Candidates without conflict markers.
    pub merge_succeed: usize,
    /// Candidates scoring 100 against the resolution.
    pub merge_correct: usize,
    pub fallback_tokenized: usize,
    /// Tuples whose merge backend returned an error.
    pub merge_errors: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    #[serde(default)]
    pub per_file: BTreeMap<String, FileTally>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DatasetStats {
    pub fn start() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Count one tuple. Returns the new running id.
    pub fn record(&mut self, file_name: &str, outcome: &TupleOutcome) -> usize {
        self.line_all_count += 1;
        if outcome.can_tokenize {
            self.fit_merge += 1;
        } else {
            self.unfit_merge += 1;
        }
        if outcome.can_merge_succeed {
            self.merge_succeed += 1;
        }
        if outcome.fallback_tokenized {
            self.fallback_tokenized += 1;
        }

        let tally = self.per_file.entry(file_name.to_string()).or_default();
        tally.conflicts += 1;
        if outcome.is_perfect() {
            self.merge_correct += 1;
            tally.perfect += 1;
        }
        self.line_all_count
    }

    pub fn record_merge_error(&mut self) {
        self.merge_errors += 1;
    }

    /// Share of merged tuples that matched the resolution exactly, in percent.
    pub fn correct_rate(&self) -> f64 {
        if self.fit_merge == 0 {
            return 0.0;
        }
        self.merge_correct as f64 / self.fit_merge as f64 * 100.0
    }

    pub fn log_summary(&self) {
        tracing::info!(
            tuples = self.line_all_count,
            fit_merge = self.fit_merge,
            unfit_merge = self.unfit_merge,
            merge_succeed = self.merge_succeed,
            merge_correct = self.merge_correct,
            fallback_tokenized = self.fallback_tokenized,
            merge_errors = self.merge_errors,
            files_processed = self.files_processed,
            files_failed = self.files_failed,
            correct_rate = format!("{:.2}", self.correct_rate()),
            "dataset statistics"
        );
    }
}
