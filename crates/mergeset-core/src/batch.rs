//! Batch driver: metadata files in, one JSON array of records out.
//!
//! Files are processed one at a time. Each gets its own context index,
//! built from the sibling line-level merged file and dropped once the
//! file's tuples are done. A failure in one file is logged and counted;
//! the batch moves on.

use anyhow::Context;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use token_merge::{ContextIndex, Pipeline};

use crate::config::Settings;
use crate::record::{read_tuples, ConflictRecord};
use crate::stats::{DatasetStats, FileTally};

const METADATA_SUFFIX: &str = "metadata.json";

/// All `*.json` files in `input_dir` and its immediate subdirectories,
/// sorted by path.
pub fn collect_metadata_files(input_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(input_dir)
        .with_context(|| format!("reading input directory {}", input_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            match std::fs::read_dir(&path) {
                Ok(children) => {
                    for child in children.flatten() {
                        let child = child.path();
                        if is_json(&child) {
                            files.push(child);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(dir = %path.display(), error = %e, "skipping unreadable directory");
                }
            }
        } else if is_json(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_json(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
}

/// Path of the line-level merged file paired with a metadata file:
/// `0metadata.json` → `0merged.java`.
pub fn merged_file_for(metadata_path: &Path, suffix: &str) -> PathBuf {
    let name = metadata_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = name.strip_suffix(METADATA_SUFFIX).unwrap_or_else(|| {
        name.strip_suffix(".json").unwrap_or(&name)
    });
    metadata_path.with_file_name(format!("{prefix}{suffix}"))
}

/// Run every tuple of one metadata file through the pipeline.
///
/// Only failing to read or parse the metadata file is an error.
pub fn process_file(
    path: &Path,
    settings: &Settings,
    pipeline: &Pipeline,
    stats: &mut DatasetStats,
    records: &mut Vec<ConflictRecord>,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading metadata {}", path.display()))?;
    let metadata: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing metadata {}", path.display()))?;

    let json_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let folder_name = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned());
    let tuples = read_tuples(&metadata, settings.family, &json_name, folder_name.as_deref());

    // every chunk of a metadata file comes from the same source file
    let tokenizer = tuples
        .first()
        .map(|t| pipeline.tokenizer_for(&t.file_name))
        .unwrap_or(*pipeline.tokenizer());

    let merged_path = merged_file_for(path, &settings.merged_file_suffix);
    let index = match std::fs::read_to_string(&merged_path) {
        Ok(merged) => ContextIndex::from_merged_file(&merged, &tokenizer),
        Err(e) => {
            tracing::warn!(
                merged = %merged_path.display(),
                error = %e,
                "merged file unavailable, key context will be empty"
            );
            ContextIndex::default()
        }
    };

    tracing::info!(
        json = %json_name,
        conflicts = tuples.len(),
        indexed_lines = index.len(),
        "processing metadata file"
    );

    for tuple in tuples {
        let outcome = match pipeline.process_with(
            &tokenizer,
            &tuple.a_contents,
            &tuple.o_contents,
            &tuple.b_contents,
            &tuple.resolution,
            &index,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    json = %json_name,
                    id_in_file = tuple.sequence_id_in_file,
                    error = %e,
                    "token-level merge failed, keeping ours"
                );
                stats.record_merge_error();
                pipeline.unmerged(&tokenizer, &tuple.a_contents, &tuple.resolution)
            }
        };
        let id = stats.record(&tuple.file_name, &outcome);
        tracing::debug!(
            id,
            can_merge_succeed = outcome.can_merge_succeed,
            match_rate = outcome.match_rate,
            "tuple done"
        );
        records.push(ConflictRecord::new(id, tuple, &outcome));
    }

    stats.files_processed += 1;
    tracing::info!(json = %json_name, total = stats.line_all_count, "finished metadata file");
    Ok(())
}

/// Process the whole input directory and write the output and statistics
/// files.
pub fn run_batch(settings: &Settings) -> anyhow::Result<DatasetStats> {
    let pipeline = Pipeline::new(settings.pipeline.clone(), &settings.work_dir);
    let files = collect_metadata_files(&settings.input_dir)?;
    tracing::info!(
        input = %settings.input_dir.display(),
        files = files.len(),
        "starting batch"
    );

    let mut stats = DatasetStats::start();
    let mut records = Vec::new();
    for path in &files {
        if let Err(e) = process_file(path, settings, &pipeline, &mut stats, &mut records) {
            tracing::error!(file = %path.display(), error = %e, "failed to process metadata file");
            stats.files_failed += 1;
        }
    }
    stats.finish();

    write_json(&settings.output_file, &records)?;
    write_json(&settings.stats_file(), &stats)?;
    stats.log_summary();
    Ok(stats)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Conflicts and perfect matches per source file in a produced output file.
pub fn tally(output_file: &Path) -> anyhow::Result<BTreeMap<String, FileTally>> {
    let content = std::fs::read_to_string(output_file)
        .with_context(|| format!("reading output {}", output_file.display()))?;
    let records: Vec<ConflictRecord> = serde_json::from_str(&content)
        .with_context(|| format!("parsing output {}", output_file.display()))?;

    let mut per_file: BTreeMap<String, FileTally> = BTreeMap::new();
    for record in &records {
        let tally = per_file.entry(record.file_name.clone()).or_default();
        tally.conflicts += 1;
        if record.is_perfect() {
            tally.perfect += 1;
        }
    }
    Ok(per_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DatasetFamily;
    use serde_json::json;
    use std::fs;

    fn settings_for(root: &Path) -> Settings {
        Settings {
            input_dir: root.join("input"),
            work_dir: root.join("work"),
            output_file: root.join("out").join("dataset.json"),
            log_dir: root.join("logs"),
            ..Default::default()
        }
    }

    fn write_metadata(dir: &Path, name: &str, value: serde_json::Value) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), value.to_string()).unwrap();
    }

    #[test]
    fn test_merged_file_for() {
        assert_eq!(
            merged_file_for(Path::new("/d/12metadata.json"), "merged.java"),
            PathBuf::from("/d/12merged.java")
        );
        assert_eq!(
            merged_file_for(Path::new("/d/other.json"), "merged.java"),
            PathBuf::from("/d/othermerged.java")
        );
    }

    #[test]
    fn test_collect_one_level_deep() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("b.json"), "{}").unwrap();
        fs::write(root.join("a.txt"), "").unwrap();
        fs::create_dir_all(root.join("repo").join("deeper")).unwrap();
        fs::write(root.join("repo").join("a.json"), "{}").unwrap();
        fs::write(root.join("repo").join("deeper").join("c.json"), "{}").unwrap();

        let files = collect_metadata_files(root).unwrap();
        assert_eq!(files, vec![root.join("b.json"), root.join("repo").join("a.json")]);
    }

    #[test]
    fn test_collect_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_metadata_files(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_run_batch_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        let input = &settings.input_dir;

        write_metadata(
            input,
            "0metadata.json",
            json!({
                "fname": "src/Calc.java",
                "repo": "acme/calc",
                "conflicting_chunks": [
                    {
                        "a_contents": "int x = 1;\n",
                        "base_contents": "int x = 0;\n",
                        "b_contents": "int x = 0;\n",
                        "res_region": "int x = 1;\n",
                        "label": "A"
                    },
                    {
                        "a_contents": "return a;\n",
                        "base_contents": "return 0;\n",
                        "b_contents": "return b;\n",
                        "res_region": "return a + b;\n"
                    }
                ]
            }),
        );
        fs::write(
            input.join("0merged.java"),
            "int a = 1;\n<<<<<<< ours\nreturn a;\n=======\nreturn b;\n>>>>>>> theirs\nint b = 2;\n",
        )
        .unwrap();
        fs::write(input.join("1metadata.json"), "not json").unwrap();

        let stats = run_batch(&settings).unwrap();
        assert_eq!(stats.line_all_count, 2);
        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.merge_succeed, 1);
        assert_eq!(stats.merge_correct, 1);

        let output: Vec<ConflictRecord> =
            serde_json::from_str(&fs::read_to_string(&settings.output_file).unwrap()).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].id, 1);
        assert!(output[0].can_merge_succeed);
        assert_eq!(output[0].match_rate, 100.0);
        assert_eq!(output[1].id, 2);
        assert_eq!(output[1].id_in_file, 2);
        assert_eq!(output[1].resolution_label, "unknown");
        assert!(!output[1].can_merge_succeed);
        assert_eq!(output[1].key_information.len(), 1);
        assert_eq!(output[1].key_context[0].a, "int a = 1 ;");
        assert_eq!(output[1].key_context[0].b, "int b = 2 ;");

        let written: DatasetStats =
            serde_json::from_str(&fs::read_to_string(settings.stats_file()).unwrap()).unwrap();
        assert_eq!(written.line_all_count, 2);
        assert!(written.finished_at.is_some());
    }

    #[test]
    fn test_missing_merged_file_still_processes() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_for(dir.path());
        settings.family = DatasetFamily::Repo50;
        let repo_dir = settings.input_dir.join("junit");
        write_metadata(
            &repo_dir,
            "3metadata.json",
            json!({
                "filename": "T.java",
                "conflicting_chunks": [
                    { "a_contents": "f(a);", "base_contents": "f();", "b_contents": "f(b);", "resolve": "f(a, b);" }
                ]
            }),
        );

        let stats = run_batch(&settings).unwrap();
        assert_eq!(stats.files_processed, 1);
        let output: Vec<ConflictRecord> =
            serde_json::from_str(&fs::read_to_string(&settings.output_file).unwrap()).unwrap();
        assert_eq!(output[0].repo, "junit");
        assert_eq!(output[0].key_context[0].a, "");
        assert_eq!(output[0].key_context[0].o, " ");
    }

    #[test]
    fn test_merge_error_is_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_for(dir.path());
        settings.pipeline.backend = token_merge::MergeBackend::GitMergeFile {
            program: "definitely-not-a-real-merge-program".into(),
            timeout_secs: 1,
        };
        write_metadata(
            &settings.input_dir,
            "0metadata.json",
            json!({ "fname": "F.java", "repo": "r", "conflicting_chunks": [
                { "a_contents": "a", "base_contents": "o", "b_contents": "b", "res_region": "a" }
            ]}),
        );
        let stats = run_batch(&settings).unwrap();
        assert_eq!(stats.merge_errors, 1);
        assert_eq!(stats.line_all_count, 1);
        assert_eq!(stats.fit_merge, 1);
        assert_eq!(stats.unfit_merge, 0);
        assert_eq!(stats.merge_correct, 1);

        let output: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&settings.output_file).unwrap()).unwrap();
        let record = &output[0];
        assert_eq!(record["can_tokenize"], true);
        assert_eq!(record["can_merge_succeed"], true);
        assert_eq!(record["token_level_result"], "a");
        assert_eq!(record["match_rate"], 100.0);
    }

    #[test]
    fn test_tally() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_for(dir.path());
        write_metadata(
            &settings.input_dir,
            "0metadata.json",
            json!({ "fname": "F.java", "repo": "r", "conflicting_chunks": [
                { "a_contents": "x = 1;", "base_contents": "x = 0;", "b_contents": "x = 0;", "res_region": "x = 1;" },
                { "a_contents": "y = 1;", "base_contents": "y = 0;", "b_contents": "y = 2;", "res_region": "y = 3;" }
            ]}),
        );
        run_batch(&settings).unwrap();

        let per_file = tally(&settings.output_file).unwrap();
        assert_eq!(per_file["F.java"], FileTally { conflicts: 2, perfect: 1 });
    }
}
