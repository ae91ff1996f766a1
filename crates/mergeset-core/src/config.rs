use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use token_merge::PipelineConfig;

use crate::record::DatasetFamily;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the dataset: metadata JSON files, directly or one folder deep.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Scratch space for staged merge inputs.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub family: DatasetFamily,
    /// Suffix of the line-level merged file next to each metadata file.
    #[serde(default = "default_merged_file_suffix")]
    pub merged_file_suffix: String,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            work_dir: default_work_dir(),
            output_file: default_output_file(),
            log_dir: default_log_dir(),
            family: DatasetFamily::default(),
            merged_file_suffix: default_merged_file_suffix(),
            pipeline: PipelineConfig::default(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    "dataset".into()
}
fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("mergeset")
}
fn default_output_file() -> PathBuf {
    "output/token_level.json".into()
}
fn default_log_dir() -> PathBuf {
    "logs".into()
}
fn default_merged_file_suffix() -> String {
    "merged.java".into()
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Path of the statistics file written next to the output file.
    pub fn stats_file(&self) -> PathBuf {
        let stem = self
            .output_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".into());
        self.output_file.with_file_name(format!("{stem}.stats.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use token_merge::{Language, LineBreakSentinel, MergeBackend, ScorerKind};

    #[test]
    fn test_empty_object_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.merged_file_suffix, "merged.java");
        assert_eq!(settings.family, DatasetFamily::MergeBert);
        assert_eq!(settings.pipeline, PipelineConfig::default());
        assert_eq!(settings.pipeline.top_k, 1);
        assert_eq!(settings.pipeline.language, Some(Language::Java));
    }

    #[test]
    fn test_pipeline_overrides() {
        let json = r#"{
            "family": "repo50",
            "pipeline": {
                "scorer": "jaccard",
                "sentinel": "new-line-dzy",
                "infer_language": false,
                "backend": { "kind": "git-merge-file", "timeout_secs": 5 },
                "language": null,
                "top_k": 3
            }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.family, DatasetFamily::Repo50);
        assert_eq!(settings.pipeline.scorer, ScorerKind::Jaccard);
        assert_eq!(settings.pipeline.language, None);
        assert!(!settings.pipeline.infer_language);
        assert_eq!(settings.pipeline.sentinel, LineBreakSentinel::NewLineDzy);
        assert_eq!(settings.pipeline.top_k, 3);
        assert_eq!(
            settings.pipeline.backend,
            MergeBackend::GitMergeFile {
                program: "git".into(),
                timeout_secs: 5
            }
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.pipeline.max_line_spread = Some(4);
        settings.output_file = "out/result.json".into();
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.pipeline.max_line_spread, Some(4));
        assert_eq!(loaded.output_file, PathBuf::from("out/result.json"));
    }

    #[test]
    fn test_stats_file_name() {
        let settings = Settings {
            output_file: "out/result.json".into(),
            ..Default::default()
        };
        assert_eq!(settings.stats_file(), PathBuf::from("out/result.stats.json"));
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(&dir.path().join("missing.json")).is_err());
    }
}
