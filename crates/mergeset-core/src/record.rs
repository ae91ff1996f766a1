//! Input metadata mapping and output records.
//!
//! Metadata files come in two shapes depending on the dataset they were
//! collected for. Both are read leniently through [`serde_json::Value`]: a
//! missing text field becomes `""` and a missing name or label becomes
//! [`UNKNOWN`], so one bad chunk never aborts its file.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use token_merge::{ConflictRegionInfo, ContextResult, TupleOutcome};

pub const UNKNOWN: &str = "unknown";

/// Field-name convention of a metadata file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetFamily {
    /// `fname`, `repo`, chunks with `res_region`.
    #[default]
    MergeBert,
    /// `filename`, chunks with `resolve`; repo taken from the folder name.
    #[serde(rename = "repo50")]
    Repo50,
}

impl DatasetFamily {
    fn file_name_key(&self) -> &'static str {
        match self {
            DatasetFamily::MergeBert => "fname",
            DatasetFamily::Repo50 => "filename",
        }
    }

    fn resolution_key(&self) -> &'static str {
        match self {
            DatasetFamily::MergeBert => "res_region",
            DatasetFamily::Repo50 => "resolve",
        }
    }
}

/// One conflicting chunk, normalized across families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictTuple {
    /// 1-based position of the chunk in its metadata file.
    pub sequence_id_in_file: usize,
    pub file_name: String,
    pub json_name: String,
    pub repo: String,
    pub a_contents: String,
    pub o_contents: String,
    pub b_contents: String,
    pub resolution: String,
    pub label: String,
}

/// Render a JSON value the way it should appear as text. Strings are taken
/// verbatim, null counts as missing and anything else is serialized.
fn text_of(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Map one parsed metadata file to its tuples.
///
/// `folder_name` is the name of the directory holding the file and stands
/// in for the repo when the metadata carries none.
pub fn read_tuples(
    metadata: &Value,
    family: DatasetFamily,
    json_name: &str,
    folder_name: Option<&str>,
) -> Vec<ConflictTuple> {
    let file_name =
        text_of(metadata.get(family.file_name_key())).unwrap_or_else(|| UNKNOWN.to_string());
    let repo = text_of(metadata.get("repo"))
        .or_else(|| match family {
            DatasetFamily::Repo50 => folder_name.map(str::to_string),
            DatasetFamily::MergeBert => None,
        })
        .unwrap_or_else(|| UNKNOWN.to_string());

    let Some(chunks) = metadata.get("conflicting_chunks").and_then(Value::as_array) else {
        tracing::warn!(json = json_name, "metadata has no conflicting_chunks array");
        return Vec::new();
    };

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let text = |key: &str| text_of(chunk.get(key)).unwrap_or_default();
            ConflictTuple {
                sequence_id_in_file: i + 1,
                file_name: file_name.clone(),
                json_name: json_name.to_string(),
                repo: repo.clone(),
                a_contents: text("a_contents"),
                o_contents: text("base_contents"),
                b_contents: text("b_contents"),
                resolution: text(family.resolution_key()),
                label: text_of(chunk.get("label")).unwrap_or_else(|| UNKNOWN.to_string()),
            }
        })
        .collect()
}

/// One side-by-side entry of key information or key context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub id: usize,
    pub a: String,
    pub o: String,
    pub b: String,
}

impl From<&ConflictRegionInfo> for KeyEntry {
    fn from(info: &ConflictRegionInfo) -> Self {
        Self {
            id: info.ordinal,
            a: info.ours.clone(),
            o: info.base.clone(),
            b: info.theirs.clone(),
        }
    }
}

impl From<&ContextResult> for KeyEntry {
    fn from(ctx: &ContextResult) -> Self {
        Self {
            id: ctx.ordinal,
            a: ctx.ours.clone(),
            o: ctx.base.clone(),
            b: ctx.theirs.clone(),
        }
    }
}

/// One output record per conflict tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Running number across the whole batch, starting at 1.
    pub id: usize,
    pub id_in_file: usize,
    pub file_name: String,
    pub json_name: String,
    pub repo: String,
    pub a_contents: String,
    pub o_contents: String,
    pub b_contents: String,
    pub resolution_region: String,
    pub resolution_label: String,
    pub can_tokenize: bool,
    pub can_merge_succeed: bool,
    pub match_rate: f64,
    pub token_level_result: String,
    pub key_information: Vec<KeyEntry>,
    pub key_context: Vec<KeyEntry>,
}

impl ConflictRecord {
    pub fn new(id: usize, tuple: ConflictTuple, outcome: &TupleOutcome) -> Self {
        Self {
            id,
            id_in_file: tuple.sequence_id_in_file,
            file_name: tuple.file_name,
            json_name: tuple.json_name,
            repo: tuple.repo,
            a_contents: tuple.a_contents,
            o_contents: tuple.o_contents,
            b_contents: tuple.b_contents,
            resolution_region: tuple.resolution,
            resolution_label: tuple.label,
            can_tokenize: outcome.can_tokenize,
            can_merge_succeed: outcome.can_merge_succeed,
            match_rate: outcome.match_rate,
            token_level_result: outcome.token_level_result.clone(),
            key_information: outcome.key_information.iter().map(KeyEntry::from).collect(),
            key_context: outcome.key_context.iter().map(KeyEntry::from).collect(),
        }
    }

    pub fn is_perfect(&self) -> bool {
        self.match_rate >= 100.0
    }
}
