pub mod batch;
pub mod config;
pub mod logging;
pub mod record;
pub mod stats;

pub use batch::{collect_metadata_files, process_file, run_batch, tally};
pub use config::Settings;
pub use record::{ConflictRecord, ConflictTuple, DatasetFamily, KeyEntry};
pub use stats::{DatasetStats, FileTally};
