use std::path::PathBuf;
use thiserror::Error;

/// Reasons a single recording file is skipped. The batch logs them and moves on.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("no label found for subject {0}")]
    MissingLabel(String),

    #[error("no usable samples left after cleaning")]
    EmptyRecording,

    #[error("row count mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("missing column `{0}`")]
    MissingColumn(String),

    #[error("recording spans {seconds} s, more than the {limit} s limit")]
    SpanTooLong { seconds: i64, limit: i64 },

    #[error("invalid sampling rate {0} Hz")]
    InvalidSamplingRate(f64),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// Problems with the run configuration. Any of these halts the batch.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("label table not found at {0}")]
    MissingLabelTable(PathBuf),

    #[error("invalid label table {path}: {source}")]
    InvalidLabelTable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("input directory not found: {0}")]
    MissingInputDir(PathBuf),

    #[error("unknown time zone `{0}`")]
    UnknownTimezone(String),

    #[error("invalid setting {name}: {message}")]
    InvalidSetting { name: &'static str, message: String },
}
