pub mod config;
pub mod data_loading;
pub mod error;
pub mod frame;
pub mod fusion;
pub mod heart_analysis;
pub mod hrv_windows;
pub mod labels;
pub mod output;
pub mod pipeline;
pub mod resample;
pub mod signal_processing;
pub mod timestamps;

pub use error::{ConfigError, RecordingError};
pub use frame::{Column, ColumnData, ColumnKind, Frame, Scalar};
pub use labels::{LabelTable, SubjectLabel};

use std::fmt;
use std::path::PathBuf;

/// Sensor modality a recording belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    Eda,
    Ppg,
}

impl Modality {
    /// Prefix used for the per-sample signal columns (`EDA_Clean`, `PPG_Raw`, ...).
    pub fn prefix(self) -> &'static str {
        match self {
            Modality::Eda => "EDA",
            Modality::Ppg => "PPG",
        }
    }

    /// Suffix given to this modality's columns when they collide during fusion.
    pub fn suffix(self) -> &'static str {
        match self {
            Modality::Eda => "_eda",
            Modality::Ppg => "_ppg",
        }
    }

    pub fn peak_column(self) -> &'static str {
        match self {
            Modality::Eda => "SCR_Peaks",
            Modality::Ppg => "PPG_Peaks",
        }
    }

    pub fn default_sampling_rate(self) -> f64 {
        match self {
            Modality::Eda => 15.0,
            Modality::Ppg => 100.0,
        }
    }

    /// Name of the raw signal column in the recorder's export.
    pub fn default_signal_column(self) -> &'static str {
        match self {
            Modality::Eda => "EA",
            Modality::Ppg => "PG",
        }
    }

    pub fn default_input_dir(self) -> PathBuf {
        PathBuf::from("Raw").join(self.dir_name())
    }

    pub fn default_output_dir(self) -> PathBuf {
        PathBuf::from("Processed").join(self.dir_name())
    }

    fn dir_name(self) -> &'static str {
        match self {
            Modality::Eda => "eda",
            Modality::Ppg => "ppg",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}
