use crate::data_loading::InputFormat;
use crate::error::ConfigError;
use crate::timestamps::parse_timezone;
use crate::Modality;
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_TIMEZONE: &str = "Asia/Bangkok";

/// Attributes present in both modalities that are merged rather than suffixed.
pub const COALESCED_ATTRIBUTES: [&str; 6] = ["id", "gender", "type", "sleep", "bmi", "bmi_category"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrvMode {
    Rolling, // global feature set plus centred rolling RR statistics (default)
    Tumbling, // full feature set per non-overlapping window
}

impl FromStr for HrvMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rolling" => Ok(HrvMode::Rolling),
            "tumbling" => Ok(HrvMode::Tumbling),
            _ => Err(format!(
                "Invalid HRV mode: {}. Use `rolling` (global + rolling statistics) or `tumbling` (per-window feature sets)",
                s
            )),
        }
    }
}

/// Process EDA and PPG recordings and fuse them per subject
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process raw EDA recordings into 1 s feature streams
    ProcessEda(ProcessArgs),
    /// Process raw PPG recordings into 1 s feature streams with HRV
    ProcessPpg(PpgArgs),
    /// Fuse processed EDA and PPG streams per subject
    Fuse(FuseArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    /// Directory containing raw recordings (defaults to Raw/eda or Raw/ppg)
    #[arg(long)]
    pub input_dir: Option<PathBuf>,

    /// Directory for processed files (defaults to Processed/eda or Processed/ppg)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Label table JSON (`{"label": [...]}`)
    #[arg(long, env = "PHYSIO_LABELS", default_value = "label.json")]
    pub labels: PathBuf,

    /// Sampling rate in Hz (defaults to 15 for EDA, 100 for PPG)
    #[arg(long)]
    pub sampling_rate: Option<f64>,

    /// Name of the raw signal column (defaults to EA for EDA, PG for PPG)
    #[arg(long)]
    pub signal_column: Option<String>,

    /// IANA time zone the epoch timestamps are converted to
    #[arg(long, env = "PHYSIO_TIMEZONE", default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// Whether the inputs are Feather (Arrow IPC) files instead of CSV
    #[arg(long)]
    pub feather: bool,
}

impl ProcessArgs {
    pub fn input_dir(&self, modality: Modality) -> PathBuf {
        self.input_dir
            .clone()
            .unwrap_or_else(|| modality.default_input_dir())
    }

    pub fn output_dir(&self, modality: Modality) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| modality.default_output_dir())
    }

    /// Resolve defaults and validate the settings for one modality.
    pub fn pipeline_config(&self, modality: Modality) -> Result<PipelineConfig, ConfigError> {
        let mut config = PipelineConfig::for_modality(modality);
        config.timezone = parse_timezone(&self.timezone)?;
        if let Some(rate) = self.sampling_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(ConfigError::InvalidSetting {
                    name: "sampling-rate",
                    message: format!("must be positive, got {}", rate),
                });
            }
            config.sampling_rate = rate;
        }
        if let Some(column) = &self.signal_column {
            config.signal_column = column.clone();
        }
        if self.feather {
            config.input_format = InputFormat::Feather;
        }
        Ok(config)
    }
}

/// HRV settings, only meaningful for PPG.
#[derive(Args, Debug, Clone)]
pub struct HrvArgs {
    /// HRV computation for PPG (rolling or tumbling)
    #[arg(long, default_value = "rolling")]
    pub hrv_mode: HrvMode,

    /// HRV window width in seconds
    #[arg(long, default_value = "300.0")]
    pub window_seconds: f64,

    /// The global feature set needs more peaks than this
    #[arg(long, default_value = "10")]
    pub global_min_peaks: usize,

    /// A rolling window needs more intervals than this
    #[arg(long, default_value = "5")]
    pub rolling_min_intervals: usize,

    /// Recordings longer than this many samples are subsampled for rolling statistics
    #[arg(long, default_value = "10000")]
    pub subsample_threshold: usize,

    /// Evaluate every Nth sample when subsampling rolling statistics
    #[arg(long, default_value = "100")]
    pub subsample_stride: usize,
}

impl HrvArgs {
    pub fn hrv_config(&self) -> Result<HrvConfig, ConfigError> {
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return Err(ConfigError::InvalidSetting {
                name: "window-seconds",
                message: format!("must be positive, got {}", self.window_seconds),
            });
        }
        if self.subsample_stride == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "subsample-stride",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(HrvConfig {
            mode: self.hrv_mode,
            window_seconds: self.window_seconds,
            global_min_peaks: self.global_min_peaks,
            rolling_min_intervals: self.rolling_min_intervals,
            subsample_threshold: self.subsample_threshold,
            subsample_stride: self.subsample_stride,
            ..HrvConfig::default()
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct PpgArgs {
    #[command(flatten)]
    pub process: ProcessArgs,

    #[command(flatten)]
    pub hrv: HrvArgs,
}

impl PpgArgs {
    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = self.process.pipeline_config(Modality::Ppg)?;
        config.hrv = Some(self.hrv.hrv_config()?);
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct FuseArgs {
    /// Directory of processed EDA streams
    #[arg(long, default_value = "Processed/eda")]
    pub eda_dir: PathBuf,

    /// Directory of processed PPG streams
    #[arg(long, default_value = "Processed/ppg")]
    pub ppg_dir: PathBuf,

    /// Directory for the fused output file
    #[arg(long, default_value = "Combined/eda_ppg")]
    pub output_dir: PathBuf,

    /// IANA time zone of the processed timestamps
    #[arg(long, env = "PHYSIO_TIMEZONE", default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// Maximum distance in seconds between matched EDA and PPG rows
    #[arg(long, default_value = "1.0")]
    pub tolerance_seconds: f64,
}

impl FuseArgs {
    pub fn fusion_config(&self) -> Result<FusionConfig, ConfigError> {
        if !(self.tolerance_seconds.is_finite() && self.tolerance_seconds >= 0.0) {
            return Err(ConfigError::InvalidSetting {
                name: "tolerance-seconds",
                message: format!("must be non-negative, got {}", self.tolerance_seconds),
            });
        }
        Ok(FusionConfig {
            tolerance: chrono::Duration::microseconds((self.tolerance_seconds * 1e6).round() as i64),
            ..FusionConfig::default()
        })
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        parse_timezone(&self.timezone)
    }
}

/// Settings for processing one modality's recordings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub modality: Modality,
    pub sampling_rate: f64,
    pub signal_column: String,
    pub timezone: Tz,
    pub input_format: InputFormat,
    /// HRV settings; `None` for modalities without beat detection.
    pub hrv: Option<HrvConfig>,
}

impl PipelineConfig {
    pub fn for_modality(modality: Modality) -> Self {
        Self {
            modality,
            sampling_rate: modality.default_sampling_rate(),
            signal_column: modality.default_signal_column().to_string(),
            timezone: chrono_tz::Asia::Bangkok,
            input_format: InputFormat::Csv,
            hrv: match modality {
                Modality::Ppg => Some(HrvConfig::default()),
                Modality::Eda => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HrvConfig {
    pub mode: HrvMode,
    pub window_seconds: f64,
    pub global_min_peaks: usize,
    pub rolling_min_intervals: usize,
    /// Rolling statistics are evaluated on every `subsample_stride`-th sample
    /// once a recording exceeds `subsample_threshold` samples. The gaps are
    /// interpolated, so this trades accuracy for speed.
    pub subsample_threshold: usize,
    pub subsample_stride: usize,
    /// Tachogram resampling rate for the PSD, Hz.
    pub interpolation_rate: f64,
}

impl Default for HrvConfig {
    fn default() -> Self {
        Self {
            mode: HrvMode::Rolling,
            window_seconds: 300.0,
            global_min_peaks: 10,
            rolling_min_intervals: 5,
            subsample_threshold: 10_000,
            subsample_stride: 100,
            interpolation_rate: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    pub tolerance: chrono::Duration,
    pub primary_suffix: String,
    pub secondary_suffix: String,
    pub coalesce: Vec<String>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            tolerance: chrono::Duration::seconds(1),
            primary_suffix: Modality::Eda.suffix().to_string(),
            secondary_suffix: Modality::Ppg.suffix().to_string(),
            coalesce: COALESCED_ATTRIBUTES.iter().map(|s| s.to_string()).collect(),
        }
    }
}
