use crate::error::{ConfigError, RecordingError};
use crate::frame::{Column, Frame, Scalar};
use crate::timestamps::{parse_zoned, RawSample};
use arrow::array::{Array, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::ipc::reader::FileReaderBuilder;
use chrono_tz::Tz;
use log::{debug, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Epoch-seconds column of raw recordings.
pub const TIMESTAMP_COLUMN: &str = "LocalTimestamp";
/// Zoned timestamp column of processed and fused files.
pub const DATETIME_COLUMN: &str = "DateTime";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Feather,
}

impl InputFormat {
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            InputFormat::Csv => &["csv"],
            InputFormat::Feather => &["feather", "arrow", "ipc"],
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        [InputFormat::Csv, InputFormat::Feather]
            .into_iter()
            .find(|format| format.extensions().contains(&ext.as_str()))
    }
}

/// Files of the given format directly inside `dir`, sorted by name.
pub fn discover_recordings(dir: &Path, format: InputFormat) -> Result<Vec<PathBuf>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::MissingInputDir(dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| InputFormat::from_path(path) == Some(format))
        .collect();
    files.sort();
    debug!("Found {} recordings in {}", files.len(), dir.display());
    Ok(files)
}

/// Rows of a raw recording before timestamp normalisation.
#[derive(Debug, Default)]
pub struct LoadedRecording {
    pub rows: Vec<RawSample>,
    /// Rows dropped because the signal value was missing or not numeric.
    pub malformed: usize,
}

impl LoadedRecording {
    fn push(&mut self, epoch: Option<f64>, value: Option<f64>) {
        match value.filter(|v| v.is_finite()) {
            Some(value) => self.rows.push(RawSample { epoch, value }),
            None => self.malformed += 1,
        }
    }
}

fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok()
}

pub fn read_recording(
    path: &Path,
    format: InputFormat,
    signal_column: &str,
) -> Result<LoadedRecording, RecordingError> {
    let loaded = match format {
        InputFormat::Csv => read_csv_recording(path, signal_column)?,
        InputFormat::Feather => read_feather_recording(path, signal_column)?,
    };
    if loaded.malformed > 0 {
        warn!(
            "{}: dropped {} rows without a numeric {} value",
            path.display(),
            loaded.malformed,
            signal_column
        );
    }
    Ok(loaded)
}

pub fn read_csv_recording(path: &Path, signal_column: &str) -> Result<LoadedRecording, RecordingError> {
    let file = File::open(path).map_err(|source| RecordingError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);

    let headers = rdr.headers()?.clone();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| RecordingError::MissingColumn(name.to_string()))
    };
    let ts_idx = find(TIMESTAMP_COLUMN)?;
    let signal_idx = find(signal_column)?;

    let mut loaded = LoadedRecording::default();
    for result in rdr.records() {
        let record = result?;
        let epoch = record.get(ts_idx).and_then(parse_number);
        let value = record.get(signal_idx).and_then(parse_number);
        loaded.push(epoch, value);
    }
    Ok(loaded)
}

pub fn read_feather_recording(
    path: &Path,
    signal_column: &str,
) -> Result<LoadedRecording, RecordingError> {
    let file = File::open(path).map_err(|source| RecordingError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = FileReaderBuilder::new().build(file)?;

    let mut loaded = LoadedRecording::default();
    for batch in reader {
        let batch = batch?;
        let as_f64 = |name: &str| -> Result<Float64Array, RecordingError> {
            let column = batch
                .column_by_name(name)
                .ok_or_else(|| RecordingError::MissingColumn(name.to_string()))?;
            let converted = cast(column, &DataType::Float64)?;
            converted
                .as_any()
                .downcast_ref::<Float64Array>()
                .cloned()
                .ok_or_else(|| RecordingError::MissingColumn(name.to_string()))
        };
        let epochs = as_f64(TIMESTAMP_COLUMN)?;
        let values = as_f64(signal_column)?;
        for (epoch, value) in epochs.iter().zip(values.iter()) {
            loaded.push(epoch, value);
        }
    }
    Ok(loaded)
}

/// Load a processed stream written by `output::write_frame_csv`.
///
/// Columns named in `categorical` are always read as metadata. Any other
/// column is numeric unless one of its defined cells is not a number, in
/// which case the whole column is categorical. Rows whose `DateTime` does
/// not parse are dropped.
pub fn read_processed_frame(
    path: &Path,
    tz: Tz,
    categorical: &[String],
) -> Result<Frame, RecordingError> {
    let file = File::open(path).map_err(|source| RecordingError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = rdr.headers()?.clone();
    let ts_idx = headers
        .iter()
        .position(|h| h == DATETIME_COLUMN)
        .ok_or_else(|| RecordingError::MissingColumn(DATETIME_COLUMN.to_string()))?;

    let mut cells: Vec<(usize, String, Vec<Option<Scalar>>)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != ts_idx)
        .map(|(idx, name)| (idx, name.to_string(), Vec::new()))
        .collect();

    let mut timestamps = Vec::new();
    let mut skipped = 0;
    for result in rdr.records() {
        let record = result?;
        let Some(timestamp) = record.get(ts_idx).and_then(|cell| parse_zoned(cell, tz)) else {
            skipped += 1;
            continue;
        };
        timestamps.push(timestamp);
        for (idx, _, values) in cells.iter_mut() {
            values.push(Scalar::parse(record.get(*idx).unwrap_or("")));
        }
    }
    if skipped > 0 {
        warn!(
            "{}: dropped {} rows with unreadable {}",
            path.display(),
            skipped,
            DATETIME_COLUMN
        );
    }

    let columns = cells
        .into_iter()
        .map(|(_, name, values)| {
            let is_numeric = !categorical.iter().any(|c| *c == name)
                && values
                    .iter()
                    .flatten()
                    .all(|v| matches!(v, Scalar::Number(_)));
            if is_numeric {
                let numbers = values
                    .into_iter()
                    .map(|v| match v {
                        Some(Scalar::Number(n)) => Some(n),
                        _ => None,
                    })
                    .collect();
                Column::numeric(name, numbers)
            } else {
                debug!("{}: column {} read as categorical", path.display(), name);
                Column::categorical(name, values)
            }
        })
        .collect();
    Frame::with_columns(timestamps, columns)
}
