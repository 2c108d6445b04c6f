use crate::data_loading::DATETIME_COLUMN;
use crate::error::RecordingError;
use crate::frame::Frame;
use crate::timestamps::format_zoned;
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Write a frame as CSV with `DateTime` first. Undefined cells are left
/// empty; `float_precision` fixes the number of decimals for numeric cells.
pub fn write_frame_csv(
    path: &Path,
    frame: &Frame,
    float_precision: Option<usize>,
) -> Result<(), RecordingError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(|source| RecordingError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec![DATETIME_COLUMN];
    header.extend(frame.column_names());
    writer.write_record(&header)?;

    let mut row = Vec::with_capacity(frame.columns().len() + 1);
    for (i, timestamp) in frame.timestamps().iter().enumerate() {
        row.clear();
        row.push(format_zoned(timestamp));
        for column in frame.columns() {
            row.push(column.data.format_cell(i, float_precision));
        }
        writer.write_record(&row)?;
    }
    writer.flush().map_err(|source| RecordingError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Try each candidate path in order; the first successful write wins.
pub fn write_with_fallback(
    frame: &Frame,
    candidates: &[PathBuf],
    float_precision: Option<usize>,
) -> Result<PathBuf> {
    let mut last_error = None;
    for path in candidates {
        match write_frame_csv(path, frame, float_precision) {
            Ok(()) => {
                info!("Wrote {} rows to {}", frame.len(), path.display());
                return Ok(path.clone());
            }
            Err(e) => {
                warn!("Could not write {}: {}", path.display(), e);
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) => anyhow!(e).context("no writable output location"),
        None => anyhow!("no output location given"),
    })
}
