use crate::config::{FusionConfig, HrvConfig, HrvMode, PipelineConfig};
use crate::data_loading::{discover_recordings, read_processed_frame, read_recording, InputFormat};
use crate::error::RecordingError;
use crate::frame::{Column, Frame};
use crate::fusion::fuse;
use crate::heart_analysis::{global_features, RrSeries};
use crate::hrv_windows::{join_windows, rolling_hrv, tumbling_hrv};
use crate::labels::{subject_id_from_filename, LabelTable, SubjectLabel};
use crate::output::{write_frame_csv, write_with_fallback};
use crate::resample::{check_span, resample_to_seconds};
use crate::signal_processing::{Detection, EdaProcessor, PpgProcessor, SignalProcessor};
use crate::timestamps::{Sample, TimestampNormalizer};
use crate::Modality;
use anyhow::{Context, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const FUSED_FILENAME: &str = "combined_eda_ppg_data.csv";

/// Decimal places used for the fused output.
const FUSED_PRECISION: usize = 6;

#[derive(Debug)]
pub struct ProcessedRecording {
    pub subject_id: String,
    pub frame: Frame,
    /// Rows dropped for an unusable timestamp or signal value.
    pub dropped_rows: usize,
    pub peak_count: usize,
}

pub fn default_processor(modality: Modality) -> Box<dyn SignalProcessor> {
    match modality {
        Modality::Eda => Box::new(EdaProcessor::default()),
        Modality::Ppg => Box::new(PpgProcessor::default()),
    }
}

fn check_len(expected: usize, actual: usize) -> Result<(), RecordingError> {
    if expected != actual {
        return Err(RecordingError::LengthMismatch { expected, actual });
    }
    Ok(())
}

fn signal_columns(modality: Modality, raw: &[f64], detection: Detection) -> Vec<Column> {
    let prefix = modality.prefix();
    let mut columns = vec![
        Column::numeric(format!("{prefix}_Raw"), raw.iter().copied().map(Some).collect()),
        Column::numeric(
            format!("{prefix}_Clean"),
            detection.cleaned.into_iter().map(Some).collect(),
        ),
        Column::numeric(
            modality.peak_column(),
            detection
                .peaks
                .iter()
                .map(|&p| Some(if p { 1.0 } else { 0.0 }))
                .collect(),
        ),
    ];
    for (name, values) in detection.info {
        columns.push(Column::numeric(name, values));
    }
    columns
}

fn hrv_columns(
    timestamps: &[DateTime<Tz>],
    peaks: &[bool],
    peak_count: usize,
    sampling_rate: f64,
    config: &HrvConfig,
) -> Vec<Column> {
    let rr = RrSeries::from_peak_mask(peaks, timestamps, sampling_rate);
    let n = timestamps.len();

    match config.mode {
        HrvMode::Rolling => {
            let features = global_features(&rr, peak_count, config);
            if features.is_undefined() {
                info!("Not enough peaks for HRV ({}), features left empty", peak_count);
            }
            let mut columns: Vec<Column> = features
                .iter()
                .map(|(name, value)| Column::broadcast(name, value, n))
                .collect();
            columns.extend(rolling_hrv(timestamps, &rr, peak_count, config).into_columns());
            columns
        }
        HrvMode::Tumbling => {
            let records = tumbling_hrv(timestamps, &rr, config);
            debug!("{} tumbling windows", records.len());
            join_windows(timestamps, &records)
        }
    }
}

/// Run detection, HRV and labelling over normalised samples and resample
/// the result to one row per second.
pub fn process_samples(
    samples: &[Sample],
    label: &SubjectLabel,
    processor: &dyn SignalProcessor,
    config: &PipelineConfig,
) -> Result<(Frame, usize), RecordingError> {
    if samples.is_empty() {
        return Err(RecordingError::EmptyRecording);
    }
    let timestamps: Vec<DateTime<Tz>> = samples.iter().map(|s| s.timestamp).collect();
    check_span(&timestamps)?;
    let raw: Vec<f64> = samples.iter().map(|s| s.value).collect();

    let detection = processor.process(&raw, config.sampling_rate)?;
    check_len(raw.len(), detection.cleaned.len())?;
    check_len(raw.len(), detection.peaks.len())?;
    let peak_count = detection.peak_count();
    let peaks = detection.peaks.clone();

    let mut frame = Frame::new(timestamps);
    for column in signal_columns(config.modality, &raw, detection) {
        frame.push_column(column)?;
    }
    if let Some(hrv) = &config.hrv {
        let columns = hrv_columns(frame.timestamps(), &peaks, peak_count, config.sampling_rate, hrv);
        for column in columns {
            frame.push_column(column)?;
        }
    }
    for column in label.columns(frame.len()) {
        frame.push_column(column)?;
    }

    Ok((resample_to_seconds(&frame)?, peak_count))
}

/// Load, normalise and process one recording file.
pub fn process_recording(
    path: &Path,
    labels: &LabelTable,
    processor: &dyn SignalProcessor,
    config: &PipelineConfig,
) -> Result<ProcessedRecording, RecordingError> {
    let subject_id = subject_id_from_filename(path)
        .ok_or_else(|| RecordingError::MissingLabel(path.display().to_string()))?;
    let label = labels
        .get(&subject_id)
        .ok_or_else(|| RecordingError::MissingLabel(subject_id.clone()))?;

    let loaded = read_recording(path, config.input_format, &config.signal_column)?;
    let normalized = TimestampNormalizer::new(config.timezone).normalize(&loaded.rows);
    let (frame, peak_count) = process_samples(&normalized.samples, label, processor, config)?;

    Ok(ProcessedRecording {
        subject_id,
        frame,
        dropped_rows: loaded.malformed + normalized.dropped,
        peak_count,
    })
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Output path for a processed recording: same file name, always `.csv`.
fn processed_path(output_dir: &Path, input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("recording"));
    output_dir.join(name).with_extension("csv")
}

/// Process every recording in `input_dir`. Bad files are skipped; a missing
/// input directory aborts the batch.
pub fn process_directory(
    input_dir: &Path,
    output_dir: &Path,
    labels: &LabelTable,
    processor: &dyn SignalProcessor,
    config: &PipelineConfig,
) -> Result<BatchReport> {
    let files = discover_recordings(input_dir, config.input_format)?;
    if files.is_empty() {
        warn!("No {:?} recordings found in {}", config.input_format, input_dir.display());
    }
    info!("Found {} {} recordings to process", files.len(), config.modality);

    let mut report = BatchReport::default();
    for path in files {
        let result = process_recording(&path, labels, processor, config).and_then(|processed| {
            let out = processed_path(output_dir, &path);
            write_frame_csv(&out, &processed.frame, None)?;
            Ok((processed, out))
        });
        match result {
            Ok((processed, out)) => {
                info!(
                    "Processed {} for subject {} ({} rows, {} peaks, {} rows dropped)",
                    path.display(),
                    processed.subject_id,
                    processed.frame.len(),
                    processed.peak_count,
                    processed.dropped_rows
                );
                report.written.push(out);
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                report.skipped.push(path);
            }
        }
    }
    info!(
        "{}: {} processed, {} skipped",
        config.modality,
        report.written.len(),
        report.skipped.len()
    );
    Ok(report)
}

#[derive(Debug)]
pub struct FusionReport {
    pub output: PathBuf,
    pub fused_subjects: Vec<String>,
    pub rows: usize,
}

fn by_subject(files: Vec<PathBuf>, modality: Modality) -> BTreeMap<String, PathBuf> {
    let mut map: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in files {
        let Some(id) = subject_id_from_filename(&path) else {
            warn!("Cannot tell the subject of {}", path.display());
            continue;
        };
        if let Some(existing) = map.get(&id) {
            warn!(
                "Several {} files for subject {}: keeping {}, ignoring {}",
                modality,
                id,
                existing.display(),
                path.display()
            );
            continue;
        }
        map.insert(id, path);
    }
    map
}

/// Fuse processed EDA and PPG streams subject by subject and write the
/// concatenated result, trying `output_dir` first and the working directory second.
pub fn fuse_directories(
    eda_dir: &Path,
    ppg_dir: &Path,
    output_dir: &Path,
    tz: Tz,
    config: &FusionConfig,
) -> Result<FusionReport> {
    let eda = by_subject(discover_recordings(eda_dir, InputFormat::Csv)?, Modality::Eda);
    let ppg = by_subject(discover_recordings(ppg_dir, InputFormat::Csv)?, Modality::Ppg);
    info!(
        "Fusing {} EDA and {} PPG streams",
        eda.len(),
        ppg.len()
    );

    let mut frames = Vec::new();
    let mut fused_subjects = Vec::new();
    for (id, eda_path) in &eda {
        let Some(ppg_path) = ppg.get(id) else {
            warn!("No PPG stream for subject {}", id);
            continue;
        };
        let fused = read_processed_frame(eda_path, tz, &config.coalesce)
            .and_then(|left| {
                let right = read_processed_frame(ppg_path, tz, &config.coalesce)?;
                fuse(&left, &right, config)
            });
        match fused {
            Ok(frame) if frame.is_empty() => warn!("Nothing to fuse for subject {}", id),
            Ok(frame) => {
                debug!("Subject {}: {} fused rows", id, frame.len());
                frames.push(frame);
                fused_subjects.push(id.clone());
            }
            Err(e) => warn!("Skipping subject {}: {}", id, e),
        }
    }
    for id in ppg.keys().filter(|id| !eda.contains_key(*id)) {
        warn!("No EDA stream for subject {}", id);
    }

    let combined = Frame::concat(frames);
    let candidates = [output_dir.join(FUSED_FILENAME), PathBuf::from(FUSED_FILENAME)];
    let output = write_with_fallback(&combined, &candidates, Some(FUSED_PRECISION))
        .context("Failed to write fused data")?;
    info!(
        "Fused {} subjects into {} rows",
        fused_subjects.len(),
        combined.len()
    );
    Ok(FusionReport {
        output,
        fused_subjects,
        rows: combined.len(),
    })
}
