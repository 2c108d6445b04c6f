//! Windowed HRV: centred rolling RR statistics and tumbling feature sets.

use crate::config::HrvConfig;
use crate::frame::Column;
use crate::heart_analysis::{self, feature_names, global_features, HrvFeatures, RrSeries};
use crate::timestamps::epoch_seconds;
use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use log::debug;

pub const ROLLING_METRICS: [&str; 3] = ["RR_Mean", "RMSSD", "SDNN"];
pub const WINDOW_START_COLUMN: &str = "HRV_WindowStart";
pub const WINDOW_END_COLUMN: &str = "HRV_WindowEnd";

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::microseconds((seconds * 1e6).round() as i64)
}

/// Rolling RR statistics per sample, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingHrv {
    pub rr_mean: Vec<Option<f64>>,
    pub rmssd: Vec<Option<f64>>,
    pub sdnn: Vec<Option<f64>>,
}

impl RollingHrv {
    pub fn undefined(len: usize) -> Self {
        Self {
            rr_mean: vec![None; len],
            rmssd: vec![None; len],
            sdnn: vec![None; len],
        }
    }

    pub fn into_columns(self) -> Vec<Column> {
        let [mean, rmssd, sdnn] = ROLLING_METRICS;
        vec![
            Column::numeric(mean, self.rr_mean),
            Column::numeric(rmssd, self.rmssd),
            Column::numeric(sdnn, self.sdnn),
        ]
    }
}

/// Centred rolling statistics over `[t - W/2, t + W/2)` for each sample time.
///
/// Runs only when the recording passed the global peak gate and has at
/// least three peaks. Long recordings are evaluated on a stride and the
/// skipped samples interpolated; the first and last evaluated values are
/// never extrapolated outward.
pub fn rolling_hrv(
    timestamps: &[DateTime<Tz>],
    rr: &RrSeries,
    peak_count: usize,
    config: &HrvConfig,
) -> RollingHrv {
    let n = timestamps.len();
    let mut out = RollingHrv::undefined(n);
    if peak_count <= config.global_min_peaks || peak_count < 3 {
        debug!("Rolling HRV skipped: {} peaks", peak_count);
        return out;
    }

    let stride = if n > config.subsample_threshold {
        config.subsample_stride.max(1)
    } else {
        1
    };
    let half = seconds_to_duration(config.window_seconds / 2.0);

    let mut evaluated = 0;
    for i in (0..n).step_by(stride) {
        let t = timestamps[i];
        let window: Vec<f64> = rr
            .between(t - half, t + half)
            .iter()
            .map(|iv| iv.seconds)
            .collect();
        if window.len() <= config.rolling_min_intervals {
            continue;
        }
        out.rr_mean[i] = heart_analysis::mean(&window);
        out.rmssd[i] = heart_analysis::rmssd(&window);
        out.sdnn[i] = heart_analysis::std_dev(&window, 0);
        evaluated += 1;
    }
    debug!(
        "Rolling HRV: {} of {} samples evaluated (stride {})",
        evaluated, n, stride
    );

    interpolate_gaps(&mut out.rr_mean);
    interpolate_gaps(&mut out.rmssd);
    interpolate_gaps(&mut out.sdnn);
    out
}

/// Linear interpolation along the index between defined values. Leading and
/// trailing gaps stay undefined.
pub fn interpolate_gaps(values: &mut [Option<f64>]) {
    let defined: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();
    for pair in defined.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (Some(va), Some(vb)) = (values[a], values[b]) else {
            continue;
        };
        for i in a + 1..b {
            let alpha = (i - a) as f64 / (b - a) as f64;
            values[i] = Some(va + alpha * (vb - va));
        }
    }
}

/// Feature set for one tumbling window `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRecord {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub features: HrvFeatures,
}

/// Non-overlapping windows from the first sample time while the window start
/// precedes the last sample time.
pub fn tumbling_hrv(
    timestamps: &[DateTime<Tz>],
    rr: &RrSeries,
    config: &HrvConfig,
) -> Vec<WindowRecord> {
    let (Some(&first), Some(&last)) = (timestamps.first(), timestamps.last()) else {
        return Vec::new();
    };
    let width = seconds_to_duration(config.window_seconds);
    if width <= Duration::zero() {
        return Vec::new();
    }

    let mut records = Vec::new();
    let mut start = first;
    while start < last {
        let end = start + width;
        let subset = RrSeries::from_intervals(rr.between(start, end).to_vec());
        let peak_count = if subset.is_empty() { 0 } else { subset.len() + 1 };
        records.push(WindowRecord {
            start,
            end,
            features: global_features(&subset, peak_count, config),
        });
        start = end;
    }
    debug!("Tumbling HRV: {} windows", records.len());
    records
}

/// Left-join window records onto samples whose timestamp equals a window start.
pub fn join_windows(timestamps: &[DateTime<Tz>], records: &[WindowRecord]) -> Vec<Column> {
    let matches: Vec<Option<&WindowRecord>> = timestamps
        .iter()
        .map(|t| {
            records
                .binary_search_by(|r| r.start.cmp(t))
                .ok()
                .map(|idx| &records[idx])
        })
        .collect();

    let mut columns = vec![
        Column::numeric(
            WINDOW_START_COLUMN,
            matches
                .iter()
                .map(|m| m.map(|r| epoch_seconds(&r.start)))
                .collect(),
        ),
        Column::numeric(
            WINDOW_END_COLUMN,
            matches
                .iter()
                .map(|m| m.map(|r| epoch_seconds(&r.end)))
                .collect(),
        ),
    ];
    for name in feature_names() {
        columns.push(Column::numeric(
            name,
            matches
                .iter()
                .map(|m| m.and_then(|r| r.features.get(name)))
                .collect(),
        ));
    }
    columns
}
