use crate::config::HrvConfig;
use chrono::DateTime;
use chrono_tz::Tz;
use log::{debug, trace};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

pub const FREQUENCY_METRICS: [&str; 10] = [
    "HRV_ULF", "HRV_VLF", "HRV_LF", "HRV_HF", "HRV_VHF", "HRV_TP", "HRV_LFHF", "HRV_LFn",
    "HRV_HFn", "HRV_LnHF",
];
pub const TIME_METRICS: [&str; 3] = ["HRV_MeanNN", "HRV_SDNN", "HRV_RMSSD"];
pub const NONLINEAR_METRICS: [&str; 3] = ["HRV_SD1", "HRV_SD2", "HRV_SD1SD2"];

/// Frequency bands in Hz, lower bound exclusive, upper bound inclusive.
const BANDS: [(&str, f64, f64); 5] = [
    ("HRV_ULF", 0.0, 0.0033),
    ("HRV_VLF", 0.0033, 0.04),
    ("HRV_LF", 0.04, 0.15),
    ("HRV_HF", 0.15, 0.4),
    ("HRV_VHF", 0.4, 0.5),
];

/// Lowest frequency of interest; sets the Welch segment length.
const MIN_FREQUENCY: f64 = 0.0033;

/// Fewer interpolated tachogram samples than this and the PSD is not attempted.
const MIN_TACHOGRAM_SAMPLES: usize = 16;

/// Every metric of the full feature set, in output order.
pub fn feature_names() -> impl Iterator<Item = &'static str> {
    FREQUENCY_METRICS
        .into_iter()
        .chain(TIME_METRICS)
        .chain(NONLINEAR_METRICS)
}

/// One beat-to-beat interval, stamped with the time of its closing peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RrInterval {
    pub seconds: f64,
    pub timestamp: DateTime<Tz>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RrSeries {
    intervals: Vec<RrInterval>,
}

/// Sample indices where the mask is set.
pub fn peak_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &is_peak)| is_peak.then_some(i))
        .collect()
}

impl RrSeries {
    /// Intervals between consecutive marked samples. `mask` and `timestamps`
    /// are aligned sample for sample.
    pub fn from_peak_mask(mask: &[bool], timestamps: &[DateTime<Tz>], sampling_rate: f64) -> Self {
        Self::from_peak_indices(&peak_indices(mask), timestamps, sampling_rate)
    }

    pub fn from_peak_indices(
        peaks: &[usize],
        timestamps: &[DateTime<Tz>],
        sampling_rate: f64,
    ) -> Self {
        let intervals: Vec<RrInterval> = peaks
            .windows(2)
            .map(|w| RrInterval {
                seconds: (w[1] - w[0]) as f64 / sampling_rate,
                timestamp: timestamps[w[1]],
            })
            .collect();
        trace!("{} peaks -> {} RR intervals", peaks.len(), intervals.len());
        Self { intervals }
    }

    pub fn from_intervals(intervals: Vec<RrInterval>) -> Self {
        Self { intervals }
    }

    pub fn intervals(&self) -> &[RrInterval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn seconds(&self) -> Vec<f64> {
        self.intervals.iter().map(|iv| iv.seconds).collect()
    }

    pub fn millis(&self) -> Vec<f64> {
        self.intervals.iter().map(|iv| iv.seconds * 1000.0).collect()
    }

    /// Intervals whose closing peak lies in `[start, end)`.
    pub fn between(&self, start: DateTime<Tz>, end: DateTime<Tz>) -> &[RrInterval] {
        let lo = self.intervals.partition_point(|iv| iv.timestamp < start);
        let hi = self.intervals.partition_point(|iv| iv.timestamp < end);
        &self.intervals[lo..hi.max(lo)]
    }
}

/// Named HRV metrics. The key set is always complete; `None` means the
/// metric could not be computed.
#[derive(Debug, Clone, PartialEq)]
pub struct HrvFeatures {
    values: Vec<(&'static str, Option<f64>)>,
}

impl HrvFeatures {
    pub fn undefined() -> Self {
        Self {
            values: feature_names().map(|name| (name, None)).collect(),
        }
    }

    fn set(&mut self, name: &str, value: Option<f64>) {
        if let Some(slot) = self.values.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = value.filter(|v| v.is_finite());
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(key, _)| *key == name)
            .and_then(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<f64>)> + '_ {
        self.values.iter().copied()
    }

    pub fn is_undefined(&self) -> bool {
        self.values.iter().all(|(_, v)| v.is_none())
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation with `ddof` degrees of freedom removed.
pub(crate) fn std_dev(values: &[f64], ddof: usize) -> Option<f64> {
    if values.len() <= ddof {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|&x| (x - m).powi(2)).sum();
    Some((ss / (values.len() - ddof) as f64).sqrt())
}

/// Root mean square of successive differences.
pub(crate) fn rmssd(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let sq: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).powi(2)).collect();
    mean(&sq).map(f64::sqrt)
}

/// Full feature set over `rr`, gated on the number of detected peaks.
pub fn global_features(rr: &RrSeries, peak_count: usize, config: &HrvConfig) -> HrvFeatures {
    let mut features = HrvFeatures::undefined();
    if peak_count <= config.global_min_peaks {
        debug!(
            "HRV skipped: {} peaks, need more than {}",
            peak_count, config.global_min_peaks
        );
        return features;
    }

    let rr_ms = rr.millis();
    let (mean_nn, sdnn) = time_domain(&rr_ms, &mut features);
    frequency_domain(&rr_ms, config.interpolation_rate, &mut features);
    nonlinear(&rr_ms, sdnn, &mut features);
    debug!(
        "HRV over {} intervals: MeanNN {:?} ms, SDNN {:?} ms",
        rr.len(),
        mean_nn,
        sdnn
    );
    features
}

fn time_domain(rr_ms: &[f64], features: &mut HrvFeatures) -> (Option<f64>, Option<f64>) {
    let mean_nn = mean(rr_ms);
    let sdnn = std_dev(rr_ms, 1);
    features.set("HRV_MeanNN", mean_nn);
    features.set("HRV_SDNN", sdnn);
    features.set("HRV_RMSSD", rmssd(rr_ms));
    (mean_nn, sdnn)
}

fn nonlinear(rr_ms: &[f64], sdnn: Option<f64>, features: &mut HrvFeatures) {
    let diffs: Vec<f64> = rr_ms.windows(2).map(|w| w[1] - w[0]).collect();
    let sd1 = std_dev(&diffs, 1).map(|sd| sd / 2f64.sqrt());
    let sd2 = match (sdnn, sd1) {
        (Some(sdnn), Some(sd1)) => Some((2.0 * sdnn.powi(2) - sd1.powi(2)).max(0.0).sqrt()),
        _ => None,
    };
    let ratio = match (sd1, sd2) {
        (Some(a), Some(b)) if b > 0.0 => Some(a / b),
        _ => None,
    };
    features.set("HRV_SD1", sd1);
    features.set("HRV_SD2", sd2);
    features.set("HRV_SD1SD2", ratio);
}

fn frequency_domain(rr_ms: &[f64], fs: f64, features: &mut HrvFeatures) {
    let tachogram = interpolate_tachogram(rr_ms, fs);
    if tachogram.len() < MIN_TACHOGRAM_SAMPLES {
        debug!(
            "Tachogram too short for PSD ({} samples)",
            tachogram.len()
        );
        return;
    }

    let segment = ((2.0 / MIN_FREQUENCY) * fs) as usize;
    let (freqs, psd) = welch_psd(&tachogram, fs, segment.min(tachogram.len()));
    let resolution = freqs.get(1).copied().unwrap_or(fs);

    let mut band_powers = Vec::with_capacity(BANDS.len());
    for (name, low, high) in BANDS {
        let power = band_power(&freqs, &psd, low, high, resolution);
        features.set(name, power);
        band_powers.push(power);
    }

    let defined: Vec<f64> = band_powers.iter().flatten().copied().collect();
    let tp = (!defined.is_empty()).then(|| defined.iter().sum::<f64>());
    let lf = features.get("HRV_LF");
    let hf = features.get("HRV_HF");

    let ratio = |num: Option<f64>, den: Option<f64>| match (num, den) {
        (Some(n), Some(d)) if d > 0.0 => Some(n / d),
        _ => None,
    };
    features.set("HRV_TP", tp);
    features.set("HRV_LFHF", ratio(lf, hf));
    features.set("HRV_LFn", ratio(lf, tp));
    features.set("HRV_HFn", ratio(hf, tp));
    features.set("HRV_LnHF", hf.filter(|&v| v > 0.0).map(f64::ln));
}

/// Integrated power of the bins in `(low, high]`; `None` if the band holds no bin.
fn band_power(freqs: &[f64], psd: &[f64], low: f64, high: f64, resolution: f64) -> Option<f64> {
    let mut bins = freqs
        .iter()
        .zip(psd)
        .filter(|(&f, _)| f > low && f <= high)
        .map(|(_, &p)| p)
        .peekable();
    bins.peek()?;
    Some(bins.sum::<f64>() * resolution)
}

/// Linear resampling of the RR series (ms) onto a uniform grid at `fs` Hz.
/// Beat times are the cumulative interval sums; the grid stops before the last beat.
fn interpolate_tachogram(rr_ms: &[f64], fs: f64) -> Vec<f64> {
    if rr_ms.len() < 2 {
        return Vec::new();
    }
    let mut times = Vec::with_capacity(rr_ms.len());
    let mut t = 0.0;
    for &rr in rr_ms {
        t += rr / 1000.0;
        times.push(t);
    }

    let start = times[0];
    let duration = times[times.len() - 1] - start;
    let num_samples = (duration * fs).ceil() as usize;

    let mut out = Vec::with_capacity(num_samples);
    let mut j = 0;
    for i in 0..num_samples {
        let t = start + i as f64 / fs;
        while j < times.len() - 2 && times[j + 1] < t {
            j += 1;
        }
        let (t1, t2) = (times[j], times[j + 1]);
        let alpha = if t2 > t1 { (t - t1) / (t2 - t1) } else { 0.0 };
        out.push(rr_ms[j] + alpha * (rr_ms[j + 1] - rr_ms[j]));
    }
    out
}

/// Periodic Hann taper for Welch segments: `w[i] = 0.5 - 0.5 cos(2πi / size)`.
fn create_hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

/// One-sided Welch PSD with 50% overlap, per-segment mean removal and
/// density scaling. Returns (frequencies, power).
fn welch_psd(signal: &[f64], fs: f64, segment_length: usize) -> (Vec<f64>, Vec<f64>) {
    let overlap = segment_length / 2;
    let step = (segment_length - overlap).max(1);
    let num_segments = (signal.len() - segment_length) / step + 1;

    let window = create_hann_window(segment_length);
    let window_power: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (fs * window_power);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(segment_length);

    let bins = segment_length / 2 + 1;
    let mut psd = vec![0.0; bins];
    for s in 0..num_segments {
        let segment = &signal[s * step..s * step + segment_length];
        let seg_mean = segment.iter().sum::<f64>() / segment_length as f64;

        let mut buffer: Vec<Complex<f64>> = segment
            .iter()
            .zip(window.iter())
            .map(|(&x, &w)| Complex::new((x - seg_mean) * w, 0.0))
            .collect();
        fft.process(&mut buffer);

        for (k, value) in buffer.iter().take(bins).enumerate() {
            let is_edge = k == 0 || (segment_length % 2 == 0 && k == segment_length / 2);
            let factor = if is_edge { 1.0 } else { 2.0 };
            psd[k] += factor * value.norm_sqr() * scale;
        }
    }
    for p in &mut psd {
        *p /= num_segments as f64;
    }

    let freqs = (0..bins)
        .map(|k| k as f64 * fs / segment_length as f64)
        .collect();
    trace!(
        "Welch PSD: {} segments of {} samples",
        num_segments,
        segment_length
    );
    (freqs, psd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Asia::Bangkok;

    fn sample_times(n: usize, rate: f64) -> Vec<DateTime<Tz>> {
        let start = Bangkok.timestamp_opt(1_700_000_000, 0).unwrap();
        (0..n)
            .map(|i| start + Duration::microseconds((i as f64 / rate * 1e6) as i64))
            .collect()
    }

    fn series_from_seconds(rr: &[f64]) -> RrSeries {
        let start = Bangkok.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut t = 0.0;
        RrSeries::from_intervals(
            rr.iter()
                .map(|&s| {
                    t += s;
                    RrInterval {
                        seconds: s,
                        timestamp: start + Duration::milliseconds((t * 1000.0) as i64),
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn intervals_from_peak_mask() {
        let times = sample_times(500, 100.0);
        let mut mask = vec![false; 500];
        for i in [0, 100, 250, 400] {
            mask[i] = true;
        }
        let rr = RrSeries::from_peak_mask(&mask, &times, 100.0);
        assert_eq!(rr.seconds(), vec![1.0, 1.5, 1.5]);
        assert_eq!(rr.intervals()[0].timestamp, times[100]);
        assert_eq!(rr.intervals()[2].timestamp, times[400]);
    }

    #[test]
    fn fewer_than_two_peaks_is_empty() {
        let times = sample_times(10, 10.0);
        let mut mask = vec![false; 10];
        assert!(RrSeries::from_peak_mask(&mask, &times, 10.0).is_empty());
        mask[3] = true;
        assert!(RrSeries::from_peak_mask(&mask, &times, 10.0).is_empty());
    }

    #[test]
    fn between_is_half_open() {
        let rr = series_from_seconds(&[1.0, 1.0, 1.0, 1.0]);
        let t0 = rr.intervals()[0].timestamp;
        let window = rr.between(t0, t0 + Duration::seconds(2));
        assert_eq!(window.len(), 2);
        assert!(rr.between(t0 + Duration::seconds(10), t0 + Duration::seconds(20)).is_empty());
    }

    #[test]
    fn two_peaks_yield_undefined_features() {
        let rr = series_from_seconds(&[0.8]);
        let features = global_features(&rr, 2, &HrvConfig::default());
        assert!(features.is_undefined());
        assert_eq!(features.iter().count(), 16);
    }

    #[test]
    fn gate_is_strictly_more_than_ten_peaks() {
        let rr = series_from_seconds(&[0.8; 9]);
        assert!(global_features(&rr, 10, &HrvConfig::default()).is_undefined());
        let rr = series_from_seconds(&[0.8, 0.9, 0.8, 0.9, 0.8, 0.9, 0.8, 0.9, 0.8, 0.9]);
        let features = global_features(&rr, 11, &HrvConfig::default());
        assert_relative_eq!(features.get("HRV_MeanNN").unwrap(), 850.0, epsilon = 1e-9);
    }

    #[test]
    fn time_and_poincare_metrics() {
        let rr = [0.8, 0.9, 0.8, 0.9, 0.8, 0.9, 0.8, 0.9, 0.8, 0.9, 0.8, 0.9];
        let features = global_features(&series_from_seconds(&rr), rr.len() + 1, &HrvConfig::default());

        let ms: Vec<f64> = rr.iter().map(|s| s * 1000.0).collect();
        let sdnn = std_dev(&ms, 1).unwrap();
        assert_relative_eq!(features.get("HRV_SDNN").unwrap(), sdnn, epsilon = 1e-9);
        assert_relative_eq!(features.get("HRV_RMSSD").unwrap(), 100.0, epsilon = 1e-9);
        // Successive differences alternate +100/-100.
        let diffs: Vec<f64> = ms.windows(2).map(|w| w[1] - w[0]).collect();
        let sd1 = std_dev(&diffs, 1).unwrap() / 2f64.sqrt();
        assert_relative_eq!(features.get("HRV_SD1").unwrap(), sd1, epsilon = 1e-9);
        let sd2 = (2.0 * sdnn * sdnn - sd1 * sd1).max(0.0).sqrt();
        assert_relative_eq!(features.get("HRV_SD2").unwrap(), sd2, epsilon = 1e-9);
    }

    #[test]
    fn short_series_has_no_frequency_metrics() {
        // 3.3 s of beats gives 14 tachogram samples at 4 Hz.
        let rr = [0.3; 12];
        let features = global_features(&series_from_seconds(&rr), 13, &HrvConfig::default());
        for name in FREQUENCY_METRICS {
            assert!(features.get(name).is_none(), "{name} should be undefined");
        }
        assert!(features.get("HRV_MeanNN").is_some());
    }

    #[test]
    fn respiratory_modulation_lands_in_lf() {
        // Eight minutes of beats modulated at 0.1 Hz.
        let mut rr = Vec::new();
        let mut t = 0.0;
        while t < 480.0 {
            let value = 0.8 + 0.05 * (2.0 * PI * 0.1 * t).sin();
            rr.push(value);
            t += value;
        }
        let features = global_features(&series_from_seconds(&rr), rr.len() + 1, &HrvConfig::default());
        let lf = features.get("HRV_LF").unwrap();
        let hf = features.get("HRV_HF").unwrap();
        assert!(lf > 10.0 * hf, "LF {lf} should dominate HF {hf}");
        let tp = features.get("HRV_TP").unwrap();
        assert_relative_eq!(features.get("HRV_LFn").unwrap(), lf / tp, epsilon = 1e-12);
        assert_relative_eq!(features.get("HRV_LnHF").unwrap(), hf.ln(), epsilon = 1e-12);
    }

    #[test]
    fn welch_density_integrates_to_variance() {
        // Density PSD integrates to the signal variance.
        let signal: Vec<f64> = (0..4096)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                sign * ((i * 7919) % 13) as f64 / 13.0
            })
            .collect();
        let (freqs, psd) = welch_psd(&signal, 4.0, 256);
        let df = freqs[1];
        let integrated: f64 = psd.iter().sum::<f64>() * df;
        let m = mean(&signal).unwrap();
        let var = signal.iter().map(|x| (x - m).powi(2)).sum::<f64>() / signal.len() as f64;
        assert_relative_eq!(integrated, var, max_relative = 0.15);
    }

    #[test]
    fn hann_window_is_periodic() {
        let w = create_hann_window(8);
        assert_eq!(w.len(), 8);
        assert_relative_eq!(w[0], 0.0);
        assert_relative_eq!(w[4], 1.0, epsilon = 1e-12);
        assert_relative_eq!(w[1], w[7], epsilon = 1e-12);
        assert!(w[7] > 0.0);
    }
}
