//! Signal cleaning and peak detection for EDA and PPG recordings.

use crate::error::RecordingError;
use log::{debug, trace};
use sci_rs::signal::filter::{design::Sos, sosfiltfilt_dyn};
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Output of a peak-detection pass. Every vector has one entry per input sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub cleaned: Vec<f64>,
    pub peaks: Vec<bool>,
    /// Additional named per-sample columns (rate, tonic level, ...).
    pub info: Vec<(String, Vec<Option<f64>>)>,
}

impl Detection {
    pub fn peak_count(&self) -> usize {
        self.peaks.iter().filter(|&&p| p).count()
    }
}

/// Cleans a raw signal and marks its peaks.
pub trait SignalProcessor {
    fn process(&self, signal: &[f64], sampling_rate: f64) -> Result<Detection, RecordingError>;
}

fn validate(signal: &[f64], sampling_rate: f64) -> Result<(), RecordingError> {
    if !(sampling_rate.is_finite() && sampling_rate > 0.0) {
        return Err(RecordingError::InvalidSamplingRate(sampling_rate));
    }
    if signal.is_empty() {
        return Err(RecordingError::EmptyRecording);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Low,
    High,
}

/// Second-order Butterworth section (RBJ cookbook, Q = 1/sqrt(2)).
/// Returns `None` when the cutoff is not strictly inside (0, nyquist).
fn biquad(pass: Pass, cutoff: f64, sampling_rate: f64) -> Option<Sos<f64>> {
    if cutoff <= 0.0 || cutoff >= sampling_rate / 2.0 {
        return None;
    }
    let w0 = 2.0 * PI * cutoff / sampling_rate;
    let cos_w0 = w0.cos();
    let alpha = w0.sin() / (2.0 * FRAC_1_SQRT_2);
    let a0 = 1.0 + alpha;

    let (b0, b1, b2) = match pass {
        Pass::Low => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0),
        Pass::High => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0),
    };
    Some(Sos::new(
        [b0 / a0, b1 / a0, b2 / a0],
        [1.0, -2.0 * cos_w0 / a0, (1.0 - alpha) / a0],
    ))
}

/// Forward-backward filtering through the given sections. Signals too short
/// for the edge padding pass through unchanged.
fn zero_phase(signal: &[f64], sections: &[Sos<f64>]) -> Vec<f64> {
    let padlen = 3 * (2 * sections.len() + 1);
    if sections.is_empty() || signal.len() <= padlen {
        trace!(
            "Skipping filter: {} samples, {} sections",
            signal.len(),
            sections.len()
        );
        return signal.to_vec();
    }
    sosfiltfilt_dyn(signal.iter(), sections)
}

pub fn lowpass(signal: &[f64], cutoff: f64, sampling_rate: f64) -> Vec<f64> {
    let sections: Vec<Sos<f64>> = biquad(Pass::Low, cutoff, sampling_rate).into_iter().collect();
    zero_phase(signal, &sections)
}

pub fn bandpass(signal: &[f64], low: f64, high: f64, sampling_rate: f64) -> Vec<f64> {
    let sections: Vec<Sos<f64>> = [
        biquad(Pass::High, low, sampling_rate),
        biquad(Pass::Low, high, sampling_rate),
    ]
    .into_iter()
    .flatten()
    .collect();
    zero_phase(signal, &sections)
}

/// Centred moving average over `window_seconds`; the window shrinks at the edges.
fn rolling_mean(data: &[f64], window_seconds: f64, sampling_rate: f64) -> Vec<f64> {
    let size = ((window_seconds * sampling_rate) as usize).max(1);
    let half = size / 2;

    let mut prefix = Vec::with_capacity(data.len() + 1);
    prefix.push(0.0);
    for &x in data {
        prefix.push(prefix[prefix.len() - 1] + x);
    }

    (0..data.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(data.len());
            (prefix[end] - prefix[start]) / (end - start) as f64
        })
        .collect()
}

/// Runs of consecutive indices where `above` holds, as `[start, end)` pairs.
fn runs(above: &[bool]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, &flag) in above.iter().enumerate() {
        match (flag, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, above.len()));
    }
    out
}

fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

/// Photoplethysmogram processing: band-pass cleaning, systolic peak
/// detection after Elgendi et al. (2013) and an instantaneous rate.
#[derive(Debug, Clone)]
pub struct PpgProcessor {
    pub low_cutoff: f64,
    pub high_cutoff: f64,
    pub peak_window: f64,
    pub beat_window: f64,
    pub beat_offset: f64,
    pub min_delay: f64,
}

impl Default for PpgProcessor {
    fn default() -> Self {
        Self {
            low_cutoff: 0.5,
            high_cutoff: 8.0,
            peak_window: 0.111,
            beat_window: 0.667,
            beat_offset: 0.02,
            min_delay: 0.3,
        }
    }
}

impl PpgProcessor {
    fn find_peaks(&self, cleaned: &[f64], sampling_rate: f64) -> Vec<usize> {
        let squared: Vec<f64> = cleaned.iter().map(|&x| x.max(0.0).powi(2)).collect();
        let ma_peak = rolling_mean(&squared, self.peak_window, sampling_rate);
        let ma_beat = rolling_mean(&squared, self.beat_window, sampling_rate);
        let offset = self.beat_offset * squared.iter().sum::<f64>() / squared.len() as f64;

        let above: Vec<bool> = ma_peak
            .iter()
            .zip(&ma_beat)
            .map(|(&p, &b)| p > b + offset)
            .collect();

        let min_len = (self.peak_window * sampling_rate).round() as usize;
        let min_delay = (self.min_delay * sampling_rate).round() as usize;
        let mut peaks: Vec<usize> = Vec::new();
        for (start, end) in runs(&above) {
            if end - start < min_len {
                continue;
            }
            let Some(local) = argmax(&cleaned[start..end]) else {
                continue;
            };
            let peak = start + local;
            if peaks.last().map_or(true, |&last| peak - last > min_delay) {
                peaks.push(peak);
            }
        }
        peaks
    }
}

/// Beats per minute at each peak, linearly interpolated between peaks and
/// held constant before the first and after the last.
fn instantaneous_rate(peaks: &[usize], len: usize, sampling_rate: f64) -> Vec<Option<f64>> {
    if peaks.len() < 2 {
        return vec![None; len];
    }
    let mut rates: Vec<f64> = peaks
        .windows(2)
        .map(|w| 60.0 * sampling_rate / (w[1] - w[0]) as f64)
        .collect();
    rates.insert(0, rates[0]);

    let mut out = vec![None; len];
    for (i, slot) in out.iter_mut().enumerate() {
        let k = peaks.partition_point(|&p| p <= i);
        let value = if k == 0 {
            rates[0]
        } else if k == peaks.len() {
            rates[rates.len() - 1]
        } else {
            let (p0, p1) = (peaks[k - 1], peaks[k]);
            let alpha = (i - p0) as f64 / (p1 - p0) as f64;
            rates[k - 1] + alpha * (rates[k] - rates[k - 1])
        };
        *slot = Some(value);
    }
    out
}

impl SignalProcessor for PpgProcessor {
    fn process(&self, signal: &[f64], sampling_rate: f64) -> Result<Detection, RecordingError> {
        validate(signal, sampling_rate)?;
        let cleaned = bandpass(signal, self.low_cutoff, self.high_cutoff, sampling_rate);
        let peaks = self.find_peaks(&cleaned, sampling_rate);
        debug!("PPG: {} peaks in {} samples", peaks.len(), signal.len());

        let rate = instantaneous_rate(&peaks, signal.len(), sampling_rate);
        let mut mask = vec![false; signal.len()];
        for &p in &peaks {
            mask[p] = true;
        }
        Ok(Detection {
            cleaned,
            peaks: mask,
            info: vec![("PPG_Rate".to_string(), rate)],
        })
    }
}

/// Electrodermal activity processing: low-pass cleaning, tonic/phasic split
/// and skin conductance response peaks.
#[derive(Debug, Clone)]
pub struct EdaProcessor {
    pub clean_cutoff: f64,
    pub tonic_cutoff: f64,
    /// Responses smaller than this fraction of the largest one are ignored.
    pub min_relative_amplitude: f64,
}

impl Default for EdaProcessor {
    fn default() -> Self {
        Self {
            clean_cutoff: 3.0,
            tonic_cutoff: 0.05,
            min_relative_amplitude: 0.1,
        }
    }
}

impl EdaProcessor {
    /// Phasic maxima between an upward zero crossing and the next downward
    /// crossing, with amplitude measured from the onset.
    fn find_responses(&self, phasic: &[f64]) -> Vec<(usize, f64)> {
        let mut candidates = Vec::new();
        let mut onset = None;
        for i in 1..phasic.len() {
            if phasic[i - 1] <= 0.0 && phasic[i] > 0.0 {
                onset = Some(i);
            } else if phasic[i - 1] > 0.0 && phasic[i] <= 0.0 {
                if let Some(start) = onset.take() {
                    if let Some(local) = argmax(&phasic[start..i]) {
                        let peak = start + local;
                        candidates.push((peak, phasic[peak] - phasic[start]));
                    }
                }
            }
        }

        let largest = candidates.iter().map(|c| c.1).fold(0.0, f64::max);
        let threshold = self.min_relative_amplitude * largest;
        candidates.retain(|&(_, amplitude)| amplitude > threshold);
        candidates
    }
}

impl SignalProcessor for EdaProcessor {
    fn process(&self, signal: &[f64], sampling_rate: f64) -> Result<Detection, RecordingError> {
        validate(signal, sampling_rate)?;
        let cleaned = lowpass(signal, self.clean_cutoff, sampling_rate);
        let tonic = lowpass(&cleaned, self.tonic_cutoff, sampling_rate);
        let phasic: Vec<f64> = cleaned.iter().zip(&tonic).map(|(c, t)| c - t).collect();

        let responses = self.find_responses(&phasic);
        debug!("EDA: {} responses in {} samples", responses.len(), signal.len());

        let mut mask = vec![false; signal.len()];
        let mut amplitude = vec![None; signal.len()];
        for &(idx, amp) in &responses {
            mask[idx] = true;
            amplitude[idx] = Some(amp);
        }
        Ok(Detection {
            cleaned,
            peaks: mask,
            info: vec![
                ("EDA_Tonic".to_string(), tonic.into_iter().map(Some).collect()),
                ("EDA_Phasic".to_string(), phasic.into_iter().map(Some).collect()),
                ("SCR_Amplitude".to_string(), amplitude),
            ],
        })
    }
}
