use crate::error::ConfigError;
use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use log::{debug, warn};

/// Upper bound for accepted epoch values: 2100-01-01T00:00:00Z.
pub const MAX_EPOCH_SECONDS: f64 = 4_102_444_800.0;

/// Zoned timestamp layout used for processed files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// A row as read from a recording: the epoch cell may not have parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub epoch: Option<f64>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Tz>,
    pub value: f64,
}

#[derive(Debug)]
pub struct NormalizedRecording {
    pub samples: Vec<Sample>,
    pub dropped: usize,
}

/// Converts epoch seconds into one configured time zone.
#[derive(Debug, Clone, Copy)]
pub struct TimestampNormalizer {
    tz: Tz,
    max_epoch: f64,
}

impl TimestampNormalizer {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            max_epoch: MAX_EPOCH_SECONDS,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(parse_timezone(name)?))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Interpret `epoch` as UTC seconds and express it in the configured zone.
    /// Returns `None` for non-finite input and values before 1970 or after 2100-01-01.
    pub fn to_zoned(&self, epoch: f64) -> Option<DateTime<Tz>> {
        if !epoch.is_finite() || epoch < 0.0 || epoch > self.max_epoch {
            return None;
        }
        let secs = epoch.floor();
        let nanos = (((epoch - secs) * 1e9).round() as u32).min(999_999_999);
        DateTime::from_timestamp(secs as i64, nanos).map(|utc| utc.with_timezone(&self.tz))
    }

    /// Drop unusable rows and sort the rest by time. The sort is stable so
    /// samples sharing a timestamp keep their input order.
    pub fn normalize(&self, rows: &[RawSample]) -> NormalizedRecording {
        let mut samples: Vec<Sample> = rows
            .iter()
            .filter_map(|row| {
                let timestamp = row.epoch.and_then(|epoch| self.to_zoned(epoch))?;
                Some(Sample {
                    timestamp,
                    value: row.value,
                })
            })
            .collect();
        let dropped = rows.len() - samples.len();
        if dropped > 0 {
            warn!(
                "Dropped {} of {} rows with unusable timestamps",
                dropped,
                rows.len()
            );
        }

        samples.sort_by_key(|s| s.timestamp);
        if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
            debug!(
                "Normalized {} samples spanning {} to {}",
                samples.len(),
                first.timestamp,
                last.timestamp
            );
        }
        NormalizedRecording { samples, dropped }
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::UnknownTimezone(name.to_string()))
}

/// Parse a timestamp written by `format_zoned`, falling back to RFC 3339.
pub fn parse_zoned(text: &str, tz: Tz) -> Option<DateTime<Tz>> {
    let text = text.trim();
    DateTime::<FixedOffset>::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .ok()
        .map(|dt| dt.with_timezone(&tz))
}

pub fn format_zoned(timestamp: &DateTime<Tz>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Fractional epoch seconds of a zoned timestamp.
pub fn epoch_seconds(timestamp: &DateTime<Tz>) -> f64 {
    timestamp.timestamp() as f64 + f64::from(timestamp.timestamp_subsec_nanos()) / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use chrono_tz::Asia::Bangkok;

    fn raw(epoch: Option<f64>, value: f64) -> RawSample {
        RawSample { epoch, value }
    }

    #[test]
    fn converts_to_configured_zone() {
        let normalizer = TimestampNormalizer::from_name("Asia/Bangkok").unwrap();
        let ts = normalizer.to_zoned(0.0).unwrap();
        assert_eq!(ts.hour(), 7);
        assert_eq!(ts.timestamp(), 0);
    }

    #[test]
    fn unknown_zone_is_rejected() {
        assert!(matches!(
            TimestampNormalizer::from_name("Mars/Olympus"),
            Err(ConfigError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn drops_unusable_rows_and_counts_them() {
        let normalizer = TimestampNormalizer::new(Bangkok);
        let rows = [
            raw(Some(1_700_000_002.0), 1.0),
            raw(None, 2.0),
            raw(Some(f64::NAN), 3.0),
            raw(Some(-5.0), 4.0),
            raw(Some(5_000_000_000.0), 5.0),
            raw(Some(1_700_000_001.0), 6.0),
        ];
        let out = normalizer.normalize(&rows);
        assert_eq!(out.dropped, 4);
        let values: Vec<f64> = out.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, [6.0, 1.0]);
    }

    #[test]
    fn output_is_non_decreasing_and_sort_is_stable() {
        let normalizer = TimestampNormalizer::new(Bangkok);
        let rows = [
            raw(Some(30.0), 1.0),
            raw(Some(10.0), 2.0),
            raw(Some(30.0), 3.0),
            raw(Some(20.5), 4.0),
            raw(Some(10.0), 5.0),
        ];
        let out = normalizer.normalize(&rows);
        assert!(out
            .samples
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
        let values: Vec<f64> = out.samples.iter().map(|s| s.value).collect();
        assert_eq!(values, [2.0, 5.0, 4.0, 1.0, 3.0]);
    }

    #[test]
    fn formatted_timestamps_parse_back() {
        let ts = TimestampNormalizer::new(Bangkok)
            .to_zoned(1_700_000_000.25)
            .unwrap();
        let text = format_zoned(&ts);
        assert_eq!(parse_zoned(&text, Bangkok), Some(ts));
        assert!((epoch_seconds(&ts) - 1_700_000_000.25).abs() < 1e-6);
    }
}
