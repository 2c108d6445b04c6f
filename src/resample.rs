use crate::error::RecordingError;
use crate::frame::{Column, ColumnData, Frame, Scalar};
use chrono::DateTime;
use chrono_tz::Tz;
use log::debug;

/// Longest recording, in seconds, that is resampled. Longer spans usually
/// come from a stray timestamp and would allocate one bucket per second.
pub const MAX_SPAN_SECONDS: i64 = 7 * 86_400;

/// Reject timestamp ranges wider than [`MAX_SPAN_SECONDS`].
pub fn check_span(timestamps: &[DateTime<Tz>]) -> Result<(), RecordingError> {
    let (Some(min_sec), Some(max_sec)) = (
        timestamps.iter().map(|t| t.timestamp()).min(),
        timestamps.iter().map(|t| t.timestamp()).max(),
    ) else {
        return Ok(());
    };
    let seconds = max_sec - min_sec;
    if seconds > MAX_SPAN_SECONDS {
        return Err(RecordingError::SpanTooLong {
            seconds,
            limit: MAX_SPAN_SECONDS,
        });
    }
    Ok(())
}

/// Bucket a frame into whole seconds from floor(first) to floor(last).
///
/// Numeric columns average their defined values per bucket and leave empty
/// buckets undefined. Categorical columns are never averaged: the first
/// defined value is repeated on every bucket.
pub fn resample_to_seconds(frame: &Frame) -> Result<Frame, RecordingError> {
    let timestamps = frame.timestamps();
    let (Some(first), Some(min_sec), Some(max_sec)) = (
        timestamps.first(),
        timestamps.iter().map(|t| t.timestamp()).min(),
        timestamps.iter().map(|t| t.timestamp()).max(),
    ) else {
        return Ok(Frame::default());
    };
    let tz = first.timezone();
    check_span(timestamps)?;

    let bucket_count = (max_sec - min_sec + 1) as usize;
    let buckets: Vec<usize> = timestamps
        .iter()
        .map(|t| (t.timestamp() - min_sec) as usize)
        .collect();

    let grid: Vec<DateTime<Tz>> = (min_sec..=max_sec)
        .filter_map(|sec| DateTime::from_timestamp(sec, 0).map(|utc| utc.with_timezone(&tz)))
        .collect();

    let mut columns = Vec::with_capacity(frame.columns().len());
    for column in frame.columns() {
        let resampled = match &column.data {
            ColumnData::Numeric(values) => {
                Column::numeric(column.name.clone(), bucket_means(values, &buckets, bucket_count))
            }
            ColumnData::Categorical(values) => {
                let value: Option<Scalar> = values.iter().flatten().next().cloned();
                Column::constant(column.name.clone(), value, bucket_count)
            }
        };
        columns.push(resampled);
    }

    debug!(
        "Resampled {} rows into {} one-second buckets",
        frame.len(),
        bucket_count
    );
    Frame::with_columns(grid, columns)
}

fn bucket_means(values: &[Option<f64>], buckets: &[usize], bucket_count: usize) -> Vec<Option<f64>> {
    let mut sums = vec![0.0; bucket_count];
    let mut counts = vec![0usize; bucket_count];
    for (value, &bucket) in values.iter().zip(buckets) {
        if let Some(v) = value {
            sums[bucket] += v;
            counts[bucket] += 1;
        }
    }
    sums.into_iter()
        .zip(counts)
        .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Asia::Bangkok;

    fn t(millis: i64) -> DateTime<Tz> {
        Bangkok.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(millis)
    }

    #[test]
    fn one_second_stream_is_unchanged() {
        let frame = Frame::with_columns(
            vec![t(0), t(1000), t(2000)],
            vec![
                Column::numeric("x", vec![Some(1.0), None, Some(3.0)]),
                Column::constant("id", Some(Scalar::Text("S01".into())), 3),
            ],
        )
        .unwrap();
        let out = resample_to_seconds(&frame).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn averages_values_within_a_second() {
        let frame = Frame::with_columns(
            vec![t(0), t(300), t(900)],
            vec![Column::numeric("x", vec![Some(2.0), Some(4.0), Some(6.0)])],
        )
        .unwrap();
        let out = resample_to_seconds(&frame).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.numeric("x").unwrap(), &[Some(4.0)]);
    }

    #[test]
    fn empty_buckets_stay_present_and_categoricals_broadcast() {
        let frame = Frame::with_columns(
            vec![t(200), t(3500)],
            vec![
                Column::numeric("x", vec![Some(1.0), Some(5.0)]),
                Column::categorical("gender", vec![None, Some(Scalar::Text("F".into()))]),
            ],
        )
        .unwrap();
        let out = resample_to_seconds(&frame).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out.timestamps()[0], t(0));
        assert_eq!(out.numeric("x").unwrap(), &[Some(1.0), None, None, Some(5.0)]);
        assert!(out
            .categorical("gender")
            .unwrap()
            .iter()
            .all(|v| v == &Some(Scalar::Text("F".into()))));
    }

    #[test]
    fn empty_frame_resamples_to_empty() {
        assert!(resample_to_seconds(&Frame::default()).unwrap().is_empty());
    }

    #[test]
    fn stray_epoch_makes_the_span_too_long() {
        let stray = Bangkok.timestamp_opt(0, 0).unwrap();
        let frame = Frame::with_columns(
            vec![stray, t(0)],
            vec![Column::numeric("x", vec![Some(1.0), Some(2.0)])],
        )
        .unwrap();
        assert!(matches!(
            resample_to_seconds(&frame),
            Err(RecordingError::SpanTooLong { limit: MAX_SPAN_SECONDS, .. })
        ));

        let week = vec![t(0), t(MAX_SPAN_SECONDS * 1000)];
        assert!(check_span(&week).is_ok());
        assert!(check_span(&[week[0], week[1] + Duration::seconds(1)]).is_err());
    }
}
