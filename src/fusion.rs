use crate::config::FusionConfig;
use crate::error::RecordingError;
use crate::frame::{Column, ColumnData, Frame, Scalar};
use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use log::{debug, warn};

/// For each primary timestamp, the index of the nearest secondary timestamp
/// within `tolerance`. `secondary` must be sorted ascending. Equal distances
/// resolve to the earlier secondary row.
pub fn nearest_matches(
    primary: &[DateTime<Tz>],
    secondary: &[DateTime<Tz>],
    tolerance: Duration,
) -> Vec<Option<usize>> {
    primary
        .iter()
        .map(|&t| {
            let idx = secondary.partition_point(|&s| s < t);
            let before = idx.checked_sub(1).map(|i| (i, t - secondary[i]));
            let after = secondary.get(idx).map(|&s| (idx, s - t));
            let nearest = match (before, after) {
                (Some(b), Some(a)) => Some(if a.1 < b.1 { a } else { b }),
                (b, a) => b.or(a),
            };
            nearest
                .filter(|&(_, distance)| distance <= tolerance)
                .map(|(i, _)| i)
        })
        .collect()
}

/// Align `secondary` onto the rows of `primary` by nearest timestamp.
///
/// Columns present in both streams are suffixed, except the configured
/// attributes which are coalesced (primary value first) into one unsuffixed
/// column appended at the end. An empty input yields an empty frame.
pub fn fuse(
    primary: &Frame,
    secondary: &Frame,
    config: &FusionConfig,
) -> Result<Frame, RecordingError> {
    if primary.is_empty() || secondary.is_empty() {
        warn!(
            "Cannot fuse: primary has {} rows, secondary has {} rows",
            primary.len(),
            secondary.len()
        );
        return Ok(Frame::default());
    }

    let mut order: Vec<usize> = (0..secondary.len()).collect();
    order.sort_by_key(|&i| secondary.timestamps()[i]);
    let sorted: Vec<DateTime<Tz>> = order.iter().map(|&i| secondary.timestamps()[i]).collect();
    let matches: Vec<Option<usize>> =
        nearest_matches(primary.timestamps(), &sorted, config.tolerance)
            .into_iter()
            .map(|m| m.map(|i| order[i]))
            .collect();
    let matched = matches.iter().filter(|m| m.is_some()).count();
    debug!(
        "Fusion matched {} of {} primary rows within {} ms",
        matched,
        primary.len(),
        config.tolerance.num_milliseconds()
    );

    let is_coalesced = |name: &str| config.coalesce.iter().any(|c| c == name);
    let mut out = Frame::new(primary.timestamps().to_vec());

    for column in primary.columns() {
        if is_coalesced(&column.name) {
            continue;
        }
        let name = if secondary.has_column(&column.name) {
            format!("{}{}", column.name, config.primary_suffix)
        } else {
            column.name.clone()
        };
        out.push_column(Column {
            name,
            data: column.data.clone(),
        })?;
    }

    for column in secondary.columns() {
        if is_coalesced(&column.name) {
            continue;
        }
        let name = if primary.has_column(&column.name) {
            format!("{}{}", column.name, config.secondary_suffix)
        } else {
            column.name.clone()
        };
        out.push_column(Column {
            name,
            data: column.data.gather(&matches),
        })?;
    }

    for name in &config.coalesce {
        let left = primary.column(name).map(|c| &c.data);
        let right = secondary.column(name).map(|c| c.data.gather(&matches));
        if let Some(data) = coalesce(left, right.as_ref()) {
            out.push_column(Column {
                name: name.clone(),
                data,
            })?;
        }
    }
    Ok(out)
}

/// Left value where defined, otherwise right. Mixed kinds become categorical.
fn coalesce(left: Option<&ColumnData>, right: Option<&ColumnData>) -> Option<ColumnData> {
    match (left, right) {
        (None, None) => None,
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(ColumnData::Numeric(l)), Some(ColumnData::Numeric(r))) => Some(ColumnData::Numeric(
            l.iter().zip(r).map(|(a, b)| a.or(*b)).collect(),
        )),
        (Some(l), Some(r)) => {
            let (l, r) = (as_scalars(l), as_scalars(r));
            Some(ColumnData::Categorical(
                l.into_iter().zip(r).map(|(a, b)| a.or(b)).collect(),
            ))
        }
    }
}

fn as_scalars(data: &ColumnData) -> Vec<Option<Scalar>> {
    match data {
        ColumnData::Categorical(values) => values.clone(),
        ColumnData::Numeric(values) => values.iter().map(|v| v.map(Scalar::Number)).collect(),
    }
}
