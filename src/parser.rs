//! Decoding of InfluxDB CSV query responses into [`RawSample`]s.
//!
//! A Flux query ending in `keep(columns: ["_time", "_value", "_field"])`
//! answers with rows shaped like
//!
//! ```text
//! ,result,table,_time,_value,_field
//! ,_result,0,2024-01-01T00:00:00Z,60.000000,Latitude
//! ```
//!
//! Once empty columns are dropped, every data row has at least five fields
//! with time, value and field name at positions 2, 3 and 4. Header rows fail
//! the numeric check on the value column, so no separate header skip exists.

use crate::types::{Field, RawSample, SensorSnapshot};

const MIN_COLUMNS: usize = 5;
const TIME_COLUMN: usize = 2;
const VALUE_COLUMN: usize = 3;
const FIELD_COLUMN: usize = 4;

/// Parse a whole response body. Malformed rows are dropped silently.
pub fn parse_rows(body: &str) -> Vec<RawSample> {
    body.lines().filter_map(parse_row).collect()
}

/// Decode a single row, or `None` if it is blank, short, non-numeric or names
/// a field we do not track.
pub fn parse_row(row: &str) -> Option<RawSample> {
    if row.trim().is_empty() {
        return None;
    }

    let columns: Vec<&str> = row
        .split(',')
        .map(str::trim)
        .filter(|col| !col.is_empty())
        .collect();

    if columns.len() < MIN_COLUMNS {
        return None;
    }

    let value = columns[VALUE_COLUMN].parse::<f64>().ok()?;
    if !value.is_finite() {
        return None;
    }
    let field = columns[FIELD_COLUMN].parse::<Field>().ok()?;

    Some(RawSample {
        timestamp: columns[TIME_COLUMN].to_string(),
        field,
        value,
    })
}

/// Latest reading per sensor field. Rows arrive in table order, so a later
/// row for the same field overrides an earlier one.
pub fn sensor_snapshot(samples: &[RawSample]) -> SensorSnapshot {
    let mut snapshot = SensorSnapshot::default();
    for sample in samples {
        match sample.field {
            Field::Temperature => snapshot.temperature = Some(sample.value),
            Field::Humidity => snapshot.humidity = Some(sample.value),
            Field::Battery => snapshot.battery = Some(sample.value),
            Field::Latitude | Field::Longitude => {}
        }
    }
    snapshot
}
