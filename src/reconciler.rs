use std::collections::HashMap;

use crate::error::{Result, TrackerError};
use crate::types::{valid_latitude, valid_longitude, Field, PositionSample, PositionUpdate, RawSample, Track};

#[derive(Default)]
struct PendingFix {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// Pair latitude and longitude rows that share a timestamp into a sorted Track.
///
/// Out-of-range values are dropped row by row, so timestamps left without a
/// valid latitude and longitude produce no sample. When the source emits the
/// same `(timestamp, field)` twice the later valid row wins.
pub fn reconcile(samples: &[RawSample]) -> Track {
    let mut fixes: HashMap<&str, PendingFix> = HashMap::new();

    for sample in samples.iter().filter(|s| s.field.is_position()) {
        let fix = fixes.entry(sample.timestamp.as_str()).or_default();
        match sample.field {
            Field::Latitude if valid_latitude(sample.value) => fix.latitude = Some(sample.value),
            Field::Longitude if valid_longitude(sample.value) => fix.longitude = Some(sample.value),
            _ => {}
        }
    }

    let positions = fixes
        .into_iter()
        .filter_map(|(timestamp, fix)| match (fix.latitude, fix.longitude) {
            (Some(lat), Some(lon)) => PositionSample::new(timestamp, lat, lon),
            _ => None,
        })
        .collect();

    Track::from_samples(positions)
}

/// Merge a structured update received at `timestamp` into an existing Track.
pub fn apply_update(track: &mut Track, update: &PositionUpdate, timestamp: &str) -> Result<PositionSample> {
    if !valid_latitude(update.latitude) || !valid_longitude(update.longitude) {
        return Err(TrackerError::InvalidUpdate(format!(
            "coordinates out of range: {}, {}",
            update.latitude, update.longitude
        )));
    }
    let sample = PositionSample {
        timestamp: timestamp.to_string(),
        latitude: update.latitude,
        longitude: update.longitude,
    };
    track.upsert(sample.clone());
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_rows;

    fn raw(timestamp: &str, field: Field, value: f64) -> RawSample {
        RawSample {
            timestamp: timestamp.to_string(),
            field,
            value,
        }
    }

    #[test]
    fn test_latitude_only_yields_empty_track() {
        let track = reconcile(&[raw("t1", Field::Latitude, 10.0)]);
        assert!(track.is_empty());
    }

    #[test]
    fn test_out_of_range_latitude_excluded() {
        let track = reconcile(&[
            raw("t1", Field::Latitude, 95.0),
            raw("t1", Field::Longitude, 5.0),
            raw("t2", Field::Latitude, 60.0),
            raw("t2", Field::Longitude, 200.0),
        ]);
        assert!(track.is_empty());
    }

    #[test]
    fn test_pairs_sorted_ascending() {
        let body = ",result,table,_time,_value,_field\n\
            ,_result,0,2024-01-01T00:01:00Z,60.001000,Latitude\n\
            ,_result,0,2024-01-01T00:00:00Z,60.000000,Latitude\n\
            ,_result,1,2024-01-01T00:00:00Z,5.000000,Longitude\n\
            ,_result,1,2024-01-01T00:01:00Z,5.001000,Longitude\n";
        let track = reconcile(&parse_rows(body));

        assert_eq!(track.len(), 2);
        assert_eq!(track.samples()[0].timestamp, "2024-01-01T00:00:00Z");
        assert_eq!(track.samples()[0].latitude, 60.0);
        assert_eq!(track.samples()[1].longitude, 5.001);
    }

    #[test]
    fn test_duplicate_rows_last_wins() {
        let track = reconcile(&[
            raw("t1", Field::Latitude, 60.0),
            raw("t1", Field::Longitude, 5.0),
            raw("t1", Field::Latitude, 61.0),
        ]);
        assert_eq!(track.len(), 1);
        assert_eq!(track.samples()[0].latitude, 61.0);
    }

    #[test]
    fn test_out_of_range_duplicate_keeps_valid_fix() {
        let track = reconcile(&[
            raw("t1", Field::Latitude, 60.0),
            raw("t1", Field::Longitude, 5.0),
            raw("t1", Field::Latitude, 95.0),
        ]);
        assert_eq!(track.len(), 1);
        assert_eq!(track.samples()[0].latitude, 60.0);
        assert_eq!(track.samples()[0].longitude, 5.0);
    }

    #[test]
    fn test_sensor_fields_ignored() {
        let track = reconcile(&[
            raw("t1", Field::Temperature, 20.0),
            raw("t1", Field::Latitude, 60.0),
            raw("t1", Field::Battery, 80.0),
            raw("t1", Field::Longitude, 5.0),
        ]);
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn test_apply_update_replaces_same_timestamp() {
        let mut track = Track::new();
        let update = PositionUpdate {
            latitude: 60.0,
            longitude: 5.0,
            id: None,
        };
        apply_update(&mut track, &update, "2024-01-01T00:00:00Z").unwrap();
        let moved = PositionUpdate {
            latitude: 60.5,
            ..update.clone()
        };
        apply_update(&mut track, &moved, "2024-01-01T00:00:00Z").unwrap();

        assert_eq!(track.len(), 1);
        assert_eq!(track.latest().unwrap().latitude, 60.5);
    }

    #[test]
    fn test_apply_update_rejects_out_of_range() {
        let mut track = Track::new();
        let update = PositionUpdate {
            latitude: 91.0,
            longitude: 5.0,
            id: Some("dog".to_string()),
        };
        assert!(matches!(
            apply_update(&mut track, &update, "t1"),
            Err(TrackerError::InvalidUpdate(_))
        ));
        assert!(track.is_empty());
    }
}
