use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Telemetry field names as written by the tracker firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Latitude,
    Longitude,
    Temperature,
    Humidity,
    Battery,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Latitude => "Latitude",
            Field::Longitude => "Longitude",
            Field::Temperature => "Temperature",
            Field::Humidity => "Humidity",
            Field::Battery => "Battery",
        }
    }

    pub fn is_position(&self) -> bool {
        matches!(self, Field::Latitude | Field::Longitude)
    }
}

impl FromStr for Field {
    type Err = ();

    /// Exact, case-sensitive match.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Latitude" => Ok(Field::Latitude),
            "Longitude" => Ok(Field::Longitude),
            "Temperature" => Ok(Field::Temperature),
            "Humidity" => Ok(Field::Humidity),
            "Battery" => Ok(Field::Battery),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded telemetry row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: String,
    pub field: Field,
    pub value: f64,
}

/// A latitude/longitude pair reconciled for one timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl PositionSample {
    /// Returns `None` when either coordinate is out of range or not finite.
    pub fn new(timestamp: impl Into<String>, latitude: f64, longitude: f64) -> Option<Self> {
        if !valid_latitude(latitude) || !valid_longitude(longitude) {
            return None;
        }
        Some(Self {
            timestamp: timestamp.into(),
            latitude,
            longitude,
        })
    }

    /// Parsed wall-clock time of the sample, if the timestamp is RFC 3339.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// `[lon, lat]`, the order map libraries expect.
    pub fn lon_lat(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

pub fn valid_latitude(value: f64) -> bool {
    value.is_finite() && (-90.0..=90.0).contains(&value)
}

pub fn valid_longitude(value: f64) -> bool {
    value.is_finite() && (-180.0..=180.0).contains(&value)
}

/// Time-ordered sequence of positions, ascending by timestamp.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    samples: Vec<PositionSample>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts by timestamp and keeps the last sample seen for each timestamp.
    pub fn from_samples(samples: Vec<PositionSample>) -> Self {
        let by_time: BTreeMap<String, PositionSample> = samples
            .into_iter()
            .map(|sample| (sample.timestamp.clone(), sample))
            .collect();
        Self {
            samples: by_time.into_values().collect(),
        }
    }

    /// Inserts in timestamp order, replacing any sample at the same timestamp.
    pub fn upsert(&mut self, sample: PositionSample) {
        match self
            .samples
            .binary_search_by(|s| s.timestamp.as_str().cmp(sample.timestamp.as_str()))
        {
            Ok(idx) => self.samples[idx] = sample,
            Err(idx) => self.samples.insert(idx, sample),
        }
    }

    pub fn samples(&self) -> &[PositionSample] {
        &self.samples
    }

    pub fn latest(&self) -> Option<&PositionSample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Polyline coordinates as `[lon, lat]` pairs for drawing the route.
    pub fn coordinates(&self) -> Vec<[f64; 2]> {
        self.samples.iter().map(PositionSample::lon_lat).collect()
    }
}

/// Structured single-position message from the push-style deployment.
///
/// ```json
/// {"latitude": 60.117, "longitude": 5.155, "id": "867007069790282"}
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub id: Option<String>,
}

/// Latest environmental readings reported by the collar.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub temperature: Option<f64>, // °C
    pub humidity: Option<f64>,    // %
    pub battery: Option<f64>,     // %
}
