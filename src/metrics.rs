use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PositionSample, Track};

/// Mean earth radius used by every distance in the crate.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

pub fn sample_distance(a: &PositionSample, b: &PositionSample) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Seconds from `a` to `b`, or `None` if either timestamp does not parse.
pub fn elapsed_seconds(a: &PositionSample, b: &PositionSample) -> Option<f64> {
    let (start, end) = (a.time()?, b.time()?);
    Some((end - start).num_milliseconds() as f64 / 1000.0)
}

/// Polyline length in kilometers. Zero for fewer than two points.
pub fn path_distance_km(points: &[PositionSample]) -> f64 {
    points
        .windows(2)
        .map(|pair| sample_distance(&pair[0], &pair[1]))
        .sum::<f64>()
        / 1000.0
}

/// Speed between the last two samples in km/h.
///
/// `None` with fewer than two samples, unparseable timestamps, or zero
/// elapsed time.
pub fn instantaneous_speed(track: &Track) -> Option<f64> {
    let samples = track.samples();
    if samples.len() < 2 {
        return None;
    }
    let (prev, last) = (&samples[samples.len() - 2], &samples[samples.len() - 1]);
    let seconds = elapsed_seconds(prev, last)?;
    speed_kmh(sample_distance(prev, last) / 1000.0, seconds / 3600.0)
}

pub fn route_distance(track: &Track) -> f64 {
    path_distance_km(track.samples())
}

/// Average speed over a sequence of recorded points, first to last.
pub fn session_average(points: &[PositionSample]) -> Option<f64> {
    let (first, last) = (points.first()?, points.last()?);
    if points.len() < 2 {
        return None;
    }
    let hours = elapsed_seconds(first, last)? / 3600.0;
    speed_kmh(path_distance_km(points), hours)
}

fn speed_kmh(distance_km: f64, hours: f64) -> Option<f64> {
    if hours <= 0.0 || !hours.is_finite() {
        return None;
    }
    let speed = distance_km / hours;
    speed.is_finite().then_some(speed)
}

/// Snapshot of what the popup next to the marker shows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub points: usize,
    pub instantaneous_speed_kmh: Option<f64>,
    pub route_distance_km: f64,
    pub session_average_speed_kmh: Option<f64>,
}

impl DerivedMetrics {
    pub fn from_track(track: &Track, session_points: Option<&[PositionSample]>) -> Self {
        DerivedMetrics {
            points: track.len(),
            instantaneous_speed_kmh: instantaneous_speed(track),
            route_distance_km: route_distance(track),
            session_average_speed_kmh: session_points.and_then(session_average),
        }
    }
}

impl fmt::Display for DerivedMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.points == 0 {
            return write!(f, "Speed: N/A\nDistance: N/A");
        }
        write!(
            f,
            "Speed: {}\nDistance: {:.2} km",
            format_kmh(self.instantaneous_speed_kmh),
            self.route_distance_km
        )?;
        if let Some(avg) = self.session_average_speed_kmh {
            write!(f, "\nSession average: {:.2} km/h", avg)?;
        }
        Ok(())
    }
}

/// `"12.34 km/h"` or `"N/A"`.
pub fn format_kmh(speed: Option<f64>) -> String {
    match speed {
        Some(v) => format!("{:.2} km/h", v),
        None => "N/A".to_string(),
    }
}

/// Distance and average speed over a historical window such as `-15m`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub range: String,
    pub points: usize,
    pub total_distance_km: f64,
    pub average_speed_kmh: Option<f64>,
}

pub fn route_summary(range: &str, track: &Track) -> RouteSummary {
    RouteSummary {
        range: range.to_string(),
        points: track.len(),
        total_distance_km: route_distance(track),
        average_speed_kmh: session_average(track.samples()),
    }
}

impl fmt::Display for RouteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.points == 0 {
            return write!(f, "No data for selected period.");
        }
        write!(
            f,
            "Route ({}):\nTotal Distance: {:.2} km\nAverage Speed: {}",
            self.range,
            self.total_distance_km,
            format_kmh(self.average_speed_kmh)
        )
    }
}
