//! On-demand queries behind the route overview and device info buttons.

use chrono::{DateTime, Local, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::flux::{FetchError, RangeStart, TelemetrySource};
use crate::metrics::{route_distance, route_summary, RouteSummary};
use crate::parser::{parse_rows, sensor_snapshot};
use crate::reconciler::reconcile;
use crate::types::SensorSnapshot;

/// Distance and average speed over the last `range` (e.g. `-15m`).
pub async fn fetch_route_summary<S: TelemetrySource>(source: &S, range: &str) -> Result<RouteSummary, FetchError> {
    let body = source
        .fetch_positions(&RangeStart::Relative(range.to_string()))
        .await?;
    Ok(route_summary(range, &reconcile(&parse_rows(&body))))
}

/// Start of the current local day, in UTC.
pub fn local_midnight(now: DateTime<Local>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::default());
    midnight
        .and_local_timezone(Local)
        .earliest()
        // midnight skipped by a DST jump; fall back to treating it as UTC
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

pub async fn fetch_distance_since<S: TelemetrySource>(source: &S, since: DateTime<Utc>) -> Result<f64, FetchError> {
    let body = source.fetch_positions(&RangeStart::Since(since)).await?;
    Ok(route_distance(&reconcile(&parse_rows(&body))))
}

pub async fn fetch_sensor_snapshot<S: TelemetrySource>(source: &S) -> Result<SensorSnapshot, FetchError> {
    let body = source.fetch_sensors().await?;
    Ok(sensor_snapshot(&parse_rows(&body)))
}

/// Device info popup content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub location: Option<[f64; 2]>,
    pub sensors: Option<SensorSnapshot>,
    pub distance_today_km: Option<f64>,
}

/// Gather device info. Each part degrades to `None` on its own failure.
pub async fn fetch_device_info<S: TelemetrySource>(
    source: &S,
    location: Option<[f64; 2]>,
    now: DateTime<Local>,
) -> DeviceInfo {
    let sensors = fetch_sensor_snapshot(source)
        .await
        .map_err(|e| log::warn!("Error fetching sensor data: {}", e))
        .ok();
    let distance_today_km = fetch_distance_since(source, local_midnight(now))
        .await
        .map_err(|e| log::warn!("Error fetching distance since midnight: {}", e))
        .ok();

    DeviceInfo {
        location,
        sensors,
        distance_today_km,
    }
}

fn reading(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{} {}", v, unit),
        None => "N/A".to_string(),
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device Info")?;
        match self.location {
            Some([lon, lat]) => writeln!(f, "Location: {:.5}, {:.5}", lat, lon)?,
            None => writeln!(f, "Location: N/A")?,
        }
        let sensors = self.sensors.clone().unwrap_or_default();
        writeln!(f, "Temperature: {}", reading(sensors.temperature, "°C"))?;
        writeln!(f, "Humidity: {}", reading(sensors.humidity, "%"))?;
        writeln!(f, "Battery: {}", reading(sensors.battery, "%"))?;
        match self.distance_today_km {
            Some(km) => write!(f, "Distance Today (since 00:00): {:.2} km", km),
            None => write!(f, "Distance Today (since 00:00): N/A"),
        }
    }
}
