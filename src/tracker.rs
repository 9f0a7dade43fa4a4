use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::DerivedMetrics;
use crate::parser::parse_rows;
use crate::reconciler::{apply_update, reconcile};
use crate::session::{Session, SessionState, SessionSummary};
use crate::types::{PositionSample, PositionUpdate, Track};

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub route: Vec<[f64; 2]>,
    pub current: Option<PositionSample>,
    /// Last coordinate ever seen, survives empty polls and restarts
    pub last_known: Option<[f64; 2]>,
    pub metrics: DerivedMetrics,
    pub session_state: SessionState,
    pub session_points: usize,
    pub last_session: Option<SessionSummary>,
    pub polls: u64,
    pub failed_polls: u64,
}

/// Owned state of one tracked device: the rolling Track, its metrics and the
/// session accumulator. Hosts share it behind a single mutex.
#[derive(Debug, Default)]
pub struct Tracker {
    track: Track,
    metrics: DerivedMetrics,
    session: Session,
    last_known: Option<[f64; 2]>,
    last_session: Option<SessionSummary>,
    polls: u64,
    failed_polls: u64,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the marker position from persisted `[lon, lat]`.
    pub fn warm_start(&mut self, lon_lat: [f64; 2]) {
        if self.last_known.is_none() {
            self.last_known = Some(lon_lat);
        }
    }

    /// Replace the Track with the content of one query response.
    pub fn ingest_csv(&mut self, body: &str) -> &DerivedMetrics {
        let samples = parse_rows(body);
        self.polls += 1;
        self.replace_track(reconcile(&samples));
        log::debug!(
            "Poll {}: {} rows decoded, {} positions",
            self.polls,
            samples.len(),
            self.track.len()
        );
        &self.metrics
    }

    /// Merge a single pushed position received at `received_at`.
    pub fn ingest_update(&mut self, update: &PositionUpdate, received_at: DateTime<Utc>) -> Result<&DerivedMetrics> {
        let timestamp = received_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let mut track = std::mem::take(&mut self.track);
        let applied = apply_update(&mut track, update, &timestamp);
        self.replace_track(track);
        applied?;
        Ok(&self.metrics)
    }

    /// Count a failed poll. The previous Track and metrics stay as they were.
    pub fn record_failure(&mut self) {
        self.polls += 1;
        self.failed_polls += 1;
    }

    fn replace_track(&mut self, track: Track) {
        self.track = track;
        if let Some(latest) = self.track.latest() {
            self.last_known = Some(latest.lon_lat());
            self.session.record(latest);
        }
        self.metrics = DerivedMetrics::from_track(&self.track, self.session.active_points());
    }

    pub fn start_session(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.session.start(now)?;
        log::info!("Tracking session started");
        self.metrics = DerivedMetrics::from_track(&self.track, self.session.active_points());
        Ok(())
    }

    pub fn stop_session(&mut self) -> Result<SessionSummary> {
        let summary = self.session.stop()?;
        log::info!(
            "Tracking session stopped: {} points, {:.2} km",
            summary.points,
            summary.total_distance_km
        );
        self.last_session = Some(summary.clone());
        self.metrics = DerivedMetrics::from_track(&self.track, None);
        Ok(summary)
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn metrics(&self) -> &DerivedMetrics {
        &self.metrics
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn last_known(&self) -> Option<[f64; 2]> {
        self.last_known
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            route: self.track.coordinates(),
            current: self.track.latest().cloned(),
            last_known: self.last_known,
            metrics: self.metrics.clone(),
            session_state: self.session.state(),
            session_points: self.session.points().len(),
            last_session: self.last_session.clone(),
            polls: self.polls,
            failed_polls: self.failed_polls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{haversine_distance, sample_distance};
    use crate::types::PositionSample;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn flux_rows(rows: &[(&str, f64, &str)]) -> String {
        let mut body = String::from(",result,table,_time,_value,_field\r\n");
        for (time, value, field) in rows {
            body.push_str(&format!(",_result,0,{},{:.6},{}\r\n", time, value, field));
        }
        body
    }

    #[test]
    fn test_end_to_end_two_fixes() {
        let body = flux_rows(&[
            ("2024-01-01T00:00:00Z", 60.0, "Latitude"),
            ("2024-01-01T00:00:00Z", 5.0, "Longitude"),
            ("2024-01-01T00:01:00Z", 60.001, "Latitude"),
            ("2024-01-01T00:01:00Z", 5.001, "Longitude"),
        ]);
        let mut tracker = Tracker::new();
        let metrics = tracker.ingest_csv(&body).clone();

        let track = tracker.track();
        assert_eq!(track.len(), 2);
        assert!(track.samples()[0].timestamp < track.samples()[1].timestamp);

        let displacement_km = haversine_distance(60.0, 5.0, 60.001, 5.001) / 1000.0;
        assert!(displacement_km > 0.0 && displacement_km < 1.0);
        assert_relative_eq!(metrics.route_distance_km, displacement_km, epsilon = 1e-12);
        assert_relative_eq!(
            metrics.instantaneous_speed_kmh.unwrap(),
            displacement_km * 60.0,
            epsilon = 1e-9
        );
        assert_eq!(tracker.last_known(), Some([5.001, 60.001]));
    }

    #[test]
    fn test_empty_poll_clears_track_keeps_last_known() {
        let mut tracker = Tracker::new();
        tracker.ingest_csv(&flux_rows(&[
            ("2024-01-01T00:00:00Z", 60.0, "Latitude"),
            ("2024-01-01T00:00:00Z", 5.0, "Longitude"),
        ]));
        tracker.ingest_csv(",result,table,_time,_value,_field\r\n");

        assert!(tracker.track().is_empty());
        assert_eq!(tracker.metrics().to_string(), "Speed: N/A\nDistance: N/A");
        assert_eq!(tracker.last_known(), Some([5.0, 60.0]));
    }

    #[test]
    fn test_failure_leaves_state_stale() {
        let mut tracker = Tracker::new();
        tracker.ingest_csv(&flux_rows(&[
            ("2024-01-01T00:00:00Z", 60.0, "Latitude"),
            ("2024-01-01T00:00:00Z", 5.0, "Longitude"),
        ]));
        let before = tracker.metrics().clone();
        tracker.record_failure();

        assert_eq!(tracker.track().len(), 1);
        assert_eq!(tracker.metrics(), &before);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.polls, 2);
        assert_eq!(snapshot.failed_polls, 1);
    }

    #[test]
    fn test_session_over_two_ticks() {
        let mut tracker = Tracker::new();
        tracker.start_session(Utc::now()).unwrap();

        tracker.ingest_csv(&flux_rows(&[
            ("2024-01-01T00:00:00Z", 60.0, "Latitude"),
            ("2024-01-01T00:00:00Z", 5.0, "Longitude"),
        ]));
        // same latest timestamp again: not recorded twice
        tracker.ingest_csv(&flux_rows(&[
            ("2024-01-01T00:00:00Z", 60.0, "Latitude"),
            ("2024-01-01T00:00:00Z", 5.0, "Longitude"),
        ]));
        tracker.ingest_csv(&flux_rows(&[
            ("2024-01-01T00:00:00Z", 60.0, "Latitude"),
            ("2024-01-01T00:00:00Z", 5.0, "Longitude"),
            ("2024-01-01T00:30:00Z", 60.01, "Latitude"),
            ("2024-01-01T00:30:00Z", 5.01, "Longitude"),
        ]));
        assert!(tracker.metrics().session_average_speed_kmh.is_some());

        let summary = tracker.stop_session().unwrap();
        let first = PositionSample::new("2024-01-01T00:00:00Z", 60.0, 5.0).unwrap();
        let second = PositionSample::new("2024-01-01T00:30:00Z", 60.01, 5.01).unwrap();
        let distance_km = sample_distance(&first, &second) / 1000.0;

        assert_eq!(summary.points, 2);
        assert_eq!(summary.average_speed_kmh, Some(distance_km / 0.5));
        assert!(tracker.metrics().session_average_speed_kmh.is_none());
        assert_eq!(tracker.snapshot().last_session, Some(summary));
    }

    #[test]
    fn test_ingest_update() {
        let mut tracker = Tracker::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let update = PositionUpdate {
            latitude: 60.0,
            longitude: 5.0,
            id: Some("867007069790282".to_string()),
        };
        tracker.ingest_update(&update, t0).unwrap();
        let moved = PositionUpdate {
            latitude: 60.001,
            ..update.clone()
        };
        let metrics = tracker
            .ingest_update(&moved, t0 + chrono::Duration::seconds(60))
            .unwrap()
            .clone();

        assert_eq!(tracker.track().len(), 2);
        assert!(metrics.instantaneous_speed_kmh.is_some());
        assert_eq!(tracker.track().samples()[0].timestamp, "2024-01-01T00:00:00.000Z");

        let bad = PositionUpdate {
            latitude: -91.0,
            ..update
        };
        assert!(tracker.ingest_update(&bad, t0).is_err());
        assert_eq!(tracker.track().len(), 2);
    }

    #[test]
    fn test_warm_start_only_seeds_once() {
        let mut tracker = Tracker::new();
        tracker.warm_start([5.155, 60.117]);
        tracker.warm_start([0.0, 0.0]);
        assert_eq!(tracker.snapshot().last_known, Some([5.155, 60.117]));
        assert!(tracker.snapshot().current.is_none());
    }
}
