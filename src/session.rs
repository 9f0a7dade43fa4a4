use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TrackerError};
use crate::metrics::{elapsed_seconds, format_kmh, path_distance_km, session_average};
use crate::types::PositionSample;

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not tracking
    Idle,
    /// Accumulating points on every tick
    Active,
    /// Stopped; points kept until the next start
    Stopped,
}

/// Frozen result of a finished walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub points: usize,
    pub total_distance_km: f64,
    pub elapsed_hours: f64,
    pub average_speed_kmh: Option<f64>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tracking Overview:\nTotal Distance: {:.2} km\nAverage Speed: {}",
            self.total_distance_km,
            format_kmh(self.average_speed_kmh)
        )
    }
}

/// User-toggled accumulator, independent of the rolling Track.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    points: Vec<PositionSample>,
}

impl Session {
    /// Create new session in Idle state
    pub fn new() -> Self {
        Session {
            state: SessionState::Idle,
            started_at: None,
            points: Vec::new(),
        }
    }

    /// Idle/Stopped → Active. Clears previously recorded points.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            SessionState::Active => Err(TrackerError::AlreadyRunning),
            SessionState::Idle | SessionState::Stopped => {
                self.points.clear();
                self.started_at = Some(now);
                self.state = SessionState::Active;
                Ok(())
            }
        }
    }

    /// Active → Stopped, returning the frozen summary.
    pub fn stop(&mut self) -> Result<SessionSummary> {
        if self.state != SessionState::Active {
            return Err(TrackerError::NotRunning);
        }
        self.state = SessionState::Stopped;
        Ok(self.summary())
    }

    /// Append `sample` when active and its timestamp differs from the last
    /// recorded one. Returns whether the point was kept.
    pub fn record(&mut self, sample: &PositionSample) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        if let Some(last) = self.points.last() {
            if last.timestamp == sample.timestamp {
                return false;
            }
        }
        self.points.push(sample.clone());
        true
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn points(&self) -> &[PositionSample] {
        &self.points
    }

    /// Points for live display; only exposed while the session is running.
    pub fn active_points(&self) -> Option<&[PositionSample]> {
        self.is_active().then_some(self.points.as_slice())
    }

    pub fn summary(&self) -> SessionSummary {
        let elapsed_hours = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if self.points.len() >= 2 => {
                elapsed_seconds(first, last).unwrap_or(0.0) / 3600.0
            }
            _ => 0.0,
        };
        SessionSummary {
            started_at: self.started_at.unwrap_or_else(Utc::now),
            points: self.points.len(),
            total_distance_km: path_distance_km(&self.points),
            elapsed_hours,
            average_speed_kmh: session_average(&self.points),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
