// dtracker: telemetry core for a GPS pet tracker
// Turns InfluxDB query responses into a time-ordered track with speed,
// distance and walk-session metrics for a map front-end.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod flux;
pub mod metrics;
pub mod parser;
pub mod poller;
pub mod reconciler;
pub mod report;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod types;

pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use flux::{FetchError, FluxClient, RangeStart, TelemetrySource};
pub use metrics::{instantaneous_speed, route_distance, session_average, DerivedMetrics, RouteSummary};
pub use parser::parse_rows;
pub use reconciler::reconcile;
pub use session::{Session, SessionState, SessionSummary};
pub use tracker::{Snapshot, Tracker};
pub use types::{Field, PositionSample, PositionUpdate, RawSample, SensorSnapshot, Track};
