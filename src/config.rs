use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TrackerError};

pub const DEFAULT_IMEI: &str = "867007069790282";

/// Connection and polling settings for one tracked device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// InfluxDB base URL, without the `/api/v2/query` suffix
    pub server_url: String,
    pub org: String,
    pub bucket: String,
    /// API token; usually supplied through the environment
    pub token: String,
    pub imei: String,
    pub poll_interval_ms: u64,
    /// Flux range for the live track, e.g. `-10m`
    pub live_range: String,
    pub request_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            server_url: "https://dtracker.no:8086".to_string(),
            org: "dtracker".to_string(),
            bucket: "trackerBucket".to_string(),
            token: String::new(),
            imei: DEFAULT_IMEI.to_string(),
            poll_interval_ms: 1000,
            live_range: "-10m".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl TrackerConfig {
    /// Load from a JSON file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&content)
            .map_err(|e| TrackerError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TrackerError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(TrackerError::InvalidConfig(format!(
                "server_url must be http(s): {}",
                self.server_url
            )));
        }
        if self.imei.is_empty() || !self.imei.chars().all(|c| c.is_ascii_digit()) {
            return Err(TrackerError::InvalidConfig(format!("invalid IMEI: {:?}", self.imei)));
        }
        if self.org.trim().is_empty() {
            return Err(TrackerError::InvalidConfig("org must not be empty".to_string()));
        }
        // bucket is quoted into the Flux source
        if self.bucket.is_empty() || self.bucket.chars().any(|c| c == '"' || c == '\\' || c.is_whitespace()) {
            return Err(TrackerError::InvalidConfig(format!("invalid bucket name: {:?}", self.bucket)));
        }
        if !is_flux_duration(&self.live_range) {
            return Err(TrackerError::InvalidConfig(format!(
                "live_range must be a relative Flux duration like -10m: {:?}",
                self.live_range
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Query endpoint without the `org` parameter, which the client adds encoded.
    pub fn query_url(&self) -> String {
        format!("{}/api/v2/query", self.server_url.trim_end_matches('/'))
    }
}

/// Accepts negative relative durations such as `-10m`, `-1h`, `-30s`.
pub fn is_flux_duration(range: &str) -> bool {
    let Some(body) = range.strip_prefix('-') else {
        return false;
    };
    let digits = body.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let unit = &body[digits.len()..];
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && matches!(unit, "s" | "m" | "h" | "d" | "w")
}
