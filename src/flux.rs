use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

use crate::config::TrackerConfig;

/// Fetch errors from the InfluxDB query API
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    NetworkTimeout,
    HttpError(u16),
    Transport(String),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            FetchError::NetworkTimeout => write!(f, "Network timeout"),
            FetchError::HttpError(code) => write!(f, "HTTP error: {}", code),
            FetchError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

/// Where the window of the query starts.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeStart {
    /// Relative Flux duration such as `-10m`
    Relative(String),
    Since(DateTime<Utc>),
}

impl Display for RangeStart {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RangeStart::Relative(range) => f.write_str(range),
            RangeStart::Since(t) => f.write_str(&t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        }
    }
}

/// Anything that can answer position and sensor queries with CSV text.
pub trait TelemetrySource {
    fn fetch_positions(&self, start: &RangeStart) -> impl Future<Output = Result<String, FetchError>> + Send;

    fn fetch_sensors(&self) -> impl Future<Output = Result<String, FetchError>> + Send;
}

pub fn position_query(bucket: &str, imei: &str, start: &RangeStart) -> String {
    format!(
        "from(bucket: \"{bucket}\")\n  \
         |> range(start: {start})\n  \
         |> filter(fn: (r) => r[\"_measurement\"] == \"GNSS\")\n  \
         |> filter(fn: (r) => r[\"IMEI\"] == \"{imei}\")\n  \
         |> filter(fn: (r) => r[\"_field\"] == \"Latitude\" or r[\"_field\"] == \"Longitude\")\n  \
         |> keep(columns: [\"_time\", \"_value\", \"_field\"])"
    )
}

pub fn sensor_query(bucket: &str, imei: &str) -> String {
    format!(
        "from(bucket: \"{bucket}\")\n  \
         |> range(start: -1h)\n  \
         |> filter(fn: (r) => r[\"_measurement\"] == \"SENSOR\")\n  \
         |> filter(fn: (r) => r[\"IMEI\"] == \"{imei}\")\n  \
         |> filter(fn: (r) => r[\"_field\"] == \"Temperature\" or r[\"_field\"] == \"Humidity\" or r[\"_field\"] == \"Battery\")\n  \
         |> last()\n  \
         |> keep(columns: [\"_time\", \"_value\", \"_field\"])"
    )
}

/// InfluxDB 2.x client for one device.
pub struct FluxClient {
    client: reqwest::Client,
    url: String,
    org: String,
    token: String,
    bucket: String,
    imei: String,
}

impl FluxClient {
    pub fn new(config: &TrackerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("dtracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        FluxClient {
            client,
            url: config.query_url(),
            org: config.org.clone(),
            token: config.token.clone(),
            bucket: config.bucket.clone(),
            imei: config.imei.clone(),
        }
    }

    fn request(&self, flux: String) -> reqwest::RequestBuilder {
        self.client
            .post(&self.url)
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(flux)
    }

    async fn query(&self, flux: String) -> Result<String, FetchError> {
        log::debug!("POST {} (org {})\n{}", self.url, self.org, flux);

        let response = self
            .request(flux)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::NetworkTimeout
                } else {
                    FetchError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Query rejected with {}: {}", status, body.trim());
            return Err(FetchError::HttpError(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Transport(format!("Failed to read response: {}", e)))
    }
}

impl TelemetrySource for FluxClient {
    async fn fetch_positions(&self, start: &RangeStart) -> Result<String, FetchError> {
        self.query(position_query(&self.bucket, &self.imei, start)).await
    }

    async fn fetch_sensors(&self) -> Result<String, FetchError> {
        self.query(sensor_query(&self.bucket, &self.imei)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_position_query() {
        let query = position_query("trackerBucket", "867007069790282", &RangeStart::Relative("-10m".into()));

        assert!(query.starts_with("from(bucket: \"trackerBucket\")"));
        assert!(query.contains("|> range(start: -10m)"));
        assert!(query.contains("r[\"_measurement\"] == \"GNSS\""));
        assert!(query.contains("r[\"IMEI\"] == \"867007069790282\""));
        assert!(query.contains("\"Latitude\" or r[\"_field\"] == \"Longitude\""));
        assert!(query.ends_with("keep(columns: [\"_time\", \"_value\", \"_field\"])"));
    }

    #[test]
    fn test_range_since_midnight() {
        let midnight = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let query = position_query("b", "1", &RangeStart::Since(midnight));
        assert!(query.contains("|> range(start: 2024-01-01T00:00:00Z)"));
    }

    #[test]
    fn test_sensor_query() {
        let query = sensor_query("trackerBucket", "867007069790282");
        assert!(query.contains("== \"SENSOR\""));
        assert!(query.contains("|> last()"));
        assert!(query.contains("\"Battery\""));
    }

    #[test]
    fn test_fetch_error_display() {
        let errors = vec![
            FetchError::NetworkTimeout,
            FetchError::HttpError(401),
            FetchError::Transport("connection refused".to_string()),
        ];

        for err in errors {
            let display = format!("{}", err);
            assert!(!display.is_empty());
        }
        assert_eq!(FetchError::HttpError(401).to_string(), "HTTP error: 401");
    }

    #[test]
    fn test_client_url() {
        let config = TrackerConfig {
            server_url: "http://localhost:8086/".to_string(),
            ..TrackerConfig::default()
        };
        let client = FluxClient::new(&config);
        assert_eq!(client.url, "http://localhost:8086/api/v2/query");
    }

    #[test]
    fn test_org_sent_as_encoded_query() {
        let config = TrackerConfig {
            org: "pet tracker&co".to_string(),
            ..TrackerConfig::default()
        };
        let client = FluxClient::new(&config);
        let request = client.request(String::new()).build().unwrap();
        assert_eq!(request.url().path(), "/api/v2/query");
        assert_eq!(request.url().query(), Some("org=pet+tracker%26co"));
    }

    // Integration test (requires network and a token, disabled by default)
    #[tokio::test]
    #[ignore]
    async fn test_fetch_positions_integration() {
        let config = TrackerConfig {
            token: std::env::var("INFLUX_TOKEN").unwrap_or_default(),
            ..TrackerConfig::default()
        };
        let client = FluxClient::new(&config);

        match client.fetch_positions(&RangeStart::Relative("-10m".into())).await {
            Ok(body) => println!("Fetched {} bytes", body.len()),
            Err(e) => println!("Fetch error (acceptable): {}", e),
        }
    }
}
