use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::session::SessionSummary;
use crate::types::PositionSample;

/// Persists the last known coordinate as JSON `[lon, lat]` for warm start.
#[derive(Debug, Clone)]
pub struct CoordinateStore {
    path: PathBuf,
}

impl CoordinateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing was stored yet. A corrupt file is logged and
    /// treated as empty.
    pub fn load(&self) -> Result<Option<[f64; 2]>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<[f64; 2]>(&content) {
            Ok(lon_lat) => Ok(Some(lon_lat)),
            Err(e) => {
                log::warn!("Ignoring stored coordinate in {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, lon_lat: [f64; 2]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string(&lon_lat)?)?;
        Ok(())
    }
}

/// GPX track format for mapping applications
#[derive(Debug)]
pub struct GpxTrack {
    pub name: String,
    pub description: String,
    pub track_points: Vec<PositionSample>,
}

impl GpxTrack {
    pub fn from_session(name: &str, summary: &SessionSummary, points: &[PositionSample]) -> Self {
        GpxTrack {
            name: name.to_string(),
            description: format!(
                "Started {}, {:.2} km",
                summary.started_at.to_rfc3339(),
                summary.total_distance_km
            ),
            track_points: points.to_vec(),
        }
    }

    /// Generate GPX document XML string
    pub fn to_gpx_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<gpx version=\"1.1\" creator=\"dtracker\">\n");
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str(&format!("    <desc>{}</desc>\n", escape_xml(&self.description)));
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>{}</name>\n", escape_xml(&self.name)));
        xml.push_str("    <trkseg>\n");

        for point in &self.track_points {
            xml.push_str(&format!(
                "      <trkpt lat=\"{}\" lon=\"{}\">\n",
                point.latitude, point.longitude
            ));
            xml.push_str(&format!("        <time>{}</time>\n", escape_xml(&point.timestamp)));
            xml.push_str("      </trkpt>\n");
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");

        xml
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_gpx_xml())?;
        Ok(())
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
