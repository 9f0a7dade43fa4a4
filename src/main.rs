use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use dtracker::dashboard::{start_dashboard, FeedState};
use dtracker::metrics::route_summary;
use dtracker::poller::{run_poller, SharedTracker};
use dtracker::report::{fetch_device_info, fetch_route_summary};
use dtracker::storage::{CoordinateStore, GpxTrack};
use dtracker::{parse_rows, reconcile, FluxClient, RangeStart, TelemetrySource, Track, Tracker, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "dtracker")]
#[command(about = "GPS pet tracker telemetry: live track, speed, distance and walk sessions", long_about = None)]
struct Args {
    /// JSON config file (flags and environment override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// InfluxDB base URL
    #[arg(long, env = "INFLUX_URL", global = true)]
    server_url: Option<String>,

    /// InfluxDB API token
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[arg(long, global = true)]
    org: Option<String>,

    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Device IMEI
    #[arg(long, env = "DTRACKER_IMEI", global = true)]
    imei: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the live track and serve snapshots to the map
    Watch {
        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Flux range of the live track
        #[arg(long, allow_hyphen_values = true)]
        range: Option<String>,

        /// Port for the feed server
        #[arg(long, default_value = "8081")]
        port: u16,

        /// Where the last known coordinate is kept between runs
        #[arg(long, default_value = "dtracker_state/last_coordinate.json")]
        state_file: PathBuf,

        /// Write the last walk session as GPX on exit
        #[arg(long)]
        gpx: Option<PathBuf>,
    },
    /// Distance and average speed over a recent window
    Route {
        /// Flux range, e.g. -10m, -15m, -30m
        #[arg(default_value = "-10m", allow_hyphen_values = true)]
        range: String,
    },
    /// Sensor readings, location and distance walked today
    Info {
        #[arg(long, default_value = "dtracker_state/last_coordinate.json")]
        state_file: PathBuf,
    },
    /// Compute metrics from a saved CSV query response
    Replay {
        /// Path to the CSV file
        path: PathBuf,
    },
}

impl Args {
    fn tracker_config(&self) -> Result<TrackerConfig> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::load(path)?,
            None => TrackerConfig::default(),
        };
        if let Some(url) = &self.server_url {
            config.server_url = url.clone();
        }
        if let Some(token) = &self.token {
            config.token = token.clone();
        }
        if let Some(org) = &self.org {
            config.org = org.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        match &self.imei {
            Some(imei) => config.imei = imei.clone(),
            None if self.config.is_none() => {
                log::info!("IMEI not given, using default IMEI: {}", config.imei)
            }
            None => {}
        }
        if let Command::Watch { interval_ms, range, .. } = &self.command {
            if let Some(ms) = interval_ms {
                config.poll_interval_ms = *ms;
            }
            if let Some(range) = range {
                config.live_range = range.clone();
            }
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Command::Replay { path } = &args.command {
        let body = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut tracker = Tracker::new();
        let metrics = tracker.ingest_csv(&body).clone();
        println!("Positions: {}", tracker.track().len());
        println!("{}", metrics);
        println!("{}", route_summary("file", tracker.track()));
        return Ok(());
    }

    let config = args.tracker_config()?;
    if config.token.is_empty() {
        log::warn!("No InfluxDB token configured (set INFLUX_TOKEN)");
    }
    let client = FluxClient::new(&config);

    match args.command {
        Command::Watch {
            port, state_file, gpx, ..
        } => run_watch(config, client, port, state_file, gpx).await,
        Command::Route { range } => {
            if !dtracker::config::is_flux_duration(&range) {
                anyhow::bail!("invalid range {:?}, expected e.g. -15m", range);
            }
            let summary = fetch_route_summary(&client, &range).await?;
            println!("{}", summary);
            Ok(())
        }
        Command::Info { state_file } => {
            let location = CoordinateStore::new(state_file).load()?;
            let range = RangeStart::Relative(config.live_range.clone());
            let live = match client.fetch_positions(&range).await {
                Ok(body) => reconcile(&parse_rows(&body)),
                Err(e) => {
                    log::warn!("Error fetching live position: {}", e);
                    Track::new()
                }
            };
            let location = live.latest().map(|s| s.lon_lat()).or(location);
            if location.is_none() {
                println!("No location data available yet.");
            }
            let info = fetch_device_info(&client, location, Local::now()).await;
            println!("{}", info);
            Ok(())
        }
        Command::Replay { .. } => Ok(()),
    }
}

async fn run_watch(
    config: TrackerConfig,
    client: FluxClient,
    port: u16,
    state_file: PathBuf,
    gpx: Option<PathBuf>,
) -> Result<()> {
    let store = CoordinateStore::new(state_file);
    let tracker: SharedTracker = Arc::new(Mutex::new(Tracker::new()));

    match store.load() {
        Ok(Some(lon_lat)) => {
            log::info!("Warm start at {:?}", lon_lat);
            tracker.lock().await.warm_start(lon_lat);
        }
        Ok(None) => {}
        Err(e) => log::warn!("Error loading stored coordinate: {}", e),
    }

    let feed = FeedState {
        tracker: tracker.clone(),
        push_interval: config.poll_interval().max(Duration::from_millis(250)),
    };
    let server = tokio::spawn(async move {
        if let Err(e) = start_dashboard(feed, port).await {
            log::error!("Feed server failed: {}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(run_poller(tracker.clone(), client, config, Some(store), shutdown_rx));

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    shutdown_tx.send(true).ok();
    poller.await?;
    server.abort();

    let mut guard = tracker.lock().await;
    if guard.session().is_active() {
        let summary = guard.stop_session()?;
        println!("{}", summary);
    }
    if let Some(path) = gpx {
        if let Some(summary) = guard.snapshot().last_session {
            let name = format!("Walk {}", Utc::now().format("%Y-%m-%d %H:%M"));
            GpxTrack::from_session(&name, &summary, guard.session().points()).save(&path)?;
            log::info!("Session written to {}", path.display());
        }
    }
    Ok(())
}
