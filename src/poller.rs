use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};

use crate::config::TrackerConfig;
use crate::flux::{FetchError, RangeStart, TelemetrySource};
use crate::storage::CoordinateStore;
use crate::tracker::Tracker;

pub type SharedTracker = Arc<Mutex<Tracker>>;

/// One fetch-parse-reconcile cycle. The lock is only taken once the response
/// is in hand, so readers are never blocked on the network.
pub async fn poll_once<S: TelemetrySource>(
    tracker: &Mutex<Tracker>,
    source: &S,
    range: &RangeStart,
    store: Option<&CoordinateStore>,
) -> Result<(), FetchError> {
    let body = match source.fetch_positions(range).await {
        Ok(body) => body,
        Err(e) => {
            tracker.lock().await.record_failure();
            return Err(e);
        }
    };

    let (before, after) = {
        let mut guard = tracker.lock().await;
        let before = guard.last_known();
        guard.ingest_csv(&body);
        (before, guard.last_known())
    };

    if let (Some(store), Some(lon_lat)) = (store, after) {
        if before != after {
            if let Err(e) = store.save(lon_lat) {
                log::warn!("Failed to persist last coordinate: {}", e);
            }
        }
    }
    Ok(())
}

/// Poll until `shutdown` flips to true. Ticks that come due while a fetch is
/// still running are skipped rather than queued.
pub async fn run_poller<S: TelemetrySource>(
    tracker: SharedTracker,
    source: S,
    config: TrackerConfig,
    store: Option<CoordinateStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let range = RangeStart::Relative(config.live_range.clone());
    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut consecutive_failures = 0u32;

    log::info!(
        "Polling IMEI {} every {} ms (range {})",
        config.imei,
        config.poll_interval_ms,
        config.live_range
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match poll_once(&tracker, &source, &range, store.as_ref()).await {
                    Ok(()) => {
                        if consecutive_failures > 0 {
                            log::info!("Fetch recovered after {} failures", consecutive_failures);
                        }
                        consecutive_failures = 0;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        // one line per outage, then stay quiet
                        if consecutive_failures == 1 {
                            log::warn!("Error fetching data: {}", e);
                        } else {
                            log::debug!("Error fetching data ({} in a row): {}", consecutive_failures, e);
                        }
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    log::info!("Poller stopped");
}
