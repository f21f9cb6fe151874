//! Authoritative holder of the per-agent collection plan.
//!
//! Fetches the item list on an interval or on demand, diffs it structurally
//! against the stored plan, and publishes changes to the single observer
//! (the lifecycle controller) through a watch channel.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_client::error::ClientError;
use vigil_client::PlatformClient;
use vigil_common::types::MonitorItem;

pub struct ConfigManager {
    client: Arc<PlatformClient>,
    refresh_interval: Duration,
    items: RwLock<Vec<MonitorItem>>,
    refresh_signal: Notify,
    updates: watch::Sender<Vec<MonitorItem>>,
}

impl ConfigManager {
    pub fn new(client: Arc<PlatformClient>, refresh_interval: Duration) -> Self {
        let (updates, _) = watch::channel(Vec::new());
        Self {
            client,
            refresh_interval,
            items: RwLock::new(Vec::new()),
            refresh_signal: Notify::new(),
            updates,
        }
    }

    /// Plan updates as published; the initial value is the empty plan.
    pub fn subscribe(&self) -> watch::Receiver<Vec<MonitorItem>> {
        self.updates.subscribe()
    }

    /// Initial fetch. An auth failure propagates so the controller can
    /// re-register before the refresh loop starts; any other failure keeps
    /// the (empty) plan and lets the loop retry.
    pub async fn start(&self) -> Result<(), ClientError> {
        match self.fetch_and_publish().await {
            Ok(_) => Ok(()),
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                warn!(error = %e, "Initial config fetch failed, starting with empty plan");
                Ok(())
            }
        }
    }

    /// Nudge the refresh loop. The signal slot holds at most one pending
    /// request.
    pub fn request_refresh(&self) {
        debug!("Config refresh requested");
        self.refresh_signal.notify_one();
    }

    /// A copy of the current plan; callers never see the live store.
    pub fn items(&self) -> Vec<MonitorItem> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn item_count(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // start() already fetched; skip the immediate first tick.
        ticker.reset();

        info!(
            refresh_interval_secs = self.refresh_interval.as_secs(),
            "Config manager started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Config manager stopped");
                    return;
                }
                _ = self.refresh_signal.notified() => self.refresh().await,
                _ = ticker.tick() => self.refresh().await,
            }
        }
    }

    async fn refresh(&self) {
        match self.fetch_and_publish().await {
            Ok(_) => {}
            Err(e) if e.is_auth() => {
                // Stay on the previous plan until re-registration publishes a
                // fresh token and nudges us again.
                warn!(error = %e, "Config fetch rejected, keeping previous plan");
            }
            Err(e) => {
                warn!(error = %e, "Config fetch failed, keeping previous plan");
            }
        }
    }

    /// Fetch, diff, publish. Returns whether the plan changed.
    async fn fetch_and_publish(&self) -> Result<bool, ClientError> {
        let mut fetched = self.client.get_config().await?;
        fetched.sort_by_key(|item| item.item_id);

        let changed = {
            let mut current = self.items.write().unwrap_or_else(|e| e.into_inner());
            if *current == fetched {
                false
            } else {
                *current = fetched.clone();
                true
            }
        };

        if changed {
            info!(item_count = fetched.len(), "Collection plan updated");
            // send_replace stores the value even while nobody subscribes, so
            // an update published before the controller attaches is not lost.
            self.updates.send_replace(fetched);
        } else {
            debug!(item_count = fetched.len(), "Collection plan unchanged");
        }
        Ok(changed)
    }
}
