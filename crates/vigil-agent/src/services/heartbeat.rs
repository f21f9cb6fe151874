//! Periodic liveness ping with failure tracking.
//!
//! The transition logic lives in [`HeartbeatState`], a pure state machine:
//! three consecutive non-auth failures degrade the reported status to
//! WARNING, ten trigger re-registration, and a single auth failure triggers
//! it immediately.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_client::error::ClientError;
use vigil_client::PlatformClient;
use vigil_common::types::AgentStatus;

use crate::services::Coordinator;

const WARNING_THRESHOLD: u32 = 3;
const REREGISTER_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BeatOutcome {
    Success,
    Failure { auth: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BeatAction {
    None,
    Reregister,
}

#[derive(Debug)]
pub(crate) struct HeartbeatState {
    status: AgentStatus,
    failures: u32,
}

impl HeartbeatState {
    pub(crate) fn new() -> Self {
        Self {
            status: AgentStatus::Online,
            failures: 0,
        }
    }

    pub(crate) fn status(&self) -> AgentStatus {
        self.status
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }

    pub(crate) fn on_outcome(&mut self, outcome: BeatOutcome) -> BeatAction {
        match outcome {
            BeatOutcome::Success => {
                self.failures = 0;
                if self.status == AgentStatus::Warning {
                    self.status = AgentStatus::Online;
                }
                BeatAction::None
            }
            BeatOutcome::Failure { auth: true } => {
                self.failures += 1;
                self.status = AgentStatus::Warning;
                BeatAction::Reregister
            }
            BeatOutcome::Failure { auth: false } => {
                self.failures += 1;
                if self.failures >= WARNING_THRESHOLD {
                    self.status = AgentStatus::Warning;
                }
                if self.failures >= REREGISTER_THRESHOLD {
                    BeatAction::Reregister
                } else {
                    BeatAction::None
                }
            }
        }
    }

    /// Applied after a successful re-registration.
    pub(crate) fn on_reregistered(&mut self) {
        self.failures = 0;
        self.status = AgentStatus::Online;
    }
}

pub struct HeartbeatService {
    client: Arc<PlatformClient>,
    beat_interval: Duration,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatService {
    pub fn new(client: Arc<PlatformClient>, beat_interval: Duration) -> Self {
        Self {
            client,
            beat_interval,
            state: Mutex::new(HeartbeatState::new()),
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .status()
    }

    /// Heartbeat loop. The first beat goes out immediately, then one per
    /// interval tick.
    pub async fn run(&self, coordinator: Arc<Coordinator>, cancel: CancellationToken) {
        let mut ticker = interval(self.beat_interval);
        info!(
            interval_secs = self.beat_interval.as_secs(),
            "Heartbeat service started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Heartbeat service stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let action = self.beat_once().await;
                    if action == BeatAction::Reregister && coordinator.reregister(&cancel).await {
                        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                        state.on_reregistered();
                        info!("Re-registration succeeded, agent back online");
                    }
                }
            }
        }
    }

    async fn beat_once(&self) -> BeatAction {
        let status = self.status();
        let outcome = match self.client.heartbeat(status).await {
            Ok(()) => {
                debug!(%status, "Heartbeat sent");
                BeatOutcome::Success
            }
            Err(e) => {
                let auth = matches!(e, ClientError::Auth(_) | ClientError::NotRegistered);
                warn!(error = %e, auth, "Heartbeat failed");
                BeatOutcome::Failure { auth }
            }
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.status();
        let action = state.on_outcome(outcome);
        if state.status() != before {
            info!(
                from = %before,
                to = %state.status(),
                failures = state.failures(),
                "Agent status changed"
            );
        }
        action
    }
}
