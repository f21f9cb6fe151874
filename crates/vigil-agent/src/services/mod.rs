//! Platform-facing services and their coordination edges.

pub mod config_manager;
pub mod heartbeat;
pub mod metrics_sender;
pub mod register;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use config_manager::ConfigManager;
use register::RegisterService;

/// Re-registration: 3 attempts, 5 s apart, all inside a 30 s deadline.
const REREGISTER_ATTEMPTS: u32 = 3;
const REREGISTER_DELAY: Duration = Duration::from_secs(5);
const REREGISTER_DEADLINE: Duration = Duration::from_secs(30);

/// The coordination edges between services that the source modeled as
/// back-references. Heartbeat calls in here; the coordinator drives the
/// register service and nudges the config manager, so no service holds a
/// peer directly.
pub struct Coordinator {
    register: RegisterService,
    config: Arc<ConfigManager>,
}

impl Coordinator {
    pub fn new(register: RegisterService, config: Arc<ConfigManager>) -> Self {
        Self { register, config }
    }

    /// Re-acquire credentials and, on success, trigger a config refresh so
    /// the new token takes effect across the plan immediately.
    pub async fn reregister(&self, cancel: &CancellationToken) -> bool {
        info!("Starting re-registration");

        let attempt = self
            .register
            .register_with_retry(REREGISTER_ATTEMPTS, REREGISTER_DELAY, cancel);
        match tokio::time::timeout(REREGISTER_DEADLINE, attempt).await {
            Ok(Ok(())) => {
                self.config.request_refresh();
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "Re-registration failed");
                false
            }
            Err(_) => {
                error!(
                    deadline_secs = REREGISTER_DEADLINE.as_secs(),
                    "Re-registration exceeded deadline"
                );
                false
            }
        }
    }
}
