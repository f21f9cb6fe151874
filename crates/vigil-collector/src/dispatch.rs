//! Source selection for one item key.
//!
//! Priority: user-mapped command first, built-in key second. A fresh system
//! snapshot is captured per built-in dispatch so extractors always see
//! current state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use vigil_common::types::MetricValue;

use crate::builtin::BuiltinKeyRegistry;
use crate::command::CommandMapper;
use crate::error::DispatchError;
use crate::snapshot::SystemProber;

/// Which source produced a value; carried into logs next to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Command,
    Builtin,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Command => write!(f, "command"),
            ValueSource::Builtin => write!(f, "builtin"),
        }
    }
}

pub struct ValueDispatcher {
    mapper: Arc<CommandMapper>,
    registry: Arc<BuiltinKeyRegistry>,
    prober: SystemProber,
}

impl ValueDispatcher {
    pub fn new(
        mapper: Arc<CommandMapper>,
        registry: Arc<BuiltinKeyRegistry>,
        prober: SystemProber,
    ) -> Self {
        Self {
            mapper,
            registry,
            prober,
        }
    }

    /// Resolve `item_key` to a value, trying sources in priority order.
    pub async fn dispatch(
        &self,
        item_key: &str,
        cancel: &CancellationToken,
    ) -> Result<(MetricValue, ValueSource), DispatchError> {
        if self.mapper.handles(item_key) {
            debug!(item_key, "Dispatching to command mapper");
            let value = self.mapper.execute(item_key, cancel).await?;
            return Ok((value, ValueSource::Command));
        }

        if self.registry.contains(item_key) {
            debug!(item_key, "Dispatching to builtin registry");
            let snapshot = self.prober.capture_async().await;
            if let Some(value) = self.registry.extract(item_key, &snapshot) {
                return Ok((value, ValueSource::Builtin));
            }
        }

        Err(DispatchError::UnknownKey(item_key.to_string()))
    }
}
