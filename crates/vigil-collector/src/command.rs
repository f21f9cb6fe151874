//! User-mapped external commands.
//!
//! A YAML file maps item keys to shell lines, SQL queries or script paths.
//! Execution is bounded three ways: a per-command timeout, a retry budget,
//! and a process-wide concurrency cap.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_common::types::MetricValue;

use crate::error::{CommandError, MapperLoadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Shell,
    Powershell,
    Cmd,
    #[serde(alias = "mysql")]
    Sql,
    Script,
}

/// One mapping from the `commands:` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub command: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_sql_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    /// Per-command timeout; falls back to `settings.default_timeout`.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub description: String,
}

fn default_sql_port() -> u16 {
    3306
}

/// The `settings:` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapperSettings {
    pub default_timeout: u64,
    pub enabled: bool,
    pub retry_count: u32,
    pub retry_interval: u64,
    pub max_concurrent: usize,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            default_timeout: 30,
            enabled: true,
            retry_count: 2,
            retry_interval: 5,
            max_concurrent: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MapFile {
    #[serde(default)]
    commands: HashMap<String, CommandSpec>,
    #[serde(default)]
    settings: MapperSettings,
}

pub struct CommandMapper {
    commands: HashMap<String, CommandSpec>,
    settings: MapperSettings,
    semaphore: Semaphore,
    // One lazily connected pool per sql mapping, reused across executions.
    pools: Mutex<HashMap<String, MySqlPool>>,
}

impl CommandMapper {
    pub fn load(path: &Path) -> Result<Self, MapperLoadError> {
        let content = std::fs::read_to_string(path)?;
        let file: MapFile = serde_yaml::from_str(&content)?;

        info!(
            command_count = file.commands.len(),
            enabled = file.settings.enabled,
            "Command map loaded"
        );
        Ok(Self::from_parts(file.commands, file.settings))
    }

    /// An empty, disabled mapper. Used when the map file is absent, which is
    /// a warning at startup, not an error.
    pub fn disabled() -> Self {
        Self::from_parts(
            HashMap::new(),
            MapperSettings {
                enabled: false,
                ..MapperSettings::default()
            },
        )
    }

    fn from_parts(commands: HashMap<String, CommandSpec>, settings: MapperSettings) -> Self {
        let permits = settings.max_concurrent.max(1);
        Self {
            commands,
            settings,
            semaphore: Semaphore::new(permits),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// True when the mapper is enabled and has a mapping for `item_key`.
    /// This is the dispatcher's precedence check.
    pub fn handles(&self, item_key: &str) -> bool {
        self.settings.enabled && self.commands.contains_key(item_key)
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Execute the mapping for `item_key` and coerce its output.
    pub async fn execute(
        &self,
        item_key: &str,
        cancel: &CancellationToken,
    ) -> Result<MetricValue, CommandError> {
        if !self.settings.enabled {
            return Err(CommandError::NotMapped);
        }
        let spec = self.commands.get(item_key).ok_or(CommandError::NotMapped)?;

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CommandError::Cancelled),
            permit = self.semaphore.acquire() => {
                permit.map_err(|_| CommandError::Cancelled)?
            }
        };

        let timeout_secs = spec.timeout.unwrap_or(self.settings.default_timeout).max(1);

        let mut last_err = CommandError::NotMapped;
        for attempt in 0..=self.settings.retry_count {
            match self.run_once(item_key, spec, timeout_secs, cancel).await {
                Ok(value) => return Ok(value),
                Err(CommandError::Cancelled) => return Err(CommandError::Cancelled),
                Err(e) => {
                    warn!(
                        item_key,
                        attempt = attempt + 1,
                        max_attempts = self.settings.retry_count + 1,
                        error = %e,
                        "Command attempt failed"
                    );
                    last_err = e;
                }
            }

            if attempt < self.settings.retry_count {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CommandError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(self.settings.retry_interval)) => {}
                }
            }
        }
        Err(last_err)
    }

    async fn run_once(
        &self,
        item_key: &str,
        spec: &CommandSpec,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<MetricValue, CommandError> {
        match spec.kind {
            CommandKind::Shell => {
                run_process("sh", &["-c", &spec.command], timeout_secs, cancel).await
            }
            CommandKind::Powershell => {
                run_process("powershell", &["-Command", &spec.command], timeout_secs, cancel).await
            }
            CommandKind::Cmd => {
                run_process("cmd", &["/C", &spec.command], timeout_secs, cancel).await
            }
            CommandKind::Script => run_process(&spec.command, &[], timeout_secs, cancel).await,
            CommandKind::Sql => self.run_sql(item_key, spec, timeout_secs, cancel).await,
        }
    }

    async fn run_sql(
        &self,
        item_key: &str,
        spec: &CommandSpec,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<MetricValue, CommandError> {
        let pool = self.pool_for(item_key, spec).await;

        let query = sqlx::query(&spec.command).fetch_optional(&pool);
        let row = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CommandError::Cancelled),
            res = tokio::time::timeout(Duration::from_secs(timeout_secs), query) => {
                res.map_err(|_| CommandError::Timeout(timeout_secs))??
            }
        };

        let row = row.ok_or(CommandError::EmptyResult)?;
        if row.is_empty() {
            return Err(CommandError::EmptyResult);
        }

        // First column of the first row; numeric columns keep their type,
        // anything else goes through the text coercion.
        if let Ok(v) = row.try_get::<i64, _>(0) {
            return Ok(MetricValue::Int(v));
        }
        if let Ok(v) = row.try_get::<f64, _>(0) {
            return Ok(MetricValue::Float(v));
        }
        let text: String = row.try_get(0)?;
        Ok(coerce_output(&text))
    }

    async fn pool_for(&self, item_key: &str, spec: &CommandSpec) -> MySqlPool {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(item_key) {
            return pool.clone();
        }

        let options = MySqlConnectOptions::new()
            .host(&spec.host)
            .port(spec.port)
            .username(&spec.username)
            .password(&spec.password)
            .database(&spec.database);
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .min_connections(2)
            .max_lifetime(Duration::from_secs(180))
            .connect_lazy_with(options);

        pools.insert(item_key.to_string(), pool.clone());
        pool
    }
}

async fn run_process(
    program: &str,
    args: &[&str],
    timeout_secs: u64,
    cancel: &CancellationToken,
) -> Result<MetricValue, CommandError> {
    let mut command = tokio::process::Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(CommandError::Cancelled),
        res = tokio::time::timeout(Duration::from_secs(timeout_secs), command.output()) => {
            res.map_err(|_| CommandError::Timeout(timeout_secs))??
        }
    };

    if !output.status.success() {
        return Err(CommandError::NonZeroExit {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(coerce_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Trim, then try integer, then float, then fall back to text.
fn coerce_output(raw: &str) -> MetricValue {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return MetricValue::Int(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return MetricValue::Float(v);
    }
    MetricValue::Text(trimmed.to_string())
}
