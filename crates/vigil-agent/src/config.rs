use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub collect: CollectSection,
    pub device_monitor: DeviceMonitorSection,
    pub log: LogSection,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent: AgentSection::default(),
            collect: CollectSection::default(),
            device_monitor: DeviceMonitorSection::default(),
            log: LogSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub name: String,
    /// Default cadence for local health logging in degraded mode.
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: "vigil-agent".to_string(),
            interval_secs: 30,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CollectSection {
    pub system: SystemSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemSection {
    pub enabled: bool,
    pub cpu: bool,
    pub memory: bool,
    pub disk: bool,
    pub network: bool,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu: true,
            memory: true,
            disk: true,
            network: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceMonitorSection {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub config_refresh_interval_secs: u64,
    pub metrics_buffer_size: usize,
    pub metrics_flush_interval_secs: u64,
    pub command_map_path: String,
}

impl Default for DeviceMonitorSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            timeout_secs: 30,
            heartbeat_interval_secs: 30,
            config_refresh_interval_secs: 300,
            metrics_buffer_size: 100,
            metrics_flush_interval_secs: 10,
            command_map_path: "config/command_mapping.yaml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    /// "text" or "json".
    pub format: String,
    /// "stdout", "stderr", or a file path.
    pub output: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            output: "stdout".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup-fatal checks. Anything that fails here aborts before the first
    /// heartbeat, so misconfiguration is caught by the service supervisor.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.name.is_empty() {
            anyhow::bail!("agent.name must not be empty");
        }
        if self.agent.interval_secs == 0 {
            anyhow::bail!("agent.interval_secs must be greater than zero");
        }
        if self.agent.timeout_secs == 0 {
            anyhow::bail!("agent.timeout_secs must be greater than zero");
        }

        if self.device_monitor.enabled {
            if self.device_monitor.base_url.is_empty() {
                anyhow::bail!("device_monitor.base_url is required when device_monitor is enabled");
            }
            if self.device_monitor.timeout_secs == 0 {
                anyhow::bail!("device_monitor.timeout_secs must be greater than zero");
            }
            if self.device_monitor.heartbeat_interval_secs == 0 {
                anyhow::bail!("device_monitor.heartbeat_interval_secs must be greater than zero");
            }
            if self.device_monitor.config_refresh_interval_secs == 0 {
                anyhow::bail!("device_monitor.config_refresh_interval_secs must be greater than zero");
            }
            if self.device_monitor.metrics_buffer_size == 0 {
                anyhow::bail!("device_monitor.metrics_buffer_size must be greater than zero");
            }
            if self.device_monitor.metrics_flush_interval_secs == 0 {
                anyhow::bail!("device_monitor.metrics_flush_interval_secs must be greater than zero");
            }
        }
        Ok(())
    }
}
