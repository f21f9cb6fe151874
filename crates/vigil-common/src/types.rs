use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// A single sampled value as it travels from a collector to the platform.
///
/// The platform accepts one scalar per data point. Collectors that naturally
/// produce sequences (load averages, multi-row query results) wrap them in
/// `List`; `into_scalar` is the one place where the reduction to the first
/// element happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<MetricValue>),
}

impl MetricValue {
    /// Reduce to a platform-transmittable scalar. Lists collapse to their
    /// first element; an empty list degrades to `Int(0)`.
    pub fn into_scalar(self) -> MetricValue {
        match self {
            MetricValue::List(mut items) => {
                if items.is_empty() {
                    MetricValue::Int(0)
                } else {
                    items.swap_remove(0).into_scalar()
                }
            }
            other => other,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Bool(v) => write!(f, "{v}"),
            MetricValue::Text(v) => write!(f, "{v}"),
            MetricValue::List(items) => write!(f, "[{} values]", items.len()),
        }
    }
}

/// A day-of-week-bound time window that overrides an item's default cadence.
///
/// `day_of_week` uses Monday=1 .. Sunday=7. The window is strict on both ends:
/// a sample at exactly `start_time` or `end_time` is outside the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomInterval {
    #[serde(rename = "week")]
    pub day_of_week: u8,
    #[serde(rename = "startTime")]
    pub start_time: NaiveTime,
    #[serde(rename = "endTime")]
    pub end_time: NaiveTime,
    #[serde(rename = "intervalSeconds")]
    pub interval_secs: u32,
}

impl CustomInterval {
    /// True when `day` (Monday=1) and `time` fall strictly inside the window.
    pub fn contains(&self, day: u8, time: NaiveTime) -> bool {
        self.day_of_week == day && self.start_time < time && time < self.end_time
    }
}

/// One row of the per-agent collection plan returned by the platform.
///
/// Identity is `item_id`; full-field equality is what the config manager uses
/// to decide whether a running task must be restarted.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorItem {
    pub item_id: i64,
    pub item_name: String,
    pub item_key: String,
    pub info_type: i32,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub intervals: Vec<CustomInterval>,
}

impl MonitorItem {
    /// An item with neither a default cadence nor any custom window can never
    /// fire and is skipped by the scheduler.
    pub fn has_schedule(&self) -> bool {
        self.interval_secs > 0 || !self.intervals.is_empty()
    }
}

/// Liveness status reported in heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Online,
    Offline,
    Warning,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Online => write!(f, "ONLINE"),
            AgentStatus::Offline => write!(f, "OFFLINE"),
            AgentStatus::Warning => write!(f, "WARNING"),
        }
    }
}

/// Process-wide identity, populated by the first successful registration and
/// republished wholesale on re-registration.
#[derive(Debug, Clone, Default)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub token: String,
    pub hostname: String,
    pub primary_ip: String,
    pub os_kind: String,
    pub os_version: String,
    pub agent_version: String,
}

impl AgentIdentity {
    pub fn is_registered(&self) -> bool {
        !self.agent_id.is_empty() && !self.token.is_empty()
    }
}

/// One buffered measurement on its way to the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub item_id: i64,
    pub timestamp: i64,
    pub value: MetricValue,
}
