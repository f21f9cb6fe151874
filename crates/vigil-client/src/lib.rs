//! Typed HTTP client for the device-monitor platform API.
//!
//! One `reqwest` connection pool, one configured timeout, bearer auth
//! injected from the shared [`identity::IdentityStore`]. Retry policy belongs
//! to callers; the client only classifies failures (see [`error::ClientError`]).

pub mod error;
pub mod identity;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vigil_common::types::{AgentStatus, CustomInterval, MetricValue, MonitorItem};

use crate::error::ClientError;
use crate::identity::IdentityStore;

const USER_AGENT: &str = concat!("vigil-agent/", env!("CARGO_PKG_VERSION"));

/// Fields the agent submits when registering.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub hostname: String,
    pub ip_address: String,
    pub os_type: String,
    pub os_version: String,
    pub agent_version: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i32,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RegisterData {
    #[serde(rename = "agentId", default)]
    agent_id: String,
    #[serde(default)]
    token: String,
}

/// One plan row as the platform serializes it. Field spellings (`itemkey`,
/// `updateIntervalseconds`) are the platform's, not ours.
#[derive(Debug, Deserialize)]
struct ConfigRow {
    #[serde(rename = "itemId")]
    item_id: i64,
    #[serde(rename = "itemName", default)]
    item_name: String,
    #[serde(rename = "itemkey", default)]
    item_key: String,
    #[serde(rename = "infoType", default)]
    info_type: i32,
    #[serde(rename = "updateIntervalseconds", default)]
    interval_secs: u32,
    #[serde(default = "default_timeout")]
    timeout: u32,
    #[serde(default)]
    intervals: Option<String>,
}

fn default_timeout() -> u32 {
    30
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody<'a> {
    agent_id: &'a str,
    status: AgentStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricBody {
    item_id: i64,
    timestamp: i64,
    value: MetricValue,
}

/// Thin typed layer over the platform's four agent endpoints.
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    identity: Arc<IdentityStore>,
}

impl PlatformClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        identity: Arc<IdentityStore>,
    ) -> Result<Self, ClientError> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|e| ClientError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidBaseUrl(format!(
                "{base_url}: unsupported scheme"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            identity,
        })
    }

    pub fn identity(&self) -> &Arc<IdentityStore> {
        &self.identity
    }

    /// Register the agent. On success the returned `(agent_id, token)` pair is
    /// also published into the identity store, so subsequent requests
    /// authenticate without any caller involvement.
    pub async fn register(&self, req: &RegisterRequest) -> Result<(String, String), ClientError> {
        debug!(hostname = %req.hostname, ip = %req.ip_address, "Registering agent");

        let resp = self
            .request(reqwest::Method::POST, "/deviceMonitor/agent/register")
            .json(req)
            .send()
            .await?;
        let env: Envelope<RegisterData> = Self::check(resp).await?;

        let data = env.data.unwrap_or(RegisterData {
            agent_id: String::new(),
            token: String::new(),
        });
        if data.agent_id.is_empty() || data.token.is_empty() {
            return Err(ClientError::PlatformReject {
                code: env.code,
                msg: "registration succeeded without credentials".to_string(),
            });
        }

        self.identity
            .publish(data.agent_id.clone(), data.token.clone());
        debug!(agent_id = %data.agent_id, "Agent registered");
        Ok((data.agent_id, data.token))
    }

    pub async fn heartbeat(&self, status: AgentStatus) -> Result<(), ClientError> {
        let agent_id = self.require_agent_id()?;
        let body = HeartbeatBody {
            agent_id: &agent_id,
            status,
        };

        let resp = self
            .request(reqwest::Method::POST, "/deviceMonitor/agent/heartbeat")
            .json(&body)
            .send()
            .await?;
        Self::check::<serde_json::Value>(resp).await?;
        Ok(())
    }

    /// Fetch the active item list for this agent.
    pub async fn get_config(&self) -> Result<Vec<MonitorItem>, ClientError> {
        let agent_id = self.require_agent_id()?;
        let path = format!("/deviceMonitor/agent/config/{agent_id}");

        let resp = self.request(reqwest::Method::GET, &path).send().await?;
        let env: Envelope<Vec<ConfigRow>> = Self::check(resp).await?;

        let rows = env.data.unwrap_or_default();
        let items = rows
            .into_iter()
            .map(|row| MonitorItem {
                item_id: row.item_id,
                item_name: row.item_name,
                item_key: row.item_key,
                info_type: row.info_type,
                interval_secs: row.interval_secs,
                timeout_secs: row.timeout.max(1),
                intervals: parse_intervals(row.item_id, row.intervals.as_deref()),
            })
            .collect();
        Ok(items)
    }

    /// Send one data point. List values are reduced to their first element
    /// before hitting the wire.
    pub async fn send_metric(&self, item_id: i64, value: MetricValue) -> Result<(), ClientError> {
        self.require_agent_id()?;
        let body = MetricBody {
            item_id,
            timestamp: Utc::now().timestamp(),
            value: value.into_scalar(),
        };

        let resp = self
            .request(reqwest::Method::POST, "/deviceMonitor/agent/metrics")
            .json(&body)
            .send()
            .await?;
        Self::check::<serde_json::Value>(resp).await?;
        Ok(())
    }

    fn require_agent_id(&self) -> Result<String, ClientError> {
        let snap = self.identity.snapshot();
        if snap.agent_id.is_empty() {
            return Err(ClientError::NotRegistered);
        }
        Ok(snap.agent_id)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.request(method, url);
        let token = self.identity.snapshot().token;
        if token.is_empty() {
            builder
        } else {
            builder.bearer_auth(token)
        }
    }

    /// Map HTTP status and the platform envelope into the error taxonomy.
    async fn check<T: DeserializeOwned>(resp: reqwest::Response) -> Result<Envelope<T>, ClientError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let text = resp.text().await.unwrap_or_default();
            return Err(ClientError::Auth(format!("HTTP {status}: {text}")));
        }
        if !status.is_success() {
            return Err(ClientError::Http(status));
        }

        let env: Envelope<T> = resp.json().await?;
        if env.code != 200 {
            return Err(ClientError::from_reject(env.code, env.msg));
        }
        Ok(env)
    }
}

/// The platform stores `intervals` as a JSON string column; it may be absent,
/// empty, or malformed. Malformed input and invalid windows are dropped, never
/// fatal: the item still runs on its default cadence.
fn parse_intervals(item_id: i64, raw: Option<&str>) -> Vec<CustomInterval> {
    let raw = match raw {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Vec::new(),
    };

    let parsed: Vec<CustomInterval> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(item_id, error = %e, "Discarding unparseable custom intervals");
            return Vec::new();
        }
    };

    parsed
        .into_iter()
        .filter(|iv| {
            let ok = (1..=7).contains(&iv.day_of_week)
                && iv.start_time < iv.end_time
                && iv.interval_secs > 0;
            if !ok {
                warn!(item_id, ?iv, "Discarding invalid custom interval");
            }
            ok
        })
        .collect()
}
