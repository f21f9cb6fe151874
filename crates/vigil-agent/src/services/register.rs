//! Bootstrap identity acquisition.

use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Networks, System};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_client::error::ClientError;
use vigil_client::{PlatformClient, RegisterRequest};
use vigil_common::types::AgentIdentity;

/// Address used only to pick the outbound interface; no packet is sent.
const PROBE_ADDR: &str = "8.8.8.8:80";

/// Host facts submitted on registration. Collected once at startup; the
/// credential fields stay empty until the platform issues them.
pub fn collect_host_facts() -> AgentIdentity {
    let os_version = format!(
        "{}-{}",
        System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        System::os_version().unwrap_or_else(|| "unknown".to_string()),
    );

    AgentIdentity {
        agent_id: String::new(),
        token: String::new(),
        hostname: System::host_name().unwrap_or_default(),
        primary_ip: primary_ipv4(),
        os_kind: std::env::consts::OS.to_string(),
        os_version,
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// The address of the interface that would route to a public host, falling
/// back to the first non-loopback interface IPv4.
fn primary_ipv4() -> String {
    if let Some(ip) = probe_outbound_ipv4() {
        return ip.to_string();
    }

    let networks = Networks::new_with_refreshed_list();
    for (_name, data) in networks.iter() {
        for ip in data.ip_networks() {
            match ip.addr {
                IpAddr::V4(v4) if !v4.is_loopback() => return v4.to_string(),
                _ => {}
            }
        }
    }

    warn!("No routable IPv4 address found, reporting loopback");
    "127.0.0.1".to_string()
}

fn probe_outbound_ipv4() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(PROBE_ADDR).ok()?;
    let addr = socket.local_addr().ok()?;
    match addr.ip() {
        IpAddr::V4(v4) if !v4.is_loopback() => Some(IpAddr::V4(v4)),
        _ => None,
    }
}

pub struct RegisterService {
    client: Arc<PlatformClient>,
    request: RegisterRequest,
}

impl RegisterService {
    /// Builds the registration request from the host facts already seeded
    /// into the client's identity store.
    pub fn new(client: Arc<PlatformClient>) -> Self {
        let facts = client.identity().snapshot();
        let request = RegisterRequest {
            hostname: facts.hostname,
            ip_address: facts.primary_ip,
            os_type: facts.os_kind,
            os_version: facts.os_version,
            agent_version: facts.agent_version,
        };
        Self { client, request }
    }

    pub async fn register(&self) -> Result<(), ClientError> {
        let (agent_id, _token) = self.client.register(&self.request).await?;
        info!(agent_id = %agent_id, "Agent registered");
        Ok(())
    }

    /// Up to `attempts` registrations separated by `delay`, cancellable
    /// between attempts. Returns the last error when all attempts fail.
    pub async fn register_with_retry(
        &self,
        attempts: u32,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let attempts = attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.register().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Registration failed");
                    last_err = Some(e);
                }
            }

            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(last_err.unwrap_or(ClientError::NotRegistered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_facts_are_populated() {
        let facts = collect_host_facts();
        assert!(!facts.os_kind.is_empty());
        assert!(!facts.primary_ip.is_empty());
        assert!(!facts.agent_version.is_empty());
        assert!(facts.agent_id.is_empty());
        assert!(facts.token.is_empty());
        assert!(!facts.is_registered());
    }

    #[test]
    fn primary_ip_parses_as_ipv4() {
        let ip = primary_ipv4();
        assert!(ip.parse::<std::net::Ipv4Addr>().is_ok(), "not IPv4: {ip}");
    }
}
