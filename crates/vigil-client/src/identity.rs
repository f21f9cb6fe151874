use std::sync::RwLock;

use vigil_common::types::AgentIdentity;

/// Shared holder of the agent's identity.
///
/// Many readers (heartbeat, config manager, metrics sender), one writer (the
/// register service). The `(agent_id, token)` pair is always replaced under a
/// single write lock so no reader can observe a token paired with a stale id.
#[derive(Debug, Default)]
pub struct IdentityStore {
    inner: RwLock<AgentIdentity>,
}

impl IdentityStore {
    pub fn new(identity: AgentIdentity) -> Self {
        Self {
            inner: RwLock::new(identity),
        }
    }

    /// Publish a freshly issued credential pair.
    pub fn publish(&self, agent_id: String, token: String) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.agent_id = agent_id;
        inner.token = token;
    }

    /// A consistent copy of the whole identity.
    pub fn snapshot(&self) -> AgentIdentity {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_registered(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_registered()
    }
}
