use reqwest::StatusCode;

/// Errors surfaced by the platform client.
///
/// The client itself never retries; callers pick their policy off the kind.
/// `Auth` is the variant the heartbeat service watches for to trigger
/// re-registration.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection-level failure: reset, DNS, request timeout, body decode.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx HTTP status other than 401/403.
    #[error("unexpected HTTP status {0}")]
    Http(StatusCode),

    /// HTTP 2xx but platform-level code != 200, with no auth markers.
    #[error("platform rejected request: code={code}, msg={msg}")]
    PlatformReject { code: i32, msg: String },

    /// HTTP 401/403, or a platform reject whose code or message marks an
    /// authentication problem.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// An operation that needs an agent id was attempted before registration.
    #[error("agent is not registered")]
    NotRegistered,

    /// The configured base URL does not parse. Fatal at startup.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

const AUTH_MARKERS: [&str; 5] = [
    "unauthorized",
    "forbidden",
    "token",
    "authentication",
    "not registered",
];

/// True when a platform `{code, msg}` pair indicates an auth problem rather
/// than a generic reject.
pub(crate) fn is_auth_reject(code: i32, msg: &str) -> bool {
    if code == 401 || code == 403 {
        return true;
    }
    let msg = msg.to_lowercase();
    AUTH_MARKERS.iter().any(|m| msg.contains(m))
}

impl ClientError {
    /// Classify a platform envelope that came back with a non-200 code.
    pub(crate) fn from_reject(code: i32, msg: String) -> Self {
        if is_auth_reject(code, &msg) {
            ClientError::Auth(format!("platform code {code}: {msg}"))
        } else {
            ClientError::PlatformReject { code, msg }
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}
