use serde::{Deserialize, Serialize};

/// Close codes the remote service attaches to its disconnects.
pub mod close_code {
    /// Session was invalidated remotely. Terminal: never reconnect.
    pub const LOGGED_OUT: u16 = 401;
    /// Another client took over the session.
    pub const CONNECTION_REPLACED: u16 = 440;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    /// The service asks the client to re-establish its stream.
    pub const RESTART_REQUIRED: u16 = 515;
}

/// Close cause reported with a connection-state update. Both fields are
/// optional; the transport often has nothing better than "the socket died".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Disconnect {
    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            message: None,
        }
    }

    /// The single terminal cause. Everything else, including a missing
    /// status code, is treated as transient; a deliberately permissive
    /// default.
    pub fn is_logged_out(&self) -> bool {
        self.status_code == Some(close_code::LOGGED_OUT)
    }

    pub fn describe(&self) -> String {
        match (&self.status_code, &self.message) {
            (Some(code), Some(msg)) => format!("{code}: {msg}"),
            (Some(code), None) => format!("status {code}"),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "unknown cause".into(),
        }
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum WireError {
    #[error("not connected")]
    NotConnected,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("version discovery failed: {0}")]
    Discovery(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport i/o error: {0}")]
    Io(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("connection closed")]
    Closed,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to load auth state: {0}")]
    Load(String),
    #[error("failed to persist credentials: {0}")]
    Persist(String),
    #[error("corrupt auth state: {0}")]
    Corrupt(String),
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge api error: {0}")]
    Api(String),
    #[error("bridge not configured")]
    NotConfigured,
}

/// Opaque failure from the downstream message handler. Isolated by the
/// router: logged, never allowed to abort batch processing.
#[derive(Clone, Debug, thiserror::Error)]
#[error("message handler failed: {0}")]
pub struct HandlerError(pub String);

#[derive(Clone, Debug, thiserror::Error)]
#[error("module load failed: {0}")]
pub struct ModuleError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_is_terminal() {
        assert!(Disconnect::with_status(close_code::LOGGED_OUT).is_logged_out());
    }

    #[test]
    fn other_causes_are_transient() {
        assert!(!Disconnect::with_status(close_code::RESTART_REQUIRED).is_logged_out());
        assert!(!Disconnect::with_status(close_code::SERVICE_UNAVAILABLE).is_logged_out());
        assert!(!Disconnect::with_status(close_code::CONNECTION_REPLACED).is_logged_out());
        assert!(!Disconnect::default().is_logged_out());
    }

    #[test]
    fn describe_covers_all_shapes() {
        assert_eq!(Disconnect::default().describe(), "unknown cause");
        assert_eq!(Disconnect::with_status(503).describe(), "status 503");
        let full = Disconnect {
            status_code: Some(515),
            message: Some("stream errored".into()),
        };
        assert_eq!(full.describe(), "515: stream errored");
    }
}
