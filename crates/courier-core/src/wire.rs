use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auth::{Credentials, KeyStore};
use crate::errors::WireError;
use crate::events::EventBatch;
use crate::types::{ChatId, MessageContent, MessageId, MessageKey, SendOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion(pub u32, pub u32, pub u32);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Read-only message lookup the transport uses to resend content on its own
/// internal delivery retries, without the original caller resupplying it.
/// Total: a miss is `None`, never an error.
pub trait MessageLookup: Send + Sync {
    fn lookup_message(&self, key: &MessageKey) -> Option<MessageContent>;
}

/// Bounded counter cache for transport-internal delivery retries. One
/// instance per process, shared across reconnects so counters survive a
/// handle replacement.
pub trait RetryCache: Send + Sync {
    fn get(&self, key: &str) -> Option<u32>;
    fn put(&self, key: &str, value: u32);
}

/// Everything a connector needs to build one connection.
pub struct ConnectParams {
    pub version: ProtocolVersion,
    pub creds: Credentials,
    pub keys: Arc<dyn KeyStore>,
    pub retry_cache: Arc<dyn RetryCache>,
    pub message_lookup: Arc<dyn MessageLookup>,
}

/// One live session to the remote service. Single-use: a closed connection is
/// replaced with a fresh one, never revived.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Subscribe to the connection's event stream. Multiple consumers (the
    /// session store binding and the supervisor's drive loop) each hold their
    /// own receiver.
    fn subscribe(&self) -> broadcast::Receiver<EventBatch>;

    async fn send_message(
        &self,
        to: &ChatId,
        content: MessageContent,
        options: SendOptions,
    ) -> Result<MessageId, WireError>;

    /// Resolve a contact's current profile picture URL.
    async fn profile_picture_url(&self, id: &ChatId) -> Result<Option<String>, WireError>;

    async fn close(&self) -> Result<(), WireError>;
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Connection")
    }
}

/// Produces fresh connections and answers the version-discovery call made
/// before each connect.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn latest_version(&self) -> Result<ProtocolVersion, WireError>;

    async fn connect(&self, params: ConnectParams) -> Result<Arc<dyn Connection>, WireError>;
}
