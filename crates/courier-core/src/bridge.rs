use async_trait::async_trait;

use crate::errors::BridgeError;
use crate::types::CallEvent;

/// Secondary-platform relay. Constructed lazily on the first successful open
/// and kept for the rest of the process; every call is best-effort from the
/// core's point of view.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Forward a pairing QR payload to the bridge's users.
    async fn send_qr_code(&self, qr: &str) -> Result<(), BridgeError>;

    async fn handle_call_notification(&self, call: &CallEvent) -> Result<(), BridgeError>;

    /// Broadcast a lifecycle notification to every registered user.
    async fn send_to_all_users(&self, text: &str) -> Result<(), BridgeError>;

    /// Sync steps re-run on every successful open, including re-opens after
    /// a reconnect.
    async fn sync_contacts(&self) -> Result<(), BridgeError>;
    async fn update_topic_names(&self) -> Result<(), BridgeError>;
    async fn send_start_message(&self) -> Result<(), BridgeError>;

    async fn close(&self) -> Result<(), BridgeError>;
}
