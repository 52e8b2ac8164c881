use courier_core::errors::{AuthError, BridgeError, ModuleError, WireError};
use courier_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("module error: {0}")]
    Module(#[from] ModuleError),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("not connected")]
    NotConnected,

    #[error("client already running")]
    AlreadyRunning,

    #[error("{0}")]
    Internal(String),
}
