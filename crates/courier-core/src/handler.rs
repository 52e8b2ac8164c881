use async_trait::async_trait;

use crate::errors::{HandlerError, ModuleError};
use crate::events::UpsertType;
use crate::types::StoredMessage;

/// Consumer for inbound message batches. Runs as its own task per batch; a
/// failure is logged by the router and never stalls other event kinds.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_messages(
        &self,
        messages: &[StoredMessage],
        upsert_type: UpsertType,
    ) -> Result<(), HandlerError>;
}

/// Command/module system, loaded once during initialization. A load failure
/// is fatal to startup.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Returns the number of modules loaded.
    async fn load_modules(&self) -> Result<usize, ModuleError>;
}
