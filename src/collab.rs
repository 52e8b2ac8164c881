//! Built-in collaborator implementations for the binary. Deployments with a
//! command system or a custom pipeline plug their own `MessageHandler` and
//! `ModuleLoader`; these defaults keep a bare daemon useful.

use async_trait::async_trait;
use tracing::{debug, info};

use courier_core::errors::{HandlerError, ModuleError};
use courier_core::events::UpsertType;
use courier_core::handler::{MessageHandler, ModuleLoader};
use courier_core::types::StoredMessage;

/// Logs inbound batches and acknowledges them.
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle_messages(
        &self,
        messages: &[StoredMessage],
        upsert_type: UpsertType,
    ) -> Result<(), HandlerError> {
        match upsert_type {
            UpsertType::Notify => {
                for message in messages {
                    info!(
                        chat = %message.key.chat,
                        id = %message.key.id,
                        from_me = message.key.from_me,
                        "message received"
                    );
                }
            }
            UpsertType::Append => {
                debug!(count = messages.len(), "backfill batch stored");
            }
        }
        Ok(())
    }
}

/// No external modules; the daemon runs with its built-ins only.
pub struct NoModules;

#[async_trait]
impl ModuleLoader for NoModules {
    async fn load_modules(&self) -> Result<usize, ModuleError> {
        Ok(0)
    }
}
