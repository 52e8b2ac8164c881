use std::sync::Arc;

use tracing::{debug, error, info, warn};

use courier_core::auth::AuthProvider;
use courier_core::bridge::Bridge;
use courier_core::errors::Disconnect;
use courier_core::events::{ConnectionState, EventBatch, WireEvent};
use courier_core::handler::MessageHandler;
use courier_core::types::{ContactPatch, ImageField};
use courier_core::wire::Connection;

/// Lifecycle events routed back to the supervisor, their only consumer.
#[derive(Debug)]
pub enum LifecycleSignal {
    Opened,
    QrNeeded(String),
    Closed(Disconnect),
}

/// Per-batch view of the mutable collaborators. Cloned out of the supervisor
/// for one dispatch and dropped: consumers never cache the handle longer
/// than a single batch.
pub struct DispatchContext {
    pub conn: Option<Arc<dyn Connection>>,
    pub bridge: Option<Arc<dyn Bridge>>,
}

/// Fans one event batch out to its consumers. Kinds are isolated from each
/// other: slow or failing handlers run as their own tasks and cannot stall
/// the next batch. The one exception is credential updates, persisted before
/// any later event in the same batch is touched, so a crash between update
/// and persist cannot lose key material.
pub struct Router {
    handler: Arc<dyn MessageHandler>,
    auth: Arc<dyn AuthProvider>,
}

impl Router {
    pub fn new(handler: Arc<dyn MessageHandler>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { handler, auth }
    }

    pub async fn dispatch(&self, batch: EventBatch, ctx: &DispatchContext) -> Vec<LifecycleSignal> {
        let mut signals = Vec::new();

        for event in batch.events {
            match event {
                WireEvent::ConnectionUpdate {
                    state,
                    qr,
                    last_disconnect,
                } => {
                    if let Some(qr) = qr {
                        signals.push(LifecycleSignal::QrNeeded(qr));
                    }
                    match state {
                        Some(ConnectionState::Open) => signals.push(LifecycleSignal::Opened),
                        Some(ConnectionState::Close) => signals.push(LifecycleSignal::Closed(
                            last_disconnect.unwrap_or_default(),
                        )),
                        Some(ConnectionState::Connecting) | None => {}
                    }
                }

                WireEvent::CredsUpdate { creds } => {
                    if let Err(e) = self.auth.persist(&creds).await {
                        error!(error = %e, "credential persist failed");
                    }
                }

                WireEvent::MessagesUpsert {
                    messages,
                    upsert_type,
                } => {
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(e) = handler.handle_messages(&messages, upsert_type).await {
                            warn!(error = %e, count = messages.len(), "message handler failed");
                        }
                    });
                }

                WireEvent::Call { calls } => match &ctx.bridge {
                    Some(bridge) => {
                        let bridge = Arc::clone(bridge);
                        tokio::spawn(async move {
                            // One task for the whole kind keeps calls in order.
                            for call in &calls {
                                if let Err(e) = bridge.handle_call_notification(call).await {
                                    warn!(error = %e, call_id = %call.id, "call notification failed");
                                }
                            }
                        });
                    }
                    None => {
                        for call in &calls {
                            info!(call_id = %call.id, from = %call.from, "call event dropped: no bridge configured");
                        }
                    }
                },

                WireEvent::ContactUpdate { contacts } => {
                    self.spawn_picture_lookups(contacts, ctx);
                }

                WireEvent::HistorySync(sync) => {
                    info!(
                        chats = sync.chats.len(),
                        contacts = sync.contacts.len(),
                        messages = sync.messages.len(),
                        progress = sync.progress,
                        is_latest = sync.is_latest,
                        "history sync chunk"
                    );
                }

                WireEvent::Unknown { kind } => {
                    debug!(kind = %kind, "skipping unrecognized event kind");
                }

                // State for these kinds lands in the session store through
                // its own binding; nothing to route.
                other => debug!(kind = other.kind(), "session store event"),
            }
        }

        signals
    }

    /// For every contact whose picture changed, look up the refreshed URL
    /// through the live handle. Removals and untouched pictures issue no
    /// lookup; lookup failures resolve to "no new URL".
    fn spawn_picture_lookups(&self, contacts: Vec<ContactPatch>, ctx: &DispatchContext) {
        let needs_lookup = contacts
            .iter()
            .any(|patch| matches!(patch.img_url, ImageField::Url(_)));
        if !needs_lookup {
            return;
        }

        let Some(conn) = ctx.conn.clone() else {
            debug!("picture refresh skipped: no live connection");
            return;
        };

        tokio::spawn(async move {
            for patch in contacts {
                if !matches!(patch.img_url, ImageField::Url(_)) {
                    continue;
                }
                match conn.profile_picture_url(&patch.id).await {
                    Ok(Some(url)) => {
                        info!(contact = %patch.id, url = %url, "contact picture refreshed");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(contact = %patch.id, error = %e, "picture lookup failed");
                    }
                }
            }
        });
    }
}
