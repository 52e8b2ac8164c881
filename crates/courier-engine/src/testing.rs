//! Deterministic collaborator doubles shared by the engine's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use courier_core::auth::{AuthProvider, AuthState, Credentials, KeyStore};
use courier_core::bridge::Bridge;
use courier_core::errors::{AuthError, BridgeError, HandlerError, ModuleError};
use courier_core::events::UpsertType;
use courier_core::handler::{MessageHandler, ModuleLoader};
use courier_core::types::{CallEvent, StoredMessage};

/// Bridge double that records every call.
#[derive(Default)]
pub struct RecordingBridge {
    pub qr_codes: Mutex<Vec<String>>,
    pub notifications: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<String>>,
    pub contact_syncs: AtomicUsize,
    pub topic_updates: AtomicUsize,
    pub start_messages: AtomicUsize,
    pub closed: AtomicBool,
}

impl RecordingBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().len()
    }
}

#[async_trait]
impl Bridge for RecordingBridge {
    async fn send_qr_code(&self, qr: &str) -> Result<(), BridgeError> {
        self.qr_codes.lock().push(qr.to_owned());
        Ok(())
    }

    async fn handle_call_notification(&self, call: &CallEvent) -> Result<(), BridgeError> {
        self.calls.lock().push(call.id.clone());
        Ok(())
    }

    async fn send_to_all_users(&self, text: &str) -> Result<(), BridgeError> {
        self.notifications.lock().push(text.to_owned());
        Ok(())
    }

    async fn sync_contacts(&self) -> Result<(), BridgeError> {
        self.contact_syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn update_topic_names(&self) -> Result<(), BridgeError> {
        self.topic_updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn send_start_message(&self) -> Result<(), BridgeError> {
        self.start_messages.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Message handler double. Set `fail` to script a handler error.
#[derive(Default)]
pub struct RecordingHandler {
    pub batches: Mutex<Vec<usize>>,
    pub fail: AtomicBool,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle_messages(
        &self,
        messages: &[StoredMessage],
        _upsert_type: UpsertType,
    ) -> Result<(), HandlerError> {
        self.batches.lock().push(messages.len());
        if self.fail.load(Ordering::Relaxed) {
            return Err(HandlerError("scripted handler failure".into()));
        }
        Ok(())
    }
}

pub struct StaticModules(pub usize);

#[async_trait]
impl ModuleLoader for StaticModules {
    async fn load_modules(&self) -> Result<usize, ModuleError> {
        Ok(self.0)
    }
}

pub struct FailingModules;

#[async_trait]
impl ModuleLoader for FailingModules {
    async fn load_modules(&self) -> Result<usize, ModuleError> {
        Err(ModuleError("scripted module failure".into()))
    }
}

struct MemoryKeys {
    data: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl KeyStore for MemoryKeys {
    async fn get(
        &self,
        kind: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, AuthError> {
        let data = self.data.lock();
        Ok(ids
            .iter()
            .filter_map(|id| {
                data.get(&format!("{kind}:{id}"))
                    .map(|v| (id.clone(), v.clone()))
            })
            .collect())
    }

    async fn set(
        &self,
        entries: HashMap<String, HashMap<String, Option<Value>>>,
    ) -> Result<(), AuthError> {
        let mut data = self.data.lock();
        for (kind, ids) in entries {
            for (id, value) in ids {
                let key = format!("{kind}:{id}");
                match value {
                    Some(value) => {
                        data.insert(key, value);
                    }
                    None => {
                        data.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

/// In-memory auth provider recording persists; load and persist failures can
/// be scripted, and persist can be slowed to expose ordering bugs.
pub struct MemoryAuth {
    pub persisted: Mutex<Vec<Credentials>>,
    pub fail_load: AtomicBool,
    pub persist_delay: Mutex<Option<Duration>>,
}

impl MemoryAuth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            persisted: Mutex::new(Vec::new()),
            fail_load: AtomicBool::new(false),
            persist_delay: Mutex::new(None),
        })
    }

    pub fn persist_count(&self) -> usize {
        self.persisted.lock().len()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn load(&self) -> Result<AuthState, AuthError> {
        if self.fail_load.load(Ordering::Relaxed) {
            return Err(AuthError::Load("scripted load failure".into()));
        }
        Ok(AuthState {
            creds: Credentials::default(),
            keys: Arc::new(MemoryKeys {
                data: Mutex::new(HashMap::new()),
            }),
        })
    }

    async fn persist(&self, creds: &Credentials) -> Result<(), AuthError> {
        let delay = *self.persist_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.persisted.lock().push(creds.clone());
        Ok(())
    }
}
