use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AuthError;
use crate::types::ChatId;

/// Long-lived pairing credentials for the account. Key material is opaque to
/// this core: the transport generates and consumes it, we only load and
/// persist it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub registration_id: u32,
    #[serde(default)]
    pub noise_key: Value,
    #[serde(default)]
    pub signed_identity_key: Value,
    /// Own address once paired; None for a fresh, unpaired state.
    #[serde(default)]
    pub me: Option<ChatId>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl Credentials {
    pub fn is_registered(&self) -> bool {
        self.me.is_some()
    }
}

/// Signal-style key store: kind → id → opaque key material.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(
        &self,
        kind: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, AuthError>;

    /// Batched write: `Some(value)` stores, `None` deletes.
    async fn set(
        &self,
        entries: HashMap<String, HashMap<String, Option<Value>>>,
    ) -> Result<(), AuthError>;
}

/// Credential state handed to the transport when a connection is built.
#[derive(Clone)]
pub struct AuthState {
    pub creds: Credentials,
    pub keys: Arc<dyn KeyStore>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("creds", &self.creds)
            .finish_non_exhaustive()
    }
}

/// Credential storage. Two implementations (file-backed and database-backed)
/// are selected once at startup; there is no runtime switch.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn load(&self) -> Result<AuthState, AuthError>;
    async fn persist(&self, creds: &Credentials) -> Result<(), AuthError>;
}
