use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use courier_core::auth::{AuthProvider, AuthState, Credentials, KeyStore};
use courier_core::errors::AuthError;

/// File-backed auth state: `creds.json` plus one JSON file per signal key
/// (`<kind>-<id>.json`) under a single directory.
pub struct FileAuthProvider {
    dir: PathBuf,
}

impl FileAuthProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join("creds.json")
    }

    /// Wipe all stored state; the next load starts a fresh pairing.
    pub fn clear(&self) -> std::io::Result<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

/// Key ids can contain separators that are not filename-safe.
fn key_file_name(kind: &str, id: &str) -> String {
    let safe: String = format!("{kind}-{id}")
        .chars()
        .map(|c| if c == '/' || c == ':' { '_' } else { c })
        .collect();
    format!("{safe}.json")
}

#[async_trait]
impl AuthProvider for FileAuthProvider {
    async fn load(&self) -> Result<AuthState, AuthError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| AuthError::Load(e.to_string()))?;

        let creds_path = self.creds_path();
        let creds = if creds_path.exists() {
            let raw = std::fs::read_to_string(&creds_path)
                .map_err(|e| AuthError::Load(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| AuthError::Corrupt(e.to_string()))?
        } else {
            debug!(dir = %self.dir.display(), "no stored credentials; starting unpaired");
            Credentials::default()
        };

        Ok(AuthState {
            creds,
            keys: Arc::new(FileKeyStore {
                dir: self.dir.clone(),
            }),
        })
    }

    async fn persist(&self, creds: &Credentials) -> Result<(), AuthError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| AuthError::Persist(e.to_string()))?;
        let raw = serde_json::to_vec_pretty(creds).map_err(|e| AuthError::Persist(e.to_string()))?;

        // Write-then-rename so a crash mid-write cannot truncate creds.json.
        let tmp = self.dir.join("creds.json.tmp");
        std::fs::write(&tmp, raw).map_err(|e| AuthError::Persist(e.to_string()))?;
        std::fs::rename(&tmp, self.creds_path()).map_err(|e| AuthError::Persist(e.to_string()))
    }
}

struct FileKeyStore {
    dir: PathBuf,
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn get(
        &self,
        kind: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, AuthError> {
        let mut out = HashMap::new();
        for id in ids {
            let path = self.dir.join(key_file_name(kind, id));
            if !path.exists() {
                continue;
            }
            let raw =
                std::fs::read_to_string(&path).map_err(|e| AuthError::Load(e.to_string()))?;
            let value = serde_json::from_str(&raw).map_err(|e| AuthError::Corrupt(e.to_string()))?;
            out.insert(id.clone(), value);
        }
        Ok(out)
    }

    async fn set(
        &self,
        entries: HashMap<String, HashMap<String, Option<Value>>>,
    ) -> Result<(), AuthError> {
        for (kind, ids) in entries {
            for (id, value) in ids {
                let path = self.dir.join(key_file_name(&kind, &id));
                match value {
                    Some(value) => {
                        let raw = serde_json::to_vec(&value)
                            .map_err(|e| AuthError::Persist(e.to_string()))?;
                        std::fs::write(&path, raw)
                            .map_err(|e| AuthError::Persist(e.to_string()))?;
                    }
                    None => {
                        if path.exists() {
                            std::fs::remove_file(&path)
                                .map_err(|e| AuthError::Persist(e.to_string()))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
