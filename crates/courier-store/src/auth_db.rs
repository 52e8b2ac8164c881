use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;

use courier_core::auth::{AuthProvider, AuthState, Credentials, KeyStore};
use courier_core::errors::AuthError;

use crate::error::StoreError;

const CREDS_ROW: &str = "creds";

/// Database-backed auth state: one `auth_state` table keyed by name, holding
/// the credentials row and one row per signal key.
pub struct DbAuthProvider {
    conn: Arc<Mutex<Connection>>,
}

impl DbAuthProvider {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS auth_state (
                 name TEXT PRIMARY KEY,
                 value TEXT NOT NULL,
                 updated_at TEXT NOT NULL DEFAULT (datetime('now'))
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Wipe all stored state; the next load starts a fresh pairing.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.conn.lock().execute("DELETE FROM auth_state", [])?;
        Ok(())
    }

    fn read_row(&self, name: &str) -> Result<Option<String>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT value FROM auth_state WHERE name = ?1")?;
        let mut rows = stmt.query([name])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn write_row(&self, name: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.lock().execute(
            "INSERT INTO auth_state (name, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![name, value],
        )?;
        Ok(())
    }

    fn delete_row(&self, name: &str) -> Result<(), rusqlite::Error> {
        self.conn
            .lock()
            .execute("DELETE FROM auth_state WHERE name = ?1", [name])?;
        Ok(())
    }
}

fn key_row_name(kind: &str, id: &str) -> String {
    format!("key:{kind}:{id}")
}

#[async_trait]
impl AuthProvider for DbAuthProvider {
    async fn load(&self) -> Result<AuthState, AuthError> {
        let creds = match self
            .read_row(CREDS_ROW)
            .map_err(|e| AuthError::Load(e.to_string()))?
        {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| AuthError::Corrupt(e.to_string()))?
            }
            None => Credentials::default(),
        };

        Ok(AuthState {
            creds,
            keys: Arc::new(DbKeyStore {
                provider: DbAuthProvider {
                    conn: Arc::clone(&self.conn),
                },
            }),
        })
    }

    async fn persist(&self, creds: &Credentials) -> Result<(), AuthError> {
        let raw = serde_json::to_string(creds).map_err(|e| AuthError::Persist(e.to_string()))?;
        self.write_row(CREDS_ROW, &raw)
            .map_err(|e| AuthError::Persist(e.to_string()))
    }
}

struct DbKeyStore {
    provider: DbAuthProvider,
}

#[async_trait]
impl KeyStore for DbKeyStore {
    async fn get(
        &self,
        kind: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, AuthError> {
        let mut out = HashMap::new();
        for id in ids {
            let Some(raw) = self
                .provider
                .read_row(&key_row_name(kind, id))
                .map_err(|e| AuthError::Load(e.to_string()))?
            else {
                continue;
            };
            let value =
                serde_json::from_str(&raw).map_err(|e| AuthError::Corrupt(e.to_string()))?;
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
                let name = key_row_name(&kind, &id);
                match value {
                    Some(value) => {
                        let raw = serde_json::to_string(&value)
                            .map_err(|e| AuthError::Persist(e.to_string()))?;
                        self.provider
                            .write_row(&name, &raw)
                            .map_err(|e| AuthError::Persist(e.to_string()))?;
                    }
                    None => {
                        self.provider
                            .delete_row(&name)
                            .map_err(|e| AuthError::Persist(e.to_string()))?;
                    }
                }
            }
        }
        Ok(())
    }
}
