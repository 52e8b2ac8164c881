use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub telegram: TelegramConfig,
    pub wire: WireConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// true selects the database-backed credential provider, false the
    /// file-backed one. Chosen once at startup.
    pub use_db_auth: bool,
    /// Wipe stored credentials before the provider is constructed. Handled
    /// by the binary, outside the supervision core.
    pub clear_auth_on_start: bool,
    /// Directory for the file-backed provider.
    pub dir: PathBuf,
    /// SQLite path for the database-backed provider.
    pub db_path: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            use_db_auth: false,
            clear_auth_on_start: false,
            dir: PathBuf::from("auth"),
            db_path: PathBuf::from("auth.db"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Gates bridge construction entirely.
    pub enabled: bool,
    pub bot_token: String,
    /// Users who receive lifecycle notifications and QR payloads.
    pub user_ids: Vec<i64>,
    /// Forum group mirroring chats as topics, if any.
    pub group_id: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// WebSocket endpoint of the session gateway.
    pub endpoint: String,
    /// HTTP endpoint answering the protocol-version discovery call.
    pub version_url: String,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://127.0.0.1:8188/session".into(),
            version_url: "https://127.0.0.1:8188/version".into(),
        }
    }
}

impl Config {
    /// Load from a JSON file. A missing file yields the defaults; a present
    /// but unreadable or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.apply_env();
        Ok(config)
    }

    /// Secrets can come from the environment instead of the config file.
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                self.telegram.bot_token = token;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/courier.json")).unwrap();
        assert!(!config.auth.use_db_auth);
        assert!(!config.telegram.enabled);
        assert_eq!(config.auth.dir, PathBuf::from("auth"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"telegram": {"enabled": true, "user_ids": [42]}}"#).unwrap();
        assert!(config.telegram.enabled);
        assert_eq!(config.telegram.user_ids, vec![42]);
        assert!(!config.auth.use_db_auth);
        assert!(!config.wire.endpoint.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = std::env::temp_dir().join(format!("courier-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }
}
