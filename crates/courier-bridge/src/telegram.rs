use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use courier_core::bridge::Bridge;
use courier_core::config::TelegramConfig;
use courier_core::errors::BridgeError;
use courier_core::types::{CallEvent, CallStatus, ChatId, Contact};
use courier_store::SessionStore;

const API_BASE: &str = "https://api.telegram.org";

/// Relay to a Telegram bot: lifecycle notifications and QR payloads go to the
/// registered users; chats are mirrored as forum topics in one group, if a
/// group is configured.
pub struct TelegramBridge {
    http: reqwest::Client,
    token: String,
    user_ids: Vec<i64>,
    group_id: Option<i64>,
    store: Arc<SessionStore>,
    /// Forum topic per remote chat, built up lazily during contact sync.
    topics: DashMap<ChatId, i64>,
}

impl TelegramBridge {
    pub fn new(config: &TelegramConfig, store: Arc<SessionStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: config.bot_token.clone(),
            user_ids: config.user_ids.clone(),
            group_id: config.group_id,
            store,
            topics: DashMap::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.token)
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, BridgeError> {
        let resp = self
            .http
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::Api(e.to_string()))?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| BridgeError::Api(e.to_string()))?;

        if value.get("ok").and_then(|ok| ok.as_bool()) != Some(true) {
            let description = value
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("unknown telegram error");
            return Err(BridgeError::Api(description.to_owned()));
        }
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn ensure_topic(&self, contact: &Contact) -> Result<(), BridgeError> {
        let Some(group_id) = self.group_id else {
            return Ok(());
        };
        if self.topics.contains_key(&contact.id) {
            return Ok(());
        }

        let result = self
            .call(
                "createForumTopic",
                create_topic_body(group_id, contact.display_name()),
            )
            .await?;
        let Some(thread_id) = result.get("message_thread_id").and_then(|t| t.as_i64()) else {
            return Err(BridgeError::Api("createForumTopic returned no thread id".into()));
        };
        self.topics.insert(contact.id.clone(), thread_id);
        debug!(contact = %contact.id, thread_id, "forum topic created");
        Ok(())
    }
}

fn send_message_body(chat_id: i64, text: &str) -> Value {
    json!({ "chat_id": chat_id, "text": text })
}

fn create_topic_body(group_id: i64, name: &str) -> Value {
    json!({ "chat_id": group_id, "name": name })
}

fn edit_topic_body(group_id: i64, thread_id: i64, name: &str) -> Value {
    json!({ "chat_id": group_id, "message_thread_id": thread_id, "name": name })
}

fn describe_call(call: &CallEvent) -> String {
    let kind = if call.is_video { "video call" } else { "call" };
    match call.status {
        CallStatus::Offer | CallStatus::Ringing => {
            format!("Incoming {kind} from {}", call.from)
        }
        CallStatus::Timeout => format!("Missed {kind} from {}", call.from),
        CallStatus::Reject => format!("Rejected {kind} from {}", call.from),
        CallStatus::Accept => format!("Accepted {kind} from {}", call.from),
        CallStatus::Terminate => format!("Ended {kind} with {}", call.from),
    }
}

#[async_trait]
impl Bridge for TelegramBridge {
    async fn send_qr_code(&self, qr: &str) -> Result<(), BridgeError> {
        self.send_to_all_users(&format!("Pair the session by rendering this as a QR code:\n{qr}"))
            .await
    }

    async fn handle_call_notification(&self, call: &CallEvent) -> Result<(), BridgeError> {
        self.send_to_all_users(&describe_call(call)).await
    }

    async fn send_to_all_users(&self, text: &str) -> Result<(), BridgeError> {
        // Best-effort fan-out: one unreachable user must not block the rest.
        for user_id in &self.user_ids {
            if let Err(e) = self.call("sendMessage", send_message_body(*user_id, text)).await {
                warn!(user_id, error = %e, "telegram notification failed");
            }
        }
        Ok(())
    }

    async fn sync_contacts(&self) -> Result<(), BridgeError> {
        if self.group_id.is_none() {
            debug!("no forum group configured; skipping contact sync");
            return Ok(());
        }
        let contacts = self.store.contacts_snapshot();
        let total = contacts.len();
        for contact in &contacts {
            if let Err(e) = self.ensure_topic(contact).await {
                warn!(contact = %contact.id, error = %e, "topic creation failed");
            }
        }
        info!(contacts = total, topics = self.topics.len(), "contact sync finished");
        Ok(())
    }

    async fn update_topic_names(&self) -> Result<(), BridgeError> {
        let Some(group_id) = self.group_id else {
            return Ok(());
        };
        for entry in self.topics.iter() {
            let Some(contact) = self.store.contact(entry.key()) else {
                continue;
            };
            if let Err(e) = self
                .call(
                    "editForumTopic",
                    edit_topic_body(group_id, *entry.value(), contact.display_name()),
                )
                .await
            {
                warn!(contact = %contact.id, error = %e, "topic rename failed");
            }
        }
        Ok(())
    }

    async fn send_start_message(&self) -> Result<(), BridgeError> {
        let text = format!(
            "Session connected and ready ({})",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        self.send_to_all_users(&text).await
    }

    async fn close(&self) -> Result<(), BridgeError> {
        debug!("telegram bridge closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn method_urls_embed_the_token() {
        let config = TelegramConfig {
            enabled: true,
            bot_token: "123:abc".into(),
            user_ids: vec![],
            group_id: None,
        };
        let bridge = TelegramBridge::new(&config, Arc::new(SessionStore::new()));
        assert_eq!(
            bridge.method_url("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn request_bodies_are_well_formed() {
        assert_eq!(
            send_message_body(42, "hi"),
            json!({ "chat_id": 42, "text": "hi" })
        );
        assert_eq!(
            create_topic_body(-100, "Alice"),
            json!({ "chat_id": -100, "name": "Alice" })
        );
        assert_eq!(
            edit_topic_body(-100, 7, "Alice B"),
            json!({ "chat_id": -100, "message_thread_id": 7, "name": "Alice B" })
        );
    }

    #[test]
    fn call_descriptions() {
        let call = CallEvent {
            id: "c1".into(),
            from: ChatId::new("15550001111@host"),
            timestamp: Utc::now(),
            is_video: false,
            status: CallStatus::Offer,
        };
        assert_eq!(describe_call(&call), "Incoming call from 15550001111@host");

        let missed = CallEvent {
            is_video: true,
            status: CallStatus::Timeout,
            ..call
        };
        assert_eq!(
            describe_call(&missed),
            "Missed video call from 15550001111@host"
        );
    }

    #[tokio::test]
    async fn sync_without_group_is_a_noop() {
        let config = TelegramConfig::default();
        let store = Arc::new(SessionStore::new());
        let bridge = TelegramBridge::new(&config, store);
        // No group, no users: must succeed without any network traffic.
        bridge.sync_contacts().await.unwrap();
        bridge.update_topic_names().await.unwrap();
        bridge.send_to_all_users("quiet").await.unwrap();
    }
}
