use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Remote-assigned chat/contact identifier (a JID-style address).
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChatId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Remote-assigned message identifier, unique within a chat.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addresses one message: which chat, which id, and which side authored it.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageKey {
    pub chat: ChatId,
    pub id: MessageId,
    #[serde(default)]
    pub from_me: bool,
}

/// Opaque message payload. Content parsing and formatting happen outside this
/// core; the store and transport only round-trip the value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(pub serde_json::Value);

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self(serde_json::json!({ "text": text.into() }))
    }
}

/// Delivery/read progression of a message. Ordered so status updates can be
/// applied monotonically (a message never regresses from read to delivered).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    ServerAck,
    DeliveryAck,
    Read,
    Played,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub key: MessageKey,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
}

/// Partial update to an existing message: a status bump, an edit, or both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageStatusUpdate {
    pub key: MessageKey,
    #[serde(default)]
    pub status: Option<MessageStatus>,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub key: MessageKey,
    pub recipient: ChatId,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

/// A reaction by one sender on one message. `emoji: None` removes that
/// sender's reaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub key: MessageKey,
    pub sender: ChatId,
    #[serde(default)]
    pub emoji: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Available,
    Unavailable,
    Composing,
    Recording,
    Paused,
}

/// Image-URL field of a contact patch. The wire payload distinguishes an
/// absent field (no change), an explicit null (image removed), and a value
/// (image changed; the fresh URL must be looked up).
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ImageField {
    #[default]
    Unchanged,
    Removed,
    Url(String),
}

impl ImageField {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

fn image_field_de<'de, D>(de: D) -> Result<ImageField, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<String>::deserialize(de)? {
        Some(url) => ImageField::Url(url),
        None => ImageField::Removed,
    })
}

fn image_field_ser<S>(field: &ImageField, ser: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match field {
        // Unchanged is skipped at the struct level; treat it like Removed if
        // a caller serializes it anyway.
        ImageField::Unchanged | ImageField::Removed => ser.serialize_none(),
        ImageField::Url(url) => ser.serialize_str(url),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ChatId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notify: Option<String>,
    #[serde(default)]
    pub img_url: Option<String>,
}

impl Contact {
    /// Best display name available: address-book name, then push name, then
    /// the raw id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.notify.as_deref())
            .unwrap_or_else(|| self.id.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactPatch {
    pub id: ChatId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notify: Option<String>,
    #[serde(
        default,
        deserialize_with = "image_field_de",
        serialize_with = "image_field_ser",
        skip_serializing_if = "ImageField::is_unchanged"
    )]
    pub img_url: ImageField,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatPatch {
    pub id: ChatId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unread_count: Option<u32>,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Offer,
    Ringing,
    Accept,
    Reject,
    Timeout,
    Terminate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallEvent {
    pub id: String,
    pub from: ChatId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_video: bool,
    pub status: CallStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySyncType {
    InitialBootstrap,
    Recent,
    Full,
    PushName,
    OnDemand,
}

/// One chunk of historical state replayed by the service after pairing or
/// reconnect. `is_latest` marks the final chunk of a sync run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistorySync {
    #[serde(default)]
    pub chats: Vec<Chat>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub progress: Option<u32>,
    pub sync_type: HistorySyncType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelAssociation {
    pub label_id: String,
    pub chat: ChatId,
    #[serde(default)]
    pub message_id: Option<MessageId>,
    /// true = label attached, false = label detached.
    pub added: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendOptions {
    #[serde(default)]
    pub quoted: Option<MessageKey>,
    #[serde(default)]
    pub ephemeral_secs: Option<u32>,
}
