use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::auth::Credentials;
use crate::errors::Disconnect;
use crate::types::{
    CallEvent, ChatId, ChatPatch, Contact, ContactPatch, HistorySync, Label, LabelAssociation,
    MessageStatusUpdate, Presence, Reaction, Receipt, StoredMessage,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertType {
    /// Live delivery; the message handler should react.
    Notify,
    /// Backfill; stored without notification.
    Append,
}

/// One member of the closed event-kind set the transport reports. Kinds the
/// core does not recognize arrive as `Unknown` and are skipped by design.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    ConnectionUpdate {
        #[serde(default)]
        state: Option<ConnectionState>,
        #[serde(default)]
        qr: Option<String>,
        #[serde(default)]
        last_disconnect: Option<Disconnect>,
    },
    CredsUpdate {
        creds: Credentials,
    },
    MessagesUpsert {
        messages: Vec<StoredMessage>,
        upsert_type: UpsertType,
    },
    MessageUpdate {
        updates: Vec<MessageStatusUpdate>,
    },
    ReceiptUpdate {
        receipts: Vec<Receipt>,
    },
    Reaction {
        reactions: Vec<Reaction>,
    },
    PresenceUpdate {
        chat: ChatId,
        presences: HashMap<String, Presence>,
    },
    ChatUpdate {
        chats: Vec<ChatPatch>,
    },
    ChatDelete {
        ids: Vec<ChatId>,
    },
    ContactUpdate {
        contacts: Vec<ContactPatch>,
    },
    ContactUpsert {
        contacts: Vec<Contact>,
    },
    Call {
        calls: Vec<CallEvent>,
    },
    HistorySync(HistorySync),
    LabelAssociation {
        association: LabelAssociation,
    },
    LabelEdit {
        label: Label,
    },
    Unknown {
        kind: String,
    },
}

impl WireEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::ConnectionUpdate { .. } => "connection_update",
            Self::CredsUpdate { .. } => "creds_update",
            Self::MessagesUpsert { .. } => "messages_upsert",
            Self::MessageUpdate { .. } => "message_update",
            Self::ReceiptUpdate { .. } => "receipt_update",
            Self::Reaction { .. } => "reaction",
            Self::PresenceUpdate { .. } => "presence_update",
            Self::ChatUpdate { .. } => "chat_update",
            Self::ChatDelete { .. } => "chat_delete",
            Self::ContactUpdate { .. } => "contact_update",
            Self::ContactUpsert { .. } => "contact_upsert",
            Self::Call { .. } => "call",
            Self::HistorySync(_) => "history_sync",
            Self::LabelAssociation { .. } => "label_association",
            Self::LabelEdit { .. } => "label_edit",
            Self::Unknown { kind } => kind,
        }
    }

    /// Shorthand for a bare connection-state change.
    pub fn connection_state(state: ConnectionState) -> Self {
        Self::ConnectionUpdate {
            state: Some(state),
            qr: None,
            last_disconnect: None,
        }
    }

    pub fn connection_closed(disconnect: Disconnect) -> Self {
        Self::ConnectionUpdate {
            state: Some(ConnectionState::Close),
            qr: None,
            last_disconnect: Some(disconnect),
        }
    }
}

/// One delivery unit from the transport: zero or more concurrently-reported
/// events, consumed exactly once by the router.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventBatch {
    pub events: Vec<WireEvent>,
}

impl EventBatch {
    pub fn new(events: Vec<WireEvent>) -> Self {
        Self { events }
    }

    pub fn single(event: WireEvent) -> Self {
        Self {
            events: vec![event],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::close_code;

    #[test]
    fn event_kind_strings() {
        let open = WireEvent::connection_state(ConnectionState::Open);
        assert_eq!(open.kind(), "connection_update");

        let unknown = WireEvent::Unknown {
            kind: "newsletter_update".into(),
        };
        assert_eq!(unknown.kind(), "newsletter_update");
    }

    #[test]
    fn connection_update_tolerates_sparse_payloads() {
        let ev: WireEvent = serde_json::from_str(r#"{"type": "connection_update"}"#).unwrap();
        match ev {
            WireEvent::ConnectionUpdate {
                state,
                qr,
                last_disconnect,
            } => {
                assert_eq!(state, None);
                assert_eq!(qr, None);
                assert_eq!(last_disconnect, None);
            }
            other => panic!("expected connection_update, got {}", other.kind()),
        }
    }

    #[test]
    fn close_event_carries_disconnect() {
        let ev = WireEvent::connection_closed(Disconnect::with_status(close_code::LOGGED_OUT));
        let json = serde_json::to_string(&ev).unwrap();
        let parsed: WireEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            WireEvent::ConnectionUpdate {
                last_disconnect: Some(d),
                ..
            } => assert!(d.is_logged_out()),
            other => panic!("expected close update, got {:?}", other),
        }
    }

    #[test]
    fn serde_tag_matches_kind() {
        let ev = WireEvent::ChatDelete {
            ids: vec![ChatId::new("1@host")],
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""type":"chat_delete""#));
    }
}
