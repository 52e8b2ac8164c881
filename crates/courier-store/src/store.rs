use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use courier_core::events::{EventBatch, WireEvent};
use courier_core::types::{
    Chat, ChatId, ChatPatch, Contact, ContactPatch, HistorySync, ImageField, Label,
    LabelAssociation, MessageContent, MessageKey, MessageStatusUpdate, Presence, Reaction,
    Receipt, StoredMessage,
};
use courier_core::wire::MessageLookup;

/// Per-chat retention for the message cache.
const MESSAGES_PER_CHAT: usize = 512;

/// Read-through cache of recent chat/contact/message state, fed by the
/// connection's event stream and queried synchronously by the core.
///
/// The store is bound to each new connection; binding subscribes its own
/// receiver, so routing and caching never block each other.
#[derive(Default)]
pub struct SessionStore {
    chats: DashMap<ChatId, Chat>,
    contacts: DashMap<ChatId, Contact>,
    messages: DashMap<ChatId, VecDeque<StoredMessage>>,
    labels: DashMap<String, Label>,
    label_links: DashMap<ChatId, Vec<LabelAssociation>>,
    presence: DashMap<ChatId, HashMap<String, Presence>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a connection's event stream until it ends. Called once per
    /// connection; the task dies with the stream and a fresh bind replaces
    /// it after a reconnect.
    pub fn bind(self: &Arc<Self>, mut rx: broadcast::Receiver<EventBatch>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(batch) => store.apply(&batch),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session store lagged behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn apply(&self, batch: &EventBatch) {
        for event in &batch.events {
            self.apply_event(event);
        }
    }

    fn apply_event(&self, event: &WireEvent) {
        match event {
            WireEvent::MessagesUpsert { messages, .. } => {
                for message in messages {
                    self.upsert_message(message.clone());
                }
            }
            WireEvent::MessageUpdate { updates } => {
                for update in updates {
                    self.update_message(update);
                }
            }
            WireEvent::ReceiptUpdate { receipts } => {
                for receipt in receipts {
                    self.apply_receipt(receipt);
                }
            }
            WireEvent::Reaction { reactions } => {
                for reaction in reactions {
                    self.apply_reaction(reaction);
                }
            }
            WireEvent::PresenceUpdate { chat, presences } => {
                let mut entry = self.presence.entry(chat.clone()).or_default();
                entry.extend(presences.clone());
            }
            WireEvent::ChatUpdate { chats } => {
                for patch in chats {
                    self.patch_chat(patch);
                }
            }
            WireEvent::ChatDelete { ids } => {
                for id in ids {
                    self.chats.remove(id);
                    self.messages.remove(id);
                    self.label_links.remove(id);
                    debug!(chat = %id, "chat deleted");
                }
            }
            WireEvent::ContactUpsert { contacts } => {
                for contact in contacts {
                    self.contacts.insert(contact.id.clone(), contact.clone());
                }
            }
            WireEvent::ContactUpdate { contacts } => {
                for patch in contacts {
                    self.patch_contact(patch);
                }
            }
            WireEvent::HistorySync(sync) => self.merge_history(sync),
            WireEvent::LabelEdit { label } => {
                if label.deleted {
                    self.labels.remove(&label.id);
                } else {
                    self.labels.insert(label.id.clone(), label.clone());
                }
            }
            WireEvent::LabelAssociation { association } => {
                self.apply_label_association(association);
            }
            // Lifecycle and credential events carry no cacheable state.
            WireEvent::ConnectionUpdate { .. }
            | WireEvent::CredsUpdate { .. }
            | WireEvent::Call { .. }
            | WireEvent::Unknown { .. } => {}
        }
    }

    fn upsert_message(&self, message: StoredMessage) {
        let mut queue = self.messages.entry(message.key.chat.clone()).or_default();
        if let Some(existing) = queue.iter_mut().find(|m| m.key.id == message.key.id) {
            *existing = message;
            return;
        }
        queue.push_back(message);
        while queue.len() > MESSAGES_PER_CHAT {
            queue.pop_front();
        }
    }

    fn update_message(&self, update: &MessageStatusUpdate) {
        let Some(mut queue) = self.messages.get_mut(&update.key.chat) else {
            return;
        };
        let Some(message) = queue.iter_mut().find(|m| m.key.id == update.key.id) else {
            return;
        };
        if let Some(content) = &update.content {
            message.content = content.clone();
        }
        if let Some(status) = update.status {
            // Status only moves forward; late receipts never regress it.
            if status > message.status {
                message.status = status;
            }
        }
    }

    fn apply_receipt(&self, receipt: &Receipt) {
        self.update_message(&MessageStatusUpdate {
            key: receipt.key.clone(),
            status: Some(receipt.status),
            content: None,
        });
    }

    fn apply_reaction(&self, reaction: &Reaction) {
        let Some(mut queue) = self.messages.get_mut(&reaction.key.chat) else {
            return;
        };
        let Some(message) = queue.iter_mut().find(|m| m.key.id == reaction.key.id) else {
            return;
        };
        message.reactions.retain(|r| r.sender != reaction.sender);
        if reaction.emoji.is_some() {
            message.reactions.push(reaction.clone());
        }
    }

    fn patch_chat(&self, patch: &ChatPatch) {
        let mut chat = self.chats.entry(patch.id.clone()).or_insert_with(|| Chat {
            id: patch.id.clone(),
            name: None,
            unread_count: 0,
            last_message_time: None,
        });
        if let Some(name) = &patch.name {
            chat.name = Some(name.clone());
        }
        if let Some(unread) = patch.unread_count {
            chat.unread_count = unread;
        }
        if let Some(ts) = patch.last_message_time {
            chat.last_message_time = Some(ts);
        }
    }

    fn patch_contact(&self, patch: &ContactPatch) {
        let mut contact = self
            .contacts
            .entry(patch.id.clone())
            .or_insert_with(|| Contact {
                id: patch.id.clone(),
                name: None,
                notify: None,
                img_url: None,
            });
        if let Some(name) = &patch.name {
            contact.name = Some(name.clone());
        }
        if let Some(notify) = &patch.notify {
            contact.notify = Some(notify.clone());
        }
        match &patch.img_url {
            ImageField::Unchanged => {}
            ImageField::Removed => contact.img_url = None,
            ImageField::Url(url) => contact.img_url = Some(url.clone()),
        }
    }

    fn merge_history(&self, sync: &HistorySync) {
        for chat in &sync.chats {
            self.chats.entry(chat.id.clone()).or_insert_with(|| chat.clone());
        }
        for contact in &sync.contacts {
            self.contacts
                .entry(contact.id.clone())
                .or_insert_with(|| contact.clone());
        }
        for message in &sync.messages {
            self.upsert_message(message.clone());
        }
    }

    fn apply_label_association(&self, association: &LabelAssociation) {
        let mut links = self.label_links.entry(association.chat.clone()).or_default();
        links.retain(|l| {
            l.label_id != association.label_id || l.message_id != association.message_id
        });
        if association.added {
            links.push(association.clone());
        }
    }

    pub fn contact(&self, id: &ChatId) -> Option<Contact> {
        self.contacts.get(id).map(|c| c.value().clone())
    }

    pub fn chat(&self, id: &ChatId) -> Option<Chat> {
        self.chats.get(id).map(|c| c.value().clone())
    }

    pub fn label(&self, id: &str) -> Option<Label> {
        self.labels.get(id).map(|l| l.value().clone())
    }

    pub fn chat_labels(&self, id: &ChatId) -> Vec<LabelAssociation> {
        self.label_links
            .get(id)
            .map(|l| l.value().clone())
            .unwrap_or_default()
    }

    pub fn presence(&self, chat: &ChatId) -> HashMap<String, Presence> {
        self.presence
            .get(chat)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    /// All cached contacts, for bridge contact sync.
    pub fn contacts_snapshot(&self) -> Vec<Contact> {
        self.contacts.iter().map(|c| c.value().clone()).collect()
    }

    pub fn message_count(&self, chat: &ChatId) -> usize {
        self.messages.get(chat).map(|q| q.len()).unwrap_or(0)
    }

    pub fn message(&self, key: &MessageKey) -> Option<StoredMessage> {
        self.messages
            .get(&key.chat)?
            .iter()
            .find(|m| m.key.id == key.id)
            .cloned()
    }
}

impl MessageLookup for SessionStore {
    /// Total lookup: a key that was never stored (or already rotated out of
    /// retention) is simply a miss.
    fn lookup_message(&self, key: &MessageKey) -> Option<MessageContent> {
        self.message(key).map(|m| m.content)
    }
}
