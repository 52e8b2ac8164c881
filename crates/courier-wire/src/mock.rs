use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use courier_core::errors::WireError;
use courier_core::events::EventBatch;
use courier_core::types::{ChatId, MessageContent, MessageId, SendOptions};
use courier_core::wire::{ConnectParams, Connection, Connector, ProtocolVersion};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Pre-programmed outcome for one connect() call.
pub enum MockSession {
    /// connect() succeeds; the scripted batches are published in order after
    /// a short startup delay (so the caller has subscribed).
    Events(Vec<EventBatch>),
    /// connect() itself fails.
    ConnectError(WireError),
}

/// Deterministic connector double. Sessions are consumed in order; every
/// created connection stays inspectable through `connection(n)`.
pub struct MockConnector {
    sessions: Mutex<VecDeque<MockSession>>,
    version_error: Mutex<Option<WireError>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    connects: AtomicUsize,
    version_calls: AtomicUsize,
}

impl MockConnector {
    pub fn new(sessions: Vec<MockSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            version_error: Mutex::new(None),
            connections: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            version_calls: AtomicUsize::new(0),
        }
    }

    /// Make every latest_version() call fail.
    pub fn with_version_error(self, error: WireError) -> Self {
        *self.version_error.lock() = Some(error);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::Relaxed)
    }

    pub fn connection(&self, index: usize) -> Option<Arc<MockConnection>> {
        self.connections.lock().get(index).cloned()
    }

    pub fn last_connection(&self) -> Option<Arc<MockConnection>> {
        self.connections.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn latest_version(&self) -> Result<ProtocolVersion, WireError> {
        self.version_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.version_error.lock().clone() {
            return Err(error);
        }
        Ok(ProtocolVersion(2, 3000, 0))
    }

    async fn connect(&self, _params: ConnectParams) -> Result<Arc<dyn Connection>, WireError> {
        let call = self.connects.fetch_add(1, Ordering::Relaxed);
        let session = self.sessions.lock().pop_front().ok_or_else(|| {
            WireError::Io(format!("MockConnector: no session scripted for connect {call}"))
        })?;

        match session {
            MockSession::ConnectError(error) => Err(error),
            MockSession::Events(batches) => {
                let conn = MockConnection::new();
                self.connections.lock().push(Arc::clone(&conn));

                let emitter = Arc::clone(&conn);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    for batch in batches {
                        emitter.emit(batch);
                        tokio::task::yield_now().await;
                    }
                });

                Ok(conn)
            }
        }
    }
}

/// Connection double that records traffic for assertions and lets tests emit
/// events at will.
pub struct MockConnection {
    events: broadcast::Sender<EventBatch>,
    sent: Mutex<Vec<(ChatId, MessageContent)>>,
    profile_queries: Mutex<Vec<ChatId>>,
    profile_urls: Mutex<HashMap<String, Option<String>>>,
    profile_error: Mutex<Option<WireError>>,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            events,
            sent: Mutex::new(Vec::new()),
            profile_queries: Mutex::new(Vec::new()),
            profile_urls: Mutex::new(HashMap::new()),
            profile_error: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Push a batch into every subscriber, as the transport would.
    pub fn emit(&self, batch: EventBatch) {
        let _ = self.events.send(batch);
    }

    pub fn set_profile_url(&self, id: &ChatId, url: Option<String>) {
        self.profile_urls.lock().insert(id.as_str().to_owned(), url);
    }

    pub fn fail_profile_lookups(&self, error: WireError) {
        *self.profile_error.lock() = Some(error);
    }

    pub fn sent(&self) -> Vec<(ChatId, MessageContent)> {
        self.sent.lock().clone()
    }

    pub fn profile_queries(&self) -> Vec<ChatId> {
        self.profile_queries.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn subscribe(&self) -> broadcast::Receiver<EventBatch> {
        self.events.subscribe()
    }

    async fn send_message(
        &self,
        to: &ChatId,
        content: MessageContent,
        _options: SendOptions,
    ) -> Result<MessageId, WireError> {
        if self.is_closed() {
            return Err(WireError::NotConnected);
        }
        let mut sent = self.sent.lock();
        sent.push((to.clone(), content));
        Ok(MessageId::new(format!("MOCK-{}", sent.len())))
    }

    async fn profile_picture_url(&self, id: &ChatId) -> Result<Option<String>, WireError> {
        self.profile_queries.lock().push(id.clone());
        if let Some(error) = self.profile_error.lock().clone() {
            return Err(error);
        }
        Ok(self
            .profile_urls
            .lock()
            .get(id.as_str())
            .cloned()
            .flatten())
    }

    async fn close(&self) -> Result<(), WireError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::events::{ConnectionState, WireEvent};
    use courier_core::types::MessageKey;
    use courier_core::wire::{MessageLookup, RetryCache};

    struct NoLookup;
    impl MessageLookup for NoLookup {
        fn lookup_message(&self, _key: &MessageKey) -> Option<MessageContent> {
            None
        }
    }

    struct NoCache;
    impl RetryCache for NoCache {
        fn get(&self, _key: &str) -> Option<u32> {
            None
        }
        fn put(&self, _key: &str, _value: u32) {}
    }

    struct NoKeys;
    #[async_trait]
    impl courier_core::auth::KeyStore for NoKeys {
        async fn get(
            &self,
            _kind: &str,
            _ids: &[String],
        ) -> Result<HashMap<String, serde_json::Value>, courier_core::errors::AuthError> {
            Ok(HashMap::new())
        }
        async fn set(
            &self,
            _entries: HashMap<String, HashMap<String, Option<serde_json::Value>>>,
        ) -> Result<(), courier_core::errors::AuthError> {
            Ok(())
        }
    }

    fn params() -> ConnectParams {
        ConnectParams {
            version: ProtocolVersion(2, 3000, 0),
            creds: courier_core::auth::Credentials::default(),
            keys: Arc::new(NoKeys),
            retry_cache: Arc::new(NoCache),
            message_lookup: Arc::new(NoLookup),
        }
    }

    #[tokio::test]
    async fn scripted_batches_reach_subscribers() {
        let connector = MockConnector::new(vec![MockSession::Events(vec![EventBatch::single(
            WireEvent::connection_state(ConnectionState::Open),
        )])]);

        let conn = connector.connect(params()).await.unwrap();
        let mut rx = conn.subscribe();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.events[0].kind(), "connection_update");
    }

    #[tokio::test]
    async fn exhausted_sessions_fail() {
        let connector = MockConnector::new(vec![]);
        let err = connector.connect(params()).await.unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn connect_error_is_scripted() {
        let connector =
            MockConnector::new(vec![MockSession::ConnectError(WireError::Handshake(
                "refused".into(),
            ))]);
        let err = connector.connect(params()).await.unwrap_err();
        assert!(matches!(err, WireError::Handshake(_)));
    }

    #[tokio::test]
    async fn send_is_recorded_until_closed() {
        let connector = MockConnector::new(vec![MockSession::Events(vec![])]);
        let _ = connector.connect(params()).await.unwrap();
        let conn = connector.last_connection().unwrap();

        let to = ChatId::new("1@host");
        conn.send_message(&to, MessageContent::text("hi"), SendOptions::default())
            .await
            .unwrap();
        assert_eq!(conn.sent().len(), 1);

        conn.close().await.unwrap();
        let err = conn
            .send_message(&to, MessageContent::text("late"), SendOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::NotConnected));
    }

    #[tokio::test]
    async fn profile_lookup_miss_is_none() {
        let connector = MockConnector::new(vec![MockSession::Events(vec![])]);
        let _ = connector.connect(params()).await.unwrap();
        let conn = connector.last_connection().unwrap();

        let result = conn
            .profile_picture_url(&ChatId::new("9@host"))
            .await
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(conn.profile_queries().len(), 1);
    }
}
