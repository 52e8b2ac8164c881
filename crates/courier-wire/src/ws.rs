use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use uuid::Uuid;

use courier_core::auth::KeyStore;
use courier_core::errors::{Disconnect, WireError};
use courier_core::events::{EventBatch, WireEvent};
use courier_core::types::{ChatId, MessageContent, MessageId, MessageKey, SendOptions};
use courier_core::wire::{ConnectParams, Connection, Connector, ProtocolVersion};

use crate::discovery;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 64;
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Cap on gateway-driven delivery retries for a single message.
const MAX_INTERNAL_RETRIES: u32 = 5;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Waiters = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// Connector speaking the JSON session-gateway protocol over a WebSocket.
pub struct WsConnector {
    endpoint: String,
    version_url: String,
    http: reqwest::Client,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>, version_url: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            version_url: version_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn latest_version(&self) -> Result<ProtocolVersion, WireError> {
        discovery::fetch_latest_version(&self.http, &self.version_url).await
    }

    async fn connect(&self, params: ConnectParams) -> Result<Arc<dyn Connection>, WireError> {
        let (stream, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| WireError::Io(e.to_string()))?;
        let (sink, read) = stream.split();

        let (outbound_tx, outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));

        let hello = json!({
            "type": "hello",
            "version": params.version.to_string(),
            "registration_id": params.creds.registration_id,
            "me": params.creds.me,
        });
        outbound_tx
            .send(Message::Text(hello.to_string()))
            .await
            .map_err(|_| WireError::Handshake("outbound queue closed".into()))?;

        tokio::spawn(write_loop(sink, outbound_rx));
        tokio::spawn(read_loop(
            read,
            ReadContext {
                events: events_tx.clone(),
                waiters: Arc::clone(&waiters),
                outbound: outbound_tx.clone(),
                keys: params.keys,
                retry_cache: params.retry_cache,
                lookup: params.message_lookup,
            },
        ));

        Ok(Arc::new(WsConnection {
            outbound: outbound_tx,
            events: events_tx,
            waiters,
        }))
    }
}

pub struct WsConnection {
    outbound: mpsc::Sender<Message>,
    events: broadcast::Sender<EventBatch>,
    waiters: Waiters,
}

#[async_trait]
impl Connection for WsConnection {
    fn subscribe(&self) -> broadcast::Receiver<EventBatch> {
        self.events.subscribe()
    }

    async fn send_message(
        &self,
        to: &ChatId,
        content: MessageContent,
        options: SendOptions,
    ) -> Result<MessageId, WireError> {
        let id = MessageId::new(Uuid::now_v7().simple().to_string().to_uppercase());
        let frame = json!({
            "type": "send",
            "id": id,
            "to": to,
            "content": content,
            "options": options,
        });
        self.outbound
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|_| WireError::NotConnected)?;
        Ok(id)
    }

    async fn profile_picture_url(&self, id: &ChatId) -> Result<Option<String>, WireError> {
        let query_id = Uuid::now_v7().to_string();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(query_id.clone(), tx);

        let frame = json!({
            "type": "query",
            "query": "profile_picture",
            "id": query_id,
            "jid": id,
        });
        if self
            .outbound
            .send(Message::Text(frame.to_string()))
            .await
            .is_err()
        {
            self.waiters.lock().await.remove(&query_id);
            return Err(WireError::NotConnected);
        }

        match tokio::time::timeout(QUERY_TIMEOUT, rx).await {
            Ok(Ok(value)) => Ok(value
                .get("url")
                .and_then(|u| u.as_str())
                .map(str::to_owned)),
            Ok(Err(_)) => Err(WireError::Closed),
            Err(_) => {
                self.waiters.lock().await.remove(&query_id);
                Err(WireError::Protocol("query timed out".into()))
            }
        }
    }

    async fn close(&self) -> Result<(), WireError> {
        self.outbound
            .send(Message::Close(None))
            .await
            .map_err(|_| WireError::NotConnected)
    }
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            warn!(error = %e, "websocket send failed");
            break;
        }
        if closing {
            break;
        }
    }
}

struct ReadContext {
    events: broadcast::Sender<EventBatch>,
    waiters: Waiters,
    outbound: mpsc::Sender<Message>,
    keys: Arc<dyn KeyStore>,
    retry_cache: Arc<dyn courier_core::wire::RetryCache>,
    lookup: Arc<dyn courier_core::wire::MessageLookup>,
}

async fn read_loop(mut read: SplitStream<WsStream>, ctx: ReadContext) {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                Ok(frame) => handle_frame(frame, &ctx).await,
                Err(e) => debug!(error = %e, "dropping unparseable frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                publish(&ctx.events, close_event(frame));
                break;
            }
            // Ping/pong are answered inside tungstenite; binary frames are
            // not part of the gateway protocol.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                publish(
                    &ctx.events,
                    EventBatch::single(WireEvent::connection_closed(Disconnect {
                        status_code: None,
                        message: Some(e.to_string()),
                    })),
                );
                break;
            }
            None => {
                publish(
                    &ctx.events,
                    EventBatch::single(WireEvent::connection_closed(Disconnect::default())),
                );
                break;
            }
        }
    }
    ctx.waiters.lock().await.clear();
}

async fn handle_frame(frame: Value, ctx: &ReadContext) {
    let kind = frame
        .get("type")
        .and_then(|t| t.as_str())
        .map(str::to_owned);
    match kind.as_deref() {
        Some("batch") => {
            let events = frame
                .get("events")
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default();
            let batch = EventBatch::new(events.into_iter().map(decode_event).collect());
            if !batch.is_empty() {
                publish(&ctx.events, batch);
            }
        }
        Some("event") => {
            let event = frame.get("event").cloned().unwrap_or(Value::Null);
            publish(&ctx.events, EventBatch::single(decode_event(event)));
        }
        Some("response") => {
            let Some(id) = frame.get("id").and_then(|i| i.as_str()).map(str::to_owned) else {
                debug!("response frame without id");
                return;
            };
            if let Some(tx) = ctx.waiters.lock().await.remove(&id) {
                let _ = tx.send(frame);
            }
        }
        Some("retry") => handle_retry(&frame, ctx).await,
        Some("key_request") => handle_key_request(&frame, ctx).await,
        other => debug!(kind = ?other, "unhandled gateway frame"),
    }
}

/// The gateway failed to deliver a message and asks for its content again.
/// Served from the session store, capped per message, never surfaced to the
/// original sender.
async fn handle_retry(frame: &Value, ctx: &ReadContext) {
    let key: MessageKey = match serde_json::from_value(frame.get("key").cloned().unwrap_or(Value::Null)) {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "retry frame without a valid message key");
            return;
        }
    };

    let counter = format!("{}:{}", key.chat, key.id);
    let attempts = ctx.retry_cache.get(&counter).unwrap_or(0) + 1;
    ctx.retry_cache.put(&counter, attempts);
    if attempts > MAX_INTERNAL_RETRIES {
        warn!(key = %key.id, attempts, "delivery retry cap reached; dropping");
        return;
    }

    match ctx.lookup.lookup_message(&key) {
        Some(content) => {
            let resend = json!({ "type": "resend", "key": key, "content": content });
            if ctx
                .outbound
                .send(Message::Text(resend.to_string()))
                .await
                .is_err()
            {
                warn!("resend dropped: outbound queue closed");
            }
        }
        None => debug!(key = %key.id, "no stored content for delivery retry"),
    }
}

/// The gateway resolves signal keys through the client's store; lookups go
/// through the caching wrapper installed at connect time.
async fn handle_key_request(frame: &Value, ctx: &ReadContext) {
    let id = frame
        .get("id")
        .and_then(|i| i.as_str())
        .unwrap_or_default()
        .to_owned();
    let kind = frame
        .get("kind")
        .and_then(|k| k.as_str())
        .unwrap_or_default()
        .to_owned();
    let ids: Vec<String> = frame
        .get("ids")
        .and_then(|i| serde_json::from_value(i.clone()).ok())
        .unwrap_or_default();

    let keys = match ctx.keys.get(&kind, &ids).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, kind = %kind, "key lookup failed");
            HashMap::new()
        }
    };

    let response = json!({ "type": "key_response", "id": id, "keys": keys });
    if ctx
        .outbound
        .send(Message::Text(response.to_string()))
        .await
        .is_err()
    {
        warn!("key response dropped: outbound queue closed");
    }
}

fn publish(events: &broadcast::Sender<EventBatch>, batch: EventBatch) {
    if events.send(batch).is_err() {
        debug!("no event subscribers; batch dropped");
    }
}

/// Events the core does not recognize become `Unknown` and are skipped
/// downstream instead of failing the whole batch.
fn decode_event(value: Value) -> WireEvent {
    match serde_json::from_value::<WireEvent>(value.clone()) {
        Ok(event) => event,
        Err(_) => WireEvent::Unknown {
            kind: value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown")
                .to_owned(),
        },
    }
}

fn close_event(frame: Option<CloseFrame<'_>>) -> EventBatch {
    let disconnect = match frame {
        Some(frame) => Disconnect {
            status_code: Some(u16::from(frame.code)),
            message: if frame.reason.is_empty() {
                None
            } else {
                Some(frame.reason.into_owned())
            },
        },
        None => Disconnect::default(),
    };
    EventBatch::single(WireEvent::connection_closed(disconnect))
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::events::ConnectionState;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn decode_known_event() {
        let event = decode_event(json!({
            "type": "connection_update",
            "state": "open",
        }));
        match event {
            WireEvent::ConnectionUpdate { state, .. } => {
                assert_eq!(state, Some(ConnectionState::Open));
            }
            other => panic!("expected connection_update, got {}", other.kind()),
        }
    }

    #[test]
    fn decode_unrecognized_event_kind() {
        let event = decode_event(json!({ "type": "newsletter_update", "data": [] }));
        match event {
            WireEvent::Unknown { kind } => assert_eq!(kind, "newsletter_update"),
            other => panic!("expected unknown, got {}", other.kind()),
        }
    }

    #[test]
    fn decode_tagless_event() {
        let event = decode_event(json!({ "data": 1 }));
        assert_eq!(event.kind(), "unknown");
    }

    #[test]
    fn close_event_maps_frame_fields() {
        let batch = close_event(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "going away".into(),
        }));
        match &batch.events[0] {
            WireEvent::ConnectionUpdate {
                last_disconnect: Some(d),
                ..
            } => {
                assert_eq!(d.status_code, Some(1001));
                assert_eq!(d.message.as_deref(), Some("going away"));
            }
            other => panic!("expected close update, got {:?}", other),
        }
    }

    #[test]
    fn close_event_without_frame_is_unknown_cause() {
        let batch = close_event(None);
        match &batch.events[0] {
            WireEvent::ConnectionUpdate {
                last_disconnect: Some(d),
                ..
            } => {
                assert_eq!(d.status_code, None);
                assert!(!d.is_logged_out());
            }
            other => panic!("expected close update, got {:?}", other),
        }
    }
}
