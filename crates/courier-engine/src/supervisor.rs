use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_core::auth::AuthProvider;
use courier_core::bridge::Bridge;
use courier_core::errors::Disconnect;
use courier_core::events::EventBatch;
use courier_core::wire::{ConnectParams, Connection, Connector};
use courier_store::SessionStore;
use courier_wire::{BoundedCache, CachedKeyStore};

use crate::error::ClientError;
use crate::qr;
use crate::router::{DispatchContext, LifecycleSignal, Router};

/// Retry counters for transport-internal delivery retries; sized for the
/// recent-message window, shared across reconnects.
const RETRY_CACHE_CAP: usize = 1024;

/// Reconnect policy. The delay before retry `n` is `min(base · 2^n, max)`.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

/// Connection lifecycle states. `ClosingTerminal` is absorbing: once there,
/// no further connection attempts happen without an external restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    ClosingReconnect,
    ClosingTerminal,
}

pub type BridgeFactory = Box<dyn Fn() -> Arc<dyn Bridge> + Send + Sync>;

enum DriveOutcome {
    Closed(Disconnect),
    Shutdown,
}

/// Owns the single live connection: establishes it, classifies disconnects,
/// replaces failed connections behind an exponential backoff, and stops for
/// good on a logout or when the retry ceiling is hit.
pub struct Supervisor {
    config: SupervisorConfig,
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthProvider>,
    store: Arc<SessionStore>,
    router: Router,
    /// Set once on the first successful open, kept for the process lifetime.
    bridge_factory: Option<BridgeFactory>,
    bridge: RwLock<Option<Arc<dyn Bridge>>>,
    /// The one connection field. Replaced, never mutated in place.
    conn: RwLock<Option<Arc<dyn Connection>>>,
    /// Receiver captured at establish() time so no event can slip between
    /// connect and the drive loop attaching.
    drive_rx: Mutex<Option<broadcast::Receiver<EventBatch>>>,
    state: RwLock<LinkState>,
    retry_count: AtomicU32,
    retry_cache: Arc<BoundedCache>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthProvider>,
        store: Arc<SessionStore>,
        router: Router,
        bridge_factory: Option<BridgeFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            auth,
            store,
            router,
            bridge_factory,
            bridge: RwLock::new(None),
            conn: RwLock::new(None),
            drive_rx: Mutex::new(None),
            state: RwLock::new(LinkState::Idle),
            retry_count: AtomicU32::new(0),
            retry_cache: Arc::new(BoundedCache::new(RETRY_CACHE_CAP)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> LinkState {
        *self.state.read()
    }

    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.conn.read().clone()
    }

    pub fn bridge(&self) -> Option<Arc<dyn Bridge>> {
        self.bridge.read().clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Build a fresh connection and replace the handle. No internal retry:
    /// during startup a failure is the caller's problem; during a reconnect
    /// the run loop counts it as one more failed attempt.
    pub async fn establish(&self) -> Result<(), ClientError> {
        *self.state.write() = LinkState::Connecting;

        let auth_state = self.auth.load().await?;
        let version = self.connector.latest_version().await?;
        info!(version = %version, "negotiated protocol version");

        let params = ConnectParams {
            version,
            creds: auth_state.creds,
            keys: Arc::new(CachedKeyStore::new(auth_state.keys)),
            retry_cache: self.retry_cache.clone(),
            message_lookup: self.store.clone(),
        };
        let conn = self.connector.connect(params).await?;

        self.store.bind(conn.subscribe());
        *self.drive_rx.lock() = Some(conn.subscribe());
        *self.conn.write() = Some(conn);
        Ok(())
    }

    /// Supervision loop. Consumes the current connection's events until it
    /// closes, then decides: reconnect after backoff, or stop for good.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.drive().await {
                DriveOutcome::Shutdown => {
                    *self.state.write() = LinkState::Idle;
                    info!("supervisor stopped");
                    return;
                }
                DriveOutcome::Closed(disconnect) => {
                    if disconnect.is_logged_out() {
                        *self.state.write() = LinkState::ClosingTerminal;
                        self.conn.write().take();
                        error!(
                            cause = %disconnect.describe(),
                            "logged out by remote service; not reconnecting"
                        );
                        self.notify_terminal(
                            "Session logged out by the service. Re-pair to continue.",
                        )
                        .await;
                        return;
                    }

                    *self.state.write() = LinkState::ClosingReconnect;
                    self.conn.write().take();

                    let attempt = self.retry_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if attempt > self.config.max_retries {
                        *self.state.write() = LinkState::ClosingTerminal;
                        error!(
                            attempts = attempt - 1,
                            "reconnect ceiling reached; giving up"
                        );
                        self.notify_terminal(
                            "Connection lost and could not be re-established.",
                        )
                        .await;
                        return;
                    }

                    let delay = backoff_delay(&self.config, attempt);
                    info!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        cause = %disconnect.describe(),
                        "reconnecting after transient disconnect"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => {
                            *self.state.write() = LinkState::Idle;
                            return;
                        }
                    }

                    if let Err(e) = self.establish().await {
                        // Counted as one more failed attempt on the next turn
                        // of the loop (drive() returns immediately without a
                        // handle).
                        warn!(error = %e, attempt, "reconnect attempt failed");
                    }
                }
            }
        }
    }

    /// Event-drive the current connection until it closes or shutdown is
    /// requested.
    async fn drive(&self) -> DriveOutcome {
        let Some(mut rx) = self.drive_rx.lock().take() else {
            return DriveOutcome::Closed(Disconnect::default());
        };

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return DriveOutcome::Shutdown,
                recv = rx.recv() => match recv {
                    Ok(batch) => {
                        let ctx = DispatchContext {
                            conn: self.connection(),
                            bridge: self.bridge(),
                        };
                        for signal in self.router.dispatch(batch, &ctx).await {
                            match signal {
                                LifecycleSignal::Opened => self.on_opened().await,
                                LifecycleSignal::QrNeeded(qr) => self.on_qr(&qr).await,
                                LifecycleSignal::Closed(disconnect) => {
                                    return DriveOutcome::Closed(disconnect);
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged");
                    }
                    // Stream gone without a close event: the transport died.
                    Err(broadcast::error::RecvError::Closed) => {
                        return DriveOutcome::Closed(Disconnect::default());
                    }
                },
            }
        }
    }

    async fn on_opened(&self) {
        *self.state.write() = LinkState::Open;
        self.retry_count.store(0, Ordering::Relaxed);

        let bridge = {
            let mut slot = self.bridge.write();
            if slot.is_none() {
                if let Some(factory) = &self.bridge_factory {
                    *slot = Some(factory());
                    info!("bridge constructed");
                }
            }
            slot.clone()
        };

        if let Some(bridge) = bridge {
            // Sync steps re-run on every open, including after reconnects.
            if let Err(e) = bridge.sync_contacts().await {
                warn!(error = %e, "bridge contact sync failed");
            }
            if let Err(e) = bridge.update_topic_names().await {
                warn!(error = %e, "bridge topic refresh failed");
            }
            if let Err(e) = bridge.send_start_message().await {
                warn!(error = %e, "bridge start notification failed");
            }
        }

        info!("connection open");
    }

    /// Exactly one of the two paths runs per QR event.
    async fn on_qr(&self, payload: &str) {
        match self.bridge() {
            Some(bridge) => {
                if let Err(e) = bridge.send_qr_code(payload).await {
                    warn!(error = %e, "failed to forward pairing payload to bridge");
                }
            }
            None => qr::render_to_terminal(payload),
        }
    }

    /// Terminal and ceiling states are the only ones users hear about.
    async fn notify_terminal(&self, text: &str) {
        if let Some(bridge) = self.bridge() {
            if let Err(e) = bridge.send_to_all_users(text).await {
                warn!(error = %e, "terminal notification failed");
            }
        }
    }
}

pub(crate) fn backoff_delay(config: &SupervisorConfig, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(31);
    let ms = (config.base_delay.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(ms.min(config.max_delay.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use courier_core::errors::{close_code, WireError};
    use courier_core::events::{ConnectionState, WireEvent};
    use courier_wire::mock::{MockConnector, MockSession};

    use crate::testing::{MemoryAuth, RecordingBridge, RecordingHandler};

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    struct Harness {
        supervisor: Arc<Supervisor>,
        connector: Arc<MockConnector>,
        bridge: Arc<RecordingBridge>,
        factory_calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    fn harness(sessions: Vec<MockSession>) -> Harness {
        let connector = Arc::new(MockConnector::new(sessions));
        let auth = MemoryAuth::new();
        let store = Arc::new(SessionStore::new());
        let router = Router::new(RecordingHandler::new(), Arc::clone(&auth) as _);

        let bridge = RecordingBridge::new();
        let factory_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let factory_bridge = Arc::clone(&bridge);
        let factory_counter = Arc::clone(&factory_calls);
        let factory: BridgeFactory = Box::new(move || {
            factory_counter.fetch_add(1, Ordering::Relaxed);
            Arc::clone(&factory_bridge) as _
        });

        let supervisor = Supervisor::new(
            fast_config(),
            Arc::clone(&connector) as _,
            auth,
            store,
            router,
            Some(factory),
        );

        Harness {
            supervisor,
            connector,
            bridge,
            factory_calls,
        }
    }

    fn open_event() -> EventBatch {
        EventBatch::single(WireEvent::connection_state(ConnectionState::Open))
    }

    fn close_event(status: Option<u16>) -> EventBatch {
        EventBatch::single(WireEvent::connection_closed(Disconnect {
            status_code: status,
            message: None,
        }))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = SupervisorConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(8000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(16_000));
        assert_eq!(backoff_delay(&config, 5), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(&config, 6), Duration::from_millis(30_000));
    }

    #[test]
    fn backoff_is_monotone_and_capped() {
        let config = SupervisorConfig::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = backoff_delay(&config, attempt);
            assert!(delay >= previous, "delay regressed at attempt {attempt}");
            assert!(delay <= config.max_delay);
            previous = delay;
        }
    }

    #[tokio::test]
    async fn establish_failure_propagates() {
        let h = harness(vec![MockSession::ConnectError(WireError::Handshake(
            "refused".into(),
        ))]);
        let err = h.supervisor.establish().await.unwrap_err();
        assert!(matches!(err, ClientError::Wire(WireError::Handshake(_))));
    }

    #[tokio::test]
    async fn version_discovery_failure_propagates() {
        let connector = Arc::new(
            MockConnector::new(vec![]).with_version_error(WireError::Discovery("404".into())),
        );
        let auth = MemoryAuth::new();
        let router = Router::new(RecordingHandler::new(), Arc::clone(&auth) as _);
        let supervisor = Supervisor::new(
            fast_config(),
            Arc::clone(&connector) as _,
            auth,
            Arc::new(SessionStore::new()),
            router,
            None,
        );

        let err = supervisor.establish().await.unwrap_err();
        assert!(matches!(err, ClientError::Wire(WireError::Discovery(_))));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn transient_close_reconnects() {
        let h = harness(vec![
            MockSession::Events(vec![]),
            MockSession::Events(vec![]),
        ]);
        h.supervisor.establish().await.unwrap();
        let run = tokio::spawn(Arc::clone(&h.supervisor).run());

        let conn0 = h.connector.connection(0).unwrap();
        conn0.emit(open_event());
        settle().await;
        assert_eq!(h.supervisor.state(), LinkState::Open);
        assert_eq!(h.supervisor.retry_count(), 0);

        conn0.emit(close_event(Some(close_code::RESTART_REQUIRED)));
        settle().await;

        assert_eq!(h.connector.connect_count(), 2);
        assert_eq!(h.supervisor.retry_count(), 1);

        let conn1 = h.connector.connection(1).unwrap();
        conn1.emit(open_event());
        settle().await;
        assert_eq!(h.supervisor.state(), LinkState::Open);
        // A successful open resets the backoff.
        assert_eq!(h.supervisor.retry_count(), 0);

        run.abort();
    }

    #[tokio::test]
    async fn unknown_close_cause_is_transient() {
        let h = harness(vec![
            MockSession::Events(vec![]),
            MockSession::Events(vec![]),
        ]);
        h.supervisor.establish().await.unwrap();
        let run = tokio::spawn(Arc::clone(&h.supervisor).run());

        let conn0 = h.connector.connection(0).unwrap();
        conn0.emit(open_event());
        settle().await;

        conn0.emit(close_event(None));
        settle().await;

        assert_eq!(h.connector.connect_count(), 2);
        assert_eq!(h.supervisor.retry_count(), 1);
        run.abort();
    }

    #[tokio::test]
    async fn logged_out_close_is_terminal() {
        let h = harness(vec![MockSession::Events(vec![])]);
        h.supervisor.establish().await.unwrap();
        let run = tokio::spawn(Arc::clone(&h.supervisor).run());

        let conn0 = h.connector.connection(0).unwrap();
        conn0.emit(open_event());
        settle().await;

        conn0.emit(close_event(Some(close_code::LOGGED_OUT)));
        settle().await;

        assert_eq!(h.supervisor.state(), LinkState::ClosingTerminal);
        assert_eq!(h.connector.connect_count(), 1);
        assert_eq!(h.bridge.notification_count(), 1);

        // The run loop has returned; no further establish can happen.
        run.await.unwrap();
    }

    #[tokio::test]
    async fn retry_ceiling_suppresses_the_sixth_attempt() {
        let h = harness(vec![
            MockSession::Events(vec![]),
            MockSession::ConnectError(WireError::Io("down".into())),
            MockSession::ConnectError(WireError::Io("down".into())),
            MockSession::ConnectError(WireError::Io("down".into())),
            MockSession::ConnectError(WireError::Io("down".into())),
            MockSession::ConnectError(WireError::Io("down".into())),
        ]);
        h.supervisor.establish().await.unwrap();
        let run = tokio::spawn(Arc::clone(&h.supervisor).run());

        let conn0 = h.connector.connection(0).unwrap();
        conn0.emit(open_event());
        settle().await;
        conn0.emit(close_event(Some(close_code::SERVICE_UNAVAILABLE)));

        run.await.unwrap();

        // 1 initial connect + exactly 5 reconnect attempts; the 6th is
        // suppressed by the ceiling.
        assert_eq!(h.connector.connect_count(), 6);
        assert_eq!(h.supervisor.state(), LinkState::ClosingTerminal);
        assert_eq!(h.bridge.notification_count(), 1);
    }

    #[tokio::test]
    async fn bridge_is_constructed_once_across_reconnects() {
        let h = harness(vec![
            MockSession::Events(vec![]),
            MockSession::Events(vec![]),
        ]);
        h.supervisor.establish().await.unwrap();
        let run = tokio::spawn(Arc::clone(&h.supervisor).run());

        let conn0 = h.connector.connection(0).unwrap();
        conn0.emit(open_event());
        settle().await;
        conn0.emit(close_event(Some(close_code::RESTART_REQUIRED)));
        settle().await;

        let conn1 = h.connector.connection(1).unwrap();
        conn1.emit(open_event());
        settle().await;

        assert_eq!(h.factory_calls.load(Ordering::Relaxed), 1);
        // Sync steps re-ran on the second open.
        assert_eq!(h.bridge.contact_syncs.load(Ordering::Relaxed), 2);
        assert_eq!(h.bridge.start_messages.load(Ordering::Relaxed), 2);
        run.abort();
    }

    #[tokio::test]
    async fn qr_goes_to_bridge_once_it_exists() {
        let h = harness(vec![MockSession::Events(vec![])]);
        h.supervisor.establish().await.unwrap();
        let run = tokio::spawn(Arc::clone(&h.supervisor).run());

        let conn0 = h.connector.connection(0).unwrap();

        // Before the first open there is no bridge; the payload takes the
        // terminal fallback path.
        conn0.emit(EventBatch::single(WireEvent::ConnectionUpdate {
            state: None,
            qr: Some("early-payload".into()),
            last_disconnect: None,
        }));
        settle().await;
        assert!(h.bridge.qr_codes.lock().is_empty());

        conn0.emit(open_event());
        settle().await;

        conn0.emit(EventBatch::single(WireEvent::ConnectionUpdate {
            state: None,
            qr: Some("late-payload".into()),
            last_disconnect: None,
        }));
        settle().await;
        assert_eq!(*h.bridge.qr_codes.lock(), vec!["late-payload"]);

        run.abort();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_without_reconnecting() {
        let h = harness(vec![MockSession::Events(vec![])]);
        h.supervisor.establish().await.unwrap();
        let run = tokio::spawn(Arc::clone(&h.supervisor).run());

        let conn0 = h.connector.connection(0).unwrap();
        conn0.emit(open_event());
        settle().await;

        h.supervisor.shutdown_token().cancel();
        run.await.unwrap();

        assert_eq!(h.supervisor.state(), LinkState::Idle);
        assert_eq!(h.connector.connect_count(), 1);
    }
}
