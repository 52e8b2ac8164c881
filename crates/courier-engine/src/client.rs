use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use courier_core::auth::AuthProvider;
use courier_core::handler::{MessageHandler, ModuleLoader};
use courier_core::types::{ChatId, Contact, MessageContent, MessageId, SendOptions};
use courier_core::wire::Connector;
use courier_store::SessionStore;

use crate::error::ClientError;
use crate::router::Router;
use crate::supervisor::{BridgeFactory, LinkState, Supervisor, SupervisorConfig};

/// Public surface of the messaging core. Wires the supervisor and router to
/// their collaborators and owns the process lifecycle boundary.
pub struct Client {
    supervisor: Arc<Supervisor>,
    store: Arc<SessionStore>,
    modules: Arc<dyn ModuleLoader>,
    running: AtomicBool,
    run_task: Mutex<Option<JoinHandle<()>>>,
}

/// Collaborators resolved once at startup.
pub struct ClientDeps {
    pub connector: Arc<dyn Connector>,
    pub auth: Arc<dyn AuthProvider>,
    pub store: Arc<SessionStore>,
    pub handler: Arc<dyn MessageHandler>,
    pub modules: Arc<dyn ModuleLoader>,
    /// Present only when a bridge is configured; invoked lazily on the first
    /// successful open.
    pub bridge_factory: Option<BridgeFactory>,
}

impl Client {
    pub fn new(deps: ClientDeps) -> Self {
        Self::with_config(deps, SupervisorConfig::default())
    }

    pub fn with_config(deps: ClientDeps, config: SupervisorConfig) -> Self {
        let router = Router::new(deps.handler, Arc::clone(&deps.auth));
        let supervisor = Supervisor::new(
            config,
            deps.connector,
            deps.auth,
            Arc::clone(&deps.store),
            router,
            deps.bridge_factory,
        );
        Self {
            supervisor,
            store: deps.store,
            modules: deps.modules,
            running: AtomicBool::new(false),
            run_task: Mutex::new(None),
        }
    }

    /// Load modules, establish the first connection, then hand the lifecycle
    /// to the supervision loop. Any failure here is fatal to startup and
    /// propagated; reconnect-after-disconnect is the supervisor's job, not
    /// this function's.
    pub async fn initialize(&self) -> Result<(), ClientError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyRunning);
        }

        match self.start().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<(), ClientError> {
        let count = self.modules.load_modules().await?;
        info!(modules = count, "modules loaded");

        self.supervisor.establish().await?;

        let supervisor = Arc::clone(&self.supervisor);
        *self.run_task.lock() = Some(tokio::spawn(supervisor.run()));
        Ok(())
    }

    /// Forward a message to the live connection. Fails immediately when no
    /// open handle exists; never retried here.
    pub async fn send_message(
        &self,
        to: &ChatId,
        content: MessageContent,
        options: SendOptions,
    ) -> Result<MessageId, ClientError> {
        if self.supervisor.state() != LinkState::Open {
            return Err(ClientError::NotConnected);
        }
        let conn = self
            .supervisor
            .connection()
            .ok_or(ClientError::NotConnected)?;
        Ok(conn.send_message(to, content, options).await?)
    }

    /// Synchronous lookup in the session store.
    pub fn contact_info(&self, id: &ChatId) -> Option<Contact> {
        self.store.contact(id)
    }

    pub fn link_state(&self) -> LinkState {
        self.supervisor.state()
    }

    /// Best-effort, ordered teardown: bridge first, then the connection.
    /// Failures are logged, never re-thrown, so every step runs.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.supervisor.shutdown_token().cancel();

        if let Some(bridge) = self.supervisor.bridge() {
            if let Err(e) = bridge.close().await {
                warn!(error = %e, "bridge teardown failed");
            }
        }

        if let Some(conn) = self.supervisor.connection() {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "connection close failed");
            }
        }

        let task = self.run_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "supervision loop ended abnormally");
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }
}
