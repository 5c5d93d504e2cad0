use super::integration::{Integration, ReauthRequest};
use crate::clients::LogbookConnector;
use crate::config::RefreshIntervals;
use crate::repo::EntryStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Lifecycle state of the configured instance
#[derive(Clone)]
pub enum InstanceState {
    NotConfigured,
    SetupPending,
    Loaded(Arc<Integration>),
}

impl InstanceState {
    pub fn label(&self) -> &'static str {
        match self {
            InstanceState::NotConfigured => "not_configured",
            InstanceState::SetupPending => "setup_pending",
            InstanceState::Loaded(_) => "loaded",
        }
    }
}

/// Asks the supervisor to tear down and set up the instance again
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ReloadHandle {
    pub fn request_reload(&self) {
        if self.tx.send(()).is_err() {
            warn!("Reload requested but the supervisor is not running");
        }
    }
}

/// Owns the running instance and reacts to reload and re-auth requests
pub struct Supervisor {
    store: Arc<EntryStore>,
    connector: Arc<dyn LogbookConnector>,
    intervals: RefreshIntervals,
    setup_retry: Duration,
    state: RwLock<InstanceState>,
    reauth_required: AtomicBool,
    reload_tx: mpsc::UnboundedSender<()>,
    reauth_tx: mpsc::UnboundedSender<ReauthRequest>,
    receivers: std::sync::Mutex<
        Option<(
            mpsc::UnboundedReceiver<()>,
            mpsc::UnboundedReceiver<ReauthRequest>,
        )>,
    >,
}

impl Supervisor {
    pub fn new(
        store: Arc<EntryStore>,
        connector: Arc<dyn LogbookConnector>,
        intervals: RefreshIntervals,
        setup_retry: Duration,
    ) -> Arc<Self> {
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        let (reauth_tx, reauth_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            store,
            connector,
            intervals,
            setup_retry,
            state: RwLock::new(InstanceState::NotConfigured),
            reauth_required: AtomicBool::new(false),
            reload_tx,
            reauth_tx,
            receivers: std::sync::Mutex::new(Some((reload_rx, reauth_rx))),
        })
    }

    pub fn reload_handle(&self) -> ReloadHandle {
        ReloadHandle {
            tx: self.reload_tx.clone(),
        }
    }

    pub async fn state(&self) -> InstanceState {
        self.state.read().await.clone()
    }

    pub async fn integration(&self) -> Option<Arc<Integration>> {
        match &*self.state.read().await {
            InstanceState::Loaded(integration) => Some(Arc::clone(integration)),
            _ => None,
        }
    }

    pub fn reauth_required(&self) -> bool {
        self.reauth_required.load(Ordering::SeqCst)
    }

    /// Set up the stored instance and start reacting to requests
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let receivers = self.receivers.lock().ok().and_then(|mut r| r.take());
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let Some((reload_rx, reauth_rx)) = receivers else {
                warn!("Supervisor already started");
                return;
            };
            supervisor.run(reload_rx, reauth_rx).await;
        })
    }

    async fn run(
        &self,
        mut reload_rx: mpsc::UnboundedReceiver<()>,
        mut reauth_rx: mpsc::UnboundedReceiver<ReauthRequest>,
    ) {
        self.reload().await;
        loop {
            let pending = matches!(*self.state.read().await, InstanceState::SetupPending);
            tokio::select! {
                Some(()) = reload_rx.recv() => {
                    self.reauth_required.store(false, Ordering::SeqCst);
                    self.reload().await;
                }
                Some(request) = reauth_rx.recv() => {
                    if !self.reauth_required.swap(true, Ordering::SeqCst) {
                        warn!(
                            "Re-authentication required for {}: {}",
                            request.username, request.reason
                        );
                    }
                }
                _ = tokio::time::sleep(self.setup_retry), if pending => {
                    info!("Retrying instance setup");
                    self.reload().await;
                }
                else => break,
            }
        }
    }

    /// Tear down the running instance and set up a new one from the store
    pub async fn reload(&self) {
        self.teardown().await;

        let Some(entry) = self.store.get().await else {
            info!("No configuration entry stored, waiting for setup flow");
            *self.state.write().await = InstanceState::NotConfigured;
            return;
        };

        *self.state.write().await = InstanceState::SetupPending;
        match Integration::setup(
            entry,
            Arc::clone(&self.connector),
            self.intervals,
            self.reauth_tx.clone(),
        )
        .await
        {
            Ok(integration) => {
                *self.state.write().await = InstanceState::Loaded(Arc::new(integration));
            }
            Err(e) => {
                warn!(
                    "Instance setup failed, retrying in {}s: {}",
                    self.setup_retry.as_secs(),
                    e
                );
            }
        }
    }

    /// Stop the running instance, if any
    pub async fn teardown(&self) {
        let previous = std::mem::replace(&mut *self.state.write().await, InstanceState::NotConfigured);
        if let InstanceState::Loaded(integration) = previous {
            info!("Tearing down instance for {}", integration.entry().username);
            integration.shutdown();
        }
    }
}
