/// Scheduled refresh of one remote resource
use crate::errors::UpdateFailed;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Something a coordinator can fetch
#[async_trait]
pub trait RefreshSource: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    async fn fetch(&self) -> Result<Self::Output, UpdateFailed>;
}

/// Outcome of the most recent refresh attempt
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshStatus {
    pub last_update_success: bool,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Owns the latest successfully fetched snapshot. Refreshes on one
/// coordinator run strictly one after another; separate coordinators are
/// independent tasks with their own timers.
pub struct Coordinator<S: RefreshSource> {
    name: String,
    interval: Duration,
    source: S,
    data: watch::Sender<Option<Arc<S::Output>>>,
    status: std::sync::RwLock<RefreshStatus>,
    in_flight: Mutex<()>,
}

impl<S: RefreshSource> Coordinator<S> {
    pub fn new(name: impl Into<String>, interval: Duration, source: S) -> Arc<Self> {
        let (data, _) = watch::channel(None);
        Arc::new(Self {
            name: name.into(),
            interval,
            source,
            data,
            status: std::sync::RwLock::new(RefreshStatus::default()),
            in_flight: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Latest successful snapshot, if any refresh has succeeded yet
    pub fn data(&self) -> Option<Arc<S::Output>> {
        self.data.borrow().clone()
    }

    pub fn status(&self) -> RefreshStatus {
        self.status
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Run one refresh. On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<(), UpdateFailed> {
        let _guard = self.in_flight.lock().await;
        let result = self.source.fetch().await;

        let mut status = RefreshStatus {
            last_success_at: self.status().last_success_at,
            ..RefreshStatus::default()
        };
        let outcome = match result {
            Ok(value) => {
                self.data.send_replace(Some(Arc::new(value)));
                status.last_update_success = true;
                status.last_success_at = Some(Utc::now());
                debug!("{}: refresh succeeded", self.name);
                Ok(())
            }
            Err(e) => {
                status.last_error = Some(e.to_string());
                Err(e)
            }
        };
        if let Ok(mut slot) = self.status.write() {
            *slot = status;
        }
        outcome
    }

    /// First refresh during setup; its failure makes the instance not ready
    pub async fn first_refresh(&self) -> Result<(), UpdateFailed> {
        self.refresh().await.map_err(|e| {
            warn!("{}: first refresh failed: {}", self.name, e);
            e
        })
    }

    /// Start the periodic refresh loop
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "Starting {} refresh task (interval: {}s)",
                coordinator.name,
                coordinator.interval.as_secs()
            );
            loop {
                tokio::time::sleep(coordinator.interval).await;
                if let Err(e) = coordinator.refresh().await {
                    warn!("{} refresh error: {}", coordinator.name, e);
                }
            }
        })
    }
}
