use crate::clients::LogbookConnector;
use crate::config::RefreshIntervals;
use crate::coordinator::{Coordinator, RefreshSource, RefreshStatus};
use crate::domain::{AircraftRecord, Booking, Credentials, EntryData, SensorValue, TrackedAircraft};
use crate::errors::{is_auth_error, ClientError, ClientResult, SetupError, UpdateFailed};
use crate::sensors::{self, SensorDescription, SENSOR_TYPES};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Request, raised by a refresh, that the user re-authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReauthRequest {
    pub username: String,
    pub reason: String,
}

/// Fire-and-forget sender for re-authentication requests
#[derive(Debug, Clone)]
pub struct ReauthRequester {
    username: String,
    tx: mpsc::UnboundedSender<ReauthRequest>,
}

impl ReauthRequester {
    pub fn new(username: impl Into<String>, tx: mpsc::UnboundedSender<ReauthRequest>) -> Self {
        Self {
            username: username.into(),
            tx,
        }
    }

    fn request(&self, reason: String) {
        let request = ReauthRequest {
            username: self.username.clone(),
            reason,
        };
        if self.tx.send(request).is_err() {
            debug!("Re-authentication request dropped, supervisor is gone");
        }
    }
}

/// Session scope shared by both refresh kinds
#[derive(Clone)]
struct RemoteScope {
    connector: Arc<dyn LogbookConnector>,
    credentials: Arc<Credentials>,
    reauth: ReauthRequester,
}

impl RemoteScope {
    async fn objects(&self) -> ClientResult<Value> {
        let session = self.connector.open(&self.credentials).await?;
        let result = session.get_objects().await;
        session.close().await;
        result
    }

    async fn bookings(&self, aircraft_id: &str) -> ClientResult<Value> {
        let session = self.connector.open(&self.credentials).await?;
        let result = session.get_bookings(aircraft_id).await;
        session.close().await;
        result
    }

    fn fail(&self, err: ClientError, context: String) -> UpdateFailed {
        let message = err.to_string();
        if is_auth_error(&message) {
            warn!("Authentication error detected, triggering re-authentication");
            self.reauth.request(message);
            UpdateFailed::AuthenticationFailed
        } else {
            UpdateFailed::Fetch(format!("{}: {}", context, message))
        }
    }
}

/// Hourly fetch of every object on the account
pub struct ObjectsSource {
    scope: RemoteScope,
}

#[async_trait]
impl RefreshSource for ObjectsSource {
    type Output = Vec<AircraftRecord>;

    async fn fetch(&self) -> Result<Vec<AircraftRecord>, UpdateFailed> {
        debug!("Fetching objects for username={}", self.scope.credentials.username);
        let result = self
            .scope
            .objects()
            .await
            .map_err(|e| self.scope.fail(e, "Error fetching objects".to_string()))?;
        let records: Vec<AircraftRecord> = list(&result, "Object")
            .iter()
            .filter_map(AircraftRecord::from_raw)
            .collect();
        debug!("Fetched {} objects", records.len());
        Ok(records)
    }
}

/// Fetch of one aircraft's bookings
pub struct BookingsSource {
    aircraft_id: String,
    scope: RemoteScope,
}

#[async_trait]
impl RefreshSource for BookingsSource {
    type Output = Vec<Booking>;

    async fn fetch(&self) -> Result<Vec<Booking>, UpdateFailed> {
        debug!("Fetching bookings for airplane_id={}", self.aircraft_id);
        let result = self.scope.bookings(&self.aircraft_id).await.map_err(|e| {
            self.scope.fail(
                e,
                format!("Error fetching bookings for airplane_id={}", self.aircraft_id),
            )
        })?;
        let bookings: Vec<Booking> = list(&result, "Booking").iter().map(Booking::from_raw).collect();
        debug!(
            "Fetched {} bookings for airplane_id={}",
            bookings.len(),
            self.aircraft_id
        );
        Ok(bookings)
    }
}

fn list<'a>(result: &'a Value, key: &str) -> &'a [Value] {
    result
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: String,
}

/// One addressable (aircraft, metric) reading
#[derive(Debug, Clone, Serialize)]
pub struct SensorReading {
    pub unique_id: String,
    pub aircraft_id: String,
    #[serde(flatten)]
    pub description: SensorDescription,
    pub available: bool,
    pub state: Option<SensorValue>,
    pub attributes: Map<String, Value>,
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorDiagnostics {
    pub name: String,
    pub has_data: bool,
    #[serde(flatten)]
    pub status: RefreshStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub title: String,
    pub tracked_aircraft: usize,
    pub objects_interval: u64,
    pub bookings_interval: u64,
    pub objects: CoordinatorDiagnostics,
    pub bookings: Vec<CoordinatorDiagnostics>,
}

pub fn unique_id(regnr: &str, key: &str) -> String {
    format!("myweblog_{}_{}", regnr.to_lowercase().replace('-', "_"), key)
}

/// A running configured instance: one objects poll plus one bookings poll
/// per tracked aircraft
pub struct Integration {
    entry: EntryData,
    intervals: RefreshIntervals,
    objects: Arc<Coordinator<ObjectsSource>>,
    bookings: HashMap<String, Arc<Coordinator<BookingsSource>>>,
    tasks: std::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

const OBJECTS_TASK: &str = "objects";

impl Integration {
    /// Set up the instance. Both kinds of first refresh must succeed.
    pub async fn setup(
        entry: EntryData,
        connector: Arc<dyn LogbookConnector>,
        intervals: RefreshIntervals,
        reauth: mpsc::UnboundedSender<ReauthRequest>,
    ) -> Result<Self, SetupError> {
        if entry.username.is_empty() || entry.password.is_empty() {
            return Err(SetupError::InvalidEntry(
                "missing or invalid credentials".to_string(),
            ));
        }

        let mut entry = entry;
        let mut seen = std::collections::HashSet::new();
        entry.airplanes.retain(|plane: &TrackedAircraft| {
            let fresh = seen.insert(plane.id.clone());
            if !fresh {
                warn!("Ignoring duplicate airplane id={} ({})", plane.id, plane.regnr);
            }
            fresh
        });

        let scope = RemoteScope {
            connector,
            credentials: Arc::new(entry.credentials()),
            reauth: ReauthRequester::new(entry.username.clone(), reauth),
        };

        let objects = Coordinator::new(
            "myweblog_airplanes_objects",
            intervals.objects,
            ObjectsSource {
                scope: scope.clone(),
            },
        );
        objects.first_refresh().await?;

        let mut bookings = HashMap::new();
        for airplane in &entry.airplanes {
            info!("Creating sensors for airplane_id={}", airplane.id);
            let coordinator = Coordinator::new(
                format!("myweblog_airplane_{}_bookings", airplane.id),
                intervals.bookings,
                BookingsSource {
                    aircraft_id: airplane.id.clone(),
                    scope: scope.clone(),
                },
            );
            coordinator.first_refresh().await?;
            bookings.insert(airplane.id.clone(), coordinator);
        }

        let mut tasks = HashMap::new();
        tasks.insert(OBJECTS_TASK.to_string(), objects.spawn());
        for (id, coordinator) in &bookings {
            tasks.insert(id.clone(), coordinator.spawn());
        }

        info!(
            "MyWebLog instance for {} loaded with {} aircraft",
            entry.username,
            entry.airplanes.len()
        );
        Ok(Self {
            entry,
            intervals,
            objects,
            bookings,
            tasks: std::sync::Mutex::new(tasks),
        })
    }

    pub fn entry(&self) -> &EntryData {
        &self.entry
    }

    /// Stop every refresh task
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for (name, handle) in tasks.drain() {
                debug!("Stopping refresh task {}", name);
                handle.abort();
            }
        }
    }

    /// Every (aircraft, metric) reading, computed from the current snapshots
    pub fn readings(&self, now: DateTime<Utc>) -> Vec<SensorReading> {
        self.entry
            .airplanes
            .iter()
            .flat_map(|plane| {
                SENSOR_TYPES
                    .iter()
                    .map(move |desc| self.reading_for(plane, desc, now))
            })
            .collect()
    }

    pub fn reading(&self, unique: &str, now: DateTime<Utc>) -> Option<SensorReading> {
        self.entry.airplanes.iter().find_map(|plane| {
            let prefix = unique_id(&plane.regnr, "");
            let desc = unique.strip_prefix(&prefix).and_then(sensors::description)?;
            Some(self.reading_for(plane, desc, now))
        })
    }

    fn reading_for(
        &self,
        plane: &TrackedAircraft,
        desc: &SensorDescription,
        now: DateTime<Utc>,
    ) -> SensorReading {
        let objects = self.objects.data();
        let bookings = self.bookings.get(&plane.id).and_then(|c| c.data());
        let available = objects.is_some() && bookings.is_some();
        let bookings: &[Booking] = bookings.as_deref().map(Vec::as_slice).unwrap_or_default();

        let record = objects
            .as_deref()
            .and_then(|records| records.iter().find(|r| r.id == plane.id));
        let state = match record {
            Some(record) if available => sensors::extract(desc.key, record, bookings, now),
            None if available => {
                warn!("No airplane object found for regnr={}", plane.regnr);
                None
            }
            _ => None,
        };
        let attributes = if available {
            sensors::attributes(desc.key, state.as_ref(), bookings, now)
        } else {
            Map::new()
        };

        SensorReading {
            unique_id: unique_id(&plane.regnr, desc.key),
            aircraft_id: plane.id.clone(),
            description: *desc,
            available,
            state,
            attributes,
            device: DeviceInfo {
                identifier: plane.regnr.clone(),
                name: plane.regnr.clone(),
                manufacturer: "myWebLog",
                model: plane.title.clone(),
            },
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let describe = |name: &str, has_data: bool, status: RefreshStatus| CoordinatorDiagnostics {
            name: name.to_string(),
            has_data,
            status,
        };
        let bookings = self
            .entry
            .airplanes
            .iter()
            .filter_map(|plane| self.bookings.get(&plane.id))
            .map(|c| describe(c.name(), c.data().is_some(), c.status()))
            .collect();

        Diagnostics {
            title: self.entry.title(),
            tracked_aircraft: self.entry.airplanes.len(),
            objects_interval: self.objects.interval().as_secs(),
            bookings_interval: self.intervals.bookings.as_secs(),
            objects: describe(
                self.objects.name(),
                self.objects.data().is_some(),
                self.objects.status(),
            ),
            bookings,
        }
    }

    #[cfg(test)]
    pub(crate) async fn refresh_all(&self) {
        let _ = self.objects.refresh().await;
        for coordinator in self.bookings.values() {
            let _ = coordinator.refresh().await;
        }
    }
}

impl Drop for Integration {
    fn drop(&mut self) {
        self.shutdown();
    }
}
