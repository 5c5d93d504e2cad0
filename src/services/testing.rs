/// In-memory logbook used by unit tests
use crate::clients::{LogbookConnector, LogbookSession};
use crate::domain::{Credentials, EntryData, TrackedAircraft};
use crate::errors::{ClientError, ClientResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeState {
    objects: Value,
    bookings: HashMap<String, Value>,
    token: Option<String>,
    failure: Option<String>,
    opened: Vec<Credentials>,
    closed: usize,
    bookings_requested: Vec<String>,
}

pub struct FakeLogbook {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLogbook {
    pub fn new(objects: Value) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(FakeState {
                objects,
                token: Some("fake_token".to_string()),
                ..FakeState::default()
            })),
        })
    }

    pub fn with_two_planes() -> Arc<Self> {
        Self::new(json!({"Object": [
            {"ID": "1", "regnr": "SE-ABC", "model": "Cessna 172"},
            {"ID": "2", "regnr": "SE-DEF", "model": "Piper PA-28"}
        ]}))
    }

    pub fn set_token(&self, token: Option<&str>) {
        self.state.lock().unwrap().token = token.map(str::to_string);
    }

    pub fn set_bookings(&self, aircraft_id: &str, bookings: Value) {
        self.state
            .lock()
            .unwrap()
            .bookings
            .insert(aircraft_id.to_string(), bookings);
    }

    /// Make every remote call fail with this message
    pub fn fail_with(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    pub fn recover(&self) {
        self.state.lock().unwrap().failure = None;
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn opened(&self) -> Vec<Credentials> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn bookings_requested(&self) -> Vec<String> {
        self.state.lock().unwrap().bookings_requested.clone()
    }
}

fn check(state: &Mutex<FakeState>) -> ClientResult<()> {
    match &state.lock().unwrap().failure {
        Some(message) => Err(ClientError::Api(message.clone())),
        None => Ok(()),
    }
}

#[async_trait]
impl LogbookConnector for FakeLogbook {
    async fn open(&self, credentials: &Credentials) -> ClientResult<Box<dyn LogbookSession>> {
        self.state.lock().unwrap().opened.push(credentials.clone());
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl LogbookSession for FakeSession {
    async fn obtain_app_token(&mut self, _app_secret: &str) -> ClientResult<Option<String>> {
        check(&self.state)?;
        Ok(self.state.lock().unwrap().token.clone())
    }

    async fn get_objects(&self) -> ClientResult<Value> {
        check(&self.state)?;
        Ok(self.state.lock().unwrap().objects.clone())
    }

    async fn get_bookings(&self, aircraft_id: &str) -> ClientResult<Value> {
        check(&self.state)?;
        let mut state = self.state.lock().unwrap();
        state.bookings_requested.push(aircraft_id.to_string());
        Ok(state
            .bookings
            .get(aircraft_id)
            .cloned()
            .unwrap_or_else(|| json!({"Booking": []})))
    }

    async fn close(self: Box<Self>) {
        self.state.lock().unwrap().closed += 1;
    }
}

/// Stored entry tracking the given aircraft ids (1 → SE-ABC, 2 → SE-DEF)
pub fn entry(ids: &[&str]) -> EntryData {
    let airplanes = ids
        .iter()
        .map(|id| match *id {
            "1" => TrackedAircraft {
                id: "1".to_string(),
                regnr: "SE-ABC".to_string(),
                title: "SE-ABC (Cessna 172)".to_string(),
            },
            "2" => TrackedAircraft {
                id: "2".to_string(),
                regnr: "SE-DEF".to_string(),
                title: "SE-DEF (Piper PA-28)".to_string(),
            },
            other => TrackedAircraft {
                id: other.to_string(),
                regnr: format!("SE-X{}", other),
                title: format!("SE-X{} (Unknown)", other),
            },
        })
        .collect();
    EntryData {
        username: "test_user".to_string(),
        password: "test_password".to_string(),
        app_token: "fake_token".to_string(),
        airplanes,
    }
}
