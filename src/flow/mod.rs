/// Setup, re-authentication and options flows
use crate::domain::{entry_title, EntryData, TrackedAircraft};
use crate::errors::{codes, FlowError, StoreError, ValidationError};
use crate::repo::EntryStore;
use crate::services::{CredentialValidator, ReloadHandle, Validated};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub const STEP_USER: &str = "user";
pub const STEP_SELECT_AIRPLANE: &str = "select_airplane";
pub const STEP_REAUTH: &str = "reauth_confirm";
pub const STEP_OPTIONS: &str = "init";

/// Flows untouched for this long are dropped
pub const FLOW_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Most in-progress flows kept at once; the least recently used goes first
pub const MAX_FLOWS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    User,
    Reauth,
    Options,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsPurpose {
    Setup,
    Reauth,
}

/// Where a flow currently stands, with everything gathered so far
#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    AwaitingCredentials {
        purpose: CredentialsPurpose,
    },
    AwaitingAircraftSelection {
        username: String,
        password: String,
        app_token: String,
        airplanes: Vec<TrackedAircraft>,
    },
    AwaitingOptionsSelection {
        selectable: Vec<TrackedAircraft>,
        /// None when the refresh failed and the stored list is shown
        app_token: Option<String>,
        current: Vec<String>,
    },
    Complete,
    Aborted,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Complete | FlowState::Aborted)
    }
}

/// Form data submitted by the user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FlowInput {
    Credentials { username: String, password: String },
    Selection { airplanes: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// What the user sees after a step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        step_id: &'static str,
        errors: BTreeMap<&'static str, &'static str>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        options: Vec<SelectOption>,
        #[serde(skip_serializing_if = "Map::is_empty")]
        defaults: Map<String, Value>,
    },
    CreateEntry {
        title: String,
        data: EntryData,
    },
    Abort {
        reason: &'static str,
    },
}

impl FlowResult {
    fn form(step_id: &'static str) -> Self {
        FlowResult::Form {
            step_id,
            errors: BTreeMap::new(),
            options: Vec::new(),
            defaults: Map::new(),
        }
    }

    fn with_error(mut self, code: &'static str) -> Self {
        if let FlowResult::Form { errors, .. } = &mut self {
            errors.insert("base", code);
        }
        self
    }

    fn with_options(mut self, airplanes: &[TrackedAircraft]) -> Self {
        if let FlowResult::Form { options, .. } = &mut self {
            *options = airplanes
                .iter()
                .map(|p| SelectOption {
                    value: p.regnr.clone(),
                    label: p.title.clone(),
                })
                .collect();
        }
        self
    }

    fn with_default(mut self, key: &str, value: Value) -> Self {
        if let FlowResult::Form { defaults, .. } = &mut self {
            defaults.insert(key.to_string(), value);
        }
        self
    }
}

/// Result of one flow step
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: FlowState,
    pub result: FlowResult,
}

impl Transition {
    fn stay(state: FlowState, result: FlowResult) -> Self {
        Self { state, result }
    }
}

/// Transition logic shared by every flow kind.
///
/// A flow is a `FlowState` value passed through `advance` together with the
/// user's input; each call returns the next state and what to show the user.
#[derive(Clone)]
pub struct ConfigFlow {
    validator: CredentialValidator,
    store: Arc<EntryStore>,
    reload: ReloadHandle,
}

impl ConfigFlow {
    pub fn new(validator: CredentialValidator, store: Arc<EntryStore>, reload: ReloadHandle) -> Self {
        Self {
            validator,
            store,
            reload,
        }
    }

    pub fn start_user(&self) -> Transition {
        Transition::stay(
            FlowState::AwaitingCredentials {
                purpose: CredentialsPurpose::Setup,
            },
            FlowResult::form(STEP_USER),
        )
    }

    pub async fn start_reauth(&self) -> Result<Transition, FlowError> {
        let entry = self
            .store
            .get()
            .await
            .ok_or(FlowError::NotConfigured("re-authenticate"))?;
        Ok(Transition::stay(
            FlowState::AwaitingCredentials {
                purpose: CredentialsPurpose::Reauth,
            },
            FlowResult::form(STEP_REAUTH).with_default("username", Value::from(entry.username)),
        ))
    }

    /// Open the options form, refreshing the selectable aircraft with the
    /// stored credentials and falling back to the stored list on failure
    pub async fn start_options(&self) -> Result<Transition, FlowError> {
        let entry = self
            .store
            .get()
            .await
            .ok_or(FlowError::NotConfigured("edit options"))?;

        let (selectable, app_token) = match self.validator.validate(&entry.username, &entry.password).await {
            Ok(Validated {
                airplanes,
                app_token,
            }) => (airplanes, Some(app_token)),
            Err(e) => {
                warn!("Could not refresh aircraft list, using stored selection: {}", e);
                (entry.airplanes.clone(), None)
            }
        };
        let current: Vec<String> = entry.airplanes.iter().map(|p| p.regnr.clone()).collect();

        let result = options_form(&selectable, &current);
        Ok(Transition::stay(
            FlowState::AwaitingOptionsSelection {
                selectable,
                app_token,
                current,
            },
            result,
        ))
    }

    pub async fn advance(&self, state: FlowState, input: FlowInput) -> Result<Transition, FlowError> {
        match (state, input) {
            (FlowState::AwaitingCredentials { purpose }, FlowInput::Credentials { username, password }) => {
                self.credentials_step(purpose, username, password).await
            }
            (
                FlowState::AwaitingAircraftSelection {
                    username,
                    password,
                    app_token,
                    airplanes,
                },
                FlowInput::Selection { airplanes: chosen },
            ) => {
                let selected = select(&airplanes, &chosen);
                let entry = EntryData {
                    username,
                    password,
                    app_token,
                    airplanes: selected,
                };
                let title = entry_title(&entry.username, entry.airplanes.len());
                if let Err(e) = self.store.replace(entry.clone()).await {
                    let result = FlowResult::form(STEP_SELECT_AIRPLANE)
                        .with_options(&airplanes)
                        .with_error(unexpected(e));
                    return Ok(Transition::stay(
                        FlowState::AwaitingAircraftSelection {
                            username: entry.username,
                            password: entry.password,
                            app_token: entry.app_token,
                            airplanes,
                        },
                        result,
                    ));
                }
                info!("Created entry {}", title);
                self.reload.request_reload();
                Ok(Transition::stay(
                    FlowState::Complete,
                    FlowResult::CreateEntry { title, data: entry },
                ))
            }
            (
                FlowState::AwaitingOptionsSelection {
                    selectable,
                    app_token,
                    current,
                },
                FlowInput::Selection { airplanes: chosen },
            ) => {
                let selected = select(&selectable, &chosen);
                if selected.is_empty() {
                    let result = options_form(&selectable, &current)
                        .with_error(codes::NO_AIRPLANES_SELECTED);
                    return Ok(Transition::stay(
                        FlowState::AwaitingOptionsSelection {
                            selectable,
                            app_token,
                            current,
                        },
                        result,
                    ));
                }

                let token = app_token.clone();
                let updated = match self
                    .store
                    .update(|entry| {
                        entry.airplanes = selected;
                        if let Some(token) = token {
                            entry.app_token = token;
                        }
                    })
                    .await
                {
                    Ok(updated) => updated,
                    Err(e) => {
                        let result = options_form(&selectable, &current).with_error(unexpected(e));
                        return Ok(Transition::stay(
                            FlowState::AwaitingOptionsSelection {
                                selectable,
                                app_token,
                                current,
                            },
                            result,
                        ));
                    }
                };
                info!(
                    "Updated options for {}: {} aircraft",
                    updated.username,
                    updated.airplanes.len()
                );
                self.reload.request_reload();
                Ok(Transition::stay(
                    FlowState::Complete,
                    FlowResult::CreateEntry {
                        title: updated.title(),
                        data: updated,
                    },
                ))
            }
            (state, _) => Err(FlowError::UnexpectedInput {
                step: step_of(&state),
            }),
        }
    }

    async fn credentials_step(
        &self,
        purpose: CredentialsPurpose,
        username: String,
        password: String,
    ) -> Result<Transition, FlowError> {
        let step_id = match purpose {
            CredentialsPurpose::Setup => STEP_USER,
            CredentialsPurpose::Reauth => STEP_REAUTH,
        };
        let state = FlowState::AwaitingCredentials { purpose };

        let validated = match self.validator.validate(&username, &password).await {
            Ok(validated) => validated,
            Err(e) => {
                if let ValidationError::Unknown(inner) = &e {
                    error!("Unexpected exception: {:?}", inner);
                } else {
                    warn!("Credential validation failed: {}", e);
                }
                let mut form = FlowResult::form(step_id).with_error(e.code());
                if purpose == CredentialsPurpose::Reauth {
                    form = form.with_default("username", Value::from(username));
                }
                return Ok(Transition::stay(state, form));
            }
        };

        match purpose {
            CredentialsPurpose::Setup => {
                let result = FlowResult::form(STEP_SELECT_AIRPLANE).with_options(&validated.airplanes);
                Ok(Transition::stay(
                    FlowState::AwaitingAircraftSelection {
                        username,
                        password,
                        app_token: validated.app_token,
                        airplanes: validated.airplanes,
                    },
                    result,
                ))
            }
            CredentialsPurpose::Reauth => {
                let shown = username.clone();
                let saved = self
                    .store
                    .update(|entry| {
                        entry.username = username;
                        entry.password = password;
                        entry.app_token = validated.app_token;
                    })
                    .await;
                if let Err(e) = saved {
                    let form = FlowResult::form(STEP_REAUTH)
                        .with_error(unexpected(e))
                        .with_default("username", Value::from(shown));
                    return Ok(Transition::stay(state, form));
                }
                self.reload.request_reload();
                Ok(Transition::stay(
                    FlowState::Aborted,
                    FlowResult::Abort {
                        reason: codes::REAUTH_SUCCESSFUL,
                    },
                ))
            }
        }
    }
}

/// Log a local failure in full and return the generic form error code
fn unexpected(err: StoreError) -> &'static str {
    let err = ValidationError::from(anyhow::Error::from(err));
    error!("Unexpected exception: {:?}", err);
    err.code()
}

fn options_form(selectable: &[TrackedAircraft], current: &[String]) -> FlowResult {
    let defaults: Vec<Value> = current
        .iter()
        .filter(|regnr| selectable.iter().any(|p| &p.regnr == *regnr))
        .map(|regnr| Value::from(regnr.clone()))
        .collect();
    FlowResult::form(STEP_OPTIONS)
        .with_options(selectable)
        .with_default("airplanes", Value::Array(defaults))
}

/// Aircraft whose registration was chosen, in the order they were offered
fn select(offered: &[TrackedAircraft], chosen: &[String]) -> Vec<TrackedAircraft> {
    let chosen: HashSet<&str> = chosen.iter().map(String::as_str).collect();
    offered
        .iter()
        .filter(|p| chosen.contains(p.regnr.as_str()))
        .cloned()
        .collect()
}

fn step_of(state: &FlowState) -> &'static str {
    match state {
        FlowState::AwaitingCredentials {
            purpose: CredentialsPurpose::Setup,
        } => STEP_USER,
        FlowState::AwaitingCredentials {
            purpose: CredentialsPurpose::Reauth,
        } => STEP_REAUTH,
        FlowState::AwaitingAircraftSelection { .. } => STEP_SELECT_AIRPLANE,
        FlowState::AwaitingOptionsSelection { .. } => STEP_OPTIONS,
        FlowState::Complete => "complete",
        FlowState::Aborted => "aborted",
    }
}

/// Flow started or advanced through the manager
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowResponse {
    pub flow_id: u64,
    pub result: FlowResult,
}

/// Keeps in-progress flows between user interactions
pub struct FlowManager {
    flow: ConfigFlow,
    next_id: AtomicU64,
    flows: Mutex<HashMap<u64, (Instant, FlowState)>>,
}

impl FlowManager {
    pub fn new(flow: ConfigFlow) -> Self {
        Self {
            flow,
            next_id: AtomicU64::new(1),
            flows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(&self, kind: FlowKind) -> Result<FlowResponse, FlowError> {
        let transition = match kind {
            FlowKind::User => self.flow.start_user(),
            FlowKind::Reauth => self.flow.start_reauth().await?,
            FlowKind::Options => self.flow.start_options().await?,
        };
        let flow_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(self.keep(flow_id, transition))
    }

    pub async fn step(&self, flow_id: u64, input: FlowInput) -> Result<FlowResponse, FlowError> {
        let state = self
            .flows
            .lock()
            .ok()
            .and_then(|mut flows| flows.remove(&flow_id))
            .filter(|(touched, _)| touched.elapsed() <= FLOW_IDLE_TIMEOUT)
            .map(|(_, state)| state)
            .ok_or(FlowError::UnknownFlow(flow_id))?;

        match self.flow.advance(state.clone(), input).await {
            Ok(transition) => Ok(self.keep(flow_id, transition)),
            Err(e) => {
                self.put(flow_id, state);
                Err(e)
            }
        }
    }

    fn keep(&self, flow_id: u64, transition: Transition) -> FlowResponse {
        if !transition.state.is_terminal() {
            self.put(flow_id, transition.state);
        }
        FlowResponse {
            flow_id,
            result: transition.result,
        }
    }

    fn put(&self, flow_id: u64, state: FlowState) {
        let Ok(mut flows) = self.flows.lock() else {
            return;
        };
        let now = Instant::now();
        flows.retain(|id, (touched, _)| {
            let fresh = now.duration_since(*touched) <= FLOW_IDLE_TIMEOUT;
            if !fresh {
                info!("Dropping abandoned flow {}", id);
            }
            fresh
        });
        while flows.len() >= MAX_FLOWS && !flows.contains_key(&flow_id) {
            let Some(oldest) = flows
                .iter()
                .min_by_key(|(id, (touched, _))| (*touched, **id))
                .map(|(id, _)| *id)
            else {
                break;
            };
            warn!("Too many open flows, dropping flow {}", oldest);
            flows.remove(&oldest);
        }
        flows.insert(flow_id, (now, state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefreshIntervals;
    use crate::services::testing::{entry, FakeLogbook};
    use crate::services::Supervisor;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        fake: Arc<FakeLogbook>,
        store: Arc<EntryStore>,
        flow: ConfigFlow,
        _dir: TempDir,
    }

    async fn harness(stored: Option<EntryData>) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EntryStore::open(dir.path().join("entry.json")).await.unwrap());
        if let Some(stored) = stored {
            store.replace(stored).await.unwrap();
        }
        let fake = FakeLogbook::with_two_planes();
        let supervisor = Supervisor::new(
            Arc::clone(&store),
            fake.clone(),
            RefreshIntervals::default(),
            Duration::from_secs(60),
        );
        let flow = ConfigFlow::new(
            CredentialValidator::new(fake.clone(), "secret"),
            Arc::clone(&store),
            supervisor.reload_handle(),
        );
        Harness {
            fake,
            store,
            flow,
            _dir: dir,
        }
    }

    fn credentials(username: &str, password: &str) -> FlowInput {
        FlowInput::Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn selection(regnrs: &[&str]) -> FlowInput {
        FlowInput::Selection {
            airplanes: regnrs.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Make every later store write fail
    fn break_store(store: &EntryStore) {
        std::fs::create_dir(store.path().with_extension("json.tmp")).unwrap();
    }

    fn base_error(result: &FlowResult) -> Option<&'static str> {
        match result {
            FlowResult::Form { errors, .. } => errors.get("base").copied(),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_user_flow_end_to_end() {
        let h = harness(None).await;
        let start = h.flow.start_user();
        assert_eq!(start.result, FlowResult::form(STEP_USER));

        let step = h
            .flow
            .advance(start.state, credentials("test_user", "test_password"))
            .await
            .unwrap();
        let FlowResult::Form { step_id, options, .. } = &step.result else {
            panic!("expected selection form");
        };
        assert_eq!(*step_id, STEP_SELECT_AIRPLANE);
        assert_eq!(options.len(), 2);
        assert_eq!(options[1].label, "SE-DEF (Piper PA-28)");

        let done = h.flow.advance(step.state, selection(&["SE-ABC"])).await.unwrap();
        assert_eq!(done.state, FlowState::Complete);
        let expected = EntryData {
            username: "test_user".to_string(),
            password: "test_password".to_string(),
            app_token: "fake_token".to_string(),
            airplanes: vec![TrackedAircraft {
                id: "1".to_string(),
                regnr: "SE-ABC".to_string(),
                title: "SE-ABC (Cessna 172)".to_string(),
            }],
        };
        assert_eq!(
            done.result,
            FlowResult::CreateEntry {
                title: "MyWeblog (test_user - 1 plane)".to_string(),
                data: expected.clone(),
            }
        );
        assert_eq!(h.store.get().await, Some(expected));
    }

    #[tokio::test]
    async fn test_selection_keeps_offered_order() {
        let h = harness(None).await;
        let step = h
            .flow
            .advance(h.flow.start_user().state, credentials("u", "p"))
            .await
            .unwrap();
        let done = h
            .flow
            .advance(step.state, selection(&["SE-DEF", "SE-ABC", "SE-NOPE"]))
            .await
            .unwrap();
        let FlowResult::CreateEntry { title, data } = done.result else {
            panic!("expected entry");
        };
        assert_eq!(title, "MyWeblog (u - 2 planes)");
        let regnrs: Vec<_> = data.airplanes.iter().map(|p| p.regnr.as_str()).collect();
        assert_eq!(regnrs, ["SE-ABC", "SE-DEF"]);
    }

    #[tokio::test]
    async fn test_invalid_auth_shows_form_again() {
        let h = harness(None).await;
        h.fake.fail_with("Invalid credentials");
        let step = h
            .flow
            .advance(h.flow.start_user().state, credentials("u", "bad"))
            .await
            .unwrap();
        assert_eq!(base_error(&step.result), Some(codes::INVALID_AUTH));
        assert_eq!(
            step.state,
            FlowState::AwaitingCredentials {
                purpose: CredentialsPurpose::Setup
            }
        );
    }

    #[tokio::test]
    async fn test_cannot_connect_shows_form_again() {
        let h = harness(None).await;
        h.fake.fail_with("Connection timeout");
        let step = h
            .flow
            .advance(h.flow.start_user().state, credentials("u", "p"))
            .await
            .unwrap();
        assert_eq!(base_error(&step.result), Some(codes::CANNOT_CONNECT));
    }

    #[tokio::test]
    async fn test_wrong_input_for_step() {
        let h = harness(None).await;
        let err = h
            .flow
            .advance(h.flow.start_user().state, selection(&["SE-ABC"]))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnexpectedInput { step: STEP_USER }));
    }

    #[tokio::test]
    async fn test_reauth_updates_credentials_only() {
        let mut stored = entry(&["1"]);
        stored.app_token = "stale".to_string();
        let h = harness(Some(stored)).await;

        let start = h.flow.start_reauth().await.unwrap();
        let FlowResult::Form { step_id, defaults, .. } = &start.result else {
            panic!("expected form");
        };
        assert_eq!(*step_id, STEP_REAUTH);
        assert_eq!(defaults.get("username"), Some(&json!("test_user")));

        let done = h
            .flow
            .advance(start.state, credentials("test_user", "new_password"))
            .await
            .unwrap();
        assert_eq!(
            done.result,
            FlowResult::Abort {
                reason: codes::REAUTH_SUCCESSFUL
            }
        );
        assert_eq!(done.state, FlowState::Aborted);

        let saved = h.store.get().await.unwrap();
        assert_eq!(saved.password, "new_password");
        assert_eq!(saved.app_token, "fake_token");
        assert_eq!(saved.airplanes, entry(&["1"]).airplanes);
    }

    #[tokio::test]
    async fn test_reauth_failure_keeps_store() {
        let h = harness(Some(entry(&["1"]))).await;
        h.fake.fail_with("403 Forbidden");
        let start = h.flow.start_reauth().await.unwrap();
        let step = h
            .flow
            .advance(start.state, credentials("test_user", "wrong"))
            .await
            .unwrap();
        assert_eq!(base_error(&step.result), Some(codes::INVALID_AUTH));
        assert_eq!(h.store.get().await, Some(entry(&["1"])));
    }

    #[tokio::test]
    async fn test_reauth_store_failure_shows_unknown() {
        let h = harness(Some(entry(&["1"]))).await;
        let start = h.flow.start_reauth().await.unwrap();
        break_store(&h.store);

        let step = h
            .flow
            .advance(start.state.clone(), credentials("test_user", "new_password"))
            .await
            .unwrap();
        assert_eq!(step.state, start.state);
        let FlowResult::Form { step_id, defaults, .. } = &step.result else {
            panic!("expected form");
        };
        assert_eq!(*step_id, STEP_REAUTH);
        assert_eq!(defaults.get("username"), Some(&json!("test_user")));
        assert_eq!(base_error(&step.result), Some(codes::UNKNOWN));
        assert_eq!(h.store.get().await, Some(entry(&["1"])));
    }

    #[tokio::test]
    async fn test_create_entry_store_failure_shows_unknown() {
        let h = harness(None).await;
        let start = h.flow.start_user();
        let pick = h
            .flow
            .advance(start.state, credentials("test_user", "test_password"))
            .await
            .unwrap();
        break_store(&h.store);

        let step = h
            .flow
            .advance(pick.state.clone(), selection(&["SE-ABC"]))
            .await
            .unwrap();
        assert_eq!(step.state, pick.state);
        let FlowResult::Form { step_id, options, .. } = &step.result else {
            panic!("expected form");
        };
        assert_eq!(*step_id, STEP_SELECT_AIRPLANE);
        assert_eq!(options.len(), 2);
        assert_eq!(base_error(&step.result), Some(codes::UNKNOWN));
        assert_eq!(h.store.get().await, None);
    }

    #[tokio::test]
    async fn test_options_store_failure_shows_unknown() {
        let h = harness(Some(entry(&["1"]))).await;
        let start = h.flow.start_options().await.unwrap();
        break_store(&h.store);

        let step = h
            .flow
            .advance(start.state.clone(), selection(&["SE-DEF"]))
            .await
            .unwrap();
        assert_eq!(step.state, start.state);
        assert_eq!(base_error(&step.result), Some(codes::UNKNOWN));
        assert_eq!(h.store.get().await, Some(entry(&["1"])));
    }

    #[tokio::test]
    async fn test_reauth_requires_entry() {
        let h = harness(None).await;
        assert!(matches!(
            h.flow.start_reauth().await,
            Err(FlowError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_options_prepopulates_and_replaces_selection() {
        let mut stored = entry(&["1"]);
        stored.app_token = "stale".to_string();
        let h = harness(Some(stored)).await;

        let start = h.flow.start_options().await.unwrap();
        let FlowResult::Form { step_id, options, defaults, .. } = &start.result else {
            panic!("expected form");
        };
        assert_eq!(*step_id, STEP_OPTIONS);
        assert_eq!(options.len(), 2);
        assert_eq!(defaults.get("airplanes"), Some(&json!(["SE-ABC"])));
        // validated with the stored credentials
        assert_eq!(h.fake.opened()[0].username, "test_user");

        let done = h.flow.advance(start.state, selection(&["SE-DEF"])).await.unwrap();
        assert_eq!(done.state, FlowState::Complete);
        let saved = h.store.get().await.unwrap();
        assert_eq!(saved.airplanes, entry(&["2"]).airplanes);
        assert_eq!(saved.app_token, "fake_token");
    }

    #[tokio::test]
    async fn test_options_empty_selection_is_rejected() {
        let h = harness(Some(entry(&["1"]))).await;
        let start = h.flow.start_options().await.unwrap();

        let step = h.flow.advance(start.state.clone(), selection(&[])).await.unwrap();
        assert_eq!(base_error(&step.result), Some(codes::NO_AIRPLANES_SELECTED));
        assert_eq!(step.state, start.state);
        assert_eq!(h.store.get().await, Some(entry(&["1"])));
    }

    #[tokio::test]
    async fn test_options_fall_back_to_stored_list() {
        let mut stored = entry(&["1", "2"]);
        stored.app_token = "kept".to_string();
        let h = harness(Some(stored)).await;
        h.fake.fail_with("Network error");

        let start = h.flow.start_options().await.unwrap();
        let FlowResult::Form { options, errors, .. } = &start.result else {
            panic!("expected form");
        };
        assert!(errors.is_empty());
        assert_eq!(options.len(), 2);

        let done = h.flow.advance(start.state, selection(&["SE-ABC"])).await.unwrap();
        assert_eq!(done.state, FlowState::Complete);
        let saved = h.store.get().await.unwrap();
        assert_eq!(saved.airplanes, entry(&["1"]).airplanes);
        assert_eq!(saved.app_token, "kept");
    }

    #[tokio::test]
    async fn test_manager_tracks_flows() {
        let h = harness(None).await;
        let manager = FlowManager::new(h.flow.clone());

        let started = manager.start(FlowKind::User).await.unwrap();
        let id = started.flow_id;

        // a mismatched step leaves the flow in place
        assert!(manager.step(id, selection(&["SE-ABC"])).await.is_err());

        let step = manager.step(id, credentials("u", "p")).await.unwrap();
        assert_eq!(step.flow_id, id);
        let done = manager.step(id, selection(&["SE-ABC"])).await.unwrap();
        assert!(matches!(done.result, FlowResult::CreateEntry { .. }));

        assert!(matches!(
            manager.step(id, selection(&["SE-ABC"])).await,
            Err(FlowError::UnknownFlow(_))
        ));
    }

    #[tokio::test]
    async fn test_manager_drops_idle_flows() {
        let h = harness(None).await;
        let manager = FlowManager::new(h.flow.clone());
        tokio::time::pause();

        let stale = manager.start(FlowKind::User).await.unwrap().flow_id;
        let kept = manager.start(FlowKind::User).await.unwrap().flow_id;
        tokio::time::advance(FLOW_IDLE_TIMEOUT / 2).await;
        // touching a flow keeps it alive
        let step = manager.step(kept, credentials("u", "p")).await.unwrap();
        assert_eq!(step.flow_id, kept);

        tokio::time::advance(FLOW_IDLE_TIMEOUT / 2 + Duration::from_secs(1)).await;
        assert!(matches!(
            manager.step(stale, credentials("u", "p")).await,
            Err(FlowError::UnknownFlow(id)) if id == stale
        ));
        assert!(matches!(
            manager.step(kept, credentials("u", "p")).await,
            Err(FlowError::UnexpectedInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_manager_caps_open_flows() {
        let h = harness(None).await;
        let manager = FlowManager::new(h.flow.clone());

        let first = manager.start(FlowKind::User).await.unwrap().flow_id;
        for _ in 0..MAX_FLOWS {
            manager.start(FlowKind::User).await.unwrap();
        }
        assert_eq!(manager.flows.lock().unwrap().len(), MAX_FLOWS);
        assert!(matches!(
            manager.step(first, credentials("u", "p")).await,
            Err(FlowError::UnknownFlow(_))
        ));
    }

    #[test]
    fn test_flow_input_parsing() {
        let creds: FlowInput = serde_json::from_value(json!({"username": "u", "password": "p"})).unwrap();
        assert_eq!(creds, credentials("u", "p"));
        let pick: FlowInput = serde_json::from_value(json!({"airplanes": ["SE-ABC"]})).unwrap();
        assert_eq!(pick, selection(&["SE-ABC"]));
    }

    #[test]
    fn test_form_serialization() {
        let form = FlowResult::form(STEP_USER).with_error(codes::CANNOT_CONNECT);
        assert_eq!(
            serde_json::to_value(&form).unwrap(),
            json!({"type": "form", "step_id": "user", "errors": {"base": "cannot_connect"}})
        );
    }
}
