/// HTTP request handlers
use crate::domain::Health;
use crate::errors::{ApiError, ApiResult};
use crate::flow::{FlowInput, FlowKind, FlowManager, FlowResponse};
use crate::services::{Diagnostics, SensorReading, Supervisor};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub flows: Arc<FlowManager>,
}

/// Successful response wrapper
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

#[derive(Serialize)]
pub struct SensorList {
    pub instance: &'static str,
    pub sensors: Vec<SensorReading>,
}

#[derive(Serialize)]
pub struct SensorBody {
    pub sensor: SensorReading,
}

#[derive(Deserialize)]
pub struct StartFlow {
    pub kind: FlowKind,
}

/// Health check handler
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        instance: state.supervisor.state().await.label(),
        reauth_required: state.supervisor.reauth_required(),
        now: Utc::now(),
    })
}

/// Every sensor of the loaded instance
pub async fn list_sensors(State(state): State<AppState>) -> Json<SuccessResponse<SensorList>> {
    let instance = state.supervisor.state().await;
    let sensors = match state.supervisor.integration().await {
        Some(integration) => integration.readings(Utc::now()),
        None => Vec::new(),
    };
    Json(SuccessResponse::new(SensorList {
        instance: instance.label(),
        sensors,
    }))
}

pub async fn get_sensor(
    Path(unique_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SuccessResponse<SensorBody>>> {
    let sensor = state
        .supervisor
        .integration()
        .await
        .and_then(|integration| integration.reading(&unique_id, Utc::now()))
        .ok_or_else(|| ApiError::NotFound(format!("sensor {}", unique_id)))?;
    Ok(Json(SuccessResponse::new(SensorBody { sensor })))
}

/// Poller status of the loaded instance
pub async fn diagnostics(
    State(state): State<AppState>,
) -> ApiResult<Json<SuccessResponse<Diagnostics>>> {
    let integration = state
        .supervisor
        .integration()
        .await
        .ok_or_else(|| ApiError::NotFound("no instance loaded".to_string()))?;
    Ok(Json(SuccessResponse::new(integration.diagnostics())))
}

pub async fn start_flow(
    State(state): State<AppState>,
    Json(body): Json<StartFlow>,
) -> ApiResult<Json<SuccessResponse<FlowResponse>>> {
    let response = state.flows.start(body.kind).await?;
    Ok(Json(SuccessResponse::new(response)))
}

pub async fn step_flow(
    Path(flow_id): Path<u64>,
    State(state): State<AppState>,
    Json(input): Json<FlowInput>,
) -> ApiResult<Json<SuccessResponse<FlowResponse>>> {
    let response = state.flows.step(flow_id, input).await?;
    Ok(Json(SuccessResponse::new(response)))
}
