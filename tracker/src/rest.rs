use crate::errors::Error;
use crate::model::{DeviceView, NewDevice, Position, UpdateEvent};
use crate::registry::MergeOutcome;
use crate::relay::{apply_event, SharedRegistry};
use crate::validate::validate_device;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesResponse {
    pub data: Vec<DeviceView>,
    pub total: usize,
    pub selected: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SelectedResponse {
    pub selected: Option<DeviceView>,
}

#[derive(Debug, Serialize)]
pub struct TrailResponse {
    pub id: String,
    pub trail: Vec<Position>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsResponse {
    pub any_sos_active: bool,
    pub devices: Vec<DeviceView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub merged: bool,
}

pub fn create_router(registry: SharedRegistry) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/api/v1/devices", get(list_devices).post(add_device))
        .route("/api/v1/devices/selected", get(get_selected))
        .route("/api/v1/devices/:id", get(get_device).delete(remove_device))
        .route("/api/v1/devices/:id/trail", get(get_trail))
        .route("/api/v1/devices/:id/select", post(select_device))
        .route("/api/v1/alerts", get(get_alerts))
        .route("/api/v1/updates", post(post_update))
        .with_state(state)
}

async fn list_devices(State(state): State<AppState>) -> Json<DevicesResponse> {
    let registry = state.registry.read().await;
    let data: Vec<DeviceView> = registry.list_devices().iter().map(|d| d.view()).collect();

    Json(DevicesResponse {
        total: data.len(),
        data,
        selected: registry.selected_id().map(str::to_string),
    })
}

async fn get_selected(State(state): State<AppState>) -> Json<SelectedResponse> {
    let registry = state.registry.read().await;
    Json(SelectedResponse {
        selected: registry.selected().map(|d| d.view()),
    })
}

async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, AppError> {
    let registry = state.registry.read().await;
    let device = registry.get(&id).ok_or(Error::DeviceNotFound(id))?;
    Ok(Json(device.view()))
}

async fn get_trail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TrailResponse>, AppError> {
    let registry = state.registry.read().await;
    let device = registry
        .get(&id)
        .ok_or_else(|| Error::DeviceNotFound(id.clone()))?;

    Ok(Json(TrailResponse {
        trail: device.trail().copied().collect(),
        id,
    }))
}

async fn get_alerts(State(state): State<AppState>) -> Json<AlertsResponse> {
    let registry = state.registry.read().await;
    Json(AlertsResponse {
        any_sos_active: registry.any_sos_active(),
        devices: registry.sos_devices().iter().map(|d| d.view()).collect(),
    })
}

async fn add_device(
    State(state): State<AppState>,
    Json(body): Json<NewDevice>,
) -> Result<(StatusCode, Json<DeviceView>), AppError> {
    let device = body.into_device(Utc::now());
    validate_device(&device)?;

    let view = device.view();
    state.registry.write().await.add_device(device);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn remove_device(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.registry.write().await.remove_device(&id);
    StatusCode::NO_CONTENT
}

async fn select_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, AppError> {
    let mut registry = state.registry.write().await;
    registry.select_device(&id);

    // The registry ignores unknown ids; report them to HTTP callers.
    let device = registry.selected().filter(|d| d.id() == id);
    let device = device.ok_or(Error::DeviceNotFound(id.clone()))?;
    Ok(Json(device.view()))
}

async fn post_update(
    State(state): State<AppState>,
    Json(event): Json<UpdateEvent>,
) -> Result<(StatusCode, Json<UpdateResponse>), AppError> {
    let outcome = apply_event(&state.registry, &event).await?;
    let response = match outcome {
        MergeOutcome::Merged => (StatusCode::OK, Json(UpdateResponse { merged: true })),
        MergeOutcome::UnknownDevice => {
            (StatusCode::NOT_FOUND, Json(UpdateResponse { merged: false }))
        }
    };
    Ok(response)
}

pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("API error: {}", self.error);
            (
                self.status,
                format!("Internal server error: {}", self.error),
            )
                .into_response()
        } else {
            warn!("API request rejected: {}", self.error);
            (self.status, self.error.to_string()).into_response()
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        let status = match error.downcast_ref::<Error>() {
            Some(Error::Validation(_)) | Some(Error::Json(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(Error::DeviceNotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}
