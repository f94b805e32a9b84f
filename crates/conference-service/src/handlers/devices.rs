//! Device configuration handlers.
//!
//! - `POST /api/v1/devices` - Save a device selection, creating a conference if needed
//! - `GET /api/v1/conferences/:id/devices` - Merged configurations, one per person
//! - `GET /api/v1/conferences/:id/devices/:name` - One participant's configuration
//! - `GET /api/v1/me/devices` - The caller's distinct rigs

use crate::errors::CsError;
use crate::handlers::conferences::conference_id;
use crate::middleware::Acting;
use crate::models::{ConnectDevicesRequest, ConnectDevicesResponse, DeviceConfiguration};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/devices
#[instrument(skip_all, name = "cs.handlers.connect_devices")]
pub async fn connect_devices(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Json(request): Json<ConnectDevicesRequest>,
) -> Result<(StatusCode, Json<ConnectDevicesResponse>), CsError> {
    let saved = state
        .sessions
        .connect_devices(request, acting.participant())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ConnectDevicesResponse {
            conference_id: saved.conference_id,
        }),
    ))
}

/// Handler for GET /api/v1/conferences/:id/devices
///
/// Members and privileged callers only.
#[instrument(skip_all, name = "cs.handlers.conference_devices", fields(conference_id = %id))]
pub async fn conference_devices(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DeviceConfiguration>>, CsError> {
    let participant = acting.require()?;
    let conference = state.registry.find_by_id(&conference_id(&id)?).await?;
    if !conference.has_member(participant.id) && !participant.is_privileged() {
        return Err(CsError::Forbidden(
            "Only conference members may list devices".to_string(),
        ));
    }

    let merged = state.devices.merge_by_conference(&conference.id).await?;
    Ok(Json(merged))
}

/// Handler for GET /api/v1/conferences/:id/devices/:name
#[instrument(skip_all, name = "cs.handlers.participant_devices", fields(conference_id = %id))]
pub async fn participant_devices(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<DeviceConfiguration>, CsError> {
    let participant = acting.require()?;
    let conference = state.registry.find_by_id(&conference_id(&id)?).await?;
    if !conference.has_member(participant.id) && !participant.is_privileged() {
        return Err(CsError::Forbidden(
            "Only conference members may read devices".to_string(),
        ));
    }

    let configuration = state.devices.config_for(&conference.id, &name).await?;
    Ok(Json(configuration))
}

/// Handler for GET /api/v1/me/devices
#[instrument(skip_all, name = "cs.handlers.my_devices")]
pub async fn my_devices(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
) -> Result<Json<Vec<DeviceConfiguration>>, CsError> {
    let participant = acting.require()?;
    let rigs = state.devices.for_user(&participant.display_name).await?;
    Ok(Json(rigs))
}
