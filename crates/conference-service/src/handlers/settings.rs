//! Durable settings handlers.
//!
//! - `GET /api/v1/settings/:key` - Read a setting
//! - `PUT /api/v1/settings/:key` - Update a setting (privileged)
//!
//! The reclamation intervals are read from here on every cycle.

use crate::errors::CsError;
use crate::middleware::Acting;
use crate::models::{
    SettingResponse, UpdateSettingRequest, CONFERENCE_INTERVAL_SETTING, USER_INTERVAL_SETTING,
};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Reject values the scheduler would ignore.
fn validate_setting(key: &str, value: &str) -> Result<(), CsError> {
    if key == CONFERENCE_INTERVAL_SETTING || key == USER_INTERVAL_SETTING {
        match value.trim().parse::<u64>() {
            Ok(millis) if millis > 0 => {}
            _ => {
                return Err(CsError::ValidationFailed(format!(
                    "{} must be a positive number of milliseconds",
                    key
                )))
            }
        }
    }
    Ok(())
}

/// Handler for GET /api/v1/settings/:key
#[instrument(skip_all, name = "cs.handlers.get_setting", fields(key = %key))]
pub async fn get_setting(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(key): Path<String>,
) -> Result<Json<SettingResponse>, CsError> {
    acting.require()?;
    let value = state.store.get_setting(&key).await?;
    Ok(Json(SettingResponse { key, value }))
}

/// Handler for PUT /api/v1/settings/:key
#[instrument(skip_all, name = "cs.handlers.update_setting", fields(key = %key))]
pub async fn update_setting(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(key): Path<String>,
    Json(request): Json<UpdateSettingRequest>,
) -> Result<Json<SettingResponse>, CsError> {
    let participant = acting.require()?;
    if !participant.is_privileged() {
        return Err(CsError::Forbidden(
            "Updating settings requires an administrative role".to_string(),
        ));
    }
    validate_setting(&key, &request.value)?;

    let value = request.value.trim().to_string();
    state.store.put_setting(&key, &value).await?;

    tracing::info!(
        target: "cs.handlers.settings",
        key = %key,
        participant_id = %participant.id,
        "Setting updated"
    );
    Ok(Json(SettingResponse {
        key,
        value: Some(value),
    }))
}
