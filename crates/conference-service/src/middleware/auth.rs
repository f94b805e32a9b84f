//! Participant identification middleware.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! participant id in the `x-participant-id` header. The middleware loads that
//! participant and stores it in request extensions as [`Acting`].

use crate::errors::CsError;
use crate::models::Participant;
use crate::routes::AppState;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
};
use common::types::ParticipantId;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Header carrying the authenticated participant id.
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

/// The participant on whose behalf a request runs, if identified.
#[derive(Debug, Clone, Default)]
pub struct Acting(pub Option<Participant>);

impl Acting {
    /// The identified participant, or `Forbidden`.
    pub fn require(&self) -> Result<&Participant, CsError> {
        self.0
            .as_ref()
            .ok_or_else(|| CsError::Forbidden("Participant identification required".to_string()))
    }

    pub fn participant(&self) -> Option<&Participant> {
        self.0.as_ref()
    }
}

/// Reject requests that do not identify a known participant.
#[instrument(skip_all, name = "cs.middleware.require_participant")]
pub async fn require_participant(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CsError> {
    let participant = identify(&state, req.headers()).await?.ok_or_else(|| {
        tracing::debug!(target: "cs.middleware.auth", "Missing participant header");
        CsError::Forbidden("Participant identification required".to_string())
    })?;

    req.extensions_mut().insert(Acting(Some(participant)));
    Ok(next.run(req).await)
}

/// Identify the participant when the header is present; anonymous otherwise.
#[instrument(skip_all, name = "cs.middleware.optional_participant")]
pub async fn optional_participant(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CsError> {
    let participant = identify(&state, req.headers()).await?;

    req.extensions_mut().insert(Acting(participant));
    Ok(next.run(req).await)
}

async fn identify(state: &AppState, headers: &HeaderMap) -> Result<Option<Participant>, CsError> {
    let Some(raw) = headers.get(PARTICIPANT_HEADER) else {
        return Ok(None);
    };

    let id = raw
        .to_str()
        .ok()
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .map(ParticipantId)
        .ok_or_else(|| {
            tracing::debug!(target: "cs.middleware.auth", "Malformed participant header");
            CsError::ValidationFailed("Malformed participant id".to_string())
        })?;

    match state.identity.participant(id).await {
        Ok(participant) => Ok(Some(participant)),
        Err(CsError::NotFound(_)) => {
            tracing::debug!(target: "cs.middleware.auth", participant_id = %id, "Unknown participant");
            Err(CsError::Forbidden("Unknown participant".to_string()))
        }
        Err(e) => Err(e),
    }
}
