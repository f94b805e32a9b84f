//! Conference handlers.
//!
//! - `POST /api/v1/conferences` - Create a conference (anonymous or identified)
//! - `GET /api/v1/conferences/:id` - Conference details
//! - `POST /api/v1/conferences/:id/join` - Join (password gated)
//! - `POST /api/v1/conferences/:id/leave` - Close one session
//! - `PUT /api/v1/conferences/:id/password` - Set or clear the password
//! - `GET /api/v1/conferences/:id/joins` - Caller's session count
//! - `DELETE /api/v1/conferences/:id/members/:name` - Forget a past conference
//! - `GET /api/v1/conferences/search` - Search by id fragment
//! - `GET /api/v1/admin/conferences` - Every conference (privileged)
//! - `GET /api/v1/me/conferences` - Past conferences
//! - `GET /api/v1/me/active` - Conferences with a live session

use crate::errors::CsError;
use crate::middleware::Acting;
use crate::models::{
    ChangePasswordRequest, ConferenceResponse, CreateConferenceRequest, CreateConferenceResponse,
    JoinConferenceRequest, JoinConferenceResponse, JoinCountResponse, ParticipantResponse,
    SearchQuery,
};
use crate::routes::AppState;
use crate::services::Identity;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::ConferenceId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// Parse a conference id from the path. Malformed ids cannot exist, so they
/// are reported as not found.
pub(crate) fn conference_id(raw: &str) -> Result<ConferenceId, CsError> {
    ConferenceId::parse(raw).map_err(|_| CsError::NotFound("Conference not found".to_string()))
}

/// Handler for POST /api/v1/conferences
///
/// An anonymous caller must supply `displayName`; a temporary participant is
/// minted for them and returned so the client can identify itself later.
#[instrument(skip_all, name = "cs.handlers.create_conference")]
pub async fn create_conference(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Json(request): Json<CreateConferenceRequest>,
) -> Result<(StatusCode, Json<CreateConferenceResponse>), CsError> {
    let display_name = match (acting.participant(), request.display_name.as_deref()) {
        (Some(participant), _) => participant.display_name.clone(),
        (None, Some(name)) => name.to_string(),
        (None, None) => {
            return Err(CsError::ValidationFailed(
                "displayName is required for anonymous callers".to_string(),
            ))
        }
    };

    let (conference, participant) = state
        .registry
        .create(acting.participant(), &display_name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateConferenceResponse {
            conference_id: conference.id,
            participant: ParticipantResponse::from(&participant),
        }),
    ))
}

/// Handler for GET /api/v1/conferences/:id
#[instrument(skip_all, name = "cs.handlers.get_conference", fields(conference_id = %id))]
pub async fn get_conference(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConferenceResponse>, CsError> {
    let conference = state.registry.find_by_id(&conference_id(&id)?).await?;
    Ok(Json(ConferenceResponse::from(&conference)))
}

/// Handler for POST /api/v1/conferences/:id/join
///
/// Identified callers join as themselves; anonymous callers join by
/// `displayName`. Returns the conference, the participant, the caller's
/// session count and the decrypted chat history.
#[instrument(skip_all, name = "cs.handlers.join_conference", fields(conference_id = %id))]
pub async fn join_conference(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<String>,
    Json(request): Json<JoinConferenceRequest>,
) -> Result<Json<JoinConferenceResponse>, CsError> {
    let conference_id = conference_id(&id)?;

    let identity = match (acting.participant(), request.display_name) {
        (Some(participant), _) => Identity::Authenticated(participant.id),
        (None, Some(name)) => Identity::Named(name),
        (None, None) => {
            return Err(CsError::ValidationFailed(
                "displayName is required for anonymous callers".to_string(),
            ))
        }
    };

    let joined = state
        .sessions
        .join(&conference_id, &identity, request.password.as_ref())
        .await?;

    Ok(Json(JoinConferenceResponse {
        conference: ConferenceResponse::from(&joined.conference),
        participant: ParticipantResponse::from(&joined.participant),
        join_count: joined.join_count,
        history: joined.history,
    }))
}

/// Handler for POST /api/v1/conferences/:id/leave
#[instrument(skip_all, name = "cs.handlers.leave_conference", fields(conference_id = %id))]
pub async fn leave_conference(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<String>,
) -> Result<StatusCode, CsError> {
    let participant = acting.require()?;
    state
        .sessions
        .leave(&conference_id(&id)?, participant)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for PUT /api/v1/conferences/:id/password
///
/// Caller must hold an active session in the conference. An empty password
/// removes protection.
#[instrument(skip_all, name = "cs.handlers.change_password", fields(conference_id = %id))]
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<String>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<StatusCode, CsError> {
    let participant = acting.require()?;
    state
        .registry
        .change_password(&conference_id(&id)?, &request.password, participant)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /api/v1/conferences/:id/joins
#[instrument(skip_all, name = "cs.handlers.count_joins", fields(conference_id = %id))]
pub async fn count_joins(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<String>,
) -> Result<Json<JoinCountResponse>, CsError> {
    let participant = acting.require()?;
    let conference = state.registry.find_by_id(&conference_id(&id)?).await?;
    let count = state
        .presence
        .count_joins(participant.id, &conference.id)
        .await?;

    Ok(Json(JoinCountResponse {
        conference_id: conference.id,
        count,
    }))
}

/// Handler for DELETE /api/v1/conferences/:id/members/:name
///
/// Participants may forget their own membership; privileged callers may
/// remove anyone's.
#[instrument(skip_all, name = "cs.handlers.remove_membership", fields(conference_id = %id))]
pub async fn remove_membership(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path((id, name)): Path<(String, String)>,
) -> Result<StatusCode, CsError> {
    let participant = acting.require()?;
    if participant.display_name != name && !participant.is_privileged() {
        return Err(CsError::Forbidden(
            "Only the member or an administrator may remove a membership".to_string(),
        ));
    }

    state
        .registry
        .remove_membership(&conference_id(&id)?, &name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /api/v1/conferences/search?fragment=...
#[instrument(skip_all, name = "cs.handlers.search_conferences")]
pub async fn search_conferences(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ConferenceResponse>>, CsError> {
    let participant = acting.require()?;
    let conferences = state
        .registry
        .search_by_id_fragment(&query.fragment, participant)
        .await?;
    Ok(Json(conferences.iter().map(ConferenceResponse::from).collect()))
}

/// Handler for GET /api/v1/admin/conferences
#[instrument(skip_all, name = "cs.handlers.list_conferences")]
pub async fn list_conferences(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
) -> Result<Json<Vec<ConferenceResponse>>, CsError> {
    let conferences = state.registry.list_all(acting.require()?).await?;
    Ok(Json(conferences.iter().map(ConferenceResponse::from).collect()))
}

/// Handler for GET /api/v1/me/conferences
#[instrument(skip_all, name = "cs.handlers.past_conferences")]
pub async fn past_conferences(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
) -> Result<Json<Vec<ConferenceResponse>>, CsError> {
    let conferences = state.registry.conferences_of(acting.require()?.id).await?;
    Ok(Json(conferences.iter().map(ConferenceResponse::from).collect()))
}

/// Handler for GET /api/v1/me/active
///
/// One entry per conference, even when the caller holds several sessions.
#[instrument(skip_all, name = "cs.handlers.active_conferences")]
pub async fn active_conferences(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
) -> Result<Json<Vec<ConferenceResponse>>, CsError> {
    let conferences = state
        .presence
        .active_conferences_for(acting.require()?.id)
        .await?;

    let mut seen = HashSet::new();
    let distinct = conferences
        .iter()
        .filter(|conference| seen.insert(conference.id.clone()))
        .map(ConferenceResponse::from)
        .collect();
    Ok(Json(distinct))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_path_id_is_not_found() {
        assert!(matches!(conference_id("not valid!"), Err(CsError::NotFound(_))));
        assert_eq!(conference_id("abc-123").unwrap().as_str(), "abc-123");
    }
}
