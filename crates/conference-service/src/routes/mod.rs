//! HTTP routes for the conference service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::errors::CsError;
use crate::handlers;
use crate::middleware::{optional_participant, require_participant};
use crate::repositories::Store;
use crate::services::{
    ChatHub, ConferenceRegistry, ConferenceSessions, DeviceAggregator, IdentityResolver,
    MessageCipher, PresenceTracker, RegistrySettings, StoreDirectory, TopicHub,
};
use crate::tasks::{ReclamationScheduler, ReclamationSettings};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use common::secret::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    pub store: Arc<dyn Store>,
    pub identity: Arc<IdentityResolver>,
    pub presence: Arc<PresenceTracker>,
    pub devices: Arc<DeviceAggregator>,
    pub registry: Arc<ConferenceRegistry>,
    pub chats: Arc<ChatHub>,
    pub sessions: Arc<ConferenceSessions>,
    pub scheduler: Arc<ReclamationScheduler>,
}

impl AppState {
    /// Wire every service over the given store.
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self, CsError> {
        let cipher = Arc::new(MessageCipher::new(
            config.message_encryption_key.expose_secret(),
        )?);
        let topics = Arc::new(TopicHub::new());

        let directory = Arc::new(StoreDirectory::new(Arc::clone(&store)));
        let identity = Arc::new(IdentityResolver::new(directory, Arc::clone(&store)));
        let presence = Arc::new(PresenceTracker::new(Arc::clone(&store)));
        let devices = Arc::new(DeviceAggregator::new(Arc::clone(&store)));
        let registry = Arc::new(ConferenceRegistry::new(
            Arc::clone(&store),
            Arc::clone(&identity),
            Arc::clone(&presence),
            Arc::clone(&devices),
            RegistrySettings {
                retention: chrono::Duration::days(config.conference_retention_days),
                require_idle: config.reclaim_require_idle,
                password_hash_cost: config.password_hash_cost,
            },
        ));
        let chats = Arc::new(ChatHub::new(Arc::clone(&store), cipher, topics));
        let sessions = Arc::new(ConferenceSessions::new(
            Arc::clone(&identity),
            Arc::clone(&registry),
            Arc::clone(&presence),
            Arc::clone(&chats),
            Arc::clone(&devices),
        ));
        let scheduler = Arc::new(ReclamationScheduler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&identity),
            ReclamationSettings {
                conference_interval: config.conference_cleanup_interval,
                participant_interval: config.participant_cleanup_interval,
                participant_max_age: chrono::Duration::hours(
                    config.temporary_participant_max_age_hours,
                ),
            },
        ));

        Ok(Self {
            config,
            store,
            identity,
            presence,
            devices,
            registry,
            chats,
            sessions,
            scheduler,
        })
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` and `/ready` - liveness and store readiness
/// - open routes that accept anonymous callers (create, join, connect devices)
/// - protected routes that require an identified participant
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state.clone());

    // Anonymous callers are named by display name in the body
    let open_routes = Router::new()
        .route("/api/v1/conferences", post(handlers::create_conference))
        .route("/api/v1/conferences/:id", get(handlers::get_conference))
        .route(
            "/api/v1/conferences/:id/join",
            post(handlers::join_conference),
        )
        .route("/api/v1/devices", post(handlers::connect_devices))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            optional_participant,
        ))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/v1/admin/conferences", get(handlers::list_conferences))
        .route(
            "/api/v1/conferences/search",
            get(handlers::search_conferences),
        )
        .route(
            "/api/v1/conferences/:id/leave",
            post(handlers::leave_conference),
        )
        .route(
            "/api/v1/conferences/:id/password",
            put(handlers::change_password),
        )
        .route(
            "/api/v1/conferences/:id/joins",
            get(handlers::count_joins),
        )
        .route(
            "/api/v1/conferences/:id/members/:name",
            delete(handlers::remove_membership),
        )
        .route(
            "/api/v1/conferences/:id/devices",
            get(handlers::conference_devices),
        )
        .route(
            "/api/v1/conferences/:id/devices/:name",
            get(handlers::participant_devices),
        )
        .route("/api/v1/me/conferences", get(handlers::past_conferences))
        .route("/api/v1/me/active", get(handlers::active_conferences))
        .route("/api/v1/me/devices", get(handlers::my_devices))
        .route(
            "/api/v1/chats",
            get(handlers::list_chats).post(handlers::find_or_create_chat),
        )
        .route(
            "/api/v1/chats/:id",
            get(handlers::get_chat).delete(handlers::delete_chat),
        )
        .route(
            "/api/v1/chats/:id/messages",
            get(handlers::list_messages)
                .post(handlers::send_message)
                .delete(handlers::clear_chat),
        )
        .route("/api/v1/chats/:id/join", post(handlers::join_chat))
        .route("/api/v1/chats/:id/ws", get(handlers::chat_socket))
        .route("/api/v1/messages/:id", delete(handlers::delete_message))
        .route(
            "/api/v1/settings/:key",
            get(handlers::get_setting).put(handlers::update_setting),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_participant,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    public_routes
        .merge(open_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
