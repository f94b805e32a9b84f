//! In-memory service context.
//!
//! Wires every service over a fresh `MemoryStore`, exactly as the binary does
//! over Postgres, so tests exercise the real composition.

use chrono::{Duration, Utc};
use common::types::ConferenceId;
use conference_service::config::Config;
use conference_service::models::{Conference, Participant, Role};
use conference_service::repositories::{MemoryStore, Store};
use conference_service::routes::{self, AppState};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Base64 of 32 bytes of 0x2a.
pub const TEST_MESSAGE_KEY: &str = "KioqKioqKioqKioqKioqKioqKioqKioqKioqKioqKio=";

/// Test context over an isolated in-memory store.
pub struct TestContext {
    pub state: Arc<AppState>,
    pub store: Arc<dyn Store>,
}

impl TestContext {
    /// Context with default configuration and the cheapest bcrypt cost.
    pub fn new() -> Self {
        Self::with_vars(&[])
    }

    /// Context with extra environment variables layered over the defaults.
    pub fn with_vars(extra: &[(&str, &str)]) -> Self {
        let mut vars = HashMap::from([
            (
                "MESSAGE_ENCRYPTION_KEY".to_string(),
                TEST_MESSAGE_KEY.to_string(),
            ),
            ("PASSWORD_HASH_COST".to_string(), "4".to_string()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ]);
        for (key, value) in extra {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars).expect("test configuration is valid");
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let state = AppState::new(config, Arc::clone(&store)).expect("services wire up");

        Self {
            state: Arc::new(state),
            store,
        }
    }

    /// Router built by the service's own route builder.
    pub fn router(&self) -> axum::Router {
        routes::build_routes(Arc::clone(&self.state))
    }

    /// Temporary participant named `display_name`.
    pub async fn temporary(&self, display_name: &str) -> Participant {
        self.state
            .identity
            .create_temporary(display_name)
            .await
            .expect("create temporary participant")
    }

    /// Registered participant with the `USER` role.
    pub async fn permanent(&self, display_name: &str, email: &str) -> Participant {
        self.state
            .identity
            .register_permanent(display_name, email, BTreeSet::from([Role::User]))
            .await
            .expect("register permanent participant")
    }

    /// Registered participant with `USER` and `ADMIN` roles.
    pub async fn admin(&self, display_name: &str, email: &str) -> Participant {
        self.state
            .identity
            .register_permanent(display_name, email, BTreeSet::from([Role::User, Role::Admin]))
            .await
            .expect("register admin participant")
    }

    /// Conference created `age` ago with the given members and no joins.
    pub async fn aged_conference(
        &self,
        id: &str,
        age: Duration,
        members: &[&Participant],
    ) -> ConferenceId {
        let id = ConferenceId::parse(id).expect("valid conference id");
        let mut conference = Conference::new(id.clone());
        conference.created_at = Utc::now() - age;
        self.store
            .insert_conference(&conference)
            .await
            .expect("insert conference");

        for member in members {
            self.store
                .add_member(&id, member.id)
                .await
                .expect("add member");
        }
        id
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
