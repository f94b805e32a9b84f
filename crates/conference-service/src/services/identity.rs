//! Identity resolution.
//!
//! Turns an authenticated participant id or a bare display name into a
//! participant record. Unauthenticated names that match no registered
//! participant get a fresh temporary identity.

use crate::errors::CsError;
use crate::models::{Participant, Role, MAX_DISPLAY_NAME_LENGTH};
use crate::repositories::Store;
use chrono::{Duration, Utc};
use common::types::ParticipantId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;

/// User directory collaborator.
///
/// Registration and credentials live elsewhere; the conference service only
/// needs lookups and the temporary identity lifecycle.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_by_display_name(&self, display_name: &str)
        -> Result<Option<Participant>, CsError>;

    async fn find_by_id(&self, id: ParticipantId) -> Result<Option<Participant>, CsError>;

    async fn create_temporary(&self, display_name: &str) -> Result<Participant, CsError>;

    async fn delete_temporary(&self, id: ParticipantId) -> Result<(), CsError>;

    async fn roles_of(&self, id: ParticipantId) -> Result<BTreeSet<Role>, CsError>;
}

/// [`UserDirectory`] backed by the service's own store.
pub struct StoreDirectory {
    store: Arc<dyn Store>,
}

impl StoreDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl UserDirectory for StoreDirectory {
    async fn resolve_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Option<Participant>, CsError> {
        self.store.find_permanent_by_display_name(display_name).await
    }

    async fn find_by_id(&self, id: ParticipantId) -> Result<Option<Participant>, CsError> {
        self.store.get_participant(id).await
    }

    async fn create_temporary(&self, display_name: &str) -> Result<Participant, CsError> {
        let participant = Participant::temporary(display_name);
        self.store.insert_participant(&participant).await?;
        Ok(participant)
    }

    async fn delete_temporary(&self, id: ParticipantId) -> Result<(), CsError> {
        let participant = self
            .store
            .get_participant(id)
            .await?
            .ok_or_else(|| CsError::NotFound("Participant not found".to_string()))?;

        if !participant.is_temporary() {
            return Err(CsError::Forbidden(
                "Permanent participants cannot be deleted here".to_string(),
            ));
        }

        self.store.delete_participant(id).await?;
        Ok(())
    }

    async fn roles_of(&self, id: ParticipantId) -> Result<BTreeSet<Role>, CsError> {
        Ok(self
            .store
            .get_participant(id)
            .await?
            .map(|participant| participant.roles)
            .unwrap_or_default())
    }
}

/// Who is acting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Caller authenticated upstream.
    Authenticated(ParticipantId),

    /// Caller supplied only a display name.
    Named(String),
}

/// Validate and trim a display name.
pub fn validate_display_name(display_name: &str) -> Result<&str, CsError> {
    let trimmed = display_name.trim();

    if trimmed.is_empty() {
        return Err(CsError::ValidationFailed(
            "Display name is required".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(CsError::ValidationFailed(format!(
            "Display name must be at most {} characters",
            MAX_DISPLAY_NAME_LENGTH
        )));
    }

    Ok(trimmed)
}

pub struct IdentityResolver {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn Store>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn UserDirectory>, store: Arc<dyn Store>) -> Self {
        Self { directory, store }
    }

    /// Resolve an identity to a participant.
    ///
    /// Names are looked up among registered participants first; an unknown
    /// name yields a new temporary participant.
    #[instrument(skip_all, name = "cs.identity.resolve")]
    pub async fn resolve(&self, identity: &Identity) -> Result<Participant, CsError> {
        match identity {
            Identity::Authenticated(id) => self.participant(*id).await,
            Identity::Named(name) => {
                let name = validate_display_name(name)?;
                if let Some(registered) = self.directory.resolve_by_display_name(name).await? {
                    return Ok(registered);
                }
                self.create_temporary(name).await
            }
        }
    }

    /// Load a participant by id.
    pub async fn participant(&self, id: ParticipantId) -> Result<Participant, CsError> {
        self.directory
            .find_by_id(id)
            .await?
            .ok_or_else(|| CsError::NotFound("Participant not found".to_string()))
    }

    pub async fn find_registered(&self, display_name: &str) -> Result<Option<Participant>, CsError> {
        self.directory.resolve_by_display_name(display_name).await
    }

    pub async fn create_temporary(&self, display_name: &str) -> Result<Participant, CsError> {
        let display_name = validate_display_name(display_name)?;
        let participant = self.directory.create_temporary(display_name).await?;

        tracing::debug!(
            target: "cs.identity",
            participant_id = %participant.id,
            "Created temporary participant"
        );
        Ok(participant)
    }

    pub async fn delete_temporary(&self, id: ParticipantId) -> Result<(), CsError> {
        self.directory.delete_temporary(id).await?;
        tracing::debug!(target: "cs.identity", participant_id = %id, "Deleted temporary participant");
        Ok(())
    }

    pub async fn roles_of(&self, id: ParticipantId) -> Result<BTreeSet<Role>, CsError> {
        self.directory.roles_of(id).await
    }

    /// Seed a registered participant. Registration proper is handled by the
    /// account system; this exists for bootstrapping and tests.
    pub async fn register_permanent(
        &self,
        display_name: &str,
        email: &str,
        roles: BTreeSet<Role>,
    ) -> Result<Participant, CsError> {
        let display_name = validate_display_name(display_name)?;
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(CsError::ValidationFailed("A valid email is required".to_string()));
        }

        if self.store.find_participant_by_email(email).await?.is_some() {
            return Err(CsError::Conflict("Email is already registered".to_string()));
        }

        let participant = Participant::permanent(display_name, email, roles);
        self.store.insert_participant(&participant).await?;
        Ok(participant)
    }

    /// Delete temporary participants older than `max_age` that hold no join.
    ///
    /// Returns the number of participants deleted.
    #[instrument(skip_all, name = "cs.identity.reclaim_stale_temporaries")]
    pub async fn reclaim_stale_temporaries(&self, max_age: Duration) -> Result<usize, CsError> {
        let cutoff = Utc::now() - max_age;
        let candidates = self.store.temporary_participants_created_before(cutoff).await?;

        let mut deleted = 0;
        for candidate in candidates {
            if self.store.count_participant_joins(candidate.id).await? > 0 {
                continue;
            }
            self.directory.delete_temporary(candidate.id).await?;
            deleted += 1;
        }

        if deleted > 0 {
            tracing::info!(
                target: "cs.identity",
                deleted = deleted,
                "Reclaimed stale temporary participants"
            );
        }
        Ok(deleted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{AccountKind, Conference};
    use crate::repositories::MemoryStore;
    use common::types::ConferenceId;

    fn resolver() -> (IdentityResolver, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let directory = Arc::new(StoreDirectory::new(Arc::clone(&store)));
        (IdentityResolver::new(directory, Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn test_named_identity_creates_temporary() {
        let (resolver, _) = resolver();

        let ann = resolver
            .resolve(&Identity::Named("  Ann ".to_string()))
            .await
            .unwrap();

        assert_eq!(ann.display_name, "Ann");
        assert_eq!(ann.kind, AccountKind::Temporary);
        assert!(ann.email.is_none());
    }

    #[tokio::test]
    async fn test_named_identity_prefers_registered() {
        let (resolver, _) = resolver();
        let bob = resolver
            .register_permanent("Bob Builder", "bob@example.com", BTreeSet::from([Role::User]))
            .await
            .unwrap();

        let resolved = resolver
            .resolve(&Identity::Named("Bob Builder".to_string()))
            .await
            .unwrap();
        assert_eq!(resolved.id, bob.id);
    }

    #[tokio::test]
    async fn test_authenticated_unknown_is_not_found() {
        let (resolver, _) = resolver();
        let result = resolver
            .resolve(&Identity::Authenticated(ParticipantId::new()))
            .await;
        assert!(matches!(result, Err(CsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let (resolver, _) = resolver();
        let result = resolver.resolve(&Identity::Named("   ".to_string())).await;
        assert!(matches!(result, Err(CsError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let (resolver, _) = resolver();
        resolver
            .register_permanent("Bob Builder", "bob@example.com", BTreeSet::new())
            .await
            .unwrap();
        let result = resolver
            .register_permanent("Robert Builder", "bob@example.com", BTreeSet::new())
            .await;
        assert!(matches!(result, Err(CsError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_delete_temporary_refuses_permanent() {
        let (resolver, _) = resolver();
        let bob = resolver
            .register_permanent("Bob Builder", "bob@example.com", BTreeSet::new())
            .await
            .unwrap();
        assert!(matches!(
            resolver.delete_temporary(bob.id).await,
            Err(CsError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_reclaim_skips_young_and_joined_temporaries() {
        let (resolver, store) = resolver();

        let mut stale = Participant::temporary("Stale");
        stale.created_at = Utc::now() - Duration::hours(48);
        store.insert_participant(&stale).await.unwrap();

        let mut busy = Participant::temporary("Busy");
        busy.created_at = Utc::now() - Duration::hours(48);
        store.insert_participant(&busy).await.unwrap();
        let room = ConferenceId::parse("room").unwrap();
        store.insert_conference(&Conference::new(room.clone())).await.unwrap();
        store.insert_join(busy.id, &room).await.unwrap();

        let fresh = resolver.create_temporary("Fresh").await.unwrap();

        let deleted = resolver
            .reclaim_stale_temporaries(Duration::hours(24))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get_participant(stale.id).await.unwrap().is_none());
        assert!(store.get_participant(busy.id).await.unwrap().is_some());
        assert!(store.get_participant(fresh.id).await.unwrap().is_some());
    }
}
