//! Conference registry.
//!
//! Owns conference creation and lookup, password gating and membership.
//! Membership (`users`) is the lifetime list of everyone associated with a
//! conference; live sessions are join rows kept by the presence tracker.

use crate::errors::CsError;
use crate::models::{Conference, ConferenceJoin, Participant};
use crate::repositories::Store;
use crate::services::devices::DeviceAggregator;
use crate::services::identity::{validate_display_name, IdentityResolver};
use crate::services::presence::PresenceTracker;
use chrono::{Duration, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::{ConferenceId, ParticipantId};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::instrument;

/// URL-safe alphabet for generated conference ids.
const ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length of generated conference ids (about 95 bits of entropy).
pub const CONFERENCE_ID_LENGTH: usize = 16;

/// Maximum id collision retries on create.
const MAX_ID_COLLISION_RETRIES: usize = 3;

/// Largest multiple of the alphabet size below 256; bytes at or above it are
/// redrawn so every character is equally likely.
const UNBIASED_BYTE_LIMIT: u8 = 248;

/// Generate a random conference id from the CSPRNG.
pub fn generate_conference_id() -> Result<ConferenceId, CsError> {
    let rng = SystemRandom::new();
    let mut id = String::with_capacity(CONFERENCE_ID_LENGTH);
    let mut buffer = [0u8; CONFERENCE_ID_LENGTH * 2];

    while id.len() < CONFERENCE_ID_LENGTH {
        rng.fill(&mut buffer).map_err(|e| {
            tracing::error!(target: "cs.registry", error = %e, "Failed to generate random bytes for conference id");
            CsError::Internal("RNG failure".to_string())
        })?;

        for byte in buffer.iter().filter(|b| **b < UNBIASED_BYTE_LIMIT) {
            if id.len() == CONFERENCE_ID_LENGTH {
                break;
            }
            let ch = ID_ALPHABET
                .get(usize::from(*byte) % ID_ALPHABET.len())
                .ok_or_else(|| CsError::Internal("Alphabet index out of range".to_string()))?;
            id.push(char::from(*ch));
        }
    }

    Ok(ConferenceId::parse(&id)?)
}

/// Registry settings taken from the service configuration.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Conferences older than this are reclamation candidates.
    pub retention: Duration,

    /// Skip candidates that still hold a join row.
    pub require_idle: bool,

    pub password_hash_cost: u32,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            retention: Duration::days(30),
            require_idle: true,
            password_hash_cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// What a leave did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// A join row was removed.
    pub left: bool,

    /// The participant was temporary and held no other session, so it was deleted.
    pub participant_deleted: bool,
}

/// Summary of one reclamation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub conferences_reclaimed: usize,
    pub skipped_active: usize,
    pub participants_deleted: usize,

    /// Candidates whose cleanup failed; they are retried on the next pass.
    pub failed: usize,
}

pub struct ConferenceRegistry {
    store: Arc<dyn Store>,
    identity: Arc<IdentityResolver>,
    presence: Arc<PresenceTracker>,
    devices: Arc<DeviceAggregator>,
    settings: RegistrySettings,
}

impl ConferenceRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<IdentityResolver>,
        presence: Arc<PresenceTracker>,
        devices: Arc<DeviceAggregator>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            store,
            identity,
            presence,
            devices,
            settings,
        }
    }

    /// Create a conference and attach the initiator as member and session.
    ///
    /// Without an initiator a temporary participant named `display_name` is
    /// minted. Returns the new conference together with the attached
    /// participant.
    #[instrument(skip_all, name = "cs.registry.create")]
    pub async fn create(
        &self,
        initiator: Option<&Participant>,
        display_name: &str,
    ) -> Result<(Conference, Participant), CsError> {
        let participant = match initiator {
            Some(participant) => participant.clone(),
            None => self.identity.create_temporary(display_name).await?,
        };

        let mut created: Option<ConferenceId> = None;
        for attempt in 0..MAX_ID_COLLISION_RETRIES {
            let id = generate_conference_id()?;
            match self.store.insert_conference(&Conference::new(id.clone())).await {
                Ok(()) => {
                    created = Some(id);
                    break;
                }
                Err(CsError::Conflict(_)) => {
                    tracing::warn!(
                        target: "cs.registry",
                        attempt = attempt + 1,
                        "Conference id collision, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        let id = created.ok_or_else(|| {
            CsError::CreationFailed("Failed to generate a unique conference id".to_string())
        })?;

        self.store.add_member(&id, participant.id).await?;
        self.presence.join(participant.id, &id).await?;

        let conference = self
            .store
            .get_conference(&id)
            .await?
            .filter(|stored| stored.id == id && stored.has_member(participant.id))
            .ok_or_else(|| {
                CsError::CreationFailed(format!("Conference {} did not round-trip", id))
            })?;

        tracing::info!(
            target: "cs.registry",
            conference_id = %conference.id,
            participant_id = %participant.id,
            "Conference created"
        );
        Ok((conference, participant))
    }

    pub async fn find_by_id(&self, id: &ConferenceId) -> Result<Conference, CsError> {
        self.store
            .get_conference(id)
            .await?
            .ok_or_else(|| CsError::NotFound(format!("Conference {} not found", id)))
    }

    /// Attach a participant by display name, idempotently.
    ///
    /// A registered participant with that name is looked up and attached once.
    /// Otherwise a temporary member of this conference with that name is
    /// reused, or a new temporary participant is created and attached.
    #[instrument(skip_all, name = "cs.registry.add_participant", fields(conference_id = %conference_id))]
    pub async fn add_participant(
        &self,
        display_name: &str,
        conference_id: &ConferenceId,
    ) -> Result<Participant, CsError> {
        let display_name = validate_display_name(display_name)?;
        let conference = self.find_by_id(conference_id).await?;

        if let Some(registered) = self.identity.find_registered(display_name).await? {
            if !conference.has_member(registered.id) {
                self.store.add_member(conference_id, registered.id).await?;
            }
            return Ok(registered);
        }

        self.attach_temporary(display_name, &conference).await
    }

    /// Attach an unauthenticated caller by display name.
    ///
    /// Never resolves to a registered participant: a name owned by a
    /// registered account is refused with `Forbidden`.
    #[instrument(skip_all, name = "cs.registry.add_guest", fields(conference_id = %conference_id))]
    pub async fn add_guest(
        &self,
        display_name: &str,
        conference_id: &ConferenceId,
    ) -> Result<Participant, CsError> {
        let display_name = validate_display_name(display_name)?;
        let conference = self.find_by_id(conference_id).await?;

        if self.identity.find_registered(display_name).await?.is_some() {
            tracing::debug!(
                target: "cs.registry",
                conference_id = %conference_id,
                "Refused name-only join under a registered display name"
            );
            return Err(CsError::Forbidden(
                "Sign in to join as this user".to_string(),
            ));
        }

        self.attach_temporary(display_name, &conference).await
    }

    /// Reuse a temporary member with this name, or mint one and attach it.
    async fn attach_temporary(
        &self,
        display_name: &str,
        conference: &Conference,
    ) -> Result<Participant, CsError> {
        for member_id in &conference.users {
            if let Some(member) = self.store.get_participant(*member_id).await? {
                if member.is_temporary() && member.display_name == display_name {
                    return Ok(member);
                }
            }
        }

        let temporary = self.identity.create_temporary(display_name).await?;
        self.store.add_member(&conference.id, temporary.id).await?;
        Ok(temporary)
    }

    /// Open a session: check the password, attach as member, record a join.
    #[instrument(skip_all, name = "cs.registry.join", fields(conference_id = %conference_id))]
    pub async fn join(
        &self,
        conference_id: &ConferenceId,
        participant: &Participant,
        password: Option<&SecretString>,
    ) -> Result<(Conference, ConferenceJoin), CsError> {
        self.authorize(conference_id, password).await?;
        self.open_session(conference_id, participant).await
    }

    /// Check the supplied password against the conference's hash.
    pub async fn authorize(
        &self,
        conference_id: &ConferenceId,
        password: Option<&SecretString>,
    ) -> Result<Conference, CsError> {
        let conference = self.find_by_id(conference_id).await?;
        self.verify_password(&conference, password).await?;
        Ok(conference)
    }

    /// Attach as member and record a join. Callers authorize first.
    pub async fn open_session(
        &self,
        conference_id: &ConferenceId,
        participant: &Participant,
    ) -> Result<(Conference, ConferenceJoin), CsError> {
        self.store.add_member(conference_id, participant.id).await?;
        let join = self.presence.join(participant.id, conference_id).await?;

        let conference = self.find_by_id(conference_id).await?;
        Ok((conference, join))
    }

    /// Close one session. A temporary participant left with no session
    /// anywhere is deleted.
    #[instrument(skip_all, name = "cs.registry.leave", fields(conference_id = %conference_id))]
    pub async fn leave(
        &self,
        conference_id: &ConferenceId,
        participant: &Participant,
    ) -> Result<LeaveOutcome, CsError> {
        self.find_by_id(conference_id).await?;
        let left = self.presence.leave(participant.id, conference_id).await?;

        let participant_deleted = participant.is_temporary()
            && self.presence.count_participant_joins(participant.id).await? == 0;
        if participant_deleted {
            self.identity.delete_temporary(participant.id).await?;
        }

        Ok(LeaveOutcome {
            left,
            participant_deleted,
        })
    }

    /// Set or clear the conference password.
    ///
    /// Only a participant with an active session in the conference may do
    /// this. An empty password removes protection.
    #[instrument(skip_all, name = "cs.registry.change_password", fields(conference_id = %conference_id))]
    pub async fn change_password(
        &self,
        conference_id: &ConferenceId,
        new_password: &SecretString,
        acting: &Participant,
    ) -> Result<(), CsError> {
        self.find_by_id(conference_id).await?;

        if self.presence.count_joins(acting.id, conference_id).await? == 0 {
            return Err(CsError::Forbidden(
                "Only participants in the conference may change its password".to_string(),
            ));
        }

        let password = new_password.expose_secret();
        let password_hash = if password.is_empty() {
            None
        } else {
            Some(hash_password(password.to_string(), self.settings.password_hash_cost).await?)
        };
        let protected = password_hash.is_some();

        self.store
            .set_conference_password(conference_id, password_hash)
            .await?;

        tracing::info!(
            target: "cs.registry",
            conference_id = %conference_id,
            protected = protected,
            "Conference password changed"
        );
        Ok(())
    }

    /// Forget a past conference by member display name.
    ///
    /// Registered names resolve through the directory; other names match a
    /// temporary member of this conference.
    pub async fn remove_membership(
        &self,
        conference_id: &ConferenceId,
        display_name: &str,
    ) -> Result<(), CsError> {
        let conference = self.find_by_id(conference_id).await?;

        let member = match self.identity.find_registered(display_name).await? {
            Some(registered) => Some(registered),
            None => {
                let mut found = None;
                for member_id in &conference.users {
                    if let Some(member) = self.store.get_participant(*member_id).await? {
                        if member.is_temporary() && member.display_name == display_name {
                            found = Some(member);
                            break;
                        }
                    }
                }
                found
            }
        };

        let member = member.ok_or_else(|| {
            CsError::NotFound("No such member in this conference".to_string())
        })?;
        self.remove_member(conference_id, member.id).await
    }

    /// Remove a member, provided both sides of the relation agree.
    pub async fn remove_member(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<(), CsError> {
        let conference = self.find_by_id(conference_id).await?;
        let listed_in_conference = conference.has_member(participant_id);
        let listed_for_participant = self
            .store
            .conferences_of(participant_id)
            .await?
            .iter()
            .any(|c| &c.id == conference_id);

        if !(listed_in_conference && listed_for_participant) {
            return Err(CsError::NotFound(
                "Participant is not a member of this conference".to_string(),
            ));
        }

        self.store.remove_member(conference_id, participant_id).await?;
        tracing::debug!(
            target: "cs.registry",
            conference_id = %conference_id,
            participant_id = %participant_id,
            "Membership removed"
        );
        Ok(())
    }

    /// Conferences whose id contains `fragment`. Privileged participants see
    /// every match; others only conferences they belong to.
    pub async fn search_by_id_fragment(
        &self,
        fragment: &str,
        acting: &Participant,
    ) -> Result<Vec<Conference>, CsError> {
        let matches = self.store.search_conferences(fragment.trim()).await?;
        if acting.is_privileged() {
            return Ok(matches);
        }
        Ok(matches
            .into_iter()
            .filter(|conference| conference.has_member(acting.id))
            .collect())
    }

    /// Past conferences: every conference the participant is a member of.
    pub async fn conferences_of(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<Conference>, CsError> {
        self.store.conferences_of(participant_id).await
    }

    pub async fn list_all(&self, acting: &Participant) -> Result<Vec<Conference>, CsError> {
        if !acting.is_privileged() {
            return Err(CsError::Forbidden(
                "Listing all conferences requires an administrative role".to_string(),
            ));
        }
        self.store.list_conferences().await
    }

    /// Delete conferences older than the retention window.
    ///
    /// Per conference: joins, device rows, memberships, chat messages and the
    /// chat go first, then the conference row, then former temporary members
    /// that no longer belong anywhere. A conference that fails to reclaim is
    /// logged and counted in [`ReclaimReport::failed`]; the pass continues.
    #[instrument(skip_all, name = "cs.registry.reclaim_unused")]
    pub async fn reclaim_unused(&self) -> Result<ReclaimReport, CsError> {
        let cutoff = Utc::now() - self.settings.retention;
        let candidates = self.store.conferences_created_before(cutoff).await?;

        let mut report = ReclaimReport::default();
        for conference in candidates {
            if self.settings.require_idle
                && self.presence.count_conference_joins(&conference.id).await? > 0
            {
                tracing::debug!(
                    target: "cs.registry",
                    conference_id = %conference.id,
                    "Skipping reclamation of occupied conference"
                );
                report.skipped_active += 1;
                continue;
            }

            match self.reclaim_conference(&conference).await {
                Ok(deleted) => {
                    report.participants_deleted += deleted;
                    report.conferences_reclaimed += 1;
                }
                Err(e) => {
                    tracing::error!(
                        target: "cs.registry",
                        conference_id = %conference.id,
                        error = %e,
                        "Failed to reclaim conference"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.conferences_reclaimed > 0 || report.failed > 0 {
            tracing::info!(
                target: "cs.registry",
                reclaimed = report.conferences_reclaimed,
                skipped_active = report.skipped_active,
                participants_deleted = report.participants_deleted,
                failed = report.failed,
                "Reclaimed unused conferences"
            );
        }
        Ok(report)
    }

    async fn reclaim_conference(&self, conference: &Conference) -> Result<usize, CsError> {
        let id = &conference.id;

        self.presence.clear_conference(id).await?;
        self.devices.delete_for_conference(id).await?;

        for member_id in &conference.users {
            self.store.remove_member(id, *member_id).await?;
        }

        if let Some(chat_id) = conference.chat_id {
            for message in self.store.messages_for_chat(chat_id).await? {
                self.store.delete_message(message.id).await?;
            }
            self.store.delete_chat(chat_id).await?;
        }

        self.store.delete_conference(id).await?;

        let mut deleted = 0;
        for member_id in &conference.users {
            let Some(member) = self.store.get_participant(*member_id).await? else {
                continue;
            };
            if !member.is_temporary() {
                continue;
            }
            let orphaned = self.store.conferences_of(member.id).await?.is_empty()
                && self.presence.count_participant_joins(member.id).await? == 0;
            if orphaned {
                self.identity.delete_temporary(member.id).await?;
                deleted += 1;
            }
        }

        tracing::debug!(target: "cs.registry", conference_id = %id, "Conference reclaimed");
        Ok(deleted)
    }

    async fn verify_password(
        &self,
        conference: &Conference,
        password: Option<&SecretString>,
    ) -> Result<(), CsError> {
        let Some(hash) = conference.password_hash.clone() else {
            return Ok(());
        };

        let supplied = password
            .map(|p| p.expose_secret().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CsError::Forbidden("This conference requires a password".to_string()))?;

        let valid = tokio::task::spawn_blocking(move || bcrypt::verify(supplied, &hash))
            .await
            .map_err(|e| CsError::Internal(format!("Password verification task failed: {}", e)))?
            .map_err(|e| CsError::Crypto(format!("Password verification failed: {}", e)))?;

        if !valid {
            return Err(CsError::Forbidden("Incorrect conference password".to_string()));
        }
        Ok(())
    }
}

async fn hash_password(password: String, cost: u32) -> Result<String, CsError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| CsError::Internal(format!("Password hashing task failed: {}", e)))?
        .map_err(|e| CsError::Crypto(format!("Password hashing failed: {}", e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{AccountKind, Role};
    use crate::repositories::{FaultyStore, MemoryStore};
    use crate::services::identity::StoreDirectory;
    use std::collections::{BTreeSet, HashSet};

    struct Fixture {
        store: Arc<dyn Store>,
        identity: Arc<IdentityResolver>,
        presence: Arc<PresenceTracker>,
        registry: ConferenceRegistry,
    }

    fn fixture(require_idle: bool) -> Fixture {
        fixture_on(Arc::new(MemoryStore::new()), require_idle)
    }

    fn fixture_on(store: Arc<dyn Store>, require_idle: bool) -> Fixture {
        let directory = Arc::new(StoreDirectory::new(Arc::clone(&store)));
        let identity = Arc::new(IdentityResolver::new(directory, Arc::clone(&store)));
        let presence = Arc::new(PresenceTracker::new(Arc::clone(&store)));
        let devices = Arc::new(DeviceAggregator::new(Arc::clone(&store)));
        let registry = ConferenceRegistry::new(
            Arc::clone(&store),
            Arc::clone(&identity),
            Arc::clone(&presence),
            devices,
            RegistrySettings {
                retention: Duration::days(30),
                require_idle,
                password_hash_cost: 4,
            },
        );
        Fixture {
            store,
            identity,
            presence,
            registry,
        }
    }

    #[test]
    fn test_generated_ids_are_url_safe_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let id = generate_conference_id().unwrap();
            assert_eq!(id.as_str().len(), CONFERENCE_ID_LENGTH);
            assert!(id.as_str().bytes().all(|b| b.is_ascii_alphanumeric()));
            assert!(seen.insert(id));
        }
    }

    #[tokio::test]
    async fn test_create_attaches_exactly_the_initiator() {
        let f = fixture(true);
        let (conference, ann) = f.registry.create(None, "Ann").await.unwrap();

        let found = f.registry.find_by_id(&conference.id).await.unwrap();
        assert_eq!(found.users, vec![ann.id]);
        assert_eq!(ann.kind, AccountKind::Temporary);
        assert_eq!(f.presence.count_joins(ann.id, &conference.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_with_registered_initiator() {
        let f = fixture(true);
        let bob = f
            .identity
            .register_permanent("Bob Builder", "bob@example.com", BTreeSet::new())
            .await
            .unwrap();

        let (conference, attached) = f.registry.create(Some(&bob), "ignored").await.unwrap();
        assert_eq!(attached.id, bob.id);
        assert_eq!(conference.users, vec![bob.id]);
    }

    #[tokio::test]
    async fn test_find_unknown_is_not_found() {
        let f = fixture(true);
        let id = ConferenceId::parse("nope").unwrap();
        assert!(matches!(
            f.registry.find_by_id(&id).await,
            Err(CsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_participant_is_idempotent() {
        let f = fixture(true);
        let (conference, _) = f.registry.create(None, "Ann").await.unwrap();
        let bob = f
            .identity
            .register_permanent("Bob Builder", "bob@example.com", BTreeSet::new())
            .await
            .unwrap();

        let first = f
            .registry
            .add_participant("Bob Builder", &conference.id)
            .await
            .unwrap();
        let second = f
            .registry
            .add_participant("Bob Builder", &conference.id)
            .await
            .unwrap();
        assert_eq!(first.id, bob.id);
        assert_eq!(second.id, bob.id);

        let carl = f.registry.add_participant("Carl", &conference.id).await.unwrap();
        let carl_again = f.registry.add_participant("Carl", &conference.id).await.unwrap();
        assert_eq!(carl.id, carl_again.id);
        assert!(carl.is_temporary());

        let users = f.registry.find_by_id(&conference.id).await.unwrap().users;
        assert_eq!(users.len(), 3);
    }

    #[tokio::test]
    async fn test_add_guest_refuses_registered_names() {
        let f = fixture(true);
        let (conference, _) = f.registry.create(None, "Ann").await.unwrap();
        f.identity
            .register_permanent("Bob Builder", "bob@example.com", BTreeSet::new())
            .await
            .unwrap();

        let impostor = f.registry.add_guest("Bob Builder", &conference.id).await;
        assert!(matches!(impostor, Err(CsError::Forbidden(_))));

        let erin = f.registry.add_guest("Erin", &conference.id).await.unwrap();
        let erin_again = f.registry.add_guest(" Erin ", &conference.id).await.unwrap();
        assert!(erin.is_temporary());
        assert_eq!(erin.id, erin_again.id);

        let users = f.registry.find_by_id(&conference.id).await.unwrap().users;
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn test_temporary_names_are_conference_scoped() {
        let f = fixture(true);
        let (first, _) = f.registry.create(None, "Host").await.unwrap();
        let (second, _) = f.registry.create(None, "Host").await.unwrap();

        let in_first = f.registry.add_participant("Dana", &first.id).await.unwrap();
        let in_second = f.registry.add_participant("Dana", &second.id).await.unwrap();
        assert_ne!(in_first.id, in_second.id);
    }

    #[tokio::test]
    async fn test_password_requires_active_session() {
        let f = fixture(true);
        let (conference, ann) = f.registry.create(None, "Ann").await.unwrap();
        let outsider = f.identity.create_temporary("Eve").await.unwrap();
        let password = SecretString::from("s3cret");

        let denied = f
            .registry
            .change_password(&conference.id, &password, &outsider)
            .await;
        assert!(matches!(denied, Err(CsError::Forbidden(_))));

        f.registry
            .change_password(&conference.id, &password, &ann)
            .await
            .unwrap();
        let stored = f.registry.find_by_id(&conference.id).await.unwrap();
        let hash = stored.password_hash.unwrap();
        assert!(hash.starts_with("$2"));
        assert_ne!(hash, "s3cret");
    }

    #[tokio::test]
    async fn test_empty_password_clears_protection() {
        let f = fixture(true);
        let (conference, ann) = f.registry.create(None, "Ann").await.unwrap();

        f.registry
            .change_password(&conference.id, &SecretString::from("pw"), &ann)
            .await
            .unwrap();
        f.registry
            .change_password(&conference.id, &SecretString::from(""), &ann)
            .await
            .unwrap();

        let stored = f.registry.find_by_id(&conference.id).await.unwrap();
        assert!(stored.password_hash.is_none());
    }

    #[tokio::test]
    async fn test_join_checks_password() {
        let f = fixture(true);
        let (conference, ann) = f.registry.create(None, "Ann").await.unwrap();
        f.registry
            .change_password(&conference.id, &SecretString::from("letmein"), &ann)
            .await
            .unwrap();
        let bob = f.identity.create_temporary("Bob").await.unwrap();

        let missing = f.registry.join(&conference.id, &bob, None).await;
        assert!(matches!(missing, Err(CsError::Forbidden(_))));

        let wrong = SecretString::from("nope");
        let wrong = f.registry.join(&conference.id, &bob, Some(&wrong)).await;
        assert!(matches!(wrong, Err(CsError::Forbidden(_))));

        let right = SecretString::from("letmein");
        let (joined, _) = f
            .registry
            .join(&conference.id, &bob, Some(&right))
            .await
            .unwrap();
        assert!(joined.has_member(bob.id));
    }

    #[tokio::test]
    async fn test_leave_keeps_membership_and_deletes_idle_temporary() {
        let f = fixture(true);
        let (conference, ann) = f.registry.create(None, "Ann").await.unwrap();
        let bob = f
            .identity
            .register_permanent("Bob Builder", "bob@example.com", BTreeSet::new())
            .await
            .unwrap();
        f.registry.join(&conference.id, &bob, None).await.unwrap();

        let outcome = f.registry.leave(&conference.id, &bob).await.unwrap();
        assert!(outcome.left);
        assert!(!outcome.participant_deleted);
        let stored = f.registry.find_by_id(&conference.id).await.unwrap();
        assert!(stored.has_member(bob.id));

        let outcome = f.registry.leave(&conference.id, &ann).await.unwrap();
        assert!(outcome.participant_deleted);
        assert!(f.store.get_participant(ann.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_membership_by_name() {
        let f = fixture(true);
        let (conference, _) = f.registry.create(None, "Ann").await.unwrap();
        let carl = f.registry.add_participant("Carl", &conference.id).await.unwrap();

        f.registry
            .remove_membership(&conference.id, "Carl")
            .await
            .unwrap();
        let stored = f.registry.find_by_id(&conference.id).await.unwrap();
        assert!(!stored.has_member(carl.id));

        assert!(matches!(
            f.registry.remove_membership(&conference.id, "Carl").await,
            Err(CsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search_respects_roles() {
        let f = fixture(true);
        let (mine, ann) = f.registry.create(None, "Ann").await.unwrap();
        let (theirs, _) = f.registry.create(None, "Bob").await.unwrap();
        let admin = f
            .identity
            .register_permanent(
                "Ada Admin",
                "ada@example.com",
                BTreeSet::from([Role::User, Role::Admin]),
            )
            .await
            .unwrap();

        let everything = f.registry.search_by_id_fragment("", &admin).await.unwrap();
        assert_eq!(everything.len(), 2);

        let own = f.registry.search_by_id_fragment("", &ann).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own.first().unwrap().id, mine.id);

        let fragment = theirs.id.as_str().get(2..8).unwrap();
        let hidden = f
            .registry
            .search_by_id_fragment(fragment, &ann)
            .await
            .unwrap();
        assert!(hidden.iter().all(|c| c.id != theirs.id));

        assert!(matches!(
            f.registry.list_all(&ann).await,
            Err(CsError::Forbidden(_))
        ));
        assert_eq!(f.registry.list_all(&admin).await.unwrap().len(), 2);
    }

    async fn insert_stale(f: &Fixture, id: &str, member: &Participant) -> ConferenceId {
        let id = ConferenceId::parse(id).unwrap();
        let mut conference = Conference::new(id.clone());
        conference.created_at = Utc::now() - Duration::days(45);
        f.store.insert_conference(&conference).await.unwrap();
        f.store.add_member(&id, member.id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_reclaim_twice_is_noop_second_time() {
        let f = fixture(true);
        let ann = f.identity.create_temporary("Ann").await.unwrap();
        let stale = insert_stale(&f, "stale", &ann).await;
        f.store.insert_chat(Some(&stale), &[ann.id]).await.unwrap();
        let (fresh, _) = f.registry.create(None, "Bob").await.unwrap();

        let first = f.registry.reclaim_unused().await.unwrap();
        assert_eq!(first.conferences_reclaimed, 1);
        assert_eq!(first.participants_deleted, 1);
        assert!(f.store.get_conference(&stale).await.unwrap().is_none());
        assert!(f.store.get_conference(&fresh.id).await.unwrap().is_some());

        let second = f.registry.reclaim_unused().await.unwrap();
        assert_eq!(second, ReclaimReport::default());
    }

    #[tokio::test]
    async fn test_reclaim_failure_does_not_abort_pass() {
        let store = Arc::new(FaultyStore::new(MemoryStore::new()));
        let f = fixture_on(Arc::clone(&store) as Arc<dyn Store>, true);
        let ann = f.identity.create_temporary("Ann").await.unwrap();
        let bea = f.identity.create_temporary("Bea").await.unwrap();
        let first = insert_stale(&f, "first", &ann).await;
        let second = insert_stale(&f, "second", &bea).await;

        store.fail_next("delete_conference", 1);
        let report = f.registry.reclaim_unused().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.conferences_reclaimed, 1);

        let mut remaining = 0;
        for id in [&first, &second] {
            if f.store.get_conference(id).await.unwrap().is_some() {
                remaining += 1;
            }
        }
        assert_eq!(remaining, 1);

        let retry = f.registry.reclaim_unused().await.unwrap();
        assert_eq!(retry.failed, 0);
        assert_eq!(retry.conferences_reclaimed, 1);
        assert!(f.store.get_conference(&first).await.unwrap().is_none());
        assert!(f.store.get_conference(&second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reclaim_skips_occupied_when_idle_required() {
        let f = fixture(true);
        let ann = f.identity.create_temporary("Ann").await.unwrap();
        let stale = insert_stale(&f, "busy", &ann).await;
        f.presence.join(ann.id, &stale).await.unwrap();

        let report = f.registry.reclaim_unused().await.unwrap();
        assert_eq!(report.conferences_reclaimed, 0);
        assert_eq!(report.skipped_active, 1);
        assert!(f.store.get_conference(&stale).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reclaim_age_only_removes_occupied() {
        let f = fixture(false);
        let bob = f
            .identity
            .register_permanent("Bob Builder", "bob@example.com", BTreeSet::new())
            .await
            .unwrap();
        let stale = insert_stale(&f, "busy", &bob).await;
        f.presence.join(bob.id, &stale).await.unwrap();

        let report = f.registry.reclaim_unused().await.unwrap();
        assert_eq!(report.conferences_reclaimed, 1);
        assert_eq!(report.participants_deleted, 0);
        assert!(f.store.get_conference(&stale).await.unwrap().is_none());
        assert_eq!(f.presence.count_participant_joins(bob.id).await.unwrap(), 0);
        assert!(f.store.get_participant(bob.id).await.unwrap().is_some());
    }
}
