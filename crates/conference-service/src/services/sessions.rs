//! Conference session orchestration.
//!
//! Ties the registry, presence tracker, chat hub and device aggregator
//! together for the flows a client drives: joining and leaving a conference
//! and connecting devices.

use crate::errors::CsError;
use crate::models::{
    Conference, ConnectDevicesRequest, DeviceConfiguration, Message, MessageType, Participant,
};
use crate::services::chats::ChatHub;
use crate::services::conferences::{ConferenceRegistry, LeaveOutcome};
use crate::services::devices::DeviceAggregator;
use crate::services::identity::{validate_display_name, Identity, IdentityResolver};
use crate::services::presence::PresenceTracker;
use common::secret::SecretString;
use common::types::ConferenceId;
use std::sync::Arc;
use tracing::instrument;

/// Everything a client needs after joining.
#[derive(Debug, Clone)]
pub struct SessionJoin {
    pub conference: Conference,
    pub participant: Participant,

    /// Sessions this participant now holds in the conference.
    pub join_count: i64,

    /// Decrypted conference chat history.
    pub history: Vec<Message>,
}

pub struct ConferenceSessions {
    identity: Arc<IdentityResolver>,
    registry: Arc<ConferenceRegistry>,
    presence: Arc<PresenceTracker>,
    chats: Arc<ChatHub>,
    devices: Arc<DeviceAggregator>,
}

impl ConferenceSessions {
    pub fn new(
        identity: Arc<IdentityResolver>,
        registry: Arc<ConferenceRegistry>,
        presence: Arc<PresenceTracker>,
        chats: Arc<ChatHub>,
        devices: Arc<DeviceAggregator>,
    ) -> Self {
        Self {
            identity,
            registry,
            presence,
            chats,
            devices,
        }
    }

    /// Join a conference.
    ///
    /// The password is checked before any participant is created or attached.
    /// A name-only caller never resolves to a registered participant; it
    /// reuses a temporary member of this conference with the same name, if
    /// any. The conference chat is prepared before the session is opened, so
    /// a chat failure leaves no join row behind.
    #[instrument(skip_all, name = "cs.sessions.join", fields(conference_id = %conference_id))]
    pub async fn join(
        &self,
        conference_id: &ConferenceId,
        identity: &Identity,
        password: Option<&SecretString>,
    ) -> Result<SessionJoin, CsError> {
        self.registry.authorize(conference_id, password).await?;

        let participant = match identity {
            Identity::Authenticated(_) => self.identity.resolve(identity).await?,
            Identity::Named(name) => self.registry.add_guest(name, conference_id).await?,
        };

        let chat = self
            .chats
            .ensure_conference_chat(conference_id, participant.id)
            .await?;
        let (_, join) = self
            .registry
            .open_session(conference_id, &participant)
            .await?;

        let join_count = self
            .presence
            .count_joins(participant.id, conference_id)
            .await?;
        let notice = if join_count == 1 {
            MessageType::FirstJoin
        } else {
            MessageType::Join
        };
        self.chats
            .announce(notice, chat.id, &participant.display_name);

        let history = self.chats.find_all_chat_messages(chat.id).await?;
        let conference = self.registry.find_by_id(conference_id).await?;

        tracing::info!(
            target: "cs.sessions",
            conference_id = %conference_id,
            participant_id = %participant.id,
            join_id = join.id,
            join_count = join_count,
            "Participant joined conference"
        );

        Ok(SessionJoin {
            conference,
            participant,
            join_count,
            history,
        })
    }

    /// Close one of the participant's sessions and tell the conference chat.
    #[instrument(skip_all, name = "cs.sessions.leave", fields(conference_id = %conference_id))]
    pub async fn leave(
        &self,
        conference_id: &ConferenceId,
        participant: &Participant,
    ) -> Result<LeaveOutcome, CsError> {
        let outcome = self.registry.leave(conference_id, participant).await?;

        if outcome.left {
            let conference = self.registry.find_by_id(conference_id).await?;
            if let Some(chat_id) = conference.chat_id {
                self.chats
                    .announce(MessageType::Leave, chat_id, &participant.display_name);
            }
        }

        tracing::info!(
            target: "cs.sessions",
            conference_id = %conference_id,
            participant_id = %participant.id,
            left = outcome.left,
            participant_deleted = outcome.participant_deleted,
            "Participant left conference"
        );
        Ok(outcome)
    }

    /// Save a device selection, creating a conference when none is named.
    #[instrument(skip_all, name = "cs.sessions.connect_devices")]
    pub async fn connect_devices(
        &self,
        request: ConnectDevicesRequest,
        acting: Option<&Participant>,
    ) -> Result<DeviceConfiguration, CsError> {
        let display_name = validate_display_name(&request.display_name)?.to_string();

        if request.cameras.is_empty() {
            return Err(CsError::ValidationFailed(
                "At least one camera must be selected".to_string(),
            ));
        }
        let has_microphone = request
            .microphone_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty());
        if !has_microphone {
            return Err(CsError::ValidationFailed(
                "A microphone must be selected".to_string(),
            ));
        }

        let conference_id = match request.conference_id.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                let id = ConferenceId::parse(raw.trim())
                    .map_err(|_| CsError::NotFound("Conference not found".to_string()))?;
                self.registry.find_by_id(&id).await?.id
            }
            _ => {
                let (conference, _) = self.registry.create(acting, &display_name).await?;
                conference.id
            }
        };

        self.devices
            .save(&DeviceConfiguration {
                conference_id,
                user_name: display_name,
                microphone_id: request.microphone_id,
                microphone_label: request.microphone_label,
                cameras: request.cameras,
                grid: request.grid,
            })
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{Camera, GridSize};
    use crate::repositories::{FaultyStore, MemoryStore, Store};
    use crate::services::cipher::MessageCipher;
    use crate::services::conferences::RegistrySettings;
    use crate::services::identity::StoreDirectory;
    use crate::services::topics::TopicHub;

    struct Fixture {
        registry: Arc<ConferenceRegistry>,
        chats: Arc<ChatHub>,
        sessions: ConferenceSessions,
    }

    fn fixture() -> Fixture {
        fixture_on(Arc::new(MemoryStore::new()))
    }

    fn fixture_on(store: Arc<dyn Store>) -> Fixture {
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
                password_hash_cost: 4,
                ..RegistrySettings::default()
            },
        ));
        let cipher = Arc::new(MessageCipher::new(&[1u8; 32]).unwrap());
        let chats = Arc::new(ChatHub::new(
            Arc::clone(&store),
            cipher,
            Arc::new(TopicHub::new()),
        ));
        let sessions = ConferenceSessions::new(
            identity,
            Arc::clone(&registry),
            presence,
            Arc::clone(&chats),
            devices,
        );
        Fixture {
            registry,
            chats,
            sessions,
        }
    }

    fn camera(id: &str, order: i32) -> Camera {
        Camera {
            device_id: id.to_string(),
            label: format!("Camera {}", id),
            order,
        }
    }

    fn devices_request(conference_id: Option<&str>) -> ConnectDevicesRequest {
        ConnectDevicesRequest {
            conference_id: conference_id.map(str::to_string),
            display_name: "Ann".to_string(),
            microphone_id: Some("mic-1".to_string()),
            microphone_label: Some("Headset".to_string()),
            cameras: vec![camera("cam-1", 0)],
            grid: GridSize { rows: 1, cols: 1 },
        }
    }

    #[tokio::test]
    async fn test_named_join_reuses_temporary_member() {
        let f = fixture();
        let (conference, _) = f.registry.create(None, "Host").await.unwrap();
        let named = Identity::Named("Ann".to_string());

        let first = f.sessions.join(&conference.id, &named, None).await.unwrap();
        let second = f.sessions.join(&conference.id, &named, None).await.unwrap();

        assert_eq!(first.participant.id, second.participant.id);
        assert_eq!(first.join_count, 1);
        assert_eq!(second.join_count, 2);
        assert_eq!(second.conference.users.len(), 2);
    }

    #[tokio::test]
    async fn test_named_join_cannot_claim_registered_participant() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bob = Participant::permanent("Bob Builder", "bob@example.com", Default::default());
        store.insert_participant(&bob).await.unwrap();
        let f = fixture_on(Arc::clone(&store));
        let (conference, host) = f.registry.create(None, "Host").await.unwrap();

        let result = f
            .sessions
            .join(&conference.id, &Identity::Named("Bob Builder".to_string()), None)
            .await;
        assert!(matches!(result, Err(CsError::Forbidden(_))));

        let stored = f.registry.find_by_id(&conference.id).await.unwrap();
        assert_eq!(stored.users, vec![host.id]);
        assert_eq!(store.count_participant_joins(bob.id).await.unwrap(), 0);

        let signed_in = f
            .sessions
            .join(&conference.id, &Identity::Authenticated(bob.id), None)
            .await
            .unwrap();
        assert_eq!(signed_in.participant.id, bob.id);
    }

    #[tokio::test]
    async fn test_chat_failure_leaves_no_join_row() {
        let store = Arc::new(FaultyStore::new(MemoryStore::new()));
        let f = fixture_on(Arc::clone(&store) as Arc<dyn Store>);
        let (conference, _) = f.registry.create(None, "Host").await.unwrap();
        let named = Identity::Named("Ann".to_string());

        store.fail_next("insert_chat", 1);
        let failed = f.sessions.join(&conference.id, &named, None).await;
        assert!(matches!(failed, Err(CsError::Database(_))));
        assert_eq!(store.count_conference_joins(&conference.id).await.unwrap(), 1);

        let retried = f.sessions.join(&conference.id, &named, None).await.unwrap();
        assert_eq!(retried.join_count, 1);
        assert!(retried.conference.chat_id.is_some());
        assert_eq!(store.count_conference_joins(&conference.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_join_announces_first_join_then_join() {
        let f = fixture();
        let (conference, host) = f.registry.create(None, "Host").await.unwrap();
        let chat = f
            .chats
            .ensure_conference_chat(&conference.id, host.id)
            .await
            .unwrap();
        let mut receiver = f.chats.subscribe(chat.id).unwrap();
        let named = Identity::Named("Ann".to_string());

        f.sessions.join(&conference.id, &named, None).await.unwrap();
        f.sessions.join(&conference.id, &named, None).await.unwrap();

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.event_type, MessageType::FirstJoin);
        assert_eq!(first.author.as_deref(), Some("Ann"));
        assert_eq!(receiver.recv().await.unwrap().event_type, MessageType::Join);
    }

    #[tokio::test]
    async fn test_wrong_password_creates_nobody() {
        let f = fixture();
        let (conference, host) = f.registry.create(None, "Host").await.unwrap();
        f.registry
            .change_password(&conference.id, &SecretString::from("pw"), &host)
            .await
            .unwrap();

        let result = f
            .sessions
            .join(&conference.id, &Identity::Named("Ann".to_string()), None)
            .await;
        assert!(matches!(result, Err(CsError::Forbidden(_))));

        let stored = f.registry.find_by_id(&conference.id).await.unwrap();
        assert_eq!(stored.users, vec![host.id]);
    }

    #[tokio::test]
    async fn test_join_replays_history() {
        let f = fixture();
        let (conference, _) = f.registry.create(None, "Host").await.unwrap();
        let ann = f
            .sessions
            .join(&conference.id, &Identity::Named("Ann".to_string()), None)
            .await
            .unwrap();
        let chat_id = ann.conference.chat_id.unwrap();
        f.chats
            .send(chat_id, crate::models::MessageDraft::text("earlier"), &ann.participant)
            .await
            .unwrap();

        let bob = f
            .sessions
            .join(&conference.id, &Identity::Named("Bob".to_string()), None)
            .await
            .unwrap();
        let texts: Vec<&str> = bob.history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["earlier"]);
    }

    #[tokio::test]
    async fn test_leave_broadcasts_on_conference_chat() {
        let f = fixture();
        let (conference, _) = f.registry.create(None, "Host").await.unwrap();
        let ann = f
            .sessions
            .join(&conference.id, &Identity::Named("Ann".to_string()), None)
            .await
            .unwrap();
        let chat_id = ann.conference.chat_id.unwrap();
        let mut receiver = f.chats.subscribe(chat_id).unwrap();

        let outcome = f
            .sessions
            .leave(&conference.id, &ann.participant)
            .await
            .unwrap();
        assert!(outcome.left);
        assert!(outcome.participant_deleted);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type, MessageType::Leave);
        assert_eq!(event.author.as_deref(), Some("Ann"));
    }

    #[tokio::test]
    async fn test_connect_devices_creates_conference() {
        let f = fixture();
        let saved = f
            .sessions
            .connect_devices(devices_request(None), None)
            .await
            .unwrap();

        let conference = f.registry.find_by_id(&saved.conference_id).await.unwrap();
        assert_eq!(conference.users.len(), 1);
        assert_eq!(saved.grid, GridSize { rows: 1, cols: 1 });
    }

    #[tokio::test]
    async fn test_connect_devices_validates_selection() {
        let f = fixture();

        let mut no_camera = devices_request(None);
        no_camera.cameras.clear();
        assert!(matches!(
            f.sessions.connect_devices(no_camera, None).await,
            Err(CsError::ValidationFailed(_))
        ));

        let mut no_microphone = devices_request(None);
        no_microphone.microphone_id = None;
        assert!(matches!(
            f.sessions.connect_devices(no_microphone, None).await,
            Err(CsError::ValidationFailed(_))
        ));

        assert!(matches!(
            f.sessions
                .connect_devices(devices_request(Some("missing")), None)
                .await,
            Err(CsError::NotFound(_))
        ));
    }
}
