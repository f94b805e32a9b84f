//! Conference service models.
//!
//! Domain entities shared by the store, the services and the HTTP layer,
//! followed by the request/response bodies of the JSON API.

use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{ChatId, ConferenceId, MessageId, ParticipantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Publication timestamp format for chat messages.
pub const PUB_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Settings key holding the conference cleanup interval in milliseconds.
pub const CONFERENCE_INTERVAL_SETTING: &str = "conferenceInterval";

/// Settings key holding the temporary participant cleanup interval in milliseconds.
pub const USER_INTERVAL_SETTING: &str = "userInterval";

/// Maximum display name length.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 100;

/// Maximum chat message length in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4000;

// ============================================================================
// Participants
// ============================================================================

/// Whether a participant holds a durable account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Registered, credentialed identity.
    Permanent,

    /// Name-only identity minted on join; reclaimed when unused.
    Temporary,
}

impl AccountKind {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Permanent => "permanent",
            AccountKind::Temporary => "temporary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "permanent" => Some(AccountKind::Permanent),
            "temporary" => Some(AccountKind::Temporary),
            _ => None,
        }
    }
}

/// Role tags attached to a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
    Creator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::Creator => "CREATOR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            "CREATOR" => Some(Role::Creator),
            _ => None,
        }
    }

    /// Privileged roles see every conference in searches and may edit settings.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Creator)
    }
}

/// A user identity that can join conferences and chats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,

    /// "Name Surname" for registered users, free text for temporary ones.
    pub display_name: String,

    /// Contact address; only permanent participants have one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub kind: AccountKind,

    pub created_at: DateTime<Utc>,

    pub roles: BTreeSet<Role>,
}

impl Participant {
    /// Create a temporary participant with the given display name.
    pub fn temporary(display_name: &str) -> Self {
        Self {
            id: ParticipantId::new(),
            display_name: display_name.to_string(),
            email: None,
            kind: AccountKind::Temporary,
            created_at: Utc::now(),
            roles: BTreeSet::from([Role::User]),
        }
    }

    /// Create a permanent participant.
    pub fn permanent(display_name: &str, email: &str, roles: BTreeSet<Role>) -> Self {
        Self {
            id: ParticipantId::new(),
            display_name: display_name.to_string(),
            email: Some(email.to_string()),
            kind: AccountKind::Permanent,
            created_at: Utc::now(),
            roles,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.kind == AccountKind::Temporary
    }

    pub fn is_privileged(&self) -> bool {
        self.roles.iter().any(Role::is_privileged)
    }

    /// Author label stamped on messages: email for permanent accounts,
    /// display name for temporary ones.
    pub fn author_label(&self) -> String {
        match (&self.kind, &self.email) {
            (AccountKind::Permanent, Some(email)) => email.clone(),
            _ => self.display_name.clone(),
        }
    }
}

// ============================================================================
// Conferences and presence
// ============================================================================

/// A conference room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conference {
    pub id: ConferenceId,

    pub created_at: DateTime<Utc>,

    /// bcrypt hash; `None` means the conference is not protected.
    pub password_hash: Option<String>,

    /// The conference's chat, once one has been created.
    pub chat_id: Option<ChatId>,

    /// Every participant ever associated with the conference, in join order.
    pub users: Vec<ParticipantId>,
}

impl Conference {
    pub fn new(id: ConferenceId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            password_hash: None,
            chat_id: None,
            users: Vec::new(),
        }
    }

    pub fn is_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn has_member(&self, participant_id: ParticipantId) -> bool {
        self.users.contains(&participant_id)
    }
}

/// One attendance record. Several may exist for the same pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceJoin {
    pub id: i64,
    pub participant_id: ParticipantId,
    pub conference_id: ConferenceId,
    pub joined_at: DateTime<Utc>,
}

// ============================================================================
// Device configurations
// ============================================================================

/// A selected camera as persisted in the compact camera array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    pub device_id: String,
    pub label: String,
    pub order: i32,
}

/// Camera grid shape chosen by the participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSize {
    pub rows: i32,
    pub cols: i32,
}

/// A device configuration as held by the store.
///
/// `camera_configuration` is the raw JSON camera array; parsing happens in
/// the device aggregator so that a corrupt row only affects itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfigurationRow {
    pub id: i64,
    pub conference_id: ConferenceId,
    pub user_name: String,
    pub microphone_id: Option<String>,
    pub microphone_label: Option<String>,
    pub camera_configuration: String,
    pub grid: GridSize,
}

/// A parsed device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfiguration {
    pub conference_id: ConferenceId,
    pub user_name: String,
    pub microphone_id: Option<String>,
    pub microphone_label: Option<String>,
    pub cameras: Vec<Camera>,
    pub grid: GridSize,
}

// ============================================================================
// Chats and messages
// ============================================================================

/// Chat classification derived from the participant count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatType {
    Single,
    Personal,
    Group,
}

impl ChatType {
    /// `Single` for 0 or 1 participants, `Personal` for 2, `Group` above.
    pub fn for_participant_count(count: usize) -> Self {
        match count {
            0 | 1 => ChatType::Single,
            2 => ChatType::Personal,
            _ => ChatType::Group,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Single => "SINGLE",
            ChatType::Personal => "PERSONAL",
            ChatType::Group => "GROUP",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SINGLE" => Some(ChatType::Single),
            "PERSONAL" => Some(ChatType::Personal),
            "GROUP" => Some(ChatType::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,

    #[serde(rename = "type")]
    pub chat_type: ChatType,

    /// Set when this is a conference chat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conference_id: Option<ConferenceId>,

    pub participants: Vec<ParticipantId>,
}

impl Chat {
    pub fn has_participant(&self, participant_id: ParticipantId) -> bool {
        self.participants.contains(&participant_id)
    }

    pub fn is_conference_chat(&self) -> bool {
        self.conference_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Chat,
    ChatFile,
    ConferenceInvitation,
    ChatInvitation,
    Join,
    Leave,
    Delete,
    Clear,
    ChatDeleted,
    FirstJoin,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Chat => "CHAT",
            MessageType::ChatFile => "CHAT_FILE",
            MessageType::ConferenceInvitation => "CONFERENCE_INVITATION",
            MessageType::ChatInvitation => "CHAT_INVITATION",
            MessageType::Join => "JOIN",
            MessageType::Leave => "LEAVE",
            MessageType::Delete => "DELETE",
            MessageType::Clear => "CLEAR",
            MessageType::ChatDeleted => "CHAT_DELETED",
            MessageType::FirstJoin => "FIRST_JOIN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CHAT" => Some(MessageType::Chat),
            "CHAT_FILE" => Some(MessageType::ChatFile),
            "CONFERENCE_INVITATION" => Some(MessageType::ConferenceInvitation),
            "CHAT_INVITATION" => Some(MessageType::ChatInvitation),
            "JOIN" => Some(MessageType::Join),
            "LEAVE" => Some(MessageType::Leave),
            "DELETE" => Some(MessageType::Delete),
            "CLEAR" => Some(MessageType::Clear),
            "CHAT_DELETED" => Some(MessageType::ChatDeleted),
            "FIRST_JOIN" => Some(MessageType::FirstJoin),
            _ => None,
        }
    }

    /// Types a client may persist through the send path.
    pub fn is_sendable(&self) -> bool {
        matches!(
            self,
            MessageType::Chat
                | MessageType::ChatFile
                | MessageType::ConferenceInvitation
                | MessageType::ChatInvitation
        )
    }
}

/// Reference to an attachment held by the external file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub file_id: String,
    pub file_name: String,
    pub view_url: String,
    pub download_url: String,
}

/// A chat message. `text` is always clear text outside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub text: String,
    pub author: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<ParticipantId>,

    pub pub_date: String,

    #[serde(rename = "type")]
    pub message_type: MessageType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
}

/// A message before it has been stamped and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default)]
    pub text: String,

    #[serde(rename = "type", default)]
    pub message_type: MessageType,

    #[serde(default)]
    pub file: Option<FileRef>,
}

impl MessageDraft {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            message_type: MessageType::Chat,
            file: None,
        }
    }
}

/// Event published on a chat or presence topic.
///
/// Persisted messages are forwarded whole; delete carries only the id and
/// clear carries nothing beyond its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub event_type: MessageType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
}

impl ChatEvent {
    fn bare(event_type: MessageType, chat_id: Option<ChatId>) -> Self {
        Self {
            event_type,
            chat_id,
            message_id: None,
            text: None,
            author: None,
            pub_date: None,
            file: None,
        }
    }

    pub fn message(message: &Message) -> Self {
        Self {
            event_type: message.message_type,
            chat_id: Some(message.chat_id),
            message_id: Some(message.id),
            text: Some(message.text.clone()),
            author: Some(message.author.clone()),
            pub_date: Some(message.pub_date.clone()),
            file: message.file.clone(),
        }
    }

    pub fn deleted(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            message_id: Some(message_id),
            ..Self::bare(MessageType::Delete, Some(chat_id))
        }
    }

    pub fn cleared(chat_id: ChatId) -> Self {
        Self::bare(MessageType::Clear, Some(chat_id))
    }

    pub fn chat_deleted(chat_id: ChatId) -> Self {
        Self::bare(MessageType::ChatDeleted, Some(chat_id))
    }

    /// Join/first-join/leave notice naming the participant.
    pub fn presence(event_type: MessageType, chat_id: Option<ChatId>, who: &str) -> Self {
        Self {
            author: Some(who.to_string()),
            pub_date: Some(Utc::now().format(PUB_DATE_FORMAT).to_string()),
            ..Self::bare(event_type, chat_id)
        }
    }
}

// ============================================================================
// HTTP API models
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,

    /// Store connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    pub id: ParticipantId,
    pub display_name: String,
    pub kind: AccountKind,
}

impl From<&Participant> for ParticipantResponse {
    fn from(participant: &Participant) -> Self {
        Self {
            id: participant.id,
            display_name: participant.display_name.clone(),
            kind: participant.kind,
        }
    }
}

/// Conference as returned to clients; never includes the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceResponse {
    pub id: ConferenceId,
    pub created_at: DateTime<Utc>,
    pub password_protected: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ChatId>,

    pub users: Vec<ParticipantId>,
}

impl From<&Conference> for ConferenceResponse {
    fn from(conference: &Conference) -> Self {
        Self {
            id: conference.id.clone(),
            created_at: conference.created_at,
            password_protected: conference.is_protected(),
            chat_id: conference.chat_id,
            users: conference.users.clone(),
        }
    }
}

/// Request body for `POST /v1/conferences`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateConferenceRequest {
    /// Name for a temporary initiator; ignored when authenticated.
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConferenceResponse {
    pub conference_id: ConferenceId,
    pub participant: ParticipantResponse,
}

/// Request body for `POST /v1/conferences/:id/join`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JoinConferenceRequest {
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub password: Option<SecretString>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConferenceResponse {
    pub conference: ConferenceResponse,
    pub participant: ParticipantResponse,
    pub join_count: i64,

    /// Decrypted conference chat history for replay.
    pub history: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCountResponse {
    pub conference_id: ConferenceId,
    pub count: i64,
}

/// Request body for `PUT /v1/conferences/:id/password`. Empty clears it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub password: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub fragment: String,
}

/// Request body for `POST /v1/devices`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectDevicesRequest {
    /// Existing conference; a new one is created when absent.
    #[serde(default)]
    pub conference_id: Option<String>,

    pub display_name: String,

    #[serde(default)]
    pub microphone_id: Option<String>,

    #[serde(default)]
    pub microphone_label: Option<String>,

    #[serde(default)]
    pub cameras: Vec<Camera>,

    #[serde(default)]
    pub grid: GridSize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectDevicesResponse {
    pub conference_id: ConferenceId,
}

/// Request body for `POST /v1/chats`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FindOrCreateChatRequest {
    pub participant_id: ParticipantId,
}

/// Request body for `POST /v1/chats/:id/join`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JoinChatRequest {
    /// Set when the caller is accepting an explicit invitation.
    #[serde(default)]
    pub invitation_accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChatResponse {
    pub outcome: String,
    pub chat: Chat,
}

/// Request body for `PUT /v1/settings/:key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSettingRequest {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_type_for_participant_count() {
        assert_eq!(ChatType::for_participant_count(0), ChatType::Single);
        assert_eq!(ChatType::for_participant_count(1), ChatType::Single);
        assert_eq!(ChatType::for_participant_count(2), ChatType::Personal);
        assert_eq!(ChatType::for_participant_count(3), ChatType::Group);
        assert_eq!(ChatType::for_participant_count(12), ChatType::Group);
    }

    #[test]
    fn test_message_type_string_round_trip() {
        for message_type in [
            MessageType::Chat,
            MessageType::ChatFile,
            MessageType::ConferenceInvitation,
            MessageType::ChatInvitation,
            MessageType::Join,
            MessageType::Leave,
            MessageType::Delete,
            MessageType::Clear,
            MessageType::ChatDeleted,
            MessageType::FirstJoin,
        ] {
            assert_eq!(MessageType::parse(message_type.as_str()), Some(message_type));
            let json = serde_json::to_string(&message_type).unwrap();
            assert_eq!(json, format!("\"{}\"", message_type.as_str()));
        }
        assert_eq!(MessageType::parse("chat"), None);
    }

    #[test]
    fn test_author_label_uses_email_for_permanent() {
        let bob = Participant::permanent("Bob Builder", "bob@example.com", BTreeSet::new());
        assert_eq!(bob.author_label(), "bob@example.com");

        let ann = Participant::temporary("Ann");
        assert_eq!(ann.author_label(), "Ann");
    }

    #[test]
    fn test_privileged_roles() {
        let admin = Participant::permanent(
            "Ada Admin",
            "ada@example.com",
            BTreeSet::from([Role::User, Role::Admin]),
        );
        assert!(admin.is_privileged());
        assert!(!Participant::temporary("Ann").is_privileged());
        assert!(Role::Creator.is_privileged());
        assert!(!Role::User.is_privileged());
    }

    #[test]
    fn test_camera_json_is_camel_case() {
        let camera = Camera {
            device_id: "cam-1".to_string(),
            label: "Front".to_string(),
            order: 2,
        };
        let json = serde_json::to_value(&camera).unwrap();
        assert_eq!(json["deviceId"], "cam-1");
        assert_eq!(json["order"], 2);
    }

    #[test]
    fn test_delete_event_carries_only_id() {
        let event = ChatEvent::deleted(ChatId(3), MessageId(9));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "DELETE");
        assert_eq!(json["messageId"], 9);
        assert!(json.get("text").is_none());
        assert!(json.get("author").is_none());
    }

    #[test]
    fn test_clear_event_has_no_payload() {
        let json = serde_json::to_value(ChatEvent::cleared(ChatId(3))).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), 2);
        assert_eq!(json["type"], "CLEAR");
    }

    #[test]
    fn test_message_draft_defaults_to_chat() {
        let draft: MessageDraft = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(draft.message_type, MessageType::Chat);
        assert!(draft.file.is_none());
    }

    #[test]
    fn test_conference_response_hides_hash() {
        let mut conference = Conference::new(ConferenceId::parse("abc").unwrap());
        conference.password_hash = Some("$2b$04$hash".to_string());

        let json = serde_json::to_string(&ConferenceResponse::from(&conference)).unwrap();
        assert!(json.contains("\"passwordProtected\":true"));
        assert!(!json.contains("$2b$"));
    }

    #[test]
    fn test_join_request_password_is_redacted() {
        let request: JoinConferenceRequest =
            serde_json::from_str(r#"{"displayName": "Ann", "password": "pw"}"#).unwrap();
        assert!(!format!("{:?}", request).contains("\"pw\""));
    }
}
