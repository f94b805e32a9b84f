//! Repository layer for the conference service.
//!
//! Services talk to persistence through the [`Store`] trait. Entities are kept
//! in an arena keyed by id and every bidirectional relation
//! (participant/conference, participant/chat, join/conference) lives in a
//! relation table owned by the store, so a relation is either fully present or
//! fully absent.
//!
//! Two implementations are provided:
//! - [`MemoryStore`] - process-local arena, used for development and tests
//! - [`PgStore`] - PostgreSQL via sqlx
//!
//! [`FaultyStore`] wraps a `MemoryStore` and fails chosen operations, for
//! exercising error paths in tests.

pub mod faulty;
pub mod memory;
pub mod postgres;

pub use faulty::FaultyStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::errors::CsError;
use crate::models::{
    Chat, Conference, ConferenceJoin, DeviceConfigurationRow, FileRef, Message, MessageType,
    Participant,
};
use chrono::{DateTime, Utc};
use common::types::{ChatId, ConferenceId, MessageId, ParticipantId};

/// A message ready to be persisted. `text` is already in its at-rest form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub author: String,
    pub author_id: Option<ParticipantId>,
    pub pub_date: String,
    pub message_type: MessageType,
    pub file: Option<FileRef>,
}

/// Durable storage for every entity the service owns.
///
/// Relation mutations (`add_member`, `add_chat_participant`, `insert_chat`
/// with a conference, ...) update both sides in one step. Parent deletions
/// (`delete_conference`, `delete_chat`) do not cascade into joins, devices or
/// messages; callers remove those first.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    async fn insert_participant(&self, participant: &Participant) -> Result<(), CsError>;

    async fn get_participant(&self, id: ParticipantId) -> Result<Option<Participant>, CsError>;

    /// First permanent participant whose display name matches exactly.
    async fn find_permanent_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Option<Participant>, CsError>;

    async fn find_participant_by_email(&self, email: &str)
        -> Result<Option<Participant>, CsError>;

    async fn temporary_participants_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Participant>, CsError>;

    /// Delete a participant together with its memberships, joins and chat
    /// participation. Affected chats get their type recomputed; authored
    /// messages keep their author label but lose the participant reference.
    async fn delete_participant(&self, id: ParticipantId) -> Result<bool, CsError>;

    // ------------------------------------------------------------------
    // Conferences and membership
    // ------------------------------------------------------------------

    /// Insert a conference row. Fails with `Conflict` if the id is taken.
    async fn insert_conference(&self, conference: &Conference) -> Result<(), CsError>;

    /// Load a conference with its member list.
    async fn get_conference(&self, id: &ConferenceId) -> Result<Option<Conference>, CsError>;

    async fn set_conference_password(
        &self,
        id: &ConferenceId,
        password_hash: Option<String>,
    ) -> Result<(), CsError>;

    /// Point the conference at its chat.
    async fn link_conference_chat(
        &self,
        id: &ConferenceId,
        chat_id: ChatId,
    ) -> Result<(), CsError>;

    /// Delete the conference row. Fails while joins, members, device rows or a
    /// chat still reference it.
    async fn delete_conference(&self, id: &ConferenceId) -> Result<bool, CsError>;

    async fn list_conferences(&self) -> Result<Vec<Conference>, CsError>;

    async fn conferences_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Conference>, CsError>;

    /// Conferences whose id contains `fragment`.
    async fn search_conferences(&self, fragment: &str) -> Result<Vec<Conference>, CsError>;

    /// Returns false if the participant was already a member.
    async fn add_member(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<bool, CsError>;

    /// Returns false if the participant was not a member.
    async fn remove_member(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<bool, CsError>;

    /// Conferences the participant is a member of.
    async fn conferences_of(&self, participant_id: ParticipantId)
        -> Result<Vec<Conference>, CsError>;

    // ------------------------------------------------------------------
    // Joins
    // ------------------------------------------------------------------

    async fn insert_join(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<ConferenceJoin, CsError>;

    /// Delete the oldest join row for the pair. Returns false if none existed.
    async fn delete_first_join(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<bool, CsError>;

    async fn count_joins(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<i64, CsError>;

    async fn count_conference_joins(&self, conference_id: &ConferenceId) -> Result<i64, CsError>;

    async fn count_participant_joins(&self, participant_id: ParticipantId)
        -> Result<i64, CsError>;

    /// Join rows held by the participant, oldest first.
    async fn joins_of(&self, participant_id: ParticipantId)
        -> Result<Vec<ConferenceJoin>, CsError>;

    async fn delete_conference_joins(&self, conference_id: &ConferenceId) -> Result<u64, CsError>;

    // ------------------------------------------------------------------
    // Device configurations
    // ------------------------------------------------------------------

    /// Insert or replace the row keyed by (conference, user name).
    async fn upsert_device_configuration(
        &self,
        row: &DeviceConfigurationRow,
    ) -> Result<DeviceConfigurationRow, CsError>;

    async fn device_configuration(
        &self,
        conference_id: &ConferenceId,
        user_name: &str,
    ) -> Result<Option<DeviceConfigurationRow>, CsError>;

    /// Rows of a conference in insertion order.
    async fn device_configurations_for_conference(
        &self,
        conference_id: &ConferenceId,
    ) -> Result<Vec<DeviceConfigurationRow>, CsError>;

    /// Rows saved under the given user name, across all conferences.
    async fn device_configurations_for_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<DeviceConfigurationRow>, CsError>;

    async fn delete_device_configurations(
        &self,
        conference_id: &ConferenceId,
    ) -> Result<u64, CsError>;

    // ------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------

    /// Create a chat. When `conference_id` is set the conference is linked to
    /// the new chat in the same step; `Conflict` if it already has one.
    async fn insert_chat(
        &self,
        conference_id: Option<&ConferenceId>,
        participants: &[ParticipantId],
    ) -> Result<Chat, CsError>;

    async fn get_chat(&self, id: ChatId) -> Result<Option<Chat>, CsError>;

    async fn chats_of(&self, participant_id: ParticipantId) -> Result<Vec<Chat>, CsError>;

    /// Add a participant and recompute the chat type. Adding a present
    /// participant is a no-op.
    async fn add_chat_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError>;

    /// Remove a participant and recompute the chat type. Removing an absent
    /// participant is a no-op.
    async fn remove_chat_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError>;

    /// Delete the chat row, dropping any remaining participant links and
    /// unlinking its conference. Messages must already be gone.
    async fn delete_chat(&self, id: ChatId) -> Result<bool, CsError>;

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, CsError>;

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, CsError>;

    async fn delete_message(&self, id: MessageId) -> Result<bool, CsError>;

    /// Messages of a chat in persisted order.
    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>, CsError>;

    async fn messages_by_author(&self, author_id: ParticipantId) -> Result<Vec<Message>, CsError>;

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CsError>;

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), CsError>;

    /// Connectivity check used by the readiness probe.
    async fn ping(&self) -> Result<(), CsError>;
}
