//! Fault-injecting store for tests.
//!
//! [`FaultyStore`] delegates to a [`MemoryStore`] and fails selected
//! operations on demand, so callers can exercise their error paths without a
//! broken database.
//!
//! ```rust,ignore
//! let store = FaultyStore::new(MemoryStore::new());
//! store.fail_next("insert_join", 1);
//! assert!(store.insert_join(id, &conference).await.is_err());
//! ```

use super::{MemoryStore, NewMessage, Store};
use crate::errors::CsError;
use crate::models::{
    Chat, Conference, ConferenceJoin, DeviceConfigurationRow, Message, Participant,
};
use chrono::{DateTime, Utc};
use common::types::{ChatId, ConferenceId, MessageId, ParticipantId};
use std::collections::HashMap;
use std::sync::Mutex;

/// A [`MemoryStore`] whose operations can be armed to fail.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    /// Remaining failures per operation name.
    faults: Mutex<HashMap<&'static str, usize>>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Make the next `times` calls of `operation` fail with a database error.
    ///
    /// `operation` is the [`Store`] method name, e.g. `"insert_join"`.
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(operation, times);
        }
    }

    /// Number of armed failures not yet consumed for `operation`.
    pub fn pending(&self, operation: &'static str) -> usize {
        self.faults
            .lock()
            .map(|faults| faults.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn trip(&self, operation: &'static str) -> Result<(), CsError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| CsError::Internal("Fault table lock poisoned".to_string()))?;

        match faults.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(CsError::Database(format!(
                    "Injected failure in {}",
                    operation
                )))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Store for FaultyStore {
    async fn insert_participant(&self, participant: &Participant) -> Result<(), CsError> {
        self.trip("insert_participant")?;
        self.inner.insert_participant(participant).await
    }

    async fn get_participant(&self, id: ParticipantId) -> Result<Option<Participant>, CsError> {
        self.trip("get_participant")?;
        self.inner.get_participant(id).await
    }

    async fn find_permanent_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Option<Participant>, CsError> {
        self.trip("find_permanent_by_display_name")?;
        self.inner.find_permanent_by_display_name(display_name).await
    }

    async fn find_participant_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Participant>, CsError> {
        self.trip("find_participant_by_email")?;
        self.inner.find_participant_by_email(email).await
    }

    async fn temporary_participants_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Participant>, CsError> {
        self.trip("temporary_participants_created_before")?;
        self.inner.temporary_participants_created_before(cutoff).await
    }

    async fn delete_participant(&self, id: ParticipantId) -> Result<bool, CsError> {
        self.trip("delete_participant")?;
        self.inner.delete_participant(id).await
    }

    async fn insert_conference(&self, conference: &Conference) -> Result<(), CsError> {
        self.trip("insert_conference")?;
        self.inner.insert_conference(conference).await
    }

    async fn get_conference(&self, id: &ConferenceId) -> Result<Option<Conference>, CsError> {
        self.trip("get_conference")?;
        self.inner.get_conference(id).await
    }

    async fn set_conference_password(
        &self,
        id: &ConferenceId,
        password_hash: Option<String>,
    ) -> Result<(), CsError> {
        self.trip("set_conference_password")?;
        self.inner.set_conference_password(id, password_hash).await
    }

    async fn link_conference_chat(
        &self,
        id: &ConferenceId,
        chat_id: ChatId,
    ) -> Result<(), CsError> {
        self.trip("link_conference_chat")?;
        self.inner.link_conference_chat(id, chat_id).await
    }

    async fn delete_conference(&self, id: &ConferenceId) -> Result<bool, CsError> {
        self.trip("delete_conference")?;
        self.inner.delete_conference(id).await
    }

    async fn list_conferences(&self) -> Result<Vec<Conference>, CsError> {
        self.trip("list_conferences")?;
        self.inner.list_conferences().await
    }

    async fn conferences_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Conference>, CsError> {
        self.trip("conferences_created_before")?;
        self.inner.conferences_created_before(cutoff).await
    }

    async fn search_conferences(&self, fragment: &str) -> Result<Vec<Conference>, CsError> {
        self.trip("search_conferences")?;
        self.inner.search_conferences(fragment).await
    }

    async fn add_member(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<bool, CsError> {
        self.trip("add_member")?;
        self.inner.add_member(conference_id, participant_id).await
    }

    async fn remove_member(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<bool, CsError> {
        self.trip("remove_member")?;
        self.inner.remove_member(conference_id, participant_id).await
    }

    async fn conferences_of(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<Conference>, CsError> {
        self.trip("conferences_of")?;
        self.inner.conferences_of(participant_id).await
    }

    async fn insert_join(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<ConferenceJoin, CsError> {
        self.trip("insert_join")?;
        self.inner.insert_join(participant_id, conference_id).await
    }

    async fn delete_first_join(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<bool, CsError> {
        self.trip("delete_first_join")?;
        self.inner.delete_first_join(participant_id, conference_id).await
    }

    async fn count_joins(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<i64, CsError> {
        self.trip("count_joins")?;
        self.inner.count_joins(participant_id, conference_id).await
    }

    async fn count_conference_joins(&self, conference_id: &ConferenceId) -> Result<i64, CsError> {
        self.trip("count_conference_joins")?;
        self.inner.count_conference_joins(conference_id).await
    }

    async fn count_participant_joins(
        &self,
        participant_id: ParticipantId,
    ) -> Result<i64, CsError> {
        self.trip("count_participant_joins")?;
        self.inner.count_participant_joins(participant_id).await
    }

    async fn joins_of(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<ConferenceJoin>, CsError> {
        self.trip("joins_of")?;
        self.inner.joins_of(participant_id).await
    }

    async fn delete_conference_joins(&self, conference_id: &ConferenceId) -> Result<u64, CsError> {
        self.trip("delete_conference_joins")?;
        self.inner.delete_conference_joins(conference_id).await
    }

    async fn upsert_device_configuration(
        &self,
        row: &DeviceConfigurationRow,
    ) -> Result<DeviceConfigurationRow, CsError> {
        self.trip("upsert_device_configuration")?;
        self.inner.upsert_device_configuration(row).await
    }

    async fn device_configuration(
        &self,
        conference_id: &ConferenceId,
        user_name: &str,
    ) -> Result<Option<DeviceConfigurationRow>, CsError> {
        self.trip("device_configuration")?;
        self.inner.device_configuration(conference_id, user_name).await
    }

    async fn device_configurations_for_conference(
        &self,
        conference_id: &ConferenceId,
    ) -> Result<Vec<DeviceConfigurationRow>, CsError> {
        self.trip("device_configurations_for_conference")?;
        self.inner
            .device_configurations_for_conference(conference_id)
            .await
    }

    async fn device_configurations_for_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<DeviceConfigurationRow>, CsError> {
        self.trip("device_configurations_for_user")?;
        self.inner.device_configurations_for_user(user_name).await
    }

    async fn delete_device_configurations(
        &self,
        conference_id: &ConferenceId,
    ) -> Result<u64, CsError> {
        self.trip("delete_device_configurations")?;
        self.inner.delete_device_configurations(conference_id).await
    }

    async fn insert_chat(
        &self,
        conference_id: Option<&ConferenceId>,
        participants: &[ParticipantId],
    ) -> Result<Chat, CsError> {
        self.trip("insert_chat")?;
        self.inner.insert_chat(conference_id, participants).await
    }

    async fn get_chat(&self, id: ChatId) -> Result<Option<Chat>, CsError> {
        self.trip("get_chat")?;
        self.inner.get_chat(id).await
    }

    async fn chats_of(&self, participant_id: ParticipantId) -> Result<Vec<Chat>, CsError> {
        self.trip("chats_of")?;
        self.inner.chats_of(participant_id).await
    }

    async fn add_chat_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError> {
        self.trip("add_chat_participant")?;
        self.inner.add_chat_participant(chat_id, participant_id).await
    }

    async fn remove_chat_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError> {
        self.trip("remove_chat_participant")?;
        self.inner.remove_chat_participant(chat_id, participant_id).await
    }

    async fn delete_chat(&self, id: ChatId) -> Result<bool, CsError> {
        self.trip("delete_chat")?;
        self.inner.delete_chat(id).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, CsError> {
        self.trip("insert_message")?;
        self.inner.insert_message(message).await
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, CsError> {
        self.trip("get_message")?;
        self.inner.get_message(id).await
    }

    async fn delete_message(&self, id: MessageId) -> Result<bool, CsError> {
        self.trip("delete_message")?;
        self.inner.delete_message(id).await
    }

    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>, CsError> {
        self.trip("messages_for_chat")?;
        self.inner.messages_for_chat(chat_id).await
    }

    async fn messages_by_author(&self, author_id: ParticipantId) -> Result<Vec<Message>, CsError> {
        self.trip("messages_by_author")?;
        self.inner.messages_by_author(author_id).await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CsError> {
        self.trip("get_setting")?;
        self.inner.get_setting(key).await
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), CsError> {
        self.trip("put_setting")?;
        self.inner.put_setting(key, value).await
    }

    async fn ping(&self) -> Result<(), CsError> {
        self.trip("ping")?;
        self.inner.ping().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_armed_failures_are_consumed() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_next("ping", 2);

        assert!(matches!(store.ping().await, Err(CsError::Database(_))));
        assert_eq!(store.pending("ping"), 1);
        assert!(store.ping().await.is_err());
        assert!(store.ping().await.is_ok());

        assert!(store.get_setting("missing").await.unwrap().is_none());
    }
}
