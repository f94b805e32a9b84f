//! In-memory arena store.
//!
//! Entities live in maps keyed by id; relations are vectors of id pairs kept
//! in insertion order. A single mutex guards the whole arena so every trait
//! call observes and leaves a consistent state.

use super::{NewMessage, Store};
use crate::errors::CsError;
use crate::models::{
    Chat, ChatType, Conference, ConferenceJoin, DeviceConfigurationRow, Message, Participant,
};
use chrono::{DateTime, Utc};
use common::types::{ChatId, ConferenceId, MessageId, ParticipantId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct ConferenceRecord {
    created_at: DateTime<Utc>,
    password_hash: Option<String>,
    chat_id: Option<ChatId>,
}

#[derive(Debug, Clone)]
struct ChatRecord {
    chat_type: ChatType,
    conference_id: Option<ConferenceId>,
}

#[derive(Debug, Default)]
struct Arena {
    participants: BTreeMap<ParticipantId, Participant>,
    conferences: BTreeMap<ConferenceId, ConferenceRecord>,
    members: Vec<(ConferenceId, ParticipantId)>,
    joins: Vec<ConferenceJoin>,
    devices: Vec<DeviceConfigurationRow>,
    chats: BTreeMap<ChatId, ChatRecord>,
    chat_participants: Vec<(ChatId, ParticipantId)>,
    messages: BTreeMap<MessageId, Message>,
    settings: HashMap<String, String>,
    next_join_id: i64,
    next_device_id: i64,
    next_chat_id: i64,
    next_message_id: i64,
}

impl Arena {
    fn conference(&self, id: &ConferenceId) -> Option<Conference> {
        self.conferences.get(id).map(|record| Conference {
            id: id.clone(),
            created_at: record.created_at,
            password_hash: record.password_hash.clone(),
            chat_id: record.chat_id,
            users: self
                .members
                .iter()
                .filter(|(conference_id, _)| conference_id == id)
                .map(|(_, participant_id)| *participant_id)
                .collect(),
        })
    }

    fn conferences_where<F>(&self, predicate: F) -> Vec<Conference>
    where
        F: Fn(&ConferenceId, &ConferenceRecord) -> bool,
    {
        let mut conferences: Vec<Conference> = self
            .conferences
            .iter()
            .filter(|(id, record)| predicate(id, record))
            .filter_map(|(id, _)| self.conference(id))
            .collect();
        conferences.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        conferences
    }

    fn chat(&self, id: ChatId) -> Option<Chat> {
        self.chats.get(&id).map(|record| Chat {
            id,
            chat_type: record.chat_type,
            conference_id: record.conference_id.clone(),
            participants: self
                .chat_participants
                .iter()
                .filter(|(chat_id, _)| *chat_id == id)
                .map(|(_, participant_id)| *participant_id)
                .collect(),
        })
    }

    fn recompute_chat_type(&mut self, id: ChatId) {
        let count = self
            .chat_participants
            .iter()
            .filter(|(chat_id, _)| *chat_id == id)
            .count();
        if let Some(record) = self.chats.get_mut(&id) {
            record.chat_type = ChatType::for_participant_count(count);
        }
    }
}

/// Process-local [`Store`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    arena: Mutex<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn arena(&self) -> Result<MutexGuard<'_, Arena>, CsError> {
        self.arena
            .lock()
            .map_err(|_| CsError::Internal("memory store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn insert_participant(&self, participant: &Participant) -> Result<(), CsError> {
        let mut arena = self.arena()?;

        if arena.participants.contains_key(&participant.id) {
            return Err(CsError::Conflict("Participant already exists".to_string()));
        }
        if let Some(email) = &participant.email {
            let taken = arena
                .participants
                .values()
                .any(|p| p.email.as_deref() == Some(email.as_str()));
            if taken {
                return Err(CsError::Conflict("Email is already registered".to_string()));
            }
        }

        arena
            .participants
            .insert(participant.id, participant.clone());
        Ok(())
    }

    async fn get_participant(&self, id: ParticipantId) -> Result<Option<Participant>, CsError> {
        Ok(self.arena()?.participants.get(&id).cloned())
    }

    async fn find_permanent_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Option<Participant>, CsError> {
        let arena = self.arena()?;
        let mut matches: Vec<&Participant> = arena
            .participants
            .values()
            .filter(|p| !p.is_temporary() && p.display_name == display_name)
            .collect();
        matches.sort_by_key(|p| p.created_at);
        Ok(matches.first().map(|p| (*p).clone()))
    }

    async fn find_participant_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Participant>, CsError> {
        Ok(self
            .arena()?
            .participants
            .values()
            .find(|p| p.email.as_deref() == Some(email))
            .cloned())
    }

    async fn temporary_participants_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Participant>, CsError> {
        let arena = self.arena()?;
        let mut stale: Vec<Participant> = arena
            .participants
            .values()
            .filter(|p| p.is_temporary() && p.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.created_at);
        Ok(stale)
    }

    async fn delete_participant(&self, id: ParticipantId) -> Result<bool, CsError> {
        let mut arena = self.arena()?;

        if arena.participants.remove(&id).is_none() {
            return Ok(false);
        }

        arena.members.retain(|(_, participant_id)| *participant_id != id);
        arena.joins.retain(|join| join.participant_id != id);

        let affected: Vec<ChatId> = arena
            .chat_participants
            .iter()
            .filter(|(_, participant_id)| *participant_id == id)
            .map(|(chat_id, _)| *chat_id)
            .collect();
        arena
            .chat_participants
            .retain(|(_, participant_id)| *participant_id != id);
        for chat_id in affected {
            arena.recompute_chat_type(chat_id);
        }

        for message in arena.messages.values_mut() {
            if message.author_id == Some(id) {
                message.author_id = None;
            }
        }

        Ok(true)
    }

    async fn insert_conference(&self, conference: &Conference) -> Result<(), CsError> {
        let mut arena = self.arena()?;

        if arena.conferences.contains_key(&conference.id) {
            return Err(CsError::Conflict(format!(
                "Conference {} already exists",
                conference.id
            )));
        }

        arena.conferences.insert(
            conference.id.clone(),
            ConferenceRecord {
                created_at: conference.created_at,
                password_hash: conference.password_hash.clone(),
                chat_id: conference.chat_id,
            },
        );
        for participant_id in &conference.users {
            let link = (conference.id.clone(), *participant_id);
            if !arena.members.contains(&link) {
                arena.members.push(link);
            }
        }
        Ok(())
    }

    async fn get_conference(&self, id: &ConferenceId) -> Result<Option<Conference>, CsError> {
        Ok(self.arena()?.conference(id))
    }

    async fn set_conference_password(
        &self,
        id: &ConferenceId,
        password_hash: Option<String>,
    ) -> Result<(), CsError> {
        let mut arena = self.arena()?;
        let record = arena
            .conferences
            .get_mut(id)
            .ok_or_else(|| CsError::NotFound(format!("Conference {} not found", id)))?;
        record.password_hash = password_hash;
        Ok(())
    }

    async fn link_conference_chat(
        &self,
        id: &ConferenceId,
        chat_id: ChatId,
    ) -> Result<(), CsError> {
        let mut arena = self.arena()?;

        if !arena.chats.contains_key(&chat_id) {
            return Err(CsError::NotFound(format!("Chat {} not found", chat_id)));
        }
        let record = arena
            .conferences
            .get_mut(id)
            .ok_or_else(|| CsError::NotFound(format!("Conference {} not found", id)))?;
        record.chat_id = Some(chat_id);

        if let Some(chat) = arena.chats.get_mut(&chat_id) {
            chat.conference_id = Some(id.clone());
        }
        Ok(())
    }

    async fn delete_conference(&self, id: &ConferenceId) -> Result<bool, CsError> {
        let mut arena = self.arena()?;

        if !arena.conferences.contains_key(id) {
            return Ok(false);
        }

        // Mirrors the foreign keys of the Postgres schema.
        let referenced = arena.members.iter().any(|(c, _)| c == id)
            || arena.joins.iter().any(|join| &join.conference_id == id)
            || arena.devices.iter().any(|row| &row.conference_id == id)
            || arena
                .chats
                .values()
                .any(|chat| chat.conference_id.as_ref() == Some(id));
        if referenced {
            return Err(CsError::Conflict(format!(
                "Conference {} is still referenced",
                id
            )));
        }

        arena.conferences.remove(id);
        Ok(true)
    }

    async fn list_conferences(&self) -> Result<Vec<Conference>, CsError> {
        Ok(self.arena()?.conferences_where(|_, _| true))
    }

    async fn conferences_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Conference>, CsError> {
        Ok(self
            .arena()?
            .conferences_where(|_, record| record.created_at < cutoff))
    }

    async fn search_conferences(&self, fragment: &str) -> Result<Vec<Conference>, CsError> {
        Ok(self
            .arena()?
            .conferences_where(|id, _| id.as_str().contains(fragment)))
    }

    async fn add_member(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<bool, CsError> {
        let mut arena = self.arena()?;

        if !arena.conferences.contains_key(conference_id) {
            return Err(CsError::NotFound(format!(
                "Conference {} not found",
                conference_id
            )));
        }
        if !arena.participants.contains_key(&participant_id) {
            return Err(CsError::NotFound("Participant not found".to_string()));
        }

        let link = (conference_id.clone(), participant_id);
        if arena.members.contains(&link) {
            return Ok(false);
        }
        arena.members.push(link);
        Ok(true)
    }

    async fn remove_member(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<bool, CsError> {
        let mut arena = self.arena()?;
        let before = arena.members.len();
        arena
            .members
            .retain(|(c, p)| !(c == conference_id && *p == participant_id));
        Ok(arena.members.len() != before)
    }

    async fn conferences_of(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<Conference>, CsError> {
        let arena = self.arena()?;
        Ok(arena
            .members
            .iter()
            .filter(|(_, p)| *p == participant_id)
            .filter_map(|(conference_id, _)| arena.conference(conference_id))
            .collect())
    }

    async fn insert_join(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<ConferenceJoin, CsError> {
        let mut arena = self.arena()?;

        if !arena.conferences.contains_key(conference_id) {
            return Err(CsError::NotFound(format!(
                "Conference {} not found",
                conference_id
            )));
        }
        if !arena.participants.contains_key(&participant_id) {
            return Err(CsError::NotFound("Participant not found".to_string()));
        }

        arena.next_join_id += 1;
        let join = ConferenceJoin {
            id: arena.next_join_id,
            participant_id,
            conference_id: conference_id.clone(),
            joined_at: Utc::now(),
        };
        arena.joins.push(join.clone());
        Ok(join)
    }

    async fn delete_first_join(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<bool, CsError> {
        let mut arena = self.arena()?;
        let position = arena.joins.iter().position(|join| {
            join.participant_id == participant_id && &join.conference_id == conference_id
        });
        match position {
            Some(index) => {
                arena.joins.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_joins(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<i64, CsError> {
        let arena = self.arena()?;
        let count = arena
            .joins
            .iter()
            .filter(|join| {
                join.participant_id == participant_id && &join.conference_id == conference_id
            })
            .count();
        Ok(count as i64)
    }

    async fn count_conference_joins(&self, conference_id: &ConferenceId) -> Result<i64, CsError> {
        let arena = self.arena()?;
        let count = arena
            .joins
            .iter()
            .filter(|join| &join.conference_id == conference_id)
            .count();
        Ok(count as i64)
    }

    async fn count_participant_joins(
        &self,
        participant_id: ParticipantId,
    ) -> Result<i64, CsError> {
        let arena = self.arena()?;
        let count = arena
            .joins
            .iter()
            .filter(|join| join.participant_id == participant_id)
            .count();
        Ok(count as i64)
    }

    async fn joins_of(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<ConferenceJoin>, CsError> {
        Ok(self
            .arena()?
            .joins
            .iter()
            .filter(|join| join.participant_id == participant_id)
            .cloned()
            .collect())
    }

    async fn delete_conference_joins(&self, conference_id: &ConferenceId) -> Result<u64, CsError> {
        let mut arena = self.arena()?;
        let before = arena.joins.len();
        arena
            .joins
            .retain(|join| &join.conference_id != conference_id);
        Ok((before - arena.joins.len()) as u64)
    }

    async fn upsert_device_configuration(
        &self,
        row: &DeviceConfigurationRow,
    ) -> Result<DeviceConfigurationRow, CsError> {
        let mut arena = self.arena()?;

        if !arena.conferences.contains_key(&row.conference_id) {
            return Err(CsError::NotFound(format!(
                "Conference {} not found",
                row.conference_id
            )));
        }

        let existing = arena.devices.iter_mut().find(|existing| {
            existing.conference_id == row.conference_id && existing.user_name == row.user_name
        });
        if let Some(existing) = existing {
            let id = existing.id;
            *existing = DeviceConfigurationRow { id, ..row.clone() };
            return Ok(existing.clone());
        }

        arena.next_device_id += 1;
        let saved = DeviceConfigurationRow {
            id: arena.next_device_id,
            ..row.clone()
        };
        arena.devices.push(saved.clone());
        Ok(saved)
    }

    async fn device_configuration(
        &self,
        conference_id: &ConferenceId,
        user_name: &str,
    ) -> Result<Option<DeviceConfigurationRow>, CsError> {
        Ok(self
            .arena()?
            .devices
            .iter()
            .find(|row| &row.conference_id == conference_id && row.user_name == user_name)
            .cloned())
    }

    async fn device_configurations_for_conference(
        &self,
        conference_id: &ConferenceId,
    ) -> Result<Vec<DeviceConfigurationRow>, CsError> {
        Ok(self
            .arena()?
            .devices
            .iter()
            .filter(|row| &row.conference_id == conference_id)
            .cloned()
            .collect())
    }

    async fn device_configurations_for_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<DeviceConfigurationRow>, CsError> {
        Ok(self
            .arena()?
            .devices
            .iter()
            .filter(|row| row.user_name == user_name)
            .cloned()
            .collect())
    }

    async fn delete_device_configurations(
        &self,
        conference_id: &ConferenceId,
    ) -> Result<u64, CsError> {
        let mut arena = self.arena()?;
        let before = arena.devices.len();
        arena
            .devices
            .retain(|row| &row.conference_id != conference_id);
        Ok((before - arena.devices.len()) as u64)
    }

    async fn insert_chat(
        &self,
        conference_id: Option<&ConferenceId>,
        participants: &[ParticipantId],
    ) -> Result<Chat, CsError> {
        let mut arena = self.arena()?;

        if let Some(conference_id) = conference_id {
            let record = arena.conferences.get(conference_id).ok_or_else(|| {
                CsError::NotFound(format!("Conference {} not found", conference_id))
            })?;
            if record.chat_id.is_some() {
                return Err(CsError::Conflict(format!(
                    "Conference {} already has a chat",
                    conference_id
                )));
            }
        }
        if let Some(missing) = participants
            .iter()
            .find(|id| !arena.participants.contains_key(id))
        {
            return Err(CsError::NotFound(format!(
                "Participant {} not found",
                missing
            )));
        }

        arena.next_chat_id += 1;
        let chat_id = ChatId(arena.next_chat_id);

        let mut unique: Vec<ParticipantId> = Vec::with_capacity(participants.len());
        for participant_id in participants {
            if !unique.contains(participant_id) {
                unique.push(*participant_id);
            }
        }

        arena.chats.insert(
            chat_id,
            ChatRecord {
                chat_type: ChatType::for_participant_count(unique.len()),
                conference_id: conference_id.cloned(),
            },
        );
        for participant_id in unique {
            arena.chat_participants.push((chat_id, participant_id));
        }
        if let Some(conference_id) = conference_id {
            if let Some(record) = arena.conferences.get_mut(conference_id) {
                record.chat_id = Some(chat_id);
            }
        }

        arena
            .chat(chat_id)
            .ok_or_else(|| CsError::Internal("chat vanished after insert".to_string()))
    }

    async fn get_chat(&self, id: ChatId) -> Result<Option<Chat>, CsError> {
        Ok(self.arena()?.chat(id))
    }

    async fn chats_of(&self, participant_id: ParticipantId) -> Result<Vec<Chat>, CsError> {
        let arena = self.arena()?;
        let mut chats: Vec<Chat> = arena
            .chat_participants
            .iter()
            .filter(|(_, p)| *p == participant_id)
            .filter_map(|(chat_id, _)| arena.chat(*chat_id))
            .collect();
        chats.sort_by_key(|chat| chat.id);
        Ok(chats)
    }

    async fn add_chat_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError> {
        let mut arena = self.arena()?;

        if !arena.chats.contains_key(&chat_id) {
            return Err(CsError::NotFound(format!("Chat {} not found", chat_id)));
        }
        if !arena.participants.contains_key(&participant_id) {
            return Err(CsError::NotFound("Participant not found".to_string()));
        }

        let link = (chat_id, participant_id);
        if !arena.chat_participants.contains(&link) {
            arena.chat_participants.push(link);
            arena.recompute_chat_type(chat_id);
        }

        arena
            .chat(chat_id)
            .ok_or_else(|| CsError::NotFound(format!("Chat {} not found", chat_id)))
    }

    async fn remove_chat_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError> {
        let mut arena = self.arena()?;

        if !arena.chats.contains_key(&chat_id) {
            return Err(CsError::NotFound(format!("Chat {} not found", chat_id)));
        }

        arena
            .chat_participants
            .retain(|(c, p)| !(*c == chat_id && *p == participant_id));
        arena.recompute_chat_type(chat_id);

        arena
            .chat(chat_id)
            .ok_or_else(|| CsError::NotFound(format!("Chat {} not found", chat_id)))
    }

    async fn delete_chat(&self, id: ChatId) -> Result<bool, CsError> {
        let mut arena = self.arena()?;

        if !arena.chats.contains_key(&id) {
            return Ok(false);
        }
        if arena.messages.values().any(|message| message.chat_id == id) {
            return Err(CsError::Conflict(format!(
                "Chat {} still has messages",
                id
            )));
        }

        arena.chats.remove(&id);
        arena.chat_participants.retain(|(chat_id, _)| *chat_id != id);
        for record in arena.conferences.values_mut() {
            if record.chat_id == Some(id) {
                record.chat_id = None;
            }
        }
        Ok(true)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, CsError> {
        let mut arena = self.arena()?;

        if !arena.chats.contains_key(&message.chat_id) {
            return Err(CsError::NotFound(format!(
                "Chat {} not found",
                message.chat_id
            )));
        }

        arena.next_message_id += 1;
        let stored = Message {
            id: MessageId(arena.next_message_id),
            chat_id: message.chat_id,
            text: message.text.clone(),
            author: message.author.clone(),
            author_id: message.author_id,
            pub_date: message.pub_date.clone(),
            message_type: message.message_type,
            file: message.file.clone(),
        };
        arena.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, CsError> {
        Ok(self.arena()?.messages.get(&id).cloned())
    }

    async fn delete_message(&self, id: MessageId) -> Result<bool, CsError> {
        Ok(self.arena()?.messages.remove(&id).is_some())
    }

    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>, CsError> {
        Ok(self
            .arena()?
            .messages
            .values()
            .filter(|message| message.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn messages_by_author(&self, author_id: ParticipantId) -> Result<Vec<Message>, CsError> {
        Ok(self
            .arena()?
            .messages
            .values()
            .filter(|message| message.author_id == Some(author_id))
            .cloned()
            .collect())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CsError> {
        Ok(self.arena()?.settings.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), CsError> {
        self.arena()?
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), CsError> {
        self.arena().map(|_| ())
    }
}
