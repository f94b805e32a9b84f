//! Chat messaging hub.
//!
//! Persists chats and messages, keeps chat membership and type consistent,
//! and fans events out on per-chat topics. Every broadcast happens after the
//! store mutation it describes has succeeded.

use crate::errors::CsError;
use crate::models::{
    Chat, ChatEvent, Message, MessageDraft, MessageType, Participant, MAX_MESSAGE_LENGTH,
    PUB_DATE_FORMAT,
};
use crate::repositories::{NewMessage, Store};
use crate::services::cipher::MessageCipher;
use crate::services::topics::{chat_topic, TopicHub, PRESENCE_TOPIC};
use chrono::Utc;
use common::types::{ChatId, ConferenceId, MessageId, ParticipantId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::instrument;

/// Result of a participant asking to join a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    AlreadyMember(Chat),
    Added(Chat),

    /// A two-party chat was not widened; the caller is sent to their own
    /// one-to-one chat with the other party instead.
    Redirected(Chat),
}

impl JoinOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinOutcome::AlreadyMember(_) => "already_member",
            JoinOutcome::Added(_) => "added",
            JoinOutcome::Redirected(_) => "redirected",
        }
    }

    pub fn into_chat(self) -> Chat {
        match self {
            JoinOutcome::AlreadyMember(chat)
            | JoinOutcome::Added(chat)
            | JoinOutcome::Redirected(chat) => chat,
        }
    }
}

pub struct ChatHub {
    store: Arc<dyn Store>,
    cipher: Arc<MessageCipher>,
    topics: Arc<TopicHub>,
}

impl ChatHub {
    pub fn new(store: Arc<dyn Store>, cipher: Arc<MessageCipher>, topics: Arc<TopicHub>) -> Self {
        Self {
            store,
            cipher,
            topics,
        }
    }

    pub async fn find_by_id(&self, chat_id: ChatId) -> Result<Chat, CsError> {
        self.store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| CsError::NotFound(format!("Chat {} not found", chat_id)))
    }

    pub async fn chats_of(&self, participant_id: ParticipantId) -> Result<Vec<Chat>, CsError> {
        self.store.chats_of(participant_id).await
    }

    /// Return the private chat shared by `a` and `b`, creating it if needed.
    ///
    /// Both participants are reloaded from the store first. Conference chats
    /// never count as a match.
    #[instrument(skip_all, name = "cs.hub.find_or_create")]
    pub async fn find_or_create(
        &self,
        a: ParticipantId,
        b: ParticipantId,
    ) -> Result<Chat, CsError> {
        let first = self.load_participant(a).await?;
        let second = self.load_participant(b).await?;

        let existing = self
            .store
            .chats_of(first.id)
            .await?
            .into_iter()
            .filter(|chat| !chat.is_conference_chat())
            .find(|chat| {
                if first.id == second.id {
                    chat.participants.len() == 1
                } else {
                    chat.has_participant(second.id)
                }
            });
        if let Some(chat) = existing {
            return Ok(chat);
        }

        let chat = self.store.insert_chat(None, &[first.id, second.id]).await?;
        tracing::debug!(target: "cs.hub", chat_id = %chat.id, "Created private chat");
        Ok(chat)
    }

    /// The conference's chat with `participant_id` in it, created on first use.
    pub async fn ensure_conference_chat(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError> {
        let conference = self
            .store
            .get_conference(conference_id)
            .await?
            .ok_or_else(|| CsError::NotFound(format!("Conference {} not found", conference_id)))?;

        if let Some(chat_id) = conference.chat_id {
            return self.store.add_chat_participant(chat_id, participant_id).await;
        }

        match self
            .store
            .insert_chat(Some(conference_id), &[participant_id])
            .await
        {
            Ok(chat) => {
                tracing::debug!(
                    target: "cs.hub",
                    chat_id = %chat.id,
                    conference_id = %conference_id,
                    "Created conference chat"
                );
                Ok(chat)
            }
            Err(CsError::Conflict(_)) => {
                // Another session created it first
                let chat_id = self
                    .store
                    .get_conference(conference_id)
                    .await?
                    .and_then(|c| c.chat_id)
                    .ok_or_else(|| {
                        CsError::Internal("Conference chat vanished after conflict".to_string())
                    })?;
                self.store.add_chat_participant(chat_id, participant_id).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn add_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError> {
        self.find_by_id(chat_id).await?;
        self.load_participant(participant_id).await?;
        self.store.add_chat_participant(chat_id, participant_id).await
    }

    pub async fn remove_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError> {
        self.find_by_id(chat_id).await?;
        self.store
            .remove_chat_participant(chat_id, participant_id)
            .await
    }

    /// Persist a message and broadcast it to the chat topic.
    ///
    /// The stored text is encrypted; the returned message carries clear text.
    #[instrument(skip_all, name = "cs.hub.send", fields(chat_id = %chat_id))]
    pub async fn send(
        &self,
        chat_id: ChatId,
        draft: MessageDraft,
        author: &Participant,
    ) -> Result<Message, CsError> {
        let chat = self.find_by_id(chat_id).await?;
        if !chat.has_participant(author.id) {
            return Err(CsError::Forbidden(
                "Only chat participants may send messages".to_string(),
            ));
        }
        validate_draft(&draft)?;

        let new_message = NewMessage {
            chat_id,
            text: self.cipher.encrypt(&draft.text)?,
            author: author.author_label(),
            author_id: Some(author.id),
            pub_date: Utc::now().format(PUB_DATE_FORMAT).to_string(),
            message_type: draft.message_type,
            file: draft.file,
        };

        let mut message = self.store.insert_message(&new_message).await?;
        message.text = draft.text;

        let delivered = self
            .topics
            .publish(&chat_topic(chat_id), ChatEvent::message(&message));
        tracing::debug!(
            target: "cs.hub",
            chat_id = %chat_id,
            message_id = %message.id,
            delivered = delivered,
            "Message sent"
        );
        Ok(message)
    }

    /// Every message of a chat in persisted order, decrypted.
    pub async fn find_all_chat_messages(&self, chat_id: ChatId) -> Result<Vec<Message>, CsError> {
        self.find_by_id(chat_id).await?;
        let messages = self.store.messages_for_chat(chat_id).await?;
        self.decrypt_all(messages)
    }

    pub async fn messages_by(&self, author_id: ParticipantId) -> Result<Vec<Message>, CsError> {
        let messages = self.store.messages_by_author(author_id).await?;
        self.decrypt_all(messages)
    }

    pub async fn find_message(&self, message_id: MessageId) -> Result<Message, CsError> {
        let mut message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| CsError::NotFound(format!("Message {} not found", message_id)))?;
        message.text = self.cipher.decrypt(&message.text)?;
        Ok(message)
    }

    /// Delete a message. Only its author may do this.
    #[instrument(skip_all, name = "cs.hub.delete_message")]
    pub async fn delete_message(
        &self,
        message_id: MessageId,
        acting: &Participant,
    ) -> Result<(), CsError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| CsError::NotFound(format!("Message {} not found", message_id)))?;

        if message.author_id != Some(acting.id) {
            return Err(CsError::Forbidden(
                "Only the author may delete a message".to_string(),
            ));
        }

        self.remove_message(&message).await
    }

    /// Delete every message of a chat, keeping the chat itself.
    #[instrument(skip_all, name = "cs.hub.clear", fields(chat_id = %chat_id))]
    pub async fn clear(&self, chat_id: ChatId, acting: &Participant) -> Result<(), CsError> {
        let chat = self.find_by_id(chat_id).await?;
        self.authorize_clear(&chat, acting).await?;

        let purged = self.purge_messages(chat_id).await?;

        if let Some(conference_id) = &chat.conference_id {
            self.store.link_conference_chat(conference_id, chat_id).await?;
        }

        self.topics
            .publish(&chat_topic(chat_id), ChatEvent::cleared(chat_id));
        tracing::info!(target: "cs.hub", chat_id = %chat_id, purged = purged, "Chat cleared");
        Ok(())
    }

    /// Delete a chat with its messages and participant links.
    #[instrument(skip_all, name = "cs.hub.delete", fields(chat_id = %chat_id))]
    pub async fn delete(&self, chat_id: ChatId, acting: &Participant) -> Result<(), CsError> {
        let chat = self.find_by_id(chat_id).await?;
        if !chat.has_participant(acting.id) {
            return Err(CsError::Forbidden(
                "Only chat participants may delete a chat".to_string(),
            ));
        }

        for participant_id in &chat.participants {
            self.store
                .remove_chat_participant(chat_id, *participant_id)
                .await?;
        }
        self.purge_messages(chat_id).await?;
        self.store.delete_chat(chat_id).await?;

        self.topics
            .publish(&chat_topic(chat_id), ChatEvent::chat_deleted(chat_id));
        tracing::info!(target: "cs.hub", chat_id = %chat_id, "Chat deleted");
        Ok(())
    }

    /// Handle a participant asking to join a chat.
    ///
    /// Private chats are not widened unless the request accepts an explicit
    /// invitation; the caller gets their own one-to-one chat with the other
    /// party instead. Conference chats always admit.
    #[instrument(skip_all, name = "cs.hub.accept_join", fields(chat_id = %chat_id))]
    pub async fn accept_join(
        &self,
        chat_id: ChatId,
        participant: &Participant,
        invitation_accepted: bool,
    ) -> Result<JoinOutcome, CsError> {
        let chat = self.find_by_id(chat_id).await?;
        if chat.has_participant(participant.id) {
            return Ok(JoinOutcome::AlreadyMember(chat));
        }

        if !chat.is_conference_chat() && !invitation_accepted {
            if let Some(other) = chat.participants.first() {
                let private = self.find_or_create(participant.id, *other).await?;
                return Ok(JoinOutcome::Redirected(private));
            }
        }

        let chat = self.add_participant(chat_id, participant.id).await?;
        Ok(JoinOutcome::Added(chat))
    }

    pub fn subscribe(&self, chat_id: ChatId) -> Result<broadcast::Receiver<ChatEvent>, CsError> {
        self.topics.subscribe(&chat_topic(chat_id))
    }

    pub fn subscribe_presence(&self) -> Result<broadcast::Receiver<ChatEvent>, CsError> {
        self.topics.subscribe(PRESENCE_TOPIC)
    }

    /// Publish a presence notice on a chat topic.
    pub fn announce(&self, event_type: MessageType, chat_id: ChatId, who: &str) -> usize {
        self.topics.publish(
            &chat_topic(chat_id),
            ChatEvent::presence(event_type, Some(chat_id), who),
        )
    }

    /// Publish a `Leave` notice on the process-wide presence topic.
    pub fn announce_disconnect(&self, display_name: &str) -> usize {
        self.topics.publish(
            PRESENCE_TOPIC,
            ChatEvent::presence(MessageType::Leave, None, display_name),
        )
    }

    async fn remove_message(&self, message: &Message) -> Result<(), CsError> {
        self.store.delete_message(message.id).await?;
        self.topics.publish(
            &chat_topic(message.chat_id),
            ChatEvent::deleted(message.chat_id, message.id),
        );
        tracing::debug!(
            target: "cs.hub",
            chat_id = %message.chat_id,
            message_id = %message.id,
            "Message deleted"
        );
        Ok(())
    }

    /// Delete every message of a chat without per-message events. Callers
    /// publish one chat-level event instead.
    async fn purge_messages(&self, chat_id: ChatId) -> Result<usize, CsError> {
        let messages = self.store.messages_for_chat(chat_id).await?;
        for message in &messages {
            self.store.delete_message(message.id).await?;
        }
        Ok(messages.len())
    }

    async fn authorize_clear(&self, chat: &Chat, acting: &Participant) -> Result<(), CsError> {
        if chat.has_participant(acting.id) {
            return Ok(());
        }
        if let Some(conference_id) = &chat.conference_id {
            let member = self
                .store
                .get_conference(conference_id)
                .await?
                .is_some_and(|conference| conference.has_member(acting.id));
            if member {
                return Ok(());
            }
        }
        Err(CsError::Forbidden(
            "Only chat participants may clear a chat".to_string(),
        ))
    }

    async fn load_participant(&self, id: ParticipantId) -> Result<Participant, CsError> {
        self.store
            .get_participant(id)
            .await?
            .ok_or_else(|| CsError::NotFound("Participant not found".to_string()))
    }

    fn decrypt_all(&self, messages: Vec<Message>) -> Result<Vec<Message>, CsError> {
        messages
            .into_iter()
            .map(|mut message| {
                message.text = self.cipher.decrypt(&message.text)?;
                Ok(message)
            })
            .collect()
    }
}

fn validate_draft(draft: &MessageDraft) -> Result<(), CsError> {
    if !draft.message_type.is_sendable() {
        return Err(CsError::ValidationFailed(format!(
            "Message type {} cannot be sent",
            draft.message_type.as_str()
        )));
    }

    let has_file = draft.message_type == MessageType::ChatFile && draft.file.is_some();
    if draft.text.trim().is_empty() && !has_file {
        return Err(CsError::ValidationFailed(
            "Message text is required".to_string(),
        ));
    }
    if draft.message_type == MessageType::ChatFile && draft.file.is_none() {
        return Err(CsError::ValidationFailed(
            "File messages must reference a file".to_string(),
        ));
    }

    if draft.text.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(CsError::ValidationFailed(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ChatType, Conference, FileRef};
    use crate::repositories::MemoryStore;
    use std::collections::BTreeSet;

    const KEY: [u8; 32] = [7u8; 32];

    struct Fixture {
        store: Arc<dyn Store>,
        hub: ChatHub,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cipher = Arc::new(MessageCipher::new(&KEY).unwrap());
        let hub = ChatHub::new(Arc::clone(&store), cipher, Arc::new(TopicHub::new()));
        Fixture { store, hub }
    }

    async fn temporary(f: &Fixture, name: &str) -> Participant {
        let participant = Participant::temporary(name);
        f.store.insert_participant(&participant).await.unwrap();
        participant
    }

    async fn permanent(f: &Fixture, name: &str, email: &str) -> Participant {
        let participant = Participant::permanent(name, email, BTreeSet::new());
        f.store.insert_participant(&participant).await.unwrap();
        participant
    }

    #[tokio::test]
    async fn test_find_or_create_reuses_private_chat() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let bob = temporary(&f, "Bob").await;

        let created = f.hub.find_or_create(ann.id, bob.id).await.unwrap();
        let again = f.hub.find_or_create(bob.id, ann.id).await.unwrap();

        assert_eq!(created.id, again.id);
        assert_eq!(created.chat_type, ChatType::Personal);
    }

    #[tokio::test]
    async fn test_find_or_create_ignores_conference_chat() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let bob = temporary(&f, "Bob").await;
        let room = ConferenceId::parse("room").unwrap();
        f.store.insert_conference(&Conference::new(room.clone())).await.unwrap();
        let conference_chat = f.store.insert_chat(Some(&room), &[ann.id, bob.id]).await.unwrap();

        let private = f.hub.find_or_create(ann.id, bob.id).await.unwrap();
        assert_ne!(private.id, conference_chat.id);
        assert!(!private.is_conference_chat());
    }

    #[tokio::test]
    async fn test_find_or_create_unknown_participant() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let result = f.hub.find_or_create(ann.id, ParticipantId::new()).await;
        assert!(matches!(result, Err(CsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_chat_type_follows_participant_count() {
        let f = fixture();
        let people = [
            temporary(&f, "A").await,
            temporary(&f, "B").await,
            temporary(&f, "C").await,
        ];
        let chat = f.store.insert_chat(None, &[]).await.unwrap();
        assert_eq!(chat.chat_type, ChatType::Single);

        let mut count = 0;
        for person in &people {
            let updated = f.hub.add_participant(chat.id, person.id).await.unwrap();
            count += 1;
            assert_eq!(updated.chat_type, ChatType::for_participant_count(count));
        }

        let first = people.first().unwrap();
        let repeated = f.hub.add_participant(chat.id, first.id).await;
        assert_eq!(repeated.unwrap().participants.len(), 3);

        for person in &people {
            let updated = f.hub.remove_participant(chat.id, person.id).await.unwrap();
            count -= 1;
            assert_eq!(updated.chat_type, ChatType::for_participant_count(count));
        }

        let absent = f.hub.remove_participant(chat.id, first.id).await.unwrap();
        assert_eq!(absent.chat_type, ChatType::Single);
    }

    #[tokio::test]
    async fn test_send_round_trips_clear_text_and_encrypts_at_rest() {
        let f = fixture();
        let bob = permanent(&f, "Bob Builder", "bob@example.com").await;
        let chat = f.store.insert_chat(None, &[bob.id]).await.unwrap();

        let sent = f
            .hub
            .send(chat.id, MessageDraft::text("hi there"), &bob)
            .await
            .unwrap();
        assert_eq!(sent.text, "hi there");
        assert_eq!(sent.author, "bob@example.com");

        let stored = f.store.get_message(sent.id).await.unwrap().unwrap();
        assert_ne!(stored.text, "hi there");

        let history = f.hub.find_all_chat_messages(chat.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.first().unwrap().text, "hi there");
    }

    #[tokio::test]
    async fn test_send_broadcasts_after_persisting() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let chat = f.store.insert_chat(None, &[ann.id]).await.unwrap();
        let mut receiver = f.hub.subscribe(chat.id).unwrap();

        let sent = f.hub.send(chat.id, MessageDraft::text("one"), &ann).await.unwrap();
        f.hub.send(chat.id, MessageDraft::text("two"), &ann).await.unwrap();

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.message_id, Some(sent.id));
        assert_eq!(first.text.as_deref(), Some("one"));
        assert_eq!(first.author.as_deref(), Some("Ann"));
        assert!(f.store.get_message(sent.id).await.unwrap().is_some());

        let second = receiver.recv().await.unwrap();
        assert_eq!(second.text.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_send_rejects_outsiders_and_bad_drafts() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let eve = temporary(&f, "Eve").await;
        let chat = f.store.insert_chat(None, &[ann.id]).await.unwrap();

        let outsider = f.hub.send(chat.id, MessageDraft::text("hey"), &eve).await;
        assert!(matches!(outsider, Err(CsError::Forbidden(_))));

        let empty = f.hub.send(chat.id, MessageDraft::text("  "), &ann).await;
        assert!(matches!(empty, Err(CsError::ValidationFailed(_))));

        let mut join = MessageDraft::text("spoofed");
        join.message_type = MessageType::Join;
        let control = f.hub.send(chat.id, join, &ann).await;
        assert!(matches!(control, Err(CsError::ValidationFailed(_))));

        let long = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        let too_long = f.hub.send(chat.id, MessageDraft::text(&long), &ann).await;
        assert!(matches!(too_long, Err(CsError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_file_message_without_text() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let chat = f.store.insert_chat(None, &[ann.id]).await.unwrap();

        let draft = MessageDraft {
            text: String::new(),
            message_type: MessageType::ChatFile,
            file: Some(FileRef {
                file_id: "f-1".to_string(),
                file_name: "notes.pdf".to_string(),
                view_url: "/files/f-1/view".to_string(),
                download_url: "/files/f-1/download".to_string(),
            }),
        };
        let sent = f.hub.send(chat.id, draft, &ann).await.unwrap();
        assert_eq!(sent.message_type, MessageType::ChatFile);
        assert_eq!(sent.file.unwrap().file_name, "notes.pdf");
    }

    #[tokio::test]
    async fn test_delete_message_only_by_author() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let bob = temporary(&f, "Bob").await;
        let chat = f.store.insert_chat(None, &[ann.id, bob.id]).await.unwrap();
        let sent = f.hub.send(chat.id, MessageDraft::text("mine"), &ann).await.unwrap();
        let mut receiver = f.hub.subscribe(chat.id).unwrap();

        let denied = f.hub.delete_message(sent.id, &bob).await;
        assert!(matches!(denied, Err(CsError::Forbidden(_))));

        f.hub.delete_message(sent.id, &ann).await.unwrap();
        assert!(matches!(
            f.hub.find_message(sent.id).await,
            Err(CsError::NotFound(_))
        ));
        assert!(f.hub.messages_by(ann.id).await.unwrap().is_empty());
        assert!(f.hub.find_all_chat_messages(chat.id).await.unwrap().is_empty());

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type, MessageType::Delete);
        assert_eq!(event.message_id, Some(sent.id));
        assert!(event.text.is_none());
    }

    #[tokio::test]
    async fn test_clear_keeps_conference_link() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let room = ConferenceId::parse("room").unwrap();
        f.store.insert_conference(&Conference::new(room.clone())).await.unwrap();
        f.store.add_member(&room, ann.id).await.unwrap();
        let chat = f.hub.ensure_conference_chat(&room, ann.id).await.unwrap();
        f.hub.send(chat.id, MessageDraft::text("a"), &ann).await.unwrap();
        f.hub.send(chat.id, MessageDraft::text("b"), &ann).await.unwrap();
        let mut receiver = f.hub.subscribe(chat.id).unwrap();

        f.hub.clear(chat.id, &ann).await.unwrap();

        assert!(f.hub.find_all_chat_messages(chat.id).await.unwrap().is_empty());
        let conference = f.store.get_conference(&room).await.unwrap().unwrap();
        assert_eq!(conference.chat_id, Some(chat.id));
        assert_eq!(receiver.recv().await.unwrap().event_type, MessageType::Clear);
        assert!(matches!(
            receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_clear_by_conference_member_outside_chat() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let bob = temporary(&f, "Bob").await;
        let eve = temporary(&f, "Eve").await;
        let room = ConferenceId::parse("room").unwrap();
        f.store.insert_conference(&Conference::new(room.clone())).await.unwrap();
        f.store.add_member(&room, bob.id).await.unwrap();
        let chat = f.hub.ensure_conference_chat(&room, ann.id).await.unwrap();

        f.hub.clear(chat.id, &bob).await.unwrap();
        assert!(matches!(
            f.hub.clear(chat.id, &eve).await,
            Err(CsError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_chat_removes_everything() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let bob = temporary(&f, "Bob").await;
        let chat = f.hub.find_or_create(ann.id, bob.id).await.unwrap();
        let sent = f.hub.send(chat.id, MessageDraft::text("bye"), &ann).await.unwrap();
        let mut receiver = f.hub.subscribe(chat.id).unwrap();

        f.hub.delete(chat.id, &bob).await.unwrap();

        assert!(matches!(f.hub.find_by_id(chat.id).await, Err(CsError::NotFound(_))));
        assert!(f.store.get_message(sent.id).await.unwrap().is_none());
        assert!(f.hub.chats_of(ann.id).await.unwrap().is_empty());
        assert_eq!(
            receiver.recv().await.unwrap().event_type,
            MessageType::ChatDeleted
        );
    }

    #[tokio::test]
    async fn test_private_chat_is_not_widened_without_invitation() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let bob = temporary(&f, "Bob").await;
        let carl = temporary(&f, "Carl").await;
        let private = f.hub.find_or_create(ann.id, bob.id).await.unwrap();

        let outcome = f.hub.accept_join(private.id, &carl, false).await.unwrap();
        let JoinOutcome::Redirected(redirect) = outcome else {
            unreachable!("expected a redirect");
        };
        assert_ne!(redirect.id, private.id);
        assert!(redirect.has_participant(carl.id));
        assert_eq!(f.hub.find_by_id(private.id).await.unwrap().participants.len(), 2);

        let outcome = f.hub.accept_join(private.id, &carl, true).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::Added(ref chat) if chat.chat_type == ChatType::Group));

        let outcome = f.hub.accept_join(private.id, &carl, false).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::AlreadyMember(_)));
    }

    #[tokio::test]
    async fn test_conference_chat_always_admits() {
        let f = fixture();
        let ann = temporary(&f, "Ann").await;
        let bob = temporary(&f, "Bob").await;
        let room = ConferenceId::parse("room").unwrap();
        f.store.insert_conference(&Conference::new(room.clone())).await.unwrap();
        let chat = f.hub.ensure_conference_chat(&room, ann.id).await.unwrap();

        let outcome = f.hub.accept_join(chat.id, &bob, false).await.unwrap();
        assert_eq!(outcome.as_str(), "added");
        assert!(outcome.into_chat().has_participant(bob.id));
    }

    #[tokio::test]
    async fn test_disconnect_notice_on_presence_topic() {
        let f = fixture();
        let mut presence = f.hub.subscribe_presence().unwrap();

        assert_eq!(f.hub.announce_disconnect("Ann"), 1);
        let event = presence.recv().await.unwrap();
        assert_eq!(event.event_type, MessageType::Leave);
        assert_eq!(event.author.as_deref(), Some("Ann"));
    }
}
