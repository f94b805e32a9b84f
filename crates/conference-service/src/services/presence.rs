//! Presence tracking.
//!
//! A join row is recorded for every session a participant opens in a
//! conference, so the same person connected from two tabs holds two rows.

use crate::errors::CsError;
use crate::models::{Conference, ConferenceJoin};
use crate::repositories::Store;
use common::types::{ConferenceId, ParticipantId};
use std::sync::Arc;
use tracing::instrument;

pub struct PresenceTracker {
    store: Arc<dyn Store>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a session. Duplicate rows for the same pair are expected.
    #[instrument(skip_all, name = "cs.presence.join", fields(conference_id = %conference_id))]
    pub async fn join(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<ConferenceJoin, CsError> {
        let join = self.store.insert_join(participant_id, conference_id).await?;

        tracing::debug!(
            target: "cs.presence",
            conference_id = %conference_id,
            participant_id = %participant_id,
            join_id = join.id,
            "Recorded conference join"
        );
        Ok(join)
    }

    /// Close one session: the oldest join row for the pair.
    ///
    /// Returns false, with a warning, when the pair holds no join.
    #[instrument(skip_all, name = "cs.presence.leave", fields(conference_id = %conference_id))]
    pub async fn leave(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<bool, CsError> {
        let removed = self
            .store
            .delete_first_join(participant_id, conference_id)
            .await?;

        if removed {
            tracing::debug!(
                target: "cs.presence",
                conference_id = %conference_id,
                participant_id = %participant_id,
                "Removed conference join"
            );
        } else {
            tracing::warn!(
                target: "cs.presence",
                conference_id = %conference_id,
                participant_id = %participant_id,
                "Leave without a matching join"
            );
        }
        Ok(removed)
    }

    pub async fn count_joins(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<i64, CsError> {
        self.store.count_joins(participant_id, conference_id).await
    }

    pub async fn count_conference_joins(&self, conference_id: &ConferenceId) -> Result<i64, CsError> {
        self.store.count_conference_joins(conference_id).await
    }

    pub async fn count_participant_joins(
        &self,
        participant_id: ParticipantId,
    ) -> Result<i64, CsError> {
        self.store.count_participant_joins(participant_id).await
    }

    /// One conference per join row the participant holds, oldest first.
    /// Callers that want distinct conferences de-duplicate by id.
    pub async fn active_conferences_for(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<Conference>, CsError> {
        let joins = self.store.joins_of(participant_id).await?;

        let mut conferences = Vec::with_capacity(joins.len());
        for join in joins {
            if let Some(conference) = self.store.get_conference(&join.conference_id).await? {
                conferences.push(conference);
            }
        }
        Ok(conferences)
    }

    /// Drop every join row of a conference. Used by reclamation.
    pub async fn clear_conference(&self, conference_id: &ConferenceId) -> Result<u64, CsError> {
        self.store.delete_conference_joins(conference_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::Participant;
    use crate::repositories::MemoryStore;

    async fn setup() -> (PresenceTracker, ParticipantId, ConferenceId, ConferenceId) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ann = Participant::temporary("Ann");
        store.insert_participant(&ann).await.unwrap();
        let first = ConferenceId::parse("first").unwrap();
        let second = ConferenceId::parse("second").unwrap();
        store.insert_conference(&Conference::new(first.clone())).await.unwrap();
        store.insert_conference(&Conference::new(second.clone())).await.unwrap();
        (PresenceTracker::new(store), ann.id, first, second)
    }

    #[tokio::test]
    async fn test_join_then_leave_restores_count() {
        let (presence, ann, room, _) = setup().await;
        let baseline = presence.count_joins(ann, &room).await.unwrap();

        presence.join(ann, &room).await.unwrap();
        presence.leave(ann, &room).await.unwrap();

        assert_eq!(presence.count_joins(ann, &room).await.unwrap(), baseline);
    }

    #[tokio::test]
    async fn test_two_joins_one_leave_leaves_one() {
        let (presence, ann, room, _) = setup().await;
        let baseline = presence.count_joins(ann, &room).await.unwrap();

        presence.join(ann, &room).await.unwrap();
        presence.join(ann, &room).await.unwrap();
        presence.leave(ann, &room).await.unwrap();

        assert_eq!(presence.count_joins(ann, &room).await.unwrap(), baseline + 1);
    }

    #[tokio::test]
    async fn test_leave_without_join_is_noop() {
        let (presence, ann, room, _) = setup().await;
        assert!(!presence.leave(ann, &room).await.unwrap());
        assert_eq!(presence.count_joins(ann, &room).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_active_conferences_one_entry_per_join() {
        let (presence, ann, first, second) = setup().await;
        presence.join(ann, &first).await.unwrap();
        presence.join(ann, &second).await.unwrap();
        presence.join(ann, &first).await.unwrap();

        let active: Vec<String> = presence
            .active_conferences_for(ann)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id.to_string())
            .collect();

        assert_eq!(active, vec!["first", "second", "first"]);
    }
}
