//! PostgreSQL store.
//!
//! # Security
//!
//! - All queries use parameterized statements (SQL injection safe)
//! - Message text arrives already encrypted; this layer never sees clear text
//! - Multi-table relation updates run inside one transaction

use super::{NewMessage, Store};
use crate::errors::CsError;
use crate::models::{
    AccountKind, Chat, ChatType, Conference, ConferenceJoin, DeviceConfigurationRow, FileRef,
    GridSize, Message, MessageType, Participant, Role,
};
use chrono::{DateTime, Utc};
use common::types::{ChatId, ConferenceId, MessageId, ParticipantId};
use sqlx::{PgConnection, PgPool};
use tracing::instrument;
use uuid::Uuid;

const CONFERENCE_SELECT: &str = r#"
    SELECT
        c.id,
        c.created_at,
        c.password_hash,
        c.chat_id,
        COALESCE(
            array_agg(m.participant_id ORDER BY m.added_seq)
                FILTER (WHERE m.participant_id IS NOT NULL),
            '{}'
        ) AS users
    FROM conferences c
    LEFT JOIN conference_members m ON m.conference_id = c.id
"#;

const CHAT_SELECT: &str = r#"
    SELECT
        ch.id,
        ch.chat_type,
        ch.conference_id,
        COALESCE(
            array_agg(cp.participant_id ORDER BY cp.added_seq)
                FILTER (WHERE cp.participant_id IS NOT NULL),
            '{}'
        ) AS participants
    FROM chats ch
    LEFT JOIN chat_participants cp ON cp.chat_id = ch.id
"#;

const MESSAGE_COLUMNS: &str = r#"
    id, chat_id, text, author, author_id, pub_date, message_type,
    file_id, file_name, view_url, download_url
"#;

const DEVICE_COLUMNS: &str = r#"
    id, conference_id, user_name, microphone_id, microphone_label,
    camera_configuration, grid_rows, grid_cols
"#;

/// [`Store`] backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn conferences_query(
        &self,
        filter: &str,
        bind: Option<String>,
    ) -> Result<Vec<Conference>, CsError> {
        let sql = format!(
            "{} {} GROUP BY c.id ORDER BY c.created_at, c.id",
            CONFERENCE_SELECT, filter
        );
        let query = sqlx::query_as::<_, ConferenceRow>(&sql);
        let query = match bind {
            Some(value) => query.bind(value),
            None => query,
        };
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Conference::try_from).collect()
    }
}

/// Recompute `chat_type` from the current participant count.
async fn recompute_chat_types(conn: &mut PgConnection, chat_ids: &[i64]) -> Result<(), CsError> {
    if chat_ids.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE chats SET chat_type = CASE
            WHEN counts.n <= 1 THEN 'SINGLE'
            WHEN counts.n = 2 THEN 'PERSONAL'
            ELSE 'GROUP'
        END
        FROM (
            SELECT ch.id, COUNT(cp.participant_id) AS n
            FROM chats ch
            LEFT JOIN chat_participants cp ON cp.chat_id = ch.id
            WHERE ch.id = ANY($1)
            GROUP BY ch.id
        ) AS counts
        WHERE chats.id = counts.id
        "#,
    )
    .bind(chat_ids)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait::async_trait]
impl Store for PgStore {
    #[instrument(skip_all, fields(participant_id = %participant.id))]
    async fn insert_participant(&self, participant: &Participant) -> Result<(), CsError> {
        let roles: Vec<String> = participant
            .roles
            .iter()
            .map(|role| role.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO participants (id, display_name, email, kind, roles, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(participant.id.0)
        .bind(&participant.display_name)
        .bind(&participant.email)
        .bind(participant.kind.as_str())
        .bind(&roles)
        .bind(participant.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CsError::Conflict("Participant already exists".to_string())
            } else {
                CsError::from(e)
            }
        })?;

        Ok(())
    }

    async fn get_participant(&self, id: ParticipantId) -> Result<Option<Participant>, CsError> {
        let row: Option<ParticipantRow> = sqlx::query_as(
            r#"
            SELECT id, display_name, email, kind, roles, created_at
            FROM participants
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Participant::try_from).transpose()
    }

    async fn find_permanent_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<Option<Participant>, CsError> {
        let row: Option<ParticipantRow> = sqlx::query_as(
            r#"
            SELECT id, display_name, email, kind, roles, created_at
            FROM participants
            WHERE display_name = $1 AND kind = 'permanent'
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(display_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Participant::try_from).transpose()
    }

    async fn find_participant_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Participant>, CsError> {
        let row: Option<ParticipantRow> = sqlx::query_as(
            r#"
            SELECT id, display_name, email, kind, roles, created_at
            FROM participants
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Participant::try_from).transpose()
    }

    async fn temporary_participants_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Participant>, CsError> {
        let rows: Vec<ParticipantRow> = sqlx::query_as(
            r#"
            SELECT id, display_name, email, kind, roles, created_at
            FROM participants
            WHERE kind = 'temporary' AND created_at < $1
            ORDER BY created_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Participant::try_from).collect()
    }

    #[instrument(skip_all, fields(participant_id = %id))]
    async fn delete_participant(&self, id: ParticipantId) -> Result<bool, CsError> {
        let mut tx = self.pool.begin().await?;

        let chat_ids: Vec<i64> =
            sqlx::query_scalar("SELECT chat_id FROM chat_participants WHERE participant_id = $1")
                .bind(id.0)
                .fetch_all(&mut *tx)
                .await?;

        // Memberships, joins and chat participation cascade; messages keep
        // their author label with author_id set to NULL.
        let deleted = sqlx::query("DELETE FROM participants WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        recompute_chat_types(&mut tx, &chat_ids).await?;
        tx.commit().await?;

        Ok(deleted > 0)
    }

    #[instrument(skip_all, fields(conference_id = %conference.id))]
    async fn insert_conference(&self, conference: &Conference) -> Result<(), CsError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conferences (id, created_at, password_hash, chat_id)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(conference.id.as_str())
        .bind(conference.created_at)
        .bind(&conference.password_hash)
        .bind(conference.chat_id.map(|id| id.0))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CsError::Conflict(format!("Conference {} already exists", conference.id))
            } else {
                CsError::from(e)
            }
        })?;

        for participant_id in &conference.users {
            sqlx::query(
                r#"
                INSERT INTO conference_members (conference_id, participant_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(conference.id.as_str())
            .bind(participant_id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_conference(&self, id: &ConferenceId) -> Result<Option<Conference>, CsError> {
        let conferences = self
            .conferences_query("WHERE c.id = $1", Some(id.as_str().to_string()))
            .await?;
        Ok(conferences.into_iter().next())
    }

    async fn set_conference_password(
        &self,
        id: &ConferenceId,
        password_hash: Option<String>,
    ) -> Result<(), CsError> {
        let updated = sqlx::query("UPDATE conferences SET password_hash = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(password_hash)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(CsError::NotFound(format!("Conference {} not found", id)));
        }
        Ok(())
    }

    async fn link_conference_chat(
        &self,
        id: &ConferenceId,
        chat_id: ChatId,
    ) -> Result<(), CsError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE conferences SET chat_id = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(chat_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    CsError::NotFound(format!("Chat {} not found", chat_id))
                } else {
                    CsError::from(e)
                }
            })?
            .rows_affected();

        if updated == 0 {
            return Err(CsError::NotFound(format!("Conference {} not found", id)));
        }

        sqlx::query("UPDATE chats SET conference_id = $1 WHERE id = $2")
            .bind(id.as_str())
            .bind(chat_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, fields(conference_id = %id))]
    async fn delete_conference(&self, id: &ConferenceId) -> Result<bool, CsError> {
        let deleted = sqlx::query("DELETE FROM conferences WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    CsError::Conflict(format!("Conference {} is still referenced", id))
                } else {
                    CsError::from(e)
                }
            })?
            .rows_affected();

        Ok(deleted > 0)
    }

    async fn list_conferences(&self) -> Result<Vec<Conference>, CsError> {
        self.conferences_query("", None).await
    }

    async fn conferences_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Conference>, CsError> {
        let rows: Vec<ConferenceRow> = sqlx::query_as(&format!(
            "{} WHERE c.created_at < $1 GROUP BY c.id ORDER BY c.created_at, c.id",
            CONFERENCE_SELECT
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Conference::try_from).collect()
    }

    async fn search_conferences(&self, fragment: &str) -> Result<Vec<Conference>, CsError> {
        // strpos keeps '%' and '_' in the fragment literal
        self.conferences_query(
            "WHERE strpos(c.id, $1) > 0",
            Some(fragment.to_string()),
        )
        .await
    }

    async fn add_member(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<bool, CsError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO conference_members (conference_id, participant_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(conference_id.as_str())
        .bind(participant_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                CsError::NotFound("Conference or participant not found".to_string())
            } else {
                CsError::from(e)
            }
        })?
        .rows_affected();

        Ok(inserted > 0)
    }

    async fn remove_member(
        &self,
        conference_id: &ConferenceId,
        participant_id: ParticipantId,
    ) -> Result<bool, CsError> {
        let deleted = sqlx::query(
            "DELETE FROM conference_members WHERE conference_id = $1 AND participant_id = $2",
        )
        .bind(conference_id.as_str())
        .bind(participant_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted > 0)
    }

    async fn conferences_of(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<Conference>, CsError> {
        let rows: Vec<ConferenceRow> = sqlx::query_as(&format!(
            r#"{}
            WHERE c.id IN (SELECT conference_id FROM conference_members WHERE participant_id = $1)
            GROUP BY c.id
            ORDER BY c.created_at, c.id"#,
            CONFERENCE_SELECT
        ))
        .bind(participant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Conference::try_from).collect()
    }

    #[instrument(skip_all, fields(conference_id = %conference_id))]
    async fn insert_join(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<ConferenceJoin, CsError> {
        let row: JoinRow = sqlx::query_as(
            r#"
            INSERT INTO conference_joins (participant_id, conference_id, joined_at)
            VALUES ($1, $2, NOW())
            RETURNING id, participant_id, conference_id, joined_at
            "#,
        )
        .bind(participant_id.0)
        .bind(conference_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                CsError::NotFound(format!("Conference {} not found", conference_id))
            } else {
                CsError::from(e)
            }
        })?;

        ConferenceJoin::try_from(row)
    }

    async fn delete_first_join(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<bool, CsError> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM conference_joins
            WHERE id = (
                SELECT id FROM conference_joins
                WHERE participant_id = $1 AND conference_id = $2
                ORDER BY id
                LIMIT 1
            )
            "#,
        )
        .bind(participant_id.0)
        .bind(conference_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted > 0)
    }

    async fn count_joins(
        &self,
        participant_id: ParticipantId,
        conference_id: &ConferenceId,
    ) -> Result<i64, CsError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM conference_joins WHERE participant_id = $1 AND conference_id = $2",
        )
        .bind(participant_id.0)
        .bind(conference_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_conference_joins(&self, conference_id: &ConferenceId) -> Result<i64, CsError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conference_joins WHERE conference_id = $1")
                .bind(conference_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn count_participant_joins(
        &self,
        participant_id: ParticipantId,
    ) -> Result<i64, CsError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conference_joins WHERE participant_id = $1")
                .bind(participant_id.0)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn joins_of(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<ConferenceJoin>, CsError> {
        let rows: Vec<JoinRow> = sqlx::query_as(
            r#"
            SELECT id, participant_id, conference_id, joined_at
            FROM conference_joins
            WHERE participant_id = $1
            ORDER BY id
            "#,
        )
        .bind(participant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ConferenceJoin::try_from).collect()
    }

    async fn delete_conference_joins(&self, conference_id: &ConferenceId) -> Result<u64, CsError> {
        let deleted = sqlx::query("DELETE FROM conference_joins WHERE conference_id = $1")
            .bind(conference_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }

    async fn upsert_device_configuration(
        &self,
        row: &DeviceConfigurationRow,
    ) -> Result<DeviceConfigurationRow, CsError> {
        let saved: DeviceRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO device_configurations
                (conference_id, user_name, microphone_id, microphone_label,
                 camera_configuration, grid_rows, grid_cols)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (conference_id, user_name) DO UPDATE SET
                microphone_id = EXCLUDED.microphone_id,
                microphone_label = EXCLUDED.microphone_label,
                camera_configuration = EXCLUDED.camera_configuration,
                grid_rows = EXCLUDED.grid_rows,
                grid_cols = EXCLUDED.grid_cols
            RETURNING {}
            "#,
            DEVICE_COLUMNS
        ))
        .bind(row.conference_id.as_str())
        .bind(&row.user_name)
        .bind(&row.microphone_id)
        .bind(&row.microphone_label)
        .bind(&row.camera_configuration)
        .bind(row.grid.rows)
        .bind(row.grid.cols)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                CsError::NotFound(format!("Conference {} not found", row.conference_id))
            } else {
                CsError::from(e)
            }
        })?;

        DeviceConfigurationRow::try_from(saved)
    }

    async fn device_configuration(
        &self,
        conference_id: &ConferenceId,
        user_name: &str,
    ) -> Result<Option<DeviceConfigurationRow>, CsError> {
        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM device_configurations WHERE conference_id = $1 AND user_name = $2",
            DEVICE_COLUMNS
        ))
        .bind(conference_id.as_str())
        .bind(user_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeviceConfigurationRow::try_from).transpose()
    }

    async fn device_configurations_for_conference(
        &self,
        conference_id: &ConferenceId,
    ) -> Result<Vec<DeviceConfigurationRow>, CsError> {
        let rows: Vec<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM device_configurations WHERE conference_id = $1 ORDER BY id",
            DEVICE_COLUMNS
        ))
        .bind(conference_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(DeviceConfigurationRow::try_from)
            .collect()
    }

    async fn device_configurations_for_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<DeviceConfigurationRow>, CsError> {
        let rows: Vec<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM device_configurations WHERE user_name = $1 ORDER BY id",
            DEVICE_COLUMNS
        ))
        .bind(user_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(DeviceConfigurationRow::try_from)
            .collect()
    }

    async fn delete_device_configurations(
        &self,
        conference_id: &ConferenceId,
    ) -> Result<u64, CsError> {
        let deleted = sqlx::query("DELETE FROM device_configurations WHERE conference_id = $1")
            .bind(conference_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted)
    }

    #[instrument(skip_all)]
    async fn insert_chat(
        &self,
        conference_id: Option<&ConferenceId>,
        participants: &[ParticipantId],
    ) -> Result<Chat, CsError> {
        let mut tx = self.pool.begin().await?;

        if let Some(conference_id) = conference_id {
            let existing: Option<Option<i64>> =
                sqlx::query_scalar("SELECT chat_id FROM conferences WHERE id = $1 FOR UPDATE")
                    .bind(conference_id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            match existing {
                None => {
                    return Err(CsError::NotFound(format!(
                        "Conference {} not found",
                        conference_id
                    )))
                }
                Some(Some(_)) => {
                    return Err(CsError::Conflict(format!(
                        "Conference {} already has a chat",
                        conference_id
                    )))
                }
                Some(None) => {}
            }
        }

        let mut unique: Vec<Uuid> = Vec::with_capacity(participants.len());
        for participant_id in participants {
            if !unique.contains(&participant_id.0) {
                unique.push(participant_id.0);
            }
        }

        let chat_id: i64 = sqlx::query_scalar(
            "INSERT INTO chats (chat_type, conference_id) VALUES ($1, $2) RETURNING id",
        )
        .bind(ChatType::for_participant_count(unique.len()).as_str())
        .bind(conference_id.map(ConferenceId::as_str))
        .fetch_one(&mut *tx)
        .await?;

        for participant_id in &unique {
            sqlx::query("INSERT INTO chat_participants (chat_id, participant_id) VALUES ($1, $2)")
                .bind(chat_id)
                .bind(participant_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_foreign_key_violation(&e) {
                        CsError::NotFound(format!("Participant {} not found", participant_id))
                    } else {
                        CsError::from(e)
                    }
                })?;
        }

        if let Some(conference_id) = conference_id {
            sqlx::query("UPDATE conferences SET chat_id = $2 WHERE id = $1")
                .bind(conference_id.as_str())
                .bind(chat_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.get_chat(ChatId(chat_id))
            .await?
            .ok_or_else(|| CsError::Internal("chat vanished after insert".to_string()))
    }

    async fn get_chat(&self, id: ChatId) -> Result<Option<Chat>, CsError> {
        let row: Option<ChatRow> = sqlx::query_as(&format!(
            "{} WHERE ch.id = $1 GROUP BY ch.id",
            CHAT_SELECT
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Chat::try_from).transpose()
    }

    async fn chats_of(&self, participant_id: ParticipantId) -> Result<Vec<Chat>, CsError> {
        let rows: Vec<ChatRow> = sqlx::query_as(&format!(
            r#"{}
            WHERE ch.id IN (SELECT chat_id FROM chat_participants WHERE participant_id = $1)
            GROUP BY ch.id
            ORDER BY ch.id"#,
            CHAT_SELECT
        ))
        .bind(participant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Chat::try_from).collect()
    }

    #[instrument(skip_all, fields(chat_id = %chat_id))]
    async fn add_chat_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chat_participants (chat_id, participant_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(chat_id.0)
        .bind(participant_id.0)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                CsError::NotFound("Chat or participant not found".to_string())
            } else {
                CsError::from(e)
            }
        })?;

        recompute_chat_types(&mut tx, &[chat_id.0]).await?;
        tx.commit().await?;

        self.get_chat(chat_id)
            .await?
            .ok_or_else(|| CsError::NotFound(format!("Chat {} not found", chat_id)))
    }

    #[instrument(skip_all, fields(chat_id = %chat_id))]
    async fn remove_chat_participant(
        &self,
        chat_id: ChatId,
        participant_id: ParticipantId,
    ) -> Result<Chat, CsError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chat_participants WHERE chat_id = $1 AND participant_id = $2")
            .bind(chat_id.0)
            .bind(participant_id.0)
            .execute(&mut *tx)
            .await?;

        recompute_chat_types(&mut tx, &[chat_id.0]).await?;
        tx.commit().await?;

        self.get_chat(chat_id)
            .await?
            .ok_or_else(|| CsError::NotFound(format!("Chat {} not found", chat_id)))
    }

    #[instrument(skip_all, fields(chat_id = %id))]
    async fn delete_chat(&self, id: ChatId) -> Result<bool, CsError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chat_participants WHERE chat_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        // conferences.chat_id is cleared by ON DELETE SET NULL
        let deleted = sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    CsError::Conflict(format!("Chat {} still has messages", id))
                } else {
                    CsError::from(e)
                }
            })?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message, CsError> {
        let file = message.file.as_ref();
        let row: MessageRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO messages
                (chat_id, text, author, author_id, pub_date, message_type,
                 file_id, file_name, view_url, download_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(message.chat_id.0)
        .bind(&message.text)
        .bind(&message.author)
        .bind(message.author_id.map(|id| id.0))
        .bind(&message.pub_date)
        .bind(message.message_type.as_str())
        .bind(file.map(|f| f.file_id.as_str()))
        .bind(file.map(|f| f.file_name.as_str()))
        .bind(file.map(|f| f.view_url.as_str()))
        .bind(file.map(|f| f.download_url.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                CsError::NotFound(format!("Chat {} not found", message.chat_id))
            } else {
                CsError::from(e)
            }
        })?;

        Message::try_from(row)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, CsError> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE id = $1",
            MESSAGE_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::try_from).transpose()
    }

    async fn delete_message(&self, id: MessageId) -> Result<bool, CsError> {
        let deleted = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted > 0)
    }

    async fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>, CsError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE chat_id = $1 ORDER BY id",
            MESSAGE_COLUMNS
        ))
        .bind(chat_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn messages_by_author(&self, author_id: ParticipantId) -> Result<Vec<Message>, CsError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages WHERE author_id = $1 ORDER BY id",
            MESSAGE_COLUMNS
        ))
        .bind(author_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CsError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<(), CsError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), CsError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// Database Row Types
// ============================================================================

fn corrupt(what: &str, value: &str) -> CsError {
    CsError::Database(format!("stored {} is invalid: {}", what, value))
}

fn parse_conference_id(value: &str) -> Result<ConferenceId, CsError> {
    ConferenceId::parse(value).map_err(|_| corrupt("conference id", value))
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    id: Uuid,
    display_name: String,
    email: Option<String>,
    kind: String,
    roles: Vec<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = CsError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        let kind = AccountKind::parse(&row.kind).ok_or_else(|| corrupt("account kind", &row.kind))?;
        let roles = row
            .roles
            .iter()
            .map(|role| Role::parse(role).ok_or_else(|| corrupt("role", role)))
            .collect::<Result<_, _>>()?;

        Ok(Participant {
            id: ParticipantId(row.id),
            display_name: row.display_name,
            email: row.email,
            kind,
            created_at: row.created_at,
            roles,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConferenceRow {
    id: String,
    created_at: DateTime<Utc>,
    password_hash: Option<String>,
    chat_id: Option<i64>,
    users: Vec<Uuid>,
}

impl TryFrom<ConferenceRow> for Conference {
    type Error = CsError;

    fn try_from(row: ConferenceRow) -> Result<Self, Self::Error> {
        Ok(Conference {
            id: parse_conference_id(&row.id)?,
            created_at: row.created_at,
            password_hash: row.password_hash,
            chat_id: row.chat_id.map(ChatId),
            users: row.users.into_iter().map(ParticipantId).collect(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct JoinRow {
    id: i64,
    participant_id: Uuid,
    conference_id: String,
    joined_at: DateTime<Utc>,
}

impl TryFrom<JoinRow> for ConferenceJoin {
    type Error = CsError;

    fn try_from(row: JoinRow) -> Result<Self, Self::Error> {
        Ok(ConferenceJoin {
            id: row.id,
            participant_id: ParticipantId(row.participant_id),
            conference_id: parse_conference_id(&row.conference_id)?,
            joined_at: row.joined_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: i64,
    conference_id: String,
    user_name: String,
    microphone_id: Option<String>,
    microphone_label: Option<String>,
    camera_configuration: String,
    grid_rows: i32,
    grid_cols: i32,
}

impl TryFrom<DeviceRow> for DeviceConfigurationRow {
    type Error = CsError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        Ok(DeviceConfigurationRow {
            id: row.id,
            conference_id: parse_conference_id(&row.conference_id)?,
            user_name: row.user_name,
            microphone_id: row.microphone_id,
            microphone_label: row.microphone_label,
            camera_configuration: row.camera_configuration,
            grid: GridSize {
                rows: row.grid_rows,
                cols: row.grid_cols,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: i64,
    chat_type: String,
    conference_id: Option<String>,
    participants: Vec<Uuid>,
}

impl TryFrom<ChatRow> for Chat {
    type Error = CsError;

    fn try_from(row: ChatRow) -> Result<Self, Self::Error> {
        let chat_type =
            ChatType::parse(&row.chat_type).ok_or_else(|| corrupt("chat type", &row.chat_type))?;
        let conference_id = row
            .conference_id
            .as_deref()
            .map(parse_conference_id)
            .transpose()?;

        Ok(Chat {
            id: ChatId(row.id),
            chat_type,
            conference_id,
            participants: row.participants.into_iter().map(ParticipantId).collect(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    chat_id: i64,
    text: String,
    author: String,
    author_id: Option<Uuid>,
    pub_date: String,
    message_type: String,
    file_id: Option<String>,
    file_name: Option<String>,
    view_url: Option<String>,
    download_url: Option<String>,
}

impl TryFrom<MessageRow> for Message {
    type Error = CsError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let message_type = MessageType::parse(&row.message_type)
            .ok_or_else(|| corrupt("message type", &row.message_type))?;

        let file = match (row.file_id, row.file_name, row.view_url, row.download_url) {
            (Some(file_id), Some(file_name), Some(view_url), Some(download_url)) => Some(FileRef {
                file_id,
                file_name,
                view_url,
                download_url,
            }),
            _ => None,
        };

        Ok(Message {
            id: MessageId(row.id),
            chat_id: ChatId(row.chat_id),
            text: row.text,
            author: row.author,
            author_id: row.author_id.map(ParticipantId),
            pub_date: row.pub_date,
            message_type,
            file,
        })
    }
}
