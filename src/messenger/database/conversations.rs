use chrono::{DateTime, SubsecRound, Utc};

use super::{
    Database,
    utils::{parse_json_column, parse_timestamp},
};
use crate::messenger::{
    conversation_id::ConversationId,
    conversations::{Conversation, Message},
    error::{MessengerError, Result},
};

#[derive(Debug)]
struct ConversationRow {
    id: String,
    participants: Vec<String>,
    is_group: bool,
    messages: Vec<Message>,
    version: i64,
    last_updated: DateTime<Utc>,
}

impl<'r, R> sqlx::FromRow<'r, R> for ConversationRow
where
    R: sqlx::Row,
    &'r str: sqlx::ColumnIndex<R>,
    String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    fn from_row(row: &'r R) -> std::result::Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let participants: Vec<String> = parse_json_column(row, "participants")?;
        let is_group: i64 = row.try_get("is_group")?;
        let messages: Vec<Message> = parse_json_column(row, "messages")?;
        let version: i64 = row.try_get("version")?;
        let last_updated = parse_timestamp(row, "last_updated")?;

        Ok(Self {
            id,
            participants,
            is_group: is_group != 0,
            messages,
            version,
            last_updated,
        })
    }
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: ConversationId::from_external(row.id),
            participants: row.participants,
            is_group: row.is_group,
            last_updated: row.last_updated,
            messages: row.messages,
            version: row.version,
        }
    }
}

/// Result of a read-modify-write on a single conversation.
#[derive(Debug, Clone)]
pub(crate) enum UpdateOutcome {
    /// The mutation was written; carries the new document and version
    Committed(Conversation),
    /// The mutation reported nothing to change; nothing was written
    Unchanged(Conversation),
}

impl UpdateOutcome {
    pub(crate) fn into_conversation(self) -> Conversation {
        match self {
            UpdateOutcome::Committed(conversation) | UpdateOutcome::Unchanged(conversation) => {
                conversation
            }
        }
    }
}

/// Current time at the millisecond precision the `last_updated` column stores.
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl Conversation {
    pub(crate) async fn find_optional(
        id: &ConversationId,
        database: &Database,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>("SELECT * FROM conversations WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&database.pool)
            .await?;
        Ok(row.map(Conversation::from))
    }

    pub(crate) async fn find_by_id(id: &ConversationId, database: &Database) -> Result<Conversation> {
        Self::find_optional(id, database)
            .await?
            .ok_or(MessengerError::ConversationNotFound)
    }

    /// Conversations whose participant set contains `user_id`, most recently updated first.
    pub(crate) async fn find_by_participant(
        user_id: &str,
        database: &Database,
    ) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT c.* FROM conversations c
             WHERE EXISTS (SELECT 1 FROM json_each(c.participants) p WHERE p.value = ?)
             ORDER BY c.last_updated DESC, c.id ASC",
        )
        .bind(user_id)
        .fetch_all(&database.pool)
        .await?;
        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    /// Creates the conversation unless it exists. Returns the stored document and
    /// whether this call created it.
    ///
    /// Concurrent callers race on the primary key; exactly one insert wins and all of
    /// them read back the same row. `participants` must already be normalized.
    pub(crate) async fn create_if_absent(
        id: &ConversationId,
        participants: &[String],
        database: &Database,
    ) -> Result<(Conversation, bool)> {
        let now_ms = now_millis().timestamp_millis();
        let participants_json = serde_json::to_string(participants)?;

        let inserted = sqlx::query(
            "INSERT INTO conversations (id, participants, is_group, messages, version, last_updated, created_at)
             VALUES (?, ?, ?, '[]', 1, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(&participants_json)
        .bind(participants.len() > 2)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&database.pool)
        .await?
        .rows_affected()
            == 1;

        let conversation = Self::find_by_id(id, database).await?;
        if conversation.participants != participants {
            tracing::warn!(
                target: "messenger::database::conversations",
                "Conversation {} exists with participants {:?}, requested {:?}",
                id,
                conversation.participants,
                participants
            );
            return Err(MessengerError::ParticipantsMismatch);
        }

        if inserted {
            tracing::debug!(
                target: "messenger::database::conversations",
                "Inserted conversation {}",
                id
            );
        }
        Ok((conversation, inserted))
    }

    /// Single optimistic read-modify-write of one conversation.
    ///
    /// `mutate` returns whether it changed the document together with a value handed back
    /// to the caller, or an error which aborts without writing. Only the message log is
    /// written back, guarded by the version that was read; a concurrent commit in between
    /// yields [`MessengerError::Conflict`].
    pub(crate) async fn atomic_update<F, T>(
        id: &ConversationId,
        database: &Database,
        mutate: F,
    ) -> Result<(UpdateOutcome, T)>
    where
        F: FnOnce(&mut Conversation) -> Result<(bool, T)>,
    {
        let mut conversation = Self::find_by_id(id, database).await?;
        let read_version = conversation.version;
        let participants = conversation.participants.clone();
        let is_group = conversation.is_group;

        let (changed, value) = mutate(&mut conversation)?;
        if !changed {
            return Ok((UpdateOutcome::Unchanged(conversation), value));
        }

        if conversation.id != *id
            || conversation.participants != participants
            || conversation.is_group != is_group
        {
            return Err(MessengerError::InvalidParticipants(
                "conversation identity and participants are immutable".to_string(),
            ));
        }

        let last_updated = now_millis().max(conversation.last_updated);
        let swapped = Self::compare_and_swap_messages(
            id,
            read_version,
            &conversation.messages,
            last_updated,
            database,
        )
        .await?;

        if !swapped {
            tracing::debug!(
                target: "messenger::database::conversations",
                "Version {} of conversation {} is stale",
                read_version,
                id
            );
            return Err(MessengerError::Conflict);
        }

        conversation.version = read_version + 1;
        conversation.last_updated = last_updated;
        Ok((UpdateOutcome::Committed(conversation), value))
    }

    /// Writes the message log only if the stored version still equals `expected_version`.
    /// Returns whether the row was updated.
    async fn compare_and_swap_messages(
        id: &ConversationId,
        expected_version: i64,
        messages: &[Message],
        last_updated: DateTime<Utc>,
        database: &Database,
    ) -> Result<bool> {
        let messages_json = serde_json::to_string(messages)?;
        let result = sqlx::query(
            "UPDATE conversations
             SET messages = ?, version = version + 1, last_updated = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&messages_json)
        .bind(last_updated.timestamp_millis())
        .bind(id.as_str())
        .bind(expected_version)
        .execute(&database.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
