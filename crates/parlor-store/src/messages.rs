use chrono::{DateTime, Utc};
use parlor_shared::{
    ConversationKey, GroupId, Media, Message, MessageId, NewMessage, Target, UserId,
};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::HistoryWindow;

const MESSAGE_COLUMNS: &str =
    "id, from_user, to_user, group_id, content, media_url, media_type, created_at";

impl Database {
    /// Append a message to its conversation. The returned message carries
    /// the assigned log position.
    pub fn append_message(&self, message: NewMessage, timestamp: DateTime<Utc>) -> Result<Message> {
        let (to_user, group_id) = match message.target {
            Target::Direct(to) => (Some(to.0), None),
            Target::Group(group) => (None, Some(group.0)),
        };

        self.conn().execute(
            "INSERT INTO messages
                (conversation, from_user, to_user, group_id, content, media_url, media_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.conversation_key().to_storage_key(),
                message.from.0,
                to_user,
                group_id,
                message.content,
                message.media.as_ref().map(|m| m.url.as_str()),
                message.media.as_ref().and_then(|m| m.kind.as_deref()),
                timestamp.to_rfc3339(),
            ],
        )?;

        let id = MessageId(self.conn().last_insert_rowid());
        Ok(message.into_message(id, timestamp))
    }

    /// Up to `limit` messages of a conversation in ascending log order.
    pub fn conversation_history(
        &self,
        key: &ConversationKey,
        limit: u32,
        window: HistoryWindow,
    ) -> Result<Vec<Message>> {
        let sql = match window {
            HistoryWindow::Oldest => format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation = ?1
                 ORDER BY id ASC
                 LIMIT ?2"
            ),
            HistoryWindow::Latest => format!(
                "SELECT {MESSAGE_COLUMNS} FROM (
                     SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation = ?1
                     ORDER BY id DESC
                     LIMIT ?2
                 ) ORDER BY id ASC"
            ),
        };

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![key.to_storage_key(), limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: i64 = row.get(0)?;
    let from: i64 = row.get(1)?;
    let to_user: Option<i64> = row.get(2)?;
    let group_id: Option<i64> = row.get(3)?;
    let content: Option<String> = row.get(4)?;
    let media_url: Option<String> = row.get(5)?;
    let media_type: Option<String> = row.get(6)?;
    let ts_str: String = row.get(7)?;

    let target = match (to_user, group_id) {
        (Some(to), None) => Target::Direct(UserId(to)),
        (None, Some(group)) => Target::Group(GroupId(group)),
        _ => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Integer,
                Box::new(StoreError::Corrupt(format!(
                    "message {id} must have exactly one of to_user/group_id"
                ))),
            ))
        }
    };

    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: MessageId(id),
        from: UserId(from),
        target,
        content,
        media: media_url.map(|url| Media {
            url,
            kind: media_type,
        }),
        timestamp,
    })
}
