//! The ordered, durable message log the router writes to and history reads
//! from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parlor_shared::{ConversationKey, Message, NewMessage};
use parlor_store::HistoryWindow;

use crate::db::SharedDatabase;
use crate::error::ServerError;

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Persist `message` at the next position of its conversation. Once this
    /// returns `Ok` the message is visible to [`MessageLog::history`].
    async fn append(
        &self,
        message: NewMessage,
        timestamp: DateTime<Utc>,
    ) -> Result<Message, ServerError>;

    /// Up to `limit` messages of `key`, oldest first.
    async fn history(&self, key: ConversationKey, limit: u32) -> Result<Vec<Message>, ServerError>;
}

/// [`MessageLog`] backed by the `messages` table.
pub struct SqliteMessageLog {
    db: SharedDatabase,
    window: HistoryWindow,
}

impl SqliteMessageLog {
    pub fn new(db: SharedDatabase, window: HistoryWindow) -> Self {
        Self { db, window }
    }
}

#[async_trait]
impl MessageLog for SqliteMessageLog {
    async fn append(
        &self,
        message: NewMessage,
        timestamp: DateTime<Utc>,
    ) -> Result<Message, ServerError> {
        self.db
            .call(move |db| db.append_message(message, timestamp))
            .await
    }

    async fn history(&self, key: ConversationKey, limit: u32) -> Result<Vec<Message>, ServerError> {
        let window = self.window;
        self.db
            .call(move |db| db.conversation_history(&key, limit, window))
            .await
    }
}
