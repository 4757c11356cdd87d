use chrono::{DateTime, Utc};

use crate::protocol::{ChatEvent, MessageEvent};
use crate::types::{ConversationKey, GroupId, MessageId, UserId};

/// Where a message is addressed. Exactly one destination per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Direct(UserId),
    Group(GroupId),
}

/// Reference to an uploaded media object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub url: String,
    /// MIME-ish kind as reported by the client (e.g. `image/png`).
    pub kind: Option<String>,
}

/// A validated message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub from: UserId,
    pub target: Target,
    pub content: Option<String>,
    pub media: Option<Media>,
}

impl NewMessage {
    pub fn conversation_key(&self) -> ConversationKey {
        conversation_key(self.from, self.target)
    }

    /// Seal the message with its log position and persistence timestamp.
    pub fn into_message(self, id: MessageId, timestamp: DateTime<Utc>) -> Message {
        Message {
            id,
            from: self.from,
            target: self.target,
            content: self.content,
            media: self.media,
            timestamp,
        }
    }
}

/// A persisted, immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub from: UserId,
    pub target: Target,
    pub content: Option<String>,
    pub media: Option<Media>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn conversation_key(&self) -> ConversationKey {
        conversation_key(self.from, self.target)
    }

    pub fn to_event(&self) -> ChatEvent {
        let (to, group_id) = match self.target {
            Target::Direct(user) => (Some(user), None),
            Target::Group(group) => (None, Some(group)),
        };
        ChatEvent::Message(MessageEvent {
            id: self.id,
            from: self.from,
            to,
            group_id,
            content: self.content.clone(),
            media_url: self.media.as_ref().map(|m| m.url.clone()),
            media_type: self.media.as_ref().and_then(|m| m.kind.clone()),
            timestamp: self.timestamp,
        })
    }
}

fn conversation_key(from: UserId, target: Target) -> ConversationKey {
    match target {
        Target::Direct(to) => ConversationKey::direct(from, to),
        Target::Group(group) => ConversationKey::group(group),
    }
}
