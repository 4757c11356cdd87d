use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::message::{Media, NewMessage, Target};
use crate::types::{GroupId, MessageId, UserId};

/// Events pushed to a client over its receive stream.
///
/// Serialized as a flat JSON object tagged by `type`, e.g.
/// `{"type":"typing","from":3}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    /// Sent once when the stream opens.
    Connected,
    /// A persisted chat message.
    Message(MessageEvent),
    /// Transient "user is typing" notice, never persisted.
    Typing { from: UserId },
}

impl ChatEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Wire form of a chat message, shared by the push stream and history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: MessageId,
    pub from: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Unix seconds.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

/// Body of a send request.
///
/// Ids are kept raw because legacy clients send `0` for "absent".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub from: Option<i64>,
    #[serde(default)]
    pub to: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

impl SendRequest {
    /// Check the request shape and turn it into a message ready to persist.
    pub fn validate(self) -> Result<NewMessage, ValidationError> {
        let from = UserId::from_wire(self.from).ok_or(ValidationError::MissingSender)?;

        let target = match (UserId::from_wire(self.to), GroupId::from_wire(self.group_id)) {
            (Some(to), None) => Target::Direct(to),
            (None, Some(group)) => Target::Group(group),
            (Some(_), Some(_)) => return Err(ValidationError::AmbiguousTarget),
            (None, None) => return Err(ValidationError::MissingTarget),
        };

        let content = non_empty(self.content);
        let media = non_empty(self.media_url).map(|url| Media {
            url,
            kind: non_empty(self.media_type),
        });

        if content.is_none() && media.is_none() {
            return Err(ValidationError::EmptyMessage);
        }

        Ok(NewMessage {
            from,
            target,
            content,
            media,
        })
    }
}

/// Body of a typing notification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypingRequest {
    #[serde(default)]
    pub from: Option<i64>,
    #[serde(default)]
    pub to: Option<i64>,
}

impl TypingRequest {
    /// Returns `(sender, recipient)`.
    pub fn validate(self) -> Result<(UserId, UserId), ValidationError> {
        let from = UserId::from_wire(self.from).ok_or(ValidationError::MissingSender)?;
        let to = UserId::from_wire(self.to).ok_or(ValidationError::MissingRecipient)?;
        Ok((from, to))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
