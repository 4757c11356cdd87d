use serde::{Deserialize, Serialize};

// User identity = opaque integer issued by the authentication layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Wire ids of zero or below mean "absent" for legacy clients.
    pub fn from_wire(raw: Option<i64>) -> Option<Self> {
        raw.filter(|id| *id > 0).map(Self)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl GroupId {
    pub fn from_wire(raw: Option<i64>) -> Option<Self> {
        raw.filter(|id| *id > 0).map(Self)
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log position assigned when a message is persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity under which messages are grouped and ordered.
///
/// Direct conversations are normalized so that `(a, b)` and `(b, a)` produce
/// the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Direct { low: UserId, high: UserId },
    Group(GroupId),
}

impl ConversationKey {
    pub fn direct(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self::Direct { low: a, high: b }
        } else {
            Self::Direct { low: b, high: a }
        }
    }

    pub fn group(id: GroupId) -> Self {
        Self::Group(id)
    }

    /// Stable textual form used as the log's partition column.
    pub fn to_storage_key(&self) -> String {
        match self {
            Self::Direct { low, high } => format!("dm:{low}:{high}"),
            Self::Group(id) => format!("group:{id}"),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_storage_key())
    }
}
