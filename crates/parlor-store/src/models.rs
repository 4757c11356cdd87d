//! Domain model structs persisted in the SQLite database that are not part
//! of the shared wire protocol.

use chrono::{DateTime, Utc};
use parlor_shared::{GroupId, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A chat group. Membership lives in `group_members`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// User who created the group; always a member.
    pub creator: UserId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// History window
// ---------------------------------------------------------------------------

/// Which slice of a conversation a capped history query returns.
///
/// Both variants return messages in ascending log order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryWindow {
    /// The most recent `limit` messages.
    #[default]
    Latest,
    /// The first `limit` messages ever written (legacy behavior).
    Oldest,
}

impl std::str::FromStr for HistoryWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" | "recent" => Ok(Self::Latest),
            "oldest" | "legacy" => Ok(Self::Oldest),
            other => Err(format!("unknown history window: {other}")),
        }
    }
}
