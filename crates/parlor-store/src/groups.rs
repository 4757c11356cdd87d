//! Group and membership records. Membership is the data source the server's
//! membership resolver reads at fan-out time.

use chrono::{DateTime, Utc};
use parlor_shared::{GroupId, UserId};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::Group;

impl Database {
    /// Create a group with its initial members in one transaction.
    ///
    /// The creator is always added; duplicate member ids are ignored.
    pub fn create_group(&mut self, name: &str, creator: UserId, members: &[UserId]) -> Result<Group> {
        let created_at = Utc::now();
        let stamp = created_at.to_rfc3339();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO chat_groups (name, creator_id, created_at) VALUES (?1, ?2, ?3)",
            params![name, creator.0, stamp],
        )?;
        let id = GroupId(tx.last_insert_rowid());

        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            for member in std::iter::once(&creator).chain(members) {
                insert.execute(params![id.0, member.0, stamp])?;
            }
        }
        tx.commit()?;

        tracing::debug!(group = %id, members = members.len() + 1, "group created");

        Ok(Group {
            id,
            name: name.to_string(),
            creator,
            created_at,
        })
    }

    /// Groups `user` belongs to, ordered by name.
    pub fn groups_for_user(&self, user: UserId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.creator_id, g.created_at
             FROM chat_groups g
             JOIN group_members gm ON g.id = gm.group_id
             WHERE gm.user_id = ?1
             ORDER BY g.name ASC, g.id ASC",
        )?;

        let rows = stmt.query_map(params![user.0], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    /// Current members of a group. Unknown groups have no members.
    pub fn group_members(&self, group: GroupId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map(params![group.0], |row| row.get::<_, i64>(0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(UserId(row?));
        }
        Ok(members)
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let id: i64 = row.get(0)?;
    let name: String = row.get(1)?;
    let creator: i64 = row.get(2)?;
    let created_str: String = row.get(3)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Group {
        id: GroupId(id),
        name,
        creator: UserId(creator),
        created_at,
    })
}
