use async_trait::async_trait;
use parlor_shared::{GroupId, UserId};

use crate::db::SharedDatabase;
use crate::error::ServerError;

/// Answers "who is in this group right now". No caching: every call must
/// reflect membership at call time.
#[async_trait]
pub trait MembershipResolver: Send + Sync {
    async fn members_of(&self, group: GroupId) -> Result<Vec<UserId>, ServerError>;
}

/// Reads `group_members` on every call.
pub struct SqliteMembership {
    db: SharedDatabase,
}

impl SqliteMembership {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MembershipResolver for SqliteMembership {
    async fn members_of(&self, group: GroupId) -> Result<Vec<UserId>, ServerError> {
        self.db.call(move |db| db.group_members(group)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_store::Database;

    #[tokio::test]
    async fn test_members_reflect_latest_changes() {
        let db = SharedDatabase::new(Database::open_in_memory().unwrap());
        let group = db
            .call(|db| db.create_group("crew", UserId(1), &[UserId(2)]))
            .await
            .unwrap();
        let resolver = SqliteMembership::new(db.clone());

        assert_eq!(
            resolver.members_of(group.id).await.unwrap(),
            vec![UserId(1), UserId(2)]
        );

        let id = group.id;
        db.call(move |db| {
            db.conn().execute(
                "INSERT INTO group_members (group_id, user_id, joined_at)
                 VALUES (?1, 3, '2024-01-01T00:00:00Z')",
                [id.0],
            )?;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(resolver.members_of(group.id).await.unwrap().len(), 3);
    }
}
