use std::collections::HashMap;
use std::sync::Arc;

use parlor_shared::UserId;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::session::{DeliverySession, SessionId};

/// Who is online right now: at most one current [`DeliverySession`] per user.
///
/// Lookups share a read lock; register/unregister take the write lock. A
/// multi-instance deployment would replace this with a shared pub/sub layer
/// behind the same three operations.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<UserId, Arc<DeliverySession>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `session` as the current session for its user.
    ///
    /// A session it replaces is terminated so its receive loop ends instead
    /// of lingering unreachable. Returns the replaced session.
    pub async fn register(&self, session: Arc<DeliverySession>) -> Option<Arc<DeliverySession>> {
        let user = session.user();
        let new_id = session.id();

        let previous = self.sessions.write().await.insert(user, session);

        match &previous {
            Some(old) if old.id() != new_id => {
                old.terminate();
                info!(
                    user = %user,
                    old_session = %old.id(),
                    new_session = %new_id,
                    "Replaced existing session"
                );
            }
            _ => debug!(user = %user, session = %new_id, "Session registered"),
        }

        previous
    }

    /// Remove the entry for `user` only if it is still `session`. A stale
    /// disconnect never evicts a newer connection. Returns whether an entry
    /// was removed.
    pub async fn unregister(&self, user: UserId, session: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&user) {
            Some(current) if current.id() == session => {
                sessions.remove(&user);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user: UserId) -> Option<Arc<DeliverySession>> {
        self.sessions.read().await.get(&user).cloned()
    }

    /// Resolve many users under a single read acquisition. Offline users are
    /// skipped.
    pub async fn lookup_many(&self, users: &[UserId]) -> Vec<Arc<DeliverySession>> {
        let sessions = self.sessions.read().await;
        users
            .iter()
            .filter_map(|user| sessions.get(user).cloned())
            .collect()
    }

    pub async fn online_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
