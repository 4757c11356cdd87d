//! Async access to the synchronous SQLite store.

use std::sync::{Arc, Mutex};

use parlor_store::Database;

use crate::error::ServerError;

/// Shared handle to the single database connection.
///
/// Every call runs on the blocking pool and holds the connection lock only
/// for the duration of the closure, so writes are serialized in arrival
/// order.
///
/// The lock covers every conversation: a history read for one key waits on
/// an append to another. SQLite allows a single writer per file anyway, and
/// each closure is one short statement or transaction, so the wait is
/// bounded by one query. Fan-out never takes this lock.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    pub async fn call<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&mut Database) -> parlor_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut db = inner
                .lock()
                .map_err(|e| ServerError::Internal(format!("Database lock poisoned: {e}")))?;
            f(&mut db).map_err(ServerError::from)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Database task failed: {e}")))?
    }
}
