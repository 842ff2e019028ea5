//! The history write path.

use std::fmt;
use std::sync::Arc;

use super::{
    AccountDirectory, HistoryError, HistoryRecord, HistoryStore, Identity, InMemoryHistoryStore,
    OpenDirectory,
};

/// Records executed scripts against their identity.
///
/// Writes never fail from the caller's point of view: an unknown identity or
/// a storage error is logged at `warn` and the record is dropped.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
    accounts: Arc<dyn AccountDirectory>,
}

impl fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryRecorder").finish_non_exhaustive()
    }
}

impl Default for HistoryRecorder {
    /// In-memory store, every identity accepted.
    fn default() -> Self {
        Self::new(Arc::new(InMemoryHistoryStore::new()), Arc::new(OpenDirectory))
    }
}

impl HistoryRecorder {
    /// Create a recorder over `store`, keeping history only for identities
    /// `accounts` knows.
    pub fn new(store: Arc<dyn HistoryStore>, accounts: Arc<dyn AccountDirectory>) -> Self {
        Self { store, accounts }
    }

    /// Append a record for `identity`, stamped now.
    ///
    /// Returns whether a record was written.
    pub async fn record(&self, identity: &Identity, code: &str, output: &str) -> bool {
        match self.try_record(identity, code, output).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "history record dropped");
                false
            }
        }
    }

    async fn try_record(
        &self,
        identity: &Identity,
        code: &str,
        output: &str,
    ) -> Result<(), HistoryError> {
        if !self.accounts.contains(identity) {
            return Err(HistoryError::UnknownIdentity(identity.clone()));
        }
        self.store
            .append(HistoryRecord::now(identity.clone(), code, output))
            .await
    }

    /// Every record for `identity`, in execution order.
    pub async fn list_for(&self, identity: &Identity) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.store.list(identity).await
    }

    /// A window of `identity`'s records, in execution order.
    pub async fn list_page(
        &self,
        identity: &Identity,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.store.page(identity, offset, limit).await
    }

    /// How many records `identity` has.
    pub async fn count_for(&self, identity: &Identity) -> Result<usize, HistoryError> {
        self.store.count(identity).await
    }
}
