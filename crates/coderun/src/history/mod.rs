//! Per-identity execution history.
//!
//! Every script run by a caller with an attached [`Identity`] is appended to
//! that identity's log as a [`HistoryRecord`]. Records are never updated or
//! removed here; anonymous runs leave no trace.
//!
//! ## Layers
//!
//! - [`HistoryStore`]: where records live. [`InMemoryHistoryStore`] for
//!   tests and single-process use, [`JsonlHistoryStore`] for an append-only
//!   file that survives restarts.
//! - [`AccountDirectory`]: decides whether an identity belongs to a known
//!   account. Unknown identities get no history.
//! - [`HistoryRecorder`]: the write path used by the runner. It swallows
//!   every persistence failure after logging it, so a broken store never
//!   turns a finished execution into an error.

mod recorder;
mod storage;

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use recorder::HistoryRecorder;
pub use storage::{HistoryStore, InMemoryHistoryStore, JsonlHistoryStore};

/// Opaque reference to an authenticated account.
///
/// Issued by whatever handles sessions; this crate only uses it as a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap an account reference.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One executed script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Who ran it.
    pub identity: Identity,
    /// When it finished (UTC).
    pub timestamp: DateTime<Utc>,
    /// The submitted source.
    pub code: String,
    /// What the learner saw, error text included.
    pub output: String,
}

impl HistoryRecord {
    /// A record stamped with the current time.
    pub fn now(identity: Identity, code: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            identity,
            timestamp: Utc::now(),
            code: code.into(),
            output: output.into(),
        }
    }
}

/// Errors from history storage.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The identity does not resolve to a known account
    #[error("unknown identity: {0}")]
    UnknownIdentity(Identity),
    /// IO error from a file-backed store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Resolves identities to known accounts.
pub trait AccountDirectory: Send + Sync {
    /// Whether `identity` belongs to an account that may keep history.
    fn contains(&self, identity: &Identity) -> bool;
}

/// Treats every identity as a known account.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenDirectory;

impl AccountDirectory for OpenDirectory {
    fn contains(&self, _identity: &Identity) -> bool {
        true
    }
}

/// A fixed set of known accounts.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    accounts: HashSet<Identity>,
}

impl StaticDirectory {
    /// Create a directory from a list of identities.
    pub fn new<I, T>(accounts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Identity>,
    {
        Self {
            accounts: accounts.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccountDirectory for StaticDirectory {
    fn contains(&self, identity: &Identity) -> bool {
        self.accounts.contains(identity)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_transparent_in_json() {
        let id = Identity::new("learner-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"learner-7\"");
        assert_eq!(id.to_string(), "learner-7");
    }

    #[test]
    fn test_record_serialization() {
        let record = HistoryRecord::now("amal".into(), "print('hi')", "hi\n");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"identity\":\"amal\""));

        let back: HistoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_static_directory() {
        let directory = StaticDirectory::new(["amal", "yusuf"]);
        assert!(directory.contains(&"amal".into()));
        assert!(!directory.contains(&"mallory".into()));
        assert!(OpenDirectory.contains(&"mallory".into()));
    }
}
