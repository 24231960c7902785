//! Per-virtual-user session state
//!
//! A [`Session`] is an owned value threaded through the fetch pipeline: the
//! scheduler holds the current value, hands snapshots to dispatched
//! sub-requests, and folds the [`SessionUpdate`]s received on completion
//! events back into it. At any moment exactly one owner mutates it; there
//! is no shared mutable session.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use url::Url;

/// A deferred session mutation carried by a completion event
pub type SessionUpdate = Box<dyn FnOnce(Session) -> Session + Send>;

/// The update that leaves a session unchanged
pub fn identity_update() -> SessionUpdate {
    Box::new(|session| session)
}

/// Per-virtual-user state
///
/// Carries user attributes (for explicit-request name resolution), the
/// per-URI resource expiry store backing conditional fetch decisions, and
/// the log of aggregate group records emitted at page-load completion.
#[derive(Debug, Clone, Default)]
pub struct Session {
    attributes: HashMap<String, serde_json::Value>,
    expires: HashMap<Url, DateTime<Utc>>,
    groups: Vec<GroupRecord>,
}

impl Session {
    /// Create an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a user attribute, returning the updated session
    pub fn set_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Look up a user attribute
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Look up the recorded expiry for a resource URI
    pub fn resource_expiry(&self, uri: &Url) -> Option<DateTime<Utc>> {
        self.expires.get(uri).copied()
    }

    /// Record an expiry for a resource URI, returning the updated session
    pub fn set_resource_expiry(mut self, uri: Url, expires: DateTime<Utc>) -> Self {
        self.expires.insert(uri, expires);
        self
    }

    /// Drop the recorded expiry for a resource URI, returning the updated session
    pub fn clear_resource_expiry(mut self, uri: &Url) -> Self {
        self.expires.remove(uri);
        self
    }

    /// Append an aggregate record for a completed group of async requests
    pub fn log_group_async_requests(mut self, elapsed_ms: u64, ok: usize, ko: usize) -> Self {
        self.groups.push(GroupRecord { elapsed_ms, ok, ko });
        self
    }

    /// The aggregate group records logged so far
    pub fn group_records(&self) -> &[GroupRecord] {
        &self.groups
    }
}

/// Aggregate outcome of one group of async sub-resource fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GroupRecord {
    /// Wall-clock duration of the group in milliseconds
    pub elapsed_ms: u64,
    /// Number of successful fetches
    pub ok: usize,
    /// Number of failed fetches
    pub ko: usize,
}
