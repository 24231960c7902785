//! Transaction contexts threaded between the scheduler and the HTTP collaborator

use crate::config::FetchConfig;
use crate::event::ResourceFetched;
use crate::request::SubRequest;
use crate::session::Session;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Ambient context of the page load that triggered resource fetching
///
/// Owned by the scheduler for the lifetime of one page load. The `next`
/// continuation receives the final session exactly once, when every
/// admitted sub-resource has completed.
pub struct PrimaryTransaction {
    /// Fetch configuration of the enclosing request
    pub config: Arc<FetchConfig>,
    /// Whether sub-resource fetches participate in throughput throttling
    pub throttled: bool,
    /// Continuation notified with the final session
    pub next: oneshot::Sender<Session>,
}

impl PrimaryTransaction {
    /// Create a primary transaction and the receiving half of its continuation
    pub fn new(config: Arc<FetchConfig>, throttled: bool) -> (Self, oneshot::Receiver<Session>) {
        let (next, done) = oneshot::channel();
        (
            Self {
                config,
                throttled,
                next,
            },
            done,
        )
    }
}

impl std::fmt::Debug for PrimaryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryTransaction")
            .field("config", &self.config.id())
            .field("throttled", &self.throttled)
            .finish_non_exhaustive()
    }
}

/// The transaction handed to the HTTP collaborator for one sub-resource
///
/// Derived from the primary transaction at dispatch time: it carries a
/// snapshot of the scheduler's session, is never marked primary, and its
/// continuation is the scheduler inbox.
pub struct ResourceTransaction {
    /// The request to submit
    pub request: SubRequest,
    /// Session snapshot as of dispatch time
    pub session: Session,
    /// Always false for sub-resources
    pub primary: bool,
    /// Scheduler inbox expecting the completion event
    pub events: mpsc::UnboundedSender<ResourceFetched>,
}

impl ResourceTransaction {
    /// Deliver a completion event back to the scheduler
    ///
    /// Returns false when the scheduler is gone (page load already over).
    pub fn complete(&self, event: ResourceFetched) -> bool {
        self.events.send(event).is_ok()
    }
}

impl std::fmt::Debug for ResourceTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTransaction")
            .field("uri", &self.request.uri.as_str())
            .field("kind", &self.request.kind)
            .field("primary", &self.primary)
            .finish_non_exhaustive()
    }
}
