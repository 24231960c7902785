//! Per-host admission scheduler for page sub-resources
//!
//! One scheduler exists per page load. It is a single-threaded cooperative
//! actor: a tokio task draining a private inbox of completion events, with
//! every state transition running to completion before the next event is
//! read. The scheduler:
//!
//! 1. Admits the merged explicit + inferred request list, deduplicated by
//!    URI.
//! 2. Replays session-cached resources locally and dispatches the rest
//!    under a per-host connection budget, buffering the overflow FIFO.
//! 3. Threads the session through every completion: dispatched
//!    sub-requests carry a snapshot, completions carry updates folded back
//!    in arrival order.
//! 4. Learns further resources from completed stylesheets and admits the
//!    ones not yet tracked, before counting the stylesheet's own
//!    completion.
//! 5. Terminates once every admitted resource has completed, sending the
//!    final session (with the aggregate ok/ko/elapsed group record) to the
//!    primary continuation.
//!
//! # Example
//!
//! ```ignore
//! use pageload_core::fetcher::{self, FetcherEnv, FetcherPlan};
//!
//! let plan = fetcher::for_fetched_page(&env, &uri, &response, &explicit, tx, session);
//! match plan {
//!     FetcherPlan::Spawn(factory) => {
//!         let handle = factory.spawn();
//!         // the HTTP collaborator feeds handle.events; `done` resolves
//!         // with the final session
//!     }
//!     FetcherPlan::Skip { tx, session } => { /* page had no resources */ }
//! }
//! ```

mod actor;
mod admission;
mod factory;
mod stats;

pub use actor::ResourceFetcher;
pub use factory::{
    for_cached_page, for_fetched_page, FetcherEnv, FetcherFactory, FetcherPlan,
    ResourceFetcherHandle,
};
pub use stats::PageStats;

#[cfg(test)]
mod tests;
