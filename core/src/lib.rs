//! Core types, resource inference, and scheduling for pageload
//!
//! This crate implements the page-resource fetcher of a load-testing HTTP
//! engine: given the primary HTML response of a virtual user's page load,
//! it discovers the sub-resources a browser would fetch (images, scripts,
//! stylesheets, and resources referenced inside stylesheets), retrieves
//! them concurrently under a per-host connection budget, accounts the
//! outcomes into the user's session, and hands control back when every
//! sub-resource has completed. It provides:
//!
//! - Request/response/session data structures and completion events
//! - Status- and validator-driven resource inference with process-wide
//!   bounded caches
//! - The per-page-load admission scheduler
//! - Collaborator traits for the HTML/CSS parsers and the HTTP client
//!   (implementations live in their respective crates)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod inference;
pub mod request;
pub mod response;
pub mod session;
pub mod traits;
pub mod transaction;

/// Commonly used types
pub mod prelude {
    pub use crate::cache::ResourceCaches;
    pub use crate::config::{FetchConfig, ResourceFilters};
    pub use crate::error::{Error, Result};
    pub use crate::event::ResourceFetched;
    pub use crate::fetcher::{for_cached_page, for_fetched_page, FetcherEnv, FetcherPlan};
    pub use crate::request::{EmbeddedResource, ResourceKind, SubRequest};
    pub use crate::response::{FetchStatus, PrimaryResponse};
    pub use crate::session::Session;
    pub use crate::traits::{CssParser, HtmlParser, HttpClient, RequestDef};
    pub use crate::transaction::{PrimaryTransaction, ResourceTransaction};
}
