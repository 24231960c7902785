//! Completion events delivered to the scheduler inbox

use crate::response::FetchStatus;
use crate::session::{identity_update, SessionUpdate};
use url::Url;

/// A completed sub-resource fetch
///
/// Produced by the HTTP collaborator when a dispatched transaction
/// finishes, and synthesized locally for cached-hit replays. Stylesheet
/// completions carry the material needed to discover further resources.
pub enum ResourceFetched {
    /// A terminal resource completed
    Regular {
        /// URI of the completed resource
        uri: Url,
        /// Fetch outcome
        status: FetchStatus,
        /// Session mutation observed during the fetch
        session_updates: SessionUpdate,
    },
    /// A stylesheet completed
    Css {
        /// URI of the completed stylesheet
        uri: Url,
        /// Fetch outcome
        status: FetchStatus,
        /// Session mutation observed during the fetch
        session_updates: SessionUpdate,
        /// HTTP status code, absent on cached replays
        status_code: Option<u16>,
        /// Document validator, absent on cached replays
        validator: Option<String>,
        /// Stylesheet text, empty on cached replays
        body: String,
    },
}

impl ResourceFetched {
    /// URI of the completed resource
    pub fn uri(&self) -> &Url {
        match self {
            ResourceFetched::Regular { uri, .. } | ResourceFetched::Css { uri, .. } => uri,
        }
    }

    /// Fetch outcome
    pub fn status(&self) -> FetchStatus {
        match self {
            ResourceFetched::Regular { status, .. } | ResourceFetched::Css { status, .. } => *status,
        }
    }

    /// Synthesize the replay event for a cached terminal resource
    pub fn cached_regular(uri: Url) -> Self {
        ResourceFetched::Regular {
            uri,
            status: FetchStatus::Ok,
            session_updates: identity_update(),
        }
    }

    /// Synthesize the replay event for a cached stylesheet
    ///
    /// Carries no status code, no validator, and an empty body, so the CSS
    /// discovery path falls through and the hit is a terminal completion.
    pub fn cached_css(uri: Url) -> Self {
        ResourceFetched::Css {
            uri,
            status: FetchStatus::Ok,
            session_updates: identity_update(),
            status_code: None,
            validator: None,
            body: String::new(),
        }
    }
}

impl std::fmt::Debug for ResourceFetched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceFetched::Regular { uri, status, .. } => f
                .debug_struct("Regular")
                .field("uri", &uri.as_str())
                .field("status", status)
                .finish_non_exhaustive(),
            ResourceFetched::Css {
                uri,
                status,
                status_code,
                validator,
                ..
            } => f
                .debug_struct("Css")
                .field("uri", &uri.as_str())
                .field("status", status)
                .field("status_code", status_code)
                .field("validator", validator)
                .finish_non_exhaustive(),
        }
    }
}
