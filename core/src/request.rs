//! Request descriptors for embedded page resources

use crate::config::FetchConfig;
use crate::error::Error;
use std::sync::Arc;
use url::Url;

/// What kind of sub-resource an embedded reference points at
///
/// Stylesheets get their own kind because their bodies are parsed for
/// further resources once fetched; everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Terminal resource (image, script, font, ...)
    Regular,
    /// Stylesheet whose body yields further resources
    Css,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Regular => write!(f, "regular"),
            ResourceKind::Css => write!(f, "css"),
        }
    }
}

/// A sub-resource reference inferred from a document
///
/// Produced by the HTML and CSS parsers; immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedResource {
    /// Absolute URI of the referenced resource
    pub uri: Url,
    /// Kind of the reference
    pub kind: ResourceKind,
}

impl EmbeddedResource {
    /// Create a regular (terminal) resource reference
    pub fn regular(uri: Url) -> Self {
        Self {
            uri,
            kind: ResourceKind::Regular,
        }
    }

    /// Create a stylesheet resource reference
    pub fn css(uri: Url) -> Self {
        Self {
            uri,
            kind: ResourceKind::Css,
        }
    }

    /// Build a ready-to-submit request from this reference
    ///
    /// # Errors
    /// Fails when the URI carries no host to account the fetch against
    /// (e.g. `data:` or `file:` references).
    pub fn to_request(&self, config: Arc<FetchConfig>, throttled: bool) -> Result<SubRequest, Error> {
        SubRequest::new(self.uri.as_str(), self.uri.clone(), self.kind, config, throttled)
    }
}

/// A built, ready-to-submit sub-resource request
///
/// Carries its target URI, the host its fetch is accounted against, and a
/// handle to the enclosing fetch configuration. Immutable.
#[derive(Debug, Clone)]
pub struct SubRequest {
    /// Request name used in reports (defaults to the URI string)
    pub name: String,
    /// Absolute target URI
    pub uri: Url,
    /// Host the fetch is accounted against
    pub host: String,
    /// Kind of the underlying resource
    pub kind: ResourceKind,
    /// Enclosing fetch configuration
    pub config: Arc<FetchConfig>,
    /// Whether the fetch participates in throughput throttling
    pub throttled: bool,
}

impl SubRequest {
    /// Create a request for the given name and URI
    ///
    /// # Errors
    /// Fails when the URI carries no host.
    pub fn new(
        name: impl Into<String>,
        uri: Url,
        kind: ResourceKind,
        config: Arc<FetchConfig>,
        throttled: bool,
    ) -> Result<Self, Error> {
        let host = uri
            .host_str()
            .ok_or_else(|| Error::unbuildable(&uri, "URI has no host"))?
            .to_string();

        Ok(Self {
            name: name.into(),
            uri,
            host,
            kind,
            config,
            throttled,
        })
    }
}
