//! Collaborator traits for parsers, the HTTP client, and explicit requests
//!
//! These traits are defined in core to avoid circular dependencies.
//! Production parser implementations live in the `pageload-parsers` crate;
//! the HTTP client is supplied by the embedding load-test engine.

use crate::error::Error;
use crate::request::{EmbeddedResource, SubRequest};
use crate::session::Session;
use crate::transaction::ResourceTransaction;
use url::Url;

/// Extracts embedded resources from an HTML document
///
/// A pure function of the document URI, body, and user agent: no state, no
/// side effects. Implementations resolve relative references against the
/// document URI (honoring `<base href>`) and return absolute URIs only.
pub trait HtmlParser: Send + Sync {
    /// Scan an HTML body for the sub-resources a browser would fetch
    fn embedded_resources(
        &self,
        document_uri: &Url,
        body: &str,
        user_agent: &str,
    ) -> Vec<EmbeddedResource>;
}

/// Extracts referenced resources from a stylesheet
///
/// Pure like [`HtmlParser`]: `@import` targets come back as CSS-kind
/// resources, `url(...)` references as regular ones.
pub trait CssParser: Send + Sync {
    /// Scan a stylesheet body for referenced resources
    fn extract_resources(&self, document_uri: &Url, text: &str) -> Vec<EmbeddedResource>;
}

/// The HTTP collaborator submitting sub-resource transactions
///
/// `start_transaction` is fire-and-forget: the collaborator owns request
/// submission, TLS, redirects, and timeouts, and eventually delivers a
/// completion event through the transaction's inbox sender. A timeout or
/// connection failure surfaces as a KO completion, never as an error here.
pub trait HttpClient: Send + Sync {
    /// Submit a sub-resource transaction
    fn start_transaction(&self, tx: ResourceTransaction);

    /// Report an explicit resource whose request could not be built
    fn report_unbuildable(&self, name: &str, session: &Session, message: &str);
}

/// An explicitly declared sub-resource request template
///
/// Explicit resources are declared by the test alongside the primary
/// request; both their names and their targets may resolve against session
/// attributes. They take precedence over inferred resources on URI
/// collision.
pub trait RequestDef: Send + Sync {
    /// Resolve the request name against the session
    fn request_name(&self, session: &Session) -> Result<String, Error>;

    /// Build the request for the resolved name and session
    fn build(&self, name: &str, session: &Session) -> Result<SubRequest, Error>;
}
