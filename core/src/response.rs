//! Primary response view and fetch outcome types

/// HTTP status code for a fresh document
pub const STATUS_OK: u16 = 200;

/// HTTP status code for an unchanged document
pub const STATUS_NOT_MODIFIED: u16 = 304;

/// Outcome of a single sub-resource fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// The fetch succeeded
    Ok,
    /// The fetch failed (connection error, bad status, failed check)
    Ko,
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStatus::Ok => write!(f, "OK"),
            FetchStatus::Ko => write!(f, "KO"),
        }
    }
}

/// The primary HTML response as seen by the resource fetcher
///
/// A connection failure surfaces as a response with no status code
/// (`is_received` is false); resource inference then never runs.
#[derive(Debug, Clone, Default)]
pub struct PrimaryResponse {
    /// HTTP status code, absent when the request never completed
    pub status_code: Option<u16>,
    /// Response headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Response body bytes
    pub body: Vec<u8>,
}

impl PrimaryResponse {
    /// Create a received response
    pub fn new(status_code: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status_code: Some(status_code),
            headers,
            body,
        }
    }

    /// Create a response representing a connection failure
    pub fn failed() -> Self {
        Self::default()
    }

    /// Whether a response actually arrived from the origin
    pub fn is_received(&self) -> bool {
        self.status_code.is_some()
    }

    /// First header value for the given name, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the Content-Type declares an HTML document
    pub fn is_html(&self) -> bool {
        fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
            value
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        }

        self.header("Content-Type")
            .map(|ct| {
                let ct = ct.trim_start();
                starts_with_ignore_case(ct, "text/html")
                    || starts_with_ignore_case(ct, "application/xhtml+xml")
            })
            .unwrap_or(false)
    }

    /// The validator by which the origin names this document version
    ///
    /// `Last-Modified` is preferred; `ETag` is the fallback.
    pub fn last_modified_or_etag(&self) -> Option<String> {
        self.header("Last-Modified")
            .or_else(|| self.header("ETag"))
            .map(str::to_string)
    }

    /// Body bytes decoded as UTF-8, lossily
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
