//! Error types for pageload-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A resource descriptor could not be turned into a request
    #[error("cannot build request for {uri}: {message}")]
    Unbuildable {
        /// URI of the offending resource
        uri: String,
        /// Why the request could not be built
        message: String,
    },

    /// An explicit request name could not be resolved against the session
    #[error("cannot resolve request name: {0}")]
    NameResolution(String),
}

impl Error {
    /// Build an [`Error::Unbuildable`] from a URI and message
    pub fn unbuildable(uri: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Error::Unbuildable {
            uri: uri.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
