//! Fetch configuration types

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a [`FetchConfig`]
///
/// Two virtual users running under the same configuration share an id, so
/// inference results cached under `(id, document URI)` are reused across
/// them. Deserialized configs are distinct instances and get a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigId(u64);

static NEXT_CONFIG_ID: AtomicU64 = AtomicU64::new(0);

impl ConfigId {
    fn next() -> Self {
        ConfigId(NEXT_CONFIG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConfigId {
    fn default() -> Self {
        Self::next()
    }
}

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fetch configuration
///
/// Defines how embedded page resources are discovered and retrieved for one
/// protocol configuration: whether HTML bodies are scanned at all, the
/// per-host connection budget, inference cache capacities, and optional
/// allow/deny filtering of discovered URIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User-Agent string forwarded to the HTML parser
    pub user_agent: String,

    /// Whether HTML responses are scanned for embedded resources
    pub infer_html_resources: bool,

    /// Maximum concurrent fetches per origin host
    pub max_connections_per_host: usize,

    /// Capacity of the shared parsed-stylesheet cache
    pub css_cache_capacity: usize,

    /// Capacity of the shared inferred-page-resources cache
    pub html_cache_capacity: usize,

    /// Optional allow/deny filtering of inferred resource URIs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<ResourceFilters>,

    /// Process-unique config identity (not serialized)
    #[serde(skip, default)]
    id: ConfigId,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("pageload/", env!("CARGO_PKG_VERSION")).to_string(),
            infer_html_resources: true,
            max_connections_per_host: 6,
            css_cache_capacity: 200,
            html_cache_capacity: 200,
            filters: None,
            id: ConfigId::next(),
        }
    }
}

impl FetchConfig {
    /// Create a new config with the given user agent
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..Default::default()
        }
    }

    /// Enable or disable HTML resource inference
    pub fn with_infer_html_resources(mut self, infer: bool) -> Self {
        self.infer_html_resources = infer;
        self
    }

    /// Set the per-host connection budget
    pub fn with_max_connections_per_host(mut self, max: usize) -> Self {
        self.max_connections_per_host = max;
        self
    }

    /// Set the inference cache capacities
    pub fn with_cache_capacities(mut self, css: usize, html: usize) -> Self {
        self.css_cache_capacity = css;
        self.html_cache_capacity = html;
        self
    }

    /// Set the resource filters
    pub fn with_filters(mut self, filters: ResourceFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Get the process-unique config identity
    pub fn id(&self) -> ConfigId {
        self.id
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections_per_host == 0 {
            return Err(ConfigError::InvalidConnectionLimit(
                "max_connections_per_host must be at least 1".into(),
            ));
        }

        if self.css_cache_capacity == 0 || self.html_cache_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity(
                "cache capacities must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Allow/deny filtering of inferred resource URIs
///
/// A URI is accepted when it matches the allow list (an empty allow list
/// accepts everything) and matches none of the deny patterns. Patterns are
/// regular expressions matched against the full URI string and compiled
/// once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "FilterPatterns", into = "FilterPatterns")]
pub struct ResourceFilters {
    allow: Vec<String>,
    deny: Vec<String>,
    allow_set: RegexSet,
    deny_set: RegexSet,
}

impl ResourceFilters {
    /// Compile allow and deny pattern lists
    ///
    /// # Errors
    /// Returns an error if any pattern is not a valid regular expression.
    pub fn new<A, D>(allow: A, deny: D) -> Result<Self, ConfigError>
    where
        A: IntoIterator,
        A::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let allow: Vec<String> = allow.into_iter().map(Into::into).collect();
        let deny: Vec<String> = deny.into_iter().map(Into::into).collect();
        let allow_set = RegexSet::new(&allow)?;
        let deny_set = RegexSet::new(&deny)?;

        Ok(Self {
            allow,
            deny,
            allow_set,
            deny_set,
        })
    }

    /// Check whether a URI passes the filters
    pub fn accept(&self, uri: &str) -> bool {
        (self.allow.is_empty() || self.allow_set.is_match(uri)) && !self.deny_set.is_match(uri)
    }

    /// The raw allow patterns
    pub fn allow_patterns(&self) -> &[String] {
        &self.allow
    }

    /// The raw deny patterns
    pub fn deny_patterns(&self) -> &[String] {
        &self.deny
    }
}

/// Serde mirror of [`ResourceFilters`]: the raw pattern lists
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FilterPatterns {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
}

impl TryFrom<FilterPatterns> for ResourceFilters {
    type Error = ConfigError;

    fn try_from(patterns: FilterPatterns) -> Result<Self, Self::Error> {
        ResourceFilters::new(patterns.allow, patterns.deny)
    }
}

impl From<ResourceFilters> for FilterPatterns {
    fn from(filters: ResourceFilters) -> Self {
        FilterPatterns {
            allow: filters.allow,
            deny: filters.deny,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid per-host connection budget
    #[error("invalid connection limit: {0}")]
    InvalidConnectionLimit(String),

    /// Invalid cache capacity
    #[error("invalid cache capacity: {0}")]
    InvalidCacheCapacity(String),

    /// A filter pattern failed to compile
    #[error("invalid filter pattern: {0}")]
    InvalidFilter(#[from] regex::Error),
}
