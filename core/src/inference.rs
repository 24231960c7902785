//! Resource inference from primary pages and stylesheets
//!
//! Given a response, decides whether to parse the body, reuse a cached
//! inference, or return nothing, driven by the status code and the
//! document validator:
//!
//! - **200 with validator**: reuse the cached request list when the stored
//!   validator matches, otherwise parse, filter, build, and cache.
//! - **200 without validator**: parse, filter, build; nothing is cached.
//! - **304**: the origin claims freshness; return the cached list, or warn
//!   and return nothing when there is no record to be fresh against.
//! - anything else: nothing.
//!
//! The same protocol governs HTML pages and stylesheets learned mid-run;
//! stylesheets additionally share their parsed form through the
//! process-wide stylesheet cache.

use crate::cache::{InferredPageResources, InferredResourcesKey, ResourceCaches};
use crate::config::{FetchConfig, ResourceFilters};
use crate::request::{EmbeddedResource, SubRequest};
use crate::response::{PrimaryResponse, STATUS_NOT_MODIFIED, STATUS_OK};
use crate::session::Session;
use crate::traits::{CssParser, HtmlParser, HttpClient, RequestDef};
use std::sync::Arc;
use url::Url;

/// Restrict inferred resources through the configured allow/deny filters
pub fn apply_filters(
    resources: Vec<EmbeddedResource>,
    filters: Option<&ResourceFilters>,
) -> Vec<EmbeddedResource> {
    match filters {
        Some(filters) => resources
            .into_iter()
            .filter(|resource| filters.accept(resource.uri.as_str()))
            .collect(),
        None => resources,
    }
}

/// Convert embedded resources into ready-to-submit requests
///
/// Unbuildable descriptors are logged and dropped; they shouldn't happen,
/// embedded resources carry only static values.
pub fn build_requests(
    resources: Vec<EmbeddedResource>,
    config: &Arc<FetchConfig>,
    throttled: bool,
) -> Vec<SubRequest> {
    resources
        .into_iter()
        .filter_map(|resource| match resource.to_request(Arc::clone(config), throttled) {
            Ok(request) => Some(request),
            Err(error) => {
                tracing::error!(uri = %resource.uri, error = %error, "Could not build embedded resource request");
                None
            }
        })
        .collect()
}

/// Infer the sub-resource requests of a fetched HTML page
pub fn infer_page_resources(
    config: &Arc<FetchConfig>,
    caches: &ResourceCaches,
    parser: &dyn HtmlParser,
    document_uri: &Url,
    response: &PrimaryResponse,
    throttled: bool,
) -> Vec<SubRequest> {
    match response.status_code {
        Some(STATUS_OK) => match response.last_modified_or_etag() {
            Some(validator) => {
                let key = inference_key(config, document_uri);
                if let Some(cached) = caches.inferred.get(&key) {
                    if cached.validator == validator {
                        return cached.requests.clone();
                    }
                }

                let resources = parser.embedded_resources(
                    document_uri,
                    &response.body_text(),
                    &config.user_agent,
                );
                let requests =
                    build_requests(apply_filters(resources, config.filters.as_ref()), config, throttled);
                caches.inferred.put(
                    key,
                    Arc::new(InferredPageResources {
                        validator,
                        requests: requests.clone(),
                    }),
                );
                requests
            }
            None => {
                let resources = parser.embedded_resources(
                    document_uri,
                    &response.body_text(),
                    &config.user_agent,
                );
                build_requests(apply_filters(resources, config.filters.as_ref()), config, throttled)
            }
        },
        Some(STATUS_NOT_MODIFIED) => cached_or_warn(config, caches, document_uri),
        _ => Vec::new(),
    }
}

/// Infer the sub-resource requests referenced by a fetched stylesheet
///
/// Same status/validator protocol as HTML pages, with one addition: the
/// parsed form of the stylesheet is shared through the process-wide
/// stylesheet cache, and a validator change evicts the stale parse before
/// re-parsing.
#[allow(clippy::too_many_arguments)]
pub fn infer_css_resources(
    config: &Arc<FetchConfig>,
    caches: &ResourceCaches,
    parser: &dyn CssParser,
    css_uri: &Url,
    status_code: Option<u16>,
    validator: Option<String>,
    body: &str,
    throttled: bool,
) -> Vec<SubRequest> {
    match status_code {
        Some(STATUS_OK) => match validator {
            Some(validator) => {
                let key = inference_key(config, css_uri);
                if let Some(cached) = caches.inferred.get(&key) {
                    if cached.validator == validator {
                        return cached.requests.clone();
                    }
                }

                // The stored parse belongs to a previous document version.
                caches.css.remove(css_uri);
                let requests = build_css_requests(config, caches, parser, css_uri, body, throttled);
                caches.inferred.put(
                    key,
                    Arc::new(InferredPageResources {
                        validator,
                        requests: requests.clone(),
                    }),
                );
                requests
            }
            None => build_css_requests(config, caches, parser, css_uri, body, throttled),
        },
        Some(STATUS_NOT_MODIFIED) => cached_or_warn(config, caches, css_uri),
        _ => Vec::new(),
    }
}

/// Build the explicitly declared sub-resource requests
///
/// Name-resolution failures are logged and dropped; build failures go
/// through the collaborator's unbuildable-request channel.
pub fn build_explicit_resources(
    defs: &[Arc<dyn RequestDef>],
    session: &Session,
    http: &dyn HttpClient,
) -> Vec<SubRequest> {
    defs.iter()
        .filter_map(|def| {
            let name = match def.request_name(session) {
                Ok(name) => name,
                Err(error) => {
                    tracing::error!(error = %error, "Could not resolve explicit resource name");
                    return None;
                }
            };
            match def.build(&name, session) {
                Ok(request) => Some(request),
                Err(error) => {
                    http.report_unbuildable(&name, session, &error.to_string());
                    None
                }
            }
        })
        .collect()
}

fn inference_key(config: &Arc<FetchConfig>, document_uri: &Url) -> InferredResourcesKey {
    InferredResourcesKey {
        config: config.id(),
        uri: document_uri.clone(),
    }
}

fn cached_or_warn(
    config: &Arc<FetchConfig>,
    caches: &ResourceCaches,
    document_uri: &Url,
) -> Vec<SubRequest> {
    match caches.inferred.get(&inference_key(config, document_uri)) {
        Some(cached) => cached.requests.clone(),
        None => {
            tracing::warn!(uri = %document_uri, "Got a 304 but could not find a cache entry?!");
            Vec::new()
        }
    }
}

fn build_css_requests(
    config: &Arc<FetchConfig>,
    caches: &ResourceCaches,
    parser: &dyn CssParser,
    css_uri: &Url,
    body: &str,
    throttled: bool,
) -> Vec<SubRequest> {
    let resources = caches
        .css
        .get_or_insert_with(css_uri.clone(), || Arc::new(parser.extract_resources(css_uri, body)));
    build_requests(
        apply_filters((*resources).clone(), config.filters.as_ref()),
        config,
        throttled,
    )
}
