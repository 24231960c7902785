//! Entry points constructing schedulers for fetched and cached pages

use crate::cache::{InferredResourcesKey, ResourceCaches};
use crate::event::ResourceFetched;
use crate::inference;
use crate::request::SubRequest;
use crate::response::PrimaryResponse;
use crate::session::Session;
use crate::traits::{CssParser, HtmlParser, HttpClient, RequestDef};
use crate::transaction::PrimaryTransaction;

use super::actor::ResourceFetcher;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

/// The collaborators a scheduler is built against
///
/// One instance per process; shared across virtual users via cheap clones.
#[derive(Clone)]
pub struct FetcherEnv {
    /// HTTP collaborator submitting sub-resource transactions
    pub http: Arc<dyn HttpClient>,
    /// HTML embedded-resource parser
    pub html_parser: Arc<dyn HtmlParser>,
    /// Stylesheet resource parser
    pub css_parser: Arc<dyn CssParser>,
    /// Process-wide inference caches
    pub caches: Arc<ResourceCaches>,
}

impl FetcherEnv {
    /// Bundle the collaborators
    pub fn new(
        http: Arc<dyn HttpClient>,
        html_parser: Arc<dyn HtmlParser>,
        css_parser: Arc<dyn CssParser>,
        caches: Arc<ResourceCaches>,
    ) -> Self {
        Self {
            http,
            html_parser,
            css_parser,
            caches,
        }
    }
}

impl std::fmt::Debug for FetcherEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherEnv").finish_non_exhaustive()
    }
}

/// Outcome of asking for a page's resource fetcher
///
/// When the page yields no sub-resources there is nothing to schedule and
/// the caller gets its transaction and session back unchanged.
#[derive(Debug)]
pub enum FetcherPlan {
    /// Sub-resources were found; spawn the factory to fetch them
    Spawn(FetcherFactory),
    /// Nothing to fetch; the page load continues directly
    Skip {
        /// The untouched primary transaction
        tx: PrimaryTransaction,
        /// The untouched session
        session: Session,
    },
}

impl FetcherPlan {
    /// The factory, if any resources were found
    pub fn into_factory(self) -> Option<FetcherFactory> {
        match self {
            FetcherPlan::Spawn(factory) => Some(factory),
            FetcherPlan::Skip { .. } => None,
        }
    }
}

/// A ready-to-spawn scheduler bound to one page load
///
/// Holds the merged request list and everything the actor needs; spawning
/// admits the initial resources and starts processing completions.
pub struct FetcherFactory {
    env: FetcherEnv,
    tx: PrimaryTransaction,
    session: Session,
    resources: Vec<SubRequest>,
}

impl FetcherFactory {
    /// The merged initial request list, explicit resources already folded in
    pub fn resources(&self) -> &[SubRequest] {
        &self.resources
    }

    /// Spawn the scheduler on the current tokio runtime
    pub fn spawn(self) -> ResourceFetcherHandle {
        let (actor, inbox) = self.build();
        let events = actor.self_tx.clone();
        let task = tokio::spawn(actor.run(inbox));
        ResourceFetcherHandle { events, task }
    }

    /// Assemble the actor and its inbox without spawning
    pub(crate) fn build(self) -> (ResourceFetcher, mpsc::UnboundedReceiver<ResourceFetched>) {
        let (events, inbox) = mpsc::unbounded_channel();
        let actor = ResourceFetcher::new(
            Arc::clone(&self.tx.config),
            Arc::clone(&self.env.caches),
            Arc::clone(&self.env.http),
            Arc::clone(&self.env.css_parser),
            self.tx.throttled,
            self.tx.next,
            self.session,
            events,
            self.resources,
        );
        (actor, inbox)
    }
}

impl std::fmt::Debug for FetcherFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherFactory")
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

/// A running scheduler
pub struct ResourceFetcherHandle {
    /// Inbox for completion events
    pub events: mpsc::UnboundedSender<ResourceFetched>,
    /// The scheduler task; finishes when the page load completes
    pub task: JoinHandle<()>,
}

impl std::fmt::Debug for ResourceFetcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFetcherHandle")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Plan resource fetching for a freshly fetched primary page
///
/// Resources are inferred only when the configuration asks for HTML
/// inference, a response actually arrived, and it declares an HTML
/// Content-Type; explicit resources are built whenever declared. Explicit
/// requests win over inferred ones sharing a URI.
pub fn for_fetched_page(
    env: &FetcherEnv,
    primary_uri: &Url,
    response: &PrimaryResponse,
    explicit: &[Arc<dyn RequestDef>],
    tx: PrimaryTransaction,
    session: Session,
) -> FetcherPlan {
    let inferred = if tx.config.infer_html_resources && response.is_received() && response.is_html()
    {
        inference::infer_page_resources(
            &tx.config,
            &env.caches,
            env.html_parser.as_ref(),
            primary_uri,
            response,
            tx.throttled,
        )
    } else {
        Vec::new()
    };

    plan(env, inferred, explicit, tx, session)
}

/// Plan resource fetching for a primary page served from the cache
///
/// With no response body available, the inferred list comes solely from
/// the shared inference cache; absence means nothing to infer.
pub fn for_cached_page(
    env: &FetcherEnv,
    document_uri: &Url,
    explicit: &[Arc<dyn RequestDef>],
    tx: PrimaryTransaction,
    session: Session,
) -> FetcherPlan {
    let key = InferredResourcesKey {
        config: tx.config.id(),
        uri: document_uri.clone(),
    };
    let inferred = env
        .caches
        .inferred
        .get(&key)
        .map(|cached| cached.requests.clone())
        .unwrap_or_default();

    plan(env, inferred, explicit, tx, session)
}

fn plan(
    env: &FetcherEnv,
    inferred: Vec<SubRequest>,
    explicit: &[Arc<dyn RequestDef>],
    tx: PrimaryTransaction,
    session: Session,
) -> FetcherPlan {
    let explicit = if explicit.is_empty() {
        Vec::new()
    } else {
        inference::build_explicit_resources(explicit, &session, env.http.as_ref())
    };

    let resources = merge_resources(inferred, explicit);
    if resources.is_empty() {
        FetcherPlan::Skip { tx, session }
    } else {
        FetcherPlan::Spawn(FetcherFactory {
            env: env.clone(),
            tx,
            session,
            resources,
        })
    }
}

/// Merge inferred and explicit requests into a URI-keyed list
///
/// Inferred order is preserved and duplicate URIs collapse to their first
/// occurrence; an explicit request replaces a colliding inferred one in
/// place, otherwise appends.
fn merge_resources(inferred: Vec<SubRequest>, explicit: Vec<SubRequest>) -> Vec<SubRequest> {
    let mut merged: Vec<SubRequest> = Vec::with_capacity(inferred.len() + explicit.len());
    let mut by_uri: HashMap<Url, usize> = HashMap::new();

    for request in inferred {
        if !by_uri.contains_key(&request.uri) {
            by_uri.insert(request.uri.clone(), merged.len());
            merged.push(request);
        }
    }
    for request in explicit {
        match by_uri.get(&request.uri) {
            Some(&slot) => merged[slot] = request,
            None => {
                by_uri.insert(request.uri.clone(), merged.len());
                merged.push(request);
            }
        }
    }

    merged
}
