//! The page-resource scheduler state machine

use crate::cache::ResourceCaches;
use crate::config::FetchConfig;
use crate::event::ResourceFetched;
use crate::inference;
use crate::request::SubRequest;
use crate::response::FetchStatus;
use crate::session::{Session, SessionUpdate};
use crate::traits::{CssParser, HttpClient};
use crate::transaction::ResourceTransaction;

use super::admission::HostTokenPool;
use super::stats::PageStats;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use url::Url;

/// The per-page-load scheduler
///
/// Owns every piece of mutable fetch state for one page load: the current
/// session, the set of admitted URIs, per-host tokens and backlogs, and
/// the completion counters. All transitions run on one task, serialized by
/// the inbox; handlers never yield internally.
///
/// Lifecycle: created with the merged initial request list, drives fetches
/// and cached replays until every admitted resource has completed, then
/// sends the final session through the primary continuation exactly once
/// and stops.
pub struct ResourceFetcher {
    pub(crate) config: Arc<FetchConfig>,
    pub(crate) caches: Arc<ResourceCaches>,
    pub(crate) http: Arc<dyn HttpClient>,
    pub(crate) css_parser: Arc<dyn CssParser>,
    pub(crate) throttled: bool,

    pub(crate) session: Session,
    pub(crate) next: Option<oneshot::Sender<Session>>,
    pub(crate) self_tx: mpsc::UnboundedSender<ResourceFetched>,

    pub(crate) initial: Vec<SubRequest>,
    pub(crate) already_seen: HashSet<Url>,
    pub(crate) pool: HostTokenPool,
    pub(crate) pending_resources: usize,
    pub(crate) stats: PageStats,
    pub(crate) done: bool,
}

impl ResourceFetcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<FetchConfig>,
        caches: Arc<ResourceCaches>,
        http: Arc<dyn HttpClient>,
        css_parser: Arc<dyn CssParser>,
        throttled: bool,
        next: oneshot::Sender<Session>,
        session: Session,
        self_tx: mpsc::UnboundedSender<ResourceFetched>,
        initial: Vec<SubRequest>,
    ) -> Self {
        let max_connections = config.max_connections_per_host;
        Self {
            config,
            caches,
            http,
            css_parser,
            throttled,
            session,
            next: Some(next),
            self_tx,
            initial,
            already_seen: HashSet::new(),
            pool: HostTokenPool::new(max_connections),
            pending_resources: 0,
            stats: PageStats::new(),
            done: false,
        }
    }

    /// Drive the page load to completion
    ///
    /// Admits the initial request list, then processes completion events
    /// in arrival order until every admitted resource has completed.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ResourceFetched>) {
        let initial = std::mem::take(&mut self.initial);
        self.fetch_or_buffer_resources(initial);

        while !self.done {
            match inbox.recv().await {
                Some(event) => self.handle(event),
                None => break,
            }
        }
    }

    /// Process one completion event to completion, no internal yield
    pub(crate) fn handle(&mut self, event: ResourceFetched) {
        if self.done {
            tracing::debug!(uri = %event.uri(), "Ignoring completion after page load finished");
            return;
        }

        match event {
            ResourceFetched::Regular {
                uri,
                status,
                session_updates,
            } => self.resource_fetched(uri, status, session_updates),
            ResourceFetched::Css {
                uri,
                status,
                session_updates,
                status_code,
                validator,
                body,
            } => {
                // Discover before counting the completion: newly found
                // sub-resources must enter the pending count before this
                // stylesheet's own completion decrements it, or the page
                // load would terminate while the CSS graph is still
                // expanding.
                self.css_fetched(&uri, status, status_code, validator, &body);
                self.resource_fetched(uri, status, session_updates);
            }
        }
    }

    /// Admit resources: replay the ones cached in the session, dispatch
    /// the rest up to each host's token budget, buffer the overflow
    pub(crate) fn fetch_or_buffer_resources(&mut self, resources: Vec<SubRequest>) {
        if resources.is_empty() {
            return;
        }

        for request in &resources {
            self.already_seen.insert(request.uri.clone());
        }
        self.pending_resources += resources.len();

        // Partition on the session's expiry store. Clearing an expired
        // entry is a session mutation, so this runs as an in-order fold.
        let now = Utc::now();
        let mut cached = Vec::new();
        let mut non_cached = Vec::new();
        for request in resources {
            match self.session.resource_expiry(&request.uri) {
                None => non_cached.push(request),
                Some(expiry) if expiry <= now => {
                    self.session =
                        std::mem::take(&mut self.session).clear_resource_expiry(&request.uri);
                    non_cached.push(request);
                }
                Some(_) => cached.push(request),
            }
        }

        for request in &cached {
            self.replay_cached(request);
        }

        let mut by_host: HashMap<String, Vec<SubRequest>> = HashMap::new();
        for request in non_cached {
            by_host.entry(request.host.clone()).or_default().push(request);
        }

        for (host, requests) in by_host {
            let immediate = requests.len().min(self.pool.available(&host));
            let mut requests = requests.into_iter();
            for request in requests.by_ref().take(immediate) {
                self.dispatch(request);
            }
            self.pool.consume(&host, immediate);
            for request in requests {
                tracing::debug!(uri = %request.uri, host = %host, "No connection available, buffering resource");
                self.pool.buffer(request);
            }
        }
    }

    /// Hand one request to the HTTP collaborator
    ///
    /// The derived transaction snapshots the current session, is never
    /// primary, and names this scheduler's inbox as its continuation.
    /// Token accounting stays with the caller.
    fn dispatch(&mut self, request: SubRequest) {
        tracing::debug!(uri = %request.uri, host = %request.host, kind = %request.kind, "Fetching resource");
        let tx = ResourceTransaction {
            session: self.session.clone(),
            request,
            primary: false,
            events: self.self_tx.clone(),
        };
        self.http.start_transaction(tx);
    }

    /// Synthesize the completion of a resource whose expiry is still ahead
    ///
    /// The stylesheet cache is still consulted so CSS-discovered resources
    /// cached in earlier runs keep propagating; the replayed event carries
    /// no status code, so discovery short-circuits and the hit completes
    /// terminally.
    fn replay_cached(&mut self, request: &SubRequest) {
        tracing::debug!(uri = %request.uri, "Resource served from cache");
        let event = if self.caches.css.contains(&request.uri) {
            ResourceFetched::cached_css(request.uri.clone())
        } else {
            ResourceFetched::cached_regular(request.uri.clone())
        };
        let _ = self.self_tx.send(event);
    }

    /// Account one completion; terminate at zero pending, otherwise
    /// release the completed host's token
    fn resource_fetched(&mut self, uri: Url, status: FetchStatus, session_updates: SessionUpdate) {
        self.session = session_updates(std::mem::take(&mut self.session));
        self.pending_resources -= 1;
        match status {
            FetchStatus::Ok => self.stats.record_ok(),
            FetchStatus::Ko => self.stats.record_ko(),
        }
        tracing::debug!(
            uri = %uri,
            status = %status,
            pending = self.pending_resources,
            "Resource fetched"
        );

        if self.pending_resources == 0 {
            self.terminate();
        } else if let Some(host) = uri.host_str() {
            let host = host.to_string();
            self.release_token(&host);
        }
    }

    /// Hand the freed token to the host's backlog
    ///
    /// At most one new network fetch per release: a buffered request whose
    /// expiry is still ahead replays locally and the drain continues, so a
    /// single release may clear arbitrarily many cached entries while the
    /// per-host bound stays intact.
    fn release_token(&mut self, host: &str) {
        loop {
            match self.pool.pop_buffered(host) {
                None => {
                    self.pool.release(host);
                    return;
                }
                Some(request) => match self.session.resource_expiry(&request.uri) {
                    None => {
                        self.dispatch(request);
                        return;
                    }
                    Some(expiry) if expiry <= Utc::now() => {
                        self.session =
                            std::mem::take(&mut self.session).clear_resource_expiry(&request.uri);
                        self.dispatch(request);
                        return;
                    }
                    Some(_) => {
                        self.replay_cached(&request);
                    }
                },
            }
        }
    }

    /// Learn sub-resources from a completed stylesheet and admit the ones
    /// not already tracked for this page load
    fn css_fetched(
        &mut self,
        uri: &Url,
        status: FetchStatus,
        status_code: Option<u16>,
        validator: Option<String>,
        body: &str,
    ) {
        if status != FetchStatus::Ok {
            return;
        }

        let requests = inference::infer_css_resources(
            &self.config,
            &self.caches,
            self.css_parser.as_ref(),
            uri,
            status_code,
            validator,
            body,
            self.throttled,
        );
        let fresh: Vec<SubRequest> = requests
            .into_iter()
            .filter(|request| !self.already_seen.contains(&request.uri))
            .collect();

        if !fresh.is_empty() {
            tracing::debug!(css = %uri, count = fresh.len(), "Stylesheet references new resources");
            self.fetch_or_buffer_resources(fresh);
        }
    }

    /// Send the final session through the primary continuation and stop
    fn terminate(&mut self) {
        let elapsed_ms = self.stats.elapsed_ms();
        tracing::debug!(
            ok = self.stats.ok,
            ko = self.stats.ko,
            elapsed_ms,
            "All page resources fetched"
        );

        let session = std::mem::take(&mut self.session).log_group_async_requests(
            elapsed_ms,
            self.stats.ok,
            self.stats.ko,
        );
        if let Some(next) = self.next.take() {
            if next.send(session).is_err() {
                tracing::debug!("Page-load caller went away before resources completed");
            }
        }
        self.done = true;
    }
}

impl std::fmt::Debug for ResourceFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFetcher")
            .field("config", &self.config.id())
            .field("pending_resources", &self.pending_resources)
            .field("already_seen", &self.already_seen.len())
            .field("ok", &self.stats.ok)
            .field("ko", &self.stats.ko)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
