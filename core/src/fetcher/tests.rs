//! Integration tests for the scheduler module

use super::*;
use crate::cache::ResourceCaches;
use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::event::ResourceFetched;
use crate::request::{EmbeddedResource, ResourceKind, SubRequest};
use crate::response::{FetchStatus, PrimaryResponse};
use crate::session::{Session, SessionUpdate};
use crate::traits::{CssParser, HtmlParser, HttpClient, RequestDef};
use crate::transaction::{PrimaryTransaction, ResourceTransaction};

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

// ============================================================================
// Mock collaborators
// ============================================================================

/// Records started transactions for the test to complete by hand
struct RecordingHttp {
    transactions: Mutex<Vec<ResourceTransaction>>,
    unbuildable: Mutex<Vec<String>>,
}

impl RecordingHttp {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            transactions: Mutex::new(Vec::new()),
            unbuildable: Mutex::new(Vec::new()),
        })
    }

    fn take_transactions(&self) -> Vec<ResourceTransaction> {
        std::mem::take(&mut self.transactions.lock())
    }

    fn started_uris(&self) -> Vec<String> {
        self.transactions
            .lock()
            .iter()
            .map(|tx| tx.request.uri.to_string())
            .collect()
    }

    fn started_count(&self) -> usize {
        self.transactions.lock().len()
    }
}

impl HttpClient for RecordingHttp {
    fn start_transaction(&self, tx: ResourceTransaction) {
        self.transactions.lock().push(tx);
    }

    fn report_unbuildable(&self, name: &str, _session: &Session, _message: &str) {
        self.unbuildable.lock().push(name.to_string());
    }
}

/// Completes every transaction inline: regular resources succeed, CSS
/// resources come back as 200 with a fixed validator and body
struct EchoHttp {
    started: Mutex<Vec<String>>,
}

impl EchoHttp {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
        })
    }
}

impl HttpClient for EchoHttp {
    fn start_transaction(&self, tx: ResourceTransaction) {
        self.started.lock().push(tx.request.uri.to_string());
        let event = match tx.request.kind {
            ResourceKind::Regular => ResourceFetched::Regular {
                uri: tx.request.uri.clone(),
                status: FetchStatus::Ok,
                session_updates: crate::session::identity_update(),
            },
            ResourceKind::Css => ResourceFetched::Css {
                uri: tx.request.uri.clone(),
                status: FetchStatus::Ok,
                session_updates: crate::session::identity_update(),
                status_code: Some(200),
                validator: Some("W/\"css\"".to_string()),
                body: "body { background: url(ignored.png) }".to_string(),
            },
        };
        tx.complete(event);
    }

    fn report_unbuildable(&self, _name: &str, _session: &Session, _message: &str) {}
}

struct StaticHtmlParser {
    resources: Vec<EmbeddedResource>,
    calls: AtomicUsize,
}

impl StaticHtmlParser {
    fn returning(resources: Vec<EmbeddedResource>) -> Arc<Self> {
        Arc::new(Self {
            resources,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HtmlParser for StaticHtmlParser {
    fn embedded_resources(&self, _: &Url, _: &str, _: &str) -> Vec<EmbeddedResource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.resources.clone()
    }
}

struct StaticCssParser {
    resources: Vec<EmbeddedResource>,
}

impl StaticCssParser {
    fn returning(resources: Vec<EmbeddedResource>) -> Arc<Self> {
        Arc::new(Self { resources })
    }

    fn empty() -> Arc<Self> {
        Self::returning(Vec::new())
    }
}

impl CssParser for StaticCssParser {
    fn extract_resources(&self, _: &Url, _: &str) -> Vec<EmbeddedResource> {
        self.resources.clone()
    }
}

/// Explicit resource declared by the test, named independently of its URI
struct StaticDef {
    name: String,
    target: Url,
    config: Arc<FetchConfig>,
}

impl StaticDef {
    fn new(name: &str, target: &str, config: &Arc<FetchConfig>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            target: Url::parse(target).unwrap(),
            config: Arc::clone(config),
        })
    }
}

impl RequestDef for StaticDef {
    fn request_name(&self, _session: &Session) -> Result<String> {
        Ok(self.name.clone())
    }

    fn build(&self, name: &str, _session: &Session) -> Result<SubRequest> {
        SubRequest::new(
            name,
            self.target.clone(),
            ResourceKind::Regular,
            Arc::clone(&self.config),
            false,
        )
    }
}

/// Explicit resource that never builds
struct BrokenDef {
    name: String,
}

impl RequestDef for BrokenDef {
    fn request_name(&self, _session: &Session) -> Result<String> {
        Ok(self.name.clone())
    }

    fn build(&self, name: &str, _session: &Session) -> Result<SubRequest> {
        Err(Error::unbuildable(name, "template resolves to nothing"))
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn uri(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn regular(s: &str) -> EmbeddedResource {
    EmbeddedResource::regular(uri(s))
}

fn css(s: &str) -> EmbeddedResource {
    EmbeddedResource::css(uri(s))
}

fn html_response(body_refs: &str) -> PrimaryResponse {
    PrimaryResponse::new(
        200,
        vec![("Content-Type".to_string(), "text/html".to_string())],
        body_refs.as_bytes().to_vec(),
    )
}

fn env_of(
    http: Arc<dyn HttpClient>,
    html_parser: Arc<dyn HtmlParser>,
    css_parser: Arc<dyn CssParser>,
    config: &FetchConfig,
) -> FetcherEnv {
    FetcherEnv::new(
        http,
        html_parser,
        css_parser,
        Arc::new(ResourceCaches::new(config)),
    )
}

/// Build the actor from a plan and admit its initial resources, pumping
/// locally synthesized replay events
fn start(
    plan: FetcherPlan,
) -> (ResourceFetcher, mpsc::UnboundedReceiver<ResourceFetched>) {
    let factory = plan.into_factory().expect("expected resources to fetch");
    let (mut actor, mut inbox) = factory.build();
    let initial = std::mem::take(&mut actor.initial);
    actor.fetch_or_buffer_resources(initial);
    pump(&mut actor, &mut inbox);
    (actor, inbox)
}

/// Deliver locally queued events (cached replays) until the inbox is dry
fn pump(actor: &mut ResourceFetcher, inbox: &mut mpsc::UnboundedReceiver<ResourceFetched>) {
    while let Ok(event) = inbox.try_recv() {
        actor.handle(event);
    }
}

fn ok_completion(target: &str) -> ResourceFetched {
    ResourceFetched::Regular {
        uri: uri(target),
        status: FetchStatus::Ok,
        session_updates: crate::session::identity_update(),
    }
}

fn ko_completion(target: &str) -> ResourceFetched {
    ResourceFetched::Regular {
        uri: uri(target),
        status: FetchStatus::Ko,
        session_updates: crate::session::identity_update(),
    }
}

fn completion_with_update(target: &str, update: SessionUpdate) -> ResourceFetched {
    ResourceFetched::Regular {
        uri: uri(target),
        status: FetchStatus::Ok,
        session_updates: update,
    }
}

// ============================================================================
// Admission and backpressure
// ============================================================================

#[test]
fn test_same_host_images_dispatch_immediately() {
    let config = Arc::new(FetchConfig::default().with_max_connections_per_host(4));
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![
        regular("http://a/img1"),
        regular("http://a/img2"),
    ]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, mut done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("two images"), &[], tx, Session::new());
    let (mut actor, mut inbox) = start(plan);

    assert_eq!(http.started_uris(), vec!["http://a/img1", "http://a/img2"]);
    assert_eq!(actor.pool.available("a"), 2);

    actor.handle(ok_completion("http://a/img1"));
    assert_eq!(actor.pool.available("a"), 3);
    assert!(done.try_recv().is_err());

    actor.handle(ok_completion("http://a/img2"));
    pump(&mut actor, &mut inbox);

    let session = done.try_recv().expect("page load should be complete");
    assert_eq!(session.group_records().len(), 1);
    assert_eq!(session.group_records()[0].ok, 2);
    assert_eq!(session.group_records()[0].ko, 0);
    assert!(actor.done);
}

#[test]
fn test_single_connection_backpressure() {
    let config = Arc::new(FetchConfig::default().with_max_connections_per_host(1));
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![
        regular("http://a/1"),
        regular("http://a/2"),
        regular("http://a/3"),
    ]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, mut done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("three images"), &[], tx, Session::new());
    let (mut actor, _inbox) = start(plan);

    assert_eq!(http.started_uris(), vec!["http://a/1"]);
    assert_eq!(actor.pool.available("a"), 0);
    assert_eq!(actor.pool.buffered_len("a"), 2);

    actor.handle(ok_completion("http://a/1"));
    assert_eq!(http.started_uris(), vec!["http://a/1", "http://a/2"]);
    assert_eq!(actor.pool.available("a"), 0, "freed token goes to the buffered request");

    actor.handle(ok_completion("http://a/2"));
    assert_eq!(
        http.started_uris(),
        vec!["http://a/1", "http://a/2", "http://a/3"]
    );
    assert_eq!(actor.pool.buffered_len("a"), 0);

    actor.handle(ok_completion("http://a/3"));
    let session = done.try_recv().expect("page load should be complete");
    assert_eq!(session.group_records()[0].ok, 3);
}

#[test]
fn test_admission_bound_holds_across_hosts() {
    let config = Arc::new(FetchConfig::default().with_max_connections_per_host(2));
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![
        regular("http://a/1"),
        regular("http://a/2"),
        regular("http://a/3"),
        regular("http://a/4"),
        regular("http://b/1"),
    ]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("five"), &[], tx, Session::new());
    let (mut actor, _inbox) = start(plan);

    let started = http.started_uris();
    let on_a = started.iter().filter(|u| u.starts_with("http://a/")).count();
    assert_eq!(on_a, 2);
    assert!(started.contains(&"http://b/1".to_string()));
    assert_eq!(actor.pool.buffered_len("a"), 2);

    actor.handle(ok_completion("http://a/1"));
    actor.handle(ok_completion("http://b/1"));
    let on_a_total = http
        .started_uris()
        .iter()
        .filter(|u| u.starts_with("http://a/"))
        .count();
    // a/3 was dispatched by a's release; b's release found no backlog
    assert_eq!(on_a_total, 3);
    assert_eq!(actor.pool.available("b"), 2);
}

#[test]
fn test_failed_fetches_count_as_ko() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![
        regular("http://a/good"),
        regular("http://a/bad"),
    ]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, mut done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("mixed"), &[], tx, Session::new());
    let (mut actor, _inbox) = start(plan);

    actor.handle(ok_completion("http://a/good"));
    actor.handle(ko_completion("http://a/bad"));

    let session = done.try_recv().expect("page load should be complete");
    assert_eq!(session.group_records()[0].ok, 1);
    assert_eq!(session.group_records()[0].ko, 1);
}

// ============================================================================
// Deduplication and explicit precedence
// ============================================================================

#[test]
fn test_no_uri_is_fetched_twice() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    // The page references img1 twice, and its stylesheet references img1 again
    let parser = StaticHtmlParser::returning(vec![
        css("http://a/style.css"),
        regular("http://a/img1"),
        regular("http://a/img1"),
    ]);
    let css_parser = StaticCssParser::returning(vec![
        regular("http://a/img1"),
        regular("http://a/img2"),
    ]);
    let env = env_of(http.clone(), parser, css_parser, &config);
    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("dupes"), &[], tx, Session::new());
    let (mut actor, _inbox) = start(plan);

    assert_eq!(http.started_uris(), vec!["http://a/style.css", "http://a/img1"]);

    actor.handle(ResourceFetched::Css {
        uri: uri("http://a/style.css"),
        status: FetchStatus::Ok,
        session_updates: crate::session::identity_update(),
        status_code: Some(200),
        validator: None,
        body: "url(img1) url(img2)".to_string(),
    });

    let started = http.started_uris();
    assert_eq!(started.iter().filter(|u| u.ends_with("img1")).count(), 1);
    assert!(started.contains(&"http://a/img2".to_string()));
}

#[test]
fn test_explicit_request_overrides_inferred() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![
        regular("http://a/x"),
        regular("http://a/y"),
    ]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);
    let explicit: Vec<Arc<dyn RequestDef>> =
        vec![StaticDef::new("declared-x", "http://a/x", &config)];

    let plan = for_fetched_page(&env, &uri("http://a/p"), &html_response("page"), &explicit, tx, Session::new());
    let factory = plan.into_factory().expect("resources expected");

    let names: Vec<&str> = factory.resources().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["declared-x", "http://a/y"]);
    assert_eq!(factory.resources().len(), 2);
}

#[test]
fn test_unbuildable_explicit_resource_is_reported_and_skipped() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![regular("http://a/img")]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);
    let explicit: Vec<Arc<dyn RequestDef>> = vec![Arc::new(BrokenDef {
        name: "broken".to_string(),
    })];

    let plan = for_fetched_page(&env, &uri("http://a/p"), &html_response("page"), &explicit, tx, Session::new());
    let factory = plan.into_factory().expect("inferred resource remains");

    assert_eq!(factory.resources().len(), 1);
    assert_eq!(*http.unbuildable.lock(), vec!["broken".to_string()]);
}

// ============================================================================
// Factory gating
// ============================================================================

#[test]
fn test_non_html_response_plans_nothing() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![regular("http://a/img")]);
    let env = env_of(http.clone(), parser.clone(), StaticCssParser::empty(), &config);
    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let response = PrimaryResponse::new(
        200,
        vec![("Content-Type".to_string(), "application/json".to_string())],
        b"{}".to_vec(),
    );
    let plan = for_fetched_page(&env, &uri("http://a/p"), &response, &[], tx, Session::new());

    assert!(plan.into_factory().is_none());
    assert_eq!(parser.calls(), 0);
}

#[test]
fn test_inference_disabled_plans_nothing() {
    let config = Arc::new(FetchConfig::default().with_infer_html_resources(false));
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![regular("http://a/img")]);
    let env = env_of(http.clone(), parser.clone(), StaticCssParser::empty(), &config);
    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/p"), &html_response("page"), &[], tx, Session::new());

    assert!(plan.into_factory().is_none());
    assert_eq!(parser.calls(), 0);
}

#[test]
fn test_not_modified_without_history_plans_nothing() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![regular("http://a/img")]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let response = PrimaryResponse::new(
        304,
        vec![("Content-Type".to_string(), "text/html".to_string())],
        Vec::new(),
    );
    let plan = for_fetched_page(&env, &uri("http://a/p"), &response, &[], tx, Session::new());

    assert!(plan.into_factory().is_none());
}

#[test]
fn test_second_load_with_same_validator_skips_the_parser() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![regular("http://a/img1")]);
    let env = env_of(http.clone(), parser.clone(), StaticCssParser::empty(), &config);

    let response = PrimaryResponse::new(
        200,
        vec![
            ("Content-Type".to_string(), "text/html".to_string()),
            ("ETag".to_string(), "W/\"abc\"".to_string()),
        ],
        b"page".to_vec(),
    );

    let (tx1, _done1) = PrimaryTransaction::new(Arc::clone(&config), false);
    let first = for_fetched_page(&env, &uri("http://a/p"), &response, &[], tx1, Session::new())
        .into_factory()
        .expect("resources expected");

    let (tx2, _done2) = PrimaryTransaction::new(Arc::clone(&config), false);
    let second = for_fetched_page(&env, &uri("http://a/p"), &response, &[], tx2, Session::new())
        .into_factory()
        .expect("resources expected");

    assert_eq!(parser.calls(), 1);
    assert_eq!(
        first.resources().iter().map(|r| r.uri.as_str()).collect::<Vec<_>>(),
        second.resources().iter().map(|r| r.uri.as_str()).collect::<Vec<_>>()
    );
}

#[test]
fn test_cached_page_uses_recorded_inference() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![regular("http://a/img1")]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);

    // No inference recorded yet: nothing to fetch
    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);
    let plan = for_cached_page(&env, &uri("http://a/p"), &[], tx, Session::new());
    assert!(plan.into_factory().is_none());

    // A fetched load populates the cache, the cached load then reuses it
    let response = PrimaryResponse::new(
        200,
        vec![
            ("Content-Type".to_string(), "text/html".to_string()),
            ("ETag".to_string(), "v1".to_string()),
        ],
        b"page".to_vec(),
    );
    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);
    for_fetched_page(&env, &uri("http://a/p"), &response, &[], tx, Session::new());

    let (tx, _done) = PrimaryTransaction::new(Arc::clone(&config), false);
    let plan = for_cached_page(&env, &uri("http://a/p"), &[], tx, Session::new());
    let factory = plan.into_factory().expect("cached inference expected");
    assert_eq!(factory.resources()[0].uri.as_str(), "http://a/img1");
}

// ============================================================================
// Session-backed caching and replays
// ============================================================================

#[test]
fn test_expiry_partition_replays_and_clears() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![
        regular("http://a/fresh"),
        regular("http://a/expired"),
        regular("http://a/unknown"),
    ]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, mut done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let session = Session::new()
        .set_resource_expiry(uri("http://a/fresh"), Utc::now() + Duration::hours(1))
        .set_resource_expiry(uri("http://a/expired"), Utc::now() - Duration::hours(1));

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("page"), &[], tx, session);
    let (mut actor, mut inbox) = start(plan);

    // fresh replayed locally (already counted ok by the pump), the other two dispatched
    let started = http.started_uris();
    assert_eq!(started.len(), 2);
    assert!(started.contains(&"http://a/expired".to_string()));
    assert!(started.contains(&"http://a/unknown".to_string()));
    assert_eq!(actor.stats.ok, 1);
    assert!(actor.session.resource_expiry(&uri("http://a/expired")).is_none());

    actor.handle(ok_completion("http://a/expired"));
    actor.handle(ok_completion("http://a/unknown"));
    pump(&mut actor, &mut inbox);

    let session = done.try_recv().expect("page load should be complete");
    assert_eq!(session.group_records()[0].ok, 3);
}

#[test]
fn test_cached_stylesheet_replays_as_terminal_completion() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![css("http://a/style.css")]);
    let css_parser = StaticCssParser::returning(vec![regular("http://a/bg.png")]);
    let env = env_of(http.clone(), parser, css_parser, &config);

    // The stylesheet was parsed in an earlier run and is still fresh for
    // this user: its replay must consult the stylesheet cache but not
    // expand anything (no status code on the synthesized event).
    env.caches.css.put(
        uri("http://a/style.css"),
        Arc::new(vec![regular("http://a/bg.png")]),
    );
    let session =
        Session::new().set_resource_expiry(uri("http://a/style.css"), Utc::now() + Duration::hours(1));
    let (tx, mut done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("page"), &[], tx, session);
    let (_actor, _inbox) = start(plan);

    assert_eq!(http.started_count(), 0);
    let session = done.try_recv().expect("page load should be complete");
    assert_eq!(session.group_records()[0].ok, 1);
    assert_eq!(session.group_records()[0].ko, 0);
}

#[test]
fn test_release_drains_consecutive_cached_buffered_requests() {
    let config = Arc::new(FetchConfig::default().with_max_connections_per_host(1));
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![
        regular("http://a/1"),
        regular("http://a/2"),
        regular("http://a/3"),
        regular("http://a/4"),
    ]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, mut done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("page"), &[], tx, Session::new());
    let (mut actor, mut inbox) = start(plan);

    assert_eq!(http.started_uris(), vec!["http://a/1"]);
    assert_eq!(actor.pool.buffered_len("a"), 3);

    // While /1 was in flight its response marked /2 and /3 cacheable
    let expiry = Utc::now() + Duration::hours(1);
    actor.handle(completion_with_update(
        "http://a/1",
        Box::new(move |session| {
            session
                .set_resource_expiry(uri("http://a/2"), expiry)
                .set_resource_expiry(uri("http://a/3"), expiry)
        }),
    ));

    // One release: two cached replays drained, one network fetch started,
    // the token never returned to the pool
    assert_eq!(http.started_uris(), vec!["http://a/1", "http://a/4"]);
    assert_eq!(actor.pool.available("a"), 0);
    assert_eq!(actor.pool.buffered_len("a"), 0);

    pump(&mut actor, &mut inbox);
    assert_eq!(actor.stats.ok, 3);

    actor.handle(ok_completion("http://a/4"));
    let session = done.try_recv().expect("page load should be complete");
    assert_eq!(session.group_records()[0].ok, 4);
}

// ============================================================================
// CSS discovery
// ============================================================================

#[test]
fn test_stylesheet_expands_before_its_own_completion_counts() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![css("http://a/style.css")]);
    let css_parser = StaticCssParser::returning(vec![regular("http://a/bg.png")]);
    let env = env_of(http.clone(), parser, css_parser, &config);
    let (tx, mut done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("page"), &[], tx, Session::new());
    let (mut actor, _inbox) = start(plan);

    assert_eq!(http.started_uris(), vec!["http://a/style.css"]);
    assert_eq!(actor.pending_resources, 1);

    actor.handle(ResourceFetched::Css {
        uri: uri("http://a/style.css"),
        status: FetchStatus::Ok,
        session_updates: crate::session::identity_update(),
        status_code: Some(200),
        validator: Some("W/\"v1\"".to_string()),
        body: "body { background: url(bg.png) }".to_string(),
    });

    // bg.png was admitted before the stylesheet's completion decremented
    // pending, so the page load is still running
    assert_eq!(actor.pending_resources, 1);
    assert!(!actor.done);
    assert!(done.try_recv().is_err());
    assert!(http.started_uris().contains(&"http://a/bg.png".to_string()));

    actor.handle(ok_completion("http://a/bg.png"));
    let session = done.try_recv().expect("page load should be complete");
    assert_eq!(session.group_records()[0].ok, 2);
    assert_eq!(session.group_records()[0].ko, 0);
}

#[test]
fn test_failed_stylesheet_expands_nothing() {
    let config = Arc::new(FetchConfig::default());
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![css("http://a/style.css")]);
    let css_parser = StaticCssParser::returning(vec![regular("http://a/bg.png")]);
    let env = env_of(http.clone(), parser, css_parser, &config);
    let (tx, mut done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("page"), &[], tx, Session::new());
    let (mut actor, _inbox) = start(plan);

    actor.handle(ResourceFetched::Css {
        uri: uri("http://a/style.css"),
        status: FetchStatus::Ko,
        session_updates: crate::session::identity_update(),
        status_code: Some(503),
        validator: None,
        body: String::new(),
    });

    assert_eq!(http.started_count(), 1);
    let session = done.try_recv().expect("page load should be complete");
    assert_eq!(session.group_records()[0].ok, 0);
    assert_eq!(session.group_records()[0].ko, 1);
}

// ============================================================================
// Session threading
// ============================================================================

#[test]
fn test_dispatched_requests_see_the_session_as_of_dispatch_time() {
    let config = Arc::new(FetchConfig::default().with_max_connections_per_host(1));
    let http = RecordingHttp::new();
    let parser = StaticHtmlParser::returning(vec![
        regular("http://a/1"),
        regular("http://a/2"),
    ]);
    let env = env_of(http.clone(), parser, StaticCssParser::empty(), &config);
    let (tx, mut done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("page"), &[], tx, Session::new());
    let (mut actor, _inbox) = start(plan);

    let first = http.take_transactions().pop().unwrap();
    assert!(first.session.attribute("seen-1").is_none());
    assert!(!first.primary);

    actor.handle(completion_with_update(
        "http://a/1",
        Box::new(|session| session.set_attribute("seen-1", serde_json::json!(true))),
    ));

    // The buffered request dispatched by the release carries the folded session
    let second = http.take_transactions().pop().unwrap();
    assert_eq!(second.request.uri.as_str(), "http://a/2");
    assert_eq!(second.session.attribute("seen-1"), Some(&serde_json::json!(true)));

    actor.handle(completion_with_update(
        "http://a/2",
        Box::new(|session| session.set_attribute("seen-2", serde_json::json!(true))),
    ));

    let session = done.try_recv().expect("page load should be complete");
    assert_eq!(session.attribute("seen-1"), Some(&serde_json::json!(true)));
    assert_eq!(session.attribute("seen-2"), Some(&serde_json::json!(true)));
    assert_eq!(session.group_records().len(), 1);
}

// ============================================================================
// End-to-end through the spawned task
// ============================================================================

#[tokio::test]
async fn test_spawned_page_load_completes_with_css_chain() {
    let config = Arc::new(FetchConfig::default());
    let http = EchoHttp::new();
    let parser = StaticHtmlParser::returning(vec![
        css("http://a/style.css"),
        regular("http://a/img1"),
    ]);
    let css_parser = StaticCssParser::returning(vec![regular("http://a/bg.png")]);
    let env = env_of(http.clone(), parser, css_parser, &config);
    let (tx, done) = PrimaryTransaction::new(Arc::clone(&config), false);

    let plan = for_fetched_page(&env, &uri("http://a/x"), &html_response("page"), &[], tx, Session::new());
    let handle = plan.into_factory().expect("resources expected").spawn();

    let session = done.await.expect("scheduler should send the final session");
    handle.task.await.expect("scheduler task should finish cleanly");

    assert_eq!(session.group_records().len(), 1);
    assert_eq!(session.group_records()[0].ok, 3);
    assert_eq!(session.group_records()[0].ko, 0);

    let started = http.started.lock();
    assert_eq!(started.len(), 3);
    assert!(started.contains(&"http://a/bg.png".to_string()));
}
