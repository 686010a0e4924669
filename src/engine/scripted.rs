//! In-process engine that replays a scripted page load.
//!
//! Each host maps to a [`SitePlan`]: a document plus sub-resources that are
//! fetched concurrently, with their own latency, status and failure mode.
//! Events go through the same interception/decision handshake as a real
//! browser, and every launched context is counted in a [`ProcessLedger`] so
//! tests can assert that nothing outlives its capture.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use url::Url;

use super::{
    BrowserContext, Decision, EngineError, EngineEvent, EnginePage, EventStream, InterceptedRequest,
    LaunchOptions, LoadingFailed, LoadingFinished, RenderingEngine, RequestId, RequestWillBeSent,
    ResourceKind, ResponseData, ResponseReceived,
};
use crate::har::Header;
use crate::Viewport;

const SIMULATED_HEADERS_SIZE: i64 = 180;
const BLOCKED_BY_CLIENT: &str = "net::ERR_BLOCKED_BY_CLIENT";

/// How the document request of a [`SitePlan`] behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationBehavior {
    Load,
    /// The document fails with this engine error text (e.g. `net::ERR_NAME_NOT_RESOLVED`).
    Fail(String),
    /// The document request is sent and never answered.
    Hang,
}

#[derive(Debug, Clone)]
pub struct ScriptedResource {
    pub path: String,
    pub kind: ResourceKind,
    pub method: String,
    pub post_data: Option<String>,
    pub request_headers: Vec<Header>,
    pub status: u16,
    pub mime_type: String,
    pub latency: Duration,
    pub body_bytes: u64,
    pub response_headers: Vec<Header>,
    pub redirect_to: Option<String>,
    pub failure: Option<String>,
    pub hangs: bool,
}

impl ScriptedResource {
    pub fn new(path: impl Into<String>, kind: ResourceKind) -> Self {
        let mime_type = match kind {
            ResourceKind::Document => "text/html",
            ResourceKind::Stylesheet => "text/css",
            ResourceKind::Image => "image/png",
            ResourceKind::Font => "font/woff2",
            ResourceKind::Media => "video/mp4",
            ResourceKind::Script => "application/javascript",
            ResourceKind::Xhr | ResourceKind::Fetch | ResourceKind::Manifest => "application/json",
            ResourceKind::WebSocket | ResourceKind::Other => "application/octet-stream",
        };
        Self {
            path: path.into(),
            kind,
            method: "GET".to_string(),
            post_data: None,
            request_headers: Vec::new(),
            status: 200,
            mime_type: mime_type.to_string(),
            latency: Duration::from_millis(5),
            body_bytes: 1024,
            response_headers: Vec::new(),
            redirect_to: None,
            failure: None,
            hangs: false,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_post(mut self, body: impl Into<String>, content_type: &str) -> Self {
        self.method = "POST".to_string();
        self.post_data = Some(body.into());
        self.request_headers.push(Header::new("Content-Type", content_type));
        self
    }

    pub fn with_response_header(mut self, name: &str, value: &str) -> Self {
        self.response_headers.push(Header::new(name, value));
        self
    }

    /// Answers with a 302 first, then serves `target` under the same request id.
    pub fn redirected_to(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }

    pub fn failing(mut self, error_text: impl Into<String>) -> Self {
        self.failure = Some(error_text.into());
        self
    }

    /// Sent, never answered.
    pub fn hanging(mut self) -> Self {
        self.hangs = true;
        self
    }

    /// XHR, fetch and websocket traffic does not hold back the load event.
    fn blocks_load(&self) -> bool {
        !matches!(
            self.kind,
            ResourceKind::Xhr | ResourceKind::Fetch | ResourceKind::WebSocket
        )
    }
}

#[derive(Debug, Clone)]
pub struct SitePlan {
    pub title: Option<String>,
    pub navigation: NavigationBehavior,
    pub document_status: u16,
    pub document_latency: Duration,
    pub protocol: String,
    pub resources: Vec<ScriptedResource>,
}

impl Default for SitePlan {
    fn default() -> Self {
        Self {
            title: Some("Scripted page".to_string()),
            navigation: NavigationBehavior::Load,
            document_status: 200,
            document_latency: Duration::from_millis(5),
            protocol: "h2".to_string(),
            resources: Vec::new(),
        }
    }
}

impl SitePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn untitled(mut self) -> Self {
        self.title = None;
        self
    }

    pub fn with_resource(mut self, resource: ScriptedResource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_resources(mut self, resources: impl IntoIterator<Item = ScriptedResource>) -> Self {
        self.resources.extend(resources);
        self
    }

    pub fn with_document_latency(mut self, latency: Duration) -> Self {
        self.document_latency = latency;
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn failing(mut self, error_text: impl Into<String>) -> Self {
        self.navigation = NavigationBehavior::Fail(error_text.into());
        self
    }

    pub fn hanging(mut self) -> Self {
        self.navigation = NavigationBehavior::Hang;
        self
    }
}

/// Counts simulated browser processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLedger(Arc<LedgerCounts>);

#[derive(Debug, Default)]
struct LedgerCounts {
    launched: AtomicUsize,
    terminated: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl ProcessLedger {
    pub fn launched(&self) -> usize {
        self.0.launched.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.0.terminated.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.0.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live processes seen so far.
    pub fn peak(&self) -> usize {
        self.0.peak.load(Ordering::SeqCst)
    }

    fn record_launch(&self) {
        self.0.launched.fetch_add(1, Ordering::SeqCst);
        let live = self.0.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(live, Ordering::SeqCst);
    }

    fn record_exit(&self) {
        self.0.terminated.fetch_add(1, Ordering::SeqCst);
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct Shared {
    sites: HashMap<String, SitePlan>,
    fallback: SitePlan,
    launch_delay: Duration,
    launch_failure: Option<String>,
    ledger: ProcessLedger,
}

#[derive(Clone)]
pub struct ScriptedEngine {
    shared: Arc<Shared>,
}

impl ScriptedEngine {
    /// Every host loads `fallback` unless overridden with [`with_site`](Self::with_site).
    pub fn new(fallback: SitePlan) -> Self {
        Self {
            shared: Arc::new(Shared {
                sites: HashMap::new(),
                fallback,
                launch_delay: Duration::ZERO,
                launch_failure: None,
                ledger: ProcessLedger::default(),
            }),
        }
    }

    /// A small site with blocked and allowed sub-resources, a redirect and a
    /// form POST. `hang.test` never answers and `unresolvable.test` fails DNS.
    pub fn demo() -> Self {
        let site = SitePlan::new()
            .titled("Demo page")
            .with_resources([
                ScriptedResource::new("/static/app.js", ResourceKind::Script),
                ScriptedResource::new("/static/vendor.js", ResourceKind::Script)
                    .redirected_to("/cdn/vendor.js"),
                ScriptedResource::new("/static/site.css", ResourceKind::Stylesheet),
                ScriptedResource::new("/img/hero.png", ResourceKind::Image),
                ScriptedResource::new("/img/logo.svg", ResourceKind::Image),
                ScriptedResource::new("/fonts/inter.woff2", ResourceKind::Font),
                ScriptedResource::new("/api/session", ResourceKind::Xhr)
                    .with_post("user=demo&remember=1", "application/x-www-form-urlencoded")
                    .with_response_header("Set-Cookie", "sid=demo; Path=/; HttpOnly"),
                ScriptedResource::new("/api/feed?page=1&size=20", ResourceKind::Fetch),
            ]);
        Self::new(site)
            .with_site("hang.test", SitePlan::new().hanging())
            .with_site(
                "unresolvable.test",
                SitePlan::new().failing("net::ERR_NAME_NOT_RESOLVED"),
            )
    }

    fn shared_mut(&mut self) -> &mut Shared {
        Arc::make_mut(&mut self.shared)
    }

    pub fn with_site(mut self, host: impl Into<String>, plan: SitePlan) -> Self {
        self.shared_mut().sites.insert(host.into(), plan);
        self
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.shared_mut().launch_delay = delay;
        self
    }

    pub fn failing_launch(mut self, message: impl Into<String>) -> Self {
        self.shared_mut().launch_failure = Some(message.into());
        self
    }

    pub fn ledger(&self) -> ProcessLedger {
        self.shared.ledger.clone()
    }
}

impl RenderingEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn launch<'a>(
        &'a self,
        _options: &'a LaunchOptions,
    ) -> BoxFuture<'a, Result<Box<dyn BrowserContext>, EngineError>> {
        Box::pin(async move {
            if let Some(message) = &self.shared.launch_failure {
                return Err(EngineError::Launch(message.clone()));
            }
            if !self.shared.launch_delay.is_zero() {
                tokio::time::sleep(self.shared.launch_delay).await;
            }
            self.shared.ledger.record_launch();
            Ok(Box::new(ScriptedContext {
                shared: self.shared.clone(),
                clock: Arc::new(Clock::new()),
                closed: false,
            }) as Box<dyn BrowserContext>)
        })
    }
}

struct ScriptedContext {
    shared: Arc<Shared>,
    clock: Arc<Clock>,
    closed: bool,
}

impl ScriptedContext {
    fn exit(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.ledger.record_exit();
        }
    }
}

impl BrowserContext for ScriptedContext {
    fn open_page(
        &mut self,
        viewport: Viewport,
    ) -> BoxFuture<'_, Result<Box<dyn EnginePage>, EngineError>> {
        Box::pin(async move {
            if self.closed {
                return Err(EngineError::Closed);
            }
            Ok(Box::new(ScriptedPage {
                shared: self.shared.clone(),
                clock: self.clock.clone(),
                viewport,
                sink: None,
                tasks: JoinSet::new(),
                title: None,
                closed: false,
            }) as Box<dyn EnginePage>)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            self.exit();
            Ok(())
        })
    }
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.exit();
    }
}

struct ScriptedPage {
    shared: Arc<Shared>,
    clock: Arc<Clock>,
    viewport: Viewport,
    sink: Option<mpsc::UnboundedSender<EngineEvent>>,
    /// Page load drivers; dropping the set stops all simulated traffic.
    tasks: JoinSet<()>,
    title: Option<String>,
    closed: bool,
}

impl EnginePage for ScriptedPage {
    fn enable_interception(&mut self) -> BoxFuture<'_, Result<EventStream, EngineError>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.sink = Some(tx);
            Ok(rx)
        })
    }

    fn navigate<'a>(&'a mut self, url: &'a Url) -> BoxFuture<'a, Result<Url, EngineError>> {
        Box::pin(async move {
            if self.closed {
                return Err(EngineError::Closed);
            }
            let plan = url
                .host_str()
                .and_then(|host| self.shared.sites.get(host))
                .unwrap_or(&self.shared.fallback)
                .clone();
            tracing::debug!(%url, viewport = %self.viewport, "scripted navigation");

            let (done_tx, done_rx) = oneshot::channel();
            let load = PageLoad {
                sink: self.sink.clone(),
                clock: self.clock.clone(),
                base: url.clone(),
            };
            let title = plan.title.clone();
            self.tasks.spawn(load.run(plan, done_tx));

            let final_url = done_rx.await.map_err(|_| EngineError::Closed)??;
            self.title = title;
            Ok(final_url)
        })
    }

    fn title(&mut self) -> BoxFuture<'_, Result<Option<String>, EngineError>> {
        Box::pin(async move { Ok(self.title.clone()) })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            self.closed = true;
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
            self.sink = None;
            Ok(())
        })
    }
}

/// Monotonic clock with strictly increasing readings, so emission order
/// and timestamp order agree.
struct Clock {
    origin: Instant,
    wall_origin_ms: f64,
    last: Mutex<f64>,
}

impl Clock {
    fn new() -> Self {
        let wall_origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or_default();
        Self {
            origin: Instant::now(),
            wall_origin_ms,
            last: Mutex::new(-1.0),
        }
    }

    /// Returns (monotonic ms, wall-clock epoch ms).
    fn now(&self) -> (f64, f64) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = self.origin.elapsed().as_secs_f64() * 1000.0;
        let reading = if elapsed > *last { elapsed } else { *last + 0.001 };
        *last = reading;
        (reading, self.wall_origin_ms + reading)
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
struct PageLoad {
    sink: Option<mpsc::UnboundedSender<EngineEvent>>,
    clock: Arc<Clock>,
    base: Url,
}

enum Fetched {
    Completed,
    Aborted,
    Failed(String),
}

impl PageLoad {
    async fn run(self, plan: SitePlan, done: oneshot::Sender<Result<Url, EngineError>>) {
        let mut document = ScriptedResource::new(self.base.path().to_string(), ResourceKind::Document)
            .with_status(plan.document_status)
            .with_latency(plan.document_latency);
        if let NavigationBehavior::Fail(error) = &plan.navigation {
            document = document.failing(error.clone());
        }
        if plan.navigation == NavigationBehavior::Hang {
            document = document.hanging();
        }

        let url = self.base.clone();
        match self.fetch(url.clone(), &document, &plan.protocol).await {
            Fetched::Completed => {}
            Fetched::Aborted => {
                let _ = done.send(Err(EngineError::Navigation(BLOCKED_BY_CLIENT.to_string())));
                return;
            }
            Fetched::Failed(error) => {
                let _ = done.send(Err(EngineError::Navigation(format!("{error} at {url}"))));
                return;
            }
        }

        let mut load_blocking = JoinSet::new();
        let mut background = JoinSet::new();
        for resource in plan.resources {
            let Ok(target) = self.base.join(&resource.path) else {
                continue;
            };
            let load = self.clone();
            let protocol = plan.protocol.clone();
            let set = if resource.blocks_load() {
                &mut load_blocking
            } else {
                &mut background
            };
            set.spawn(async move {
                load.fetch(target, &resource, &protocol).await;
            });
        }
        while load_blocking.join_next().await.is_some() {}

        let _ = done.send(Ok(url));
        while background.join_next().await.is_some() {}
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }

    async fn intercept(&self, id: &RequestId, url: &Url, resource: &ScriptedResource) -> Decision {
        let Some(sink) = &self.sink else {
            return Decision::Continue;
        };
        let (respond, verdict) = oneshot::channel();
        let request = InterceptedRequest {
            id: id.clone(),
            url: url.to_string(),
            method: resource.method.clone(),
            resource_kind: resource.kind,
        };
        if sink.send(EngineEvent::Intercepted { request, respond }).is_err() {
            return Decision::Continue;
        }
        verdict.await.unwrap_or(Decision::Continue)
    }

    fn request_event(
        &self,
        id: &RequestId,
        url: &Url,
        resource: &ScriptedResource,
        redirect_response: Option<ResponseData>,
    ) -> RequestWillBeSent {
        let (timestamp, wall_time) = self.clock.now();
        let mut headers = vec![
            Header::new("Accept", "*/*"),
            Header::new("User-Agent", "harcap-scripted/1.0"),
        ];
        headers.extend(resource.request_headers.iter().cloned());
        RequestWillBeSent {
            id: id.clone(),
            url: url.to_string(),
            method: resource.method.clone(),
            headers,
            post_data: resource.post_data.clone(),
            resource_kind: resource.kind,
            timestamp,
            wall_time,
            redirect_response,
        }
    }

    fn response_data(&self, url: &Url, status: u16, resource: &ScriptedResource, protocol: &str) -> ResponseData {
        let mut headers = vec![
            Header::new("Content-Type", resource.mime_type.clone()),
            Header::new("Content-Length", resource.body_bytes.to_string()),
        ];
        headers.extend(resource.response_headers.iter().cloned());
        ResponseData {
            url: url.to_string(),
            status,
            status_text: status_text(status).to_string(),
            protocol: Some(protocol.to_string()),
            headers,
            mime_type: resource.mime_type.clone(),
            remote_ip_address: Some("127.0.0.1".to_string()),
            connection_id: Some("1".to_string()),
            from_cache: false,
            timing: None,
            headers_size: Some(SIMULATED_HEADERS_SIZE),
        }
    }

    async fn fetch(&self, mut url: Url, resource: &ScriptedResource, protocol: &str) -> Fetched {
        let id = RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed).to_string());
        let decision = self.intercept(&id, &url, resource).await;
        self.emit(EngineEvent::RequestWillBeSent(
            self.request_event(&id, &url, resource, None),
        ));

        if decision == Decision::Abort {
            let (timestamp, _) = self.clock.now();
            self.emit(EngineEvent::LoadingFailed(LoadingFailed {
                id,
                timestamp,
                error_text: BLOCKED_BY_CLIENT.to_string(),
                canceled: false,
            }));
            return Fetched::Aborted;
        }

        tokio::time::sleep(resource.latency).await;

        if let Some(target) = resource.redirect_to.as_deref().and_then(|t| url.join(t).ok()) {
            let mut redirect = self.response_data(&url, 302, resource, protocol);
            redirect.headers.push(Header::new("Location", target.to_string()));
            url = target;
            self.emit(EngineEvent::RequestWillBeSent(
                self.request_event(&id, &url, resource, Some(redirect)),
            ));
            tokio::time::sleep(resource.latency).await;
        }

        if resource.hangs {
            std::future::pending::<()>().await;
        }

        if let Some(error) = &resource.failure {
            let (timestamp, _) = self.clock.now();
            self.emit(EngineEvent::LoadingFailed(LoadingFailed {
                id,
                timestamp,
                error_text: error.clone(),
                canceled: false,
            }));
            return Fetched::Failed(error.clone());
        }

        let (timestamp, _) = self.clock.now();
        self.emit(EngineEvent::ResponseReceived(ResponseReceived {
            id: id.clone(),
            timestamp,
            response: self.response_data(&url, resource.status, resource, protocol),
        }));

        tokio::time::sleep(resource.latency / 4).await;
        let (timestamp, _) = self.clock.now();
        self.emit(EngineEvent::LoadingFinished(LoadingFinished {
            id,
            timestamp,
            encoded_data_length: Some((resource.body_bytes as i64 + SIMULATED_HEADERS_SIZE) as f64),
        }));
        Fetched::Completed
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(engine: &ScriptedEngine) -> (Box<dyn BrowserContext>, Box<dyn EnginePage>) {
        let mut context = engine.launch(&LaunchOptions::default()).await.unwrap();
        let page = context.open_page(Viewport::default()).await.unwrap();
        (context, page)
    }

    #[tokio::test]
    async fn ledger_counts_launch_and_exit_once() {
        let engine = ScriptedEngine::new(SitePlan::new());
        let ledger = engine.ledger();
        let (mut context, _page) = open(&engine).await;
        assert_eq!(ledger.live(), 1);
        context.close().await.unwrap();
        context.close().await.unwrap();
        assert_eq!((ledger.launched(), ledger.terminated(), ledger.live()), (1, 1, 0));

        let (context, _page) = open(&engine).await;
        drop(context);
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.peak(), 1);
    }

    #[tokio::test]
    async fn every_request_waits_for_an_interception_verdict() {
        let engine = ScriptedEngine::new(
            SitePlan::new().with_resource(ScriptedResource::new("/a.png", ResourceKind::Image)),
        );
        let (_context, mut page) = open(&engine).await;
        let mut events = page.enable_interception().await.unwrap();
        let url = Url::parse("https://example.com/").unwrap();

        let answer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = events.recv().await {
                if let EngineEvent::Intercepted { request, respond } = event {
                    let verdict = if request.resource_kind == ResourceKind::Image {
                        Decision::Abort
                    } else {
                        Decision::Continue
                    };
                    seen.push(request.resource_kind);
                    let _ = respond.send(verdict);
                }
            }
            seen
        });

        let final_url = page.navigate(&url).await.unwrap();
        assert_eq!(final_url, url);
        page.close().await.unwrap();
        let seen = answer.await.unwrap();
        assert_eq!(seen, vec![ResourceKind::Document, ResourceKind::Image]);
    }

    #[tokio::test]
    async fn failing_site_reports_navigation_error() {
        let engine = ScriptedEngine::new(SitePlan::new().failing("net::ERR_CONNECTION_REFUSED"));
        let (_context, mut page) = open(&engine).await;
        let url = Url::parse("http://localhost:9/").unwrap();
        match page.navigate(&url).await {
            Err(EngineError::Navigation(msg)) => assert!(msg.contains("ERR_CONNECTION_REFUSED")),
            other => panic!("expected navigation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn launch_failure_is_reported_without_a_process() {
        let engine = ScriptedEngine::new(SitePlan::new()).failing_launch("chromium missing");
        let ledger = engine.ledger();
        assert!(matches!(
            engine.launch(&LaunchOptions::default()).await,
            Err(EngineError::Launch(_))
        ));
        assert_eq!(ledger.launched(), 0);
    }
}
