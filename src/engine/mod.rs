//! Rendering engine seam.
//!
//! The capture engine only needs a small capability set from a browser:
//! launch and terminate an isolated context, open a page in it, turn on
//! network interception with a per-request allow/abort decision, stream
//! per-request lifecycle events, and navigate. Anything implementing
//! [`RenderingEngine`] can back a [`CaptureService`](crate::CaptureService).
//!
//! - [`playwright`] - Node.js helper driving Chromium over the DevTools protocol
//! - [`scripted`] - in-process engine that replays a scripted page load

pub mod playwright;
pub mod scripted;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::har::Header;
use crate::Viewport;

pub use playwright::{PlaywrightEngine, PlaywrightOptions};
pub use scripted::{NavigationBehavior, ProcessLedger, ScriptedEngine, ScriptedResource, SitePlan};

/// Receiving half of a page's network event stream.
pub type EventStream = mpsc::UnboundedReceiver<EngineEvent>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("browser helper connection closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Options shared by every engine when starting a browser context.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Upper bound for the browser to come up.
    pub launch_timeout: Duration,
    /// Upper bound for a graceful close before the process is killed.
    pub teardown_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            launch_timeout: Duration::from_secs(20),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

pub trait RenderingEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Starts a fresh browser context (own profile, no shared cookies or cache).
    fn launch<'a>(
        &'a self,
        options: &'a LaunchOptions,
    ) -> BoxFuture<'a, Result<Box<dyn BrowserContext>, EngineError>>;
}

pub trait BrowserContext: Send {
    fn open_page(
        &mut self,
        viewport: Viewport,
    ) -> BoxFuture<'_, Result<Box<dyn EnginePage>, EngineError>>;

    /// Terminates the context and releases its OS process. Safe to call twice.
    fn close(&mut self) -> BoxFuture<'_, Result<(), EngineError>>;
}

pub trait EnginePage: Send {
    /// Turns on request interception and returns the page's event stream.
    ///
    /// Every outgoing request is announced with [`EngineEvent::Intercepted`]
    /// and held until its responder is answered.
    fn enable_interception(&mut self) -> BoxFuture<'_, Result<EventStream, EngineError>>;

    /// Issues the navigation and resolves once the page's load event fired.
    fn navigate<'a>(&'a mut self, url: &'a Url) -> BoxFuture<'a, Result<Url, EngineError>>;

    fn title(&mut self) -> BoxFuture<'_, Result<Option<String>, EngineError>>;

    fn close(&mut self) -> BoxFuture<'_, Result<(), EngineError>>;
}

/// Stable per-request identifier assigned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId(value.to_string())
    }
}

/// Resource classification reported by the browser for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Xhr,
    Fetch,
    WebSocket,
    Manifest,
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Document => "document",
            ResourceKind::Stylesheet => "stylesheet",
            ResourceKind::Image => "image",
            ResourceKind::Media => "media",
            ResourceKind::Font => "font",
            ResourceKind::Script => "script",
            ResourceKind::Xhr => "xhr",
            ResourceKind::Fetch => "fetch",
            ResourceKind::WebSocket => "websocket",
            ResourceKind::Manifest => "manifest",
            ResourceKind::Other => "other",
        }
    }

    /// Lenient mapping from DevTools (`Image`, `XHR`) and CLI (`images`) spellings.
    /// Unknown kinds map to [`ResourceKind::Other`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "document" | "documents" => ResourceKind::Document,
            "stylesheet" | "stylesheets" | "css" => ResourceKind::Stylesheet,
            "image" | "images" | "img" => ResourceKind::Image,
            "media" => ResourceKind::Media,
            "font" | "fonts" => ResourceKind::Font,
            "script" | "scripts" => ResourceKind::Script,
            "xhr" => ResourceKind::Xhr,
            "fetch" => ResourceKind::Fetch,
            "websocket" => ResourceKind::WebSocket,
            "manifest" => ResourceKind::Manifest,
            _ => ResourceKind::Other,
        }
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match ResourceKind::from_label(s) {
            ResourceKind::Other if !s.trim().eq_ignore_ascii_case("other") => {
                Err(format!("unknown resource kind '{}'", s.trim()))
            }
            kind => Ok(kind),
        }
    }
}

impl<'de> Deserialize<'de> for ResourceKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(ResourceKind::from_label(&label))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow/abort verdict for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptedRequest {
    pub id: RequestId,
    pub url: String,
    pub method: String,
    pub resource_kind: ResourceKind,
}

/// Browser resource timing, in milliseconds relative to `request_time`.
/// Negative values mean the phase did not happen or was not reported.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    /// Monotonic start of the request, in milliseconds.
    pub request_time: f64,
    #[serde(default = "unavailable")]
    pub dns_start: f64,
    #[serde(default = "unavailable")]
    pub dns_end: f64,
    #[serde(default = "unavailable")]
    pub connect_start: f64,
    #[serde(default = "unavailable")]
    pub connect_end: f64,
    #[serde(default = "unavailable")]
    pub ssl_start: f64,
    #[serde(default = "unavailable")]
    pub ssl_end: f64,
    #[serde(default = "unavailable")]
    pub send_start: f64,
    #[serde(default = "unavailable")]
    pub send_end: f64,
    #[serde(default = "unavailable")]
    pub receive_headers_end: f64,
}

fn unavailable() -> f64 {
    -1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub remote_ip_address: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub timing: Option<ResourceTiming>,
    /// Raw status line + header block length when the browser exposes it.
    #[serde(default)]
    pub headers_size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub id: RequestId,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub post_data: Option<String>,
    pub resource_kind: ResourceKind,
    /// Monotonic milliseconds.
    pub timestamp: f64,
    /// Milliseconds since the Unix epoch.
    pub wall_time: f64,
    /// Set when this request is the next hop of a redirect that reused `id`.
    #[serde(default)]
    pub redirect_response: Option<ResponseData>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub id: RequestId,
    pub timestamp: f64,
    pub response: ResponseData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub id: RequestId,
    pub timestamp: f64,
    /// Bytes received on the wire, headers included.
    #[serde(default)]
    pub encoded_data_length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub id: RequestId,
    pub timestamp: f64,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
}

/// One notification from a page's network stream.
#[derive(Debug)]
pub enum EngineEvent {
    /// Outgoing request held by interception until `respond` is answered.
    Intercepted {
        request: InterceptedRequest,
        respond: oneshot::Sender<Decision>,
    },
    RequestWillBeSent(RequestWillBeSent),
    ResponseReceived(ResponseReceived),
    LoadingFinished(LoadingFinished),
    LoadingFailed(LoadingFailed),
}

impl EngineEvent {
    pub fn request_id(&self) -> &RequestId {
        match self {
            EngineEvent::Intercepted { request, .. } => &request.id,
            EngineEvent::RequestWillBeSent(ev) => &ev.id,
            EngineEvent::ResponseReceived(ev) => &ev.id,
            EngineEvent::LoadingFinished(ev) => &ev.id,
            EngineEvent::LoadingFailed(ev) => &ev.id,
        }
    }
}
