//! Chromium driven through a long-lived Node.js + Playwright helper.
//!
//! The helper speaks newline-delimited JSON: commands on stdin, events and
//! replies on stdout, launch failures on stderr. Network events come from a
//! DevTools session (Network + Fetch domains) so every request is paused at
//! the request stage until Rust answers `continue` or `abort`.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use url::Url;

use super::{
    BrowserContext, Decision, EngineError, EngineEvent, EnginePage, EventStream, InterceptedRequest,
    LaunchOptions, LoadingFailed, LoadingFinished, RenderingEngine, RequestWillBeSent, ResponseReceived,
};
use crate::Viewport;

const DRIVER_SCRIPT: &str = r#"
const [, headlessFlag, argsJson] = process.argv;
const readline = require('readline');

function emit(message) {
  process.stdout.write(JSON.stringify(message) + '\n');
}

function messageOf(err) {
  return err && err.message ? err.message : String(err);
}

function headerList(headers) {
  const list = [];
  for (const [name, value] of Object.entries(headers || {})) {
    for (const part of String(value).split('\n')) {
      list.push({ name, value: part });
    }
  }
  return list;
}

function responseData(r) {
  let timing = null;
  if (r.timing) {
    timing = Object.assign({}, r.timing, { requestTime: r.timing.requestTime * 1000 });
  }
  return {
    url: r.url,
    status: r.status,
    statusText: r.statusText || '',
    protocol: r.protocol || null,
    headers: headerList(r.headers),
    mimeType: r.mimeType || '',
    remoteIpAddress: r.remoteIPAddress || null,
    connectionId: r.connectionId !== undefined ? String(r.connectionId) : null,
    fromCache: Boolean(r.fromDiskCache || r.fromServiceWorker || r.fromPrefetchCache),
    timing,
    headersSize: r.headersText ? r.headersText.length : null,
  };
}

async function run() {
  let browser;
  let context = null;
  let page = null;
  let cdp = null;
  const pausedRequests = new Map();

  try {
    const { chromium } = require('playwright');
    browser = await chromium.launch({ headless: headlessFlag !== '0', args: JSON.parse(argsJson || '[]') });
  } catch (err) {
    console.error(JSON.stringify({ status: 'error', message: messageOf(err) }));
    process.exitCode = 1;
    return;
  }
  emit({ event: 'ready', version: browser.version() });

  const lines = readline.createInterface({ input: process.stdin });
  for await (const line of lines) {
    let cmd;
    try {
      cmd = JSON.parse(line);
    } catch (_) {
      continue;
    }
    try {
      switch (cmd.cmd) {
        case 'openPage': {
          context = await browser.newContext({ viewport: { width: cmd.width, height: cmd.height } });
          page = await context.newPage();
          cdp = await context.newCDPSession(page);
          cdp.on('Network.requestWillBeSent', (ev) => emit({
            event: 'request',
            id: ev.requestId,
            url: ev.request.url + (ev.request.urlFragment || ''),
            method: ev.request.method,
            headers: headerList(ev.request.headers),
            postData: ev.request.postData || null,
            resourceKind: ev.type || 'Other',
            timestamp: ev.timestamp * 1000,
            wallTime: ev.wallTime * 1000,
            redirectResponse: ev.redirectResponse ? responseData(ev.redirectResponse) : null,
          }));
          cdp.on('Network.responseReceived', (ev) => emit({
            event: 'response',
            id: ev.requestId,
            timestamp: ev.timestamp * 1000,
            response: responseData(ev.response),
          }));
          cdp.on('Network.loadingFinished', (ev) => emit({
            event: 'finished',
            id: ev.requestId,
            timestamp: ev.timestamp * 1000,
            encodedDataLength: ev.encodedDataLength,
          }));
          cdp.on('Network.loadingFailed', (ev) => emit({
            event: 'failed',
            id: ev.requestId,
            timestamp: ev.timestamp * 1000,
            errorText: ev.errorText || '',
            canceled: Boolean(ev.canceled),
          }));
          await cdp.send('Network.enable');
          await cdp.send('Network.setCacheDisabled', { cacheDisabled: true });
          emit({ event: 'pageOpened' });
          break;
        }
        case 'intercept': {
          cdp.on('Fetch.requestPaused', (ev) => {
            const id = ev.networkId || ev.requestId;
            pausedRequests.set(id, ev.requestId);
            emit({
              event: 'intercepted',
              id,
              url: ev.request.url,
              method: ev.request.method,
              resourceKind: ev.resourceType || 'Other',
            });
          });
          await cdp.send('Fetch.enable', { patterns: [{ urlPattern: '*', requestStage: 'Request' }] });
          emit({ event: 'intercepting' });
          break;
        }
        case 'continue':
        case 'abort': {
          const fetchId = pausedRequests.get(cmd.id);
          pausedRequests.delete(cmd.id);
          if (!fetchId || !cdp) break;
          if (cmd.cmd === 'continue') {
            cdp.send('Fetch.continueRequest', { requestId: fetchId }).catch(() => {});
          } else {
            cdp.send('Fetch.failRequest', { requestId: fetchId, errorReason: 'BlockedByClient' }).catch(() => {});
          }
          break;
        }
        case 'navigate': {
          page.goto(cmd.url, { waitUntil: 'load', timeout: 0 })
            .then(() => emit({ event: 'navigated', url: page.url() }))
            .catch((err) => emit({ event: 'navigationFailed', message: messageOf(err) }));
          break;
        }
        case 'title': {
          page.title()
            .then((title) => emit({ event: 'title', title }))
            .catch(() => emit({ event: 'title', title: null }));
          break;
        }
        case 'closePage': {
          if (context) await context.close().catch(() => {});
          context = null;
          page = null;
          cdp = null;
          pausedRequests.clear();
          emit({ event: 'pageClosed' });
          break;
        }
        case 'close': {
          await browser.close().catch(() => {});
          emit({ event: 'closed' });
          process.exit(0);
        }
      }
    } catch (err) {
      emit({ event: 'error', cmd: cmd.cmd, message: messageOf(err) });
    }
  }

  await browser.close().catch(() => {});
}

run();
"#;

const NODE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const PLAYWRIGHT_CHECK_SCRIPT: &str = "require('playwright'); process.stdout.write('ok');";
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Chromium flags for an unattended, isolated capture browser.
pub const CHROMIUM_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--disable-gpu",
    "--disable-extensions",
    "--disable-component-extensions-with-background-pages",
    "--disable-default-apps",
    "--mute-audio",
    "--no-default-browser-check",
    "--no-first-run",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-renderer-backgrounding",
    "--disable-sync",
    "--force-color-profile=srgb",
    "--metrics-recording-only",
    "--no-experiments",
    "--safebrowsing-disable-auto-update",
];

#[derive(Debug, Clone)]
pub struct PlaywrightOptions {
    pub node_command: String,
    /// Appended after [`CHROMIUM_ARGS`].
    pub extra_args: Vec<String>,
}

impl Default for PlaywrightOptions {
    fn default() -> Self {
        Self {
            node_command: "node".to_string(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct PlaywrightEngine {
    options: PlaywrightOptions,
    preflight: OnceCell<()>,
}

impl PlaywrightEngine {
    pub fn new(options: PlaywrightOptions) -> Self {
        Self {
            options,
            preflight: OnceCell::new(),
        }
    }

    fn chromium_args(&self) -> Vec<String> {
        CHROMIUM_ARGS
            .iter()
            .map(|arg| arg.to_string())
            .chain(self.options.extra_args.iter().cloned())
            .collect()
    }

    /// Checks node and the playwright package once per engine.
    async fn ensure_ready(&self) -> Result<(), EngineError> {
        let node = &self.options.node_command;
        self.preflight
            .get_or_try_init(|| async move {
                ensure_node_available(node).await?;
                ensure_playwright_available(node).await
            })
            .await?;
        Ok(())
    }

    async fn spawn_helper(&self, options: &LaunchOptions) -> Result<PlaywrightContext, EngineError> {
        let args_json =
            serde_json::to_string(&self.chromium_args()).map_err(|e| EngineError::Protocol(e.to_string()))?;

        let mut cmd = Command::new(&self.options.node_command);
        cmd.arg("-e")
            .arg(DRIVER_SCRIPT)
            .arg(if options.headless { "1" } else { "0" })
            .arg(args_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| map_spawn_error(err, &self.options.node_command))?;
        debug!(pid = ?child.id(), "browser helper spawned");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("helper stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("helper stdout unavailable".to_string()))?;
        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut err) = stderr_pipe {
                let _ = err.read_to_end(&mut buf).await;
            }
            buf
        });

        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(DriverChannel::new(stdin, reply_rx));
        let reader = tokio::spawn(pump_helper_output(stdout, channel.clone(), reply_tx));

        Ok(PlaywrightContext {
            child,
            channel,
            reader,
            stderr_task: Some(stderr_task),
            request_timeout: options.launch_timeout,
            teardown_timeout: options.teardown_timeout,
            closed: false,
        })
    }
}

impl Default for PlaywrightEngine {
    fn default() -> Self {
        Self::new(PlaywrightOptions::default())
    }
}

impl RenderingEngine for PlaywrightEngine {
    fn name(&self) -> &'static str {
        "playwright"
    }

    fn launch<'a>(
        &'a self,
        options: &'a LaunchOptions,
    ) -> BoxFuture<'a, Result<Box<dyn BrowserContext>, EngineError>> {
        Box::pin(async move {
            self.ensure_ready().await?;
            let mut context = self.spawn_helper(options).await?;

            let ready = context.channel.expect("launch", |message| match message {
                DriverMessage::Ready { version } => {
                    debug!(version = version.as_deref().unwrap_or("unknown"), "browser ready");
                    Some(Ok(()))
                }
                _ => None,
            });
            match timeout(options.launch_timeout, ready).await {
                Ok(Ok(())) => Ok(Box::new(context) as Box<dyn BrowserContext>),
                Ok(Err(EngineError::Closed)) => {
                    let stderr = context.collect_stderr().await;
                    Err(map_helper_error(&stderr))
                }
                Ok(Err(err)) => Err(err),
                Err(_) => Err(EngineError::Launch(format!(
                    "browser did not start within {:?}",
                    options.launch_timeout
                ))),
            }
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
enum DriverCommand<'a> {
    OpenPage { width: u32, height: u32 },
    Intercept,
    Continue { id: &'a str },
    Abort { id: &'a str },
    Navigate { url: &'a str },
    Title,
    ClosePage,
    Close,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum DriverMessage {
    Ready {
        #[serde(default)]
        version: Option<String>,
    },
    PageOpened,
    Intercepting,
    Intercepted(InterceptedRequest),
    Request(RequestWillBeSent),
    Response(ResponseReceived),
    Finished(LoadingFinished),
    Failed(LoadingFailed),
    Navigated {
        url: String,
    },
    NavigationFailed {
        message: String,
    },
    Title {
        #[serde(default)]
        title: Option<String>,
    },
    PageClosed,
    Closed,
    Error {
        #[serde(default)]
        cmd: Option<String>,
        message: String,
    },
}

/// Shared between the context, its page and the stdout reader task.
struct DriverChannel {
    stdin: tokio::sync::Mutex<ChildStdin>,
    replies: tokio::sync::Mutex<mpsc::UnboundedReceiver<DriverMessage>>,
    sink: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
}

impl DriverChannel {
    fn new(stdin: ChildStdin, replies: mpsc::UnboundedReceiver<DriverMessage>) -> Self {
        Self {
            stdin: tokio::sync::Mutex::new(stdin),
            replies: tokio::sync::Mutex::new(replies),
            sink: Mutex::new(None),
        }
    }

    async fn send(&self, command: &DriverCommand<'_>) -> Result<(), EngineError> {
        let mut line = serde_json::to_string(command).map_err(|e| EngineError::Protocol(e.to_string()))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        match written {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Err(EngineError::Closed),
            Err(err) => Err(EngineError::Io(err)),
        }
    }

    /// Waits for the first reply `pick` accepts. An `error` reply for `cmd`
    /// fails the wait; anything else is skipped.
    async fn expect<T>(
        &self,
        cmd: &str,
        mut pick: impl FnMut(DriverMessage) -> Option<Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        let mut replies = self.replies.lock().await;
        loop {
            let message = replies.recv().await.ok_or(EngineError::Closed)?;
            if let DriverMessage::Error {
                cmd: Some(failed),
                message,
            } = &message
            {
                if failed == cmd {
                    return Err(EngineError::Protocol(format!("{cmd}: {message}")));
                }
            }
            match pick(message) {
                Some(result) => return result,
                None => trace!(cmd, "skipping unrelated helper reply"),
            }
        }
    }

    fn sink(&self) -> Option<mpsc::UnboundedSender<EngineEvent>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_sink(&self, sink: Option<mpsc::UnboundedSender<EngineEvent>>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    fn forward(&self, event: EngineEvent) {
        if let Some(sink) = self.sink() {
            let _ = sink.send(event);
        }
    }
}

async fn pump_helper_output(
    stdout: ChildStdout,
    channel: Arc<DriverChannel>,
    replies: mpsc::UnboundedSender<DriverMessage>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("reading browser helper output failed: {err}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<DriverMessage>(line) {
            Ok(message) => message,
            Err(err) => {
                debug!("ignoring unrecognized helper output ({err}): {line}");
                continue;
            }
        };
        match message {
            DriverMessage::Intercepted(request) => relay_interception(&channel, request),
            DriverMessage::Request(ev) => channel.forward(EngineEvent::RequestWillBeSent(ev)),
            DriverMessage::Response(ev) => channel.forward(EngineEvent::ResponseReceived(ev)),
            DriverMessage::Finished(ev) => channel.forward(EngineEvent::LoadingFinished(ev)),
            DriverMessage::Failed(ev) => channel.forward(EngineEvent::LoadingFailed(ev)),
            reply => {
                if replies.send(reply).is_err() {
                    break;
                }
            }
        }
    }
    debug!("browser helper output closed");
}

/// Hands the paused request to the page's subscriber and writes the verdict
/// back. With no subscriber the request is released immediately.
fn relay_interception(channel: &Arc<DriverChannel>, request: InterceptedRequest) {
    let id = request.id.0.clone();
    let (respond, verdict) = oneshot::channel();
    if let Some(sink) = channel.sink() {
        let _ = sink.send(EngineEvent::Intercepted { request, respond });
    }
    let channel = channel.clone();
    tokio::spawn(async move {
        let decision = verdict.await.unwrap_or(Decision::Continue);
        let command = match decision {
            Decision::Continue => DriverCommand::Continue { id: &id },
            Decision::Abort => DriverCommand::Abort { id: &id },
        };
        if let Err(err) = channel.send(&command).await {
            trace!(%id, "could not deliver interception verdict: {err}");
        }
    });
}

struct PlaywrightContext {
    child: Child,
    channel: Arc<DriverChannel>,
    reader: JoinHandle<()>,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
    request_timeout: Duration,
    teardown_timeout: Duration,
    closed: bool,
}

impl PlaywrightContext {
    async fn collect_stderr(&mut self) -> String {
        let _ = timeout(STDERR_GRACE, self.child.wait()).await;
        let bytes = match self.stderr_task.take() {
            Some(task) => timeout(STDERR_GRACE, task)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl BrowserContext for PlaywrightContext {
    fn open_page(
        &mut self,
        viewport: Viewport,
    ) -> BoxFuture<'_, Result<Box<dyn EnginePage>, EngineError>> {
        Box::pin(async move {
            if self.closed {
                return Err(EngineError::Closed);
            }
            self.channel
                .send(&DriverCommand::OpenPage {
                    width: viewport.width,
                    height: viewport.height,
                })
                .await?;
            let opened = self.channel.expect("openPage", |message| {
                matches!(message, DriverMessage::PageOpened).then_some(Ok(()))
            });
            timeout(self.request_timeout, opened)
                .await
                .map_err(|_| EngineError::Protocol("timed out opening a page".to_string()))??;
            Ok(Box::new(PlaywrightPage {
                channel: self.channel.clone(),
                request_timeout: self.request_timeout,
                closed: false,
            }) as Box<dyn EnginePage>)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            self.channel.set_sink(None);

            let limit = self.teardown_timeout;
            let graceful = async {
                if let Err(err) = self.channel.send(&DriverCommand::Close).await {
                    trace!("close command not delivered: {err}");
                }
                self.child.wait().await
            };
            match timeout(limit, graceful).await {
                Ok(Ok(status)) => debug!(%status, "browser helper exited"),
                Ok(Err(err)) => {
                    warn!("waiting for browser helper failed: {err}; killing");
                    let _ = self.child.kill().await;
                }
                Err(_) => {
                    warn!("browser helper did not exit within {limit:?}; killing");
                    let _ = self.child.kill().await;
                }
            }
            self.reader.abort();
            if let Some(task) = self.stderr_task.take() {
                task.abort();
            }
            Ok(())
        })
    }
}

impl Drop for PlaywrightContext {
    fn drop(&mut self) {
        // The child itself is killed by `kill_on_drop`.
        self.reader.abort();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

struct PlaywrightPage {
    channel: Arc<DriverChannel>,
    request_timeout: Duration,
    closed: bool,
}

impl EnginePage for PlaywrightPage {
    fn enable_interception(&mut self) -> BoxFuture<'_, Result<EventStream, EngineError>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.channel.set_sink(Some(tx));
            self.channel.send(&DriverCommand::Intercept).await?;
            let enabled = self.channel.expect("intercept", |message| {
                matches!(message, DriverMessage::Intercepting).then_some(Ok(()))
            });
            timeout(self.request_timeout, enabled)
                .await
                .map_err(|_| EngineError::Protocol("timed out enabling interception".to_string()))??;
            Ok(rx)
        })
    }

    fn navigate<'a>(&'a mut self, url: &'a Url) -> BoxFuture<'a, Result<Url, EngineError>> {
        Box::pin(async move {
            self.channel
                .send(&DriverCommand::Navigate { url: url.as_str() })
                .await?;
            self.channel
                .expect("navigate", |message| match message {
                    DriverMessage::Navigated { url: landed } => {
                        Some(Ok(Url::parse(&landed).unwrap_or_else(|_| url.clone())))
                    }
                    DriverMessage::NavigationFailed { message } => Some(Err(EngineError::Navigation(message))),
                    _ => None,
                })
                .await
        })
    }

    fn title(&mut self) -> BoxFuture<'_, Result<Option<String>, EngineError>> {
        Box::pin(async move {
            self.channel.send(&DriverCommand::Title).await?;
            let title = self.channel.expect("title", |message| match message {
                DriverMessage::Title { title } => Some(Ok(title)),
                _ => None,
            });
            timeout(self.request_timeout, title)
                .await
                .map_err(|_| EngineError::Protocol("timed out reading the page title".to_string()))?
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            self.channel.set_sink(None);
            self.channel.send(&DriverCommand::ClosePage).await?;
            let closed = self.channel.expect("closePage", |message| {
                matches!(message, DriverMessage::PageClosed).then_some(Ok(()))
            });
            timeout(self.request_timeout, closed)
                .await
                .map_err(|_| EngineError::Protocol("timed out closing the page".to_string()))?
        })
    }
}

#[derive(Debug, Deserialize)]
struct ScriptError {
    message: String,
}

fn map_spawn_error(err: io::Error, command: &str) -> EngineError {
    if err.kind() == io::ErrorKind::NotFound {
        EngineError::Launch(format!(
            "Unable to spawn browser helper; '{}' was not found on PATH",
            command
        ))
    } else {
        EngineError::Io(err)
    }
}

fn map_helper_error(stderr: &str) -> EngineError {
    let message = serde_json::from_str::<ScriptError>(stderr.trim())
        .map(|e| e.message)
        .unwrap_or_else(|_| stderr.trim().to_string());

    if message
        .to_ascii_lowercase()
        .contains("cannot find module 'playwright'")
    {
        return EngineError::Launch(
            "Cannot find module 'playwright'; install it with `npm install playwright`.".to_string(),
        );
    }
    if message.is_empty() {
        return EngineError::Launch("browser helper exited before the browser was ready".to_string());
    }
    EngineError::Launch(message)
}

async fn ensure_node_available(node_command: &str) -> Result<(), EngineError> {
    let mut cmd = Command::new(node_command);
    cmd.arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let status = timeout(NODE_CHECK_TIMEOUT, cmd.status())
        .await
        .map_err(|_| {
            EngineError::Launch(format!(
                "Timed out checking node availability after {:?}",
                NODE_CHECK_TIMEOUT
            ))
        })?
        .map_err(|err| map_spawn_error(err, node_command))?;

    if !status.success() {
        return Err(EngineError::Launch(format!(
            "Node command {:?} is not available (exit {})",
            node_command, status
        )));
    }
    Ok(())
}

async fn ensure_playwright_available(node_command: &str) -> Result<(), EngineError> {
    let mut cmd = Command::new(node_command);
    cmd.arg("-e")
        .arg(PLAYWRIGHT_CHECK_SCRIPT)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = timeout(NODE_CHECK_TIMEOUT, cmd.output())
        .await
        .map_err(|_| {
            EngineError::Launch(format!(
                "Timed out checking Playwright availability after {:?}",
                NODE_CHECK_TIMEOUT
            ))
        })?
        .map_err(|err| map_spawn_error(err, node_command))?;

    if !output.status.success() {
        return Err(map_helper_error(&String::from_utf8_lossy(&output.stderr)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardening_flags_come_first_and_extra_args_follow() {
        let engine = PlaywrightEngine::new(PlaywrightOptions {
            node_command: "node".to_string(),
            extra_args: vec!["--lang=en-US".to_string()],
        });
        let args = engine.chromium_args();
        assert_eq!(args.first().map(String::as_str), Some("--no-sandbox"));
        assert!(args.iter().any(|a| a == "--disable-background-networking"));
        assert_eq!(args.last().map(String::as_str), Some("--lang=en-US"));
    }

    #[test]
    fn commands_serialize_as_tagged_json_lines() {
        let json = serde_json::to_string(&DriverCommand::Abort { id: "42.7" }).unwrap();
        assert_eq!(json, r#"{"cmd":"abort","id":"42.7"}"#);
        let json = serde_json::to_string(&DriverCommand::OpenPage {
            width: 1280,
            height: 800,
        })
        .unwrap();
        assert_eq!(json, r#"{"cmd":"openPage","width":1280,"height":800}"#);
        assert_eq!(
            serde_json::to_string(&DriverCommand::ClosePage).unwrap(),
            r#"{"cmd":"closePage"}"#
        );
    }

    #[test]
    fn helper_events_deserialize() {
        let line = r#"{"event":"request","id":"1000.1","url":"https://example.com/","method":"GET",
            "headers":[{"name":"accept","value":"*/*"}],"postData":null,"resourceKind":"Document",
            "timestamp":1234.5,"wallTime":1700000000000.0,"redirectResponse":null}"#;
        match serde_json::from_str::<DriverMessage>(line).unwrap() {
            DriverMessage::Request(ev) => {
                assert_eq!(ev.id.0, "1000.1");
                assert_eq!(ev.resource_kind, crate::engine::ResourceKind::Document);
                assert_eq!(ev.headers.len(), 1);
            }
            other => panic!("unexpected message {other:?}"),
        }

        let line = r#"{"event":"response","id":"7","timestamp":10.0,"response":{"url":"https://example.com/a.js",
            "status":200,"statusText":"OK","protocol":"h2","headers":[],"mimeType":"text/javascript",
            "remoteIpAddress":"93.184.216.34","connectionId":"12","fromCache":false,
            "timing":{"requestTime":9.0,"dnsStart":-1,"dnsEnd":-1,"sendStart":0.5,"sendEnd":0.6,"receiveHeadersEnd":0.9,"pushStart":0},
            "headersSize":null}}"#;
        match serde_json::from_str::<DriverMessage>(line).unwrap() {
            DriverMessage::Response(ev) => {
                let timing = ev.response.timing.unwrap();
                assert_eq!(timing.send_start, 0.5);
                assert_eq!(timing.connect_start, -1.0);
                assert_eq!(ev.response.protocol.as_deref(), Some("h2"));
            }
            other => panic!("unexpected message {other:?}"),
        }

        assert!(matches!(
            serde_json::from_str::<DriverMessage>(r#"{"event":"navigationFailed","message":"net::ERR_NAME_NOT_RESOLVED"}"#),
            Ok(DriverMessage::NavigationFailed { .. })
        ));
        assert!(matches!(
            serde_json::from_str::<DriverMessage>(r#"{"event":"title","title":null}"#),
            Ok(DriverMessage::Title { title: None })
        ));
        assert!(matches!(
            serde_json::from_str::<DriverMessage>(r#"{"event":"pageOpened"}"#),
            Ok(DriverMessage::PageOpened)
        ));
    }

    #[test]
    fn helper_error_detects_missing_module() {
        let err = map_helper_error(r#"{"status":"error","message":"Cannot find module 'playwright'"}"#);
        match err {
            EngineError::Launch(msg) => assert!(
                msg.contains("npm install playwright"),
                "expected npm install hint, got: {msg}"
            ),
            other => panic!("expected launch error, got {other:?}"),
        }

        let err = map_helper_error("Error: Cannot find module 'playwright'\n    at Module._resolveFilename");
        assert!(matches!(err, EngineError::Launch(msg) if msg.contains("npm install playwright")));
    }

    #[test]
    fn helper_error_keeps_browser_message() {
        let err = map_helper_error(
            r#"{"status":"error","message":"browserType.launch: Executable doesn't exist at /ms-playwright/chromium"}"#,
        );
        assert!(matches!(err, EngineError::Launch(msg) if msg.contains("Executable doesn't exist")));
        assert!(matches!(map_helper_error("  "), EngineError::Launch(msg) if msg.contains("before the browser was ready")));
    }

    #[tokio::test]
    async fn ensure_node_available_fails_for_missing_binary() {
        let result = ensure_node_available("definitely-not-a-binary").await;
        assert!(matches!(result, Err(EngineError::Launch(msg)) if msg.contains("not found on PATH")));
    }

    #[tokio::test]
    async fn launch_fails_fast_for_missing_node() {
        let engine = PlaywrightEngine::new(PlaywrightOptions {
            node_command: "definitely-not-a-binary".to_string(),
            extra_args: Vec::new(),
        });
        let result = engine.launch(&LaunchOptions::default()).await;
        assert!(matches!(result, Err(EngineError::Launch(_))));
    }
}
