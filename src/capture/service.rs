use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

use super::request::{BlockPolicy, CaptureRequest};
use super::session::{CaptureSession, SessionGauge};
use crate::engine::{LaunchOptions, RenderingEngine};
use crate::error::{CaptureError, NavigationFailureKind, Result, TimeoutKind};
use crate::har::{normalize, Har, PageMetadata};
use crate::recorder::{SettleCondition, TraceRecorder};
use crate::Viewport;

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 4;
pub const DEFAULT_MAX_POST_DATA_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub viewport: Viewport,
    pub launch: LaunchOptions,
    pub settle: SettleCondition,
    /// Budget for requests built through [`CaptureService::request`].
    pub default_timeout: Duration,
    pub default_block_policy: BlockPolicy,
    pub max_concurrent_sessions: usize,
    pub max_post_data_bytes: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            launch: LaunchOptions::default(),
            settle: SettleCondition::default(),
            default_timeout: DEFAULT_CAPTURE_TIMEOUT,
            default_block_policy: BlockPolicy::default(),
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            max_post_data_bytes: DEFAULT_MAX_POST_DATA_BYTES,
        }
    }
}

/// Title, host and landing URL of the captured page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub title: String,
    pub hostname: String,
    pub final_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    pub entries: usize,
    pub aborted: usize,
    pub incomplete: usize,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub har: Har,
    pub page: PageSummary,
    pub stats: CaptureStats,
}

/// Runs captures against one rendering engine, at most
/// `max_concurrent_sessions` at a time.
#[derive(Clone)]
pub struct CaptureService {
    engine: Arc<dyn RenderingEngine>,
    options: CaptureOptions,
    semaphore: Arc<Semaphore>,
    gauge: SessionGauge,
    next_session: Arc<AtomicU64>,
}

impl CaptureService {
    pub fn new(engine: Arc<dyn RenderingEngine>, options: CaptureOptions) -> Self {
        let permits = options.max_concurrent_sessions.max(1);
        Self {
            engine,
            options,
            semaphore: Arc::new(Semaphore::new(permits)),
            gauge: SessionGauge::default(),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Sessions currently holding a browser context.
    pub fn active_sessions(&self) -> usize {
        self.gauge.current()
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Builds a request with the service's default timeout and block policy.
    pub fn request(&self, url: &str) -> Result<CaptureRequest> {
        CaptureRequest::new(
            url,
            self.options.default_timeout,
            self.options.default_block_policy.clone(),
        )
    }

    pub async fn capture(&self, request: CaptureRequest) -> Result<CaptureOutcome> {
        self.capture_with_cancel(request, CancellationToken::new()).await
    }

    /// Like [`capture`](Self::capture), but gives up as soon as `cancel` fires.
    /// The session is torn down either way.
    pub async fn capture_with_cancel(
        &self,
        request: CaptureRequest,
        cancel: CancellationToken,
    ) -> Result<CaptureOutcome> {
        let permit = tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => permit
                .map_err(|_| CaptureError::Config("capture service unavailable".to_string()))?,
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
        };

        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("capture", session = session_id, url = %request.url());
        self.run(session_id, permit, &request, &cancel).instrument(span).await
    }

    /// `permit` moves into the session once the browser is up; until then it
    /// is released with this frame.
    async fn run(
        &self,
        session_id: u64,
        permit: OwnedSemaphorePermit,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<CaptureOutcome> {
        let started = Instant::now();
        let launch = &self.options.launch;
        let context = tokio::select! {
            launched = tokio::time::timeout(launch.launch_timeout, self.engine.launch(launch)) => {
                match launched {
                    Ok(context) => context?,
                    Err(_) => {
                        return Err(CaptureError::Launch(format!(
                            "{} browser did not start within {:?}",
                            self.engine.name(),
                            launch.launch_timeout
                        )))
                    }
                }
            }
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
        };
        let mut session = CaptureSession::new(
            session_id,
            context,
            self.gauge.clone(),
            Some(permit),
            launch.teardown_timeout,
        );
        debug!(engine = self.engine.name(), "session opened");

        let result = tokio::select! {
            result = self.drive(&mut session, request, started) => result,
            _ = cancel.cancelled() => Err(CaptureError::Cancelled),
        };
        session.teardown().await;

        match &result {
            Ok(outcome) => info!(
                entries = outcome.stats.entries,
                aborted = outcome.stats.aborted,
                incomplete = outcome.stats.incomplete,
                elapsed = ?outcome.stats.elapsed,
                "capture finished"
            ),
            Err(err) => warn!("capture failed: {err}"),
        }
        result
    }

    async fn drive(
        &self,
        session: &mut CaptureSession,
        request: &CaptureRequest,
        started: Instant,
    ) -> Result<CaptureOutcome> {
        session.open_page(self.options.viewport).await?;
        let events = session.page()?.enable_interception().await?;

        let recorder = TraceRecorder::new(request.block_policy().clone(), self.options.max_post_data_bytes);
        let attachment = recorder.attach(events);

        let started_wall_ms = chrono::Utc::now().timestamp_millis() as f64;
        let navigation_started = Instant::now();
        let budget = request.timeout();
        let settle = self.options.settle;
        let mut on_load_ms = None;

        debug!(budget = ?budget, block = %request.block_policy(), "navigating");
        let navigated = tokio::time::timeout(budget, async {
            let landed = session.page()?.navigate(request.url()).await?;
            on_load_ms = Some(navigation_started.elapsed().as_secs_f64() * 1000.0);
            debug!(%landed, "load event; waiting for network to settle");
            settle.wait(recorder.in_flight()).await;
            Ok::<Url, CaptureError>(landed)
        })
        .await;

        let final_url = match navigated {
            Ok(Ok(url)) => url,
            Ok(Err(err)) => {
                attachment.detach().await;
                return Err(err);
            }
            Err(_) => {
                attachment.detach().await;
                let kind = if recorder.responses_seen() > 0 {
                    TimeoutKind::SlowSite {
                        in_flight: recorder.in_flight_now(),
                    }
                } else {
                    TimeoutKind::Hang
                };
                return Err(CaptureError::Timeout { kind, budget });
            }
        };

        let title_limit = self.options.launch.teardown_timeout;
        let title = match tokio::time::timeout(title_limit, session.page()?.title()).await {
            Ok(Ok(title)) => title,
            Ok(Err(err)) => {
                warn!("reading page title failed: {err}");
                None
            }
            Err(_) => {
                warn!("reading page title timed out after {title_limit:?}");
                None
            }
        };
        attachment.detach().await;
        let trace = recorder.finish();

        if trace.events.is_empty() {
            return Err(CaptureError::Navigation {
                kind: NavigationFailureKind::Other,
                message: format!("navigation to {} finished without any recorded network activity", request.url()),
            });
        }

        let hostname = request.hostname().to_string();
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| hostname.clone());
        let page = PageMetadata {
            id: PageMetadata::DEFAULT_ID.to_string(),
            title: title.clone(),
            started_wall_ms,
            on_content_load_ms: None,
            on_load_ms,
        };
        let har = normalize(&trace.events, &page);

        Ok(CaptureOutcome {
            stats: CaptureStats {
                entries: har.log.entries.len(),
                aborted: trace.stats.aborted,
                incomplete: trace.stats.incomplete,
                elapsed: started.elapsed(),
            },
            har,
            page: PageSummary {
                title,
                hostname,
                final_url: final_url.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ResourceKind, ScriptedEngine, ScriptedResource, SitePlan};

    fn fast_options() -> CaptureOptions {
        CaptureOptions {
            settle: SettleCondition {
                max_inflight: 2,
                quiet_window: Duration::from_millis(20),
            },
            ..CaptureOptions::default()
        }
    }

    #[test]
    fn semaphore_never_zero() {
        let service = CaptureService::new(
            Arc::new(ScriptedEngine::new(SitePlan::new())),
            CaptureOptions {
                max_concurrent_sessions: 0,
                ..CaptureOptions::default()
            },
        );
        assert_eq!(service.available_permits(), 1);
    }

    #[test]
    fn request_uses_service_defaults() {
        let service = CaptureService::new(Arc::new(ScriptedEngine::new(SitePlan::new())), fast_options());
        let request = service.request("example.com").unwrap();
        assert_eq!(request.timeout(), DEFAULT_CAPTURE_TIMEOUT);
        assert!(request.block_policy().blocks(ResourceKind::Image));
        assert!(service.request("ftp://example.com").is_err());
    }

    #[tokio::test]
    async fn title_falls_back_to_hostname() {
        let engine = ScriptedEngine::new(SitePlan::new().untitled());
        let service = CaptureService::new(Arc::new(engine), fast_options());
        let outcome = service
            .capture(service.request("untitled.example").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.page.title, "untitled.example");
        assert_eq!(outcome.har.log.pages[0].title, "untitled.example");
        assert_eq!(outcome.page.final_url, "https://untitled.example/");
    }

    #[tokio::test]
    async fn stats_count_aborted_requests() {
        let engine = ScriptedEngine::new(SitePlan::new().with_resources([
            ScriptedResource::new("/a.js", ResourceKind::Script),
            ScriptedResource::new("/b.png", ResourceKind::Image),
            ScriptedResource::new("/c.woff2", ResourceKind::Font),
        ]));
        let service = CaptureService::new(Arc::new(engine), fast_options());
        let outcome = service
            .capture(service.request("example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.stats.entries, 2);
        assert_eq!(outcome.stats.aborted, 2);
        assert_eq!(outcome.stats.incomplete, 0);
        assert!(outcome.har.log.pages[0].page_timings.on_load >= 0.0);
    }
}
