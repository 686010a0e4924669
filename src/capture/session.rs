use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, warn};

use crate::engine::{BrowserContext, EnginePage};
use crate::error::{CaptureError, Result};
use crate::Viewport;

/// Number of sessions that have been opened and not yet torn down.
#[derive(Debug, Clone, Default)]
pub struct SessionGauge(Arc<AtomicUsize>);

impl SessionGauge {
    pub fn current(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One browser context plus its page, bound to a single capture.
///
/// [`teardown`](Self::teardown) closes the page, then the context. If the
/// session is dropped without it (the capture future was cancelled) the
/// same teardown is spawned onto the runtime, so it runs exactly once on
/// every path. The session's concurrency permit is returned only after the
/// browser context has been closed.
pub struct CaptureSession {
    id: u64,
    context: Option<Box<dyn BrowserContext>>,
    page: Option<Box<dyn EnginePage>>,
    gauge: SessionGauge,
    permit: Option<OwnedSemaphorePermit>,
    teardown_timeout: Duration,
    torn_down: bool,
}

impl CaptureSession {
    pub(crate) fn new(
        id: u64,
        context: Box<dyn BrowserContext>,
        gauge: SessionGauge,
        permit: Option<OwnedSemaphorePermit>,
        teardown_timeout: Duration,
    ) -> Self {
        gauge.acquire();
        Self {
            id,
            context: Some(context),
            page: None,
            gauge,
            permit,
            teardown_timeout,
            torn_down: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) async fn open_page(&mut self, viewport: Viewport) -> Result<()> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| CaptureError::Launch("browser context already closed".to_string()))?;
        let page = context.open_page(viewport).await?;
        self.page = Some(page);
        Ok(())
    }

    pub(crate) fn page(&mut self) -> Result<&mut (dyn EnginePage + 'static)> {
        self.page
            .as_deref_mut()
            .ok_or_else(|| CaptureError::Launch("page is not open".to_string()))
    }

    /// Idempotent; failures are logged, never returned.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        close_all(
            self.id,
            self.page.take(),
            self.context.take(),
            self.teardown_timeout,
        )
        .await;
        self.gauge.release();
        drop(self.permit.take());
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let id = self.id;
        let page = self.page.take();
        let context = self.context.take();
        let gauge = self.gauge.clone();
        let permit = self.permit.take();
        let teardown_timeout = self.teardown_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(session = id, "session dropped; spawning teardown");
                handle.spawn(async move {
                    close_all(id, page, context, teardown_timeout).await;
                    gauge.release();
                    drop(permit);
                });
            }
            Err(_) => {
                // Engine handles kill their processes on drop.
                warn!(session = id, "session dropped outside a runtime; closing without graceful shutdown");
                drop(page);
                drop(context);
                gauge.release();
                drop(permit);
            }
        }
    }
}

async fn close_all(
    id: u64,
    page: Option<Box<dyn EnginePage>>,
    context: Option<Box<dyn BrowserContext>>,
    teardown_timeout: Duration,
) {
    if let Some(mut page) = page {
        match tokio::time::timeout(teardown_timeout, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(session = id, "closing page failed: {err}"),
            Err(_) => warn!(session = id, "closing page timed out after {teardown_timeout:?}"),
        }
    }
    if let Some(mut context) = context {
        // The context enforces its own kill deadline; this bound is a backstop.
        match tokio::time::timeout(teardown_timeout * 2, context.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(session = id, "closing browser context failed: {err}"),
            Err(_) => warn!(session = id, "closing browser context timed out"),
        }
    }
    debug!(session = id, "session torn down");
}
