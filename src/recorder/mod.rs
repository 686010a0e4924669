//! Trace recorder.
//!
//! Subscribes to a page's network event stream, applies the block policy to
//! intercepted requests, and accumulates one [`NetworkEvent`] per request
//! (per redirect hop). Handlers only touch the record for their own request
//! id, so events may be delivered from any number of tasks.

mod event;
mod settle;
mod timing;

pub use event::{normalize_protocol, Completion, NetworkEvent, PostBody, ResponseSummary};
pub use settle::SettleCondition;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::capture::BlockPolicy;
use crate::engine::{
    Decision, EngineEvent, EventStream, InterceptedRequest, LoadingFailed, LoadingFinished, RequestId,
    RequestWillBeSent, ResponseReceived,
};
use event::Exchange;

/// Counters reported alongside the recorded trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub aborted: usize,
    pub incomplete: usize,
    pub responses_seen: usize,
}

/// Ordered output of one recording.
#[derive(Debug, Clone)]
pub struct RecordedTrace {
    pub events: Vec<NetworkEvent>,
    pub stats: RecorderStats,
}

#[derive(Default)]
struct State {
    next_seq: u64,
    open: HashMap<RequestId, Exchange>,
    /// Redirect hops already closed because their id was reused.
    closed: Vec<Exchange>,
    aborted: HashSet<RequestId>,
    in_flight: usize,
    responses_seen: usize,
}

impl State {
    fn exchange(&mut self, id: &RequestId) -> &mut Exchange {
        let next_seq = &mut self.next_seq;
        self.open.entry(id.clone()).or_insert_with(|| {
            let seq = *next_seq;
            *next_seq += 1;
            Exchange::new(seq)
        })
    }
}

struct Inner {
    policy: BlockPolicy,
    max_post_data: usize,
    state: Mutex<State>,
    in_flight_tx: watch::Sender<usize>,
}

#[derive(Clone)]
pub struct TraceRecorder {
    inner: Arc<Inner>,
}

impl TraceRecorder {
    pub fn new(policy: BlockPolicy, max_post_data: usize) -> Self {
        let (in_flight_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                policy,
                max_post_data,
                state: Mutex::new(State::default()),
                in_flight_tx,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State) {
        self.inner.in_flight_tx.send_replace(state.in_flight);
    }

    /// Live count of allowed requests that have not finished or failed.
    pub fn in_flight(&self) -> watch::Receiver<usize> {
        self.inner.in_flight_tx.subscribe()
    }

    pub fn in_flight_now(&self) -> usize {
        *self.inner.in_flight_tx.borrow()
    }

    pub fn responses_seen(&self) -> usize {
        self.state().responses_seen
    }

    /// Allow/abort verdict for an intercepted request. Aborted ids are
    /// remembered so later notifications for them are ignored.
    pub fn decide(&self, request: &InterceptedRequest) -> Decision {
        if !self.inner.policy.blocks(request.resource_kind) {
            trace!(id = %request.id, kind = %request.resource_kind, "request allowed");
            return Decision::Continue;
        }

        let mut state = self.state();
        state.aborted.insert(request.id.clone());
        if let Some(exchange) = state.open.remove(&request.id) {
            if exchange.request.is_some() && !exchange.is_settled() {
                state.in_flight -= 1;
            }
        }
        self.publish(&state);
        debug!(id = %request.id, kind = %request.resource_kind, url = %request.url, "request blocked");
        Decision::Abort
    }

    pub fn handle(&self, event: EngineEvent) {
        match event {
            EngineEvent::Intercepted { request, respond } => {
                let decision = self.decide(&request);
                if respond.send(decision).is_err() {
                    trace!(id = %request.id, "interception responder dropped");
                }
            }
            EngineEvent::RequestWillBeSent(ev) => self.on_request(ev),
            EngineEvent::ResponseReceived(ev) => self.on_response(ev),
            EngineEvent::LoadingFinished(ev) => self.on_finished(ev),
            EngineEvent::LoadingFailed(ev) => self.on_failed(ev),
        }
    }

    pub fn on_request(&self, mut ev: RequestWillBeSent) {
        let mut state = self.state();
        if state.aborted.contains(&ev.id) {
            return;
        }

        let redirect = ev.redirect_response.take();
        let previous_hop = state.open.get(&ev.id).is_some_and(|ex| ex.request.is_some());
        if previous_hop {
            let Some(redirect) = redirect else {
                trace!(id = %ev.id, "duplicate request notification ignored");
                return;
            };
            if let Some(mut hop) = state.open.remove(&ev.id) {
                if !hop.is_settled() {
                    state.in_flight -= 1;
                }
                debug!(id = %ev.id, from = %redirect.url, to = %ev.url, status = redirect.status, "redirect");
                hop.close_as_redirect(&ev, redirect);
                state.closed.push(hop);
                state.responses_seen += 1;
            }
        }

        let exchange = state.exchange(&ev.id);
        let counts = !exchange.is_settled();
        trace!(id = %ev.id, method = %ev.method, url = %ev.url, "request sent");
        exchange.request = Some(ev);
        if counts {
            state.in_flight += 1;
        }
        self.publish(&state);
    }

    pub fn on_response(&self, ev: ResponseReceived) {
        let mut state = self.state();
        if state.aborted.contains(&ev.id) {
            return;
        }
        trace!(id = %ev.id, status = ev.response.status, "response headers");
        state.responses_seen += 1;
        state.exchange(&ev.id).response = Some((ev.timestamp, ev.response));
    }

    pub fn on_finished(&self, ev: LoadingFinished) {
        let mut state = self.state();
        if state.aborted.contains(&ev.id) {
            return;
        }
        let id = ev.id.clone();
        let exchange = state.exchange(&id);
        let was_open = exchange.request.is_some() && !exchange.is_settled();
        exchange.finished = Some(ev);
        if was_open {
            state.in_flight -= 1;
        }
        trace!(%id, "loading finished");
        self.publish(&state);
    }

    pub fn on_failed(&self, ev: LoadingFailed) {
        let mut state = self.state();
        if state.aborted.contains(&ev.id) {
            return;
        }
        let id = ev.id.clone();
        debug!(%id, error = %ev.error_text, canceled = ev.canceled, "loading failed");
        let exchange = state.exchange(&id);
        let was_open = exchange.request.is_some() && !exchange.is_settled();
        exchange.failed = Some(ev);
        if was_open {
            state.in_flight -= 1;
        }
        self.publish(&state);
    }

    /// Spawns a task feeding `events` into this recorder until detached or
    /// until the engine closes the stream.
    pub fn attach(&self, mut events: EventStream) -> Attachment {
        let recorder = self.clone();
        let stop = CancellationToken::new();
        let token = stop.clone();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        // Drain whatever was already delivered before the barrier.
                        while let Ok(event) = events.try_recv() {
                            recorder.handle(event);
                        }
                        break;
                    }
                    event = events.recv() => match event {
                        Some(event) => recorder.handle(event),
                        None => break,
                    },
                }
            }
        });
        Attachment { stop, pump }
    }

    /// Drains the recorded exchanges in request start order.
    pub fn finish(&self) -> RecordedTrace {
        let mut state = self.state();
        let mut exchanges: Vec<Exchange> = state.closed.drain(..).collect();
        exchanges.extend(state.open.drain().map(|(_, exchange)| exchange));
        exchanges.sort_by(|a, b| {
            a.start_time()
                .total_cmp(&b.start_time())
                .then(a.seq.cmp(&b.seq))
        });

        let events: Vec<NetworkEvent> = exchanges
            .into_iter()
            .filter_map(|exchange| exchange.into_event(self.inner.max_post_data))
            .collect();
        let stats = RecorderStats {
            aborted: state.aborted.len(),
            incomplete: events.iter().filter(|e| !e.is_complete()).count(),
            responses_seen: state.responses_seen,
        };
        state.in_flight = 0;
        self.publish(&state);
        RecordedTrace { events, stats }
    }
}

/// Handle to a running event pump.
pub struct Attachment {
    stop: CancellationToken,
    pump: JoinHandle<()>,
}

impl Attachment {
    /// Barrier: once this returns, every event delivered before the call has
    /// been applied and no further events will be.
    pub async fn detach(self) {
        self.stop.cancel();
        if let Err(err) = self.pump.await {
            if err.is_panic() {
                tracing::error!("recorder pump panicked: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ResourceKind, ResponseData};
    use tokio::sync::{mpsc, oneshot};

    fn intercepted(id: &str, kind: ResourceKind) -> InterceptedRequest {
        InterceptedRequest {
            id: id.into(),
            url: format!("https://example.com/{id}"),
            method: "GET".into(),
            resource_kind: kind,
        }
    }

    fn request(id: &str, ts: f64) -> RequestWillBeSent {
        RequestWillBeSent {
            id: id.into(),
            url: format!("https://example.com/{id}"),
            method: "GET".into(),
            headers: Vec::new(),
            post_data: None,
            resource_kind: ResourceKind::Script,
            timestamp: ts,
            wall_time: ts,
            redirect_response: None,
        }
    }

    fn response(url: &str, status: u16) -> ResponseData {
        ResponseData {
            url: url.into(),
            status,
            status_text: String::new(),
            protocol: Some("http/1.1".into()),
            headers: Vec::new(),
            mime_type: "text/plain".into(),
            remote_ip_address: None,
            connection_id: None,
            from_cache: false,
            timing: None,
            headers_size: None,
        }
    }

    fn finished(id: &str, ts: f64) -> LoadingFinished {
        LoadingFinished {
            id: id.into(),
            timestamp: ts,
            encoded_data_length: Some(10.0),
        }
    }

    #[test]
    fn blocked_kinds_are_aborted_and_never_recorded() {
        let recorder = TraceRecorder::new(BlockPolicy::default(), 1024);
        assert_eq!(
            recorder.decide(&intercepted("img", ResourceKind::Image)),
            Decision::Abort
        );
        assert_eq!(
            recorder.decide(&intercepted("doc", ResourceKind::Document)),
            Decision::Continue
        );
        recorder.on_request(request("img", 1.0));
        recorder.on_failed(LoadingFailed {
            id: "img".into(),
            timestamp: 2.0,
            error_text: "net::ERR_BLOCKED_BY_CLIENT".into(),
            canceled: false,
        });
        recorder.on_request(request("doc", 0.5));
        recorder.on_finished(finished("doc", 3.0));

        let trace = recorder.finish();
        assert_eq!(trace.events.len(), 1);
        assert_eq!(trace.events[0].id, RequestId::from("doc"));
        assert_eq!(trace.stats.aborted, 1);
        assert_eq!(recorder.in_flight_now(), 0);
    }

    #[test]
    fn in_flight_tracks_open_requests() {
        let recorder = TraceRecorder::new(BlockPolicy::none(), 1024);
        let rx = recorder.in_flight();
        recorder.on_request(request("a", 1.0));
        recorder.on_request(request("b", 2.0));
        assert_eq!(*rx.borrow(), 2);
        recorder.on_finished(finished("a", 3.0));
        assert_eq!(*rx.borrow(), 1);
        recorder.on_finished(finished("a", 3.5));
        assert_eq!(*rx.borrow(), 1);
        recorder.on_failed(LoadingFailed {
            id: "b".into(),
            timestamp: 4.0,
            error_text: "net::ERR_FAILED".into(),
            canceled: false,
        });
        assert_eq!(*rx.borrow(), 0);
    }

    #[test]
    fn output_is_ordered_by_request_start_not_completion() {
        let recorder = TraceRecorder::new(BlockPolicy::none(), 1024);
        recorder.on_request(request("late", 20.0));
        recorder.on_request(request("early", 10.0));
        recorder.on_request(request("tie-first", 15.0));
        recorder.on_request(request("tie-second", 15.0));
        recorder.on_finished(finished("early", 100.0));
        recorder.on_finished(finished("late", 21.0));

        let ids: Vec<String> = recorder
            .finish()
            .events
            .into_iter()
            .map(|e| e.id.0)
            .collect();
        assert_eq!(ids, vec!["early", "tie-first", "tie-second", "late"]);
    }

    #[test]
    fn completion_before_request_notification_does_not_leak_in_flight() {
        let recorder = TraceRecorder::new(BlockPolicy::none(), 1024);
        recorder.on_finished(finished("x", 5.0));
        recorder.on_request(request("x", 1.0));
        assert_eq!(recorder.in_flight_now(), 0);
        let trace = recorder.finish();
        assert_eq!(trace.events.len(), 1);
        assert!(trace.events[0].is_complete());
    }

    #[test]
    fn redirect_reusing_an_id_yields_one_record_per_hop() {
        let recorder = TraceRecorder::new(BlockPolicy::none(), 1024);
        let mut first = request("nav", 1.0);
        first.url = "http://example.com/".into();
        recorder.on_request(first);

        let mut second = request("nav", 5.0);
        second.url = "https://example.com/".into();
        second.redirect_response = Some(response("http://example.com/", 301));
        recorder.on_request(second);
        assert_eq!(recorder.in_flight_now(), 1);

        recorder.on_response(ResponseReceived {
            id: "nav".into(),
            timestamp: 8.0,
            response: response("https://example.com/", 200),
        });
        recorder.on_finished(finished("nav", 9.0));

        let trace = recorder.finish();
        assert_eq!(trace.events.len(), 2);
        let hop = trace.events[0].response.as_ref().unwrap();
        assert_eq!(hop.status, 301);
        assert_eq!(hop.redirect_url, "https://example.com/");
        assert_eq!(trace.events[1].response.as_ref().unwrap().status, 200);
        assert_eq!(trace.stats.responses_seen, 2);
    }

    #[test]
    fn unfinished_requests_are_reported_as_incomplete() {
        let recorder = TraceRecorder::new(BlockPolicy::none(), 1024);
        recorder.on_request(request("slow", 1.0));
        let trace = recorder.finish();
        assert_eq!(trace.events[0].completion, Completion::Unfinished);
        assert_eq!(trace.stats.incomplete, 1);
    }

    #[tokio::test]
    async fn attached_pump_answers_interceptions_and_detach_is_a_barrier() {
        let recorder = TraceRecorder::new(BlockPolicy::default(), 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let attachment = recorder.attach(rx);

        let (respond, verdict) = oneshot::channel();
        tx.send(EngineEvent::Intercepted {
            request: intercepted("font", ResourceKind::Font),
            respond,
        })
        .unwrap();
        assert_eq!(verdict.await.unwrap(), Decision::Abort);

        for i in 0..20 {
            let id = format!("r{i}");
            tx.send(EngineEvent::RequestWillBeSent(request(&id, i as f64)))
                .unwrap();
            tx.send(EngineEvent::LoadingFinished(finished(&id, 100.0)))
                .unwrap();
        }
        attachment.detach().await;
        assert!(tx
            .send(EngineEvent::RequestWillBeSent(request("after", 200.0)))
            .is_err());

        let trace = recorder.finish();
        assert_eq!(trace.events.len(), 20);
        assert_eq!(trace.stats.aborted, 1);
    }
}
