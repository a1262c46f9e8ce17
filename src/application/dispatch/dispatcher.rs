//! Dispatch engine
//!
//! Owns the per-channel request pipeline of one endpoint:
//!
//! - outgoing requests are checked against the registry, then either put on
//!   the wire (when the channel is idle) or parked in the channel's waiting
//!   queue; only the head of a channel is ever on the wire
//! - inbound CALLRESULT/CALLERROR frames complete the head and release the
//!   next waiting request
//! - inbound CALLs are checked by the codec and handed to the
//!   [`InboundRouter`] on a worker task
//!
//! Frames are written and completion sinks run outside the engine's locks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::callback_queue::CallbackQueue;
use super::errors::RequestError;
use super::pending::{PendingRequest, PendingTable};
use crate::application::codec;
use crate::application::events::{ErrorEvent, EventBus};
use crate::application::ports::{InboundRouter, OutboundTransport};
use crate::application::registry::{FeatureRegistry, Profile};
use crate::domain::{OcppError, OcppErrorCode, OcppRequest, Role};
use crate::support::ocpp_frame::{MessageType, OcppFrame};

/// Single-use completion carrier for an outgoing request.
pub type ResponseSink = Box<dyn FnOnce(Result<Value, RequestError>) + Send + 'static>;

/// Channel key used by a charge point for its one link to the central system.
pub const CHARGE_POINT_CHANNEL: &str = "main";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CENTRAL_SYSTEM_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub role: Role,
    pub request_timeout: Duration,
    /// Maximum requests per channel, the one on the wire included.
    pub queue_capacity: usize,
}

impl DispatcherConfig {
    pub fn charge_point() -> Self {
        Self {
            role: Role::ChargePoint,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            queue_capacity: 1,
        }
    }

    pub fn central_system() -> Self {
        Self {
            role: Role::CentralSystem,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            queue_capacity: DEFAULT_CENTRAL_SYSTEM_QUEUE,
        }
    }
}

/// A request admitted to a channel but not yet written.
struct Outgoing {
    request_id: String,
    action: String,
    payload: Value,
    sink: ResponseSink,
}

/// The sink of a request that is on the wire.
struct InFlight {
    request_id: String,
    sink: ResponseSink,
}

/// A head already registered as in flight whose frame is not written yet.
struct Armed {
    request_id: String,
    action: String,
    frame: String,
}

type Completions = Vec<(ResponseSink, Result<Value, RequestError>)>;

fn fire(completions: Completions) {
    for (sink, result) in completions {
        sink(result);
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: DispatcherConfig,
    registry: Arc<FeatureRegistry>,
    transport: Arc<dyn OutboundTransport>,
    router: Arc<dyn InboundRouter>,
    events: EventBus,
    /// Requests admitted behind the head, per channel. Also the channel
    /// lock: taken before `callbacks` on every path that touches both, and
    /// never held across a transport write.
    waiting: Mutex<HashMap<String, VecDeque<Outgoing>>>,
    callbacks: CallbackQueue<InFlight>,
    pending: PendingTable,
    stopped: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        registry: Arc<FeatureRegistry>,
        transport: Arc<dyn OutboundTransport>,
        router: Arc<dyn InboundRouter>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                transport,
                router,
                events,
                waiting: Mutex::new(HashMap::new()),
                callbacks: CallbackQueue::new(),
                pending: PendingTable::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.inner.config.role
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.inner.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    // ── Outgoing ───────────────────────────────────────────

    /// Admit a request on `channel`.
    ///
    /// Returns the request id once the request is on the wire or queued
    /// behind the current head. Every error returned here is final: the sink
    /// is dropped without being called.
    pub fn send_request(
        &self,
        channel: &str,
        action: &str,
        payload: Value,
        sink: ResponseSink,
    ) -> Result<String, RequestError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            return Err(RequestError::Stopped);
        }

        let unsupported = || RequestError::Unsupported {
            action: action.to_string(),
            role: inner.config.role,
        };
        let feature = inner.registry.feature(action).ok_or_else(unsupported)?;
        if !feature.can_originate(inner.config.role) {
            return Err(unsupported());
        }
        feature
            .check_request(&payload)
            .map_err(|error| RequestError::Validation {
                action: action.to_string(),
                error,
            })?;

        let request = Outgoing {
            request_id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            payload,
            sink,
        };
        let request_id = request.request_id.clone();

        let armed = {
            let mut waiting = inner.waiting();
            let queued = waiting.get(channel).map_or(0, VecDeque::len);
            let in_flight = inner.callbacks.len(channel);

            if in_flight + queued >= inner.config.queue_capacity {
                debug!(channel, action, in_flight, queued, "Request queue full");
                return Err(RequestError::QueueFull {
                    channel: channel.to_string(),
                });
            }
            if in_flight > 0 || queued > 0 {
                waiting
                    .entry(channel.to_string())
                    .or_default()
                    .push_back(request);
                debug!(
                    channel,
                    action,
                    message_id = %request_id,
                    position = queued + 1,
                    "Request queued behind pending call"
                );
                return Ok(request_id);
            }
            inner.arm(channel, request)
        };

        let Armed { request_id, action, frame } = armed;
        if let Err(err) = inner.write_call(channel, &request_id, &action, frame) {
            let next = {
                let mut waiting = inner.waiting();
                // Already completed by a reply or a drain while writing.
                if inner.disarm(channel, &request_id).is_none() {
                    return Ok(request_id);
                }
                inner.promote(&mut waiting, channel)
            };
            let mut completions = Completions::new();
            inner.flush(channel, next, &mut completions);
            fire(completions);
            return Err(err);
        }
        Ok(request_id)
    }

    /// Send a typed request and wait for its typed response.
    pub async fn call<R: OcppRequest>(
        &self,
        channel: &str,
        request: R,
    ) -> Result<R::Response, RequestError> {
        let (tx, rx) = oneshot::channel();
        self.call_with::<R, _>(channel, request, move |result| {
            let _ = tx.send(result);
        })?;
        rx.await.map_err(|_| RequestError::Stopped)?
    }

    /// Send a typed request; `callback` receives the typed outcome.
    pub fn call_with<R, F>(&self, channel: &str, request: R, callback: F) -> Result<(), RequestError>
    where
        R: OcppRequest,
        F: FnOnce(Result<R::Response, RequestError>) + Send + 'static,
    {
        let payload = codec::to_payload(&request).map_err(|error| RequestError::Validation {
            action: R::ACTION.to_string(),
            error,
        })?;
        let sink: ResponseSink = Box::new(move |result| {
            callback(result.and_then(|value| {
                codec::from_payload::<R::Response>(value).map_err(RequestError::InvalidResponse)
            }))
        });
        self.send_request(channel, R::ACTION, payload, sink).map(|_| ())
    }

    // ── Inbound ────────────────────────────────────────────

    /// Process one text frame received on `channel`.
    pub fn handle_incoming(&self, channel: &str, text: &str) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!(channel, "Dispatcher stopped, dropping inbound frame");
            return;
        }

        let frame = match OcppFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                let error = err.to_ocpp_error();
                let unique_id = OcppFrame::peek_unique_id(text);
                let kind = OcppFrame::peek_message_type(text);
                warn!(channel, error = %err, ?unique_id, ?kind, "Rejected malformed frame");
                // Only a CALL is ever answered; a broken reply fails its request.
                match (&unique_id, kind) {
                    (Some(id), Some(MessageType::Call)) => {
                        self.inner
                            .write_reply(channel, "-", codec::encode_error(id, &error));
                    }
                    (Some(id), Some(MessageType::CallResult | MessageType::CallError)) => {
                        self.fail_pending(channel, id, RequestError::InvalidResponse(error.clone()));
                    }
                    _ => {}
                }
                self.inner.events.publish(ErrorEvent::Codec {
                    channel: channel.to_string(),
                    unique_id,
                    error,
                });
                return;
            }
        };

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => self.handle_call(channel, unique_id, action, payload),
            OcppFrame::CallResult { unique_id, payload } => {
                self.handle_call_result(channel, &unique_id, payload)
            }
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                let error = OcppError::from_wire(&error_code, &error_description);
                self.handle_call_error(channel, &unique_id, error)
            }
        }
    }

    fn handle_call(&self, channel: &str, unique_id: String, action: String, payload: Value) {
        let inner = &self.inner;
        metrics::counter!("ocpp_inbound_calls_total", "action" => action.clone()).increment(1);
        info!(channel, action = %action, message_id = %unique_id, "CALL received");

        let (feature, profile) = match codec::check_call(&inner.registry, &action, &payload) {
            Ok(feature) => {
                let profile = inner
                    .registry
                    .profile_for_feature(&action)
                    .map(Profile::name);
                (*feature, profile)
            }
            Err(error) => {
                warn!(channel, action = %action, message_id = %unique_id, error = %error, "CALL rejected");
                inner.write_reply(channel, &action, codec::encode_error(&unique_id, &error));
                inner.events.publish(ErrorEvent::Codec {
                    channel: channel.to_string(),
                    unique_id: Some(unique_id),
                    error,
                });
                return;
            }
        };
        let Some(profile) = profile else {
            return;
        };

        let inner = Arc::clone(inner);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let routed = inner.router.route(&channel, profile, &action, payload).await;
            let frame = match routed {
                Ok(response) => match feature.check_response(&response) {
                    Ok(()) => codec::encode_result(&unique_id, response),
                    Err(invalid) => {
                        let error = OcppError::internal(format!(
                            "handler produced an invalid {} response: {}",
                            action, invalid.description
                        ));
                        warn!(channel, action = %action, error = %error, "Handler response rejected");
                        inner.events.publish(ErrorEvent::HandlerFailed {
                            channel: channel.clone(),
                            action: action.clone(),
                            error: error.clone(),
                        });
                        codec::encode_error(&unique_id, &error)
                    }
                },
                Err(error) => {
                    if !matches!(
                        error.code,
                        OcppErrorCode::NotSupported | OcppErrorCode::NotImplemented
                    ) {
                        warn!(channel, action = %action, error = %error, "Handler failed");
                        inner.events.publish(ErrorEvent::HandlerFailed {
                            channel: channel.clone(),
                            action: action.clone(),
                            error: error.clone(),
                        });
                    } else {
                        debug!(channel, action = %action, code = %error.code, "CALL not handled");
                    }
                    codec::encode_error(&unique_id, &error)
                }
            };
            inner.write_reply(&channel, &action, frame);
        });
    }

    fn handle_call_result(&self, channel: &str, unique_id: &str, payload: Value) {
        let inner = &self.inner;
        let Some(action) = inner.pending.action_of(channel, unique_id) else {
            inner.report_orphan(channel, unique_id);
            return;
        };

        let result = codec::check_result(&inner.registry, &action, &payload)
            .map(|()| payload)
            .map_err(RequestError::InvalidResponse);
        if let Err(err) = &result {
            warn!(channel, action = %action, message_id = unique_id, error = %err, "Invalid CALLRESULT payload");
        }
        if !inner.complete(channel, unique_id, result) {
            inner.report_orphan(channel, unique_id);
        }
    }

    fn handle_call_error(&self, channel: &str, unique_id: &str, error: OcppError) {
        self.fail_pending(channel, unique_id, RequestError::CallError(error));
    }

    fn fail_pending(&self, channel: &str, unique_id: &str, error: RequestError) {
        let inner = &self.inner;
        if !inner.pending.contains(channel, unique_id) {
            inner.report_orphan(channel, unique_id);
            return;
        }
        if !inner.complete(channel, unique_id, Err(error)) {
            inner.report_orphan(channel, unique_id);
        }
    }

    // ── Cancellation ───────────────────────────────────────

    /// Complete every request of `channel`, on the wire or waiting, with
    /// `error`. Returns how many requests were cancelled.
    pub fn drain_channel(&self, channel: &str, error: RequestError) -> usize {
        let inner = &self.inner;
        let mut sinks = Vec::new();
        {
            let mut waiting = inner.waiting();
            sinks.extend(inner.callbacks.drain(channel).into_iter().map(|e| e.sink));
            inner.pending.remove_channel(channel);
            if let Some(queue) = waiting.remove(channel) {
                sinks.extend(queue.into_iter().map(|request| request.sink));
            }
        }

        let drained = sinks.len();
        if drained > 0 {
            info!(channel, drained, reason = %error, "Cancelled pending requests");
        }
        fire(sinks.into_iter().map(|sink| (sink, Err(error.clone()))).collect());
        drained
    }

    /// Reject further requests and complete every outstanding one with
    /// [`RequestError::Stopped`].
    pub fn stop(&self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut sinks = Vec::new();
        {
            let mut waiting = inner.waiting();
            sinks.extend(inner.callbacks.drain_all().into_iter().map(|(_, e)| e.sink));
            inner.pending.clear();
            for (_, queue) in waiting.drain() {
                sinks.extend(queue.into_iter().map(|request| request.sink));
            }
        }

        info!(cancelled = sinks.len(), "Dispatcher stopped");
        fire(sinks.into_iter().map(|sink| (sink, Err(RequestError::Stopped))).collect());
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    // ── Introspection ──────────────────────────────────────

    /// Requests currently on the wire for `channel` (0 or 1).
    pub fn in_flight(&self, channel: &str) -> usize {
        self.inner.callbacks.len(channel)
    }

    /// Requests admitted on `channel` but not yet written.
    pub fn queued(&self, channel: &str) -> usize {
        self.inner.waiting().get(channel).map_or(0, VecDeque::len)
    }
}

impl Inner {
    fn waiting(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Outgoing>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `request` as the head of `channel`: its sink and its pending
    /// entry are in place before the frame is written, so a reply racing the
    /// write finds them. Must be called with the channel lock held and no
    /// request in flight.
    fn arm(&self, channel: &str, request: Outgoing) -> Armed {
        let Outgoing {
            request_id,
            action,
            payload,
            sink,
        } = request;

        self.callbacks.enqueue(
            channel,
            InFlight {
                request_id: request_id.clone(),
                sink,
            },
        );
        self.pending
            .insert(channel, &request_id, PendingRequest::new(&action, None));
        let frame = codec::encode_call(&request_id, &action, payload);
        Armed {
            request_id,
            action,
            frame,
        }
    }

    /// Undo [`Inner::arm`] after a failed write. `None` when the request was
    /// completed in the meantime. Must be called with the channel lock held.
    fn disarm(&self, channel: &str, request_id: &str) -> Option<ResponseSink> {
        let entry = self
            .callbacks
            .dequeue_if(channel, |head| head.request_id == request_id)?;
        self.pending.remove(channel, request_id);
        Some(entry.sink)
    }

    /// Arm the next waiting request of an idle channel.
    fn promote(
        &self,
        waiting: &mut HashMap<String, VecDeque<Outgoing>>,
        channel: &str,
    ) -> Option<Armed> {
        let next = waiting.get_mut(channel).and_then(VecDeque::pop_front)?;
        if waiting.get(channel).is_some_and(VecDeque::is_empty) {
            waiting.remove(channel);
        }
        Some(self.arm(channel, next))
    }

    /// Write an armed CALL and start its timeout.
    fn write_call(
        self: &Arc<Self>,
        channel: &str,
        request_id: &str,
        action: &str,
        frame: String,
    ) -> Result<(), RequestError> {
        match self.transport.write(channel, frame) {
            Ok(()) => {
                info!(channel, action, message_id = request_id, "CALL sent");
                let timer = self.spawn_timer(channel, request_id);
                self.pending.attach_timer(channel, request_id, timer);
                Ok(())
            }
            Err(err) => {
                warn!(channel, action, message_id = request_id, error = %err, "Failed to send CALL");
                metrics::counter!(
                    "ocpp_requests_total",
                    "action" => action.to_string(),
                    "outcome" => "send_failed"
                )
                .increment(1);
                Err(RequestError::SendFailed(err.to_string()))
            }
        }
    }

    /// Write `next`, and after each failed write the request behind it,
    /// until one is on the wire or the channel is empty. Failed requests are
    /// completed through `completions`.
    fn flush(self: &Arc<Self>, channel: &str, mut next: Option<Armed>, completions: &mut Completions) {
        while let Some(Armed {
            request_id,
            action,
            frame,
        }) = next.take()
        {
            let Err(err) = self.write_call(channel, &request_id, &action, frame) else {
                return;
            };
            self.events.publish(ErrorEvent::SendFailed {
                channel: channel.to_string(),
                action: action.clone(),
                reason: err.to_string(),
            });

            let mut waiting = self.waiting();
            if let Some(sink) = self.disarm(channel, &request_id) {
                completions.push((sink, Err(err)));
                next = self.promote(&mut waiting, channel);
            }
        }
    }

    fn spawn_timer(self: &Arc<Self>, channel: &str, request_id: &str) -> tokio::task::AbortHandle {
        let inner = Arc::clone(self);
        let channel = channel.to_string();
        let request_id = request_id.to_string();
        let timeout = self.config.request_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            inner.expire(&channel, &request_id);
        })
        .abort_handle()
    }

    fn expire(self: &Arc<Self>, channel: &str, request_id: &str) {
        let Some(action) = self.pending.action_of(channel, request_id) else {
            return;
        };
        let timed_out = RequestError::Timeout {
            action: action.clone(),
        };
        if self.complete(channel, request_id, Err(timed_out)) {
            self.events.publish(ErrorEvent::TimedOut {
                channel: channel.to_string(),
                action,
                unique_id: request_id.to_string(),
            });
        }
    }

    /// Complete the head of `channel` if it is `request_id`, then write the
    /// next waiting request. Returns `false` when `request_id` was not the
    /// request on the wire.
    fn complete(
        self: &Arc<Self>,
        channel: &str,
        request_id: &str,
        result: Result<Value, RequestError>,
    ) -> bool {
        let mut completions = Completions::new();
        let next = {
            let mut waiting = self.waiting();
            let Some(entry) = self
                .callbacks
                .dequeue_if(channel, |head| head.request_id == request_id)
            else {
                return false;
            };

            if let Some(pending) = self.pending.remove(channel, request_id) {
                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.outcome(),
                };
                let elapsed = pending.elapsed();
                metrics::histogram!("ocpp_request_duration_seconds", "action" => pending.action.clone())
                    .record(elapsed.as_secs_f64());
                metrics::counter!("ocpp_requests_total", "action" => pending.action.clone(), "outcome" => outcome)
                    .increment(1);
                info!(
                    channel,
                    action = %pending.action,
                    message_id = request_id,
                    outcome,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request completed"
                );
            }

            completions.push((entry.sink, result));
            self.promote(&mut waiting, channel)
        };
        self.flush(channel, next, &mut completions);
        fire(completions);
        true
    }

    fn write_reply(&self, channel: &str, action: &str, frame: String) {
        if let Err(err) = self.transport.write(channel, frame) {
            warn!(channel, action, error = %err, "Failed to write reply");
            self.events.publish(ErrorEvent::SendFailed {
                channel: channel.to_string(),
                action: action.to_string(),
                reason: err.to_string(),
            });
        }
    }

    fn report_orphan(&self, channel: &str, unique_id: &str) {
        warn!(channel, message_id = unique_id, "Dropping response with no pending request");
        self.events.publish(ErrorEvent::OrphanResponse {
            channel: channel.to_string(),
            unique_id: unique_id.to_string(),
        });
    }
}
