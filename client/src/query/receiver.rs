//! backward half of a query service streaming rpc.
//!
//! the receiver owns the response stream of one query and, in bidirectional
//! mode, the forward cursor handle. admitted responses can be consumed three
//! ways at once: indexed access into the internal page list, blocking head
//! removal, or a subscription channel of [StreamEvent]s.

use core::time::Duration;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use prost::Message;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    watch, Notify,
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use strata_proto::{QueryReject, QueryRequest, QueryResponse, QueryStreamRequest, query_response};

use crate::{
    config::{SectionConfig, StreamMode},
    error::{AlreadyStarted, Canceled, Error, Timeout},
    transport::{QuerySink, QueryTransport, ResponseStream},
};

/// lifecycle of a [QueryReceiver].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Created,
    Requested,
    Streaming,
    Completed,
    Rejected,
    Errored,
}

impl ReceiverState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Errored)
    }
}

/// receiver events in server send order, fanned out to every subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// first response observed.
    Started,
    /// one admitted data response.
    Response(QueryResponse),
    /// the service rejected the query; no data follows.
    Rejected(QueryReject),
    /// the stream finished normally.
    Completed,
    /// the stream finished with a transport error.
    Errored(String),
}

struct Shared {
    state: watch::Sender<ReceiverState>,
    responses: Mutex<VecDeque<QueryResponse>>,
    admitted: AtomicUsize,
    page_ready: Notify,
    subscribers: Mutex<Vec<UnboundedSender<StreamEvent>>>,
    page_size_hint: AtomicUsize,
    rejection: Mutex<Option<QueryReject>>,
    error: Mutex<Option<String>>,
    cursor_sent: AtomicUsize,
    forward: Mutex<Option<QuerySink>>,
    was_shutdown: AtomicBool,
    mode: StreamMode,
    log: bool,
}

impl Shared {
    fn advance(&self, to: ReceiverState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == to {
                false
            } else {
                *state = to;
                true
            }
        });
    }

    fn publish(&self, event: StreamEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // close the forward handle. every terminal transition ends here so the
    // stream cannot outlive the receiver in bidirectional mode.
    fn close_forward(&self) {
        if let Some(mut sink) = self.forward.lock().unwrap().take() {
            sink.close();
        }
    }

    fn admit(&self, response: QueryResponse) {
        let first = self.admitted.load(Ordering::Acquire) == 0;
        if first {
            self.page_size_hint.store(response.encoded_len(), Ordering::Release);
        }

        if let Some(query_response::Result::Reject(reject)) = &response.result {
            if self.log {
                tracing::debug!(reason = reject.reason, "query rejected: {}", reject.message);
            }
            *self.rejection.lock().unwrap() = Some(reject.clone());
            self.close_forward();
            self.advance(ReceiverState::Rejected);
            self.publish(StreamEvent::Rejected(reject.clone()));
            self.page_ready.notify_waiters();
            return;
        }

        self.responses.lock().unwrap().push_back(response.clone());
        self.admitted.fetch_add(1, Ordering::AcqRel);
        self.advance(ReceiverState::Streaming);
        if first {
            self.publish(StreamEvent::Started);
        }
        self.publish(StreamEvent::Response(response));
        self.page_ready.notify_one();

        // cursor driven pacing: one outstanding cursor per admitted response.
        if self.mode == StreamMode::Bidirectional {
            let forward = self.forward.lock().unwrap();
            if let Some(sink) = forward.as_ref() {
                if sink.send(QueryStreamRequest::cursor_next()).is_ok() {
                    self.cursor_sent.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
    }

    fn finish_completed(&self) {
        if self.log {
            tracing::debug!(pages = self.admitted.load(Ordering::Acquire), "query stream completed");
        }
        self.close_forward();
        self.advance(ReceiverState::Completed);
        self.publish(StreamEvent::Completed);
        self.page_ready.notify_waiters();
    }

    fn finish_errored(&self, message: String) {
        if self.log {
            tracing::debug!("query stream errored: {message}");
        }
        *self.error.lock().unwrap() = Some(message.clone());
        self.close_forward();
        self.advance(ReceiverState::Errored);
        self.publish(StreamEvent::Errored(message));
        self.page_ready.notify_waiters();
    }
}

/// response side observer of one query service streaming rpc.
pub struct QueryReceiver {
    transport: Arc<dyn QueryTransport>,
    request: QueryRequest,
    shared: Arc<Shared>,
    token: CancellationToken,
    timeout: Duration,
}

impl QueryReceiver {
    pub fn new(transport: Arc<dyn QueryTransport>, request: QueryRequest, mode: StreamMode, cfg: &SectionConfig) -> Self {
        Self::with_cancellation(transport, request, mode, cfg, CancellationToken::new())
    }

    pub fn with_cancellation(
        transport: Arc<dyn QueryTransport>,
        request: QueryRequest,
        mode: StreamMode,
        cfg: &SectionConfig,
        token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ReceiverState::Created);
        Self {
            transport,
            request,
            shared: Arc::new(Shared {
                state,
                responses: Mutex::new(VecDeque::new()),
                admitted: AtomicUsize::new(0),
                page_ready: Notify::new(),
                subscribers: Mutex::new(Vec::new()),
                page_size_hint: AtomicUsize::new(0),
                rejection: Mutex::new(None),
                error: Mutex::new(None),
                cursor_sent: AtomicUsize::new(0),
                forward: Mutex::new(None),
                was_shutdown: AtomicBool::new(false),
                mode,
                log: cfg.logging_enabled(),
            }),
            token,
            timeout: cfg.timeout(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        *self.shared.state.borrow()
    }

    /// open the rpc and begin draining responses.
    ///
    /// fails with [AlreadyStarted] on a second call. in bidirectional mode
    /// the initial query request is sent on the forward stream before any
    /// cursor operation.
    pub async fn start(&self) -> Result<(), Error> {
        let mut first = false;
        self.shared.state.send_if_modified(|state| {
            if *state == ReceiverState::Created {
                *state = ReceiverState::Requested;
                first = true;
                true
            } else {
                false
            }
        });
        if !first {
            return Err(AlreadyStarted.into());
        }
        if self.shared.log {
            tracing::debug!(
                request = %self.request.request_id,
                sources = self.request.source_names.len(),
                "starting query stream"
            );
        }

        let stream = match self.shared.mode {
            StreamMode::Unidirectional => match self.transport.open_stream(self.request.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.shared.finish_errored(e.to_string());
                    return Err(e);
                }
            },
            StreamMode::Bidirectional => {
                let (sink, stream) = match self.transport.open_bidi().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        self.shared.finish_errored(e.to_string());
                        return Err(e);
                    }
                };
                if let Err(e) = sink.send(QueryStreamRequest::query(self.request.clone())) {
                    self.shared.finish_errored(e.to_string());
                    return Err(e);
                }
                *self.shared.forward.lock().unwrap() = Some(sink);
                stream
            }
        };

        let shared = self.shared.clone();
        let token = self.token.clone();
        tokio::spawn(Self::drive(shared, stream, token));
        Ok(())
    }

    async fn drive(shared: Arc<Shared>, mut stream: ResponseStream<QueryResponse>, token: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    // a receiver initiated shutdown already finished the
                    // state machine; only an external cancel is an error.
                    if !shared.was_shutdown.load(Ordering::Acquire) {
                        shared.finish_errored("canceled".into());
                    }
                    return;
                }
                item = stream.next() => match item {
                    Some(Ok(response)) => {
                        let rejected = response.is_reject();
                        shared.admit(response);
                        if rejected {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        shared.finish_errored(e.to_string());
                        return;
                    }
                    None => {
                        shared.finish_completed();
                        return;
                    }
                }
            }
        }
    }

    async fn await_state<F>(&self, timeout: Option<Duration>, mut done: F) -> Result<(), Error>
    where
        F: FnMut(ReceiverState) -> bool,
    {
        let mut rx = self.shared.state.subscribe();
        let wait = async {
            loop {
                if done(*rx.borrow_and_update()) {
                    return Ok(());
                }
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    _ = self.token.cancelled() => return Err(Error::from(Canceled)),
                }
            }
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait).await.map_err(|_| Timeout)?,
            None => wait.await,
        }
    }

    /// wait for the first response or a terminal transition.
    pub async fn await_start(&self) -> Result<(), Error> {
        self.await_state(None, |s| !matches!(s, ReceiverState::Created | ReceiverState::Requested))
            .await
    }

    pub async fn await_start_for(&self, timeout: Duration) -> Result<(), Error> {
        self.await_state(Some(timeout), |s| {
            !matches!(s, ReceiverState::Created | ReceiverState::Requested)
        })
        .await
    }

    /// wait for completion, rejection or error.
    pub async fn await_completed(&self) -> Result<(), Error> {
        self.await_state(None, ReceiverState::is_terminal).await
    }

    pub async fn await_completed_for(&self, timeout: Duration) -> Result<(), Error> {
        self.await_state(Some(timeout), ReceiverState::is_terminal).await
    }

    /// abort the stream. in bidirectional mode a client error is reported on
    /// the forward stream before it closes. every latch releases. returns
    /// false when the receiver was never started or already finished.
    pub fn shutdown_now(&self) -> bool {
        let state = self.state();
        if state == ReceiverState::Created || state.is_terminal() {
            return false;
        }
        self.shared.was_shutdown.store(true, Ordering::Release);
        {
            let forward = self.shared.forward.lock().unwrap();
            if let Some(sink) = forward.as_ref() {
                let _ = sink.send(QueryStreamRequest::error("stream shut down by client"));
            }
        }
        self.token.cancel();
        self.shared.finish_completed();
        true
    }

    /// subscribe to receiver events. events observed before subscription are
    /// not replayed.
    pub fn subscribe(&self) -> UnboundedReceiver<StreamEvent> {
        let (tx, rx) = unbounded_channel();
        self.shared.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// admitted response at buffer index, if still buffered.
    pub fn response(&self, index: usize) -> Option<QueryResponse> {
        self.shared.responses.lock().unwrap().get(index).cloned()
    }

    /// total count of admitted data responses.
    pub fn response_count(&self) -> usize {
        self.shared.admitted.load(Ordering::Acquire)
    }

    /// count of responses still buffered (admitted minus taken).
    pub fn buffered_count(&self) -> usize {
        self.shared.responses.lock().unwrap().len()
    }

    /// remove and return the oldest buffered response, waiting up to the
    /// configured timeout while the stream is alive. resolves to `None` once
    /// the stream is terminal and the buffer is drained.
    pub async fn take_next(&self) -> Result<Option<QueryResponse>, Error> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let notified = self.shared.page_ready.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            {
                if let Some(response) = self.shared.responses.lock().unwrap().pop_front() {
                    return Ok(Some(response));
                }
                if self.state().is_terminal() {
                    return Ok(None);
                }
            }
            tokio::select! {
                _ = notified.as_mut() => {}
                _ = self.token.cancelled() => return Err(Canceled.into()),
                _ = tokio::time::sleep_until(deadline) => return Err(Timeout.into()),
            }
            notified.set(self.shared.page_ready.notified());
        }
    }

    /// serialized size of the first response, a pacing hint only. consumers
    /// of individual messages re-measure per message.
    pub fn page_size_hint(&self) -> usize {
        self.shared.page_size_hint.load(Ordering::Acquire)
    }

    /// number of cursor operations sent on the forward stream.
    pub fn cursor_count(&self) -> usize {
        self.shared.cursor_sent.load(Ordering::Acquire)
    }

    pub fn is_request_rejected(&self) -> bool {
        self.state() == ReceiverState::Rejected
    }

    pub fn is_stream_completed(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn rejection(&self) -> Option<QueryReject> {
        self.shared.rejection.lock().unwrap().clone()
    }

    pub fn error_message(&self) -> Option<String> {
        self.shared.error.lock().unwrap().clone()
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }
}
