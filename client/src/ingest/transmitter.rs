//! ingestion transmission.
//!
//! the transmitter registers the data provider, drains the transmission
//! buffer through a router and fans requests out over one or more forward
//! streams. all pieces of one decomposed frame ride the same stream;
//! distinct request ids may use any stream. acknowledgements and exceptions
//! collect on the transmitter for inspection.

use core::time::Duration;

use std::{
    collections::{hash_map::DefaultHasher, BTreeSet, HashMap},
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
    task::JoinHandle,
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use strata_proto::{IngestDataRequest, IngestDataResponse, RegisterProviderRequest};

use crate::{
    buffer::{BoundedBuffer, Polled},
    config::Config,
    error::{AlreadyStarted, Error, InitializationError, NotOpen, Timeout},
    frame::IngestFrame,
    ingest::processor::{FrameFailure, FrameProcessor},
    transport::{IngestSink, IngestTransport, ResponseStream},
};

/// provider identity presented at stream open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRegistration {
    pub name: String,
    pub attributes: HashMap<String, String>,
}

impl ProviderRegistration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// lifecycle of an [IngestTransmitter].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitterState {
    Created,
    Open,
    Closed,
    Terminated,
}

/// transmitter events in arrival order, fanned out to every subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum TransmitterEvent {
    /// provider registered, forward streams opened.
    Opened { provider_id: u32 },
    /// one acknowledgement or exception arrived.
    Response(IngestDataResponse),
    /// the pipeline drained and the forward streams closed.
    Closed,
    /// terminal shutdown.
    Terminated,
    /// a response stream failed below the transport.
    Errored(String),
}

struct Shared {
    provider_id: AtomicU32,
    responses: Mutex<Vec<IngestDataResponse>>,
    request_ids: Mutex<BTreeSet<String>>,
    transmission_count: AtomicUsize,
    subscribers: Mutex<Vec<UnboundedSender<TransmitterEvent>>>,
    log: bool,
}

impl Shared {
    fn publish(&self, event: TransmitterEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

struct Streams {
    router: JoinHandle<()>,
    writers: Vec<JoinHandle<()>>,
    readers: Vec<JoinHandle<()>>,
}

/// forward half of the ingestion pipeline over 1..K streams.
pub struct IngestTransmitter {
    transport: Arc<dyn IngestTransport>,
    cfg: Config,
    buffer: Arc<BoundedBuffer<IngestDataRequest>>,
    processor: FrameProcessor,
    shared: Arc<Shared>,
    state: watch::Sender<TransmitterState>,
    streams: Mutex<Option<Streams>>,
    token: CancellationToken,
}

impl IngestTransmitter {
    pub fn new(transport: Arc<dyn IngestTransport>, cfg: &Config) -> Self {
        let token = CancellationToken::new();
        let buffer = Arc::new(BoundedBuffer::with_cancellation(
            cfg.ingestion().buffer_capacity(),
            cfg.ingestion().backpressure(),
            token.child_token(),
        ));
        let processor = FrameProcessor::new(cfg, buffer.clone());
        let (state, _) = watch::channel(TransmitterState::Created);
        Self {
            transport,
            cfg: cfg.clone(),
            buffer,
            processor,
            shared: Arc::new(Shared {
                provider_id: AtomicU32::new(0),
                responses: Mutex::new(Vec::new()),
                request_ids: Mutex::new(BTreeSet::new()),
                transmission_count: AtomicUsize::new(0),
                subscribers: Mutex::new(Vec::new()),
                log: cfg.ingestion().logging_enabled(),
            }),
            state,
            streams: Mutex::new(None),
            token,
        }
    }

    pub fn state(&self) -> TransmitterState {
        *self.state.borrow()
    }

    /// register the provider and open the forward streams.
    ///
    /// returns the provider unique identifier stamped into every request.
    pub async fn open_stream(&self, registration: ProviderRegistration) -> Result<u32, Error> {
        let mut first = false;
        self.state.send_if_modified(|state| {
            if *state == TransmitterState::Created {
                *state = TransmitterState::Open;
                first = true;
                true
            } else {
                false
            }
        });
        if !first {
            return Err(AlreadyStarted.into());
        }

        let response = self
            .transport
            .register_provider(RegisterProviderRequest {
                provider_name: registration.name,
                attributes: registration.attributes,
            })
            .await
            .map_err(|e| {
                self.state.send_replace(TransmitterState::Terminated);
                Error::from(InitializationError(format!("provider registration failed: {e}")))
            })?;
        let provider_id = response.provider_id;
        self.shared.provider_id.store(provider_id, Ordering::Release);
        if self.shared.log {
            tracing::debug!(provider = provider_id, "provider registered, opening streams");
        }

        self.buffer.activate()?;

        let stream_count = self.cfg.ingestion_stream_count();
        let mut route_txs = Vec::with_capacity(stream_count);
        let mut writers = Vec::with_capacity(stream_count);
        let mut readers = Vec::with_capacity(stream_count);
        for _ in 0..stream_count {
            let (sink, responses) = self.transport.open_ingest(self.cfg.ingestion_stream_mode()).await.map_err(|e| {
                self.state.send_replace(TransmitterState::Terminated);
                Error::from(InitializationError(format!("opening ingestion stream failed: {e}")))
            })?;
            let (route_tx, route_rx) = unbounded_channel();
            route_txs.push(route_tx);
            writers.push(tokio::spawn(write_stream(route_rx, sink, self.shared.clone())));
            readers.push(tokio::spawn(read_stream(responses, self.shared.clone(), self.token.clone())));
        }

        let router = tokio::spawn(route(self.buffer.clone(), route_txs));
        *self.streams.lock().unwrap() = Some(Streams {
            router,
            writers,
            readers,
        });
        self.shared.publish(TransmitterEvent::Opened { provider_id });
        Ok(provider_id)
    }

    /// subscribe to transmitter events. events observed before subscription
    /// are not replayed.
    pub fn subscribe(&self) -> UnboundedReceiver<TransmitterEvent> {
        let (tx, rx) = unbounded_channel();
        self.shared.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// submit one frame for transmission.
    ///
    /// with back-pressure mirroring enabled the call waits for buffer
    /// capacity before handing the frame to the processor.
    pub async fn ingest(&self, frame: IngestFrame) -> Result<(), Error> {
        if self.state() != TransmitterState::Open {
            return Err(NotOpen.into());
        }
        self.shared
            .request_ids
            .lock()
            .unwrap()
            .insert(frame.request_id().to_string());
        if self.cfg.backpressure_mirror() {
            self.buffer.await_queue_ready().await?;
        }
        let provider_id = self.shared.provider_id.load(Ordering::Acquire);
        self.processor.submit(frame, provider_id).await
    }

    /// drain the pipeline, half close the forward streams and wait for all
    /// outstanding responses within the configured timeout.
    pub async fn close_stream(&self) -> Result<(), Error> {
        self.close_with(self.cfg.ingestion().timeout(), false).await
    }

    /// half close immediately, discard the unsent tail and collect whatever
    /// responses arrive within the configured timeout.
    pub async fn close_stream_now(&self) -> Result<(), Error> {
        self.close_with(self.cfg.ingestion().timeout(), true).await
    }

    async fn close_with(&self, timeout: Duration, discard: bool) -> Result<(), Error> {
        let mut closing = false;
        self.state.send_if_modified(|state| {
            if *state == TransmitterState::Open {
                *state = TransmitterState::Closed;
                closing = true;
                true
            } else {
                false
            }
        });
        if !closing {
            return Err(NotOpen.into());
        }

        if discard {
            let dropped = self.buffer.shutdown_now();
            if self.shared.log && !dropped.is_empty() {
                tracing::debug!(count = dropped.len(), "discarding unsent requests");
            }
            self.processor.close().await;
        } else {
            self.processor.close().await;
            self.buffer.shutdown();
        }

        let Some(streams) = self.streams.lock().unwrap().take() else {
            return Ok(());
        };
        let drained = tokio::time::timeout(timeout, async {
            let _ = streams.router.await;
            for writer in streams.writers {
                let _ = writer.await;
            }
            for reader in streams.readers {
                let _ = reader.await;
            }
        })
        .await;
        if drained.is_err() {
            // outstanding rpcs are cut loose; their responses are lost.
            self.token.cancel();
            return Err(Timeout.into());
        }
        self.shared.publish(TransmitterEvent::Closed);
        Ok(())
    }

    /// terminal one way transition. an open pipeline is drained first.
    /// repeated calls are no-ops.
    pub async fn shutdown(&self) -> Result<(), Error> {
        match self.state() {
            TransmitterState::Terminated => Ok(()),
            TransmitterState::Open => {
                let result = self.close_stream().await;
                self.state.send_replace(TransmitterState::Terminated);
                self.shared.publish(TransmitterEvent::Terminated);
                result
            }
            _ => {
                self.state.send_replace(TransmitterState::Terminated);
                self.shared.publish(TransmitterEvent::Terminated);
                Ok(())
            }
        }
    }

    /// terminate immediately: cancel in flight rpcs and drop queued requests.
    pub fn shutdown_now(&self) {
        if self.state() == TransmitterState::Terminated {
            return;
        }
        self.token.cancel();
        self.buffer.shutdown_now();
        if let Some(streams) = self.streams.lock().unwrap().take() {
            streams.router.abort();
            for writer in &streams.writers {
                writer.abort();
            }
            for reader in &streams.readers {
                reader.abort();
            }
        }
        self.state.send_replace(TransmitterState::Terminated);
        self.shared.publish(TransmitterEvent::Terminated);
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() == TransmitterState::Terminated
    }

    /// wait for the terminal state.
    pub async fn await_termination(&self, timeout: Duration) -> Result<(), Error> {
        let mut rx = self.state.subscribe();
        tokio::time::timeout(timeout, async {
            loop {
                if *rx.borrow_and_update() == TransmitterState::Terminated {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .map_err(|_| Timeout.into())
    }

    /// queued request count of the transmission buffer.
    pub fn queue_size(&self) -> usize {
        self.buffer.len()
    }

    /// queued serialized bytes of the transmission buffer.
    pub fn queue_allocation(&self) -> usize {
        self.buffer.allocation()
    }

    /// requests handed to the transport so far.
    pub fn transmission_count(&self) -> usize {
        self.shared.transmission_count.load(Ordering::Acquire)
    }

    /// union of client request ids offered to [IngestTransmitter::ingest].
    pub fn client_request_ids(&self) -> Vec<String> {
        self.shared.request_ids.lock().unwrap().iter().cloned().collect()
    }

    /// every response received so far, acknowledgements and exceptions.
    pub fn ingestion_responses(&self) -> Vec<IngestDataResponse> {
        self.shared.responses.lock().unwrap().clone()
    }

    /// subset of responses carrying an exception status.
    pub fn ingestion_exceptions(&self) -> Vec<IngestDataResponse> {
        self.shared
            .responses
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.is_exception())
            .cloned()
            .collect()
    }

    pub fn failed_frame_decompositions(&self) -> Vec<FrameFailure> {
        self.processor.decomposition_failures()
    }

    pub fn failed_frame_conversions(&self) -> Vec<FrameFailure> {
        self.processor.conversion_failures()
    }
}

// base id of a request: the original frame id with any `-k/n` piece suffix
// stripped. keeps all pieces of one frame on one stream.
fn base_id(request_id: &str) -> &str {
    if let Some((base, suffix)) = request_id.rsplit_once('-') {
        if let Some((k, n)) = suffix.split_once('/') {
            if !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit()) && n.bytes().all(|b| b.is_ascii_digit()) {
                return base;
            }
        }
    }
    request_id
}

fn stream_index(request_id: &str, streams: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    base_id(request_id).hash(&mut hasher);
    (hasher.finish() % streams as u64) as usize
}

// drain the buffer and dispatch each request to its stream writer.
async fn route(buffer: Arc<BoundedBuffer<IngestDataRequest>>, route_txs: Vec<UnboundedSender<IngestDataRequest>>) {
    loop {
        match buffer.take().await {
            Polled::Item(req) => {
                let index = stream_index(&req.client_request_id, route_txs.len());
                if route_txs[index].send(req).is_err() {
                    tracing::debug!(stream = index, "stream writer gone, dropping request");
                }
            }
            Polled::Closed | Polled::Canceled => return,
            Polled::Empty | Polled::TimedOut => unreachable!("take does not time out"),
        }
    }
    // route_txs drop here; writers observe the closed channel and half close.
}

async fn write_stream(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<IngestDataRequest>,
    mut sink: IngestSink,
    shared: Arc<Shared>,
) {
    while let Some(req) = rx.recv().await {
        match sink.send(req) {
            Ok(()) => {
                shared.transmission_count.fetch_add(1, Ordering::AcqRel);
            }
            Err(e) => {
                if shared.log {
                    tracing::debug!("forward stream refused request: {e}");
                }
            }
        }
    }
    sink.close();
}

async fn read_stream(mut responses: ResponseStream<IngestDataResponse>, shared: Arc<Shared>, token: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            item = responses.next() => match item {
                Some(Ok(response)) => {
                    shared.responses.lock().unwrap().push(response.clone());
                    shared.publish(TransmitterEvent::Response(response));
                }
                Some(Err(e)) => {
                    if shared.log {
                        tracing::debug!("ingestion response stream error: {e}");
                    }
                    shared.publish(TransmitterEvent::Errored(e.to_string()));
                }
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        config::StreamMode,
        frame::{ColumnValues, FrameColumn, TimeAxis},
        transport::local::LocalPlatform,
    };

    fn frame(id: &str, rows: usize, cols: usize) -> IngestFrame {
        let axis = TimeAxis::clock(0, 10, rows).unwrap();
        let columns = (0..cols)
            .map(|c| {
                FrameColumn::new(
                    format!("col{c}"),
                    ColumnValues::F64((0..rows).map(|r| r as f64).collect()),
                )
            })
            .collect();
        IngestFrame::new(id, axis, columns).unwrap()
    }

    fn transmitter(platform: &LocalPlatform, cfg: &Config) -> IngestTransmitter {
        IngestTransmitter::new(Arc::new(platform.clone()), cfg)
    }

    #[test]
    fn base_id_strips_piece_suffix() {
        assert_eq!(base_id("req-1/3"), "req");
        assert_eq!(base_id("req-12/20"), "req");
        assert_eq!(base_id("req"), "req");
        assert_eq!(base_id("req-abc/3"), "req-abc/3");
        assert_eq!(base_id("a-b-2/4"), "a-b");
    }

    #[test]
    fn stream_affinity_is_stable() {
        for streams in [1usize, 2, 5] {
            let whole = stream_index("frame-x", streams);
            assert_eq!(stream_index("frame-x-1/4", streams), whole);
            assert_eq!(stream_index("frame-x-4/4", streams), whole);
        }
    }

    #[tokio::test]
    async fn ingest_before_open_fails() {
        let platform = LocalPlatform::new();
        let tx = transmitter(&platform, &Config::new());
        let err = tx.ingest(frame("r1", 2, 2)).await.unwrap_err();
        assert!(err.downcast_ref::<NotOpen>().is_some());
    }

    #[tokio::test]
    async fn open_twice_fails() {
        let platform = LocalPlatform::new();
        let tx = transmitter(&platform, &Config::new());
        tx.open_stream(ProviderRegistration::new("PRV1")).await.unwrap();
        let err = tx.open_stream(ProviderRegistration::new("PRV1")).await.unwrap_err();
        assert!(err.downcast_ref::<AlreadyStarted>().is_some());
    }

    #[tokio::test]
    async fn bidi_round_trip_collects_acks() {
        let platform = LocalPlatform::new();
        let tx = transmitter(&platform, &Config::new());
        let provider_id = tx.open_stream(ProviderRegistration::new("PRV1").attribute("site", "lab")).await.unwrap();
        assert!(provider_id > 0);

        for i in 0..4 {
            tx.ingest(frame(&format!("r{i}"), 4, 2)).await.unwrap();
        }
        tx.close_stream().await.unwrap();

        assert_eq!(tx.transmission_count(), 4);
        assert_eq!(tx.ingestion_responses().len(), 4);
        assert!(tx.ingestion_exceptions().is_empty());
        assert_eq!(tx.client_request_ids().len(), 4);
        assert_eq!(tx.queue_size(), 0);
        assert_eq!(platform.ingested_requests().len(), 4);
    }

    #[tokio::test]
    async fn uni_mode_acks_arrive_after_close() {
        let platform = LocalPlatform::new();
        let mut cfg = Config::new();
        cfg.stream_mode(StreamMode::Unidirectional);
        let tx = transmitter(&platform, &cfg);
        tx.open_stream(ProviderRegistration::new("PRV1")).await.unwrap();

        tx.ingest(frame("r1", 4, 2)).await.unwrap();
        tx.close_stream().await.unwrap();
        assert_eq!(tx.ingestion_responses().len(), 1);
    }

    #[tokio::test]
    async fn multi_stream_keeps_frame_affinity() {
        let platform = LocalPlatform::new();
        let small = frame("probe", 40, 3);
        let whole = {
            use prost::Message;
            strata_proto::IngestDataRequest {
                provider_id: 1,
                client_request_id: small.request_id().into(),
                timestamps: Some(small.axis().to_proto()),
                columns: small.to_columns_proto(),
            }
            .encoded_len()
        };
        let mut cfg = Config::new();
        cfg.stream_count(3).max_decomposed_bytes(whole / 4);
        let tx = transmitter(&platform, &cfg);
        tx.open_stream(ProviderRegistration::new("PRV1")).await.unwrap();

        for i in 0..5 {
            tx.ingest(frame(&format!("f{i}"), 40, 3)).await.unwrap();
        }
        tx.close_stream().await.unwrap();

        // every piece acked, exactly one terminal response per request.
        let responses = tx.ingestion_responses();
        assert_eq!(responses.len(), tx.transmission_count());
        let mut ids: Vec<&str> = responses.iter().map(|r| r.client_request_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), responses.len(), "duplicate terminal response");
    }

    #[tokio::test]
    async fn exception_responses_are_partitioned() {
        let platform = LocalPlatform::new();
        platform.fail_request("bad");
        let tx = transmitter(&platform, &Config::new());
        tx.open_stream(ProviderRegistration::new("PRV1")).await.unwrap();

        tx.ingest(frame("good", 4, 1)).await.unwrap();
        tx.ingest(frame("bad", 4, 1)).await.unwrap();
        tx.close_stream().await.unwrap();

        assert_eq!(tx.ingestion_responses().len(), 2);
        let exceptions = tx.ingestion_exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].client_request_id, "bad");
    }

    #[tokio::test]
    async fn events_fan_out_in_order() {
        let platform = LocalPlatform::new();
        let tx = transmitter(&platform, &Config::new());
        let mut events = tx.subscribe();

        tx.open_stream(ProviderRegistration::new("PRV1")).await.unwrap();
        tx.ingest(frame("r1", 2, 1)).await.unwrap();
        tx.shutdown().await.unwrap();

        assert!(matches!(events.recv().await, Some(TransmitterEvent::Opened { provider_id }) if provider_id > 0));
        assert!(matches!(events.recv().await, Some(TransmitterEvent::Response(r)) if r.client_request_id == "r1"));
        assert!(matches!(events.recv().await, Some(TransmitterEvent::Closed)));
        assert!(matches!(events.recv().await, Some(TransmitterEvent::Terminated)));
    }

    #[tokio::test]
    async fn mirror_off_skips_the_capacity_wait() {
        let platform = LocalPlatform::new();
        let mut cfg = Config::new();
        // tiny buffer without back-pressure: ingest must not wait even while
        // the queue is over capacity.
        cfg.ingestion_buffer_capacity(crate::config::Capacity::Count(1));
        cfg.ingestion_backpressure(false).mirror_backpressure(false);
        let tx = transmitter(&platform, &cfg);
        tx.open_stream(ProviderRegistration::new("PRV1")).await.unwrap();
        for i in 0..8 {
            tx.ingest(frame(&format!("r{i}"), 2, 1)).await.unwrap();
        }
        tx.shutdown().await.unwrap();
        assert_eq!(tx.ingestion_responses().len(), 8);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let platform = LocalPlatform::new();
        let tx = transmitter(&platform, &Config::new());
        tx.open_stream(ProviderRegistration::new("PRV1")).await.unwrap();
        tx.ingest(frame("r1", 2, 1)).await.unwrap();

        tx.shutdown().await.unwrap();
        assert!(tx.is_shutdown());
        // repeated shutdowns observe the terminal state without side effects.
        tx.shutdown().await.unwrap();
        tx.shutdown_now();
        assert!(tx.is_shutdown());
        tx.await_termination(Duration::from_millis(100)).await.unwrap();

        let err = tx.ingest(frame("r2", 2, 1)).await.unwrap_err();
        assert!(err.downcast_ref::<NotOpen>().is_some());
    }

    #[tokio::test]
    async fn close_now_discards_unsent_tail() {
        let platform = LocalPlatform::new();
        let tx = transmitter(&platform, &Config::new());
        tx.open_stream(ProviderRegistration::new("PRV1")).await.unwrap();
        tx.ingest(frame("r1", 2, 1)).await.unwrap();
        // close before the router had a chance to run is allowed; whatever
        // was still queued is dropped.
        tx.close_stream_now().await.unwrap();
        assert!(tx.ingestion_responses().len() <= 1);
    }

    #[tokio::test]
    async fn registration_failure_terminates() {
        let platform = LocalPlatform::new();
        let tx = transmitter(&platform, &Config::new());
        let err = tx.open_stream(ProviderRegistration::new("")).await.unwrap_err();
        assert!(err.downcast_ref::<InitializationError>().is_some());
        assert!(tx.is_shutdown());
    }
}
