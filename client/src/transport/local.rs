//! in process platform transport.
//!
//! [LocalPlatform] implements both service traits over tokio channels with no
//! sockets involved: providers register against an in memory registry,
//! ingested requests are captured for inspection and queries are served from
//! preloaded series. rejection and stream error injection make the failure
//! paths reachable from tests. the integration tests and the evaluator
//! tooling run entire pipelines against this transport.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;

use strata_proto::{
    ingest_data_response, query_response, query_stream_request, BucketPage, DataBucket, DataColumn, ExceptionCode,
    IngestAck, IngestDataRequest, IngestDataResponse, IngestException, QueryReject, QueryRequest, QueryResponse,
    QueryStreamRequest, RegisterProviderRequest, RegisterProviderResponse, RejectReason,
};

use crate::{
    config::StreamMode,
    error::{Error, InvalidArgument, TransportBroken},
    frame::{ColumnValues, TimeAxis},
    transport::{BoxFuture, IngestSink, IngestTransport, QuerySink, QueryTransport, ResponseStream},
};

#[derive(Default)]
struct Shared {
    next_provider_id: AtomicU32,
    providers: Mutex<HashMap<String, u32>>,
    ingested: Mutex<Vec<IngestDataRequest>>,
    series: Mutex<Vec<DataBucket>>,
    buckets_per_page: AtomicUsize,
    reject: Mutex<Option<QueryReject>>,
    stream_error: Mutex<Option<String>>,
    failing_requests: Mutex<HashSet<String>>,
    hold_open: AtomicBool,
}

/// an in memory stand-in for both platform services.
#[derive(Clone, Default)]
pub struct LocalPlatform {
    shared: Arc<Shared>,
}

impl LocalPlatform {
    pub fn new() -> Self {
        let platform = Self::default();
        platform.shared.buckets_per_page.store(1, Ordering::Relaxed);
        platform.shared.next_provider_id.store(1, Ordering::Relaxed);
        platform
    }

    /// preload one raw bucket served by subsequent queries.
    pub fn load_bucket(&self, source: &str, axis: TimeAxis, values: ColumnValues) {
        let bucket = DataBucket {
            source_name: source.to_string(),
            timestamps: Some(axis.to_proto()),
            column: Some(DataColumn {
                name: source.to_string(),
                values: Some(values.to_proto()),
            }),
        };
        self.shared.series.lock().unwrap().push(bucket);
    }

    /// buckets per streamed response page.
    pub fn set_buckets_per_page(&self, count: usize) {
        self.shared.buckets_per_page.store(count.max(1), Ordering::Relaxed);
    }

    /// make the next query stream start with a rejection.
    pub fn inject_reject(&self, reason: RejectReason, message: &str) {
        *self.shared.reject.lock().unwrap() = Some(QueryReject {
            reason: reason as i32,
            message: message.to_string(),
        });
    }

    /// make query streams fail with a transport error after the first page.
    pub fn inject_stream_error(&self, message: &str) {
        *self.shared.stream_error.lock().unwrap() = Some(message.to_string());
    }

    /// keep query streams open after their last page instead of closing.
    /// lets tests abort a still active stream.
    pub fn set_hold_open(&self, hold: bool) {
        self.shared.hold_open.store(hold, Ordering::Relaxed);
    }

    /// make the service answer the given client request id with an exception.
    pub fn fail_request(&self, client_request_id: &str) {
        self.shared
            .failing_requests
            .lock()
            .unwrap()
            .insert(client_request_id.to_string());
    }

    /// snapshot of every ingestion request the service accepted so far.
    pub fn ingested_requests(&self) -> Vec<IngestDataRequest> {
        self.shared.ingested.lock().unwrap().clone()
    }

    pub fn registered_providers(&self) -> Vec<(String, u32)> {
        let providers = self.shared.providers.lock().unwrap();
        providers.iter().map(|(name, id)| (name.clone(), *id)).collect()
    }

    fn ingest_response(&self, req: &IngestDataRequest) -> IngestDataResponse {
        let exception = |code: ExceptionCode, message: String| IngestDataResponse {
            client_request_id: req.client_request_id.clone(),
            result: Some(ingest_data_response::Result::Exception(IngestException {
                code: code as i32,
                message,
            })),
        };

        if self.shared.failing_requests.lock().unwrap().contains(&req.client_request_id) {
            return exception(ExceptionCode::Rejected, "request failed by injection".into());
        }
        let registered = self
            .shared
            .providers
            .lock()
            .unwrap()
            .values()
            .any(|id| *id == req.provider_id);
        if !registered {
            return exception(
                ExceptionCode::UnregisteredProvider,
                format!("unknown provider {}", req.provider_id),
            );
        }
        let Some(axis) = req
            .timestamps
            .clone()
            .and_then(|ts| TimeAxis::from_proto(ts).ok())
        else {
            return exception(ExceptionCode::Malformed, "missing or invalid timestamps".into());
        };
        if req.columns.is_empty() {
            return exception(ExceptionCode::Malformed, "request carries no columns".into());
        }
        for col in &req.columns {
            let len = col.values.clone().map_or(0, |v| ColumnValues::from_proto(v).len());
            if len != axis.len() {
                return exception(
                    ExceptionCode::Malformed,
                    format!("column {} holds {} values against {} timestamps", col.name, len, axis.len()),
                );
            }
        }
        IngestDataResponse {
            client_request_id: req.client_request_id.clone(),
            result: Some(ingest_data_response::Result::Ack(IngestAck {
                row_count: axis.len() as u32,
                column_count: req.columns.len() as u32,
            })),
        }
    }

    // pages answering the given range query, in source load order.
    fn pages_for(&self, req: &QueryRequest) -> Vec<QueryResponse> {
        let wanted: HashSet<&str> = req.source_names.iter().map(String::as_str).collect();
        let series = self.shared.series.lock().unwrap();
        let matching: Vec<DataBucket> = series
            .iter()
            .filter(|b| wanted.contains(b.source_name.as_str()))
            .filter(|b| {
                b.timestamps
                    .clone()
                    .and_then(|ts| TimeAxis::from_proto(ts).ok())
                    .is_some_and(|axis| axis.first() <= req.end_nanos && req.begin_nanos <= axis.last())
            })
            .cloned()
            .collect();
        let per_page = self.shared.buckets_per_page.load(Ordering::Relaxed);
        matching
            .chunks(per_page)
            .map(|chunk| QueryResponse {
                result: Some(query_response::Result::Data(BucketPage {
                    buckets: chunk.to_vec(),
                })),
            })
            .collect()
    }

    fn take_reject(&self, req: &QueryRequest) -> Option<QueryReject> {
        if let Some(reject) = self.shared.reject.lock().unwrap().take() {
            return Some(reject);
        }
        if req.source_names.is_empty() || req.begin_nanos > req.end_nanos {
            return Some(QueryReject {
                reason: RejectReason::Malformed as i32,
                message: "empty source set or inverted range".into(),
            });
        }
        None
    }

    fn take_stream_error(&self) -> Option<String> {
        self.shared.stream_error.lock().unwrap().take()
    }
}

impl QueryTransport for LocalPlatform {
    fn open_stream(&self, req: QueryRequest) -> BoxFuture<'_, Result<ResponseStream<QueryResponse>, Error>> {
        Box::pin(async move {
            let (tx, rx) = unbounded_channel();
            if let Some(reject) = self.take_reject(&req) {
                let _ = tx.send(Ok(QueryResponse {
                    result: Some(query_response::Result::Reject(reject)),
                }));
            } else {
                let pages = self.pages_for(&req);
                let error = self.take_stream_error();
                let hold_open = self.shared.hold_open.load(Ordering::Relaxed);
                tokio::spawn(async move {
                    for (i, page) in pages.into_iter().enumerate() {
                        if i == 1 {
                            if let Some(msg) = error.as_ref() {
                                let _ = tx.send(Err(TransportBroken(msg.clone()).into()));
                                return;
                            }
                        }
                        if tx.send(Ok(page)).is_err() {
                            return;
                        }
                    }
                    if hold_open {
                        // stream stays open until the receiver goes away.
                        tx.closed().await;
                    }
                });
            }
            Ok(Box::pin(UnboundedReceiverStream::new(rx)) as ResponseStream<QueryResponse>)
        })
    }

    fn open_bidi(&self) -> BoxFuture<'_, Result<(QuerySink, ResponseStream<QueryResponse>), Error>> {
        Box::pin(async move {
            let (forward_tx, mut forward_rx) = unbounded_channel::<QueryStreamRequest>();
            let (tx, rx) = unbounded_channel();
            let platform = self.clone();
            tokio::spawn(async move {
                // the first forward message must carry the query.
                let Some(first) = forward_rx.recv().await else { return };
                let req = match first.request {
                    Some(query_stream_request::Request::Query(req)) => req,
                    _ => {
                        let _ = tx.send(Err(TransportBroken("bidi stream opened without a query".into()).into()));
                        return;
                    }
                };
                if let Some(reject) = platform.take_reject(&req) {
                    let _ = tx.send(Ok(QueryResponse {
                        result: Some(query_response::Result::Reject(reject)),
                    }));
                    return;
                }
                let pages = platform.pages_for(&req);
                // first response is produced by the query itself, every
                // further one by exactly one cursor operation. the stream
                // closes right after the final page.
                let hold_open = platform.shared.hold_open.load(Ordering::Relaxed);
                let mut next = 0;
                if next == pages.len() || tx.send(Ok(pages[next].clone())).is_err() {
                    return;
                }
                next += 1;
                while next < pages.len() {
                    match forward_rx.recv().await.and_then(|msg| msg.request) {
                        Some(query_stream_request::Request::Cursor(_)) => {
                            if tx.send(Ok(pages[next].clone())).is_err() {
                                return;
                            }
                            next += 1;
                        }
                        Some(query_stream_request::Request::Query(_)) => {
                            let _ = tx.send(Err(TransportBroken("query resent on open stream".into()).into()));
                            return;
                        }
                        Some(query_stream_request::Request::Error(_)) | None => return,
                    }
                }
                if hold_open {
                    // serve trailing cursors with silence until the client
                    // reports an error or half closes the forward stream.
                    while let Some(msg) = forward_rx.recv().await {
                        if matches!(msg.request, Some(query_stream_request::Request::Error(_))) {
                            return;
                        }
                    }
                }
            });
            Ok((
                QuerySink::new(forward_tx),
                Box::pin(UnboundedReceiverStream::new(rx)) as ResponseStream<QueryResponse>,
            ))
        })
    }
}

impl IngestTransport for LocalPlatform {
    fn register_provider(
        &self,
        req: RegisterProviderRequest,
    ) -> BoxFuture<'_, Result<RegisterProviderResponse, Error>> {
        Box::pin(async move {
            if req.provider_name.is_empty() {
                return Err(InvalidArgument("provider name must be non empty".into()).into());
            }
            let mut providers = self.shared.providers.lock().unwrap();
            let id = *providers.entry(req.provider_name.clone()).or_insert_with(|| {
                self.shared.next_provider_id.fetch_add(1, Ordering::Relaxed)
            });
            Ok(RegisterProviderResponse {
                provider_id: id,
                provider_name: req.provider_name,
            })
        })
    }

    fn open_ingest(
        &self,
        mode: StreamMode,
    ) -> BoxFuture<'_, Result<(IngestSink, ResponseStream<IngestDataResponse>), Error>> {
        Box::pin(async move {
            let (forward_tx, mut forward_rx) = unbounded_channel::<IngestDataRequest>();
            let (tx, rx) = unbounded_channel();
            let platform = self.clone();
            tokio::spawn(async move {
                let mut deferred = Vec::new();
                while let Some(req) = forward_rx.recv().await {
                    let response = platform.ingest_response(&req);
                    platform.shared.ingested.lock().unwrap().push(req);
                    match mode {
                        StreamMode::Bidirectional => {
                            if tx.send(Ok(response)).is_err() {
                                return;
                            }
                        }
                        StreamMode::Unidirectional => deferred.push(response),
                    }
                }
                // forward side half closed. a unidirectional stream delivers
                // its acknowledgements at termination.
                for response in deferred {
                    if tx.send(Ok(response)).is_err() {
                        return;
                    }
                }
            });
            Ok((
                IngestSink::new(forward_tx),
                Box::pin(UnboundedReceiverStream::new(rx)) as ResponseStream<IngestDataResponse>,
            ))
        })
    }
}
