//! transport seams for the two platform services.
//!
//! the core uses the services exclusively through the traits in this module;
//! connection handling, wire framing and rpc dispatch belong to the transport
//! implementation behind them. trait methods return boxed futures so
//! implementations stay object safe and components can hold
//! `Arc<dyn QueryTransport>` / `Arc<dyn IngestTransport>` handles.

pub mod local;

use core::{future::Future, pin::Pin};

use futures_core::Stream;
use tokio::sync::mpsc::UnboundedSender;

use strata_proto::{
    IngestDataRequest, IngestDataResponse, QueryRequest, QueryResponse, QueryStreamRequest, RegisterProviderRequest,
    RegisterProviderResponse,
};

use crate::{
    config::StreamMode,
    error::{Error, TransportBroken},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// stream of responses from one rpc, in server send order.
pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Error>> + Send>>;

/// client side of the query service.
pub trait QueryTransport: Send + Sync {
    /// server streaming query: one request, a stream of responses.
    fn open_stream(&self, req: QueryRequest) -> BoxFuture<'_, Result<ResponseStream<QueryResponse>, Error>>;

    /// cursor driven bidirectional query: the caller sends the initial
    /// request and cursor operations through the returned forward handle.
    fn open_bidi(&self) -> BoxFuture<'_, Result<(QuerySink, ResponseStream<QueryResponse>), Error>>;
}

/// client side of the ingestion service.
pub trait IngestTransport: Send + Sync {
    /// unary provider registration round trip.
    fn register_provider(
        &self,
        req: RegisterProviderRequest,
    ) -> BoxFuture<'_, Result<RegisterProviderResponse, Error>>;

    /// open one forward data stream. acknowledgements arrive on the returned
    /// response stream: inline per request in bidirectional mode, all after
    /// half close in unidirectional mode.
    fn open_ingest(
        &self,
        mode: StreamMode,
    ) -> BoxFuture<'_, Result<(IngestSink, ResponseStream<IngestDataResponse>), Error>>;
}

/// forward handle of a bidirectional query stream. dropping the handle or
/// calling [QuerySink::close] half closes the stream toward the server.
pub struct QuerySink {
    tx: Option<UnboundedSender<QueryStreamRequest>>,
}

impl QuerySink {
    pub fn new(tx: UnboundedSender<QueryStreamRequest>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn send(&self, req: QueryStreamRequest) -> Result<(), Error> {
        match self.tx.as_ref() {
            Some(tx) => tx
                .send(req)
                .map_err(|_| TransportBroken("query forward stream is gone".into()).into()),
            None => Err(TransportBroken("query forward stream is closed".into()).into()),
        }
    }

    /// half close the forward direction.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(UnboundedSender::is_closed)
    }
}

/// forward handle of an ingestion data stream.
pub struct IngestSink {
    tx: Option<UnboundedSender<IngestDataRequest>>,
}

impl IngestSink {
    pub fn new(tx: UnboundedSender<IngestDataRequest>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn send(&self, req: IngestDataRequest) -> Result<(), Error> {
        match self.tx.as_ref() {
            Some(tx) => tx
                .send(req)
                .map_err(|_| TransportBroken("ingestion forward stream is gone".into()).into()),
            None => Err(TransportBroken("ingestion forward stream is closed".into()).into()),
        }
    }

    /// half close the forward direction. responses may still arrive.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(UnboundedSender::is_closed)
    }
}
