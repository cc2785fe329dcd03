//! query streaming and assembly pipeline.
//!
//! responses stream from the service into a [QueryReceiver], cross a bounded
//! buffer, correlate into sets, coalesce into sampled blocks and assemble
//! into the final [DataTable]. [execute] runs the whole pipeline for one
//! request; the stage types stay public for callers that need to drive them
//! separately.

pub mod aggregate;
pub mod block;
pub mod correlator;
pub mod receiver;
pub mod table;

use std::sync::Arc;

use strata_proto::{QueryReject, QueryRequest, QueryResponse};

use crate::{
    buffer::BoundedBuffer,
    config::Config,
    error::{Error, MalformedBucket, TransportBroken},
    transport::QueryTransport,
};

pub use self::{
    aggregate::{Assembler, SampledAggregate},
    block::{BlockAxis, CellColumn, SampledBlock, SourceColumn},
    correlator::{CorrelatedSet, Correlator},
    receiver::{QueryReceiver, ReceiverState, StreamEvent},
    table::{DataTable, TableColumn},
};

/// terminal result of one query execution. a service rejection is a first
/// class outcome, not an error.
#[derive(Debug)]
pub enum QueryOutcome {
    /// assembled table plus the malformed buckets skipped on the way.
    Table {
        table: DataTable,
        skipped: Vec<MalformedBucket>,
    },
    /// the service rejected the query; no data was admitted.
    Rejected(QueryReject),
}

impl QueryOutcome {
    pub fn table(&self) -> Option<&DataTable> {
        match self {
            Self::Table { table, .. } => Some(table),
            Self::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// run one range query through the full pipeline and assemble the result.
pub async fn execute(
    transport: Arc<dyn QueryTransport>,
    request: QueryRequest,
    cfg: &Config,
) -> Result<QueryOutcome, Error> {
    let request_id = request.request_id.clone();
    let receiver = Arc::new(QueryReceiver::new(
        transport,
        request,
        cfg.query_stream_mode(),
        cfg.query(),
    ));
    receiver.start().await?;

    let buffer = Arc::new(BoundedBuffer::<QueryResponse>::new(
        cfg.query().buffer_capacity(),
        cfg.query().backpressure(),
    ));
    buffer.activate()?;

    // pump admitted responses across the buffer while correlation drains it.
    let pump = {
        let receiver = receiver.clone();
        let buffer = buffer.clone();
        tokio::spawn(async move {
            let result = loop {
                match receiver.take_next().await {
                    Ok(Some(response)) => {
                        if buffer.offer(response).await.is_err() {
                            break Ok(());
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };
            buffer.shutdown();
            result
        })
    };

    let correlator = Correlator::new(request_id, cfg.query());
    correlator.drain(&buffer).await?;
    match pump.await {
        Ok(result) => result?,
        Err(_) => return Err(TransportBroken("response pump task failed".into()).into()),
    }

    if receiver.is_request_rejected() {
        let reject = receiver.rejection().unwrap_or_default();
        return Ok(QueryOutcome::Rejected(reject));
    }
    if let Some(message) = receiver.error_message() {
        return Err(TransportBroken(message).into());
    }

    let skipped = correlator.failures();
    let mut assembler = Assembler::new();
    assembler.extend_correlated(&correlator.into_sets());
    let aggregate = assembler.assemble()?;
    let table = DataTable::from_aggregate(&aggregate)?;
    Ok(QueryOutcome::Table { table, skipped })
}
