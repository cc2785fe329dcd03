//! client side data plane for the strata time series platform.
//!
//! the platform exposes two services: an ingestion service accepting
//! structured, time stamped frames from data providers and a query service
//! streaming raw bucketed samples back. this crate implements the two
//! pipelines between caller and wire:
//!
//! - ingestion: frames are optionally decomposed against a byte budget,
//!   converted to wire requests, buffered with back-pressure and multiplexed
//!   over one or more forward streams while acknowledgements collect.
//! - query: streamed responses are received, buffered, correlated by
//!   timestamp descriptor, coalesced into sampled blocks and assembled into
//!   a single ordered data table.
//!
//! # Examples
//! ```rust
//! use std::sync::Arc;
//!
//! use strata_client::{
//!     query, Config, ColumnValues, FrameColumn, IngestFrame, IngestTransmitter,
//!     LocalPlatform, ProviderRegistration, TimeAxis,
//! };
//! use strata_proto::QueryRequest;
//!
//! # async fn run() -> Result<(), strata_client::Error> {
//! let cfg = Config::new();
//! let platform = LocalPlatform::new();
//!
//! // ingest one frame.
//! let transmitter = IngestTransmitter::new(Arc::new(platform.clone()), &cfg);
//! transmitter.open_stream(ProviderRegistration::new("PRV1")).await?;
//! let frame = IngestFrame::new(
//!     "req-1",
//!     TimeAxis::clock(0, 1_000_000, 3)?,
//!     vec![FrameColumn::new("pv01", ColumnValues::F64(vec![1.0, 2.0, 3.0]))],
//! )?;
//! transmitter.ingest(frame).await?;
//! transmitter.shutdown().await?;
//!
//! // query it back as a table.
//! let outcome = query::execute(
//!     Arc::new(platform),
//!     QueryRequest {
//!         source_names: vec!["pv01".into()],
//!         begin_nanos: 0,
//!         end_nanos: 2_000_000,
//!         request_id: "q-1".into(),
//!     },
//!     &cfg,
//! )
//! .await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod config;
mod frame;

pub mod buffer;
pub mod error;
pub mod ingest;
pub mod query;
pub mod transport;

pub use self::{
    buffer::{BoundedBuffer, BufferState, MessageSize, Polled},
    config::{Capacity, Config, LogLevel, SectionConfig, StreamMode},
    error::Error,
    frame::{ColumnValues, FrameColumn, IngestFrame, RawBucket, ScalarValue, TimeAxis, TimeRange, ValueType},
    ingest::{IngestTransmitter, ProviderRegistration, TransmitterEvent},
    query::{DataTable, QueryOutcome, QueryReceiver, SampledAggregate},
    transport::{local::LocalPlatform, IngestTransport, QueryTransport},
};

fn _assert_send<F: Send>() {}

fn _assert_component_send() {
    _assert_send::<IngestTransmitter>();
    _assert_send::<QueryReceiver>();
    _assert_send::<BoundedBuffer<strata_proto::IngestDataRequest>>();
}
