//! ingestion pipeline.
//!
//! caller frames pass through the [FrameProcessor] (decomposition and wire
//! conversion), cross the bounded transmission buffer and leave through the
//! [IngestTransmitter]'s forward streams. acknowledgements and failures
//! collect on the transmitter.

pub mod processor;
pub mod transmitter;

pub use self::{
    processor::{FrameFailure, FrameProcessor},
    transmitter::{IngestTransmitter, ProviderRegistration, TransmitterEvent, TransmitterState},
};
