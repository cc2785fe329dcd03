//! ingestion service messages: provider registration and data streaming.

use super::{DataColumn, Timestamps};

/// unary provider registration request. `provider_name` must be unique per
/// platform deployment; attributes are free form descriptive key/value pairs.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterProviderRequest {
    #[prost(string, tag = "1")]
    pub provider_name: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "2")]
    pub attributes: ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterProviderResponse {
    #[prost(uint32, tag = "1")]
    pub provider_id: u32,
    #[prost(string, tag = "2")]
    pub provider_name: ::prost::alloc::string::String,
}

/// one transport ready ingestion request. carries a whole ingestion frame or
/// one piece of a decomposed frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IngestDataRequest {
    #[prost(uint32, tag = "1")]
    pub provider_id: u32,
    #[prost(string, tag = "2")]
    pub client_request_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub timestamps: ::core::option::Option<Timestamps>,
    #[prost(message, repeated, tag = "4")]
    pub columns: ::prost::alloc::vec::Vec<DataColumn>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ExceptionCode {
    Unknown = 0,
    Malformed = 1,
    UnregisteredProvider = 2,
    Rejected = 3,
    Internal = 4,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IngestAck {
    #[prost(uint32, tag = "1")]
    pub row_count: u32,
    #[prost(uint32, tag = "2")]
    pub column_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IngestException {
    #[prost(enumeration = "ExceptionCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

/// terminal acknowledgement for one transmitted request. the service sends at
/// most one of these per `client_request_id`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IngestDataResponse {
    #[prost(string, tag = "1")]
    pub client_request_id: ::prost::alloc::string::String,
    #[prost(oneof = "ingest_data_response::Result", tags = "2, 3")]
    pub result: ::core::option::Option<ingest_data_response::Result>,
}

pub mod ingest_data_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "2")]
        Ack(super::IngestAck),
        #[prost(message, tag = "3")]
        Exception(super::IngestException),
    }
}

impl IngestDataResponse {
    /// true when the response carries an exception status.
    #[inline]
    pub fn is_exception(&self) -> bool {
        matches!(self.result, Some(ingest_data_response::Result::Exception(_)))
    }
}
