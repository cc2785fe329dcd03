//! query service messages: range requests, streamed bucket pages and the
//! cursor driven bidirectional protocol.

use super::{DataColumn, Timestamps};

/// raw time series range query over a set of named sources. `request_id` is
/// caller assigned and echoed in client side failure reports.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryRequest {
    #[prost(string, repeated, tag = "1")]
    pub source_names: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(int64, tag = "2")]
    pub begin_nanos: i64,
    #[prost(int64, tag = "3")]
    pub end_nanos: i64,
    #[prost(string, tag = "4")]
    pub request_id: ::prost::alloc::string::String,
}

/// a single source, contiguously sampled piece of the query result.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataBucket {
    #[prost(string, tag = "1")]
    pub source_name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub timestamps: ::core::option::Option<Timestamps>,
    #[prost(message, optional, tag = "3")]
    pub column: ::core::option::Option<DataColumn>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BucketPage {
    #[prost(message, repeated, tag = "1")]
    pub buckets: ::prost::alloc::vec::Vec<DataBucket>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RejectReason {
    Unspecified = 0,
    Malformed = 1,
    UnknownSource = 2,
    RangeTooLarge = 3,
    Internal = 4,
}

/// first class rejection of a query. carried by the first response of the
/// stream; no data follows it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryReject {
    #[prost(enumeration = "RejectReason", tag = "1")]
    pub reason: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryResponse {
    #[prost(oneof = "query_response::Result", tags = "1, 2")]
    pub result: ::core::option::Option<query_response::Result>,
}

pub mod query_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Reject(super::QueryReject),
        #[prost(message, tag = "2")]
        Data(super::BucketPage),
    }
}

impl QueryResponse {
    /// true when this response carries the reject marker.
    #[inline]
    pub fn is_reject(&self) -> bool {
        matches!(self.result, Some(query_response::Result::Reject(_)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CursorOpType {
    Next = 0,
}

/// cursor operation on an open bidirectional query stream. the service
/// produces exactly one response per received `Next`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CursorOp {
    #[prost(enumeration = "CursorOpType", tag = "1")]
    pub op: i32,
}

/// client side error report closing a bidirectional stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamError {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
}

/// forward message of the bidirectional query stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryStreamRequest {
    #[prost(oneof = "query_stream_request::Request", tags = "1, 2, 3")]
    pub request: ::core::option::Option<query_stream_request::Request>,
}

pub mod query_stream_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "1")]
        Query(super::QueryRequest),
        #[prost(message, tag = "2")]
        Cursor(super::CursorOp),
        #[prost(message, tag = "3")]
        Error(super::StreamError),
    }
}

impl QueryStreamRequest {
    /// forward message carrying the initial query.
    #[inline]
    pub fn query(req: QueryRequest) -> Self {
        Self {
            request: Some(query_stream_request::Request::Query(req)),
        }
    }

    /// forward message requesting the next response.
    #[inline]
    pub fn cursor_next() -> Self {
        Self {
            request: Some(query_stream_request::Request::Cursor(CursorOp {
                op: CursorOpType::Next as i32,
            })),
        }
    }

    /// forward message reporting a client side error.
    #[inline]
    pub fn error(message: impl Into<::prost::alloc::string::String>) -> Self {
        Self {
            request: Some(query_stream_request::Request::Error(StreamError {
                message: message.into(),
            })),
        }
    }
}
