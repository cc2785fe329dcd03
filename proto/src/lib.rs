//! schema defined messages for the strata data platform services.
//!
//! message types in this crate mirror the platform's protobuf schema and are kept
//! in hand written form so no codegen step is needed at build time. every message
//! is self describing and the client core never parses wire bytes directly.
//!
//! the [`prost::Message::encoded_len`] impl of these types doubles as the byte
//! size oracle for client side capacity accounting.

mod common;
mod ingestion;
mod query;

pub use self::{
    common::{
        data_column, timestamps, ArrayValues, BoolValues, BytesValues, Clock, DataColumn, Float32Values,
        Float64Values, Int32Values, Int64Values, StringValues, TimestampList, Timestamps,
    },
    ingestion::{
        ingest_data_response, ExceptionCode, IngestAck, IngestDataRequest, IngestDataResponse, IngestException,
        RegisterProviderRequest, RegisterProviderResponse,
    },
    query::{
        query_response, query_stream_request, BucketPage, CursorOp, CursorOpType, DataBucket, QueryReject,
        QueryRequest, QueryResponse, QueryStreamRequest, RejectReason, StreamError,
    },
};

/// serialized byte size of a message. shorthand over [`prost::Message::encoded_len`]
/// used by callers that only care about allocation accounting.
#[inline]
pub fn wire_size<M>(msg: &M) -> usize
where
    M: prost::Message,
{
    msg.encoded_len()
}

#[cfg(test)]
mod test {
    use prost::Message;

    use super::*;

    #[test]
    fn round_trip_ingest_request() {
        let req = IngestDataRequest {
            provider_id: 7,
            client_request_id: "req-001".into(),
            timestamps: Some(Timestamps {
                axis: Some(timestamps::Axis::Clock(Clock {
                    start_nanos: 1_700_000_000_000_000_000,
                    period_nanos: 10_000_000,
                    count: 3,
                })),
            }),
            columns: vec![DataColumn {
                name: "pv01".into(),
                values: Some(data_column::Values::Doubles(Float64Values {
                    values: vec![0.1, 0.2, 0.3],
                })),
            }],
        };

        let buf = req.encode_to_vec();
        let decoded = IngestDataRequest::decode(&*buf).unwrap();
        assert_eq!(req, decoded);
        assert_eq!(req.encoded_len(), buf.len());
    }

    #[test]
    fn round_trip_query_response() {
        let res = QueryResponse {
            result: Some(query_response::Result::Data(BucketPage {
                buckets: vec![DataBucket {
                    source_name: "S1".into(),
                    timestamps: Some(Timestamps {
                        axis: Some(timestamps::Axis::List(TimestampList { nanos: vec![1, 2, 3] })),
                    }),
                    column: Some(DataColumn {
                        name: "S1".into(),
                        values: Some(data_column::Values::Longs(Int64Values { values: vec![9, 8, 7] })),
                    }),
                }],
            })),
        };

        let buf = res.encode_to_vec();
        assert_eq!(QueryResponse::decode(&*buf).unwrap(), res);
    }

    #[test]
    fn reject_response() {
        let res = QueryResponse {
            result: Some(query_response::Result::Reject(QueryReject {
                reason: RejectReason::Malformed as i32,
                message: "empty source set".into(),
            })),
        };
        let buf = res.encode_to_vec();
        let decoded = QueryResponse::decode(&*buf).unwrap();
        match decoded.result {
            Some(query_response::Result::Reject(r)) => {
                assert_eq!(r.reason(), RejectReason::Malformed);
            }
            _ => panic!("expect reject"),
        }
    }

    #[test]
    fn wire_size_matches_encoded_len() {
        let msg = RegisterProviderRequest {
            provider_name: "PRV1".into(),
            attributes: [("facility".to_string(), "ring-1".to_string())].into_iter().collect(),
        };
        assert_eq!(wire_size(&msg), msg.encoded_len());
    }
}
