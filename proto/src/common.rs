//! timestamp and column messages shared by both services.

/// uniform sampling clock. instants are nanoseconds since the unix epoch.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Clock {
    #[prost(int64, tag = "1")]
    pub start_nanos: i64,
    #[prost(int64, tag = "2")]
    pub period_nanos: i64,
    #[prost(uint32, tag = "3")]
    pub count: u32,
}

/// explicit ordered list of instants, nanoseconds since the unix epoch.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TimestampList {
    #[prost(int64, repeated, tag = "1")]
    pub nanos: ::prost::alloc::vec::Vec<i64>,
}

/// timestamp descriptor of a frame or bucket. exactly one axis form is set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Timestamps {
    #[prost(oneof = "timestamps::Axis", tags = "1, 2")]
    pub axis: ::core::option::Option<timestamps::Axis>,
}

pub mod timestamps {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Axis {
        #[prost(message, tag = "1")]
        Clock(super::Clock),
        #[prost(message, tag = "2")]
        List(super::TimestampList),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BoolValues {
    #[prost(bool, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Int32Values {
    #[prost(sint32, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Int64Values {
    #[prost(sint64, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Float32Values {
    #[prost(float, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Float64Values {
    #[prost(double, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringValues {
    #[prost(string, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BytesValues {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

/// structured array column. rows are fixed stride slices of `values`,
/// `row_len` elements each.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ArrayValues {
    #[prost(double, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<f64>,
    #[prost(uint32, tag = "2")]
    pub row_len: u32,
}

/// a named column of homogeneous primitive values.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataColumn {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(oneof = "data_column::Values", tags = "2, 3, 4, 5, 6, 7, 8, 9")]
    pub values: ::core::option::Option<data_column::Values>,
}

pub mod data_column {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Values {
        #[prost(message, tag = "2")]
        Bools(super::BoolValues),
        #[prost(message, tag = "3")]
        Ints(super::Int32Values),
        #[prost(message, tag = "4")]
        Longs(super::Int64Values),
        #[prost(message, tag = "5")]
        Floats(super::Float32Values),
        #[prost(message, tag = "6")]
        Doubles(super::Float64Values),
        #[prost(message, tag = "7")]
        Strings(super::StringValues),
        #[prost(message, tag = "8")]
        Bytes(super::BytesValues),
        #[prost(message, tag = "9")]
        Arrays(super::ArrayValues),
    }
}
