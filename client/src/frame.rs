//! core data model: timestamp axes, typed value columns, ingestion frames and
//! raw query buckets.

use core::fmt;
use core::ops::Range;

use strata_proto::{
    data_column, timestamps, ArrayValues, BoolValues, BytesValues, Clock, DataBucket, DataColumn, Float32Values,
    Float64Values, Int32Values, Int64Values, StringValues, TimestampList, Timestamps,
};

use crate::error::{Error, InvalidArgument, MalformedBucket};

/// primitive type of a value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    I32,
    I64,
    F32,
    F64,
    Str,
    Bytes,
    Arr,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::Str => "string",
            Self::Bytes => "bytes",
            Self::Arr => "array",
        };
        f.write_str(name)
    }
}

/// closed time interval `[begin, end]` in epoch nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub begin: i64,
    pub end: i64,
}

impl TimeRange {
    #[inline]
    pub fn new(begin: i64, end: i64) -> Self {
        Self { begin, end }
    }

    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }

    #[inline]
    pub fn contains(&self, instant: i64) -> bool {
        self.begin <= instant && instant <= self.end
    }
}

/// timestamp axis of a frame, bucket or block.
///
/// two clocked axes are equal iff start, period and count are all equal. two
/// list axes are equal iff they hold the same instants in the same order. a
/// clocked axis is never equal to a list axis, even when they enumerate the
/// same instants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimeAxis {
    Clock {
        start_nanos: i64,
        period_nanos: i64,
        count: usize,
    },
    List(Vec<i64>),
}

impl TimeAxis {
    /// uniform clock axis. period must be positive and count non zero.
    pub fn clock(start_nanos: i64, period_nanos: i64, count: usize) -> Result<Self, Error> {
        if period_nanos <= 0 {
            return Err(InvalidArgument(format!("clock period must be positive, got {period_nanos}")).into());
        }
        if count == 0 {
            return Err(InvalidArgument("clock sample count must be non zero".into()).into());
        }
        Ok(Self::Clock {
            start_nanos,
            period_nanos,
            count,
        })
    }

    /// explicit axis from an ordered list of instants. the list must be non
    /// empty and strictly ascending.
    pub fn list(nanos: Vec<i64>) -> Result<Self, Error> {
        if nanos.is_empty() {
            return Err(InvalidArgument("timestamp list must be non empty".into()).into());
        }
        if nanos.windows(2).any(|w| w[0] >= w[1]) {
            return Err(InvalidArgument("timestamp list must be strictly ascending".into()).into());
        }
        Ok(Self::List(nanos))
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Clock { count, .. } => *count,
            Self::List(nanos) => nanos.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// instant at row index, if in range.
    pub fn instant(&self, index: usize) -> Option<i64> {
        match self {
            Self::Clock {
                start_nanos,
                period_nanos,
                count,
            } => (index < *count).then(|| start_nanos + period_nanos * index as i64),
            Self::List(nanos) => nanos.get(index).copied(),
        }
    }

    pub fn first(&self) -> i64 {
        self.instant(0).expect("axis is never empty")
    }

    pub fn last(&self) -> i64 {
        self.instant(self.len() - 1).expect("axis is never empty")
    }

    /// `[first, last]` time domain of the axis.
    #[inline]
    pub fn domain(&self) -> TimeRange {
        TimeRange::new(self.first(), self.last())
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len()).map(|i| self.instant(i).unwrap())
    }

    /// sub axis covering the given row range. a clocked axis stays clocked;
    /// a list axis keeps the corresponding sub list.
    ///
    /// # Panics
    /// panics when the range is empty or out of bounds.
    pub fn slice_rows(&self, range: Range<usize>) -> Self {
        assert!(!range.is_empty() && range.end <= self.len(), "row range out of bounds");
        match self {
            Self::Clock {
                start_nanos,
                period_nanos,
                ..
            } => Self::Clock {
                start_nanos: start_nanos + period_nanos * range.start as i64,
                period_nanos: *period_nanos,
                count: range.len(),
            },
            Self::List(nanos) => Self::List(nanos[range].to_vec()),
        }
    }

    /// wire form of the axis. transport implementations use this when
    /// building outgoing messages.
    pub fn to_proto(&self) -> Timestamps {
        let axis = match self {
            Self::Clock {
                start_nanos,
                period_nanos,
                count,
            } => timestamps::Axis::Clock(Clock {
                start_nanos: *start_nanos,
                period_nanos: *period_nanos,
                count: *count as u32,
            }),
            Self::List(nanos) => timestamps::Axis::List(TimestampList { nanos: nanos.clone() }),
        };
        Timestamps { axis: Some(axis) }
    }

    /// validated conversion from the wire form.
    pub fn from_proto(ts: Timestamps) -> Result<Self, Error> {
        match ts.axis {
            Some(timestamps::Axis::Clock(clock)) => {
                Self::clock(clock.start_nanos, clock.period_nanos, clock.count as usize)
            }
            Some(timestamps::Axis::List(list)) => Self::list(list.nanos),
            None => Err(InvalidArgument("timestamp descriptor carries no axis".into()).into()),
        }
    }
}

/// one typed scalar cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Arr(Vec<f64>),
}

impl ScalarValue {
    #[inline]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::Str(_) => ValueType::Str,
            Self::Bytes(_) => ValueType::Bytes,
            Self::Arr(_) => ValueType::Arr,
        }
    }
}

/// dense homogeneous value column of an ingestion frame or raw bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
    Bytes(Vec<Vec<u8>>),
    /// structured array rows of a fixed element count.
    Arr(Vec<Vec<f64>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Str(v) => v.len(),
            Self::Bytes(v) => v.len(),
            Self::Arr(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::Str(_) => ValueType::Str,
            Self::Bytes(_) => ValueType::Bytes,
            Self::Arr(_) => ValueType::Arr,
        }
    }

    /// scalar cell at row index, if in range.
    pub fn scalar(&self, index: usize) -> Option<ScalarValue> {
        match self {
            Self::Bool(v) => v.get(index).copied().map(ScalarValue::Bool),
            Self::I32(v) => v.get(index).copied().map(ScalarValue::I32),
            Self::I64(v) => v.get(index).copied().map(ScalarValue::I64),
            Self::F32(v) => v.get(index).copied().map(ScalarValue::F32),
            Self::F64(v) => v.get(index).copied().map(ScalarValue::F64),
            Self::Str(v) => v.get(index).cloned().map(ScalarValue::Str),
            Self::Bytes(v) => v.get(index).cloned().map(ScalarValue::Bytes),
            Self::Arr(v) => v.get(index).cloned().map(ScalarValue::Arr),
        }
    }

    /// sub column covering the given row range.
    ///
    /// # Panics
    /// panics when the range is out of bounds.
    pub fn slice_rows(&self, range: Range<usize>) -> Self {
        match self {
            Self::Bool(v) => Self::Bool(v[range].to_vec()),
            Self::I32(v) => Self::I32(v[range].to_vec()),
            Self::I64(v) => Self::I64(v[range].to_vec()),
            Self::F32(v) => Self::F32(v[range].to_vec()),
            Self::F64(v) => Self::F64(v[range].to_vec()),
            Self::Str(v) => Self::Str(v[range].to_vec()),
            Self::Bytes(v) => Self::Bytes(v[range].to_vec()),
            Self::Arr(v) => Self::Arr(v[range].to_vec()),
        }
    }

    /// wire form of the column values.
    pub fn to_proto(&self) -> data_column::Values {
        match self {
            Self::Bool(v) => data_column::Values::Bools(BoolValues { values: v.clone() }),
            Self::I32(v) => data_column::Values::Ints(Int32Values { values: v.clone() }),
            Self::I64(v) => data_column::Values::Longs(Int64Values { values: v.clone() }),
            Self::F32(v) => data_column::Values::Floats(Float32Values { values: v.clone() }),
            Self::F64(v) => data_column::Values::Doubles(Float64Values { values: v.clone() }),
            Self::Str(v) => data_column::Values::Strings(StringValues { values: v.clone() }),
            Self::Bytes(v) => data_column::Values::Bytes(BytesValues { values: v.clone() }),
            Self::Arr(rows) => {
                let row_len = rows.first().map_or(0, Vec::len);
                data_column::Values::Arrays(ArrayValues {
                    values: rows.iter().flatten().copied().collect(),
                    row_len: row_len as u32,
                })
            }
        }
    }

    /// conversion from the wire form.
    pub fn from_proto(values: data_column::Values) -> Self {
        match values {
            data_column::Values::Bools(v) => Self::Bool(v.values),
            data_column::Values::Ints(v) => Self::I32(v.values),
            data_column::Values::Longs(v) => Self::I64(v.values),
            data_column::Values::Floats(v) => Self::F32(v.values),
            data_column::Values::Doubles(v) => Self::F64(v.values),
            data_column::Values::Strings(v) => Self::Str(v.values),
            data_column::Values::Bytes(v) => Self::Bytes(v.values),
            data_column::Values::Arrays(v) => {
                let row_len = v.row_len.max(1) as usize;
                Self::Arr(v.values.chunks(row_len).map(<[f64]>::to_vec).collect())
            }
        }
    }
}

/// one named column of an ingestion frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    pub name: String,
    pub values: ColumnValues,
}

impl FrameColumn {
    pub fn new(name: impl Into<String>, values: ColumnValues) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// caller submitted, time stamped tabular payload.
///
/// the frame owns one timestamp axis and an ordered list of named columns.
/// every column holds exactly one value per axis instant; column names are
/// unique within the frame. both invariants are checked at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestFrame {
    request_id: String,
    axis: TimeAxis,
    columns: Vec<FrameColumn>,
}

impl IngestFrame {
    pub fn new(request_id: impl Into<String>, axis: TimeAxis, columns: Vec<FrameColumn>) -> Result<Self, Error> {
        let request_id = request_id.into();
        if request_id.is_empty() {
            return Err(InvalidArgument("client request id must be non empty".into()).into());
        }
        if columns.is_empty() {
            return Err(InvalidArgument("frame must carry at least one column".into()).into());
        }
        let rows = axis.len();
        for col in &columns {
            if col.values.len() != rows {
                return Err(InvalidArgument(format!(
                    "column {} holds {} values against {} timestamps",
                    col.name,
                    col.values.len(),
                    rows
                ))
                .into());
            }
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(InvalidArgument(format!("duplicate column name {}", col.name)).into());
            }
        }
        Ok(Self {
            request_id,
            axis,
            columns,
        })
    }

    #[inline]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[inline]
    pub fn axis(&self) -> &TimeAxis {
        &self.axis
    }

    #[inline]
    pub fn columns(&self) -> &[FrameColumn] {
        &self.columns
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.axis.len()
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// frame covering a sub range of rows with all columns. keeps the request id.
    pub(crate) fn slice_rows(&self, range: Range<usize>) -> Self {
        Self {
            request_id: self.request_id.clone(),
            axis: self.axis.slice_rows(range.clone()),
            columns: self
                .columns
                .iter()
                .map(|c| FrameColumn::new(c.name.clone(), c.values.slice_rows(range.clone())))
                .collect(),
        }
    }

    /// frame covering a sub range of columns with all rows. keeps the request id.
    pub(crate) fn slice_columns(&self, range: Range<usize>) -> Self {
        Self {
            request_id: self.request_id.clone(),
            axis: self.axis.clone(),
            columns: self.columns[range].to_vec(),
        }
    }

    pub(crate) fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = request_id;
        self
    }

    pub(crate) fn to_columns_proto(&self) -> Vec<DataColumn> {
        self.columns
            .iter()
            .map(|c| DataColumn {
                name: c.name.clone(),
                values: Some(c.values.to_proto()),
            })
            .collect()
    }
}

/// single source, contiguously sampled piece of a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBucket {
    pub source: String,
    pub axis: TimeAxis,
    pub values: ColumnValues,
}

impl RawBucket {
    /// validated conversion from the wire form. the value column length must
    /// equal the timestamp count; mismatch surfaces as [MalformedBucket]
    /// attached to the source and query request id.
    pub fn from_proto(bucket: DataBucket, request_id: &str) -> Result<Self, Error> {
        let source = bucket.source_name;
        let axis = bucket
            .timestamps
            .ok_or_else(|| InvalidArgument(format!("bucket for source {source} carries no timestamps")))
            .and_then(|ts| TimeAxis::from_proto(ts).map_err(|e| InvalidArgument(e.to_string())))?;
        let values = bucket
            .column
            .and_then(|c| c.values)
            .map(ColumnValues::from_proto)
            .ok_or_else(|| InvalidArgument(format!("bucket for source {source} carries no values")))?;
        if values.len() != axis.len() {
            return Err(MalformedBucket {
                source,
                request_id: request_id.to_string(),
                timestamp_count: axis.len(),
                column_length: values.len(),
            }
            .into());
        }
        Ok(Self { source, axis, values })
    }

    #[inline]
    pub fn value_type(&self) -> ValueType {
        self.values.value_type()
    }

    #[inline]
    pub fn domain(&self) -> TimeRange {
        self.axis.domain()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn f64_column(name: &str, n: usize) -> FrameColumn {
        FrameColumn::new(name, ColumnValues::F64((0..n).map(|i| i as f64).collect()))
    }

    #[test]
    fn clock_axis() {
        let axis = TimeAxis::clock(1_000, 10, 4).unwrap();
        assert_eq!(axis.len(), 4);
        assert_eq!(axis.instant(0), Some(1_000));
        assert_eq!(axis.instant(3), Some(1_030));
        assert_eq!(axis.instant(4), None);
        assert_eq!(axis.domain(), TimeRange::new(1_000, 1_030));
    }

    #[test]
    fn clock_axis_invalid() {
        assert!(TimeAxis::clock(0, 0, 4).is_err());
        assert!(TimeAxis::clock(0, -5, 4).is_err());
        assert!(TimeAxis::clock(0, 10, 0).is_err());
    }

    #[test]
    fn list_axis_must_ascend() {
        assert!(TimeAxis::list(vec![]).is_err());
        assert!(TimeAxis::list(vec![3, 2, 1]).is_err());
        assert!(TimeAxis::list(vec![1, 1, 2]).is_err());
        assert!(TimeAxis::list(vec![1, 2, 3]).is_ok());
    }

    #[test]
    fn axis_equality_is_structural() {
        let clock = TimeAxis::clock(0, 10, 3).unwrap();
        let list = TimeAxis::list(vec![0, 10, 20]).unwrap();
        // same instants, different descriptor kinds.
        assert_ne!(clock, list);
        assert_eq!(clock, TimeAxis::clock(0, 10, 3).unwrap());
    }

    #[test]
    fn clock_slice_stays_clocked() {
        let axis = TimeAxis::clock(100, 5, 10).unwrap();
        let sub = axis.slice_rows(4..7);
        assert_eq!(
            sub,
            TimeAxis::Clock {
                start_nanos: 120,
                period_nanos: 5,
                count: 3
            }
        );
    }

    #[test]
    fn frame_validation() {
        let axis = TimeAxis::clock(0, 10, 3).unwrap();
        // length mismatch
        let err = IngestFrame::new(
            "r1",
            axis.clone(),
            vec![FrameColumn::new("a", ColumnValues::F64(vec![1.0, 2.0]))],
        )
        .unwrap_err();
        assert!(err.downcast_ref::<InvalidArgument>().is_some());

        // duplicate names
        assert!(IngestFrame::new("r1", axis.clone(), vec![f64_column("a", 3), f64_column("a", 3)]).is_err());

        // empty id
        assert!(IngestFrame::new("", axis.clone(), vec![f64_column("a", 3)]).is_err());

        let frame = IngestFrame::new("r1", axis, vec![f64_column("a", 3), f64_column("b", 3)]).unwrap();
        assert_eq!(frame.row_count(), 3);
        assert_eq!(frame.column_count(), 2);
    }

    #[test]
    fn frame_slicing_recomposes() {
        let axis = TimeAxis::clock(0, 10, 6).unwrap();
        let frame = IngestFrame::new("r1", axis, vec![f64_column("a", 6), f64_column("b", 6)]).unwrap();

        let head = frame.slice_rows(0..3);
        let tail = frame.slice_rows(3..6);
        let mut instants: Vec<i64> = head.axis().iter().collect();
        instants.extend(tail.axis().iter());
        assert_eq!(instants, frame.axis().iter().collect::<Vec<_>>());

        for (i, col) in frame.columns().iter().enumerate() {
            let mut rows = Vec::new();
            for part in [&head, &tail] {
                for r in 0..part.row_count() {
                    rows.push(part.columns()[i].values.scalar(r).unwrap());
                }
            }
            let want: Vec<_> = (0..frame.row_count()).map(|r| col.values.scalar(r).unwrap()).collect();
            assert_eq!(rows, want);
        }
    }

    #[test]
    fn bucket_malformed_length() {
        let bucket = DataBucket {
            source_name: "S1".into(),
            timestamps: Some(TimeAxis::clock(0, 10, 3).unwrap().to_proto()),
            column: Some(DataColumn {
                name: "S1".into(),
                values: Some(ColumnValues::F64(vec![1.0, 2.0]).to_proto()),
            }),
        };
        let err = RawBucket::from_proto(bucket, "q-1").unwrap_err();
        let malformed = err.downcast_ref::<MalformedBucket>().unwrap();
        assert_eq!(malformed.source, "S1");
        assert_eq!(malformed.request_id, "q-1");
    }

    #[test]
    fn array_column_round_trip() {
        let col = ColumnValues::Arr(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let back = ColumnValues::from_proto(col.to_proto());
        assert_eq!(col, back);
    }
}
