//! sampled blocks and super domain fusion.
//!
//! a correlated set coalesces into one sampled block: a typed tabular region
//! with a single timestamp axis and one cell column per source. blocks whose
//! time domains overlap but whose axes differ fuse into a union axis block
//! where positions a source never sampled hold the absent cell.

use std::collections::HashMap;

use crate::{
    error::{Error, InconsistentSourceType, InvalidArgument},
    frame::{ColumnValues, ScalarValue, TimeAxis, TimeRange, ValueType},
    query::correlator::CorrelatedSet,
};

/// timestamp axis of a sampled block.
///
/// `Union` marks a super domain axis: the sorted union of two originally
/// overlapping block axes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockAxis {
    Clock {
        start_nanos: i64,
        period_nanos: i64,
        count: usize,
    },
    List(Vec<i64>),
    Union(Vec<i64>),
}

impl From<TimeAxis> for BlockAxis {
    fn from(axis: TimeAxis) -> Self {
        match axis {
            TimeAxis::Clock {
                start_nanos,
                period_nanos,
                count,
            } => Self::Clock {
                start_nanos,
                period_nanos,
                count,
            },
            TimeAxis::List(nanos) => Self::List(nanos),
        }
    }
}

impl BlockAxis {
    pub fn len(&self) -> usize {
        match self {
            Self::Clock { count, .. } => *count,
            Self::List(nanos) | Self::Union(nanos) => nanos.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn instant(&self, index: usize) -> Option<i64> {
        match self {
            Self::Clock {
                start_nanos,
                period_nanos,
                count,
            } => (index < *count).then(|| start_nanos + period_nanos * index as i64),
            Self::List(nanos) | Self::Union(nanos) => nanos.get(index).copied(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len()).map(|i| self.instant(i).unwrap())
    }

    pub fn first(&self) -> i64 {
        self.instant(0).expect("block axis is never empty")
    }

    pub fn last(&self) -> i64 {
        self.instant(self.len() - 1).expect("block axis is never empty")
    }

    pub fn domain(&self) -> TimeRange {
        TimeRange::new(self.first(), self.last())
    }

    #[inline]
    pub fn is_super_domain(&self) -> bool {
        matches!(self, Self::Union(_))
    }
}

/// homogeneous cell column. `None` is the typed absent sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum CellColumn {
    Bool(Vec<Option<bool>>),
    I32(Vec<Option<i32>>),
    I64(Vec<Option<i64>>),
    F32(Vec<Option<f32>>),
    F64(Vec<Option<f64>>),
    Str(Vec<Option<String>>),
    Bytes(Vec<Option<Vec<u8>>>),
    Arr(Vec<Option<Vec<f64>>>),
}

macro_rules! per_variant {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            CellColumn::Bool($v) => $body,
            CellColumn::I32($v) => $body,
            CellColumn::I64($v) => $body,
            CellColumn::F32($v) => $body,
            CellColumn::F64($v) => $body,
            CellColumn::Str($v) => $body,
            CellColumn::Bytes($v) => $body,
            CellColumn::Arr($v) => $body,
        }
    };
}

impl CellColumn {
    /// column of `len` absent cells of the given type.
    pub fn absent(ty: ValueType, len: usize) -> Self {
        match ty {
            ValueType::Bool => Self::Bool(vec![None; len]),
            ValueType::I32 => Self::I32(vec![None; len]),
            ValueType::I64 => Self::I64(vec![None; len]),
            ValueType::F32 => Self::F32(vec![None; len]),
            ValueType::F64 => Self::F64(vec![None; len]),
            ValueType::Str => Self::Str(vec![None; len]),
            ValueType::Bytes => Self::Bytes(vec![None; len]),
            ValueType::Arr => Self::Arr(vec![None; len]),
        }
    }

    /// fully present column over dense values.
    pub fn from_values(values: &ColumnValues) -> Self {
        match values {
            ColumnValues::Bool(v) => Self::Bool(v.iter().copied().map(Some).collect()),
            ColumnValues::I32(v) => Self::I32(v.iter().copied().map(Some).collect()),
            ColumnValues::I64(v) => Self::I64(v.iter().copied().map(Some).collect()),
            ColumnValues::F32(v) => Self::F32(v.iter().copied().map(Some).collect()),
            ColumnValues::F64(v) => Self::F64(v.iter().copied().map(Some).collect()),
            ColumnValues::Str(v) => Self::Str(v.iter().cloned().map(Some).collect()),
            ColumnValues::Bytes(v) => Self::Bytes(v.iter().cloned().map(Some).collect()),
            ColumnValues::Arr(v) => Self::Arr(v.iter().cloned().map(Some).collect()),
        }
    }

    pub fn len(&self) -> usize {
        per_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

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

    /// cell at row index. `None` for absent cells and out of range rows.
    pub fn cell(&self, index: usize) -> Option<ScalarValue> {
        match self {
            Self::Bool(v) => v.get(index).copied().flatten().map(ScalarValue::Bool),
            Self::I32(v) => v.get(index).copied().flatten().map(ScalarValue::I32),
            Self::I64(v) => v.get(index).copied().flatten().map(ScalarValue::I64),
            Self::F32(v) => v.get(index).copied().flatten().map(ScalarValue::F32),
            Self::F64(v) => v.get(index).copied().flatten().map(ScalarValue::F64),
            Self::Str(v) => v.get(index).cloned().flatten().map(ScalarValue::Str),
            Self::Bytes(v) => v.get(index).cloned().flatten().map(ScalarValue::Bytes),
            Self::Arr(v) => v.get(index).cloned().flatten().map(ScalarValue::Arr),
        }
    }

    /// place a value at the given row. the value type must match the column.
    pub fn put(&mut self, index: usize, value: ScalarValue) -> Result<(), Error> {
        match (self, value) {
            (Self::Bool(v), ScalarValue::Bool(x)) => v[index] = Some(x),
            (Self::I32(v), ScalarValue::I32(x)) => v[index] = Some(x),
            (Self::I64(v), ScalarValue::I64(x)) => v[index] = Some(x),
            (Self::F32(v), ScalarValue::F32(x)) => v[index] = Some(x),
            (Self::F64(v), ScalarValue::F64(x)) => v[index] = Some(x),
            (Self::Str(v), ScalarValue::Str(x)) => v[index] = Some(x),
            (Self::Bytes(v), ScalarValue::Bytes(x)) => v[index] = Some(x),
            (Self::Arr(v), ScalarValue::Arr(x)) => v[index] = Some(x),
            (col, value) => {
                return Err(InvalidArgument(format!(
                    "cannot place a {} value into a {} column",
                    value.value_type(),
                    col.value_type()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// append every cell of `other`. types must match.
    pub fn extend_from(&mut self, other: &CellColumn) -> Result<(), Error> {
        match (self, other) {
            (Self::Bool(v), Self::Bool(o)) => v.extend(o.iter().copied()),
            (Self::I32(v), Self::I32(o)) => v.extend(o.iter().copied()),
            (Self::I64(v), Self::I64(o)) => v.extend(o.iter().copied()),
            (Self::F32(v), Self::F32(o)) => v.extend(o.iter().copied()),
            (Self::F64(v), Self::F64(o)) => v.extend(o.iter().copied()),
            (Self::Str(v), Self::Str(o)) => v.extend(o.iter().cloned()),
            (Self::Bytes(v), Self::Bytes(o)) => v.extend(o.iter().cloned()),
            (Self::Arr(v), Self::Arr(o)) => v.extend(o.iter().cloned()),
            (col, other) => {
                return Err(InvalidArgument(format!(
                    "cannot append a {} column to a {} column",
                    other.value_type(),
                    col.value_type()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// append `count` absent cells.
    pub fn extend_absent(&mut self, count: usize) {
        per_variant!(self, v => v.extend(core::iter::repeat_n(None, count)))
    }

    /// rough heap footprint of the column in bytes.
    pub fn raw_allocation(&self) -> usize {
        match self {
            Self::Bool(v) => v.len() * size_of::<Option<bool>>(),
            Self::I32(v) => v.len() * size_of::<Option<i32>>(),
            Self::I64(v) => v.len() * size_of::<Option<i64>>(),
            Self::F32(v) => v.len() * size_of::<Option<f32>>(),
            Self::F64(v) => v.len() * size_of::<Option<f64>>(),
            Self::Str(v) => v.iter().map(|s| size_of::<Option<String>>() + s.as_ref().map_or(0, String::len)).sum(),
            Self::Bytes(v) => v.iter().map(|b| size_of::<Option<Vec<u8>>>() + b.as_ref().map_or(0, Vec::len)).sum(),
            Self::Arr(v) => v
                .iter()
                .map(|r| size_of::<Option<Vec<f64>>>() + r.as_ref().map_or(0, |r| r.len() * size_of::<f64>()))
                .sum(),
        }
    }
}

/// one named cell column of a sampled block.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceColumn {
    pub name: String,
    pub cells: CellColumn,
}

/// typed tabular region of a query result: one timestamp axis, one cell
/// column per source. source names are unique within the block.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledBlock {
    id: u64,
    axis: BlockAxis,
    sources: Vec<SourceColumn>,
}

impl SampledBlock {
    /// coalesce a correlated set into a block. the block adopts the set's
    /// timestamp descriptor; every cell is present.
    pub fn from_correlated(set: &CorrelatedSet, id: u64) -> Self {
        let sources = set
            .buckets()
            .iter()
            .map(|bucket| SourceColumn {
                name: bucket.source.clone(),
                cells: CellColumn::from_values(&bucket.values),
            })
            .collect();
        Self {
            id,
            axis: BlockAxis::from(set.axis().clone()),
            sources,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(id: u64, axis: BlockAxis, sources: Vec<SourceColumn>) -> Self {
        Self { id, axis, sources }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn time_axis(&self) -> &BlockAxis {
        &self.axis
    }

    /// row count of the block.
    #[inline]
    pub fn len(&self) -> usize {
        self.axis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axis.is_empty()
    }

    #[inline]
    pub fn domain(&self) -> TimeRange {
        self.axis.domain()
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.name.as_str())
    }

    pub fn sources(&self) -> &[SourceColumn] {
        &self.sources
    }

    pub fn column(&self, source: &str) -> Option<&CellColumn> {
        self.sources.iter().find(|s| s.name == source).map(|s| &s.cells)
    }

    pub fn value_type_of(&self, source: &str) -> Option<ValueType> {
        self.column(source).map(CellColumn::value_type)
    }

    /// rough heap footprint of the block in bytes.
    pub fn raw_allocation(&self) -> usize {
        let axis = match &self.axis {
            BlockAxis::Clock { .. } => size_of::<i64>() * 3,
            BlockAxis::List(nanos) | BlockAxis::Union(nanos) => nanos.len() * size_of::<i64>(),
        };
        axis + self.sources.iter().map(|s| s.cells.raw_allocation()).sum::<usize>()
    }

    /// fuse two blocks with overlapping domains into one super domain block.
    ///
    /// the result axis is the sorted union of both input axes. every source
    /// of either input is re-laid onto the union with absent cells at the
    /// instants it never sampled. when both inputs carry the same source its
    /// declared types must agree; at instants both sampled, `a` wins.
    pub fn super_domain(a: &SampledBlock, b: &SampledBlock, id: u64) -> Result<SampledBlock, Error> {
        let mut union: Vec<i64> = a.axis.iter().chain(b.axis.iter()).collect();
        union.sort_unstable();
        union.dedup();

        let position: HashMap<i64, usize> = union.iter().enumerate().map(|(i, t)| (*t, i)).collect();

        let mut sources: Vec<SourceColumn> = Vec::with_capacity(a.sources.len() + b.sources.len());
        for source in &a.sources {
            let mut cells = CellColumn::absent(source.cells.value_type(), union.len());
            if let Some(b_cells) = b.column(&source.name) {
                if b_cells.value_type() != source.cells.value_type() {
                    return Err(InconsistentSourceType {
                        source: source.name.clone(),
                        first: source.cells.value_type(),
                        other: b_cells.value_type(),
                    }
                    .into());
                }
                // b first so that a overwrites at shared instants.
                place(&mut cells, &b.axis, b_cells, &position)?;
            }
            place(&mut cells, &a.axis, &source.cells, &position)?;
            sources.push(SourceColumn {
                name: source.name.clone(),
                cells,
            });
        }
        for source in &b.sources {
            if a.column(&source.name).is_some() {
                // already laid out while walking a's sources.
                continue;
            }
            let mut cells = CellColumn::absent(source.cells.value_type(), union.len());
            place(&mut cells, &b.axis, &source.cells, &position)?;
            sources.push(SourceColumn {
                name: source.name.clone(),
                cells,
            });
        }

        Ok(SampledBlock {
            id,
            axis: BlockAxis::Union(union),
            sources,
        })
    }
}

fn place(
    cells: &mut CellColumn,
    axis: &BlockAxis,
    from: &CellColumn,
    position: &HashMap<i64, usize>,
) -> Result<(), Error> {
    for (row, instant) in axis.iter().enumerate() {
        if let Some(value) = from.cell(row) {
            let index = position[&instant];
            cells.put(index, value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn block(id: u64, axis: BlockAxis, sources: &[(&str, &[f64])]) -> SampledBlock {
        let sources = sources
            .iter()
            .map(|(name, values)| SourceColumn {
                name: name.to_string(),
                cells: CellColumn::from_values(&ColumnValues::F64(values.to_vec())),
            })
            .collect();
        SampledBlock::from_parts(id, axis, sources)
    }

    #[test]
    fn absent_cells() {
        let mut col = CellColumn::absent(ValueType::F64, 3);
        assert_eq!(col.len(), 3);
        assert_eq!(col.cell(0), None);
        col.put(1, ScalarValue::F64(4.5)).unwrap();
        assert_eq!(col.cell(1), Some(ScalarValue::F64(4.5)));
        assert!(col.put(0, ScalarValue::Bool(true)).is_err());
    }

    #[test]
    fn super_domain_union_axis() {
        // overlapping domains, distinct axes.
        let a = block(
            1,
            BlockAxis::Clock {
                start_nanos: 0,
                period_nanos: 20,
                count: 3,
            },
            &[("S1", &[1.0, 2.0, 3.0])],
        );
        let b = block(2, BlockAxis::List(vec![10, 30, 50]), &[("S2", &[7.0, 8.0, 9.0])]);

        let fused = SampledBlock::super_domain(&a, &b, 3).unwrap();
        assert!(fused.time_axis().is_super_domain());
        let instants: Vec<i64> = fused.time_axis().iter().collect();
        assert_eq!(instants, [0, 10, 20, 30, 40, 50]);

        let s1 = fused.column("S1").unwrap();
        let s2 = fused.column("S2").unwrap();
        assert_eq!(s1.cell(0), Some(ScalarValue::F64(1.0)));
        assert_eq!(s1.cell(1), None);
        assert_eq!(s1.cell(2), Some(ScalarValue::F64(2.0)));
        assert_eq!(s2.cell(1), Some(ScalarValue::F64(7.0)));
        assert_eq!(s2.cell(5), Some(ScalarValue::F64(9.0)));
        assert_eq!(s2.cell(0), None);
        assert_eq!(fused.len(), 6);
    }

    #[test]
    fn super_domain_shared_source_first_wins() {
        let a = block(
            1,
            BlockAxis::List(vec![0, 10]),
            &[("S1", &[1.0, 2.0])],
        );
        let b = block(2, BlockAxis::List(vec![10, 20]), &[("S1", &[99.0, 3.0])]);

        let fused = SampledBlock::super_domain(&a, &b, 3).unwrap();
        let s1 = fused.column("S1").unwrap();
        assert_eq!(s1.cell(0), Some(ScalarValue::F64(1.0)));
        // shared instant 10: a's sample wins.
        assert_eq!(s1.cell(1), Some(ScalarValue::F64(2.0)));
        assert_eq!(s1.cell(2), Some(ScalarValue::F64(3.0)));
        // the source appears once, not twice.
        assert_eq!(fused.source_names().count(), 1);
    }

    #[test]
    fn super_domain_type_mismatch() {
        let a = block(1, BlockAxis::List(vec![0, 10]), &[("S1", &[1.0, 2.0])]);
        let b = SampledBlock::from_parts(
            2,
            BlockAxis::List(vec![10, 20]),
            vec![SourceColumn {
                name: "S1".into(),
                cells: CellColumn::from_values(&ColumnValues::I64(vec![1, 2])),
            }],
        );
        let err = SampledBlock::super_domain(&a, &b, 3).unwrap_err();
        assert!(err.downcast_ref::<InconsistentSourceType>().is_some());
    }

    #[test]
    fn raw_allocation_grows_with_rows() {
        let small = block(1, BlockAxis::List(vec![0, 10]), &[("S1", &[1.0, 2.0])]);
        let large = block(
            2,
            BlockAxis::List((0..100).map(|i| i * 10).collect()),
            &[("S1", &(0..100).map(|i| i as f64).collect::<Vec<_>>())],
        );
        assert!(large.raw_allocation() > small.raw_allocation());
    }
}
