//! user visible data table over an assembled aggregate.

use core::fmt;

use crate::{
    error::{Error, InvalidArgument},
    frame::{ScalarValue, TimeRange, ValueType},
    query::{aggregate::SampledAggregate, block::CellColumn},
};

/// one named table column. length equals the table row count; cells a source
/// never sampled are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    name: String,
    cells: CellColumn,
}

impl TableColumn {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value_type(&self) -> ValueType {
        self.cells.value_type()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// cell at row index. `None` marks an absent sample.
    pub fn cell(&self, row: usize) -> Option<ScalarValue> {
        self.cells.cell(row)
    }
}

/// row indexed, column named rectangular view over one fulfilled query.
///
/// rows are the concatenated block timestamp axes in aggregate order; every
/// column spans all rows with absent cells where its source was not sampled.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    instants: Vec<i64>,
    columns: Vec<TableColumn>,
}

impl DataTable {
    /// project an aggregate into its table form.
    pub fn from_aggregate(aggregate: &SampledAggregate) -> Result<Self, Error> {
        let mut instants = Vec::with_capacity(aggregate.sample_count());
        for block in aggregate.blocks() {
            instants.extend(block.time_axis().iter());
        }

        let names = aggregate.source_names();
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let ty = aggregate
                .source_type(&name)
                .expect("source name union always resolves a type");
            let mut cells = CellColumn::absent(ty, 0);
            for block in aggregate.blocks() {
                match block.column(&name) {
                    Some(block_cells) => cells.extend_from(block_cells)?,
                    // blocks lacking the source contribute an absent run.
                    None => cells.extend_absent(block.len()),
                }
            }
            columns.push(TableColumn { name, cells });
        }

        Ok(Self { instants, columns })
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.instants.len()
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }

    /// ordered row instants, epoch nanoseconds.
    #[inline]
    pub fn instants(&self) -> &[i64] {
        &self.instants
    }

    pub fn instant(&self, row: usize) -> Option<i64> {
        self.instants.get(row).copied()
    }

    /// covered time domain, `None` for an empty table.
    pub fn domain(&self) -> Option<TimeRange> {
        Some(TimeRange::new(*self.instants.first()?, *self.instants.last()?))
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(TableColumn::name)
    }

    pub fn column_by_index(&self, index: usize) -> Result<&TableColumn, Error> {
        self.columns
            .get(index)
            .ok_or_else(|| InvalidArgument(format!("column index {index} out of {}", self.columns.len())).into())
    }

    pub fn column_by_name(&self, name: &str) -> Result<&TableColumn, Error> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| InvalidArgument(format!("no column named {name}")).into())
    }

    /// cell of `source` at `row`; `None` when the source was not sampled at
    /// that row's instant.
    pub fn value(&self, row: usize, source: &str) -> Result<Option<ScalarValue>, Error> {
        if row >= self.row_count() {
            return Err(InvalidArgument(format!("row {row} out of {}", self.row_count())).into());
        }
        Ok(self.column_by_name(source)?.cell(row))
    }
}

impl fmt::Display for DataTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data table: {} rows x {} columns", self.row_count(), self.column_count())
    }
}
