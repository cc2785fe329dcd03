//! aggregate assembly.
//!
//! blocks are ordered by start instant, overlapping neighbours are fused into
//! super domain blocks until every pair of domains is disjoint, and the
//! result is verified for source type consistency and interval integrity.

use std::collections::HashMap;

use crate::{
    error::{AggregateIntegrity, Error, InconsistentSourceType},
    frame::{TimeRange, ValueType},
    query::{
        block::SampledBlock,
        correlator::CorrelatedSet,
    },
};

/// ordered, disjoint sequence of sampled blocks representing one fulfilled
/// query.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledAggregate {
    blocks: Vec<SampledBlock>,
}

impl SampledAggregate {
    #[inline]
    pub fn blocks(&self) -> &[SampledBlock] {
        &self.blocks
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// total row count across blocks.
    pub fn sample_count(&self) -> usize {
        self.blocks.iter().map(SampledBlock::len).sum()
    }

    /// covered time domain, `None` for an empty aggregate.
    pub fn domain(&self) -> Option<TimeRange> {
        let first = self.blocks.first()?;
        let last = self.blocks.last()?;
        Some(TimeRange::new(first.domain().begin, last.domain().end))
    }

    /// union of source names across blocks, in first appearance order.
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for block in &self.blocks {
            for name in block.source_names() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// declared type of a source; identical in every block containing it.
    pub fn source_type(&self, source: &str) -> Option<ValueType> {
        self.blocks.iter().find_map(|b| b.value_type_of(source))
    }

    /// rough heap footprint in bytes.
    pub fn raw_allocation(&self) -> usize {
        self.blocks.iter().map(SampledBlock::raw_allocation).sum()
    }
}

/// builds a [SampledAggregate] from coalesced blocks.
pub struct Assembler {
    next_id: u64,
    blocks: Vec<SampledBlock>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            blocks: Vec::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// coalesce a correlated set and add the resulting block.
    pub fn push_correlated(&mut self, set: &CorrelatedSet) {
        let id = self.next_id();
        self.blocks.push(SampledBlock::from_correlated(set, id));
    }

    /// add every set of a correlation pass.
    pub fn extend_correlated<'a>(&mut self, sets: impl IntoIterator<Item = &'a CorrelatedSet>) {
        for set in sets {
            self.push_correlated(set);
        }
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<SampledBlock> {
        &mut self.blocks
    }

    /// order, fuse and verify the collected blocks.
    ///
    /// ties on the start instant break by end instant, then by block
    /// insertion id, so the output order is deterministic for a given input
    /// multiset.
    pub fn assemble(mut self) -> Result<SampledAggregate, Error> {
        self.blocks
            .sort_by_key(|b| (b.domain().begin, b.domain().end, b.id()));

        // fuse overlapping neighbours to fixpoint. a fused block starts at
        // the smaller of both starts, so sort order survives each fusion.
        let mut fused = true;
        while fused {
            fused = false;
            let mut i = 0;
            while i + 1 < self.blocks.len() {
                if self.blocks[i].domain().overlaps(&self.blocks[i + 1].domain()) {
                    let id = self.next_id();
                    let merged = SampledBlock::super_domain(&self.blocks[i], &self.blocks[i + 1], id)?;
                    self.blocks[i] = merged;
                    self.blocks.remove(i + 1);
                    fused = true;
                } else {
                    i += 1;
                }
            }
        }

        verify_source_types(&self.blocks)?;
        verify_integrity(&self.blocks)?;

        Ok(SampledAggregate { blocks: self.blocks })
    }
}

fn verify_source_types(blocks: &[SampledBlock]) -> Result<(), Error> {
    let mut declared: HashMap<&str, ValueType> = HashMap::new();
    for block in blocks {
        for source in block.sources() {
            let ty = source.cells.value_type();
            match declared.get(source.name.as_str()) {
                Some(first) if *first != ty => {
                    return Err(InconsistentSourceType {
                        source: source.name.clone(),
                        first: *first,
                        other: ty,
                    }
                    .into());
                }
                Some(_) => {}
                None => {
                    declared.insert(source.name.as_str(), ty);
                }
            }
        }
    }
    Ok(())
}

fn verify_integrity(blocks: &[SampledBlock]) -> Result<(), Error> {
    for pair in blocks.windows(2) {
        let (left, right) = (pair[0].domain(), pair[1].domain());
        if left.begin > right.begin {
            return Err(AggregateIntegrity(format!(
                "block starting at {} ordered after block starting at {}",
                left.begin, right.begin
            ))
            .into());
        }
        if left.overlaps(&right) {
            return Err(AggregateIntegrity(format!(
                "blocks [{}, {}] and [{}, {}] overlap after fusion",
                left.begin, left.end, right.begin, right.end
            ))
            .into());
        }
    }
    Ok(())
}
