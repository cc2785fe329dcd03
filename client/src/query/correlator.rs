//! raw data correlation.
//!
//! buckets drained from the response buffer are grouped into correlated sets
//! by timestamp descriptor identity. within one set every source appears at
//! most once; a bucket whose source already sits in every matching set opens
//! a new set under the same descriptor.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use strata_proto::{query_response, QueryResponse};

use crate::{
    buffer::{BoundedBuffer, Polled},
    config::SectionConfig,
    error::{Error, MalformedBucket},
    frame::{RawBucket, TimeAxis},
};

/// unordered collection of single source buckets sharing one timestamp
/// descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedSet {
    axis: TimeAxis,
    buckets: Vec<RawBucket>,
}

impl CorrelatedSet {
    fn new(bucket: RawBucket) -> Self {
        Self {
            axis: bucket.axis.clone(),
            buckets: vec![bucket],
        }
    }

    #[inline]
    pub fn axis(&self) -> &TimeAxis {
        &self.axis
    }

    #[inline]
    pub fn buckets(&self) -> &[RawBucket] {
        &self.buckets
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.source.as_str())
    }

    fn contains_source(&self, source: &str) -> bool {
        self.buckets.iter().any(|b| b.source == source)
    }

    // admit the bucket when the descriptor matches and the source is new.
    fn try_insert(&mut self, bucket: RawBucket) -> Option<RawBucket> {
        if self.axis == bucket.axis && !self.contains_source(&bucket.source) {
            self.buckets.push(bucket);
            None
        } else {
            Some(bucket)
        }
    }
}

fn insert_into(sets: &mut Vec<CorrelatedSet>, bucket: RawBucket) {
    let mut bucket = bucket;
    for set in sets.iter_mut() {
        match set.try_insert(bucket) {
            None => return,
            Some(back) => bucket = back,
        }
    }
    sets.push(CorrelatedSet::new(bucket));
}

// merge source sets into target preserving target set order; sets that fit
// nowhere are appended. deterministic for a fixed input order.
fn merge_into(target: &mut Vec<CorrelatedSet>, source: Vec<CorrelatedSet>) {
    for set in source {
        for bucket in set.buckets {
            insert_into(target, bucket);
        }
    }
}

/// correlates raw buckets of one query into [CorrelatedSet]s.
///
/// the concurrency knobs are live tunable between query executions: batches
/// of at least `pivot_size` buckets are correlated by up to `max_threads`
/// parallel tasks whose partial groupings merge deterministically, smaller
/// batches serially.
pub struct Correlator {
    request_id: String,
    concurrency_enabled: bool,
    max_threads: AtomicUsize,
    pivot_size: AtomicUsize,
    sets: Mutex<Vec<CorrelatedSet>>,
    failures: Mutex<Vec<MalformedBucket>>,
}

impl Correlator {
    pub fn new(request_id: impl Into<String>, cfg: &SectionConfig) -> Self {
        Self {
            request_id: request_id.into(),
            concurrency_enabled: cfg.concurrency_enabled(),
            max_threads: AtomicUsize::new(cfg.max_threads()),
            pivot_size: AtomicUsize::new(cfg.pivot_size()),
            sets: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads.load(Ordering::Acquire)
    }

    /// upper bound on parallel correlation tasks. takes effect at the next
    /// batch.
    pub fn set_max_threads(&self, count: usize) {
        self.max_threads.store(count.max(1), Ordering::Release);
    }

    pub fn pivot_size(&self) -> usize {
        self.pivot_size.load(Ordering::Acquire)
    }

    /// minimum batch cardinality for parallel correlation. below it batches
    /// are processed serially regardless of worker count.
    pub fn set_pivot_size(&self, size: usize) {
        self.pivot_size.store(size, Ordering::Release);
    }

    /// malformed buckets skipped so far, attached to source and request id.
    pub fn failures(&self) -> Vec<MalformedBucket> {
        self.failures.lock().unwrap().clone()
    }

    /// snapshot of the correlated sets built so far.
    pub fn sets(&self) -> Vec<CorrelatedSet> {
        self.sets.lock().unwrap().clone()
    }

    /// take ownership of the correlated sets, leaving the correlator empty.
    pub fn into_sets(self) -> Vec<CorrelatedSet> {
        self.sets.into_inner().unwrap()
    }

    /// correlate one batch of wire buckets.
    pub async fn correlate(&self, buckets: Vec<strata_proto::DataBucket>) {
        let mut valid = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            match RawBucket::from_proto(bucket, &self.request_id) {
                Ok(bucket) => valid.push(bucket),
                Err(e) => match e.downcast_ref::<MalformedBucket>() {
                    Some(malformed) => self.failures.lock().unwrap().push(malformed.clone()),
                    None => {
                        tracing::debug!(request = %self.request_id, "dropping undecodable bucket: {e}");
                    }
                },
            }
        }

        let threads = self.max_threads();
        let pivot = self.pivot_size();
        if self.concurrency_enabled && threads > 1 && valid.len() >= pivot.max(2) {
            self.correlate_parallel(valid, threads).await;
        } else {
            let mut sets = self.sets.lock().unwrap();
            for bucket in valid {
                insert_into(&mut sets, bucket);
            }
        }
    }

    async fn correlate_parallel(&self, buckets: Vec<RawBucket>, threads: usize) {
        let chunk_len = buckets.len().div_ceil(threads);
        let mut handles = Vec::new();
        let mut buckets = buckets;
        while !buckets.is_empty() {
            let rest = buckets.split_off(chunk_len.min(buckets.len()));
            let chunk = std::mem::replace(&mut buckets, rest);
            handles.push(tokio::spawn(async move {
                let mut local = Vec::new();
                for bucket in chunk {
                    insert_into(&mut local, bucket);
                }
                local
            }));
        }
        // partial groupings merge in chunk order so the outcome does not
        // depend on task scheduling.
        let mut partials = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(partial) = handle.await {
                partials.push(partial);
            }
        }
        let mut sets = self.sets.lock().unwrap();
        for partial in partials {
            merge_into(&mut sets, partial);
        }
    }

    /// drain a response buffer to exhaustion, correlating every bucket page.
    /// returns once the buffer terminates; the built sets remain accessible
    /// on the correlator.
    pub async fn drain(&self, buffer: &BoundedBuffer<QueryResponse>) -> Result<(), Error> {
        loop {
            match buffer.take().await {
                Polled::Item(response) => {
                    if let Some(query_response::Result::Data(page)) = response.result {
                        self.correlate(page.buckets).await;
                    }
                }
                Polled::Closed => return Ok(()),
                Polled::Canceled => return Err(crate::error::Canceled.into()),
                Polled::Empty | Polled::TimedOut => unreachable!("take does not time out"),
            }
        }
    }
}

/// shared handle used when several stages feed one correlator.
pub type SharedCorrelator = Arc<Correlator>;

#[cfg(test)]
mod test {
    use super::*;

    use crate::{
        config::Config,
        frame::ColumnValues,
    };
    use strata_proto::{DataBucket, DataColumn};

    fn proto_bucket(source: &str, axis: &TimeAxis, values: ColumnValues) -> DataBucket {
        DataBucket {
            source_name: source.to_string(),
            timestamps: Some(axis.to_proto()),
            column: Some(DataColumn {
                name: source.to_string(),
                values: Some(values.to_proto()),
            }),
        }
    }

    fn f64s(n: usize) -> ColumnValues {
        ColumnValues::F64((0..n).map(|i| i as f64).collect())
    }

    fn correlator() -> Correlator {
        Correlator::new("q-test", Config::new().query())
    }

    #[tokio::test]
    async fn groups_by_descriptor_identity() {
        let clock_a = TimeAxis::clock(0, 10, 4).unwrap();
        let clock_b = TimeAxis::clock(40, 10, 4).unwrap();
        let list = TimeAxis::list(vec![0, 10, 20, 30]).unwrap();

        let correlator = correlator();
        correlator
            .correlate(vec![
                proto_bucket("S1", &clock_a, f64s(4)),
                proto_bucket("S2", &clock_a, f64s(4)),
                proto_bucket("S1", &clock_b, f64s(4)),
                // same instants as clock_a but an explicit list: not equal.
                proto_bucket("S3", &list, f64s(4)),
            ])
            .await;

        let sets = correlator.sets();
        assert_eq!(sets.len(), 3);
        let a = sets.iter().find(|s| s.axis() == &clock_a).unwrap();
        let mut names: Vec<_> = a.source_names().collect();
        names.sort_unstable();
        assert_eq!(names, ["S1", "S2"]);
    }

    #[tokio::test]
    async fn duplicate_source_opens_new_set() {
        let axis = TimeAxis::clock(0, 10, 4).unwrap();
        let correlator = correlator();
        correlator
            .correlate(vec![
                proto_bucket("S1", &axis, f64s(4)),
                proto_bucket("S1", &axis, f64s(4)),
            ])
            .await;

        let sets = correlator.sets();
        assert_eq!(sets.len(), 2);
        for set in &sets {
            // each source at most once per set.
            let mut names: Vec<_> = set.source_names().collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), set.buckets().len());
        }
    }

    #[tokio::test]
    async fn malformed_bucket_skipped_and_reported() {
        let axis = TimeAxis::clock(0, 10, 4).unwrap();
        let correlator = correlator();
        correlator
            .correlate(vec![
                proto_bucket("S1", &axis, f64s(4)),
                proto_bucket("S2", &axis, f64s(3)),
            ])
            .await;

        let sets = correlator.sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].buckets().len(), 1);

        let failures = correlator.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source, "S2");
        assert_eq!(failures[0].request_id, "q-test");
    }

    #[tokio::test]
    async fn parallel_matches_serial() {
        let mut buckets = Vec::new();
        for group in 0..8 {
            let axis = TimeAxis::clock(group * 1_000, 10, 16).unwrap();
            for source in 0..12 {
                buckets.push(proto_bucket(&format!("S{source}"), &axis, f64s(16)));
            }
        }

        let serial = correlator();
        serial.set_max_threads(1);
        serial.correlate(buckets.clone()).await;

        let parallel = correlator();
        parallel.set_max_threads(4);
        parallel.set_pivot_size(8);
        parallel.correlate(buckets).await;

        let canon = |mut sets: Vec<CorrelatedSet>| {
            for set in &mut sets {
                set.buckets.sort_by(|a, b| a.source.cmp(&b.source));
            }
            sets.sort_by_key(|s| s.axis().first());
            sets
        };
        assert_eq!(canon(serial.sets()), canon(parallel.sets()));
    }

    #[tokio::test]
    async fn knobs_are_live_tunable() {
        let correlator = correlator();
        correlator.set_max_threads(9);
        correlator.set_pivot_size(3);
        assert_eq!(correlator.max_threads(), 9);
        assert_eq!(correlator.pivot_size(), 3);
        // zero thread count clamps to serial.
        correlator.set_max_threads(0);
        assert_eq!(correlator.max_threads(), 1);
    }
}
