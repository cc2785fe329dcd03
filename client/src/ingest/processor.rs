//! ingestion frame processing.
//!
//! frames are decomposed against the configured serialized size budget,
//! converted into wire requests and offered to the transmission buffer.
//! decomposition splits by rows first and falls back to column splits inside
//! a row slice when a single row still exceeds the budget. piece ids carry a
//! `-k/n` suffix; acknowledgement of the original frame requires all pieces.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use prost::Message;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedSender},
    task::JoinHandle,
};

use strata_proto::IngestDataRequest;

use crate::{
    buffer::BoundedBuffer,
    config::Config,
    error::{ClosedQueue, Error},
    frame::{ColumnValues, IngestFrame},
};

/// one failed frame, attached to the original client request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFailure {
    pub request_id: String,
    pub detail: String,
}

struct Shared {
    decomposition_failures: Mutex<Vec<FrameFailure>>,
    conversion_failures: Mutex<Vec<FrameFailure>>,
    processed: AtomicUsize,
}

struct Job {
    frame: IngestFrame,
    provider_id: u32,
}

/// converts ingestion frames into transport ready requests.
///
/// with a worker count above one, frames distribute round robin across a
/// task pool. all pieces of one frame stay with one worker, so piece order
/// within a frame survives; distinct frames interleave arbitrarily.
pub struct FrameProcessor {
    max_bytes: usize,
    buffer: Arc<BoundedBuffer<IngestDataRequest>>,
    workers: Mutex<Vec<UnboundedSender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_worker: AtomicUsize,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

impl FrameProcessor {
    pub fn new(cfg: &Config, buffer: Arc<BoundedBuffer<IngestDataRequest>>) -> Self {
        let shared = Arc::new(Shared {
            decomposition_failures: Mutex::new(Vec::new()),
            conversion_failures: Mutex::new(Vec::new()),
            processed: AtomicUsize::new(0),
        });

        let mut workers = Vec::new();
        let mut handles = Vec::new();
        if cfg.worker_count() > 1 {
            for _ in 0..cfg.worker_count() {
                let (tx, mut rx) = unbounded_channel::<Job>();
                let buffer = buffer.clone();
                let shared = shared.clone();
                let max_bytes = cfg.decompose_max_bytes();
                workers.push(tx);
                handles.push(tokio::spawn(async move {
                    while let Some(job) = rx.recv().await {
                        let _ = process(&buffer, &shared, max_bytes, job).await;
                    }
                }));
            }
        }

        Self {
            max_bytes: cfg.decompose_max_bytes(),
            buffer,
            workers: Mutex::new(workers),
            handles: Mutex::new(handles),
            next_worker: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            shared,
        }
    }

    /// decompose, convert and enqueue one frame.
    ///
    /// serial mode completes the whole path before returning; pool mode
    /// returns once the frame is handed to its worker. back-pressure from
    /// the buffer is felt by whoever runs the conversion.
    pub async fn submit(&self, frame: IngestFrame, provider_id: u32) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClosedQueue.into());
        }
        {
            let workers = self.workers.lock().unwrap();
            if !workers.is_empty() {
                let index = self.next_worker.fetch_add(1, Ordering::AcqRel) % workers.len();
                return workers[index]
                    .send(Job { frame, provider_id })
                    .map_err(|_| ClosedQueue.into());
            }
        }
        process(&self.buffer, &self.shared, self.max_bytes, Job { frame, provider_id }).await
    }

    /// frames fully processed so far (failed ones included).
    pub fn processed_count(&self) -> usize {
        self.shared.processed.load(Ordering::Acquire)
    }

    pub fn decomposition_failures(&self) -> Vec<FrameFailure> {
        self.shared.decomposition_failures.lock().unwrap().clone()
    }

    pub fn conversion_failures(&self) -> Vec<FrameFailure> {
        self.shared.conversion_failures.lock().unwrap().clone()
    }

    /// stop accepting frames and wait for the worker pool to drain.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.workers.lock().unwrap().clear();
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn process(
    buffer: &BoundedBuffer<IngestDataRequest>,
    shared: &Shared,
    max_bytes: usize,
    job: Job,
) -> Result<(), Error> {
    let Job { frame, provider_id } = job;
    let request_id = frame.request_id().to_string();

    let result = async {
        if let Err(detail) = validate_convertible(&frame) {
            shared.conversion_failures.lock().unwrap().push(FrameFailure {
                request_id: request_id.clone(),
                detail,
            });
            return Ok(());
        }

        let pieces = match decompose(&frame, provider_id, max_bytes) {
            Ok(pieces) => pieces,
            Err(detail) => {
                tracing::debug!(request = %request_id, "frame decomposition failed: {detail}");
                shared.decomposition_failures.lock().unwrap().push(FrameFailure {
                    request_id: request_id.clone(),
                    detail,
                });
                return Ok(());
            }
        };

        let requests: Vec<IngestDataRequest> = pieces.iter().map(|p| convert(p, provider_id)).collect();
        buffer.offer_all(requests).await
    }
    .await;

    shared.processed.fetch_add(1, Ordering::AcqRel);
    result
}

// structural checks conversion relies on. ragged structured arrays cannot be
// laid out with a fixed row stride on the wire.
fn validate_convertible(frame: &IngestFrame) -> Result<(), String> {
    for col in frame.columns() {
        if let ColumnValues::Arr(rows) = &col.values {
            let stride = rows.first().map_or(0, Vec::len);
            if rows.iter().any(|r| r.len() != stride) {
                return Err(format!("column {} holds ragged array rows", col.name));
            }
        }
    }
    if frame.row_count() > u32::MAX as usize {
        return Err(format!("frame holds {} rows, above the wire limit", frame.row_count()));
    }
    Ok(())
}

/// pure, deterministic conversion of one frame piece into its wire form.
fn convert(piece: &IngestFrame, provider_id: u32) -> IngestDataRequest {
    IngestDataRequest {
        provider_id,
        client_request_id: piece.request_id().to_string(),
        timestamps: Some(piece.axis().to_proto()),
        columns: piece.to_columns_proto(),
    }
}

fn encoded_size(piece: &IngestFrame, provider_id: u32) -> usize {
    convert(piece, provider_id).encoded_len()
}

// split the frame into the minimum number of near equal pieces that all fit
// under the byte budget.
fn decompose(frame: &IngestFrame, provider_id: u32, max_bytes: usize) -> Result<Vec<IngestFrame>, String> {
    if max_bytes == 0 || encoded_size(frame, provider_id) <= max_bytes {
        return Ok(vec![frame.clone()]);
    }

    let rows = frame.row_count();
    let total = encoded_size(frame, provider_id);
    let mut count = total.div_ceil(max_bytes).clamp(1, rows);
    let row_pieces = loop {
        let pieces = slice_rows_evenly(frame, count);
        let oversized = pieces.iter().any(|p| encoded_size(p, provider_id) > max_bytes);
        if !oversized {
            break pieces;
        }
        if count == rows {
            // single row slices still exceed the budget: split columns
            // within each row slice.
            break pieces;
        }
        count += 1;
    };

    let mut pieces = Vec::with_capacity(row_pieces.len());
    for piece in row_pieces {
        if encoded_size(&piece, provider_id) <= max_bytes {
            pieces.push(piece);
            continue;
        }
        pieces.extend(slice_columns_to_fit(&piece, provider_id, max_bytes)?);
    }

    let total_pieces = pieces.len();
    if total_pieces == 1 {
        return Ok(pieces);
    }
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(k, piece)| {
            let id = format!("{}-{}/{}", frame.request_id(), k + 1, total_pieces);
            piece.with_request_id(id)
        })
        .collect())
}

fn slice_rows_evenly(frame: &IngestFrame, count: usize) -> Vec<IngestFrame> {
    let rows = frame.row_count();
    let chunk = rows.div_ceil(count);
    (0..rows)
        .step_by(chunk)
        .map(|start| frame.slice_rows(start..(start + chunk).min(rows)))
        .collect()
}

fn slice_columns_to_fit(piece: &IngestFrame, provider_id: u32, max_bytes: usize) -> Result<Vec<IngestFrame>, String> {
    let cols = piece.column_count();
    let mut count = 2.min(cols);
    loop {
        let chunk = cols.div_ceil(count);
        let parts: Vec<IngestFrame> = (0..cols)
            .step_by(chunk)
            .map(|start| piece.slice_columns(start..(start + chunk).min(cols)))
            .collect();
        if parts.iter().all(|p| encoded_size(p, provider_id) <= max_bytes) {
            return Ok(parts);
        }
        if count == cols {
            return Err(format!(
                "a single cell of request {} exceeds the {max_bytes} byte budget",
                piece.request_id()
            ));
        }
        count += 1;
    }
}

#[cfg(test)]
mod test {
    use core::time::Duration;

    use super::*;

    use crate::{
        buffer::Polled,
        config::Capacity,
        frame::{FrameColumn, TimeAxis},
    };

    fn frame(id: &str, rows: usize, cols: usize) -> IngestFrame {
        let axis = TimeAxis::clock(0, 10, rows).unwrap();
        let columns = (0..cols)
            .map(|c| {
                FrameColumn::new(
                    format!("col{c}"),
                    ColumnValues::F64((0..rows).map(|r| (c * rows + r) as f64).collect()),
                )
            })
            .collect();
        IngestFrame::new(id, axis, columns).unwrap()
    }

    fn buffer() -> Arc<BoundedBuffer<IngestDataRequest>> {
        let buf = Arc::new(BoundedBuffer::new(Capacity::Count(4096), false));
        buf.activate().unwrap();
        buf
    }

    fn drain(buf: &BoundedBuffer<IngestDataRequest>) -> Vec<IngestDataRequest> {
        let mut out = Vec::new();
        while let Polled::Item(req) = buf.poll() {
            out.push(req);
        }
        out
    }

    #[tokio::test]
    async fn small_frame_passes_through_whole() {
        let buf = buffer();
        let mut cfg = Config::new();
        cfg.max_decomposed_bytes(1 << 20);
        let processor = FrameProcessor::new(&cfg, buf.clone());

        processor.submit(frame("r1", 10, 10), 7).await.unwrap();
        let out = drain(&buf);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].client_request_id, "r1");
        assert_eq!(out[0].provider_id, 7);
        assert!(processor.decomposition_failures().is_empty());
        assert!(processor.conversion_failures().is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_splits_by_rows() {
        let buf = buffer();
        let whole = encoded_size(&frame("r1", 90, 4), 1);
        let mut cfg = Config::new();
        cfg.max_decomposed_bytes(whole / 3);
        let processor = FrameProcessor::new(&cfg, buf.clone());

        processor.submit(frame("r1", 90, 4), 1).await.unwrap();
        let out = drain(&buf);
        assert!(out.len() >= 3, "expected at least 3 pieces, got {}", out.len());
        for (k, req) in out.iter().enumerate() {
            assert_eq!(req.client_request_id, format!("r1-{}/{}", k + 1, out.len()));
            assert!(req.encoded_len() <= whole / 3);
        }
    }

    #[tokio::test]
    async fn decomposition_recomposes_frame() {
        let buf = buffer();
        let original = frame("r1", 60, 5);
        let whole = encoded_size(&original, 1);
        let mut cfg = Config::new();
        cfg.max_decomposed_bytes(whole / 4);
        let processor = FrameProcessor::new(&cfg, buf.clone());
        processor.submit(original.clone(), 1).await.unwrap();

        // pieces concatenate back to the original rows and instants.
        let out = drain(&buf);
        let mut instants = Vec::new();
        let mut values = Vec::new();
        for req in &out {
            let axis = TimeAxis::from_proto(req.timestamps.clone().unwrap()).unwrap();
            instants.extend(axis.iter());
            let col = ColumnValues::from_proto(req.columns[0].values.clone().unwrap());
            for i in 0..col.len() {
                values.push(col.scalar(i).unwrap());
            }
        }
        assert_eq!(instants, original.axis().iter().collect::<Vec<_>>());
        let want: Vec<_> = (0..original.row_count())
            .map(|r| original.columns()[0].values.scalar(r).unwrap())
            .collect();
        assert_eq!(values, want);
    }

    #[tokio::test]
    async fn single_row_splits_by_columns() {
        let buf = buffer();
        let wide = frame("r1", 1, 64);
        let whole = encoded_size(&wide, 1);
        let mut cfg = Config::new();
        cfg.max_decomposed_bytes(whole / 4);
        let processor = FrameProcessor::new(&cfg, buf.clone());
        processor.submit(wide, 1).await.unwrap();

        let out = drain(&buf);
        assert!(out.len() >= 4);
        // column pieces partition the column set.
        let names: Vec<String> = out
            .iter()
            .flat_map(|req| req.columns.iter().map(|c| c.name.clone()))
            .collect();
        let want: Vec<String> = (0..64).map(|c| format!("col{c}")).collect();
        assert_eq!(names, want);
    }

    #[tokio::test]
    async fn unsplittable_cell_reports_decomposition_failure() {
        let buf = buffer();
        let axis = TimeAxis::clock(0, 10, 1).unwrap();
        let fat = IngestFrame::new(
            "r1",
            axis,
            vec![FrameColumn::new("blob", ColumnValues::Bytes(vec![vec![0u8; 4096]]))],
        )
        .unwrap();
        let mut cfg = Config::new();
        cfg.max_decomposed_bytes(256);
        let processor = FrameProcessor::new(&cfg, buf.clone());
        processor.submit(fat, 1).await.unwrap();

        assert!(drain(&buf).is_empty());
        let failures = processor.decomposition_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].request_id, "r1");
    }

    #[tokio::test]
    async fn ragged_array_reports_conversion_failure() {
        let buf = buffer();
        let axis = TimeAxis::clock(0, 10, 2).unwrap();
        let ragged = IngestFrame::new(
            "r1",
            axis,
            vec![FrameColumn::new(
                "arr",
                ColumnValues::Arr(vec![vec![1.0, 2.0], vec![3.0]]),
            )],
        )
        .unwrap();
        let processor = FrameProcessor::new(&Config::new(), buf.clone());
        processor.submit(ragged, 1).await.unwrap();

        assert!(drain(&buf).is_empty());
        let failures = processor.conversion_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].detail.contains("ragged"));
    }

    #[tokio::test]
    async fn conversion_is_deterministic() {
        let piece = frame("r1", 8, 3);
        assert_eq!(convert(&piece, 5), convert(&piece, 5));
        assert_eq!(
            convert(&piece, 5).encode_to_vec(),
            convert(&piece, 5).encode_to_vec()
        );
    }

    #[tokio::test]
    async fn worker_pool_preserves_piece_order_per_frame() {
        let buf = buffer();
        let whole = encoded_size(&frame("rx", 80, 3), 1);
        let mut cfg = Config::new();
        cfg.workers(4).max_decomposed_bytes(whole / 4);
        let processor = FrameProcessor::new(&cfg, buf.clone());

        for f in 0..6 {
            processor.submit(frame(&format!("f{f}"), 80, 3), 1).await.unwrap();
        }
        processor.close().await;

        let out = drain(&buf);
        assert!(!out.is_empty());
        // within one base id the -k/n sequence must be ascending.
        let mut last_piece: std::collections::HashMap<String, usize> = Default::default();
        for req in &out {
            let (base, suffix) = req.client_request_id.rsplit_once('-').unwrap();
            let k: usize = suffix.split('/').next().unwrap().parse().unwrap();
            let prev = last_piece.insert(base.to_string(), k);
            assert!(prev.is_none_or(|p| p + 1 == k), "piece order broken for {base}");
        }
        assert_eq!(processor.processed_count(), 6);
    }

    #[tokio::test]
    async fn submit_after_close_fails_in_pool_mode() {
        let buf = buffer();
        let mut cfg = Config::new();
        cfg.workers(2);
        let processor = FrameProcessor::new(&cfg, buf.clone());
        processor.close().await;
        let err = processor.submit(frame("r1", 2, 2), 1).await.unwrap_err();
        assert!(err.is_closed_queue());

        // poll_timeout path stays quiet.
        assert!(matches!(
            buf.poll_timeout(Duration::from_millis(5)).await,
            Polled::TimedOut
        ));
    }
}
