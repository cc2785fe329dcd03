//! evaluation case execution against the in process platform.

use std::{sync::Arc, time::Instant};

use prost::Message;

use strata_client::{
    query::{self, QueryOutcome},
    Config, IngestTransmitter, LocalPlatform, ProviderRegistration,
};
use strata_proto::QueryRequest;

use crate::catalog::{self, Decomp, RequestSpec, SourceTypes};

const T0: i64 = 1_700_000_000_000_000_000;
const PERIOD: i64 = 1_000_000;

/// exit taxonomy of the tool; the numeric codes are part of the CLI contract.
#[derive(Debug)]
pub enum EvalError {
    InvalidInput(String),
    Init(String),
    Output(String),
    Execution(String),
    Transport(String),
}

impl EvalError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => 1,
            Self::Init(_) => 2,
            Self::Output(_) => 3,
            Self::Execution(_) => 4,
            Self::Transport(_) => 5,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput(m) | Self::Init(m) | Self::Output(m) | Self::Execution(m) | Self::Transport(m) => m,
        }
    }
}

/// knobs shared by every case of one invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub threads: usize,
    pub pivot: usize,
    pub decomp: Decomp,
    pub stypes: SourceTypes,
}

/// outcome of one evaluation case.
#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: &'static str,
    pub samples: usize,
    pub transmissions: usize,
    pub ingest_rate: f64,
    pub query_rate: f64,
}

fn config_for(opts: &RunOptions, budget: usize) -> Config {
    let mut cfg = Config::new();
    cfg.query_concurrency(opts.threads > 1, opts.threads.max(1), opts.pivot);
    cfg.ingestion_concurrency(opts.threads > 1, opts.threads.max(1), opts.pivot);
    cfg.workers(opts.threads);
    cfg.max_decomposed_bytes(budget);
    cfg
}

// decomposition budget for one case: off, a mild row splitting budget, or an
// aggressive one that also exercises the column fallback.
fn budget_for(decomp: Decomp, whole: usize) -> usize {
    match decomp {
        Decomp::Off => 0,
        Decomp::Rows => whole.div_ceil(3),
        Decomp::Auto => whole.div_ceil(6).max(64),
    }
}

/// run one catalog case end to end: ingest the synthetic frames, load the
/// capture as query series and read everything back as a table.
pub async fn run_case(spec: &RequestSpec, opts: &RunOptions) -> Result<CaseResult, EvalError> {
    let frames = catalog::frames(spec, opts.stypes, T0, PERIOD);
    let total_samples: usize = frames.iter().map(|f| f.row_count() * f.column_count()).sum();

    // measure the first frame's true wire size through a sizing pass.
    let sizing = LocalPlatform::new();
    let sizing_cfg = config_for(opts, 0);
    let sizer = IngestTransmitter::new(Arc::new(sizing.clone()), &sizing_cfg);
    sizer
        .open_stream(ProviderRegistration::new("SIZER"))
        .await
        .map_err(|e| EvalError::Init(e.to_string()))?;
    sizer
        .ingest(frames[0].clone())
        .await
        .map_err(|e| EvalError::Execution(e.to_string()))?;
    sizer.shutdown().await.map_err(|e| EvalError::Execution(e.to_string()))?;
    let whole = sizing.ingested_requests()[0].encoded_len();

    let cfg = config_for(opts, budget_for(opts.decomp, whole));
    let platform = LocalPlatform::new();

    // ingestion leg.
    let transmitter = IngestTransmitter::new(Arc::new(platform.clone()), &cfg);
    transmitter
        .open_stream(ProviderRegistration::new("EVALPRV").attribute("tool", "strata-eval"))
        .await
        .map_err(|e| EvalError::Init(e.to_string()))?;
    let ingest_started = Instant::now();
    for frame in &frames {
        transmitter
            .ingest(frame.clone())
            .await
            .map_err(|e| EvalError::Execution(e.to_string()))?;
    }
    transmitter
        .close_stream()
        .await
        .map_err(|e| EvalError::Transport(e.to_string()))?;
    let ingest_elapsed = ingest_started.elapsed();

    if !transmitter.ingestion_exceptions().is_empty() {
        return Err(EvalError::Execution(format!(
            "{} ingestion exceptions in case {}",
            transmitter.ingestion_exceptions().len(),
            spec.name
        )));
    }
    let transmissions = transmitter.transmission_count();

    // serve the generated series back for the query leg.
    for frame in &frames {
        for column in frame.columns() {
            platform.load_bucket(&column.name, frame.axis().clone(), column.values.clone());
        }
    }

    let end = T0 + (spec.frame_count * spec.samples_per_source) as i64 * PERIOD;
    let request = QueryRequest {
        source_names: (0..spec.source_count).map(catalog::source_name).collect(),
        begin_nanos: T0,
        end_nanos: end,
        request_id: format!("eval-{}", spec.name),
    };
    let query_started = Instant::now();
    let outcome = query::execute(Arc::new(platform), request, &cfg)
        .await
        .map_err(|e| EvalError::Transport(e.to_string()))?;
    let query_elapsed = query_started.elapsed();

    let table = match outcome {
        QueryOutcome::Table { table, skipped } => {
            if !skipped.is_empty() {
                return Err(EvalError::Execution(format!(
                    "{} malformed buckets in case {}",
                    skipped.len(),
                    spec.name
                )));
            }
            table
        }
        QueryOutcome::Rejected(reject) => {
            return Err(EvalError::Execution(format!(
                "query rejected in case {}: {}",
                spec.name, reject.message
            )));
        }
    };
    let read_samples = table.row_count() * table.column_count();

    Ok(CaseResult {
        name: spec.name,
        samples: read_samples,
        transmissions,
        ingest_rate: total_samples as f64 / ingest_elapsed.as_secs_f64().max(1e-9),
        query_rate: read_samples as f64 / query_elapsed.as_secs_f64().max(1e-9),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::catalog::resolve;

    #[tokio::test]
    async fn small_case_runs_clean() {
        let specs = resolve(&["small".into()], 8).unwrap();
        let result = run_case(
            &specs[0],
            &RunOptions {
                threads: 1,
                pivot: 16,
                decomp: Decomp::Off,
                stypes: SourceTypes::Float64,
            },
        )
        .await
        .unwrap();

        assert_eq!(result.name, "small");
        assert_eq!(result.samples, 3 * 8);
        assert_eq!(result.transmissions, 1);
        assert!(result.ingest_rate > 0.0);
        assert!(result.query_rate > 0.0);
    }

    #[tokio::test]
    async fn decomposition_multiplies_transmissions() {
        let specs = resolve(&["long".into()], 16).unwrap();
        let opts = RunOptions {
            threads: 2,
            pivot: 4,
            decomp: Decomp::Rows,
            stypes: SourceTypes::Float64,
        };
        let result = run_case(&specs[0], &opts).await.unwrap();
        assert!(result.transmissions >= 3 * specs[0].frame_count);
    }

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(EvalError::InvalidInput(String::new()).exit_code(), 1);
        assert_eq!(EvalError::Init(String::new()).exit_code(), 2);
        assert_eq!(EvalError::Output(String::new()).exit_code(), 3);
        assert_eq!(EvalError::Execution(String::new()).exit_code(), 4);
        assert_eq!(EvalError::Transport(String::new()).exit_code(), 5);
    }
}
