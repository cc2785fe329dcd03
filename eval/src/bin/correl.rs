//! strata-correl: correlation stage evaluator.
//!
//! sweeps the correlator's live tunables (worker bound and concurrency
//! pivot) over synthetic bucket batches, verifies the grouping invariants on
//! every pass and reports correlation rates per configuration. exit codes
//! match strata-eval: 0 success, 1 invalid input, 3 output failure,
//! 4 execution exception.

use std::time::Instant;

use clap::Parser;

use strata_client::{query::Correlator, Config};
use strata_proto::{DataBucket, DataColumn};

use strata_eval::{
    catalog::{self, RequestSpec, SourceTypes},
    report::{self, Output},
    runner::EvalError,
    stats::Summary,
};

const TOOL_NAME: &str = "strata-correl";
const T0: i64 = 1_700_000_000_000_000_000;
const PERIOD: i64 = 1_000_000;

#[derive(Debug, Parser)]
#[command(name = TOOL_NAME, version, about = "evaluate the raw data correlator")]
struct Cli {
    /// request names from the built in catalog (small, wide, long, burst)
    requests: Vec<String>,

    /// largest worker bound of the sweep; powers of two up to this value
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// concurrency pivot size applied on every pass
    #[arg(long, default_value_t = 16)]
    pivot: usize,

    /// column type mix of the generated sources
    #[arg(long, value_enum, default_value = "float64")]
    stypes: SourceTypes,

    /// sample count scale factor per source
    #[arg(long, default_value_t = 64)]
    scnts: usize,

    /// report destination: a directory path or "console"
    #[arg(long, default_value = "console")]
    output: String,
}

// one wire bucket per (frame, source) of the case.
fn buckets_of(spec: &RequestSpec, stypes: SourceTypes) -> Vec<DataBucket> {
    catalog::frames(spec, stypes, T0, PERIOD)
        .iter()
        .flat_map(|frame| {
            frame
                .columns()
                .iter()
                .map(|column| DataBucket {
                    source_name: column.name.clone(),
                    timestamps: Some(frame.axis().to_proto()),
                    column: Some(DataColumn {
                        name: column.name.clone(),
                        values: Some(column.values.to_proto()),
                    }),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn sweep_points(max: usize) -> Vec<usize> {
    let mut points = vec![1];
    let mut next = 2;
    while next <= max {
        points.push(next);
        next *= 2;
    }
    points
}

#[derive(Debug, Clone)]
struct PassResult {
    case: &'static str,
    threads: usize,
    buckets: usize,
    sets: usize,
    rate: f64,
}

async fn run_pass(spec: &RequestSpec, stypes: SourceTypes, threads: usize, pivot: usize) -> Result<PassResult, EvalError> {
    let buckets = buckets_of(spec, stypes);
    let count = buckets.len();

    let correlator = Correlator::new(format!("correl-{}", spec.name), Config::new().query());
    correlator.set_max_threads(threads);
    correlator.set_pivot_size(pivot);

    let started = Instant::now();
    correlator.correlate(buckets).await;
    let elapsed = started.elapsed();

    if !correlator.failures().is_empty() {
        return Err(EvalError::Execution(format!(
            "{} malformed buckets in case {}",
            correlator.failures().len(),
            spec.name
        )));
    }

    let sets = correlator.sets();
    for set in &sets {
        let mut names: Vec<&str> = set.source_names().collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        if names.len() != total {
            return Err(EvalError::Execution(format!(
                "duplicate source within a correlated set of case {}",
                spec.name
            )));
        }
        if set.buckets().iter().any(|b| b.axis != *set.axis()) {
            return Err(EvalError::Execution(format!(
                "mixed timestamp descriptors within a set of case {}",
                spec.name
            )));
        }
    }

    Ok(PassResult {
        case: spec.name,
        threads,
        buckets: count,
        sets: sets.len(),
        rate: count as f64 / elapsed.as_secs_f64().max(1e-9),
    })
}

fn render(command_line: &str, pivot: usize, results: &[PassResult]) -> String {
    let mut out = report::header(TOOL_NAME, command_line);

    out.push_str("\n== summary ==\n");
    out.push_str(&format!("passes: {} (pivot {})\n", results.len(), pivot));
    let rates: Vec<f64> = results.iter().map(|r| r.rate).collect();
    match Summary::of(&rates) {
        Some(s) => out.push_str(&format!(
            "correlation rate [buckets/s] min {:.1} max {:.1} avg {:.1} std {:.1}\n",
            s.min, s.max, s.avg, s.std
        )),
        None => out.push_str("correlation rate: no samples\n"),
    }

    out.push_str("\n== extremes ==\n");
    if let (Some(min), Some(max)) = (
        results.iter().min_by(|a, b| a.rate.total_cmp(&b.rate)),
        results.iter().max_by(|a, b| a.rate.total_cmp(&b.rate)),
    ) {
        out.push_str(&format!(
            "slowest pass: {} with {} workers ({:.1} buckets/s)\n",
            min.case, min.threads, min.rate
        ));
        out.push_str(&format!(
            "fastest pass: {} with {} workers ({:.1} buckets/s)\n",
            max.case, max.threads, max.rate
        ));
    }

    out.push_str("\n== cases ==\n");
    for pass in results {
        out.push_str(&format!(
            "{} workers={}: {} buckets into {} sets, {:.1} buckets/s\n",
            pass.case, pass.threads, pass.buckets, pass.sets, pass.rate
        ));
    }
    out
}

async fn run(cli: &Cli, command_line: &str) -> Result<(), EvalError> {
    if cli.threads == 0 {
        return Err(EvalError::InvalidInput("--threads must be at least 1".into()));
    }
    let specs = catalog::resolve(&cli.requests, cli.scnts).map_err(EvalError::InvalidInput)?;

    let mut results = Vec::new();
    for spec in &specs {
        for threads in sweep_points(cli.threads) {
            results.push(run_pass(spec, cli.stypes, threads, cli.pivot).await?);
        }
    }

    let text = render(command_line, cli.pivot, &results);
    if let Some(path) = report::write(TOOL_NAME, &Output::parse(&cli.output), &text)? {
        println!("report written to {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let cli = Cli::parse();

    if let Err(e) = run(&cli, &command_line).await {
        eprintln!("{TOOL_NAME}: {}", e.message());
        std::process::exit(e.exit_code());
    }
}
