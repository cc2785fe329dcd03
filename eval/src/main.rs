//! strata-eval: pipeline evaluator for the strata client data plane.
//!
//! runs named synthetic request cases through the full ingestion and query
//! pipelines against the in process platform transport and reports rate
//! statistics. exit codes: 0 success, 1 invalid input, 2 init failure,
//! 3 output failure, 4 execution exception, 5 transport exception.

use clap::Parser;

use strata_eval::{
    catalog::{self, Decomp, SourceTypes},
    report::{self, Output},
    runner::{self, EvalError, RunOptions},
};

#[derive(Debug, Parser)]
#[command(name = report::TOOL_NAME, version, about = "evaluate the strata client data plane")]
struct Cli {
    /// request names from the built in catalog (small, wide, long, burst)
    requests: Vec<String>,

    /// worker thread bound for both pipelines
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// minimum batch cardinality for parallel correlation
    #[arg(long, default_value_t = 16)]
    pivot: usize,

    /// frame decomposition mode
    #[arg(long, value_enum, default_value = "auto")]
    decomp: Decomp,

    /// column type mix of the generated sources
    #[arg(long, value_enum, default_value = "float64")]
    stypes: SourceTypes,

    /// sample count scale factor per source
    #[arg(long, default_value_t = 64)]
    scnts: usize,

    /// report destination: a directory path or "console"
    #[arg(long, default_value = "console")]
    output: String,

    /// enable debug logging
    #[arg(long)]
    verbose: bool,
}

async fn run(cli: &Cli, command_line: &str) -> Result<(), EvalError> {
    if cli.threads == 0 {
        return Err(EvalError::InvalidInput("--threads must be at least 1".into()));
    }
    let specs = catalog::resolve(&cli.requests, cli.scnts).map_err(EvalError::InvalidInput)?;
    let opts = RunOptions {
        threads: cli.threads,
        pivot: cli.pivot,
        decomp: cli.decomp,
        stypes: cli.stypes,
    };

    let mut results = Vec::with_capacity(specs.len());
    for spec in &specs {
        tracing::debug!(case = spec.name, "running evaluation case");
        results.push(runner::run_case(spec, &opts).await?);
    }

    let text = report::render(command_line, &results);
    let written = report::write(report::TOOL_NAME, &Output::parse(&cli.output), &text)?;
    if let Some(path) = written {
        println!("report written to {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    if let Err(e) = run(&cli, &command_line).await {
        eprintln!("{}: {}", report::TOOL_NAME, e.message());
        std::process::exit(e.exit_code());
    }
}
