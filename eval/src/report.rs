//! evaluation report rendering and persistence.
//!
//! every invocation produces one text report with a fixed section order:
//! header, command line, summary, per test extremes and per case details.
//! reports land under `<output>/<tool>-<timestamp>.txt` or on the console.

use std::{fs, io::Write, path::PathBuf};

use chrono::Local;

use crate::{
    runner::{CaseResult, EvalError},
    stats::Summary,
};

pub const TOOL_NAME: &str = "strata-eval";

/// where the rendered report goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Console,
    Directory(PathBuf),
}

impl Output {
    pub fn parse(raw: &str) -> Self {
        if raw == "console" {
            Self::Console
        } else {
            Self::Directory(PathBuf::from(raw))
        }
    }
}

fn extremes<'r>(results: &'r [CaseResult], key: fn(&CaseResult) -> f64) -> Option<(&'r CaseResult, &'r CaseResult)> {
    let min = results.iter().min_by(|a, b| key(a).total_cmp(&key(b)))?;
    let max = results.iter().max_by(|a, b| key(a).total_cmp(&key(b)))?;
    Some((min, max))
}

/// render the full evaluator report text.
pub fn render(command_line: &str, results: &[CaseResult]) -> String {
    let mut out = header(TOOL_NAME, command_line);

    out.push_str("\n== summary ==\n");
    out.push_str(&format!("cases: {}\n", results.len()));
    for (label, key) in [
        ("ingest rate", (|r: &CaseResult| r.ingest_rate) as fn(&CaseResult) -> f64),
        ("query rate", |r: &CaseResult| r.query_rate),
    ] {
        let rates: Vec<f64> = results.iter().map(key).collect();
        match Summary::of(&rates) {
            Some(s) => out.push_str(&format!(
                "{label} [samples/s] min {:.1} max {:.1} avg {:.1} std {:.1}\n",
                s.min, s.max, s.avg, s.std
            )),
            None => out.push_str(&format!("{label}: no samples\n")),
        }
    }

    out.push_str("\n== extremes ==\n");
    if let Some((min, max)) = extremes(results, |r| r.query_rate) {
        out.push_str(&format!(
            "slowest query: {} ({:.1} samples/s)\nfastest query: {} ({:.1} samples/s)\n",
            min.name, min.query_rate, max.name, max.query_rate
        ));
    }
    if let Some((min, max)) = extremes(results, |r| r.ingest_rate) {
        out.push_str(&format!(
            "slowest ingest: {} ({:.1} samples/s)\nfastest ingest: {} ({:.1} samples/s)\n",
            min.name, min.ingest_rate, max.name, max.ingest_rate
        ));
    }

    out.push_str("\n== cases ==\n");
    for case in results {
        out.push_str(&format!(
            "{}: {} samples, {} transmissions, ingest {:.1} samples/s, query {:.1} samples/s\n",
            case.name, case.samples, case.transmissions, case.ingest_rate, case.query_rate
        ));
    }
    out
}

/// write a report to its destination; returns the file path when one was
/// written. report files are named `<tool>-<timestamp>.txt`.
pub fn write(tool: &str, output: &Output, text: &str) -> Result<Option<PathBuf>, EvalError> {
    match output {
        Output::Console => {
            print!("{text}");
            Ok(None)
        }
        Output::Directory(dir) => {
            fs::create_dir_all(dir).map_err(|e| EvalError::Output(format!("creating {}: {e}", dir.display())))?;
            let stamp = Local::now().format("%Y%m%d-%H%M%S");
            let path = dir.join(format!("{tool}-{stamp}.txt"));
            let mut file =
                fs::File::create(&path).map_err(|e| EvalError::Output(format!("creating {}: {e}", path.display())))?;
            file.write_all(text.as_bytes())
                .map_err(|e| EvalError::Output(format!("writing {}: {e}", path.display())))?;
            Ok(Some(path))
        }
    }
}

/// standard report header shared by the tools.
pub fn header(tool: &str, command_line: &str) -> String {
    let now = Local::now();
    format!(
        "{tool} evaluation report\ngenerated: {}\n\n== command line ==\n{command_line}\n",
        now.format("%Y-%m-%d %H:%M:%S %z")
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_results() -> Vec<CaseResult> {
        vec![
            CaseResult {
                name: "small",
                samples: 30,
                transmissions: 1,
                ingest_rate: 1_000.0,
                query_rate: 2_000.0,
            },
            CaseResult {
                name: "wide",
                samples: 320,
                transmissions: 4,
                ingest_rate: 4_000.0,
                query_rate: 500.0,
            },
        ]
    }

    #[test]
    fn report_sections_in_order() {
        let text = render("strata-eval small wide --threads 2", &sample_results());
        let command = text.find("== command line ==").unwrap();
        let summary = text.find("== summary ==").unwrap();
        let extremes = text.find("== extremes ==").unwrap();
        let cases = text.find("== cases ==").unwrap();
        assert!(command < summary && summary < extremes && extremes < cases);
        assert!(text.contains("slowest query: wide"));
        assert!(text.contains("fastest ingest: wide"));
        assert!(text.contains("small: 30 samples"));
    }

    #[test]
    fn output_parse() {
        assert_eq!(Output::parse("console"), Output::Console);
        assert_eq!(Output::parse("/tmp/reports"), Output::Directory(PathBuf::from("/tmp/reports")));
    }

    #[test]
    fn report_file_lands_in_directory() {
        let dir = std::env::temp_dir().join(format!("strata-eval-test-{}", std::process::id()));
        let path = write(TOOL_NAME, &Output::Directory(dir.clone()), "report body\n")
            .unwrap()
            .unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with(TOOL_NAME));
        assert_eq!(fs::read_to_string(&path).unwrap(), "report body\n");
        let _ = fs::remove_dir_all(dir);
    }
}
