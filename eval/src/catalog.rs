//! built in catalog of synthetic evaluation requests.

use clap::ValueEnum;

use strata_client::{ColumnValues, FrameColumn, IngestFrame, TimeAxis};

/// column type mix of the generated sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceTypes {
    Float64,
    Int64,
    Mixed,
}

/// decomposition setting of the ingestion side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Decomp {
    /// decomposition disabled; frames travel whole.
    Off,
    /// split by rows against a moderate byte budget.
    Rows,
    /// aggressive budget exercising the column fallback as well.
    Auto,
}

/// one named evaluation case.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub name: &'static str,
    pub source_count: usize,
    pub samples_per_source: usize,
    pub frame_count: usize,
}

const CATALOG: &[RequestSpec] = &[
    RequestSpec {
        name: "small",
        source_count: 3,
        samples_per_source: 1,
        frame_count: 1,
    },
    RequestSpec {
        name: "wide",
        source_count: 32,
        samples_per_source: 1,
        frame_count: 1,
    },
    RequestSpec {
        name: "long",
        source_count: 4,
        samples_per_source: 8,
        frame_count: 4,
    },
    RequestSpec {
        name: "burst",
        source_count: 8,
        samples_per_source: 2,
        frame_count: 16,
    },
];

pub fn known_requests() -> Vec<&'static str> {
    CATALOG.iter().map(|spec| spec.name).collect()
}

/// resolve positional request names against the catalog. sample counts scale
/// by the `--scnts` factor.
pub fn resolve(names: &[String], scnts: usize) -> Result<Vec<RequestSpec>, String> {
    if names.is_empty() {
        return Err(format!(
            "no request names given; known requests: {}",
            known_requests().join(", ")
        ));
    }
    let mut specs = Vec::with_capacity(names.len());
    for name in names {
        let Some(spec) = CATALOG.iter().find(|spec| spec.name == name.as_str()) else {
            return Err(format!(
                "unknown request {name:?}; known requests: {}",
                known_requests().join(", ")
            ));
        };
        let mut spec = spec.clone();
        spec.samples_per_source *= scnts.max(1);
        specs.push(spec);
    }
    Ok(specs)
}

pub fn source_name(index: usize) -> String {
    format!("EV{index:04}")
}

/// deterministic synthetic column for one source.
pub fn column_values(stypes: SourceTypes, source: usize, rows: usize) -> ColumnValues {
    match stypes {
        SourceTypes::Float64 => {
            ColumnValues::F64((0..rows).map(|r| (source * rows + r) as f64 * 0.5).collect())
        }
        SourceTypes::Int64 => ColumnValues::I64((0..rows).map(|r| (source * rows + r) as i64).collect()),
        SourceTypes::Mixed => {
            if source % 2 == 0 {
                column_values(SourceTypes::Float64, source, rows)
            } else {
                column_values(SourceTypes::Int64, source, rows)
            }
        }
    }
}

/// synthetic frames of one evaluation case. frame `f` covers its own slice
/// of the clock so the case's frames stay disjoint in time.
pub fn frames(spec: &RequestSpec, stypes: SourceTypes, t0: i64, period: i64) -> Vec<IngestFrame> {
    let rows = spec.samples_per_source;
    (0..spec.frame_count)
        .map(|f| {
            let start = t0 + (f * rows) as i64 * period;
            let axis = TimeAxis::clock(start, period, rows).expect("catalog axes are valid");
            let columns = (0..spec.source_count)
                .map(|s| FrameColumn::new(source_name(s), column_values(stypes, s, rows)))
                .collect();
            IngestFrame::new(format!("{}-f{f}", spec.name), axis, columns)
                .expect("catalog frames are rectangular")
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_known_names() {
        let specs = resolve(&["small".into(), "wide".into()], 10).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].samples_per_source, 10);
        assert_eq!(specs[1].source_count, 32);
    }

    #[test]
    fn resolve_rejects_unknown() {
        let err = resolve(&["nope".into()], 1).unwrap_err();
        assert!(err.contains("nope"));
        assert!(resolve(&[], 1).is_err());
    }

    #[test]
    fn frames_are_disjoint_and_rectangular() {
        let specs = resolve(&["long".into()], 4).unwrap();
        let frames = frames(&specs[0], SourceTypes::Mixed, 0, 1_000);
        assert_eq!(frames.len(), 4);
        for pair in frames.windows(2) {
            assert!(pair[0].axis().last() < pair[1].axis().first());
        }
        for frame in &frames {
            assert_eq!(frame.column_count(), 4);
            assert_eq!(frame.row_count(), 32);
        }
    }
}
