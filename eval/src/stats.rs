//! rate statistics over evaluation cases.

/// count, min, max, average and standard deviation of a sample set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub std: f64,
}

impl Summary {
    pub fn of(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let count = samples.len();
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = samples.iter().sum::<f64>() / count as f64;
        let var = samples.iter().map(|s| (s - avg) * (s - avg)).sum::<f64>() / count as f64;
        Some(Self {
            count,
            min,
            max,
            avg,
            std: var.sqrt(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_has_no_summary() {
        assert_eq!(Summary::of(&[]), None);
    }

    #[test]
    fn single_sample() {
        let s = Summary::of(&[4.0]).unwrap();
        assert_eq!(s.count, 1);
        assert_eq!(s.min, 4.0);
        assert_eq!(s.max, 4.0);
        assert_eq!(s.avg, 4.0);
        assert!(s.std.abs() < 1e-12);
    }

    #[test]
    fn spread() {
        let s = Summary::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(s.count, 8);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
        assert_eq!(s.avg, 5.0);
        assert!((s.std - 2.0).abs() < 1e-9);
    }
}
