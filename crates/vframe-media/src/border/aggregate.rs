//! Combining per-probe results into one rectangle.
//!
//! The component-wise median is used instead of intersection or union so a
//! single outlier probe (a black title card, a fade) cannot shrink or grow
//! the crop.

use super::scan::Edges;

fn lower_median(values: &mut [u32]) -> u32 {
    values.sort_unstable();
    values[(values.len() - 1) / 2]
}

/// Component-wise lower median; `None` for no probes.
pub fn median_edges(probes: &[Edges]) -> Option<Edges> {
    if probes.is_empty() {
        return None;
    }
    let pick = |f: fn(&Edges) -> u32| {
        let mut values: Vec<u32> = probes.iter().map(f).collect();
        lower_median(&mut values)
    };
    Some(Edges::new(
        pick(|e| e.left),
        pick(|e| e.top),
        pick(|e| e.right),
        pick(|e| e.bottom),
    ))
}

/// Outcome of the stability check over one method's probe results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consensus {
    pub median: Option<Edges>,
    /// Probes that produced a rectangle
    pub detected: usize,
    /// Probes within tolerance of the median
    pub agreeing: usize,
    pub total: usize,
}

impl Consensus {
    /// More than half the probes detected a rectangle and more than half
    /// agree with the median.
    pub fn is_stable(&self) -> bool {
        self.median.is_some() && self.detected * 2 > self.total && self.agreeing * 2 > self.total
    }
}

/// Median and agreement for probe results already in source pixels.
pub fn consensus(results: &[Option<Edges>], tolerance: u32) -> Consensus {
    let detected: Vec<Edges> = results.iter().flatten().copied().collect();
    let median = median_edges(&detected);
    let agreeing = match &median {
        Some(m) => detected.iter().filter(|e| e.max_deviation(m) <= tolerance).count(),
        None => 0,
    };
    Consensus {
        median,
        detected: detected.len(),
        agreeing,
        total: results.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_resists_outlier() {
        let probes = [
            Edges::new(20, 20, 620, 340),
            Edges::new(20, 22, 620, 340),
            Edges::new(200, 150, 300, 200),
            Edges::new(21, 20, 619, 338),
            Edges::new(20, 20, 620, 340),
        ];
        assert_eq!(median_edges(&probes), Some(Edges::new(20, 20, 620, 340)));
    }

    #[test]
    fn test_lower_median_for_even_counts() {
        let probes = [Edges::new(10, 0, 100, 100), Edges::new(20, 0, 100, 100)];
        assert_eq!(median_edges(&probes).unwrap().left, 10);
        assert_eq!(median_edges(&[]), None);
    }

    #[test]
    fn test_consensus_stability() {
        let good = Some(Edges::new(20, 20, 620, 340));
        let stable = consensus(&[good, good, None, good], 5);
        assert!(stable.is_stable());
        assert_eq!(stable.detected, 3);

        let sparse = consensus(&[good, None, None, None], 5);
        assert!(!sparse.is_stable());

        let scattered = consensus(
            &[
                Some(Edges::new(0, 0, 640, 360)),
                Some(Edges::new(40, 40, 600, 320)),
                Some(Edges::new(80, 80, 560, 280)),
            ],
            5,
        );
        assert_eq!(scattered.agreeing, 1);
        assert!(!scattered.is_stable());
    }
}
