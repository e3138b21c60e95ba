//! Monotonic presentation timestamps.

use crate::transcode::backend::Timestamped;

/// Forces strictly increasing timestamps.
///
/// A timestamp that is missing or not greater than the previous one becomes
/// `previous + 1`.
#[derive(Debug, Default, Clone)]
pub struct PtsGuard {
    last: Option<i64>,
    adjusted: u64,
}

impl PtsGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Corrected timestamp for `pts`.
    pub fn enforce(&mut self, pts: Option<i64>) -> i64 {
        let next = match (pts, self.last) {
            (Some(pts), Some(last)) if pts <= last => {
                self.adjusted += 1;
                last + 1
            }
            (Some(pts), _) => pts,
            (None, Some(last)) => {
                self.adjusted += 1;
                last + 1
            }
            (None, None) => 0,
        };
        self.last = Some(next);
        next
    }

    /// Rewrite the item's timestamp in place.
    pub fn apply<T: Timestamped>(&mut self, item: &mut T) {
        let pts = self.enforce(item.timestamp());
        item.set_timestamp(Some(pts));
    }

    /// Number of timestamps rewritten so far.
    pub fn adjusted(&self) -> u64 {
        self.adjusted
    }

    pub fn last(&self) -> Option<i64> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_increasing_timestamps() {
        let mut guard = PtsGuard::new();
        assert_eq!(guard.enforce(Some(0)), 0);
        assert_eq!(guard.enforce(Some(3)), 3);
        assert_eq!(guard.enforce(Some(10)), 10);
        assert_eq!(guard.adjusted(), 0);
    }

    #[test]
    fn test_repairs_duplicates_and_regressions() {
        let mut guard = PtsGuard::new();
        let out: Vec<i64> = [5, 5, 4, 9, 9]
            .into_iter()
            .map(|pts| guard.enforce(Some(pts)))
            .collect();
        assert_eq!(out, vec![5, 6, 7, 9, 10]);
        assert_eq!(guard.adjusted(), 3);
    }

    #[test]
    fn test_missing_timestamps() {
        let mut guard = PtsGuard::new();
        assert_eq!(guard.enforce(None), 0);
        assert_eq!(guard.enforce(None), 1);
        assert_eq!(guard.enforce(Some(1)), 2);
        assert_eq!(guard.last(), Some(2));
    }
}
