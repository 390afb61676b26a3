//! Hit/miss accounting for bulk calls.

use std::fmt;

/// What a bulk call found in the store and what it had to run.
///
/// Displays as `"N/M cached (x%)"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WarmReport {
    /// Inputs in the call.
    pub total: usize,
    /// Inputs already in the store.
    pub hits: usize,
    /// Executions that completed.
    pub executed: usize,
}

impl WarmReport {
    pub fn new(total: usize, hits: usize) -> Self {
        Self {
            total,
            hits,
            executed: 0,
        }
    }

    pub fn misses(&self) -> usize {
        self.total.saturating_sub(self.hits)
    }

    /// Hit rate (0.0 to 1.0). An empty call reports 0.0.
    pub fn hit_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hits as f64 / self.total as f64
        }
    }
}

impl fmt::Display for WarmReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} cached ({:.1}%)",
            self.hits,
            self.total,
            self.hit_ratio() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_two_of_three() {
        let report = WarmReport::new(3, 2);
        assert_eq!(report.to_string(), "2/3 cached (66.7%)");
        assert_eq!(report.misses(), 1);
    }

    #[test]
    fn test_empty_report() {
        let report = WarmReport::default();
        assert_eq!(report.to_string(), "0/0 cached (0.0%)");
        assert!((report.hit_ratio() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_all_cached() {
        assert_eq!(WarmReport::new(4, 4).to_string(), "4/4 cached (100.0%)");
    }
}
