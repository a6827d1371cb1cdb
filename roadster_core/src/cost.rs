//! Cost accumulators.
//!
//! Both estimators are fed `(actual_position, predicted_position)` pairs while
//! walking filled slots in key order, and report a per-key running mean.

/// Accumulates expected exponential-search iterations: each key contributes
/// `log2(|predicted - actual| + 1)`.
#[derive(Debug, Default)]
pub struct ExpectedSearchIterationsAccumulator {
    cumulative_log_error: f64,
    count: usize,
}

impl ExpectedSearchIterationsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, actual_position: usize, predicted_position: usize) {
        let error = predicted_position.abs_diff(actual_position) as f64;
        self.cumulative_log_error += (error + 1.0).log2();
        self.count += 1;
    }

    pub fn stats(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.cumulative_log_error / self.count as f64
    }

    pub fn reset(&mut self) {
        self.cumulative_log_error = 0.0;
        self.count = 0;
    }
}

/// Accumulates expected shifts per insert by tracking dense regions.
///
/// A dense region of n keys contributes a total of approximately
/// ((n-1)/2)((n-1)/2 + 1) = n^2/4 - 1/4 expected shifts, since an insert into
/// the region shifts a random half of it. This is exact for odd n and off by
/// 0.25 for even n, so we track n^2/4.
#[derive(Debug)]
pub struct ExpectedShiftsAccumulator {
    last_position: isize,
    dense_region_start: isize,
    num_expected_shifts: usize,
    count: usize,
}

impl ExpectedShiftsAccumulator {
    pub fn new() -> Self {
        Self {
            last_position: -1,
            dense_region_start: 0,
            num_expected_shifts: 0,
            count: 0,
        }
    }

    pub fn accumulate(&mut self, actual_position: usize, _predicted_position: usize) {
        let actual = actual_position as isize;
        if actual > self.last_position + 1 {
            let dense_region_length = (self.last_position - self.dense_region_start + 1) as usize;
            self.num_expected_shifts += dense_region_length * dense_region_length / 4;
            self.dense_region_start = actual;
        }
        self.last_position = actual;
        self.count += 1;
    }

    pub fn stats(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let dense_region_length = (self.last_position - self.dense_region_start + 1) as usize;
        let total = self.num_expected_shifts + dense_region_length * dense_region_length / 4;
        total as f64 / self.count as f64
    }

    pub fn reset(&mut self) {
        self.last_position = -1;
        self.dense_region_start = 0;
        self.num_expected_shifts = 0;
        self.count = 0;
    }
}

/// Feeds both estimators in a single walk.
#[derive(Debug)]
pub struct ExpectedSearchIterationsAndShiftsAccumulator {
    search: ExpectedSearchIterationsAccumulator,
    shifts: ExpectedShiftsAccumulator,
}

impl ExpectedSearchIterationsAndShiftsAccumulator {
    pub fn new() -> Self {
        Self {
            search: ExpectedSearchIterationsAccumulator::new(),
            shifts: ExpectedShiftsAccumulator::new(),
        }
    }

    pub fn accumulate(&mut self, actual_position: usize, predicted_position: usize) {
        self.search.accumulate(actual_position, predicted_position);
        self.shifts.accumulate(actual_position, predicted_position);
    }

    pub fn expected_search_iterations(&self) -> f64 {
        self.search.stats()
    }

    pub fn expected_shifts(&self) -> f64 {
        self.shifts.stats()
    }

    pub fn reset(&mut self) {
        self.search.reset();
        self.shifts.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_iterations_mean_of_log_errors() {
        let mut acc = ExpectedSearchIterationsAccumulator::new();
        acc.accumulate(0, 0); // log2(1) = 0
        acc.accumulate(1, 4); // log2(4) = 2
        acc.accumulate(10, 3); // log2(8) = 3
        assert!((acc.stats() - 5.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn search_iterations_empty_is_zero() {
        assert_eq!(ExpectedSearchIterationsAccumulator::new().stats(), 0.0);
    }

    #[test]
    fn shifts_single_dense_region() {
        let mut acc = ExpectedShiftsAccumulator::new();
        for pos in 0..4 {
            acc.accumulate(pos, 0);
        }
        // one open region of length 4: 16/4 = 4 shifts over 4 keys
        assert!((acc.stats() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn shifts_closed_region_plus_open_region() {
        let mut acc = ExpectedShiftsAccumulator::new();
        acc.accumulate(0, 0);
        acc.accumulate(1, 0);
        acc.accumulate(2, 0);
        // jump closes the region of length 3 (contributes 9/4 = 2)
        acc.accumulate(10, 0);
        // closed 2 + open 1*1/4=0, over 4 keys
        assert!((acc.stats() - 2.0 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn shifts_reset_clears_state() {
        let mut acc = ExpectedShiftsAccumulator::new();
        acc.accumulate(0, 0);
        acc.accumulate(1, 0);
        acc.reset();
        assert_eq!(acc.stats(), 0.0);
    }

    #[test]
    fn combined_matches_individual() {
        let positions = [(0usize, 2usize), (1, 1), (5, 3), (6, 9)];
        let mut combined = ExpectedSearchIterationsAndShiftsAccumulator::new();
        let mut search = ExpectedSearchIterationsAccumulator::new();
        let mut shifts = ExpectedShiftsAccumulator::new();
        for &(actual, predicted) in &positions {
            combined.accumulate(actual, predicted);
            search.accumulate(actual, predicted);
            shifts.accumulate(actual, predicted);
        }
        assert_eq!(combined.expected_search_iterations(), search.stats());
        assert_eq!(combined.expected_shifts(), shifts.stats());
    }
}
