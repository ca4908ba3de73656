/// Derives a reliability score from a record's probe counters.
pub trait ScorePolicy: Send + Sync {
    fn score(&self, success_count: u32, fail_count: u32) -> f64;
}

/// Percentage of successful probes, `0.0` for never-probed records.
#[derive(Debug, Default, Clone, Copy)]
pub struct SuccessRatio;

impl ScorePolicy for SuccessRatio {
    fn score(&self, success_count: u32, fail_count: u32) -> f64 {
        let total = u64::from(success_count) + u64::from(fail_count);
        if total == 0 {
            return 0.0;
        }
        success_count as f64 * 100.0 / total as f64
    }
}
