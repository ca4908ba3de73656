use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;

/// Timing and sizing of the probe pool, staleness scanner and eviction job.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Prefix for probe worker names in logs.
    pub pool_id: String,
    /// Number of concurrent probe workers.
    pub probe_pool_size: usize,
    /// Capacity of the probe job queue.
    pub queue_capacity: usize,
    /// Records not probed for this long are re-probed.
    pub probe_interval: Duration,
    /// Upper bound for a single liveness check.
    pub probe_timeout: Duration,
    pub eviction_interval: Duration,
    /// Failing records not reported by any source for this long are deleted.
    pub eviction_timeout: Duration,
    /// Only evict records scoring below this value. `None` disables the guard.
    pub eviction_score_floor: Option<f64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_id: format!("probe-{}", &Uuid::new_v4().to_string()[..8]),
            probe_pool_size: 16,
            queue_capacity: 128,
            probe_interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            eviction_interval: Duration::from_secs(600),
            eviction_timeout: Duration::from_secs(24 * 60 * 60),
            eviction_score_floor: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_id(mut self, id: impl Into<String>) -> Self {
        self.pool_id = id.into();
        self
    }

    pub fn with_probe_pool_size(mut self, size: usize) -> Self {
        self.probe_pool_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn with_eviction_timeout(mut self, timeout: Duration) -> Self {
        self.eviction_timeout = timeout;
        self
    }

    pub fn with_eviction_score_floor(mut self, floor: Option<f64>) -> Self {
        self.eviction_score_floor = floor;
        self
    }

    /// Reject values the scheduler can't run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.probe_pool_size == 0 {
            return Err(AppError::ConfigError(
                "probe pool size must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::ConfigError(
                "probe queue capacity must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("probe interval", self.probe_interval),
            ("probe timeout", self.probe_timeout),
            ("eviction interval", self.eviction_interval),
        ] {
            if value.is_zero() {
                return Err(AppError::ConfigError(format!("{name} must be non-zero")));
            }
        }
        if let Some(floor) = self.eviction_score_floor
            && !floor.is_finite()
        {
            return Err(AppError::ConfigError(format!(
                "invalid eviction score floor: {floor}"
            )));
        }
        Ok(())
    }
}
