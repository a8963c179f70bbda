//! Pool configuration.

use std::time::Duration;

/// Default upper bound on connections per pool.
pub const DEFAULT_MAX_POOL_SIZE: u32 = 100;

/// Default interval between maintainer cycles.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of connections, counting idle, in-use and pending.
    pub max_pool_size: u32,

    /// Minimum number of connections the maintainer keeps established
    /// while the pool is ready. Zero disables proactive warming.
    pub min_pool_size: u32,

    /// Time a connection may sit idle before the maintainer evicts it.
    /// `None` disables idle eviction.
    pub max_idle_time: Option<Duration>,

    /// Time a checkout may wait for capacity before failing.
    /// `None` waits indefinitely.
    pub wait_queue_timeout: Option<Duration>,

    /// Interval between maintainer cycles.
    pub maintenance_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            min_pool_size: 0,
            max_idle_time: None,
            wait_queue_timeout: None,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_pool_size(mut self, count: u32) -> Self {
        self.max_pool_size = count;
        self
    }

    /// Set the minimum number of connections to keep warm.
    #[must_use]
    pub fn min_pool_size(mut self, count: u32) -> Self {
        self.min_pool_size = count;
        self
    }

    /// Set the idle eviction threshold.
    #[must_use]
    pub fn max_idle_time(mut self, timeout: Duration) -> Self {
        self.max_idle_time = Some(timeout);
        self
    }

    /// Set the checkout wait deadline.
    #[must_use]
    pub fn wait_queue_timeout(mut self, timeout: Duration) -> Self {
        self.wait_queue_timeout = Some(timeout);
        self
    }

    /// Set the interval between maintainer cycles.
    #[must_use]
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.max_pool_size == 0 {
            return Err(crate::error::Error::Configuration(
                "max_pool_size must be greater than 0".into(),
            ));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(crate::error::Error::Configuration(
                "min_pool_size cannot be greater than max_pool_size".into(),
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(crate::error::Error::Configuration(
                "maintenance_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
