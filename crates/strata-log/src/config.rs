//! Log configuration.

/// Configuration for a [`DeltaLog`](crate::DeltaLog).
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Branching factor of the aggregation scheme; aggregates exist at
    /// scales `granularity^i`. Must be at least 2.
    pub granularity: u64,
    /// Capacity of the commit notification channel. Slow subscribers past
    /// this lag receive a coalesced delta instead of each patch.
    pub channel_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            granularity: 5,
            channel_capacity: 64,
        }
    }
}

/// Builder for [`LogConfig`].
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn granularity(mut self, granularity: u64) -> Self {
        self.config.granularity = granularity;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

impl Default for LogConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
