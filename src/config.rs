use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PoolError, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tuning knobs of a task pool.
///
/// `spawn_interval` only staggers worker creation when the pool starts, it
/// never slows down dispatch afterwards. `execute_delay` is slept by a worker
/// every time it takes a task, before the routine runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers, i.e. how many tasks may run at the same time
    pub concurrency: usize,
    /// Pause between spawning two workers
    pub spawn_interval: Duration,
    /// Pause before each routine invocation
    pub execute_delay: Duration,
    /// Longest time an idle wait lasts before flags are checked again
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            spawn_interval: Duration::from_secs(0),
            execute_delay: Duration::from_secs(0),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// A default config running `concurrency` workers
    pub fn new(concurrency: usize) -> Self {
        Self::default().set_concurrency(concurrency)
    }
    /// set the number of workers
    pub fn set_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
    /// set the pause between two worker spawns
    pub fn set_spawn_interval(mut self, interval: Duration) -> Self {
        self.spawn_interval = interval;
        self
    }
    /// set the pause before each routine invocation
    pub fn set_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }
    /// set the idle wait bound
    pub fn set_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Check the config can drive a pool.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(PoolError::InvalidConcurrency);
        }
        if self.poll_interval == Duration::from_secs(0) {
            return Err(PoolError::StringError(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
