//! Mock task that sleeps for a fixed delay.

use std::time::Duration;

use rand::Rng;

use crate::{Work, WorkResult};

/// Upper bound (inclusive, seconds) for randomly chosen mock delays.
pub const MAX_RANDOM_DELAY_SECS: u64 = 10;

/// Blocks its worker for `delay`, then returns the delay it slept.
#[derive(Debug, Clone)]
pub struct MockTask {
    delay: Duration,
}

impl MockTask {
    /// Create a mock task sleeping `delay_secs` seconds, or a random
    /// 0..=10 second delay when none is given.
    pub fn new(delay_secs: Option<u64>) -> Self {
        let secs = delay_secs
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..=MAX_RANDOM_DELAY_SECS));
        Self::with_delay(Duration::from_secs(secs))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Work for MockTask {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn run(&mut self) -> WorkResult {
        std::thread::sleep(self.delay);
        Ok(serde_json::json!({ "slept_secs": self.delay.as_secs_f64() }))
    }
}
