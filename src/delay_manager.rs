use std::time::Duration;

use log::info;
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    base: Duration,
    jitter: Duration,
}

impl RateLimiter {
    pub fn new(base: Duration, jitter: Duration) -> Self {
        RateLimiter { base, jitter }
    }

    /// Next delay: `base` plus a uniform draw from `[0, jitter]`.
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let mut rng = rand::thread_rng();
        let extra = rng.gen_range(0..=self.jitter.as_millis() as u64);
        self.base + Duration::from_millis(extra)
    }

    pub async fn wait(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        info!("Waiting for {:.1} seconds (unit delay)...", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}
