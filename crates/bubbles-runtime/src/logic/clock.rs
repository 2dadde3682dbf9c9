//! Protocol time driven by tokio's clock
//!
//! Anchored to the wall clock once at construction, then advanced by
//! `tokio::time::Instant`, so timers and timestamps agree even when a test
//! pauses or advances time.

use bubbles_core::{SystemTimeSource, TimeSource, Timestamp};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TokioTimeSource {
    origin: Instant,
    epoch: Timestamp,
}

impl TokioTimeSource {
    pub fn new() -> Self {
        Self::anchored_at(SystemTimeSource::new().now())
    }

    pub fn anchored_at(epoch: Timestamp) -> Self {
        Self {
            origin: Instant::now(),
            epoch,
        }
    }
}

impl Default for TokioTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioTimeSource {
    fn now(&self) -> Timestamp {
        let elapsed = self.origin.elapsed().as_millis();
        self.epoch + u64::try_from(elapsed).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_follows_tokio_time() {
        let clock = TokioTimeSource::anchored_at(Timestamp::new(1_000));
        assert_eq!(clock.now(), Timestamp::new(1_000));
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now(), Timestamp::new(1_250));
    }
}
