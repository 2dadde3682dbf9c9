//! Proximity estimation from radio signal strength
//!
//! RSSI is smoothed with an exponentially weighted moving average before it is
//! mapped to meters with the log-distance path loss model:
//!
//! ```text
//! d = 10 ^ ((tx_power - rssi) / (10 * n))
//! ```

use core::time::Duration;

use crate::config::ProximityConfig;
use crate::types::Timestamp;

/// Map one RSSI reading to meters; strictly decreasing in `rssi`
pub fn rssi_to_distance(rssi: f64, tx_power_dbm: f64, path_loss_exponent: f64) -> f64 {
    10f64.powf((tx_power_dbm - rssi) / (10.0 * path_loss_exponent))
}

/// Smoothed distance for one session
#[derive(Debug, Clone)]
pub struct ProximityEstimator {
    config: ProximityConfig,
    /// Distance goes unknown when the newest sample is older than this
    stale_after: Duration,
    smoothed_rssi: Option<f64>,
    last_sample: Option<Timestamp>,
}

impl ProximityEstimator {
    pub fn new(config: ProximityConfig, stale_after: Duration) -> Self {
        Self {
            config,
            stale_after,
            smoothed_rssi: None,
            last_sample: None,
        }
    }

    /// Fold in one reading. Non-negative values are the "unavailable" marker
    /// some radio stacks report and are ignored.
    pub fn record(&mut self, rssi: i16, now: Timestamp) {
        if rssi >= 0 {
            return;
        }
        let sample = rssi as f64;
        let alpha = self.config.smoothing;
        self.smoothed_rssi = Some(match self.smoothed_rssi {
            None => sample,
            Some(previous) => (1.0 - alpha) * previous + alpha * sample,
        });
        self.last_sample = Some(now);
    }

    pub fn smoothed_rssi(&self) -> Option<f64> {
        self.smoothed_rssi
    }

    pub fn last_sample(&self) -> Option<Timestamp> {
        self.last_sample
    }

    /// Estimated distance in meters, `None` when unknown or stale
    pub fn distance(&self, now: Timestamp) -> Option<f64> {
        let last = self.last_sample?;
        if now.since(last) > self.stale_after.as_millis() as u64 {
            return None;
        }
        self.smoothed_rssi.map(|rssi| {
            rssi_to_distance(
                rssi,
                self.config.tx_power_dbm,
                self.config.path_loss_exponent,
            )
        })
    }

    /// Keep whichever history is fresher; used when two radio paths merge
    pub fn absorb(&mut self, other: ProximityEstimator) {
        let newer = match (self.last_sample, other.last_sample) {
            (None, Some(_)) => true,
            (Some(mine), Some(theirs)) => theirs > mine,
            _ => false,
        };
        if newer {
            self.smoothed_rssi = other.smoothed_rssi;
            self.last_sample = other.last_sample;
        }
    }
}
