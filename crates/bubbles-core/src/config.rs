//! Centralized Configuration Management
//!
//! Every timing and sizing knob of the protocol lives here. None of these values
//! are wire contracts; two peers with different configurations interoperate.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{BubblesError, Result};

/// Durations are written to config files as integer milliseconds
pub mod duration_ms {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Per-session lifecycle timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long an unreachable peer is retained before it exits
    #[serde(with = "duration_ms")]
    pub exit_grace_period: Duration,
    /// Longest a connected link may spend exchanging presence
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,
    /// Presence re-send interval while a session is active
    #[serde(with = "duration_ms")]
    pub keepalive_interval: Duration,
    /// Pending outbound payloads kept per session; oldest dropped on overflow
    pub outbound_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exit_grace_period: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(10),
            outbound_queue_capacity: 32,
        }
    }
}

// ----------------------------------------------------------------------------
// Backoff Configuration
// ----------------------------------------------------------------------------

/// Exponential connect-retry backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "duration_ms")]
    pub base: Duration,
    #[serde(with = "duration_ms")]
    pub cap: Duration,
    /// Connect attempts before the session falls back to waiting for a sighting
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (1-based), doubling from `base` up to `cap`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1u32 << exponent);
        delay.min(self.cap)
    }
}

// ----------------------------------------------------------------------------
// Codec Configuration
// ----------------------------------------------------------------------------

/// Chunking and reassembly limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Largest attribute value the transport can write, header included
    pub max_chunk_size: usize,
    /// Incomplete reassembly buffers are discarded after this long
    #[serde(with = "duration_ms")]
    pub reassembly_timeout: Duration,
    /// Simultaneous reassembly buffers per session
    pub max_concurrent_reassemblies: usize,
}

impl CodecConfig {
    /// Smallest chunk that still carries a payload byte after the header
    pub const MIN_CHUNK_SIZE: usize = 4;
    /// Largest attribute value BLE allows
    pub const MAX_CHUNK_SIZE: usize = 512;
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            // 23-byte default ATT MTU minus the 3-byte ATT header
            max_chunk_size: 20,
            reassembly_timeout: Duration::from_secs(3),
            max_concurrent_reassemblies: 3,
        }
    }
}

// ----------------------------------------------------------------------------
// Proximity Configuration
// ----------------------------------------------------------------------------

/// Signal-strength smoothing and the path loss model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// EWMA weight of the newest sample, in (0, 1]
    pub smoothing: f64,
    /// Expected RSSI at one meter
    pub tx_power_dbm: f64,
    /// Path loss exponent; 2.0 is free space
    pub path_loss_exponent: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.2,
            tx_power_dbm: -59.0,
            path_loss_exponent: 2.0,
        }
    }
}

// ----------------------------------------------------------------------------
// Radio Configuration
// ----------------------------------------------------------------------------

/// Limits the runtime applies when driving the transport adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Additional attempts per chunk before a write counts as failed
    pub write_retries: u32,
    #[serde(with = "duration_ms")]
    pub write_retry_delay: Duration,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_retries: 3,
            write_retry_delay: Duration::from_millis(100),
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for CSP channel buffer sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (application → core)
    pub command_buffer_size: usize,
    /// Buffer size for Event channels (transport → core)
    pub event_buffer_size: usize,
    /// Buffer size for Effect channels (core → transport)
    pub effect_buffer_size: usize,
    /// Buffer size for AppEvent channels (core → application)
    pub app_event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,   // application commands are infrequent
            event_buffer_size: 256,    // advertisement sightings are bursty
            effect_buffer_size: 128,
            app_event_buffer_size: 64,
        }
    }
}

impl ChannelConfig {
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            event_buffer_size: 100,
            effect_buffer_size: 100,
            app_event_buffer_size: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Top-Level Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BubblesConfig {
    pub session: SessionConfig,
    pub backoff: BackoffConfig,
    pub codec: CodecConfig,
    pub proximity: ProximityConfig,
    pub radio: RadioConfig,
    pub channels: ChannelConfig,
    /// Interval of the runtime's snapshot refresh and stale-buffer sweep
    #[serde(with = "duration_ms")]
    pub maintenance_interval: Duration,
}

impl Default for BubblesConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            backoff: BackoffConfig::default(),
            codec: CodecConfig::default(),
            proximity: ProximityConfig::default(),
            radio: RadioConfig::default(),
            channels: ChannelConfig::default(),
            maintenance_interval: Duration::from_secs(5),
        }
    }
}

impl BubblesConfig {
    pub fn builder() -> BubblesConfigBuilder {
        BubblesConfigBuilder::new()
    }

    /// Short timers for tests and simulations
    pub fn testing() -> Self {
        Self {
            session: SessionConfig {
                exit_grace_period: Duration::from_millis(500),
                handshake_timeout: Duration::from_millis(300),
                keepalive_interval: Duration::from_millis(200),
                outbound_queue_capacity: 8,
            },
            backoff: BackoffConfig {
                base: Duration::from_millis(20),
                cap: Duration::from_millis(200),
                max_attempts: 3,
            },
            codec: CodecConfig {
                reassembly_timeout: Duration::from_millis(200),
                ..CodecConfig::default()
            },
            radio: RadioConfig {
                connect_timeout: Duration::from_millis(200),
                write_retries: 2,
                write_retry_delay: Duration::from_millis(5),
            },
            channels: ChannelConfig::testing(),
            maintenance_interval: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Fewer radio wakeups at the cost of slower exit detection
    pub fn low_power() -> Self {
        Self {
            session: SessionConfig {
                exit_grace_period: Duration::from_secs(60),
                keepalive_interval: Duration::from_secs(30),
                ..SessionConfig::default()
            },
            backoff: BackoffConfig {
                base: Duration::from_secs(2),
                cap: Duration::from_secs(60),
                max_attempts: 3,
            },
            maintenance_interval: Duration::from_secs(15),
            ..Self::default()
        }
    }

    pub fn with_exit_grace_period(mut self, grace: Duration) -> Self {
        self.session.exit_grace_period = grace;
        self
    }

    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.codec.max_chunk_size = size;
        self
    }

    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.proximity.smoothing = smoothing;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("session.exit_grace_period", self.session.exit_grace_period),
            ("session.handshake_timeout", self.session.handshake_timeout),
            ("session.keepalive_interval", self.session.keepalive_interval),
            ("backoff.base", self.backoff.base),
            ("backoff.cap", self.backoff.cap),
            ("codec.reassembly_timeout", self.codec.reassembly_timeout),
            ("radio.connect_timeout", self.radio.connect_timeout),
            ("maintenance_interval", self.maintenance_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(BubblesError::invalid_config(field, "must be non-zero"));
            }
        }

        if self.backoff.cap < self.backoff.base {
            return Err(BubblesError::invalid_config(
                "backoff.cap",
                "must not be shorter than backoff.base",
            ));
        }
        if self.backoff.max_attempts == 0 {
            return Err(BubblesError::invalid_config(
                "backoff.max_attempts",
                "must allow at least one attempt",
            ));
        }
        if self.session.outbound_queue_capacity == 0 {
            return Err(BubblesError::invalid_config(
                "session.outbound_queue_capacity",
                "must be non-zero",
            ));
        }

        let chunk = self.codec.max_chunk_size;
        if !(CodecConfig::MIN_CHUNK_SIZE..=CodecConfig::MAX_CHUNK_SIZE).contains(&chunk) {
            return Err(BubblesError::invalid_config(
                "codec.max_chunk_size",
                format!(
                    "{} outside {}..={}",
                    chunk,
                    CodecConfig::MIN_CHUNK_SIZE,
                    CodecConfig::MAX_CHUNK_SIZE
                ),
            ));
        }
        if self.codec.max_concurrent_reassemblies == 0 {
            return Err(BubblesError::invalid_config(
                "codec.max_concurrent_reassemblies",
                "must be non-zero",
            ));
        }

        let smoothing = self.proximity.smoothing;
        if !(smoothing > 0.0 && smoothing <= 1.0) {
            return Err(BubblesError::invalid_config(
                "proximity.smoothing",
                "must be in (0, 1]",
            ));
        }
        if !(self.proximity.path_loss_exponent > 0.0) {
            return Err(BubblesError::invalid_config(
                "proximity.path_loss_exponent",
                "must be positive",
            ));
        }

        let channels = [
            ("channels.command_buffer_size", self.channels.command_buffer_size),
            ("channels.event_buffer_size", self.channels.event_buffer_size),
            ("channels.effect_buffer_size", self.channels.effect_buffer_size),
            ("channels.app_event_buffer_size", self.channels.app_event_buffer_size),
        ];
        for (field, size) in channels {
            if size == 0 {
                return Err(BubblesError::invalid_config(field, "cannot be zero"));
            }
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Configuration Builder Pattern
// ----------------------------------------------------------------------------

/// Builder that validates on `build`
#[derive(Debug, Clone, Default)]
pub struct BubblesConfigBuilder {
    config: BubblesConfig,
}

impl BubblesConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn codec(mut self, codec: CodecConfig) -> Self {
        self.config.codec = codec;
        self
    }

    pub fn proximity(mut self, proximity: ProximityConfig) -> Self {
        self.config.proximity = proximity;
        self
    }

    pub fn radio(mut self, radio: RadioConfig) -> Self {
        self.config.radio = radio;
        self
    }

    pub fn channels(mut self, channels: ChannelConfig) -> Self {
        self.config.channels = channels;
        self
    }

    pub fn exit_grace_period(mut self, grace: Duration) -> Self {
        self.config.session.exit_grace_period = grace;
        self
    }

    pub fn max_chunk_size(mut self, size: usize) -> Self {
        self.config.codec.max_chunk_size = size;
        self
    }

    pub fn build(self) -> Result<BubblesConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
