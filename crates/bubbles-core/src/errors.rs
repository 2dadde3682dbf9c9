//! Error types for the bubbles protocol
//!
//! Each layer has its own error enum; `BubblesError` unifies them. Transient
//! transport failures are recovered inside the session state machine and only
//! ever reach the application through logs.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures reported by a radio transport adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Radio hardware or permission absent; fatal to starting communications
    #[error("Radio transport unavailable: {reason}")]
    TransportUnavailable { reason: String },
    #[error("Connect to {address} failed: {reason}")]
    ConnectFailure { address: String, reason: String },
    #[error("Attribute write to {address} failed: {reason}")]
    WriteFailure { address: String, reason: String },
    #[error("Not connected to {address}")]
    NotConnected { address: String },
    #[error("Transport operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Platform radio error: {reason}")]
    Platform { reason: String },
}

impl TransportError {
    /// Transient errors are retried by the session layer
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::TransportUnavailable { .. })
    }
}

/// Failures encoding or decoding payload chunks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Malformed payload: {reason}")]
    MalformedPayload { reason: String },
    #[error("Unknown payload kind tag 0x{tag:02x}")]
    UnknownKind { tag: u8 },
    #[error("Payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Invalid fragment {index}/{count}")]
    InvalidFragment { index: u8, count: u8 },
    #[error("Reassembly of {kind} payload timed out after {elapsed_ms}ms")]
    ReassemblyTimeout { kind: String, elapsed_ms: u64 },
    #[error("Invalid UTF-8 in payload body")]
    InvalidUtf8,
}

/// Session bookkeeping errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid transition from {from} on {input}")]
    InvalidTransition { from: String, input: String },
    #[error("No session for {address}")]
    SessionNotFound { address: String },
}

/// Rejected configuration values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Top-level error for the bubbles protocol
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BubblesError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Channel communication error between runtime tasks
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Operation requires communications to be started
    #[error("Communications are not running")]
    NotRunning,
}

impl BubblesError {
    /// Create a malformed payload error with a reason
    pub fn malformed<T: Into<String>>(reason: T) -> Self {
        BubblesError::Payload(PayloadError::MalformedPayload {
            reason: reason.into(),
        })
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        BubblesError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error for a named field
    pub fn invalid_config<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        BubblesError::Config(ConfigError::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Whether the runtime must stop after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BubblesError::Channel { .. }
                | BubblesError::Config(_)
                | BubblesError::Transport(TransportError::TransportUnavailable { .. })
        )
    }
}

pub type Result<T> = core::result::Result<T, BubblesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let unavailable = TransportError::TransportUnavailable {
            reason: "powered off".into(),
        };
        let write = TransportError::WriteFailure {
            address: "aa".into(),
            reason: "gatt busy".into(),
        };

        assert!(!unavailable.is_transient());
        assert!(write.is_transient());
        assert!(BubblesError::from(unavailable).is_fatal());
        assert!(!BubblesError::from(write).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = BubblesError::malformed("truncated body");
        assert_eq!(
            err.to_string(),
            "Payload error: Malformed payload: truncated body"
        );

        let err = PayloadError::UnknownKind { tag: 0x7f };
        assert_eq!(err.to_string(), "Unknown payload kind tag 0x7f");
    }
}
