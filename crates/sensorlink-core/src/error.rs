//! Error types for sensorlink-core.
//!
//! Nothing on the telemetry or reconnect path is fatal to the
//! controller: resolution misses and connection failures are retried
//! with backoff, decode failures drop a single frame, and write
//! failures are surfaced to the caller. The only fatal conditions are
//! an explicit stop request ([`Error::Cancelled`]) and a startup-time
//! resource fault such as a missing Bluetooth adapter.

use std::time::Duration;

use thiserror::Error;

use sensorlink_types::DecodeError;

/// Errors that can occur while driving the link to a sensor node.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error
/// variants in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Target peer not found during resolution.
    #[error("peer not found: {0}")]
    PeerNotFound(PeerNotFoundReason),

    /// Operation attempted while not connected to the peer.
    #[error("not connected to peer")]
    NotConnected,

    /// Establishing the link failed.
    #[error("connection failed{}: {reason}", peer_label(.peer))]
    ConnectionFailed {
        /// The peer that failed to connect, if known.
        peer: Option<String>,
        /// Why the connection failed.
        reason: String,
    },

    /// Required BLE characteristic not found on the peer.
    #[error("characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
    },

    /// A telemetry frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A write to the command channel failed.
    #[error("write to {uuid} failed: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Operation timed out.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled by a stop request.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn peer_label(peer: &Option<String>) -> String {
    match peer {
        Some(p) => format!(" to '{p}'"),
        None => String::new(),
    }
}

/// Reason why the target peer was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PeerNotFoundReason {
    /// No Bluetooth adapter available.
    NoAdapter,
    /// The scan deadline passed without a matching broadcast.
    ScanTimeout {
        /// How long the resolver waited.
        duration: Duration,
    },
    /// The identified peer disappeared before it could be used.
    Vanished {
        /// The identifier that stopped matching.
        identifier: String,
    },
}

impl std::fmt::Display for PeerNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
            Self::ScanTimeout { duration } => {
                write!(f, "no matching broadcast within {duration:?}")
            }
            Self::Vanished { identifier } => write!(f, "peer '{identifier}' vanished"),
        }
    }
}

impl Error {
    /// Create a scan-timeout resolution error.
    pub fn scan_timeout(duration: Duration) -> Self {
        Self::PeerNotFound(PeerNotFoundReason::ScanTimeout { duration })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connection failure for a known peer.
    pub fn connection_failed(peer: Option<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            peer,
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the supervisor treats this error as a recoverable miss
    /// (retry) rather than a fault worth surfacing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PeerNotFound(PeerNotFoundReason::ScanTimeout { .. }
                | PeerNotFoundReason::Vanished { .. })
                | Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::Decode(_)
                | Self::WriteFailed { .. }
                | Self::NotConnected
                | Self::Bluetooth(_)
        )
    }
}

/// Result type alias using sensorlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::scan_timeout(Duration::from_secs(5));
        assert!(err.to_string().contains("5s"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "not connected to peer");

        let err = Error::connection_failed(Some("CIRCUITPY23c6".into()), "peer busy");
        assert!(err.to_string().contains("CIRCUITPY23c6"));
        assert!(err.to_string().contains("peer busy"));

        let err = Error::timeout("connect", Duration::from_secs(10));
        assert!(err.to_string().contains("connect"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::scan_timeout(Duration::from_secs(5)).is_recoverable());
        assert!(Error::connection_failed(None, "rejected").is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
        assert!(!Error::invalid_config("bad delay").is_recoverable());
        assert!(
            !Error::PeerNotFound(PeerNotFoundReason::NoAdapter).is_recoverable()
        );
    }

    #[test]
    fn test_decode_error_conversion() {
        let bad = std::str::from_utf8(&[0xff]).unwrap_err();
        let err: Error = DecodeError::InvalidUtf8(bad).into();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.is_recoverable());
    }
}
