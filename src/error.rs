// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the brightness engine
//!
//! Transport drivers report [`TransportError`]; everything above them
//! (adapters, registry, controller, coordinator) speaks [`BrightnessError`].

use thiserror::Error;

/// Raw failure of a bus or USB transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Device node or USB device is gone
    #[error("device not found: {0}")]
    NotFound(String),

    /// Missing access rights on the bus device
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Another driver or process holds the device
    #[error("device busy: {0}")]
    Busy(String),

    /// Transaction did not complete in time
    #[error("transaction timed out")]
    Timeout,

    /// Device rejected or did not acknowledge the transaction
    #[error("transaction not acknowledged: {0}")]
    Nak(String),

    /// Any other transport fault
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => TransportError::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => TransportError::PermissionDenied(err.to_string()),
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
            _ => match err.raw_os_error() {
                // i2c-dev reports a missing ACK as ENXIO / EREMOTEIO
                Some(libc::ENXIO) | Some(libc::EREMOTEIO) => TransportError::Nak(err.to_string()),
                Some(libc::EBUSY) => TransportError::Busy(err.to_string()),
                Some(libc::ETIMEDOUT) => TransportError::Timeout,
                _ => TransportError::Io(err.to_string()),
            },
        }
    }
}

/// Main engine error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrightnessError {
    /// Device vanished between scan and use, or unknown monitor id
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("device busy: {0}")]
    Busy(String),

    #[error("timed out talking to the display")]
    Timeout,

    /// Protocol-level reject (NAK, unexpected reply, bad checksum)
    #[error("display rejected the request: {0}")]
    Nak(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// Brightness value outside 0..=100
    #[error("brightness {0} is out of range (0-100)")]
    OutOfRange(u16),

    /// Feature or model not implemented
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Sensor link down beyond the reconnect window
    #[error("sensor disconnected: {0}")]
    Disconnected(String),

    /// Monitor is known but marked unreachable or disconnected
    #[error("display {0} is unreachable")]
    Unreachable(String),

    /// Malformed reply from the display
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Engine lifecycle misuse (start twice, stop while idle)
    #[error("engine state error: {0}")]
    Engine(String),

    /// Task join error
    #[error("task join error: {0}")]
    TaskJoin(String),
}

impl BrightnessError {
    /// Whether the adapter may retry the transaction once
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrightnessError::Timeout | BrightnessError::Nak(_))
    }
}

impl From<TransportError> for BrightnessError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(s) => BrightnessError::NotFound(s),
            TransportError::PermissionDenied(s) => BrightnessError::PermissionDenied(s),
            TransportError::Busy(s) => BrightnessError::Busy(s),
            TransportError::Timeout => BrightnessError::Timeout,
            TransportError::Nak(s) => BrightnessError::Nak(s),
            TransportError::Io(s) => BrightnessError::Io(s),
        }
    }
}

impl From<tokio::task::JoinError> for BrightnessError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrightnessError::TaskJoin(err.to_string())
    }
}

/// Result type alias for BrightnessError
pub type Result<T> = std::result::Result<T, BrightnessError>;
