// SPDX-License-Identifier: GPL-3.0-only
//! Raw transport drivers
//!
//! Drivers only move bytes. They never retry and never interpret payloads;
//! retry policy and encoding belong to the adapters in [`crate::protocols`].
//! Every call blocks the calling thread up to a hard timeout, so callers run
//! them on the blocking pool.

pub mod i2c;
pub mod usb;

use std::time::{Duration, Instant};

use crate::error::TransportError;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// A DDC/CI capable display bus with the display's slave address selected
pub trait DdcBus: std::fmt::Debug + Send + 'static {
    /// I2C bus number the display sits on
    fn bus(&self) -> u32;

    /// Write one request frame
    fn write(&mut self, payload: &[u8]) -> TransportResult<()>;

    /// Read a reply frame into `buf`, returns the number of bytes read
    fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize>;
}

/// Setup packet of a USB control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// A USB device exposing vendor or class control transfers
pub trait UsbControl: std::fmt::Debug + Send + 'static {
    fn vendor_id(&self) -> u16;

    fn product_id(&self) -> u16;

    /// Serial number string, if the device reports one
    fn serial(&self) -> Option<String>;

    /// Host-to-device control transfer, returns bytes written
    fn control_write(&mut self, request: ControlRequest, data: &[u8]) -> TransportResult<usize>;

    /// Device-to-host control transfer, returns bytes read
    fn control_read(&mut self, request: ControlRequest, buf: &mut [u8]) -> TransportResult<usize>;
}

/// Enforces a minimum gap between two transactions on one device
///
/// DDC/CI displays silently corrupt replies when commands arrive faster than
/// their settle time, and some USB controllers drop requests the same way.
#[derive(Debug, Clone)]
pub struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    /// Time left before the next transaction may start
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => (last + self.delay).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Block until the settle time since the previous transaction has passed
    pub fn wait(&self) {
        let remaining = self.remaining(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }

    /// Record the end of a transaction
    pub fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}
