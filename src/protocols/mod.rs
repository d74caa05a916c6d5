// SPDX-License-Identifier: GPL-3.0-only
//! Display brightness control protocols
//!
//! Each adapter wraps one open transport handle, adds the display's identity
//! and speaks its wire protocol. All adapters expose the same capability
//! interface, [`DisplayProtocol`], so the registry and controller never care
//! which bus a monitor lives on.

pub mod ddc_ci;
pub mod usb_vendor;

use std::time::Duration;

use crate::error::{BrightnessError, Result};
use crate::monitor::{DeviceAddress, TransportKind};

/// What a successful probe learned about a display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Display name; `None` when the display does not report one
    pub name: Option<String>,
    pub brightness: u16,
}

/// Common trait for all display control protocols
pub trait DisplayProtocol: std::fmt::Debug + Send {
    fn transport(&self) -> TransportKind;

    /// Bus or USB coordinates of the underlying handle
    fn address(&self) -> DeviceAddress;

    /// Human-readable name, `None` while unknown
    fn name(&self) -> Option<String>;

    /// Identify the display and check that it answers
    fn probe(&mut self) -> Result<ProbeInfo>;

    /// Get the current brightness (0-100)
    fn get_brightness(&mut self) -> Result<u16>;

    /// Set the brightness (0-100)
    fn set_brightness(&mut self, value: u16) -> Result<()>;

    /// Set the brightness and read it back
    ///
    /// A readback that disagrees triggers one more write. After a failed
    /// write the hardware state is unknown, so the display is re-read to
    /// refresh the caller's view before the error is returned.
    fn set_brightness_confirmed(&mut self, value: u16) -> Result<u16> {
        if let Err(err) = self.set_brightness(value) {
            match self.get_brightness() {
                Ok(actual) => debug!("Write failed, display reports {}%", actual),
                Err(e) => debug!("Write failed and readback failed too: {}", e),
            }
            return Err(err);
        }

        let actual = self.get_brightness()?;
        if actual == value {
            return Ok(actual);
        }

        debug!("Readback {}% differs from requested {}%, writing again", actual, value);
        self.set_brightness(value)?;
        self.get_brightness()
    }
}

/// Reject brightness values outside 0..=100
pub fn check_range(value: u16) -> Result<u16> {
    if value > 100 {
        Err(BrightnessError::OutOfRange(value))
    } else {
        Ok(value)
    }
}

/// Run `op`, retrying exactly once when it fails with a timeout or NAK
///
/// Permission, unsupported and generic I/O failures are returned untouched.
pub fn with_retry<T>(retry_delay: Duration, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Err(e) if e.is_retryable() => {
            debug!("Transient display error: {}, retrying once", e);
            if !retry_delay.is_zero() {
                std::thread::sleep(retry_delay);
            }
            op()
        }
        res => res,
    }
}
