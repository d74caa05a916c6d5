// SPDX-License-Identifier: GPL-3.0-only
//! Linux i2c-dev driver for DDC/CI
//!
//! Talks to `/dev/i2c-N` through `i2cdev`, addressed at the display's
//! DDC/CI controller. The driver owns the protocol-mandated settle time
//! between transactions; callers never sleep on its behalf. Transaction
//! timeouts are the i2c adapter's own.

use std::time::Duration;

use i2cdev::core::I2CDevice;
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CError};

use crate::error::TransportError;

use super::{DdcBus, Pacer, TransportResult};

/// DDC/CI command address on the display's I2C bus
pub const DDC_CI_ADDRESS: u16 = 0x37;

/// EDID EEPROM address, present on every bus a display is attached to
pub const EDID_ADDRESS: u16 = 0x50;

/// Minimum gap between DDC/CI transactions (40ms by the standard, some
/// displays need a little more)
pub const DDC_CI_DELAY: Duration = Duration::from_millis(50);

const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];

fn bus_path(bus: u32) -> String {
    format!("/dev/i2c-{}", bus)
}

fn map_error(err: LinuxI2CError) -> TransportError {
    TransportError::from(std::io::Error::from(err))
}

pub fn is_edid_header(block: &[u8]) -> bool {
    block.starts_with(&EDID_HEADER)
}

/// One open DDC/CI bus
pub struct LinuxI2c {
    bus: u32,
    device: LinuxI2CDevice,
    pacer: Pacer,
}

impl std::fmt::Debug for LinuxI2c {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LinuxI2c(i2c-{})", self.bus)
    }
}

impl LinuxI2c {
    /// Open `/dev/i2c-{bus}` addressed at the display controller
    pub fn open(bus: u32) -> TransportResult<Self> {
        let device = LinuxI2CDevice::new(bus_path(bus), DDC_CI_ADDRESS).map_err(map_error)?;

        Ok(Self {
            bus,
            device,
            pacer: Pacer::new(DDC_CI_DELAY),
        })
    }

    /// Whether a display answers EDID reads on this bus
    ///
    /// Buses without EDID belong to sensors, SMBus controllers and the
    /// like; nothing is ever sent to their 0x37 address.
    pub fn has_edid(bus: u32) -> bool {
        let mut device = match LinuxI2CDevice::new(bus_path(bus), EDID_ADDRESS) {
            Ok(device) => device,
            Err(e) => {
                trace!("i2c-{}: can't address EDID: {}", bus, e);
                return false;
            }
        };

        let mut header = [0u8; 8];
        let res = I2CDevice::write(&mut device, &[0x00])
            .and_then(|()| I2CDevice::read(&mut device, &mut header));
        match res {
            Ok(()) => is_edid_header(&header),
            Err(e) => {
                trace!("i2c-{}: no EDID: {}", bus, e);
                false
            }
        }
    }

    /// List I2C bus numbers known to udev
    pub fn enumerate_buses() -> Vec<u32> {
        let mut buses = Vec::new();

        let mut enumerator = match udev::Enumerator::new() {
            Ok(e) => e,
            Err(e) => {
                error!("Failed to create udev enumerator: {}", e);
                return buses;
            }
        };
        if let Err(e) = enumerator.match_subsystem("i2c-dev") {
            error!("Failed to filter i2c-dev devices: {}", e);
            return buses;
        }

        match enumerator.scan_devices() {
            Ok(devices) => {
                for device in devices {
                    if let Some(number) = device.sysnum() {
                        buses.push(number as u32);
                    }
                }
            }
            Err(e) => error!("Failed to scan i2c-dev devices: {}", e),
        }

        buses.sort_unstable();
        buses.dedup();
        buses
    }
}

impl DdcBus for LinuxI2c {
    fn bus(&self) -> u32 {
        self.bus
    }

    fn write(&mut self, payload: &[u8]) -> TransportResult<()> {
        self.pacer.wait();
        let res = I2CDevice::write(&mut self.device, payload);
        self.pacer.mark();
        res.map_err(map_error)
    }

    /// i2c reads always fill the buffer; framing is checked by the adapter
    fn read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        self.pacer.wait();
        let res = I2CDevice::read(&mut self.device, buf);
        self.pacer.mark();
        res.map_err(map_error)?;
        Ok(buf.len())
    }
}
