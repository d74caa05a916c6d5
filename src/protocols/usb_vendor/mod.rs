// SPDX-License-Identifier: GPL-3.0-only
//! USB vendor control protocols
//!
//! Monitors that expose brightness over vendor-specific USB control
//! transfers. The adapter only provides the uniform [`DisplayProtocol`]
//! interface; the transfer layout of each model lives in a
//! [`VendorStrategy`]. Supporting a new model means writing a strategy and
//! listing it in [`crate::devices`], never touching the adapter.

pub mod gigabyte_osd;

#[cfg(feature = "apple-hid-displays")]
pub mod apple_hid;

use std::time::Duration;

use crate::devices::DeviceSpec;
use crate::error::Result;
use crate::monitor::{DeviceAddress, TransportKind};
use crate::transport::UsbControl;

use super::{DisplayProtocol, ProbeInfo, check_range, with_retry};

/// Encode/decode of one model family's control transfers
pub trait VendorStrategy: std::fmt::Debug + Send + Sync {
    fn spec(&self) -> &DeviceSpec;

    /// Read brightness as a percentage (0-100)
    fn read_brightness(&self, device: &mut dyn UsbControl) -> Result<u16>;

    /// Write a brightness percentage (0-100)
    fn write_brightness(&self, device: &mut dyn UsbControl, percent: u16) -> Result<()>;
}

/// USB vendor display controller
pub struct UsbVendorDisplay<D: UsbControl> {
    device: D,
    strategy: &'static dyn VendorStrategy,
    retry_delay: Duration,
}

impl<D: UsbControl> UsbVendorDisplay<D> {
    pub fn new(device: D, strategy: &'static dyn VendorStrategy, retry_delay: Duration) -> Self {
        Self {
            device,
            strategy,
            retry_delay,
        }
    }

    pub fn spec(&self) -> &DeviceSpec {
        self.strategy.spec()
    }
}

impl<D: UsbControl> DisplayProtocol for UsbVendorDisplay<D> {
    fn transport(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn address(&self) -> DeviceAddress {
        DeviceAddress::Usb {
            vendor_id: self.device.vendor_id(),
            product_id: self.device.product_id(),
            serial: self.device.serial().unwrap_or_default(),
        }
    }

    fn name(&self) -> Option<String> {
        Some(self.strategy.spec().name.to_string())
    }

    fn probe(&mut self) -> Result<ProbeInfo> {
        let brightness = self.get_brightness()?;
        Ok(ProbeInfo {
            name: self.name(),
            brightness,
        })
    }

    fn get_brightness(&mut self) -> Result<u16> {
        let strategy = self.strategy;
        let percent = with_retry(self.retry_delay, || {
            strategy.read_brightness(&mut self.device)
        })?;

        debug!(
            "{} {:?} brightness: {}%",
            strategy.spec().name,
            self.device.serial(),
            percent
        );
        Ok(percent)
    }

    fn set_brightness(&mut self, value: u16) -> Result<()> {
        let value = check_range(value)?;
        let strategy = self.strategy;
        with_retry(self.retry_delay, || {
            strategy.write_brightness(&mut self.device, value)
        })?;

        debug!(
            "Set {} {:?} brightness to {}%",
            strategy.spec().name,
            self.device.serial(),
            value
        );
        Ok(())
    }
}

impl<D: UsbControl> std::fmt::Debug for UsbVendorDisplay<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UsbVendorDisplay({}, device: {:?})",
            self.strategy.spec().name,
            self.device
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::devices::gigabyte::m27q;
    use crate::error::{BrightnessError, TransportError};
    use crate::transport::{ControlRequest, TransportResult};

    /// Scripted USB device: records writes, answers reads from a queue
    #[derive(Debug, Default)]
    pub struct FakeUsb {
        pub vendor_id: u16,
        pub product_id: u16,
        pub serial: Option<String>,
        pub writes: Vec<(ControlRequest, Vec<u8>)>,
        pub reads: VecDeque<TransportResult<Vec<u8>>>,
        pub write_failures: VecDeque<TransportError>,
    }

    impl FakeUsb {
        pub fn new(vendor_id: u16, product_id: u16, serial: &str) -> Self {
            Self {
                vendor_id,
                product_id,
                serial: Some(serial.to_string()),
                ..Default::default()
            }
        }
    }

    impl UsbControl for FakeUsb {
        fn vendor_id(&self) -> u16 {
            self.vendor_id
        }

        fn product_id(&self) -> u16 {
            self.product_id
        }

        fn serial(&self) -> Option<String> {
            self.serial.clone()
        }

        fn control_write(&mut self, request: ControlRequest, data: &[u8]) -> TransportResult<usize> {
            if let Some(err) = self.write_failures.pop_front() {
                return Err(err);
            }
            self.writes.push((request, data.to_vec()));
            Ok(data.len())
        }

        fn control_read(&mut self, _request: ControlRequest, buf: &mut [u8]) -> TransportResult<usize> {
            let data = self.reads.pop_front().unwrap_or(Err(TransportError::Timeout))?;
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            Ok(n)
        }
    }

    fn m27q_display() -> UsbVendorDisplay<FakeUsb> {
        UsbVendorDisplay::new(
            FakeUsb::new(0x2109, 0x8883, "SN1"),
            &m27q::STRATEGY,
            Duration::ZERO,
        )
    }

    #[test]
    fn test_identity_comes_from_strategy_and_device() {
        let display = m27q_display();
        assert_eq!(display.name().as_deref(), Some("M27Q"));
        assert_eq!(display.transport(), TransportKind::Usb);
        assert_eq!(
            display.address(),
            DeviceAddress::Usb {
                vendor_id: 0x2109,
                product_id: 0x8883,
                serial: "SN1".to_string()
            }
        );
    }

    #[test]
    fn test_retry_once_on_stall() {
        let mut display = m27q_display();
        display
            .device
            .write_failures
            .push_back(TransportError::Nak("stall".into()));
        display.set_brightness(30).unwrap();
        assert_eq!(display.device.writes.len(), 1);
    }

    #[test]
    fn test_no_retry_on_permission_denied() {
        let mut display = m27q_display();
        display
            .device
            .write_failures
            .push_back(TransportError::PermissionDenied("usb".into()));
        assert!(matches!(
            display.set_brightness(30),
            Err(BrightnessError::PermissionDenied(_))
        ));
        assert!(display.device.writes.is_empty());
    }

    #[test]
    fn test_out_of_range_rejected_before_transfer() {
        let mut display = m27q_display();
        assert_eq!(display.set_brightness(150), Err(BrightnessError::OutOfRange(150)));
        assert!(display.device.writes.is_empty());
    }
}
