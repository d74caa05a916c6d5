// SPDX-License-Identifier: GPL-3.0-only
//! Apple HID brightness protocol
//!
//! Used by Apple displays and the LG UltraFine models co-developed with
//! Apple. Brightness is HID feature report 1 on interface 7, issued here as
//! raw HID class GET_REPORT / SET_REPORT control transfers:
//!
//! ```text
//! report: [01, value (u32 little-endian), 00, 00]
//! ```
//!
//! Based on the asdbctl implementation:
//! https://github.com/juliuszint/asdbctl

use crate::devices::DeviceSpec;
use crate::error::{BrightnessError, Result};
use crate::transport::{ControlRequest, UsbControl};

use super::VendorStrategy;

/// HID feature report size in bytes
const REPORT_SIZE: usize = 7;

/// HID Report ID for brightness control
const REPORT_ID: u8 = 1;

const HID_GET_REPORT: u8 = 0x01;
const HID_SET_REPORT: u8 = 0x09;
const FEATURE_REPORT: u16 = 0x03;

/// Strategy for Apple HID family displays
#[derive(Debug)]
pub struct AppleHidReport {
    pub spec: DeviceSpec,
}

impl AppleHidReport {
    fn request(&self, request_type: u8, request: u8) -> ControlRequest {
        ControlRequest {
            request_type,
            request,
            value: (FEATURE_REPORT << 8) | REPORT_ID as u16,
            index: self.spec.interface.unwrap_or(0) as u16,
        }
    }

    /// Convert percentage (0-100) to protocol value for this device
    pub fn percentage_to_protocol_value(&self, percentage: u16) -> u32 {
        let percentage = percentage.min(100) as u32;
        self.spec.min_brightness_value + (self.spec.brightness_range() * percentage) / 100
    }

    /// Convert protocol value to percentage (0-100) for this device
    pub fn protocol_value_to_percentage(&self, value: u32) -> u16 {
        let min_value = self.spec.min_brightness_value;
        if value <= min_value {
            return 0;
        }
        if value >= self.spec.max_brightness_value {
            return 100;
        }

        let range = self.spec.brightness_range() as u64;
        (((value - min_value) as u64 * 100 + range / 2) / range).min(100) as u16
    }
}

impl VendorStrategy for AppleHidReport {
    fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    fn read_brightness(&self, device: &mut dyn UsbControl) -> Result<u16> {
        // Device-to-host, class, interface
        let request = self.request(0xA1, HID_GET_REPORT);
        let mut buf = [0u8; REPORT_SIZE];
        buf[0] = REPORT_ID;

        let n = device.control_read(request, &mut buf)?;
        if n < 5 {
            return Err(BrightnessError::Protocol(format!(
                "{}: short feature report ({} bytes)",
                self.spec.name, n
            )));
        }

        let value = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        trace!("{} protocol value: {}", self.spec.name, value);
        Ok(self.protocol_value_to_percentage(value))
    }

    fn write_brightness(&self, device: &mut dyn UsbControl, percent: u16) -> Result<()> {
        // Host-to-device, class, interface
        let request = self.request(0x21, HID_SET_REPORT);
        let mut buf = [0u8; REPORT_SIZE];
        buf[0] = REPORT_ID;
        buf[1..5].copy_from_slice(&self.percentage_to_protocol_value(percent).to_le_bytes());

        device.control_write(request, &buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::apple::studio_display;
    use crate::devices::lg::ultrafine_5k;
    use crate::protocols::usb_vendor::tests::FakeUsb;

    #[test]
    fn test_percentage_mapping_uses_device_range() {
        let strategy = &studio_display::STRATEGY;
        assert_eq!(strategy.percentage_to_protocol_value(0), 400);
        assert_eq!(strategy.percentage_to_protocol_value(100), 60000);
        assert_eq!(strategy.percentage_to_protocol_value(50), 30200);

        assert_eq!(strategy.protocol_value_to_percentage(0), 0);
        assert_eq!(strategy.protocol_value_to_percentage(30200), 50);
        assert_eq!(strategy.protocol_value_to_percentage(70000), 100);
    }

    #[test]
    fn test_set_report_layout() {
        let mut device = FakeUsb::new(0x043e, 0x9a70, "LG5K");
        ultrafine_5k::STRATEGY.write_brightness(&mut device, 100).unwrap();

        let (request, data) = &device.writes[0];
        assert_eq!(request.request_type, 0x21);
        assert_eq!(request.request, HID_SET_REPORT);
        assert_eq!(request.value, 0x0301);
        assert_eq!(request.index, 7);
        assert_eq!(data.len(), REPORT_SIZE);
        assert_eq!(data[0], REPORT_ID);
        assert_eq!(u32::from_le_bytes([data[1], data[2], data[3], data[4]]), 50000);
    }

    #[test]
    fn test_get_report_decodes_value() {
        let mut device = FakeUsb::new(0x05ac, 0x1114, "ASD");
        let mut report = vec![REPORT_ID];
        report.extend_from_slice(&60000u32.to_le_bytes());
        report.extend_from_slice(&[0, 0]);
        device.reads.push_back(Ok(report));

        assert_eq!(studio_display::STRATEGY.read_brightness(&mut device).unwrap(), 100);
    }
}
