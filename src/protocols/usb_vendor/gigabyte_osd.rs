// SPDX-License-Identifier: GPL-3.0-only
//! Gigabyte OSD sidekick protocol
//!
//! Gigabyte monitors with a built-in USB hub (M27Q and relatives) tunnel
//! DDC-style VCP commands through vendor control transfers on the hub's
//! Realtek controller:
//!
//! - command: vendor OUT, request 178, payload `6E 51 (81+n) op data..`
//! - reply: vendor IN, request 162, index 111, 12 bytes, value at byte 10
//!
//! No checksum is carried; the hub computes it towards the scaler.

use crate::devices::DeviceSpec;
use crate::error::{BrightnessError, Result};
use crate::transport::{ControlRequest, UsbControl};

use super::VendorStrategy;

/// VCP code for image luminance
const LUMINANCE_CODE: u8 = 0x10;

const OP_GET: u8 = 0x01;
const OP_SET: u8 = 0x03;

const COMMAND_REQUEST: ControlRequest = ControlRequest {
    request_type: 0x40,
    request: 178,
    value: 0,
    index: 0,
};

const REPLY_REQUEST: ControlRequest = ControlRequest {
    request_type: 0xC0,
    request: 162,
    value: 0,
    index: 111,
};

const REPLY_LEN: usize = 12;
const REPLY_VALUE_OFFSET: usize = 10;

/// Strategy for Gigabyte OSD-over-USB monitors
#[derive(Debug)]
pub struct GigabyteOsd {
    pub spec: DeviceSpec,
}

/// Build the command payload for `op` carrying `data`
pub fn osd_command(op: u8, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x6E, 0x51, 0x81 + data.len() as u8, op];
    payload.extend_from_slice(data);
    payload
}

impl VendorStrategy for GigabyteOsd {
    fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    fn read_brightness(&self, device: &mut dyn UsbControl) -> Result<u16> {
        device.control_write(COMMAND_REQUEST, &osd_command(OP_GET, &[LUMINANCE_CODE]))?;

        let mut buf = [0u8; REPLY_LEN];
        let n = device.control_read(REPLY_REQUEST, &mut buf)?;
        if n <= REPLY_VALUE_OFFSET {
            return Err(BrightnessError::Protocol(format!(
                "{}: short OSD reply ({} bytes)",
                self.spec.name, n
            )));
        }

        Ok((buf[REPLY_VALUE_OFFSET] as u16).min(100))
    }

    fn write_brightness(&self, device: &mut dyn UsbControl, percent: u16) -> Result<()> {
        let value = percent.min(100) as u8;
        device.control_write(
            COMMAND_REQUEST,
            &osd_command(OP_SET, &[LUMINANCE_CODE, 0x00, value]),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::gigabyte::m27q;
    use crate::protocols::usb_vendor::tests::FakeUsb;

    #[test]
    fn test_set_payload_layout() {
        let mut device = FakeUsb::new(0x2109, 0x8883, "A");
        m27q::STRATEGY.write_brightness(&mut device, 70).unwrap();

        let (request, data) = &device.writes[0];
        assert_eq!(*request, COMMAND_REQUEST);
        assert_eq!(data, &vec![0x6E, 0x51, 0x84, 0x03, 0x10, 0x00, 70]);
    }

    #[test]
    fn test_get_reads_value_byte() {
        let mut device = FakeUsb::new(0x2109, 0x8883, "A");
        let mut reply = vec![0u8; REPLY_LEN];
        reply[REPLY_VALUE_OFFSET] = 42;
        device.reads.push_back(Ok(reply));

        assert_eq!(m27q::STRATEGY.read_brightness(&mut device).unwrap(), 42);
        assert_eq!(device.writes[0].1, vec![0x6E, 0x51, 0x82, 0x01, 0x10]);
    }

    #[test]
    fn test_short_reply_is_protocol_error() {
        let mut device = FakeUsb::new(0x2109, 0x8883, "A");
        device.reads.push_back(Ok(vec![0u8; 4]));
        assert!(matches!(
            m27q::STRATEGY.read_brightness(&mut device),
            Err(BrightnessError::Protocol(_))
        ));
    }
}
