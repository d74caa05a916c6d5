// SPDX-License-Identifier: GPL-3.0-only
//! Gigabyte M27Q specifications

use std::time::Duration;

use crate::devices::{DeviceSpec, Protocol};
use crate::protocols::usb_vendor::gigabyte_osd::GigabyteOsd;

/// USB Product ID of the M27Q's built-in hub
pub const PRODUCT_ID: u16 = 0x8883;

/// Device specification for Gigabyte M27Q
///
/// - 27-inch QHD (2560 x 1440), 170 Hz
/// - Brightness set through the OSD sidekick vendor requests
/// - The scaler drops commands sent back to back, hence the settle delay
pub const SPEC: DeviceSpec = DeviceSpec {
    vendor_id: super::VENDOR_ID,
    product_id: PRODUCT_ID,
    protocol: Protocol::GigabyteOsd,
    name: "M27Q",
    interface: None,
    settle_delay: Duration::from_millis(25),
    min_brightness_value: 0,
    max_brightness_value: 100,
    default_gamma: 1.0,
};

pub static STRATEGY: GigabyteOsd = GigabyteOsd { spec: SPEC };
