// SPDX-License-Identifier: GPL-3.0-only
//! Apple Studio Display

use std::time::Duration;

use crate::devices::{DeviceSpec, Protocol};
use crate::protocols::usb_vendor::apple_hid::AppleHidReport;

pub const PRODUCT_ID: u16 = 0x1114;

/// Reports go to the HID interface, not the camera or audio ones
pub const SPEC: DeviceSpec = DeviceSpec {
    vendor_id: super::VENDOR_ID,
    product_id: PRODUCT_ID,
    protocol: Protocol::AppleHid,
    name: "Apple Studio Display",
    interface: Some(7),
    settle_delay: Duration::from_millis(20),
    min_brightness_value: 400,
    max_brightness_value: 60000,
    // Perceived brightness is closer to linear with a 1.8 curve
    default_gamma: 1.8,
};

pub static STRATEGY: AppleHidReport = AppleHidReport { spec: SPEC };
