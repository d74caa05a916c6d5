// SPDX-License-Identifier: GPL-3.0-only
//! Apple Pro Display XDR

use std::time::Duration;

use crate::devices::{DeviceSpec, Protocol};
use crate::protocols::usb_vendor::apple_hid::AppleHidReport;

pub const PRODUCT_ID: u16 = 0x9243;

/// Report range tops out below the Studio Display's; the panel maps it onto
/// its 1000 nit SDR ceiling.
pub const SPEC: DeviceSpec = DeviceSpec {
    vendor_id: super::VENDOR_ID,
    product_id: PRODUCT_ID,
    protocol: Protocol::AppleHid,
    name: "Apple Pro Display XDR",
    interface: Some(7),
    settle_delay: Duration::from_millis(20),
    min_brightness_value: 400,
    max_brightness_value: 50000,
    default_gamma: 1.8,
};

pub static STRATEGY: AppleHidReport = AppleHidReport { spec: SPEC };
