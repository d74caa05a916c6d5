// SPDX-License-Identifier: GPL-3.0-only
//! LG UltraFine displays
//!
//! Built with Apple and speaking the same HID brightness report.

pub mod ultrafine_4k;
pub mod ultrafine_5k;

use crate::protocols::usb_vendor::VendorStrategy;

/// LG USB Vendor ID
pub const VENDOR_ID: u16 = 0x043e;

pub fn strategies() -> [&'static dyn VendorStrategy; 2] {
    [&ultrafine_4k::STRATEGY, &ultrafine_5k::STRATEGY]
}
