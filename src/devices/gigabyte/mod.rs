// SPDX-License-Identifier: GPL-3.0-only
//! Gigabyte displays with an OSD sidekick USB hub

pub mod m27q;

use crate::protocols::usb_vendor::VendorStrategy;

/// USB Vendor ID of the VIA Labs hub controller inside Gigabyte monitors
pub const VENDOR_ID: u16 = 0x2109;

pub fn strategies() -> [&'static dyn VendorStrategy; 1] {
    [&m27q::STRATEGY]
}
