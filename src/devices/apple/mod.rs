// SPDX-License-Identifier: GPL-3.0-only
//! Apple displays driven through HID brightness reports

pub mod pro_display_xdr;
pub mod studio_display;

use crate::protocols::usb_vendor::VendorStrategy;

/// Apple USB Vendor ID
pub const VENDOR_ID: u16 = 0x05ac;

pub fn strategies() -> [&'static dyn VendorStrategy; 2] {
    [&studio_display::STRATEGY, &pro_display_xdr::STRATEGY]
}
