// SPDX-License-Identifier: GPL-3.0-only
//! Device-specific configurations organized by manufacturer
//!
//! Every USB display we can drive is listed here with its vendor strategy.
//! DDC/CI displays need no entry; they are found by probing i2c buses.

use std::time::Duration;

use crate::protocols::usb_vendor::VendorStrategy;

#[cfg(feature = "apple-hid-displays")]
pub mod apple;
pub mod gigabyte;
#[cfg(feature = "apple-hid-displays")]
pub mod lg;

/// Display communication protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Apple HID feature reports (used by Apple and LG displays)
    AppleHid,
    /// Gigabyte OSD sidekick vendor requests
    GigabyteOsd,
}

/// Device specification for a USB-controlled display
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    /// USB Vendor ID
    pub vendor_id: u16,

    /// USB Product ID
    pub product_id: u16,

    pub protocol: Protocol,

    /// Human-readable model name, matched against DDC/CI names on dedup
    pub name: &'static str,

    /// Interface to claim before issuing requests; `None` for device-level
    /// vendor requests
    pub interface: Option<u8>,

    /// Minimum pause between two transactions
    pub settle_delay: Duration,

    /// Minimum brightness protocol value (not physical nits)
    pub min_brightness_value: u32,

    /// Maximum brightness protocol value (not physical nits)
    pub max_brightness_value: u32,

    /// Default gamma curve for this device (1.0 = linear)
    /// Apple displays typically work well with 1.8, most others with 1.0
    pub default_gamma: f32,
}

impl DeviceSpec {
    /// Get the brightness protocol value range (max - min)
    pub fn brightness_range(&self) -> u32 {
        self.max_brightness_value - self.min_brightness_value
    }
}

/// All vendor strategies compiled into this build
pub fn strategies() -> Vec<&'static dyn VendorStrategy> {
    let mut list = gigabyte::strategies().to_vec();

    #[cfg(feature = "apple-hid-displays")]
    {
        list.extend(apple::strategies());
        list.extend(lg::strategies());
    }

    list
}

/// Get the strategy driving a `vendor_id:product_id` pair
pub fn get_strategy(vendor_id: u16, product_id: u16) -> Option<&'static dyn VendorStrategy> {
    strategies().into_iter().find(|s| {
        let spec = s.spec();
        spec.vendor_id == vendor_id && spec.product_id == product_id
    })
}

/// Get device specification by USB ids
pub fn get_device_spec(vendor_id: u16, product_id: u16) -> Option<&'static DeviceSpec> {
    get_strategy(vendor_id, product_id).map(|s| s.spec())
}
