// SPDX-License-Identifier: GPL-3.0-only
//! libusb control-transfer driver for USB vendor displays

use std::time::Duration;

use rusb::{Device, DeviceHandle, GlobalContext};

use crate::error::TransportError;

use super::{ControlRequest, Pacer, TransportResult, UsbControl};

/// Hard timeout of one control transfer
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(250);

/// Descriptor summary of an attached USB device
#[derive(Debug, Clone)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
}

/// One open USB display controller
pub struct RusbDevice {
    handle: DeviceHandle<GlobalContext>,
    vendor_id: u16,
    product_id: u16,
    serial: Option<String>,
    interface: Option<u8>,
    pacer: Pacer,
}

impl std::fmt::Debug for RusbDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RusbDevice({:04x}:{:04x}, serial: {:?})",
            self.vendor_id, self.product_id, self.serial
        )
    }
}

impl RusbDevice {
    /// List every attached USB device
    pub fn enumerate() -> Vec<(Device<GlobalContext>, UsbDeviceInfo)> {
        let devices = match rusb::devices() {
            Ok(devices) => devices,
            Err(e) => {
                error!("Failed to list USB devices: {}", e);
                return Vec::new();
            }
        };

        devices
            .iter()
            .filter_map(|device| {
                let desc = device.device_descriptor().ok()?;
                let info = UsbDeviceInfo {
                    vendor_id: desc.vendor_id(),
                    product_id: desc.product_id(),
                    bus: device.bus_number(),
                    address: device.address(),
                };
                Some((device, info))
            })
            .collect()
    }

    /// Open a device; when `interface` is given the interface is claimed so
    /// class requests addressed to it reach the device
    pub fn open(
        device: &Device<GlobalContext>,
        interface: Option<u8>,
        settle_delay: Duration,
    ) -> TransportResult<Self> {
        let desc = device.device_descriptor().map_err(map_error)?;
        let handle = device.open().map_err(map_error)?;

        let serial = handle
            .read_serial_number_string_ascii(&desc)
            .ok()
            .filter(|s| !s.trim().is_empty());

        if let Some(interface) = interface {
            if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
                debug!("Kernel driver auto-detach unavailable: {}", e);
            }
            handle.claim_interface(interface).map_err(map_error)?;
        }

        Ok(Self {
            handle,
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            serial,
            interface,
            pacer: Pacer::new(settle_delay),
        })
    }
}

impl Drop for RusbDevice {
    fn drop(&mut self) {
        if let Some(interface) = self.interface {
            if let Err(e) = self.handle.release_interface(interface) {
                debug!("Failed to release interface {}: {}", interface, e);
            }
        }
    }
}

impl UsbControl for RusbDevice {
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
        self.pacer.wait();
        let res = self.handle.write_control(
            request.request_type,
            request.request,
            request.value,
            request.index,
            data,
            CONTROL_TIMEOUT,
        );
        self.pacer.mark();
        let written = res.map_err(map_error)?;
        if written != data.len() {
            return Err(TransportError::Io(format!(
                "short control write: {} of {} bytes",
                written,
                data.len()
            )));
        }
        Ok(written)
    }

    fn control_read(&mut self, request: ControlRequest, buf: &mut [u8]) -> TransportResult<usize> {
        self.pacer.wait();
        let res = self.handle.read_control(
            request.request_type,
            request.request,
            request.value,
            request.index,
            buf,
            CONTROL_TIMEOUT,
        );
        self.pacer.mark();
        res.map_err(map_error)
    }
}

/// Translate libusb errors into the transport taxonomy
pub fn map_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Nak("control request stalled".to_string()),
        rusb::Error::Access => TransportError::PermissionDenied(err.to_string()),
        rusb::Error::NoDevice | rusb::Error::NotFound => TransportError::NotFound(err.to_string()),
        rusb::Error::Busy => TransportError::Busy(err.to_string()),
        other => TransportError::Io(other.to_string()),
    }
}
