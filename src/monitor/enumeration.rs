// SPDX-License-Identifier: GPL-3.0-only
//! Display discovery, probing and cross-transport deduplication

use std::sync::Arc;
use std::time::Duration;

use crate::config::DuplicatePolicy;
use crate::devices;
use crate::protocols::DisplayProtocol;
use crate::protocols::ddc_ci::DdcCiDisplay;
use crate::protocols::usb_vendor::UsbVendorDisplay;
use crate::transport::i2c::LinuxI2c;
use crate::transport::usb::RusbDevice;

use super::backend::{Health, MonitorId, ScreenBrightness, TransportKind};

/// Pause before a display that failed its first probe is asked again
///
/// Some monitors need a moment after hotplug or wake-up before DDC/CI
/// answers.
pub const PROBE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Source of unprobed adapters, one per detected device
///
/// Both calls block and open device handles; they run on the blocking pool.
pub trait Discovery: Send + Sync {
    fn ddc_candidates(&self, retry_delay: Duration) -> Vec<Box<dyn DisplayProtocol>>;

    fn usb_candidates(&self, retry_delay: Duration) -> Vec<Box<dyn DisplayProtocol>>;
}

/// Discovery over the host's i2c-dev buses and USB devices
#[derive(Debug, Default)]
pub struct SystemDiscovery;

impl Discovery for SystemDiscovery {
    fn ddc_candidates(&self, retry_delay: Duration) -> Vec<Box<dyn DisplayProtocol>> {
        let mut candidates: Vec<Box<dyn DisplayProtocol>> = Vec::new();

        for bus in LinuxI2c::enumerate_buses() {
            if !LinuxI2c::has_edid(bus) {
                trace!("No display on i2c-{}", bus);
                continue;
            }
            match LinuxI2c::open(bus) {
                Ok(i2c) => {
                    debug!("Display EDID found on i2c-{}", bus);
                    candidates.push(Box::new(DdcCiDisplay::new(i2c, retry_delay)));
                }
                Err(e) => debug!("can't open i2c-{}: {}", bus, e),
            }
        }

        info!("Found {} DDC/CI display(s)", candidates.len());
        candidates
    }

    fn usb_candidates(&self, retry_delay: Duration) -> Vec<Box<dyn DisplayProtocol>> {
        let mut candidates: Vec<Box<dyn DisplayProtocol>> = Vec::new();

        for (device, info) in RusbDevice::enumerate() {
            let Some(strategy) = devices::get_strategy(info.vendor_id, info.product_id) else {
                continue;
            };
            let spec = strategy.spec();

            match RusbDevice::open(&device, spec.interface, spec.settle_delay) {
                Ok(usb) => {
                    info!(
                        protocol = ?spec.protocol,
                        "Found {} at USB {:03}:{:03}",
                        spec.name, info.bus, info.address
                    );
                    candidates.push(Box::new(UsbVendorDisplay::new(usb, strategy, retry_delay)));
                }
                Err(e) => {
                    warn!(
                        "can't open {} ({:04x}:{:04x}): {}",
                        spec.name, info.vendor_id, info.product_id, e
                    );
                }
            }
        }

        info!("Found {} USB display(s)", candidates.len());
        candidates
    }
}

/// A probed adapter waiting for its place in the registry
pub struct Candidate {
    pub id: MonitorId,
    pub backend: Box<dyn DisplayProtocol>,
    pub brightness: Option<ScreenBrightness>,
    pub health: Health,
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.id)
            .field("brightness", &self.brightness)
            .field("health", &self.health)
            .finish()
    }
}

/// Probe one adapter; a display that never answers is still returned
pub fn probe(mut backend: Box<dyn DisplayProtocol>) -> Candidate {
    let mut res = backend.probe();
    if res.is_err() {
        std::thread::sleep(PROBE_RETRY_DELAY);
        res = backend.probe();
    }

    match res {
        Ok(info) => {
            let id = MonitorId {
                transport: backend.transport(),
                address: backend.address(),
                name: info.name,
            };
            if info.brightness == 0 {
                // Common with portable monitors that ignore DDC/CI
                warn!(display_id = %id.key(), "{} reports 0% brightness", id);
            }
            Candidate {
                id,
                backend,
                brightness: Some(info.brightness),
                health: Health::Healthy,
            }
        }
        Err(e) => {
            let id = MonitorId {
                transport: backend.transport(),
                address: backend.address(),
                name: backend.name(),
            };
            error!(display_id = %id.key(), error = %e, "{} does not respond", id);
            Candidate {
                id,
                backend,
                brightness: None,
                health: Health::Unreachable,
            }
        }
    }
}

/// Probe a whole family, one device after the other
///
/// Devices of one family may share a bus, so they are never probed in
/// parallel.
pub fn probe_all(backends: Vec<Box<dyn DisplayProtocol>>) -> Vec<Candidate> {
    backends.into_iter().map(probe).collect()
}

/// Discover and probe all displays
///
/// DDC/CI and USB do not share hardware, so both families are probed
/// concurrently.
pub async fn enumerate_displays(
    discovery: Arc<dyn Discovery>,
    retry_delay: Duration,
) -> (Vec<Candidate>, Vec<Candidate>) {
    info!("=== START ENUMERATE ===");

    let ddc = {
        let discovery = discovery.clone();
        tokio::task::spawn_blocking(move || probe_all(discovery.ddc_candidates(retry_delay)))
    };
    let usb = tokio::task::spawn_blocking(move || probe_all(discovery.usb_candidates(retry_delay)));

    let (ddc, usb) = tokio::join!(ddc, usb);
    let ddc = ddc.unwrap_or_else(|e| {
        error!("DDC/CI enumeration task failed: {e}");
        Vec::new()
    });
    let usb = usb.unwrap_or_else(|e| {
        error!("USB enumeration task failed: {e}");
        Vec::new()
    });

    info!(
        "=== END ENUMERATE: {} DDC/CI, {} USB ===",
        ddc.len(),
        usb.len()
    );
    (ddc, usb)
}

/// Merge DDC/CI and USB candidates into one list
///
/// Under [`DuplicatePolicy::PreferUsb`] a USB candidate with a known name
/// takes the slot of the first DDC/CI candidate of the same name and every
/// other DDC/CI candidate of that name is dropped. Candidates without a
/// name are always kept. The result keeps discovery order.
pub fn deduplicate(
    ddc: Vec<Candidate>,
    usb: Vec<Candidate>,
    policy: DuplicatePolicy,
) -> Vec<Candidate> {
    let mut merged: Vec<Option<Candidate>> = ddc.into_iter().map(Some).collect();

    for candidate in usb {
        let name = match (policy, candidate.id.match_name()) {
            (DuplicatePolicy::PreferUsb, Some(name)) => name,
            _ => {
                merged.push(Some(candidate));
                continue;
            }
        };

        let mut slot = None;
        for (i, entry) in merged.iter_mut().enumerate() {
            let same = entry.as_ref().is_some_and(|c| {
                c.id.transport == TransportKind::DdcCi
                    && c.id.match_name().as_deref() == Some(name.as_str())
            });
            if !same {
                continue;
            }
            if let Some(replaced) = entry.take() {
                info!("{} replaced by {}", replaced.id, candidate.id);
            }
            if slot.is_none() {
                slot = Some(i);
            }
        }

        match slot {
            Some(i) => merged[i] = Some(candidate),
            None => merged.push(Some(candidate)),
        }
    }

    merged.into_iter().flatten().collect()
}
