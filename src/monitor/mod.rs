// SPDX-License-Identifier: GPL-3.0-only
//! Monitor abstraction: identity, live handles, discovery and the registry

mod backend;
mod enumeration;
mod manager;

pub use backend::{
    DeviceAddress, DisplayId, Health, Monitor, MonitorId, MonitorSnapshot, ScreenBrightness,
    TransportKind, UNREACHABLE_AFTER_FAILURES,
};
pub use enumeration::{Candidate, Discovery, SystemDiscovery, deduplicate, probe, probe_all};
pub use manager::DisplayManager;
