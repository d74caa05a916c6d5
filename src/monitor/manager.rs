// SPDX-License-Identifier: GPL-3.0-only
//! Monitor registry
//!
//! The `DisplayManager` is the only owner of device handles. It scans both
//! transport families, deduplicates the result and hands out [`Monitor`]
//! handles in discovery order.
//!
//! # Rescans
//!
//! A rescan closes every open handle before enumerating again, so a USB
//! interface claimed by the previous session is free for the new probe.
//! Monitors found again keep their [`Monitor`] object (clones held by the
//! controller stay valid) and get the fresh adapter installed. Monitors not
//! found again are marked [`Health::Disconnected`] and stay listed until
//! [`DisplayManager::prune_disconnected`] is called.
//!
//! # Thread Safety
//!
//! The monitor list sits behind a `tokio::sync::RwLock`; the manager is
//! cheap to clone and every clone sees the same list. Scans are serialized.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::config::DuplicatePolicy;

use super::backend::{DisplayId, Health, Monitor};
use super::enumeration::{Candidate, Discovery, deduplicate, enumerate_displays};

#[derive(Clone)]
pub struct DisplayManager {
    displays: Arc<RwLock<Vec<Monitor>>>,
    discovery: Arc<dyn Discovery>,
    policy: DuplicatePolicy,
    retry_delay: Duration,
    scan_lock: Arc<Mutex<()>>,
}

impl DisplayManager {
    pub fn new(discovery: Arc<dyn Discovery>, policy: DuplicatePolicy, retry_delay: Duration) -> Self {
        Self {
            displays: Arc::new(RwLock::new(Vec::new())),
            discovery,
            policy,
            retry_delay,
            scan_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Get a monitor by key
    pub async fn get(&self, id: &str) -> Option<Monitor> {
        let displays = self.displays.read().await;
        displays.iter().find(|m| m.key() == id).cloned()
    }

    /// All known monitors in discovery order
    pub async fn list(&self) -> Vec<Monitor> {
        self.displays.read().await.clone()
    }

    pub async fn get_all_ids(&self) -> Vec<DisplayId> {
        let displays = self.displays.read().await;
        displays.iter().map(|m| m.key().to_string()).collect()
    }

    pub async fn count(&self) -> usize {
        self.displays.read().await.len()
    }

    /// Scan all buses and rebuild the monitor list
    pub async fn rescan(&self) -> Vec<Monitor> {
        let _scan = self.scan_lock.lock().await;

        let previous = self.list().await;
        for monitor in &previous {
            monitor.close().await;
        }

        let (ddc, usb) = enumerate_displays(self.discovery.clone(), self.retry_delay).await;
        let candidates = deduplicate(ddc, usb, self.policy);

        let mut next = Vec::with_capacity(candidates.len());
        let mut seen = HashSet::new();
        for (key, candidate) in assign_keys(candidates) {
            let Candidate {
                id,
                backend,
                brightness,
                health,
            } = candidate;

            let monitor = match previous.iter().find(|m| m.key() == key) {
                Some(existing) => {
                    existing.attach(id, backend, brightness, health).await;
                    existing.clone()
                }
                None => {
                    info!("Display {} added to manager ({})", key, id);
                    Monitor::new(key.clone(), id, backend, brightness, health)
                }
            };
            seen.insert(key);
            next.push(monitor);
        }

        for monitor in previous {
            if !seen.contains(monitor.key()) {
                monitor.disconnect().await;
                next.push(monitor);
            }
        }

        let mut displays = self.displays.write().await;
        *displays = next;
        displays.clone()
    }

    /// Forget monitors that were not found by the last scan
    pub async fn prune_disconnected(&self) -> usize {
        let mut displays = self.displays.write().await;
        let before = displays.len();
        displays.retain(|m| m.health() != Health::Disconnected);
        let removed = before - displays.len();
        if removed > 0 {
            info!("Removed {} disconnected display(s) from manager", removed);
        }
        removed
    }

    /// Close every device handle; the list itself is kept
    pub async fn close_all(&self) {
        for monitor in self.list().await {
            monitor.close().await;
        }
    }
}

/// Give each candidate a unique key, suffixing repeats with `#n`
fn assign_keys(candidates: Vec<Candidate>) -> Vec<(DisplayId, Candidate)> {
    let mut used = HashSet::new();
    candidates
        .into_iter()
        .map(|candidate| {
            let base = candidate.id.key();
            let mut key = base.clone();
            let mut n = 2;
            while !used.insert(key.clone()) {
                key = format!("{}#{}", base, n);
                n += 1;
            }
            (key, candidate)
        })
        .collect()
}
