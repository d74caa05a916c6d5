// SPDX-License-Identifier: GPL-3.0-only
//! Monitor identity and live handles

use std::sync::{Arc, Mutex};

use crate::error::{BrightnessError, Result};
use crate::protocols::DisplayProtocol;

pub type DisplayId = String;
pub type ScreenBrightness = u16;

/// Consecutive failed operations before a healthy monitor is marked unreachable
pub const UNREACHABLE_AFTER_FAILURES: u32 = 3;

/// Transport family a monitor is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    DdcCi,
    Usb,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::DdcCi => write!(f, "DDC/CI"),
            TransportKind::Usb => write!(f, "USB"),
        }
    }
}

/// Where the device handle lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceAddress {
    I2c {
        bus: u32,
    },
    Usb {
        vendor_id: u16,
        product_id: u16,
        serial: String,
    },
}

/// Identity of one detected display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorId {
    pub transport: TransportKind,
    pub address: DeviceAddress,
    /// Display name, `None` when the display did not report one
    pub name: Option<String>,
}

impl MonitorId {
    /// Stable string key derived from the address
    ///
    /// The name is left out so a display that failed to answer its
    /// identification query keeps the same key once it does.
    pub fn key(&self) -> DisplayId {
        match &self.address {
            DeviceAddress::I2c { bus } => format!("ddc-{}", bus),
            DeviceAddress::Usb {
                vendor_id,
                product_id,
                serial,
            } if serial.is_empty() => format!("usb-{:04x}-{:04x}", vendor_id, product_id),
            DeviceAddress::Usb {
                vendor_id,
                product_id,
                serial,
            } => format!("usb-{:04x}-{:04x}-{}", vendor_id, product_id, serial),
        }
    }

    /// Name usable for cross-transport matching
    pub fn match_name(&self) -> Option<String> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_lowercase)
    }
}

impl std::fmt::Display for MonitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} {})",
            self.name.as_deref().unwrap_or("Unknown"),
            self.transport,
            self.key()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// Detected but not answering
    Unreachable,
    /// Gone since the last scan
    Disconnected,
}

/// Point-in-time view of a monitor for the front end
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSnapshot {
    pub id: DisplayId,
    pub name: Option<String>,
    pub transport: TransportKind,
    /// Last known brightness, `None` until read once
    pub brightness: Option<ScreenBrightness>,
    pub health: Health,
    pub auto_enabled: bool,
}

#[derive(Debug)]
struct MonitorState {
    id: MonitorId,
    brightness: Option<ScreenBrightness>,
    health: Health,
    failures: u32,
}

type Backend = Arc<tokio::sync::Mutex<Option<Box<dyn DisplayProtocol>>>>;

/// Live handle to one monitor
///
/// Clones share the same adapter and state. The adapter sits behind an
/// exclusive lock so manual and automatic writes never interleave on the
/// wire. Dropping the adapter out of the lock closes the device handle.
#[derive(Clone)]
pub struct Monitor {
    key: DisplayId,
    backend: Backend,
    state: Arc<Mutex<MonitorState>>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Monitor")
            .field("key", &self.key)
            .field("id", &state.id)
            .field("brightness", &state.brightness)
            .field("health", &state.health)
            .finish()
    }
}

impl Monitor {
    pub fn new(
        key: DisplayId,
        id: MonitorId,
        backend: Box<dyn DisplayProtocol>,
        brightness: Option<ScreenBrightness>,
        health: Health,
    ) -> Self {
        Self {
            key,
            backend: Arc::new(tokio::sync::Mutex::new(Some(backend))),
            state: Arc::new(Mutex::new(MonitorState {
                id,
                brightness,
                health,
                failures: 0,
            })),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> MonitorId {
        self.lock_state().id.clone()
    }

    pub fn name(&self) -> Option<String> {
        self.lock_state().id.name.clone()
    }

    pub fn transport(&self) -> TransportKind {
        self.lock_state().id.transport
    }

    pub fn health(&self) -> Health {
        self.lock_state().health
    }

    /// Cached last-known brightness
    pub fn brightness(&self) -> Option<ScreenBrightness> {
        self.lock_state().brightness
    }

    pub fn snapshot(&self, auto_enabled: bool) -> MonitorSnapshot {
        let state = self.lock_state();
        MonitorSnapshot {
            id: self.key.clone(),
            name: state.id.name.clone(),
            transport: state.id.transport,
            brightness: state.brightness,
            health: state.health,
            auto_enabled,
        }
    }

    /// Read brightness from the display and refresh the cache
    pub async fn get_brightness(&self) -> Result<ScreenBrightness> {
        let res = self.run(|display| display.get_brightness()).await;
        if let Ok(value) = res {
            self.lock_state().brightness = Some(value);
        }
        res
    }

    /// Write brightness; the cache follows the hardware
    pub async fn set_brightness(&self, value: ScreenBrightness) -> Result<()> {
        let res = self.run(move |display| display.set_brightness(value)).await;
        self.lock_state().brightness = match res {
            Ok(()) => Some(value),
            // The write may or may not have landed
            Err(_) => None,
        };
        res
    }

    /// Write brightness and confirm it by reading back
    pub async fn set_brightness_confirmed(
        &self,
        value: ScreenBrightness,
    ) -> Result<ScreenBrightness> {
        let res = self
            .run(move |display| display.set_brightness_confirmed(value))
            .await;
        self.lock_state().brightness = res.as_ref().ok().copied();
        res
    }

    /// Run one adapter operation on the blocking pool
    ///
    /// The lock is held for the whole operation, including the adapter's
    /// retry, so a started write always completes before anyone else
    /// touches the device.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn DisplayProtocol) -> Result<T> + Send + 'static,
    {
        let backend = self.backend.clone();
        let key = self.key.clone();
        let res = tokio::task::spawn_blocking(move || {
            let mut guard = backend.blocking_lock();
            match guard.as_mut() {
                Some(display) => op(display.as_mut()),
                None => Err(BrightnessError::Unreachable(key)),
            }
        })
        .await
        .map_err(BrightnessError::from)
        .and_then(|res| res);

        self.record(&res);
        res
    }

    /// Fold an operation outcome into the health state
    fn record<T>(&self, res: &Result<T>) {
        let mut state = self.lock_state();
        match res {
            Ok(_) => {
                if state.health == Health::Unreachable {
                    info!("{} is reachable again", state.id);
                }
                if state.health != Health::Disconnected {
                    state.health = Health::Healthy;
                }
                state.failures = 0;
            }
            // Not a device fault
            Err(BrightnessError::OutOfRange(_)) | Err(BrightnessError::Unreachable(_)) => {}
            Err(e) => {
                state.failures += 1;
                let gone = matches!(e, BrightnessError::NotFound(_));
                if state.health == Health::Healthy
                    && (gone || state.failures >= UNREACHABLE_AFTER_FAILURES)
                {
                    warn!(
                        display_id = %self.key,
                        failures = state.failures,
                        "{} marked unreachable: {}", state.id, e
                    );
                    state.health = Health::Unreachable;
                }
            }
        }
    }

    /// Close the device handle, waiting for an in-flight operation
    pub(crate) async fn close(&self) {
        let old = self.backend.lock().await.take();
        if old.is_some() {
            debug!("Closed handle of {}", self.key);
        }
    }

    /// Close the handle and mark the monitor as gone
    pub(crate) async fn disconnect(&self) {
        self.close().await;
        let mut state = self.lock_state();
        if state.health != Health::Disconnected {
            info!("{} disconnected", state.id);
        }
        state.health = Health::Disconnected;
    }

    /// Install a freshly probed adapter into an existing handle
    pub(crate) async fn attach(
        &self,
        id: MonitorId,
        backend: Box<dyn DisplayProtocol>,
        brightness: Option<ScreenBrightness>,
        health: Health,
    ) {
        *self.backend.lock().await = Some(backend);
        let mut state = self.lock_state();
        state.id = id;
        state.brightness = brightness.or(state.brightness);
        state.health = health;
        state.failures = 0;
    }
}
