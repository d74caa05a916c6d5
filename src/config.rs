// SPDX-License-Identifier: GPL-3.0-only
//! Engine configuration
//!
//! Everything the engine consumes at construction: controller tuning, sensor
//! link parameters, registry policy and per-monitor overrides. Stored as TOML
//! under the user config directory; durations are written as milliseconds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BrightnessError, Result};
use crate::monitor::DisplayId;

pub const APP_DIR: &str = "brightify";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerConfig,
    pub sensor: SensorConfig,
    pub registry: RegistryConfig,
    pub monitors: HashMap<DisplayId, MonitorConfig>,
}

/// Auto-brightness control loop tuning
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// EMA weight of the newest sample (0 < factor <= 1)
    pub smoothing_factor: f32,
    /// Minimum change in percent before a write is issued
    pub deadband: u16,
    /// Minimum time between two writes to the same monitor
    #[serde(with = "millis")]
    pub min_write_interval: Duration,
    /// Step through intermediate values instead of jumping
    pub animation: bool,
    #[serde(with = "millis")]
    pub animation_duration: Duration,
    /// Upper bound on writes issued by one transition
    pub animation_steps: u16,
    /// Consecutive failed writes before a monitor is considered degraded
    pub degraded_after_failures: u32,
    /// Write interval multiplier while degraded
    pub degraded_interval_factor: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.3,
            deadband: 2,
            min_write_interval: Duration::from_millis(200),
            animation: true,
            animation_duration: Duration::from_millis(800),
            animation_steps: 4,
            degraded_after_failures: 3,
            degraded_interval_factor: 4,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            return Err(BrightnessError::Config(format!(
                "smoothing_factor must be in (0, 1], got {}",
                self.smoothing_factor
            )));
        }
        if self.deadband > 100 {
            return Err(BrightnessError::Config(format!(
                "deadband must be at most 100, got {}",
                self.deadband
            )));
        }
        if self.degraded_interval_factor == 0 {
            return Err(BrightnessError::Config(
                "degraded_interval_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Linear calibration from raw sensor units to brightness percent
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SensorCalibration {
    pub scale: f32,
    pub offset: f32,
}

impl Default for SensorCalibration {
    fn default() -> Self {
        // The stock sensor firmware reports half-percent steps
        Self { scale: 2.0, offset: 0.0 }
    }
}

impl SensorCalibration {
    /// Map a raw reading onto 0..=100
    pub fn to_percent(&self, raw: u32) -> u16 {
        let value = raw as f32 * self.scale + self.offset;
        value.round().clamp(0.0, 100.0) as u16
    }
}

/// Ambient light sensor serial link
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SensorConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout used only to detect a silent link
    #[serde(with = "millis")]
    pub read_timeout: Duration,
    /// Consecutive read timeouts before the link is declared lost
    pub disconnect_threshold: u32,
    #[serde(with = "millis")]
    pub backoff_initial: Duration,
    #[serde(with = "millis")]
    pub backoff_max: Duration,
    /// Give up reconnecting after this long without a connection
    #[serde(with = "millis")]
    pub reconnect_window: Duration,
    /// Samples buffered for the controller before the oldest is dropped
    pub sample_buffer: usize,
    pub calibration: SensorCalibration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_millis(1000),
            disconnect_threshold: 3,
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            reconnect_window: Duration::from_secs(300),
            sample_buffer: 8,
            calibration: SensorCalibration::default(),
        }
    }
}

/// How same-named monitors found on different transports are merged
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// A named USB monitor replaces every DDC/CI monitor with the same name
    #[default]
    PreferUsb,
    /// Keep every candidate as its own monitor
    KeepAll,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub duplicate_policy: DuplicatePolicy,
    /// Pause before the adapter retries a timed out or rejected transaction
    #[serde(with = "millis")]
    pub retry_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::default(),
            // DDC/CI requires 40ms between commands, keep some margin
            retry_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MonitorConfig {
    pub gamma_map: f32,
    /// Minimum brightness percentage (0-100) that auto mode will send
    #[serde(default)]
    pub min_brightness: u16,
    /// Enable auto mode for this monitor when the daemon starts
    #[serde(default)]
    pub auto_enabled: bool,
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self {
            gamma_map: 1.,
            min_brightness: 0,
            auto_enabled: false,
        }
    }

    pub fn validate(&self, id: &str) -> Result<()> {
        if !(self.gamma_map.is_finite() && self.gamma_map > 0.0) {
            return Err(BrightnessError::Config(format!(
                "{}: gamma_map must be a positive number, got {}",
                id, self.gamma_map
            )));
        }
        if self.min_brightness > 100 {
            return Err(BrightnessError::Config(format!(
                "{}: min_brightness must be at most 100, got {}",
                id, self.min_brightness
            )));
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn get_gamma_map(&self, id: &str) -> f32 {
        self.monitors
            .get(id)
            .map(|m| m.gamma_map)
            .unwrap_or_else(|| default_gamma(id))
    }

    pub fn get_min_brightness(&self, id: &str) -> u16 {
        self.monitors
            .get(id)
            .map(|m| m.min_brightness.min(100))
            .unwrap_or(0)
    }

    pub fn is_auto_enabled(&self, id: &str) -> bool {
        self.monitors.get(id).is_some_and(|m| m.auto_enabled)
    }

    /// Default location: `$XDG_CONFIG_HOME/brightify/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| BrightnessError::Config(e.to_string()))?;
        config.controller.validate()?;
        for (id, monitor) in &config.monitors {
            monitor.validate(id)?;
        }
        Ok(config)
    }

    /// Read the config file, falling back to defaults on any problem
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                return Self::default();
            }
            Err(e) => {
                error!("can't read config {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match Self::from_toml(&text) {
            Ok(config) => config,
            Err(e) => {
                error!("errors loading config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text =
            toml::to_string_pretty(self).map_err(|e| BrightnessError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BrightnessError::Io(e.to_string()))?;
        }
        std::fs::write(path, text).map_err(|e| BrightnessError::Io(e.to_string()))
    }
}

/// Per-model gamma for USB monitors, linear for everything else
fn default_gamma(id: &str) -> f32 {
    let mut parts = id.split('-');
    let (Some("usb"), Some(vendor), Some(product)) = (parts.next(), parts.next(), parts.next())
    else {
        return 1.0;
    };

    match (
        u16::from_str_radix(vendor, 16),
        u16::from_str_radix(product, 16),
    ) {
        (Ok(vendor_id), Ok(product_id)) => crate::devices::get_device_spec(vendor_id, product_id)
            .map(|spec| spec.default_gamma)
            .unwrap_or(1.0),
        _ => 1.0,
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
