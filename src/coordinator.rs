// SPDX-License-Identifier: GPL-3.0-only
//! Brightness coordinator
//!
//! The single entry point for front ends. Owns the registry and the
//! controller for one engine session; nothing in the crate keeps global
//! state, so callers hold on to this value.

use std::sync::Arc;

use crate::config::Config;
use crate::controller::{AutoBrightnessController, AutoMode};
use crate::error::{BrightnessError, Result};
use crate::monitor::{
    Discovery, DisplayManager, Health, Monitor, MonitorSnapshot, ScreenBrightness, SystemDiscovery,
};
use crate::protocols::check_range;
use crate::sensor::{LinkState, SensorLink, SerialLink};

/// Engine lifecycle as seen by the front end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    pub running: bool,
    pub sensor: LinkState,
    /// Monitors under automatic control
    pub auto_monitors: usize,
}

pub struct BrightnessCoordinator {
    config: Arc<Config>,
    manager: DisplayManager,
    controller: AutoBrightnessController,
    link: Arc<dyn SensorLink>,
}

impl BrightnessCoordinator {
    pub fn new(config: Config, discovery: Arc<dyn Discovery>, link: Arc<dyn SensorLink>) -> Self {
        let config = Arc::new(config);
        let manager = DisplayManager::new(
            discovery,
            config.registry.duplicate_policy,
            config.registry.retry_delay,
        );
        let controller = AutoBrightnessController::new(config.clone(), manager.clone());

        Self {
            config,
            manager,
            controller,
            link,
        }
    }

    /// Coordinator over the host's buses and the configured serial sensor
    pub fn with_system(config: Config) -> Self {
        let link = SerialLink::new(config.sensor.port.clone(), config.sensor.baud_rate);
        Self::new(config, Arc::new(SystemDiscovery), Arc::new(link))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn snapshot(&self, monitor: &Monitor) -> MonitorSnapshot {
        monitor.snapshot(self.controller.is_enabled(monitor.key()))
    }

    /// Scan all transports again
    ///
    /// Handles from before the scan stay valid; monitors that vanished are
    /// reported as disconnected until the next scan.
    pub async fn rescan(&self) -> Vec<MonitorSnapshot> {
        let monitors = self.manager.rescan().await;
        monitors.iter().map(|m| self.snapshot(m)).collect()
    }

    /// Drop monitors the last scan no longer found
    pub async fn forget_disconnected(&self) -> usize {
        self.manager.prune_disconnected().await
    }

    pub async fn list(&self) -> Vec<MonitorSnapshot> {
        let monitors = self.manager.list().await;
        monitors.iter().map(|m| self.snapshot(m)).collect()
    }

    pub fn auto_mode(&self, id: &str) -> AutoMode {
        self.controller.mode(id)
    }

    async fn lookup(&self, id: &str) -> Result<Monitor> {
        self.manager
            .get(id)
            .await
            .ok_or_else(|| BrightnessError::NotFound(id.to_string()))
    }

    /// Look up a monitor that is expected to answer
    async fn reachable(&self, id: &str) -> Result<Monitor> {
        let monitor = self.lookup(id).await?;
        match monitor.health() {
            Health::Healthy => Ok(monitor),
            Health::Unreachable | Health::Disconnected => {
                Err(BrightnessError::Unreachable(id.to_string()))
            }
        }
    }

    pub async fn get_brightness(&self, id: &str) -> Result<ScreenBrightness> {
        self.reachable(id).await?.get_brightness().await
    }

    pub async fn set_brightness(&self, id: &str, value: ScreenBrightness) -> Result<()> {
        let value = check_range(value)?;
        let monitor = self.reachable(id).await?;
        monitor.set_brightness(value).await?;
        self.controller.note_manual(id, value);
        Ok(())
    }

    /// Set brightness and read it back; returns what the display reports
    pub async fn set_brightness_confirmed(
        &self,
        id: &str,
        value: ScreenBrightness,
    ) -> Result<ScreenBrightness> {
        let value = check_range(value)?;
        let monitor = self.reachable(id).await?;
        let actual = monitor.set_brightness_confirmed(value).await?;
        self.controller.note_manual(id, actual);
        Ok(actual)
    }

    /// Put a monitor under automatic control
    ///
    /// Allowed while the monitor is unreachable: the controller keeps
    /// trying at the degraded rate. Refused once the running engine gave up
    /// on the sensor.
    pub async fn enable_auto(&self, id: &str) -> Result<()> {
        let monitor = self.lookup(id).await?;
        if monitor.health() == Health::Disconnected {
            return Err(BrightnessError::Unreachable(id.to_string()));
        }
        if self.controller.link_state().await == LinkState::Exhausted {
            return Err(BrightnessError::Disconnected(self.link.describe()));
        }
        self.controller.enable(id, monitor.brightness());
        Ok(())
    }

    pub async fn disable_auto(&self, id: &str) -> Result<()> {
        self.lookup(id).await?;
        self.controller.disable(id).await;
        Ok(())
    }

    pub async fn start_engine(&self) -> Result<()> {
        self.controller.start(self.link.clone()).await
    }

    pub async fn stop_engine(&self) -> Result<()> {
        self.controller.stop().await
    }

    pub async fn engine_status(&self) -> EngineStatus {
        EngineStatus {
            running: self.controller.is_running().await,
            sensor: self.controller.link_state().await,
            auto_monitors: self.controller.enabled_count(),
        }
    }

    /// Stop the engine if needed and close every device handle
    pub async fn shutdown(&self) {
        if self.controller.is_running().await {
            if let Err(e) = self.stop_engine().await {
                error!("can't stop engine: {}", e);
            }
        }
        self.manager.close_all().await;
    }
}
