// SPDX-License-Identifier: GPL-3.0-only
//! Brightness calculation logic
//!
//! Maps the controller's smoothed target onto each monitor's own curve:
//! a per-monitor gamma and a minimum the automatic mode never goes below.

use crate::config::Config;

/// Apply `gamma` to a 0.0-1.0 level and return a percentage
pub fn get_mapped_brightness(level: f32, gamma: f32) -> u16 {
    (level.clamp(0.0, 1.0).powf(gamma) * 100.0).round() as u16
}

/// Handles brightness calculations with gamma correction and minimum brightness
pub struct BrightnessCalculator<'a> {
    config: &'a Config,
}

impl<'a> BrightnessCalculator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Calculate brightness for a specific display
    ///
    /// `target` is the smoothed ambient target (0-100). Returns the value to
    /// write after gamma correction and minimum brightness clamping.
    pub fn calculate_for_display(&self, target: u16, display_id: &str) -> u16 {
        let level = (target as f32 / 100.0).clamp(0.0, 1.0);

        let gamma = self.config.get_gamma_map(display_id);
        let mut mapped = get_mapped_brightness(level, gamma);

        let min_brightness = self.config.get_min_brightness(display_id);
        if mapped < min_brightness {
            trace!(
                display_id = %display_id,
                calculated = %mapped,
                min = %min_brightness,
                "Clamping brightness to minimum"
            );
            mapped = min_brightness;
        }

        mapped
    }
}
