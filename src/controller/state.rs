// SPDX-License-Identifier: GPL-3.0-only
//! Control decisions of the auto-brightness loop
//!
//! Everything here is synchronous and clock-free: callers pass `now`. The
//! async loop in the parent module owns the timers and the I/O.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::brightness::BrightnessCalculator;
use crate::config::Config;
use crate::error::BrightnessError;
use crate::monitor::DisplayId;

/// Automatic mode of one monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoMode {
    Disabled,
    Enabled,
    /// Writes keep failing; still driven, at a reduced rate
    Degraded,
}

impl AutoMode {
    pub fn is_active(self) -> bool {
        !matches!(self, AutoMode::Disabled)
    }
}

/// Exponential moving average over sample targets
#[derive(Debug, Clone)]
pub struct Smoother {
    factor: f32,
    value: Option<f32>,
}

impl Smoother {
    pub fn new(factor: f32) -> Self {
        Self {
            factor: factor.clamp(f32::EPSILON, 1.0),
            value: None,
        }
    }

    /// Fold in a new target and return the smoothed value
    pub fn update(&mut self, target: u16) -> u16 {
        let target = target.min(100) as f32;
        let next = match self.value {
            Some(prev) => prev + self.factor * (target - prev),
            None => target,
        };
        self.value = Some(next);
        next.round() as u16
    }

    pub fn value(&self) -> Option<u16> {
        self.value.map(|v| v.round() as u16)
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Per-monitor control record
#[derive(Debug, Clone)]
pub struct MonitorControl {
    pub key: DisplayId,
    pub mode: AutoMode,
    /// Last value known to be on the display
    pub last_applied: Option<u16>,
    /// Start of the last write, successful or not
    pub last_write: Option<Instant>,
    /// Consecutive failed writes
    pub failures: u32,
    /// A write or transition is running for this monitor
    pub busy: bool,
}

/// A write the loop should start now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    pub key: DisplayId,
    pub from: Option<u16>,
    pub to: u16,
}

pub struct ControlState {
    config: Arc<Config>,
    smoother: Smoother,
    /// Latest smoothed target, `None` before the first sample
    target: Option<u16>,
    /// Sensor link is down; hold every monitor where it is
    paused: bool,
    monitors: Vec<MonitorControl>,
}

impl ControlState {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            smoother: Smoother::new(config.controller.smoothing_factor),
            config,
            target: None,
            paused: false,
            monitors: Vec::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&MonitorControl> {
        self.monitors.iter().find(|m| m.key == key)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut MonitorControl> {
        self.monitors.iter_mut().find(|m| m.key == key)
    }

    pub fn mode(&self, key: &str) -> AutoMode {
        self.get(key).map(|m| m.mode).unwrap_or(AutoMode::Disabled)
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.mode(key).is_active()
    }

    pub fn active_count(&self) -> usize {
        self.monitors.iter().filter(|m| m.mode.is_active()).count()
    }

    pub fn monitor(&self, key: &str) -> Option<&MonitorControl> {
        self.get(key)
    }

    /// Start driving a monitor; `current` seeds the deadband comparison
    pub fn enable(&mut self, key: &str, current: Option<u16>) {
        match self.get_mut(key) {
            Some(m) if m.mode.is_active() => {}
            Some(m) => {
                m.mode = AutoMode::Enabled;
                m.last_applied = current.or(m.last_applied);
                m.failures = 0;
            }
            None => self.monitors.push(MonitorControl {
                key: key.to_string(),
                mode: AutoMode::Enabled,
                last_applied: current,
                last_write: None,
                failures: 0,
                busy: false,
            }),
        }
    }

    /// Stop driving a monitor; returns whether it was driven
    pub fn disable(&mut self, key: &str) -> bool {
        match self.get_mut(key) {
            Some(m) if m.mode.is_active() => {
                m.mode = AutoMode::Disabled;
                true
            }
            _ => false,
        }
    }

    /// Forget the previous session's targets
    pub fn reset_session(&mut self) {
        self.smoother.reset();
        self.target = None;
        self.paused = false;
        for m in &mut self.monitors {
            m.busy = false;
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Feed one sample target, returns the new smoothed target
    pub fn on_sample(&mut self, target: u16) -> u16 {
        let smoothed = self.smoother.update(target);
        self.target = Some(smoothed);
        smoothed
    }

    /// Smoothed target mapped onto one monitor's curve
    pub fn desired(&self, key: &str) -> Option<u16> {
        let target = self.target?;
        Some(BrightnessCalculator::new(&self.config).calculate_for_display(target, key))
    }

    fn interval(&self, mode: AutoMode) -> Duration {
        let base = self.config.controller.min_write_interval;
        match mode {
            AutoMode::Degraded => base.saturating_mul(self.config.controller.degraded_interval_factor),
            _ => base,
        }
    }

    /// Whether `m` is off target by at least the deadband
    fn wants_write(&self, m: &MonitorControl, desired: u16) -> bool {
        match m.last_applied {
            Some(applied) => applied.abs_diff(desired) >= self.config.controller.deadband,
            None => true,
        }
    }

    /// Writes that may start at `now`; the chosen monitors are marked busy
    ///
    /// A monitor off target but inside its rate limit is skipped, not
    /// dropped: [`ControlState::next_deadline`] reports when to ask again.
    pub fn due_writes(&mut self, now: Instant) -> Vec<WritePlan> {
        if self.paused || self.target.is_none() {
            return Vec::new();
        }

        let mut plans = Vec::new();
        for i in 0..self.monitors.len() {
            let m = &self.monitors[i];
            if !m.mode.is_active() || m.busy {
                continue;
            }
            let Some(desired) = self.desired(&m.key) else {
                continue;
            };
            if !self.wants_write(m, desired) {
                continue;
            }
            if let Some(last) = m.last_write {
                if now < last + self.interval(m.mode) {
                    continue;
                }
            }

            let m = &mut self.monitors[i];
            m.busy = true;
            m.last_write = Some(now);
            plans.push(WritePlan {
                key: m.key.clone(),
                from: m.last_applied,
                to: desired,
            });
        }
        plans
    }

    /// Earliest instant a deferred write becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.paused {
            return None;
        }

        self.monitors
            .iter()
            .filter(|m| m.mode.is_active() && !m.busy)
            .filter(|m| {
                self.desired(&m.key)
                    .is_some_and(|desired| self.wants_write(m, desired))
            })
            .filter_map(|m| m.last_write.map(|last| last + self.interval(m.mode)))
            .min()
    }

    /// A write (or transition step) landed
    pub fn record_applied(&mut self, key: &str, value: u16, at: Instant) {
        let Some(m) = self.get_mut(key) else {
            return;
        };
        m.last_applied = Some(value);
        m.last_write = Some(at);
        m.failures = 0;
        if m.mode == AutoMode::Degraded {
            info!("{} recovered, leaving degraded mode", key);
            m.mode = AutoMode::Enabled;
        }
    }

    /// A write failed after the adapter's own retry
    pub fn record_failure(&mut self, key: &str, err: &BrightnessError) {
        let threshold = self.config.controller.degraded_after_failures;
        let Some(m) = self.get_mut(key) else {
            return;
        };
        m.failures += 1;
        if m.mode == AutoMode::Enabled && m.failures >= threshold {
            warn!(
                display_id = %key,
                failures = m.failures,
                "Auto brightness degraded: {}", err
            );
            m.mode = AutoMode::Degraded;
        } else {
            debug!("Auto write to {} failed ({}): {}", key, m.failures, err);
        }
    }

    /// The monitor's write or transition ended
    pub fn finish(&mut self, key: &str) {
        if let Some(m) = self.get_mut(key) {
            m.busy = false;
        }
    }

    /// A manual write moved the display
    pub fn note_manual(&mut self, key: &str, value: u16) {
        if let Some(m) = self.get_mut(key) {
            m.last_applied = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControllerConfig, MonitorConfig};

    fn state(controller: ControllerConfig) -> ControlState {
        ControlState::new(Arc::new(Config {
            controller,
            ..Config::default()
        }))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_smoother_follows_gradually() {
        let mut smoother = Smoother::new(0.5);
        assert_eq!(smoother.update(40), 40);
        assert_eq!(smoother.update(80), 60);
        assert_eq!(smoother.update(80), 70);
        smoother.reset();
        assert_eq!(smoother.value(), None);
    }

    #[test]
    fn test_single_spike_is_damped() {
        let mut smoother = Smoother::new(0.3);
        smoother.update(50);
        assert_eq!(smoother.update(100), 65);
    }

    #[test]
    fn test_deadband_suppresses_jitter() {
        let mut s = state(ControllerConfig::default());
        let t0 = Instant::now();
        s.enable("ddc-1", None);

        s.on_sample(50);
        let plans = s.due_writes(t0);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].to, 50);
        s.record_applied("ddc-1", 50, t0);
        s.finish("ddc-1");

        let mut writes = 0;
        for (i, target) in [51, 49, 51, 50, 49, 51, 50].into_iter().enumerate() {
            s.on_sample(target);
            writes += s.due_writes(t0 + ms(1000 * (i as u64 + 1))).len();
        }
        assert_eq!(writes, 0);
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn test_rate_limited_write_is_deferred() {
        let mut s = state(ControllerConfig {
            smoothing_factor: 1.0,
            min_write_interval: ms(500),
            ..ControllerConfig::default()
        });
        let t0 = Instant::now();
        s.enable("ddc-1", Some(0));

        s.on_sample(30);
        assert_eq!(s.due_writes(t0).len(), 1);
        s.record_applied("ddc-1", 30, t0);
        s.finish("ddc-1");

        s.on_sample(60);
        assert!(s.due_writes(t0 + ms(100)).is_empty());
        assert_eq!(s.next_deadline(), Some(t0 + ms(500)));

        let plans = s.due_writes(t0 + ms(500));
        assert_eq!(
            plans,
            vec![WritePlan {
                key: "ddc-1".to_string(),
                from: Some(30),
                to: 60
            }]
        );
    }

    #[test]
    fn test_busy_monitor_is_not_planned_twice() {
        let mut s = state(ControllerConfig::default());
        let t0 = Instant::now();
        s.enable("ddc-1", None);
        s.on_sample(70);
        assert_eq!(s.due_writes(t0).len(), 1);
        assert!(s.due_writes(t0 + ms(10_000)).is_empty());
    }

    #[test]
    fn test_disabled_monitor_gets_no_plans() {
        let mut s = state(ControllerConfig::default());
        s.enable("ddc-1", None);
        assert!(s.disable("ddc-1"));
        assert!(!s.disable("ddc-1"));
        s.on_sample(70);
        assert!(s.due_writes(Instant::now()).is_empty());
        assert_eq!(s.mode("ddc-1"), AutoMode::Disabled);
    }

    #[test]
    fn test_repeated_failures_degrade_then_recover() {
        let mut s = state(ControllerConfig {
            min_write_interval: ms(100),
            degraded_after_failures: 3,
            degraded_interval_factor: 4,
            ..ControllerConfig::default()
        });
        let t0 = Instant::now();
        s.enable("usb-1", Some(10));
        s.on_sample(80);

        let mut now = t0;
        for _ in 0..3 {
            assert_eq!(s.due_writes(now).len(), 1);
            s.record_failure("usb-1", &BrightnessError::Timeout);
            s.finish("usb-1");
            now += ms(100);
        }
        assert_eq!(s.mode("usb-1"), AutoMode::Degraded);
        assert_eq!(s.monitor("usb-1").unwrap().last_applied, Some(10));

        // Degraded writes come at a quarter of the rate
        let last = now - ms(100);
        assert_eq!(s.next_deadline(), Some(last + ms(400)));
        assert!(s.due_writes(last + ms(200)).is_empty());
        assert_eq!(s.due_writes(last + ms(400)).len(), 1);

        s.record_applied("usb-1", 80, last + ms(400));
        assert_eq!(s.mode("usb-1"), AutoMode::Enabled);
    }

    #[test]
    fn test_pause_holds_writes() {
        let mut s = state(ControllerConfig::default());
        s.enable("ddc-1", None);
        s.on_sample(40);
        s.set_paused(true);
        assert!(s.due_writes(Instant::now()).is_empty());
        s.set_paused(false);
        assert_eq!(s.due_writes(Instant::now()).len(), 1);
    }

    #[test]
    fn test_per_monitor_mapping() {
        let mut config = Config::default();
        config.controller.smoothing_factor = 1.0;
        config.monitors.insert(
            "ddc-2".to_string(),
            MonitorConfig {
                min_brightness: 30,
                ..MonitorConfig::new()
            },
        );
        let mut s = ControlState::new(Arc::new(config));
        s.enable("ddc-1", None);
        s.enable("ddc-2", None);
        s.on_sample(10);

        let plans = s.due_writes(Instant::now());
        let targets: Vec<_> = plans.iter().map(|p| (p.key.as_str(), p.to)).collect();
        assert_eq!(targets, vec![("ddc-1", 10), ("ddc-2", 30)]);
    }
}
