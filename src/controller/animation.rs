// SPDX-License-Identifier: GPL-3.0-only
//! Brightness transitions
//!
//! Splits one change into a few intermediate writes. The number of steps is
//! bounded by the configured step count, by the distance itself (no step
//! smaller than 1%) and by how many writes the rate limit allows within the
//! transition time.

use std::time::Duration;

use crate::config::ControllerConfig;

/// Planned transition: values to write and the pause between two of them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub steps: Vec<u16>,
    pub interval: Duration,
}

pub fn plan_transition(from: Option<u16>, to: u16, config: &ControllerConfig) -> Transition {
    let single = Transition {
        steps: vec![to],
        interval: Duration::ZERO,
    };

    let Some(from) = from else {
        return single;
    };
    if !config.animation || from == to {
        return single;
    }

    let distance = from.abs_diff(to) as u32;
    let by_rate = if config.min_write_interval.is_zero() {
        u32::MAX
    } else {
        (config.animation_duration.as_millis() / config.min_write_interval.as_millis()).max(1)
            as u32
    };
    let count = (config.animation_steps as u32)
        .min(distance)
        .min(by_rate)
        .max(1);

    if count == 1 {
        return single;
    }

    let steps = (1..=count)
        .map(|i| {
            let offset = (distance * i + count / 2) / count;
            if to > from {
                from + offset as u16
            } else {
                from - offset as u16
            }
        })
        .collect();

    Transition {
        steps,
        interval: (config.animation_duration / count).max(config.min_write_interval),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(steps: u16, duration_ms: u64, interval_ms: u64) -> ControllerConfig {
        ControllerConfig {
            animation: true,
            animation_steps: steps,
            animation_duration: Duration::from_millis(duration_ms),
            min_write_interval: Duration::from_millis(interval_ms),
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn test_steps_reach_target() {
        let t = plan_transition(Some(20), 60, &config(4, 800, 200));
        assert_eq!(t.steps, vec![30, 40, 50, 60]);
        assert_eq!(t.interval, Duration::from_millis(200));

        let t = plan_transition(Some(60), 20, &config(4, 800, 200));
        assert_eq!(t.steps, vec![50, 40, 30, 20]);
    }

    #[test]
    fn test_rate_limit_bounds_step_count() {
        let t = plan_transition(Some(0), 100, &config(10, 800, 400));
        assert_eq!(t.steps, vec![50, 100]);
        assert_eq!(t.interval, Duration::from_millis(400));
    }

    #[test]
    fn test_small_change_is_one_write_per_percent() {
        let t = plan_transition(Some(50), 52, &config(4, 800, 200));
        assert_eq!(t.steps, vec![51, 52]);
    }

    #[test]
    fn test_jump_when_disabled_or_unknown() {
        let mut c = config(4, 800, 200);
        assert_eq!(plan_transition(None, 70, &c).steps, vec![70]);
        c.animation = false;
        assert_eq!(plan_transition(Some(10), 70, &c).steps, vec![70]);
    }
}
