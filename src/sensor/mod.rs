// SPDX-License-Identifier: GPL-3.0-only
//! Ambient light sensor input

pub mod backoff;
pub mod frame;
pub mod link;
pub mod reader;

pub use link::{SensorLink, SensorStream, SerialLink};
pub use reader::{BrightnessSample, LinkState, SensorEvent, SensorReader};
