// SPDX-License-Identifier: GPL-3.0-only
//! Monitor brightness engine
//!
//! Finds external monitors on DDC/CI buses and on USB, drives their
//! brightness manually or from an ambient light sensor, and exposes all of
//! it through [`BrightnessCoordinator`].

#[macro_use]
extern crate tracing;

pub mod brightness;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod devices;
pub mod error;
pub mod monitor;
pub mod protocols;
pub mod sensor;
pub mod transport;

pub use config::Config;
pub use coordinator::{BrightnessCoordinator, EngineStatus};
pub use error::{BrightnessError, Result};
