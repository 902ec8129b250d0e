// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan control for HP Victus/Omen laptops.
//!
//! The daemon owns the two platform fans exposed by `hp-wmi` through hwmon,
//! runs the Better-Auto thermal controller and answers length-prefixed text
//! commands on a Unix domain socket. The TUI (and any other client) talks to
//! it through [`client::RequestQueue`].

pub mod actuator;
pub mod client;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod hwmon;
pub mod lmsensors;
pub mod mode;
pub mod profile;
pub mod protocol;
pub mod sensors;
pub mod server;
pub mod watchdog;
pub mod writer;

pub use daemon::Daemon;
pub use error::{FanError, Result};
