// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan speed actuation.
//!
//! Turns requested RPM values into hardware writes: clamps to each fan's
//! ceiling, remembers what was commanded for the watchdog, and spaces a fan 2
//! write at least `fan_apply_gap` after the last fan 1 write because the EC
//! drops back-to-back updates.

use crate::config::ControlConfig;
use crate::controller;
use crate::error::{FanError, Result};
use crate::hwmon::{SensorLocator, read_trimmed};
use crate::mode::FanId;
use crate::writer::HardwareWriter;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

pub struct FanActuator {
    locator: Arc<SensorLocator>,
    writer: Arc<dyn HardwareWriter>,
    min_rpm: u32,
    fallback_max: [u32; 2],
    apply_gap: Duration,
    max_rpm: [OnceLock<u32>; 2],
    /// Last commanded value per fan, as sent to the hardware.
    last_commanded: Mutex<[Option<String>; 2]>,
    /// When each fan was last written. Held across the fan 2 wait.
    last_apply: Mutex<[Option<Instant>; 2]>,
}

impl FanActuator {
    pub fn new(
        locator: Arc<SensorLocator>,
        writer: Arc<dyn HardwareWriter>,
        control: &ControlConfig,
    ) -> Self {
        Self {
            locator,
            writer,
            min_rpm: control.min_rpm,
            fallback_max: control.fallback_max_rpm,
            apply_gap: control.timings().fan_apply_gap,
            max_rpm: [OnceLock::new(), OnceLock::new()],
            last_commanded: Mutex::new([None, None]),
            last_apply: Mutex::new([None, None]),
        }
    }

    pub fn writer(&self) -> &dyn HardwareWriter {
        self.writer.as_ref()
    }

    pub fn hwmon_dir(&self) -> Result<&Path> {
        self.locator
            .locate_fan_hwmon_dir()
            .ok_or(FanError::HwmonNotFound)
    }

    /// Ceiling for `fan`: `fanN_max` when it holds a positive number,
    /// otherwise the configured fallback. Read once per process.
    pub fn max_rpm(&self, fan: FanId) -> u32 {
        *self.max_rpm[fan.index()].get_or_init(|| {
            let reported = self
                .locator
                .locate_fan_hwmon_dir()
                .and_then(|dir| read_trimmed(&dir.join(format!("fan{}_max", fan.number()))))
                .and_then(|s| s.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .and_then(|v| u32::try_from(v).ok());

            match reported {
                Some(max) => {
                    log::info!("Fan {fan} maximum: {max} RPM");
                    max
                }
                None => {
                    let max = self.fallback_max[fan.index()];
                    log::info!("Fan {fan} maximum not reported, using {max} RPM");
                    max
                }
            }
        })
    }

    /// Clamp into `[0, max_rpm(fan)]`.
    pub fn clamp(&self, fan: FanId, rpm: i64) -> u32 {
        let max = self.max_rpm(fan);
        rpm.clamp(0, i64::from(max)) as u32
    }

    /// Per-fan RPM for a Better-Auto level.
    pub fn rpm_for_level(&self, level: u8) -> [u32; 2] {
        FanId::BOTH.map(|fan| controller::rpm_for_level(level, self.min_rpm, self.max_rpm(fan)))
    }

    /// Write a speed to one fan and return the value actually sent.
    ///
    /// Unparsable input is forwarded as-is without clamping.
    pub fn apply(&self, fan: FanId, requested: &str, update_cache: bool) -> Result<String> {
        let hwmon_dir = self.hwmon_dir()?;

        let value = match requested.trim().parse::<i64>() {
            Ok(rpm) => {
                let clamped = self.clamp(fan, rpm);
                if i64::from(clamped) != rpm {
                    log::info!("Clamped fan {fan} target from {rpm} to {clamped}");
                }
                clamped.to_string()
            }
            Err(_) => {
                log::warn!("Fan {fan} speed {requested:?} is not a number, passing it through");
                requested.to_string()
            }
        };

        if update_cache {
            self.last_commanded.lock()[fan.index()] = Some(value.clone());
        }

        self.wait_for_slot(fan);
        self.writer.write_fan_speed(hwmon_dir, fan, &value)?;
        Ok(value)
    }

    /// Block until `fan` may be written and stamp it. The lock is released
    /// before the caller performs the write.
    fn wait_for_slot(&self, fan: FanId) {
        let mut last = self.last_apply.lock();
        if fan == FanId::Two {
            if let Some(fan1_at) = last[FanId::One.index()] {
                let elapsed = fan1_at.elapsed();
                if elapsed < self.apply_gap {
                    let wait = self.apply_gap - elapsed;
                    log::debug!("Waiting {wait:?} before writing fan 2");
                    thread::sleep(wait);
                }
            }
        }
        last[fan.index()] = Some(Instant::now());
    }

    /// Current speed from `fanN_input`.
    pub fn read_speed(&self, fan: FanId) -> Result<String> {
        let path = self.hwmon_dir()?.join(format!("fan{}_input", fan.number()));
        std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| {
                log::error!("Failed to read {}: {e}", path.display());
                FanError::ReadSpeed(e)
            })
    }

    pub fn cached_speeds(&self) -> [Option<String>; 2] {
        self.last_commanded.lock().clone()
    }

    pub fn clear_cached_speeds(&self) {
        *self.last_commanded.lock() = [None, None];
    }
}
