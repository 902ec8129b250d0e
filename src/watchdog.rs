// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Manual-mode watchdog.
//!
//! HP firmware quietly drops back to automatic fan control after a while.
//! While a user-driven mode (MANUAL, MAX, PROFILE) is active a detached
//! thread re-asserts the PWM mode of the requested mode every interval and,
//! in MANUAL, re-applies the last commanded speeds. Each trigger bumps a generation counter; loops
//! holding an older generation exit on their next poll, so nothing is ever
//! joined.

use crate::controller::sleep_while;
use crate::daemon::Daemon;
use crate::mode::{FanId, FanMode};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

#[derive(Debug, Default)]
pub struct Watchdog {
    generation: AtomicU64,
    reapplying: AtomicBool,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// True while a reapply pass is writing speeds.
    pub fn is_reapplying(&self) -> bool {
        self.reapplying.load(Ordering::Acquire)
    }

    /// Retire every running loop.
    pub fn cancel(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Retire older loops and, for modes the firmware reverts, start a new one.
    pub fn trigger(&self, daemon: &Arc<Daemon>, mode: FanMode) {
        let generation = self.cancel();
        if !mode.needs_watchdog() {
            return;
        }

        let daemon = daemon.clone();
        let spawned = thread::Builder::new()
            .name(format!("watchdog-{generation}"))
            .spawn(move || run(daemon, mode, generation));
        if let Err(e) = spawned {
            log::error!("watchdog: failed to start for {mode}: {e}");
        }
    }

    /// Re-apply cached speeds if the hardware still reports MANUAL.
    /// Concurrent calls collapse into one.
    pub fn reapply(&self, daemon: &Arc<Daemon>) {
        if self
            .reapplying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let speeds = daemon.actuator().cached_speeds();
        let in_manual = matches!(daemon.get_mode(), Ok(FanMode::Manual));
        if in_manual && speeds.iter().any(Option::is_some) {
            log::info!(
                "Re-applying manual fan settings: fan1={} fan2={}",
                speeds[0].as_deref().unwrap_or("-"),
                speeds[1].as_deref().unwrap_or("-")
            );
            for (fan, speed) in FanId::BOTH.into_iter().zip(speeds) {
                let Some(speed) = speed else { continue };
                if let Err(e) = daemon.set_fan_speed(fan, &speed, false, false) {
                    log::warn!("Failed to reapply fan {fan} speed: {e}");
                }
            }
        }

        self.reapplying.store(false, Ordering::Release);
    }
}

fn run(daemon: Arc<Daemon>, mode: FanMode, generation: u64) {
    let watchdog = daemon.watchdog();
    let current = || watchdog.generation() == generation;
    let timings = *daemon.timings();
    log::debug!("watchdog {generation}: holding {mode}");

    while current() {
        if let Err(e) = daemon.reassert_mode(&current) {
            log::warn!("watchdog: failed to assert mode for {mode}: {e}");
        }
        if mode == FanMode::Manual {
            watchdog.reapply(&daemon);
        }
        if !sleep_while(&current, timings.watchdog_interval, timings.cancel_poll) {
            break;
        }
    }

    log::debug!("watchdog {generation}: superseded");
}
