// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Better-Auto: software fan control.
//!
//! Every tick the hottest temperature and the busiest utilization are mapped
//! onto an 8-step ladder and the higher of the two wins. Rising is immediate;
//! falling is limited to one step per tick. After a hot spell (level 5 or
//! above) the applied level is pinned for a cooldown window so the fans don't
//! spin down right after a spike.
//!
//! [`ControllerState::tick`] holds the whole decision and takes the current
//! time as an argument; [`BetterAuto`] runs it on a background thread.

use crate::config::Timings;
use crate::daemon::Daemon;
use crate::error::{FanError, Result};
use crate::mode::{FanId, PwmMode};
use crate::sensors::ThermalSnapshot;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 8;

/// Level both the applied and the sensor level start from.
const INITIAL_LEVEL: u8 = 3;

/// Sensor level that starts (or extends) a cooldown window.
pub const COOLDOWN_TRIGGER_LEVEL: u8 = 5;

/// °C at which levels 2..=8 begin.
pub const TEMP_THRESHOLDS: [f64; 7] = [45.0, 55.0, 65.0, 70.0, 75.0, 80.0, 84.0];

/// Utilization % at which levels 2..=8 begin.
pub const USAGE_THRESHOLDS: [f64; 7] = [15.0, 20.0, 25.0, 35.0, 45.0, 55.0, 65.0];

// ---------------------------------------------------------------------------
// Level math
// ---------------------------------------------------------------------------

/// One level per threshold reached, starting at 1.
pub fn level_from_thresholds(value: f64, thresholds: &[f64; 7]) -> u8 {
    let reached = thresholds.iter().filter(|t| value >= **t).count() as u8;
    (MIN_LEVEL + reached).clamp(MIN_LEVEL, MAX_LEVEL)
}

/// Sensor level for a snapshot. Without any temperature reading the previous
/// level is held rather than assuming the machine is cold; without usage
/// readings usage does not contribute. Drops are limited to one step.
pub fn level_from_snapshot(snapshot: &ThermalSnapshot, previous: u8) -> u8 {
    let temp_level = snapshot
        .hottest()
        .map_or(previous, |t| level_from_thresholds(t, &TEMP_THRESHOLDS));
    let usage_level = snapshot
        .busiest()
        .map_or(MIN_LEVEL, |u| level_from_thresholds(u, &USAGE_THRESHOLDS));

    let target = temp_level.max(usage_level).clamp(MIN_LEVEL, MAX_LEVEL);
    target.max(previous.saturating_sub(1))
}

/// Linear interpolation from `min_rpm` at level 1 to `max_rpm` at level 8.
pub fn rpm_for_level(level: u8, min_rpm: u32, max_rpm: u32) -> u32 {
    if max_rpm <= min_rpm {
        return max_rpm;
    }
    let level = level.clamp(MIN_LEVEL, MAX_LEVEL);
    let step = f64::from(max_rpm - min_rpm) / f64::from(MAX_LEVEL - MIN_LEVEL);
    let rpm = (f64::from(min_rpm) + f64::from(level - MIN_LEVEL) * step).round() as u32;
    rpm.clamp(min_rpm, max_rpm)
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// What one tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Level in effect after this tick.
    pub level: u8,
    /// Write the level's RPM to both fans.
    pub apply: bool,
    /// Re-assert manual PWM mode.
    pub refresh_mode: bool,
}

/// Controller memory. Lives as long as one run of the control loop.
#[derive(Debug, Clone)]
pub struct ControllerState {
    current_level: u8,
    sensor_level: u8,
    last_apply: Option<Instant>,
    last_mode_assert: Option<Instant>,
    cooldown_level: u8,
    cooldown_until: Option<Instant>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerState {
    pub fn new() -> Self {
        Self {
            current_level: INITIAL_LEVEL,
            sensor_level: INITIAL_LEVEL,
            last_apply: None,
            last_mode_assert: None,
            cooldown_level: 0,
            cooldown_until: None,
        }
    }

    pub fn current_level(&self) -> u8 {
        self.current_level
    }

    pub fn sensor_level(&self) -> u8 {
        self.sensor_level
    }

    /// Advance by one tick. The returned level counts as applied.
    pub fn tick(&mut self, snapshot: &ThermalSnapshot, now: Instant, timings: &Timings) -> Tick {
        self.sensor_level = level_from_snapshot(snapshot, self.sensor_level);
        let mut target = self.sensor_level;

        if self.cooldown_level > 0 && self.cooldown_until.is_some_and(|until| now >= until) {
            log::debug!("better-auto: cooldown at level {} expired", self.cooldown_level);
            self.cooldown_level = 0;
            self.cooldown_until = None;
        }
        if self.cooldown_level > 0 {
            target = target.max(self.cooldown_level);
        }

        let refresh_mode = elapsed_at_least(self.last_mode_assert, now, timings.mode_refresh);
        if refresh_mode {
            self.last_mode_assert = Some(now);
        }

        target = target.max(self.current_level.saturating_sub(1));

        let apply =
            target != self.current_level || elapsed_at_least(self.last_apply, now, timings.reapply);
        if apply {
            self.current_level = target;
            self.last_apply = Some(now);
        }

        if self.sensor_level >= COOLDOWN_TRIGGER_LEVEL {
            self.cooldown_level = self.cooldown_level.max(self.current_level);
            self.cooldown_until = Some(now + timings.cooldown);
        }

        Tick {
            level: self.current_level,
            apply,
            refresh_mode,
        }
    }
}

/// `true` when `since` is unset or at least `interval` before `now`.
fn elapsed_at_least(since: Option<Instant>, now: Instant, interval: Duration) -> bool {
    since.is_none_or(|at| now.saturating_duration_since(at) >= interval)
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

/// Sleep for `total` in `poll`-sized slices while `keep_going` holds.
/// Returns `false` if it was interrupted.
pub fn sleep_while(keep_going: impl Fn() -> bool, total: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !keep_going() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(poll.min(deadline - now));
    }
}

/// Owner of the control thread. At most one loop runs at a time.
#[derive(Debug, Default)]
pub struct BetterAuto {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BetterAuto {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a loop has been started and has not exited.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self
                .handle
                .lock()
                .as_ref()
                .is_some_and(|h| !h.is_finished())
    }

    /// Stop any previous loop, assert manual mode, reset the CPU usage
    /// baseline and start a fresh loop.
    pub fn start(&self, daemon: &Arc<Daemon>) -> Result<()> {
        let mut handle = self.handle.lock();
        Self::stop_locked(&self.running, &mut handle);

        daemon.write_pwm_mode(PwmMode::Manual)?;
        daemon.sensors().cpu_usage().reset();

        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let daemon = daemon.clone();
        let spawned = thread::Builder::new()
            .name("better-auto".to_string())
            .spawn(move || run(daemon, running));

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                log::error!("better-auto: failed to start worker thread: {e}");
                Err(FanError::ControllerSpawn(e))
            }
        }
    }

    /// Signal the loop and wait for it to exit.
    pub fn stop(&self) {
        let mut handle = self.handle.lock();
        Self::stop_locked(&self.running, &mut handle);
    }

    fn stop_locked(running: &AtomicBool, handle: &mut Option<JoinHandle<()>>) {
        running.store(false, Ordering::Release);
        if let Some(h) = handle.take() {
            if h.join().is_err() {
                log::error!("better-auto: control thread panicked");
            }
        }
    }
}

fn run(daemon: Arc<Daemon>, running: Arc<AtomicBool>) {
    log::info!("better-auto: control loop started");
    let timings = *daemon.timings();
    let alive = || running.load(Ordering::Acquire);
    let mut state = ControllerState::new();

    while alive() {
        let snapshot = daemon.sensors().collect_snapshot();
        let tick = state.tick(&snapshot, Instant::now(), &timings);

        if tick.refresh_mode {
            if let Err(e) = daemon.write_pwm_mode(PwmMode::Manual) {
                log::warn!("better-auto: failed to keep manual mode active: {e}");
            }
        }

        if tick.apply {
            let [fan1, fan2] = daemon.actuator().rpm_for_level(tick.level);
            log::debug!(
                "better-auto: level {} (sensor {}) -> {fan1}/{fan2} RPM, {snapshot:?}",
                tick.level,
                state.sensor_level()
            );

            if let Err(e) = daemon.set_fan_speed(FanId::One, &fan1.to_string(), false, true) {
                log::warn!("better-auto: failed to set fan 1 speed: {e}");
            }
            if !sleep_while(&alive, timings.fan_apply_gap, timings.cancel_poll) {
                break;
            }
            if let Err(e) = daemon.set_fan_speed(FanId::Two, &fan2.to_string(), false, true) {
                log::warn!("better-auto: failed to set fan 2 speed: {e}");
            }
        }

        sleep_while(&alive, timings.tick, timings.cancel_poll);
    }

    log::info!("better-auto: control loop stopped");
}
