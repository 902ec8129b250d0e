// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The daemon aggregate: requested fan mode, the two background loops and
//! every operation a client command can reach.
//!
//! The requested mode is guarded by one lock that is held for a whole
//! transition, so two concurrent `SET_FAN_MODE` requests cannot interleave
//! their hardware writes.

use crate::actuator::FanActuator;
use crate::config::{Config, Timings};
use crate::controller::BetterAuto;
use crate::error::{FanError, Result};
use crate::hwmon::SensorLocator;
use crate::lmsensors::LmSensors;
use crate::mode::{FanId, FanMode, PwmMode};
use crate::profile::FanProfile;
use crate::protocol::Request;
use crate::sensors::SensorReader;
use crate::watchdog::Watchdog;
use crate::writer::{ElevatingWriter, HardwareWriter};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;

const OK: &str = "OK";

pub struct Daemon {
    timings: Timings,
    sensors: SensorReader,
    actuator: FanActuator,
    lmsensors: LmSensors,
    mode: Mutex<FanMode>,
    controller: BetterAuto,
    watchdog: Watchdog,
}

impl Daemon {
    pub fn new(config: &Config, writer: Arc<dyn HardwareWriter>) -> Arc<Self> {
        let locator = Arc::new(SensorLocator::new(config.paths.clone()));
        Arc::new(Self {
            timings: config.control.timings(),
            sensors: SensorReader::new(locator.clone()),
            actuator: FanActuator::new(locator, writer, &config.control),
            lmsensors: LmSensors::new(config.helpers.sensors_program.clone()),
            mode: Mutex::new(FanMode::Auto),
            controller: BetterAuto::new(),
            watchdog: Watchdog::new(),
        })
    }

    /// Daemon writing sysfs directly and falling back to the helper scripts.
    pub fn with_system_writer(config: &Config) -> Arc<Self> {
        Self::new(config, Arc::new(ElevatingWriter::new(config.helpers.clone())))
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn sensors(&self) -> &SensorReader {
        &self.sensors
    }

    pub fn actuator(&self) -> &FanActuator {
        &self.actuator
    }

    pub fn controller(&self) -> &BetterAuto {
        &self.controller
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Last mode accepted by [`set_mode`](Self::set_mode).
    pub fn requested_mode(&self) -> FanMode {
        *self.mode.lock()
    }

    // -----------------------------------------------------------------------
    // Mode state machine
    // -----------------------------------------------------------------------

    pub fn write_pwm_mode(&self, mode: PwmMode) -> Result<()> {
        let hwmon_dir = self.actuator.hwmon_dir()?;
        self.actuator
            .writer()
            .write_pwm_mode(hwmon_dir, mode)
            .inspect_err(|e| log::error!("Failed to set fan mode {}: {e}", mode.helper_arg()))
    }

    /// Switch modes. On failure the requested mode is left as it was.
    pub fn set_mode(self: &Arc<Self>, mode: FanMode) -> Result<()> {
        let mut requested = self.mode.lock();
        self.transition(&mut requested, mode)?;
        drop(requested);

        self.watchdog.trigger(self, mode);
        Ok(())
    }

    /// Put the fans under Better-Auto unless it is already requested and
    /// its loop is alive.
    pub fn ensure_better_auto(self: &Arc<Self>) -> Result<()> {
        let mut requested = self.mode.lock();
        if *requested == FanMode::BetterAuto && self.controller.is_running() {
            return Ok(());
        }

        log::info!("Enforcing BETTER_AUTO mode");
        self.transition(&mut requested, FanMode::BetterAuto)?;
        drop(requested);

        self.watchdog.trigger(self, FanMode::BetterAuto);
        Ok(())
    }

    /// Rewrite the PWM register for the requested mode unless
    /// `still_current` says the caller has been retired.
    pub fn reassert_mode(&self, still_current: impl Fn() -> bool) -> Result<()> {
        let requested = self.mode.lock();
        if !still_current() {
            return Ok(());
        }
        self.write_pwm_mode(requested.pwm_mode())
    }

    fn transition(self: &Arc<Self>, requested: &mut FanMode, mode: FanMode) -> Result<()> {
        let previous = *requested;

        match mode {
            FanMode::BetterAuto => self.controller.start(self)?,
            FanMode::Auto | FanMode::Manual | FanMode::Max | FanMode::Profile => {
                self.controller.stop();
                self.write_pwm_mode(mode.pwm_mode())?;
                let fresh_start = matches!(mode, FanMode::Manual | FanMode::Profile);
                if fresh_start && previous != mode {
                    self.actuator.clear_cached_speeds();
                }
            }
        }

        *requested = mode;
        log::info!("Fan mode {previous} -> {mode}");
        Ok(())
    }

    /// Requested mode for the software-driven modes, the hardware register
    /// otherwise.
    pub fn get_mode(&self) -> Result<FanMode> {
        // Held through the read so it never sees a half-written register.
        let requested = self.mode.lock();
        if matches!(*requested, FanMode::BetterAuto | FanMode::Profile) {
            return Ok(*requested);
        }

        let path = self.actuator.hwmon_dir()?.join("pwm1_enable");
        let raw = fs::read_to_string(&path).map_err(|e| {
            log::error!("Failed to read {}: {e}", path.display());
            FanError::ReadMode(e)
        })?;
        Ok(PwmMode::from_raw(&raw)?.as_fan_mode())
    }

    // -----------------------------------------------------------------------
    // Fans
    // -----------------------------------------------------------------------

    /// Write a speed through the actuator. With `trigger`, a user-driven
    /// write in MANUAL restarts the watchdog so the new value is held.
    pub fn set_fan_speed(
        self: &Arc<Self>,
        fan: FanId,
        speed: &str,
        trigger: bool,
        update_cache: bool,
    ) -> Result<String> {
        let applied = self.actuator.apply(fan, speed, update_cache)?;
        if trigger
            && !self.watchdog.is_reapplying()
            && matches!(self.get_mode(), Ok(FanMode::Manual))
        {
            self.watchdog.trigger(self, FanMode::Manual);
        }
        Ok(applied)
    }

    pub fn get_fan_speed(&self, fan: FanId) -> Result<String> {
        self.actuator.read_speed(fan)
    }

    /// Apply the first point of `profile` to both fans.
    pub fn set_fan_profile(self: &Arc<Self>, profile: &FanProfile) -> Result<()> {
        log::info!("Profile set with {} points", profile.points().len());
        for point in profile.points() {
            log::debug!("  {}°C -> {} RPM", point.temp_c, point.rpm);
        }

        let rpm = profile.first().rpm.to_string();
        for fan in FanId::BOTH {
            self.set_fan_speed(fan, &rpm, false, true)?;
        }

        self.watchdog.trigger(self, FanMode::Profile);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Temperatures
    // -----------------------------------------------------------------------

    /// Whole degrees from lm-sensors, else the last known value, else `N/A`.
    pub fn get_cpu_temp(&self) -> String {
        if let Some(temp) = self.lmsensors.cpu_temp() {
            self.sensors.remember_cpu_temp(temp as f64);
            return temp.to_string();
        }
        match self.sensors.last_cpu_temp() {
            Some(temp) => (temp as i64).to_string(),
            None => "N/A".to_string(),
        }
    }

    pub fn get_all_temps(&self) -> String {
        self.lmsensors.all_temps().to_string()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Answer one command line.
    pub fn handle_command(self: &Arc<Self>, line: &str) -> String {
        match Request::parse(line) {
            Ok(request) => self.handle(request),
            Err(e) => {
                log::debug!("Rejected command {line:?}: {e}");
                e.to_response()
            }
        }
    }

    pub fn handle(self: &Arc<Self>, request: Request) -> String {
        let result = match request {
            Request::GetFanSpeed(fan) => self.get_fan_speed(fan),
            Request::SetFanSpeed(fan, speed) => {
                self.set_fan_speed(fan, &speed, true, true).map(|_| OK.to_string())
            }
            Request::SetFanMode(mode) => self.set_mode(mode).map(|()| OK.to_string()),
            Request::GetFanMode => self.get_mode().map(|mode| mode.to_string()),
            Request::GetCpuTemp => Ok(self.get_cpu_temp()),
            Request::GetAllTemps => Ok(self.get_all_temps()),
            Request::SetFanProfile(profile) => {
                self.set_fan_profile(&profile).map(|()| OK.to_string())
            }
        };
        result.unwrap_or_else(|e| e.to_response())
    }

    /// Stop both background loops.
    pub fn shutdown(&self) {
        self.watchdog.cancel();
        self.controller.stop();
    }
}

/// Shared fixture for tests that need a whole daemon.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::{ControlConfig, HelperConfig, SysfsPaths};
    use crate::writer::fake::RecordingWriter;
    use std::path::PathBuf;
    use tempfile::TempDir;

    pub struct Rig {
        pub tmp: TempDir,
        pub fan_dir: PathBuf,
        pub writer: Arc<RecordingWriter>,
        pub daemon: Arc<Daemon>,
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            self.daemon.shutdown();
        }
    }

    /// Daemon over a fake sysfs tree with millisecond timings.
    pub fn rig() -> Rig {
        let tmp = TempDir::new().unwrap();
        let fan_dir = tmp.path().join("hp-wmi/hwmon/hwmon3");
        fs::create_dir_all(&fan_dir).unwrap();
        fs::write(fan_dir.join("pwm1_enable"), "2\n").unwrap();

        let config = Config {
            paths: SysfsPaths {
                hwmon_root: tmp.path().join("class/hwmon"),
                thermal_root: tmp.path().join("class/thermal"),
                drm_root: tmp.path().join("class/drm"),
                proc_stat: tmp.path().join("proc/stat"),
                fan_hwmon_parent: tmp.path().join("hp-wmi/hwmon"),
            },
            helpers: HelperConfig {
                sensors_program: "/nonexistent/sensors".to_string(),
                ..HelperConfig::default()
            },
            control: ControlConfig {
                tick_ms: 20,
                reapply_ms: 200,
                cooldown_ms: 200,
                mode_refresh_ms: 100,
                fan_apply_gap_ms: 10,
                watchdog_interval_ms: 50,
                cancel_poll_ms: 5,
                ..ControlConfig::default()
            },
            ..Config::default()
        };

        let writer = Arc::new(RecordingWriter::default());
        let daemon = Daemon::new(&config, writer.clone());
        Rig {
            tmp,
            fan_dir,
            writer,
            daemon,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::rig;
    use super::*;
    use crate::writer::fake::Write;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_manual_mode_round_trip() {
        let rig = rig();
        assert_eq!(rig.daemon.handle_command("GET_FAN_MODE"), "AUTO");
        assert_eq!(rig.daemon.handle_command("SET_FAN_MODE manual"), "OK");
        assert_eq!(rig.daemon.handle_command("GET_FAN_MODE"), "MANUAL");
        assert_eq!(rig.writer.mode_writes()[0], PwmMode::Manual);
    }

    #[test]
    fn test_speed_round_trip_clamps() {
        let rig = rig();
        rig.daemon.set_mode(FanMode::Manual).unwrap();
        assert_eq!(rig.daemon.handle_command("SET_FAN_SPEED 1 9000"), "OK");
        assert_eq!(rig.daemon.handle_command("GET_FAN_SPEED 1"), "5800");
        assert_eq!(
            rig.daemon.handle_command("GET_FAN_SPEED 3"),
            "ERROR: Invalid fan number: 3"
        );
    }

    #[test]
    fn test_manual_to_manual_keeps_cache() {
        let rig = rig();
        rig.daemon.set_mode(FanMode::Manual).unwrap();
        rig.daemon.handle_command("SET_FAN_SPEED 2 3300");
        assert_eq!(rig.daemon.actuator().cached_speeds()[1].as_deref(), Some("3300"));

        rig.daemon.set_mode(FanMode::Manual).unwrap();
        assert_eq!(rig.daemon.actuator().cached_speeds()[1].as_deref(), Some("3300"));

        rig.daemon.set_mode(FanMode::Max).unwrap();
        rig.daemon.set_mode(FanMode::Manual).unwrap();
        assert_eq!(rig.daemon.actuator().cached_speeds(), [None, None]);
    }

    #[test]
    fn test_failed_mode_write_keeps_mode() {
        let rig = rig();
        rig.daemon.set_mode(FanMode::Manual).unwrap();
        rig.writer.fail_modes.store(true, Ordering::SeqCst);

        assert_eq!(
            rig.daemon.handle_command("SET_FAN_MODE MAX"),
            "ERROR: Unable to set fan mode"
        );
        assert_eq!(rig.daemon.requested_mode(), FanMode::Manual);
    }

    #[test]
    fn test_failed_switch_keeps_manual_watchdog() {
        let rig = rig();
        rig.daemon.set_mode(FanMode::Manual).unwrap();
        rig.daemon.handle_command("SET_FAN_SPEED 1 3100");
        let generation = rig.daemon.watchdog().generation();

        rig.writer.fail_modes.store(true, Ordering::SeqCst);
        assert_eq!(
            rig.daemon.handle_command("SET_FAN_MODE MAX"),
            "ERROR: Unable to set fan mode"
        );
        rig.writer.fail_modes.store(false, Ordering::SeqCst);
        assert_eq!(rig.daemon.watchdog().generation(), generation);

        let speed_writes = rig.writer.speed_writes().len();
        fs::write(rig.fan_dir.join("pwm1_enable"), "2\n").unwrap();
        thread::sleep(Duration::from_millis(300));

        assert_eq!(rig.daemon.get_mode().unwrap(), FanMode::Manual);
        assert_eq!(rig.writer.mode_writes().last(), Some(&PwmMode::Manual));
        let speeds = rig.writer.speed_writes();
        assert!(speeds.len() > speed_writes);
        assert_eq!(speeds.last().map(|(_, _, r)| r.as_str()), Some("3100"));
    }

    #[test]
    fn test_profile_in_auto_keeps_hardware_auto() {
        let rig = rig();
        assert_eq!(rig.daemon.handle_command("SET_FAN_PROFILE 40 2800 60 3800"), "OK");
        thread::sleep(Duration::from_millis(100));

        assert_eq!(rig.daemon.handle_command("GET_FAN_MODE"), "AUTO");
        let modes = rig.writer.mode_writes();
        assert!(!modes.is_empty());
        assert!(modes.iter().all(|m| *m == PwmMode::Auto), "{modes:?}");
    }

    #[test]
    fn test_invalid_mode_has_no_side_effects() {
        let rig = rig();
        assert_eq!(
            rig.daemon.handle_command("SET_FAN_MODE warp"),
            "ERROR: Invalid fan mode: WARP"
        );
        assert!(rig.writer.writes().is_empty());
        assert_eq!(rig.daemon.watchdog().generation(), 0);
    }

    #[test]
    fn test_unknown_hardware_mode_is_reported() {
        let rig = rig();
        fs::write(rig.fan_dir.join("pwm1_enable"), "7\n").unwrap();
        assert_eq!(rig.daemon.handle_command("GET_FAN_MODE"), "ERROR: Unknown fan mode 7");
    }

    #[test]
    fn test_better_auto_starts_and_stops_controller() {
        let rig = rig();
        assert_eq!(rig.daemon.handle_command("SET_FAN_MODE BETTER_AUTO"), "OK");
        assert!(rig.daemon.controller().is_running());
        assert_eq!(rig.daemon.handle_command("GET_FAN_MODE"), "BETTER_AUTO");

        thread::sleep(Duration::from_millis(100));
        let fans: Vec<FanId> = rig.writer.speed_writes().iter().map(|(_, f, _)| *f).collect();
        assert!(fans.starts_with(&[FanId::One, FanId::Two]), "{fans:?}");

        rig.daemon.set_mode(FanMode::Auto).unwrap();
        assert!(!rig.daemon.controller().is_running());
        assert_eq!(rig.writer.mode_writes().last(), Some(&PwmMode::Auto));
    }

    #[test]
    fn test_ensure_better_auto_forces_and_is_idempotent() {
        let rig = rig();
        rig.daemon.set_mode(FanMode::Max).unwrap();

        rig.daemon.ensure_better_auto().unwrap();
        assert_eq!(rig.daemon.requested_mode(), FanMode::BetterAuto);
        assert!(rig.daemon.controller().is_running());

        let generation = rig.daemon.watchdog().generation();
        rig.daemon.ensure_better_auto().unwrap();
        assert_eq!(rig.daemon.watchdog().generation(), generation);
        assert!(rig.daemon.controller().is_running());
    }

    #[test]
    fn test_profile_applies_first_point() {
        let rig = rig();
        assert_eq!(rig.daemon.handle_command("SET_FAN_PROFILE 40 2800 60 3800"), "OK");

        let writes = rig.writer.speed_writes();
        let applied: Vec<(FanId, &str)> = writes.iter().map(|(_, f, r)| (*f, r.as_str())).collect();
        assert_eq!(applied, vec![(FanId::One, "2800"), (FanId::Two, "2800")]);
        assert_eq!(rig.daemon.requested_mode(), FanMode::Auto);
    }

    #[test]
    fn test_profile_rejected_without_writes() {
        let rig = rig();
        assert_eq!(
            rig.daemon.handle_command("SET_FAN_PROFILE 20 500"),
            "ERROR: Invalid temperature 20 (valid range: 30-100)"
        );
        assert_eq!(
            rig.daemon.handle_command("SET_FAN_PROFILE"),
            "ERROR: Invalid SET_FAN_PROFILE command format"
        );
        assert!(rig.writer.writes().is_empty());
    }

    #[test]
    fn test_watchdog_reasserts_manual_after_revert() {
        let rig = rig();
        rig.daemon.set_mode(FanMode::Manual).unwrap();
        rig.daemon.handle_command("SET_FAN_SPEED 1 3100");
        let before = rig.writer.speed_writes().len();

        // Firmware drops back to automatic.
        fs::write(rig.fan_dir.join("pwm1_enable"), "2\n").unwrap();
        thread::sleep(Duration::from_millis(200));

        assert_eq!(rig.daemon.get_mode().unwrap(), FanMode::Manual);
        let speeds = rig.writer.speed_writes();
        assert!(speeds.len() > before);
        assert_eq!(speeds.last().map(|(_, _, r)| r.as_str()), Some("3100"));
    }

    #[test]
    fn test_newer_mode_retires_watchdog() {
        let rig = rig();
        rig.daemon.set_mode(FanMode::Max).unwrap();
        thread::sleep(Duration::from_millis(80));
        rig.daemon.set_mode(FanMode::Auto).unwrap();

        // Allow an in-flight wake to finish.
        thread::sleep(Duration::from_millis(20));
        let count = rig.writer.mode_writes().len();
        thread::sleep(Duration::from_millis(200));

        assert_eq!(rig.writer.mode_writes().len(), count);
        assert_eq!(
            rig.writer.writes().last(),
            Some(&Write::Mode(PwmMode::Auto))
        );
    }

    #[test]
    fn test_cpu_temp_falls_back_to_cache() {
        let rig = rig();
        assert_eq!(rig.daemon.handle_command("GET_CPU_TEMP"), "N/A");
        rig.daemon.sensors().remember_cpu_temp(61.7);
        assert_eq!(rig.daemon.handle_command("GET_CPU_TEMP"), "61");
        assert_eq!(rig.daemon.handle_command("GET_ALL_TEMPS"), "N/A");
    }
}
