// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Hardware writes.
//!
//! The daemon may or may not be allowed to write the hp-wmi sysfs files
//! itself. [`ElevatingWriter`] tries the direct route and, the first time the
//! kernel answers with a permission error, switches to the helper scripts for
//! the rest of the process lifetime.

use crate::config::HelperConfig;
use crate::error::{FanError, Result};
use crate::mode::{FanId, PwmMode};
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

/// Something that can put values into the fan controller.
pub trait HardwareWriter: Send + Sync {
    /// Request `rpm` for `fan`. `rpm` is passed through verbatim.
    fn write_fan_speed(&self, hwmon_dir: &Path, fan: FanId, rpm: &str) -> Result<()>;

    /// Write `pwm1_enable`.
    fn write_pwm_mode(&self, hwmon_dir: &Path, mode: PwmMode) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Direct sysfs
// ---------------------------------------------------------------------------

/// Writes `fanN_target` and `pwm1_enable` directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysfsWriter;

impl SysfsWriter {
    fn write(path: &Path, value: &str) -> io::Result<()> {
        fs::write(path, value)
    }

    pub fn try_fan_speed(&self, hwmon_dir: &Path, fan: FanId, rpm: &str) -> io::Result<()> {
        Self::write(&hwmon_dir.join(format!("fan{}_target", fan.number())), rpm)
    }

    pub fn try_pwm_mode(&self, hwmon_dir: &Path, mode: PwmMode) -> io::Result<()> {
        Self::write(&hwmon_dir.join("pwm1_enable"), &mode.value().to_string())
    }
}

impl HardwareWriter for SysfsWriter {
    fn write_fan_speed(&self, hwmon_dir: &Path, fan: FanId, rpm: &str) -> Result<()> {
        self.try_fan_speed(hwmon_dir, fan, rpm)
            .map_err(|e| FanError::SpeedWrite(e.to_string()))
    }

    fn write_pwm_mode(&self, hwmon_dir: &Path, mode: PwmMode) -> Result<()> {
        self.try_pwm_mode(hwmon_dir, mode).map_err(FanError::WriteMode)
    }
}

// ---------------------------------------------------------------------------
// Helper scripts
// ---------------------------------------------------------------------------

/// Runs the privileged helper scripts, optionally through `sudo`.
#[derive(Debug, Clone)]
pub struct HelperWriter {
    config: HelperConfig,
}

impl HelperWriter {
    pub fn new(config: HelperConfig) -> Self {
        Self { config }
    }

    fn command(&self, script: &str) -> Command {
        if self.config.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(script);
            cmd
        } else {
            Command::new(script)
        }
    }

    /// Run to completion; a spawn failure or non-zero exit comes back as text.
    fn run(&self, script: &str, args: &[&str]) -> std::result::Result<(), String> {
        let status = self
            .command(script)
            .args(args)
            .status()
            .map_err(|e| format!("{script} invocation failed: {e}"))?;

        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(format!("{script} failed with exit code {code}")),
                None => Err(format!("{script} terminated abnormally")),
            }
        }
    }
}

impl HardwareWriter for HelperWriter {
    fn write_fan_speed(&self, _hwmon_dir: &Path, fan: FanId, rpm: &str) -> Result<()> {
        let fan = fan.to_string();
        self.run(&self.config.fan_speed_script, &[&fan, rpm])
            .map_err(|reason| {
                log::error!("Fan {fan} speed helper: {reason}");
                FanError::SpeedWrite(reason)
            })
    }

    fn write_pwm_mode(&self, _hwmon_dir: &Path, mode: PwmMode) -> Result<()> {
        self.run(&self.config.fan_mode_script, &[mode.helper_arg()])
            .map_err(|reason| {
                log::error!("Fan mode helper ({}): {reason}", mode.helper_arg());
                FanError::ModeHelper(reason)
            })
    }
}

// ---------------------------------------------------------------------------
// Direct first, helper on EACCES/EPERM
// ---------------------------------------------------------------------------

/// Picks between [`SysfsWriter`] and [`HelperWriter`] at runtime.
#[derive(Debug)]
pub struct ElevatingWriter {
    direct: SysfsWriter,
    helper: HelperWriter,
    requires_elevation: AtomicBool,
}

impl ElevatingWriter {
    pub fn new(helper: HelperConfig) -> Self {
        Self {
            direct: SysfsWriter,
            helper: HelperWriter::new(helper),
            requires_elevation: AtomicBool::new(false),
        }
    }

    pub fn requires_elevation(&self) -> bool {
        self.requires_elevation.load(Ordering::Acquire)
    }

    /// Returns the error back if it is not a permission problem.
    fn elevate_on(&self, what: &str, err: io::Error) -> std::result::Result<(), io::Error> {
        if err.kind() != io::ErrorKind::PermissionDenied {
            return Err(err);
        }
        if !self.requires_elevation.swap(true, Ordering::AcqRel) {
            log::warn!("Direct {what} write denied ({err}); using helper scripts from now on");
        }
        Ok(())
    }
}

impl HardwareWriter for ElevatingWriter {
    fn write_fan_speed(&self, hwmon_dir: &Path, fan: FanId, rpm: &str) -> Result<()> {
        if !self.requires_elevation() {
            match self.direct.try_fan_speed(hwmon_dir, fan, rpm) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("Direct write of fan {fan} speed failed: {e}");
                    self.elevate_on("fan speed", e)
                        .map_err(|e| FanError::SpeedWrite(e.to_string()))?;
                }
            }
        }
        self.helper.write_fan_speed(hwmon_dir, fan, rpm)
    }

    fn write_pwm_mode(&self, hwmon_dir: &Path, mode: PwmMode) -> Result<()> {
        if !self.requires_elevation() {
            match self.direct.try_pwm_mode(hwmon_dir, mode) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("Direct write of fan mode failed: {e}");
                    self.elevate_on("fan mode", e).map_err(FanError::WriteMode)?;
                }
            }
        }
        self.helper.write_pwm_mode(hwmon_dir, mode)
    }
}

/// In-memory stand-in used by the unit tests of the modules above this one.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Write {
        Speed(FanId, String),
        Mode(PwmMode),
    }

    /// Records every write and mirrors it into the hwmon files a real
    /// controller would update (`fanN_input`, `pwm1_enable`).
    #[derive(Debug, Default)]
    pub struct RecordingWriter {
        pub writes: Mutex<Vec<(Instant, Write)>>,
        pub fail_modes: AtomicBool,
    }

    impl RecordingWriter {
        pub fn writes(&self) -> Vec<Write> {
            self.writes.lock().iter().map(|(_, w)| w.clone()).collect()
        }

        pub fn speed_writes(&self) -> Vec<(Instant, FanId, String)> {
            self.writes
                .lock()
                .iter()
                .filter_map(|(at, w)| match w {
                    Write::Speed(fan, rpm) => Some((*at, *fan, rpm.clone())),
                    Write::Mode(_) => None,
                })
                .collect()
        }

        pub fn mode_writes(&self) -> Vec<PwmMode> {
            self.writes()
                .into_iter()
                .filter_map(|w| match w {
                    Write::Mode(m) => Some(m),
                    Write::Speed(..) => None,
                })
                .collect()
        }
    }

    /// Swap the file in with a rename so readers never see it empty.
    fn replace_file(path: &Path, value: &str) {
        let staged = path.with_extension("staged");
        if fs::write(&staged, value).is_ok() {
            let _ = fs::rename(&staged, path);
        }
    }

    impl HardwareWriter for RecordingWriter {
        fn write_fan_speed(&self, hwmon_dir: &Path, fan: FanId, rpm: &str) -> Result<()> {
            replace_file(&hwmon_dir.join(format!("fan{}_input", fan.number())), rpm);
            self.writes
                .lock()
                .push((Instant::now(), Write::Speed(fan, rpm.to_string())));
            Ok(())
        }

        fn write_pwm_mode(&self, hwmon_dir: &Path, mode: PwmMode) -> Result<()> {
            if self.fail_modes.load(Ordering::SeqCst) {
                return Err(FanError::ModeHelper("exit code 1".to_string()));
            }
            replace_file(&hwmon_dir.join("pwm1_enable"), &mode.value().to_string());
            self.writes.lock().push((Instant::now(), Write::Mode(mode)));
            Ok(())
        }
    }
}
