// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Every hardware path, helper script and control-loop timing lives here so
//! the daemon can be pointed at a fake sysfs tree and run on short timings.
//! Default path: `/etc/victus-control/config.toml`

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/victus-control/config.toml";

/// Default daemon socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/victus-control/victus_backend.sock";

/// Largest command frame the daemon accepts before dropping the connection.
pub const DEFAULT_MAX_COMMAND_LEN: u32 = 1024;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub paths: SysfsPaths,

    #[serde(default)]
    pub helpers: HelperConfig,

    #[serde(default)]
    pub control: ControlConfig,
}

/// Socket and startup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path for the Unix domain socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Permission bits applied to the socket after binding.
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Sanity bound on a single command frame, in bytes.
    #[serde(default = "default_max_command_len")]
    pub max_command_len: u32,

    /// Put the fans under Better-Auto control as soon as the socket is up.
    #[serde(default = "default_true")]
    pub ensure_better_auto_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            socket_mode: default_socket_mode(),
            max_command_len: DEFAULT_MAX_COMMAND_LEN,
            ensure_better_auto_on_start: true,
        }
    }
}

/// Roots of the kernel trees the sensor locator scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SysfsPaths {
    #[serde(default = "default_hwmon_root")]
    pub hwmon_root: PathBuf,

    #[serde(default = "default_thermal_root")]
    pub thermal_root: PathBuf,

    #[serde(default = "default_drm_root")]
    pub drm_root: PathBuf,

    #[serde(default = "default_proc_stat")]
    pub proc_stat: PathBuf,

    /// Directory whose first `hwmon*` child carries the fan controls.
    #[serde(default = "default_fan_hwmon_parent")]
    pub fan_hwmon_parent: PathBuf,
}

impl Default for SysfsPaths {
    fn default() -> Self {
        Self {
            hwmon_root: default_hwmon_root(),
            thermal_root: default_thermal_root(),
            drm_root: default_drm_root(),
            proc_stat: default_proc_stat(),
            fan_hwmon_parent: default_fan_hwmon_parent(),
        }
    }
}

/// External programs the daemon shells out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Invoked as `<script> <fan> <rpm>`.
    #[serde(default = "default_fan_speed_script")]
    pub fan_speed_script: String,

    /// Invoked as `<script> <AUTO|MANUAL|MAX>`.
    #[serde(default = "default_fan_mode_script")]
    pub fan_mode_script: String,

    /// Prefix helper invocations with `sudo`.
    #[serde(default = "default_true")]
    pub use_sudo: bool,

    /// lm-sensors front end used for GET_CPU_TEMP / GET_ALL_TEMPS.
    #[serde(default = "default_sensors_program")]
    pub sensors_program: String,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            fan_speed_script: default_fan_speed_script(),
            fan_mode_script: default_fan_mode_script(),
            use_sudo: true,
            sensors_program: default_sensors_program(),
        }
    }
}

/// Better-Auto, watchdog and actuator timings plus RPM bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_reapply_ms")]
    pub reapply_ms: u64,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default = "default_mode_refresh_ms")]
    pub mode_refresh_ms: u64,

    #[serde(default = "default_fan_apply_gap_ms")]
    pub fan_apply_gap_ms: u64,

    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Granularity at which sleeping loops look at their cancellation flag.
    #[serde(default = "default_cancel_poll_ms")]
    pub cancel_poll_ms: u64,

    /// RPM for Better-Auto level 1.
    #[serde(default = "default_min_rpm")]
    pub min_rpm: u32,

    /// Ceilings used when `fanN_max` is missing or unreadable.
    #[serde(default = "default_fallback_max_rpm")]
    pub fallback_max_rpm: [u32; 2],
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            reapply_ms: default_reapply_ms(),
            cooldown_ms: default_cooldown_ms(),
            mode_refresh_ms: default_mode_refresh_ms(),
            fan_apply_gap_ms: default_fan_apply_gap_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            cancel_poll_ms: default_cancel_poll_ms(),
            min_rpm: default_min_rpm(),
            fallback_max_rpm: default_fallback_max_rpm(),
        }
    }
}

/// [`ControlConfig`] converted to durations once at startup.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub tick: Duration,
    pub reapply: Duration,
    pub cooldown: Duration,
    pub mode_refresh: Duration,
    pub fan_apply_gap: Duration,
    pub watchdog_interval: Duration,
    pub cancel_poll: Duration,
}

impl ControlConfig {
    pub fn timings(&self) -> Timings {
        Timings {
            tick: Duration::from_millis(self.tick_ms),
            reapply: Duration::from_millis(self.reapply_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
            mode_refresh: Duration::from_millis(self.mode_refresh_ms),
            fan_apply_gap: Duration::from_millis(self.fan_apply_gap_ms),
            watchdog_interval: Duration::from_millis(self.watchdog_interval_ms),
            // A zero poll would spin.
            cancel_poll: Duration::from_millis(self.cancel_poll_ms.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Save config to a TOML file, creating parent directories if needed.
pub fn save_config(path: &Path, config: &Config) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize config: {e}"),
        )
    })?;

    fs::write(path, contents)?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_socket_path() -> String {
    DEFAULT_SOCKET_PATH.to_string()
}

fn default_socket_mode() -> u32 {
    0o660
}

fn default_max_command_len() -> u32 {
    DEFAULT_MAX_COMMAND_LEN
}

fn default_true() -> bool {
    true
}

fn default_hwmon_root() -> PathBuf {
    PathBuf::from("/sys/class/hwmon")
}

fn default_thermal_root() -> PathBuf {
    PathBuf::from("/sys/class/thermal")
}

fn default_drm_root() -> PathBuf {
    PathBuf::from("/sys/class/drm")
}

fn default_proc_stat() -> PathBuf {
    PathBuf::from("/proc/stat")
}

fn default_fan_hwmon_parent() -> PathBuf {
    PathBuf::from("/sys/devices/platform/hp-wmi/hwmon")
}

fn default_fan_speed_script() -> String {
    "/usr/bin/set-fan-speed.sh".to_string()
}

fn default_fan_mode_script() -> String {
    "/usr/bin/set-fan-mode.sh".to_string()
}

fn default_sensors_program() -> String {
    "sensors".to_string()
}

fn default_tick_ms() -> u64 {
    2_000
}

fn default_reapply_ms() -> u64 {
    90_000
}

fn default_cooldown_ms() -> u64 {
    90_000
}

fn default_mode_refresh_ms() -> u64 {
    80_000
}

fn default_fan_apply_gap_ms() -> u64 {
    10_000
}

fn default_watchdog_interval_ms() -> u64 {
    90_000
}

fn default_cancel_poll_ms() -> u64 {
    1_000
}

fn default_min_rpm() -> u32 {
    2600
}

fn default_fallback_max_rpm() -> [u32; 2] {
    [5800, 6100]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.daemon.socket_path, DEFAULT_SOCKET_PATH);
        assert_eq!(cfg.control.fallback_max_rpm, [5800, 6100]);
        assert_eq!(cfg.control.timings().fan_apply_gap, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[control]\ntick_ms = 500\n\n[helpers]\nuse_sudo = false\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.control.tick_ms, 500);
        assert_eq!(cfg.control.reapply_ms, 90_000);
        assert!(!cfg.helpers.use_sudo);
        assert_eq!(cfg.helpers.fan_mode_script, "/usr/bin/set-fan-mode.sh");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut cfg = Config::default();
        cfg.daemon.socket_path = "/tmp/other.sock".to_string();

        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.daemon.socket_path, "/tmp/other.sock");
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[control\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_zero_poll_is_bumped() {
        let control = ControlConfig {
            cancel_poll_ms: 0,
            ..ControlConfig::default()
        };
        assert_eq!(control.timings().cancel_poll, Duration::from_millis(1));
    }
}
