// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! hwmon sysfs discovery.
//!
//! Locates the CPU and GPU temperature inputs, the GPU busy counter and the
//! hp-wmi fan directory. Paths differ between machines and kernels, so they
//! are found by name/label hints, with progressively weaker fallbacks. Each
//! lookup runs once per process; a missing sensor stays missing until restart.

use crate::config::SysfsPaths;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const CPU_NAME_HINTS: &[&str] = &["k10temp", "coretemp", "zenpower", "cpu", "package", "soc"];
const CPU_LABEL_HINTS: &[&str] = &["cpu", "package", "soc"];
const CPU_ZONE_HINTS: &[&str] = &["x86_pkg", "tctl", "cpu", "soc"];

const GPU_NAME_HINTS: &[&str] = &["amdgpu", "radeon", "nvidia", "gpu"];
const GPU_LABEL_HINTS: &[&str] = &["edge", "gpu", "junction", "hotspot"];
const GPU_ZONE_HINTS: &[&str] = &["gpu", "amdgpu", "nvidia"];

// ---------------------------------------------------------------------------
// Locator
// ---------------------------------------------------------------------------

/// Memoized sensor paths. The first caller of each `locate_*` runs discovery
/// while concurrent callers block on it; later calls are plain loads.
#[derive(Debug)]
pub struct SensorLocator {
    paths: SysfsPaths,
    cpu_temp: OnceLock<Option<PathBuf>>,
    gpu_temp: OnceLock<Option<PathBuf>>,
    gpu_busy: OnceLock<Option<PathBuf>>,
    fan_hwmon_dir: OnceLock<Option<PathBuf>>,
}

impl SensorLocator {
    pub fn new(paths: SysfsPaths) -> Self {
        Self {
            paths,
            cpu_temp: OnceLock::new(),
            gpu_temp: OnceLock::new(),
            gpu_busy: OnceLock::new(),
            fan_hwmon_dir: OnceLock::new(),
        }
    }

    pub fn paths(&self) -> &SysfsPaths {
        &self.paths
    }

    pub fn locate_cpu_temp(&self) -> Option<&Path> {
        self.cpu_temp
            .get_or_init(|| {
                let found = locate_temp_input(
                    &self.paths,
                    CPU_NAME_HINTS,
                    CPU_LABEL_HINTS,
                    CPU_ZONE_HINTS,
                );
                match &found {
                    Some(p) => log::info!("CPU temperature sensor: {}", p.display()),
                    None => log::warn!(
                        "better-auto: CPU thermal sensor not found; automatic mode will use default fan steps"
                    ),
                }
                found
            })
            .as_deref()
    }

    pub fn locate_gpu_temp(&self) -> Option<&Path> {
        self.gpu_temp
            .get_or_init(|| {
                let found = locate_temp_input(
                    &self.paths,
                    GPU_NAME_HINTS,
                    GPU_LABEL_HINTS,
                    GPU_ZONE_HINTS,
                );
                match &found {
                    Some(p) => log::info!("GPU temperature sensor: {}", p.display()),
                    None => log::warn!(
                        "better-auto: GPU thermal sensor not found; automatic mode will rely on CPU temperature"
                    ),
                }
                found
            })
            .as_deref()
    }

    pub fn locate_gpu_busy(&self) -> Option<&Path> {
        self.gpu_busy
            .get_or_init(|| {
                let found = find_gpu_busy_file(&self.paths.drm_root);
                match &found {
                    Some(p) => log::info!("GPU usage source: {}", p.display()),
                    None => log::warn!(
                        "better-auto: GPU usage source not found; automatic mode will use temperature only"
                    ),
                }
                found
            })
            .as_deref()
    }

    pub fn locate_fan_hwmon_dir(&self) -> Option<&Path> {
        self.fan_hwmon_dir
            .get_or_init(|| {
                let found = find_hwmon_directory(&self.paths.fan_hwmon_parent);
                match &found {
                    Some(p) => log::info!("Fan hwmon directory: {}", p.display()),
                    None => log::warn!(
                        "No hwmon directory under {}; fan control unavailable",
                        self.paths.fan_hwmon_parent.display()
                    ),
                }
                found
            })
            .as_deref()
    }
}

/// Strongest match wins: hwmon name/label hints, then thermal zone type hints,
/// then any hwmon temperature input, then any thermal zone.
fn locate_temp_input(
    paths: &SysfsPaths,
    name_hints: &[&str],
    label_hints: &[&str],
    zone_hints: &[&str],
) -> Option<PathBuf> {
    let hwmon = scan_hwmon_temps(&paths.hwmon_root, name_hints, label_hints);
    if hwmon.matched.is_some() {
        return hwmon.matched;
    }

    let zones = scan_thermal_zones(&paths.thermal_root, zone_hints);
    zones.matched.or(hwmon.fallback).or(zones.fallback)
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ScanResult {
    matched: Option<PathBuf>,
    fallback: Option<PathBuf>,
}

/// Walk `hwmon*` devices. A channel label hit returns that channel; a device
/// name hit returns the device's first channel.
fn scan_hwmon_temps(root: &Path, name_hints: &[&str], label_hints: &[&str]) -> ScanResult {
    let mut result = ScanResult::default();

    for hwmon_dir in sorted_children(root, "hwmon") {
        let name = read_trimmed(&hwmon_dir.join("name"))
            .unwrap_or_default()
            .to_lowercase();
        let name_matches = contains_any(&name, name_hints);

        let inputs = temp_inputs(&hwmon_dir);
        for (n, input) in &inputs {
            let label = read_trimmed(&hwmon_dir.join(format!("temp{n}_label")));
            if let Some(label) = label {
                if contains_any(&label.to_lowercase(), label_hints) {
                    result.matched = Some(input.clone());
                    return result;
                }
            }
        }

        let first = inputs.into_iter().next().map(|(_, p)| p);
        if name_matches && first.is_some() {
            result.matched = first;
            return result;
        }
        if result.fallback.is_none() {
            result.fallback = first;
        }
    }

    result
}

/// Walk `thermal_zone*` entries filtering on their `type`.
fn scan_thermal_zones(root: &Path, hints: &[&str]) -> ScanResult {
    let mut result = ScanResult::default();

    for zone in sorted_children(root, "thermal_zone") {
        let Some(zone_type) = read_trimmed(&zone.join("type")) else {
            continue;
        };
        let temp = zone.join("temp");

        if contains_any(&zone_type.to_lowercase(), hints) {
            result.matched = Some(temp);
            return result;
        }
        if result.fallback.is_none() {
            result.fallback = Some(temp);
        }
    }

    result
}

/// First `card*/device/gpu_busy_percent` under the DRM class directory.
pub fn find_gpu_busy_file(drm_root: &Path) -> Option<PathBuf> {
    sorted_children(drm_root, "card")
        .into_iter()
        .map(|card| card.join("device").join("gpu_busy_percent"))
        .find(|candidate| candidate.is_file())
}

/// First `hwmon*` directory below `parent`.
pub fn find_hwmon_directory(parent: &Path) -> Option<PathBuf> {
    sorted_children(parent, "hwmon").into_iter().next()
}

/// `(N, path)` for every `tempN_input` in a device directory, ordered by N.
fn temp_inputs(hwmon_dir: &Path) -> Vec<(u32, PathBuf)> {
    let Ok(entries) = fs::read_dir(hwmon_dir) else {
        return Vec::new();
    };

    let mut inputs: Vec<(u32, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let n = file_name
                .strip_prefix("temp")?
                .strip_suffix("_input")?
                .parse::<u32>()
                .ok()?;
            Some((n, entry.path()))
        })
        .collect();

    inputs.sort_by_key(|(n, _)| *n);
    inputs
}

/// Children of `dir` whose name starts with `prefix`, ordered with numeric
/// suffixes compared as numbers (`hwmon2` before `hwmon10`).
fn sorted_children(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut children: Vec<(u64, String, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = name.strip_prefix(prefix)?;
            let n = suffix.parse::<u64>().unwrap_or(u64::MAX);
            Some((n, name, entry.path()))
        })
        .collect();

    children.sort();
    children.into_iter().map(|(_, _, path)| path).collect()
}

fn contains_any(haystack: &str, hints: &[&str]) -> bool {
    hints
        .iter()
        .any(|hint| !hint.is_empty() && haystack.contains(hint))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fake_paths(root: &Path) -> SysfsPaths {
        SysfsPaths {
            hwmon_root: root.join("class/hwmon"),
            thermal_root: root.join("class/thermal"),
            drm_root: root.join("class/drm"),
            proc_stat: root.join("proc/stat"),
            fan_hwmon_parent: root.join("platform/hp-wmi/hwmon"),
        }
    }

    fn hwmon_device(root: &Path, dir: &str, name: &str, channels: &[(u32, Option<&str>)]) {
        let dev = root.join("class/hwmon").join(dir);
        fs::create_dir_all(&dev).unwrap();
        fs::write(dev.join("name"), format!("{name}\n")).unwrap();
        for (n, label) in channels {
            fs::write(dev.join(format!("temp{n}_input")), "42000\n").unwrap();
            if let Some(label) = label {
                fs::write(dev.join(format!("temp{n}_label")), format!("{label}\n")).unwrap();
            }
        }
    }

    fn thermal_zone(root: &Path, dir: &str, zone_type: &str) {
        let zone = root.join("class/thermal").join(dir);
        fs::create_dir_all(&zone).unwrap();
        fs::write(zone.join("type"), format!("{zone_type}\n")).unwrap();
        fs::write(zone.join("temp"), "50000\n").unwrap();
    }

    #[test]
    fn test_cpu_by_device_name() {
        let tmp = TempDir::new().unwrap();
        hwmon_device(tmp.path(), "hwmon0", "acpitz", &[(1, None)]);
        hwmon_device(tmp.path(), "hwmon3", "k10temp", &[(1, Some("Tctl")), (3, None)]);

        let locator = SensorLocator::new(fake_paths(tmp.path()));
        let cpu = locator.locate_cpu_temp().unwrap();
        assert!(cpu.ends_with("hwmon3/temp1_input"));
    }

    #[test]
    fn test_gpu_by_channel_label() {
        let tmp = TempDir::new().unwrap();
        hwmon_device(tmp.path(), "hwmon1", "something", &[(1, Some("vddgfx")), (2, Some("junction"))]);

        let locator = SensorLocator::new(fake_paths(tmp.path()));
        let gpu = locator.locate_gpu_temp().unwrap();
        assert!(gpu.ends_with("hwmon1/temp2_input"));
    }

    #[test]
    fn test_thermal_zone_beats_unhinted_hwmon() {
        let tmp = TempDir::new().unwrap();
        hwmon_device(tmp.path(), "hwmon0", "acpitz", &[(1, None)]);
        thermal_zone(tmp.path(), "thermal_zone0", "INT3400");
        thermal_zone(tmp.path(), "thermal_zone1", "x86_pkg_temp");

        let locator = SensorLocator::new(fake_paths(tmp.path()));
        let cpu = locator.locate_cpu_temp().unwrap();
        assert!(cpu.ends_with("thermal_zone1/temp"));
    }

    #[test]
    fn test_degrades_to_first_input() {
        let tmp = TempDir::new().unwrap();
        hwmon_device(tmp.path(), "hwmon0", "acpitz", &[(2, None), (1, None)]);

        let locator = SensorLocator::new(fake_paths(tmp.path()));
        let cpu = locator.locate_cpu_temp().unwrap();
        assert!(cpu.ends_with("hwmon0/temp1_input"));
    }

    #[test]
    fn test_absent_stays_absent() {
        let tmp = TempDir::new().unwrap();
        let locator = SensorLocator::new(fake_paths(tmp.path()));
        assert!(locator.locate_gpu_temp().is_none());

        // Sensors appearing later are not picked up until restart.
        hwmon_device(tmp.path(), "hwmon0", "amdgpu", &[(1, Some("edge"))]);
        assert!(locator.locate_gpu_temp().is_none());
    }

    #[test]
    fn test_gpu_busy_and_fan_dir() {
        let tmp = TempDir::new().unwrap();
        let card = tmp.path().join("class/drm/card1/device");
        fs::create_dir_all(&card).unwrap();
        fs::write(card.join("gpu_busy_percent"), "12\n").unwrap();
        fs::create_dir_all(tmp.path().join("class/drm/card0-eDP-1")).unwrap();
        fs::create_dir_all(tmp.path().join("platform/hp-wmi/hwmon/hwmon7")).unwrap();

        let locator = SensorLocator::new(fake_paths(tmp.path()));
        assert!(locator.locate_gpu_busy().unwrap().ends_with("card1/device/gpu_busy_percent"));
        assert!(locator.locate_fan_hwmon_dir().unwrap().ends_with("hwmon7"));
    }

    #[test]
    fn test_numeric_child_order() {
        let tmp = TempDir::new().unwrap();
        for dir in ["hwmon10", "hwmon2"] {
            fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        let first = find_hwmon_directory(tmp.path()).unwrap();
        assert!(first.ends_with("hwmon2"));
    }
}
