// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Sensor readings.
//!
//! Every read here degrades to `None` instead of failing: a sensor that
//! cannot be read this cycle is simply ignored by the controller.

use crate::hwmon::{SensorLocator, read_trimmed};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A point-in-time view of everything Better-Auto reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThermalSnapshot {
    pub cpu_temp_c: Option<f64>,
    pub gpu_temp_c: Option<f64>,
    pub cpu_usage_pct: Option<f64>,
    pub gpu_usage_pct: Option<f64>,
}

impl ThermalSnapshot {
    /// Hottest available temperature.
    pub fn hottest(&self) -> Option<f64> {
        max_of(self.cpu_temp_c, self.gpu_temp_c)
    }

    /// Busiest available utilization.
    pub fn busiest(&self) -> Option<f64> {
        max_of(self.cpu_usage_pct, self.gpu_usage_pct)
    }
}

fn max_of(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Read a millidegree file and convert to degrees Celsius.
pub fn read_temperature(path: &Path) -> Option<f64> {
    read_trimmed(path)?
        .parse::<i64>()
        .ok()
        .map(|millic| millic as f64 / 1000.0)
}

/// Read a plain percentage file such as `gpu_busy_percent`.
pub fn read_percentage(path: &Path) -> Option<f64> {
    read_trimmed(path)?.parse::<f64>().ok()
}

// ---------------------------------------------------------------------------
// CPU usage
// ---------------------------------------------------------------------------

/// Aggregate idle/total jiffies from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Parse the aggregate `cpu ...` line. Per-core lines are rejected.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        if fields.next()? != "cpu" {
            return None;
        }

        let values: Vec<u64> = fields.take(8).map_while(|f| f.parse().ok()).collect();
        if values.len() < 4 {
            return None;
        }
        let field = |i: usize| values.get(i).copied().unwrap_or(0);

        // user nice system idle iowait irq softirq steal
        let idle = field(3) + field(4);
        let busy = field(0) + field(1) + field(2) + field(5) + field(6) + field(7);
        Some(Self {
            idle,
            total: idle + busy,
        })
    }

    /// Busy share of the interval between `self` and a later sample.
    pub fn usage_until(&self, later: &CpuTimes) -> Option<f64> {
        let total = later.total.checked_sub(self.total)?;
        let idle = later.idle.checked_sub(self.idle)?;
        if total == 0 {
            return None;
        }
        Some(total.saturating_sub(idle) as f64 / total as f64 * 100.0)
    }
}

/// CPU usage as a delta against the previous sample.
#[derive(Debug)]
pub struct CpuUsage {
    stat_path: PathBuf,
    previous: Mutex<Option<CpuTimes>>,
}

impl CpuUsage {
    pub fn new(stat_path: PathBuf) -> Self {
        Self {
            stat_path,
            previous: Mutex::new(None),
        }
    }

    /// Usage since the last call. The first call after construction or
    /// [`reset`](Self::reset) only records a baseline and returns `None`.
    pub fn sample(&self) -> Option<f64> {
        let contents = std::fs::read_to_string(&self.stat_path).ok()?;
        let now = CpuTimes::parse(contents.lines().next()?)?;

        let mut previous = self.previous.lock();
        let usage = previous.and_then(|before| before.usage_until(&now));
        *previous = Some(now);
        usage
    }

    /// Forget the baseline so a new control session starts clean.
    pub fn reset(&self) {
        *self.previous.lock() = None;
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Reads the located sensors and remembers the last CPU temperature seen.
#[derive(Debug)]
pub struct SensorReader {
    locator: Arc<SensorLocator>,
    cpu_usage: CpuUsage,
    last_cpu_temp: Mutex<Option<f64>>,
}

impl SensorReader {
    pub fn new(locator: Arc<SensorLocator>) -> Self {
        let cpu_usage = CpuUsage::new(locator.paths().proc_stat.clone());
        Self {
            locator,
            cpu_usage,
            last_cpu_temp: Mutex::new(None),
        }
    }

    pub fn locator(&self) -> &SensorLocator {
        &self.locator
    }

    pub fn cpu_temp(&self) -> Option<f64> {
        self.locator.locate_cpu_temp().and_then(read_temperature)
    }

    pub fn gpu_temp(&self) -> Option<f64> {
        self.locator.locate_gpu_temp().and_then(read_temperature)
    }

    pub fn gpu_usage(&self) -> Option<f64> {
        self.locator.locate_gpu_busy().and_then(read_percentage)
    }

    pub fn cpu_usage(&self) -> &CpuUsage {
        &self.cpu_usage
    }

    /// Read everything once and refresh the cached CPU temperature.
    pub fn collect_snapshot(&self) -> ThermalSnapshot {
        let snapshot = ThermalSnapshot {
            cpu_temp_c: self.cpu_temp(),
            gpu_temp_c: self.gpu_temp(),
            cpu_usage_pct: self.cpu_usage.sample(),
            gpu_usage_pct: self.gpu_usage(),
        };

        if let Some(t) = snapshot.cpu_temp_c {
            self.remember_cpu_temp(t);
        }
        snapshot
    }

    pub fn remember_cpu_temp(&self, temp_c: f64) {
        *self.last_cpu_temp.lock() = Some(temp_c);
    }

    pub fn last_cpu_temp(&self) -> Option<f64> {
        *self.last_cpu_temp.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SysfsPaths;
    use std::fs;
    use tempfile::TempDir;

    const STAT_A: &str = "cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 50 0 50 350 50 0 0 0 0 0\n";
    const STAT_B: &str = "cpu  200 0 200 1200 200 0 0 0 0 0\ncpu0 100 0 100 600 100 0 0 0 0 0\n";

    #[test]
    fn test_parse_cpu_line() {
        let t = CpuTimes::parse("cpu  4705 356 584 3699 23 23 0 0 0 0").unwrap();
        assert_eq!(t.idle, 3699 + 23);
        assert_eq!(t.total, 4705 + 356 + 584 + 3699 + 23 + 23);
        assert!(CpuTimes::parse("cpu0 1 2 3 4 5").is_none());
        assert!(CpuTimes::parse("intr 1 2 3").is_none());
    }

    #[test]
    fn test_usage_needs_baseline() {
        let tmp = TempDir::new().unwrap();
        let stat = tmp.path().join("stat");
        fs::write(&stat, STAT_A).unwrap();

        let usage = CpuUsage::new(stat.clone());
        assert_eq!(usage.sample(), None);

        // 200 busy out of 800 elapsed jiffies
        fs::write(&stat, STAT_B).unwrap();
        let pct = usage.sample().unwrap();
        assert!((pct - 25.0).abs() < 1e-9);

        usage.reset();
        assert_eq!(usage.sample(), None);
    }

    #[test]
    fn test_unchanged_counters_report_nothing() {
        let tmp = TempDir::new().unwrap();
        let stat = tmp.path().join("stat");
        fs::write(&stat, STAT_A).unwrap();

        let usage = CpuUsage::new(stat);
        usage.sample();
        assert_eq!(usage.sample(), None);
    }

    #[test]
    fn test_temperature_parsing() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("good");
        let bad = tmp.path().join("bad");
        fs::write(&good, "47500\n").unwrap();
        fs::write(&bad, "n/a\n").unwrap();

        assert_eq!(read_temperature(&good), Some(47.5));
        assert_eq!(read_temperature(&bad), None);
        assert_eq!(read_temperature(&tmp.path().join("missing")), None);
    }

    #[test]
    fn test_snapshot_caches_cpu_temp() {
        let tmp = TempDir::new().unwrap();
        let dev = tmp.path().join("hwmon/hwmon0");
        fs::create_dir_all(&dev).unwrap();
        fs::write(dev.join("name"), "coretemp\n").unwrap();
        fs::write(dev.join("temp1_input"), "61000\n").unwrap();

        let paths = SysfsPaths {
            hwmon_root: tmp.path().join("hwmon"),
            thermal_root: tmp.path().join("thermal"),
            drm_root: tmp.path().join("drm"),
            proc_stat: tmp.path().join("stat"),
            fan_hwmon_parent: tmp.path().join("fans"),
        };
        let reader = SensorReader::new(Arc::new(SensorLocator::new(paths)));
        assert_eq!(reader.last_cpu_temp(), None);

        let snapshot = reader.collect_snapshot();
        assert_eq!(snapshot.cpu_temp_c, Some(61.0));
        assert_eq!(snapshot.gpu_usage_pct, None);
        assert_eq!(reader.last_cpu_temp(), Some(61.0));
    }

    #[test]
    fn test_snapshot_extremes() {
        let snapshot = ThermalSnapshot {
            cpu_temp_c: Some(50.0),
            gpu_temp_c: Some(70.0),
            cpu_usage_pct: None,
            gpu_usage_pct: Some(10.0),
        };
        assert_eq!(snapshot.hottest(), Some(70.0));
        assert_eq!(snapshot.busiest(), Some(10.0));
        assert_eq!(ThermalSnapshot::default().hottest(), None);
    }
}
