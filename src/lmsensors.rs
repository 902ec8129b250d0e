// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! lm-sensors front end.
//!
//! `GET_CPU_TEMP` and `GET_ALL_TEMPS` prefer what `sensors` reports over the
//! raw hwmon files because it already resolves chip quirks and offsets.
//! A missing binary or unparsable output is never an error for the caller.

use std::fmt;
use std::process::Command;

/// Highest value accepted from `sensors -u` as a CPU temperature.
const MAX_PLAUSIBLE_TEMP_C: i64 = 150;

/// Runs the `sensors` program.
#[derive(Debug, Clone)]
pub struct LmSensors {
    program: String,
}

impl LmSensors {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Option<String> {
        let output = match Command::new(&self.program).args(args).output() {
            Ok(output) => output,
            Err(e) => {
                log::debug!("Could not run {}: {e}", self.program);
                return None;
            }
        };
        if !output.status.success() {
            log::debug!("{} {:?} exited with {}", self.program, args, output.status);
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// First `tempN_input` reported in raw mode, in whole degrees.
    pub fn cpu_temp(&self) -> Option<i64> {
        self.run(&["-A", "-u"]).and_then(|out| parse_first_temp_input(&out))
    }

    /// Package, core and NVMe temperatures from the human-readable table.
    pub fn all_temps(&self) -> AllTemps {
        self.run(&["-A"])
            .map(|out| parse_all_temps(&out))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse `sensors -A -u` output:
///
/// ```text
/// coretemp-isa-0000
/// Package id 0:
///   temp1_input: 48.000
///   temp1_max: 100.000
/// ```
pub fn parse_first_temp_input(output: &str) -> Option<i64> {
    let line = output.lines().map(str::trim).find(|l| {
        l.starts_with("temp")
            && l.split(':')
                .next()
                .is_some_and(|key| key.ends_with("_input"))
    })?;

    let value = line.split_once(':')?.1.trim();
    let whole = value.split('.').next()?;
    let temp = whole.parse::<i64>().ok()?;
    (0..=MAX_PLAUSIBLE_TEMP_C).contains(&temp).then_some(temp)
}

/// Temperatures for `GET_ALL_TEMPS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllTemps {
    pub package: Option<i64>,
    pub cores: Vec<i64>,
    pub nvme: Vec<i64>,
}

impl AllTemps {
    pub fn is_empty(&self) -> bool {
        self.package.is_none() && self.cores.is_empty() && self.nvme.is_empty()
    }
}

impl fmt::Display for AllTemps {
    /// `PKG:48|CORES:40,39|NVME:37,36`, sections omitted when empty,
    /// `N/A` when nothing was found.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sections = Vec::new();
        if let Some(pkg) = self.package {
            sections.push(format!("PKG:{pkg}"));
        }
        if !self.cores.is_empty() {
            sections.push(format!("CORES:{}", join(&self.cores)));
        }
        if !self.nvme.is_empty() {
            sections.push(format!("NVME:{}", join(&self.nvme)));
        }

        if sections.is_empty() {
            f.write_str("N/A")
        } else {
            f.write_str(&sections.join("|"))
        }
    }
}

fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the `sensors -A` table.
pub fn parse_all_temps(output: &str) -> AllTemps {
    let mut temps = AllTemps::default();

    for line in output.lines() {
        if temps.package.is_none() && line.contains("Package id") {
            temps.package = reading(line);
        }
        if line.contains("Core") && line.contains(':') {
            temps.cores.extend(reading(line));
        }
        if line.contains("Composite:") {
            temps.nvme.extend(reading(line));
        }
    }

    temps
}

/// Integer part of the first `+NN.N°C` on a line.
fn reading(line: &str) -> Option<i64> {
    let start = line.find('+')? + 1;
    let rest = &line[start..];
    let end = rest.find("°C")?;
    rest[..end].trim().parse::<f64>().ok().map(|v| v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
coretemp-isa-0000
Package id 0:  +48.0°C  (high = +100.0°C, crit = +100.0°C)
Core 0:        +40.0°C  (high = +100.0°C, crit = +100.0°C)
Core 4:        +39.5°C  (high = +100.0°C, crit = +100.0°C)

nvme-pci-0100
Composite:    +37.9°C  (low  = -273.1°C, high = +81.8°C)

nvme-pci-0200
Composite:    +36.0°C  (low  = -5.2°C, high = +84.8°C)
";

    #[test]
    fn test_parse_table() {
        let temps = parse_all_temps(TABLE);
        assert_eq!(temps.package, Some(48));
        assert_eq!(temps.cores, vec![40, 39]);
        assert_eq!(temps.nvme, vec![37, 36]);
        assert_eq!(temps.to_string(), "PKG:48|CORES:40,39|NVME:37,36");
    }

    #[test]
    fn test_sections_are_optional() {
        let temps = parse_all_temps("nvme-pci-0100\nComposite:    +41.2°C\n");
        assert_eq!(temps.to_string(), "NVME:41");
        assert_eq!(parse_all_temps("").to_string(), "N/A");
        assert!(parse_all_temps("garbage\n").is_empty());
    }

    #[test]
    fn test_raw_mode_first_input() {
        let raw = "\
acpitz-acpi-0
temp1:
  temp1_crit: 120.000
  temp1_input: 53.000
";
        assert_eq!(parse_first_temp_input(raw), Some(53));
        assert_eq!(parse_first_temp_input("temp1:\n  temp1_input: 180.000\n"), None);
        assert_eq!(parse_first_temp_input("nothing here"), None);
    }

    #[test]
    fn test_missing_program_is_quiet() {
        let sensors = LmSensors::new("/nonexistent/sensors-binary");
        assert_eq!(sensors.cpu_temp(), None);
        assert!(sensors.all_temps().is_empty());
    }
}
