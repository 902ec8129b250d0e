// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan modes and fan identifiers.
//!
//! [`FanMode`] is what a client asked for. [`PwmMode`] is what the firmware
//! understands through `pwm1_enable`; several requested modes share one
//! hardware encoding.

use crate::error::FanError;
use std::fmt;
use std::str::FromStr;

/// Mode requested by a client (or forced by the daemon).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    Auto,
    Manual,
    Max,
    BetterAuto,
    Profile,
}

impl FanMode {
    pub const ALL: [FanMode; 5] = [
        FanMode::Auto,
        FanMode::Manual,
        FanMode::Max,
        FanMode::BetterAuto,
        FanMode::Profile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FanMode::Auto => "AUTO",
            FanMode::Manual => "MANUAL",
            FanMode::Max => "MAX",
            FanMode::BetterAuto => "BETTER_AUTO",
            FanMode::Profile => "PROFILE",
        }
    }

    /// Hardware value that has to be asserted for this mode. Better-Auto and
    /// Profile drive the fans themselves, so they need manual PWM.
    pub fn pwm_mode(self) -> PwmMode {
        match self {
            FanMode::Auto => PwmMode::Auto,
            FanMode::Max => PwmMode::Max,
            FanMode::Manual | FanMode::BetterAuto | FanMode::Profile => PwmMode::Manual,
        }
    }

    /// Modes that need the watchdog because the firmware drifts back to auto.
    pub fn needs_watchdog(self) -> bool {
        !matches!(self, FanMode::Auto | FanMode::BetterAuto)
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanMode {
    type Err = FanError;

    /// Accepts free text: `better auto`, `Better-Auto` and `BETTER_AUTO` are
    /// all the same mode.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_mode_name(s);
        FanMode::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or(FanError::InvalidMode(normalized))
    }
}

/// Trim, map `-` and spaces to `_`, uppercase.
pub fn normalize_mode_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Values of the `pwm1_enable` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmMode {
    /// Full speed.
    Max = 0,
    Manual = 1,
    Auto = 2,
}

impl PwmMode {
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Name passed to the mode helper script.
    pub fn helper_arg(self) -> &'static str {
        match self {
            PwmMode::Auto => "AUTO",
            PwmMode::Manual => "MANUAL",
            PwmMode::Max => "MAX",
        }
    }

    /// Decode a raw `pwm1_enable` reading. Anything unexpected is reported,
    /// never coerced.
    pub fn from_raw(raw: &str) -> Result<Self, FanError> {
        match raw.trim() {
            "2" => Ok(PwmMode::Auto),
            "1" => Ok(PwmMode::Manual),
            "0" => Ok(PwmMode::Max),
            other => Err(FanError::UnknownHardwareMode(other.to_string())),
        }
    }

    /// The client-facing mode this register value stands for.
    pub fn as_fan_mode(self) -> FanMode {
        match self {
            PwmMode::Auto => FanMode::Auto,
            PwmMode::Manual => FanMode::Manual,
            PwmMode::Max => FanMode::Max,
        }
    }
}

/// One of the two platform fans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanId {
    One,
    Two,
}

impl FanId {
    pub const BOTH: [FanId; 2] = [FanId::One, FanId::Two];

    /// Zero-based slot for per-fan arrays.
    pub fn index(self) -> usize {
        match self {
            FanId::One => 0,
            FanId::Two => 1,
        }
    }

    /// One-based number used in sysfs names and on the wire.
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }
}

impl fmt::Display for FanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl FromStr for FanId {
    type Err = FanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(FanId::One),
            "2" => Ok(FanId::Two),
            other => Err(FanError::InvalidFan(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_name_normalization() {
        assert_eq!("better auto".parse::<FanMode>().unwrap(), FanMode::BetterAuto);
        assert_eq!(" Better-Auto\n".parse::<FanMode>().unwrap(), FanMode::BetterAuto);
        assert_eq!("manual".parse::<FanMode>().unwrap(), FanMode::Manual);
        assert_eq!("PROFILE".parse::<FanMode>().unwrap(), FanMode::Profile);
    }

    #[test]
    fn test_unknown_mode_keeps_normalized_name() {
        let err = "turbo-boost".parse::<FanMode>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid fan mode: TURBO_BOOST");
    }

    #[test]
    fn test_pwm_encoding() {
        assert_eq!(FanMode::Auto.pwm_mode().value(), 2);
        assert_eq!(FanMode::Manual.pwm_mode().value(), 1);
        assert_eq!(FanMode::Max.pwm_mode().value(), 0);
        assert_eq!(FanMode::BetterAuto.pwm_mode(), PwmMode::Manual);
        assert_eq!(FanMode::Profile.pwm_mode(), PwmMode::Manual);
    }

    #[test]
    fn test_raw_register_decoding() {
        assert_eq!(PwmMode::from_raw("2\n").unwrap(), PwmMode::Auto);
        assert_eq!(PwmMode::from_raw("0").unwrap().as_fan_mode(), FanMode::Max);
        assert!(matches!(
            PwmMode::from_raw("3"),
            Err(FanError::UnknownHardwareMode(v)) if v == "3"
        ));
    }

    #[test]
    fn test_watchdog_modes() {
        assert!(!FanMode::Auto.needs_watchdog());
        assert!(!FanMode::BetterAuto.needs_watchdog());
        assert!(FanMode::Manual.needs_watchdog());
        assert!(FanMode::Max.needs_watchdog());
        assert!(FanMode::Profile.needs_watchdog());
    }

    #[test]
    fn test_fan_ids() {
        assert_eq!("2".parse::<FanId>().unwrap(), FanId::Two);
        assert_eq!(FanId::One.number(), 1);
        assert!("3".parse::<FanId>().is_err());
    }
}
