// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan profiles sent with `SET_FAN_PROFILE`.
//!
//! A profile is a flat list of `temp rpm` pairs, e.g. `"40 2800 60 3800"`.
//! Only the first point is applied when the profile is set; the rest are
//! validated and logged but not consulted afterwards.

use std::fmt;
use std::str::FromStr;

pub const MIN_PROFILE_TEMP_C: i64 = 30;
pub const MAX_PROFILE_TEMP_C: i64 = 100;
/// Lowest non-zero RPM a point may request.
pub const MIN_PROFILE_RPM: i64 = 600;
pub const MAX_PROFILE_RPM: i64 = 6100;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Invalid temperature {0} (valid range: 30-100)")]
    Temperature(i64),

    #[error("Invalid RPM {0} (must be 0 or >= 600)")]
    RpmTooLow(i64),

    #[error("Invalid RPM {0} (maximum is 6100)")]
    RpmTooHigh(i64),

    #[error("Temperatures must be ascending ({1} after {0})")]
    NotAscending(i64, i64),

    #[error("Invalid profile value {0:?}")]
    NotANumber(String),

    #[error("Profile point {0} has no RPM")]
    MissingRpm(i64),

    #[error("No valid profile points provided")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilePoint {
    pub temp_c: i64,
    pub rpm: i64,
}

impl ProfilePoint {
    fn validate(self) -> Result<Self, ProfileError> {
        if !(MIN_PROFILE_TEMP_C..=MAX_PROFILE_TEMP_C).contains(&self.temp_c) {
            return Err(ProfileError::Temperature(self.temp_c));
        }
        if self.rpm != 0 && self.rpm < MIN_PROFILE_RPM {
            return Err(ProfileError::RpmTooLow(self.rpm));
        }
        if self.rpm > MAX_PROFILE_RPM {
            return Err(ProfileError::RpmTooHigh(self.rpm));
        }
        Ok(self)
    }
}

/// A validated, non-empty profile with strictly ascending temperatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanProfile {
    points: Vec<ProfilePoint>,
}

impl FanProfile {
    pub fn new(points: Vec<ProfilePoint>) -> Result<Self, ProfileError> {
        let mut previous: Option<i64> = None;
        for point in &points {
            point.validate()?;
            if let Some(prev) = previous {
                if point.temp_c <= prev {
                    return Err(ProfileError::NotAscending(prev, point.temp_c));
                }
            }
            previous = Some(point.temp_c);
        }
        if points.is_empty() {
            return Err(ProfileError::Empty);
        }
        Ok(Self { points })
    }

    /// Parse whitespace separated `temp rpm` pairs.
    pub fn parse(input: &str) -> Result<Self, ProfileError> {
        let mut numbers = input.split_whitespace().map(|token| {
            token
                .parse::<i64>()
                .map_err(|_| ProfileError::NotANumber(token.to_string()))
        });

        let mut points = Vec::new();
        while let Some(temp_c) = numbers.next() {
            let temp_c = temp_c?;
            let rpm = numbers.next().ok_or(ProfileError::MissingRpm(temp_c))??;
            points.push(ProfilePoint { temp_c, rpm });
        }
        Self::new(points)
    }

    pub fn points(&self) -> &[ProfilePoint] {
        &self.points
    }

    /// The point applied when the profile is set.
    pub fn first(&self) -> ProfilePoint {
        // Non-empty by construction.
        self.points[0]
    }
}

impl FromStr for FanProfile {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FanProfile {
    /// Wire form: `40 2800 60 3800`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, point) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{} {}", point.temp_c, point.rpm)?;
        }
        Ok(())
    }
}
