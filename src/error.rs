// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Library error type.
//!
//! The `Display` text of every variant is the reason a client sees after
//! `ERROR: ` on the wire, so keep these short and stable.

use std::io;

pub type Result<T> = std::result::Result<T, FanError>;

#[derive(thiserror::Error, Debug)]
pub enum FanError {
    #[error("Hwmon directory not found")]
    HwmonNotFound,

    #[error("Invalid fan mode: {0}")]
    InvalidMode(String),

    #[error("Unknown fan mode {0}")]
    UnknownHardwareMode(String),

    #[error("Invalid fan number: {0}")]
    InvalidFan(String),

    #[error("Unable to read fan mode")]
    ReadMode(#[source] io::Error),

    #[error("Unable to read fan speed")]
    ReadSpeed(#[source] io::Error),

    #[error("Failed to write fan mode")]
    WriteMode(#[source] io::Error),

    #[error("Unable to set fan mode")]
    ModeHelper(String),

    #[error("Failed to set fan speed")]
    SpeedWrite(String),

    #[error("Unable to start better auto control thread")]
    ControllerSpawn(#[source] io::Error),

    #[error("Invalid {0} command format")]
    CommandFormat(&'static str),

    #[error("Unknown command")]
    UnknownCommand,

    #[error("{0}")]
    Profile(#[from] crate::profile::ProfileError),
}

impl FanError {
    /// Wire form of the error, as sent back to clients.
    pub fn to_response(&self) -> String {
        format!("ERROR: {self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_strings() {
        assert_eq!(
            FanError::HwmonNotFound.to_response(),
            "ERROR: Hwmon directory not found"
        );
        assert_eq!(
            FanError::CommandFormat("SET_FAN_SPEED").to_response(),
            "ERROR: Invalid SET_FAN_SPEED command format"
        );
        assert_eq!(
            FanError::UnknownHardwareMode("7".into()).to_response(),
            "ERROR: Unknown fan mode 7"
        );
    }
}
