// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Client-daemon protocol over Unix domain sockets.
//!
//! Every message in either direction is a frame: a `u32` byte count in host
//! byte order followed by that many bytes of ASCII text. Requests are a
//! command word plus space separated arguments; responses are a value,
//! `OK`, or `ERROR: <reason>`.

use crate::error::FanError;
use crate::mode::{FanId, FanMode};
use crate::profile::FanProfile;
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest response a client accepts.
pub const MAX_RESPONSE_LEN: u32 = 4096;

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Outcome of reading one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Payload(Vec<u8>),
    /// Peer closed the stream before a length prefix arrived.
    Closed,
    /// Declared length exceeds the bound; nothing past the prefix was read.
    TooLong(u32),
}

/// Read one frame, refusing payloads longer than `max_len`.
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
        Err(e) => return Err(e),
    }

    let len = u32::from_ne_bytes(prefix);
    if len > max_len {
        return Ok(Frame::TooLong(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Frame::Payload(payload))
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetFanSpeed(FanId),
    /// Speed is kept as text; values that are not numbers reach the
    /// actuator unchanged.
    SetFanSpeed(FanId, String),
    SetFanMode(FanMode),
    GetFanMode,
    GetCpuTemp,
    GetAllTemps,
    SetFanProfile(FanProfile),
}

impl Request {
    /// Parse a command line. All argument validation happens here, so a
    /// rejected request never touches the hardware.
    pub fn parse(line: &str) -> Result<Self, FanError> {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };
        let mut args = rest.split_whitespace();

        match command {
            "GET_FAN_SPEED" => {
                let fan = args.next().ok_or(FanError::CommandFormat("GET_FAN_SPEED"))?;
                Ok(Request::GetFanSpeed(fan.parse()?))
            }
            "SET_FAN_SPEED" => match (args.next(), args.next()) {
                (Some(fan), Some(speed)) => Ok(Request::SetFanSpeed(fan.parse()?, speed.to_string())),
                _ => Err(FanError::CommandFormat("SET_FAN_SPEED")),
            },
            "SET_FAN_MODE" => {
                if rest.is_empty() {
                    return Err(FanError::CommandFormat("SET_FAN_MODE"));
                }
                Ok(Request::SetFanMode(rest.parse()?))
            }
            "GET_FAN_MODE" => Ok(Request::GetFanMode),
            "GET_CPU_TEMP" => Ok(Request::GetCpuTemp),
            "GET_ALL_TEMPS" => Ok(Request::GetAllTemps),
            "SET_FAN_PROFILE" => {
                if rest.is_empty() {
                    return Err(FanError::CommandFormat("SET_FAN_PROFILE"));
                }
                Ok(Request::SetFanProfile(FanProfile::parse(rest)?))
            }
            _ => Err(FanError::UnknownCommand),
        }
    }
}

impl FromStr for Request {
    type Err = FanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Request {
    /// Wire form of the request.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::GetFanSpeed(fan) => write!(f, "GET_FAN_SPEED {fan}"),
            Request::SetFanSpeed(fan, speed) => write!(f, "SET_FAN_SPEED {fan} {speed}"),
            Request::SetFanMode(mode) => write!(f, "SET_FAN_MODE {mode}"),
            Request::GetFanMode => f.write_str("GET_FAN_MODE"),
            Request::GetCpuTemp => f.write_str("GET_CPU_TEMP"),
            Request::GetAllTemps => f.write_str("GET_ALL_TEMPS"),
            Request::SetFanProfile(profile) => write!(f, "SET_FAN_PROFILE {profile}"),
        }
    }
}

/// Split a response into its value or error reason.
pub fn parse_response(response: &str) -> Result<&str, &str> {
    match response.strip_prefix("ERROR:") {
        Some(reason) => Err(reason.trim()),
        None => Ok(response),
    }
}
