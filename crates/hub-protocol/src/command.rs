//! Control Commands (client → hub)
//!
//! A command is `u32 flags, u32 rtc_value, u32 num_of_sat` followed by
//! `num_of_sat` satellite ids. The client emits exactly
//! `12 + 4 * num_of_sat` bytes; decoders tolerate anything up to the full
//! 52-byte structure and zero-fill the missing slots.

use crate::error::ProtocolError;
use crate::{size, MAX_SAT_SENSORS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Command flag bitset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CommandFlags(pub u32);

impl CommandFlags {
    /// Command is invalid (bit 0)
    pub const INVALID: Self = Self(1 << 0);
    /// Satellites recording (bit 1)
    pub const ACTIVE: Self = Self(1 << 1);
    /// Diagnostic mode (bit 2)
    pub const DIAG: Self = Self(1 << 2);
    /// Satellites not communicating with the hub (bit 3)
    pub const NOT_SEND: Self = Self(1 << 3);
    /// Calibrate satellites (bit 4)
    pub const CALIBRATE: Self = Self(1 << 4);
    /// Set the satellites' real-time clock (bit 5)
    pub const SET_RTC: Self = Self(1 << 5);
    /// Declare the satellite list (bit 6)
    pub const SET_SATELLITES: Self = Self(1 << 6);
    /// Hub payload carries valid data (bit 30)
    pub const VALID_DATA: Self = Self(1 << 30);

    /// Satellites not recording: ACTIVE clear
    pub const NOT_ACTIVE: Self = Self(0);
    /// Satellites communicating: NOT_SEND clear
    pub const SEND: Self = Self(0);

    /// Raw bit value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if satellites should record
    pub fn is_active(&self) -> bool {
        self.contains(Self::ACTIVE)
    }

    /// True if satellites should stream to the hub
    pub fn is_sending(&self) -> bool {
        !self.contains(Self::NOT_SEND)
    }
}

impl BitOr for CommandFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CommandFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CommandFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#034b})", self.0, self.0)
    }
}

/// A control command sent to the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    /// Command flags
    pub flags: CommandFlags,
    /// RTC value, meaningful when SET_RTC is set
    pub rtc_value: u32,
    /// Satellite ids; its length is `num_of_sat` on the wire
    satellite_ids: Vec<u32>,
}

impl ControlCommand {
    /// Create a command, rejecting more than `MAX_SAT_SENSORS` satellites
    pub fn new(
        flags: CommandFlags,
        rtc_value: u32,
        satellite_ids: Vec<u32>,
    ) -> Result<Self, ProtocolError> {
        if satellite_ids.len() > MAX_SAT_SENSORS {
            return Err(ProtocolError::TooManySatellites(satellite_ids.len()));
        }
        Ok(Self {
            flags,
            rtc_value,
            satellite_ids,
        })
    }

    /// Satellite ids carried by the command
    pub fn satellite_ids(&self) -> &[u32] {
        &self.satellite_ids
    }

    /// Number of satellites as written in the `num_of_sat` field
    pub fn num_of_sat(&self) -> u32 {
        self.satellite_ids.len() as u32
    }

    /// Encoded length under the minimal-length policy
    pub fn wire_len(&self) -> usize {
        size::command(self.satellite_ids.len())
    }
}

/// Encode a command: exactly `12 + 4 * num_of_sat` little-endian bytes
pub fn encode_command(cmd: &ControlCommand) -> Vec<u8> {
    let mut buf = Vec::with_capacity(cmd.wire_len());
    buf.extend_from_slice(&cmd.flags.bits().to_le_bytes());
    buf.extend_from_slice(&cmd.rtc_value.to_le_bytes());
    buf.extend_from_slice(&cmd.num_of_sat().to_le_bytes());
    for id in &cmd.satellite_ids {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    buf
}

/// Decode a command from 12 to 52 bytes
///
/// Slots past the end of `bytes` read as zero; slots past `num_of_sat` are
/// ignored.
pub fn decode_command(bytes: &[u8]) -> Result<ControlCommand, ProtocolError> {
    if bytes.len() < size::COMMAND_HEADER || bytes.len() > size::COMMAND_MAX {
        return Err(ProtocolError::MalformedCommand(format!(
            "length {} outside [{}, {}]",
            bytes.len(),
            size::COMMAND_HEADER,
            size::COMMAND_MAX
        )));
    }
    if bytes.len() % 4 != 0 {
        return Err(ProtocolError::MalformedCommand(format!(
            "length {} is not a whole number of u32 fields",
            bytes.len()
        )));
    }

    // Zero-fill to the fixed structure, then read every slot
    let mut fixed = [0u8; size::COMMAND_MAX];
    fixed[..bytes.len()].copy_from_slice(bytes);
    let words: Vec<u32> = fixed
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();

    let num_of_sat = words[2] as usize;
    if num_of_sat > MAX_SAT_SENSORS {
        return Err(ProtocolError::TooManySatellites(num_of_sat));
    }
    if bytes.len() < size::command(num_of_sat) {
        return Err(ProtocolError::MalformedCommand(format!(
            "num_of_sat is {} but only {} id slots present",
            num_of_sat,
            (bytes.len() - size::COMMAND_HEADER) / 4
        )));
    }

    ControlCommand::new(
        CommandFlags(words[0]),
        words[1],
        words[3..3 + num_of_sat].to_vec(),
    )
}

/// Read one minimal-length command from a byte stream
///
/// Reads the 12-byte header, then exactly `num_of_sat` ids. An EOF before
/// the header surfaces as `UnexpectedEof`.
pub async fn read_command<R>(reader: &mut R) -> Result<ControlCommand, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; size::COMMAND_MAX];
    reader.read_exact(&mut buf[..size::COMMAND_HEADER]).await?;

    let num_of_sat = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;
    if num_of_sat > MAX_SAT_SENSORS {
        return Err(ProtocolError::TooManySatellites(num_of_sat));
    }

    let len = size::command(num_of_sat);
    reader.read_exact(&mut buf[size::COMMAND_HEADER..len]).await?;
    debug!("Read {} command bytes", len);

    decode_command(&buf[..len])
}
