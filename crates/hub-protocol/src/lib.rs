//! Sensor Hub Wire Protocol
//!
//! This crate provides the bit-exact codec spoken between the acquisition
//! client and a wireless sensor hub: control commands (client → hub) and
//! fixed-size sensor frames (hub → client). Everything on the wire is
//! little-endian with no delimiters beyond the fixed sizes.
//!
//! It also owns the tab-separated dump record format, so that recordings
//! written by the client can be replayed by the simulator.

mod command;
mod error;
mod frame;
mod record;

pub use command::{decode_command, encode_command, read_command, CommandFlags, ControlCommand};
pub use error::ProtocolError;
pub use frame::{decode_frame, encode_frame, FrameType, MagMode, SensorFrame, SensorReading};
pub use record::{format_record, parse_record, FIELD_SEPARATOR};

/// Number of reading slots in every sensor frame (hub slot included)
pub const MAX_SENSORS: usize = 11;

/// Number of satellites a control command can address
pub const MAX_SAT_SENSORS: usize = MAX_SENSORS - 1;

/// Wire size constants, derived from field widths
pub mod size {
    use super::{MAX_SAT_SENSORS, MAX_SENSORS};

    const U32: usize = std::mem::size_of::<u32>();
    const I16: usize = std::mem::size_of::<i16>();
    const F32: usize = std::mem::size_of::<f32>();

    /// Command header: flags, rtc_value, num_of_sat
    pub const COMMAND_HEADER: usize = 3 * U32;
    /// Largest command the hub accepts (all satellite slots present)
    pub const COMMAND_MAX: usize = COMMAND_HEADER + MAX_SAT_SENSORS * U32;

    /// Frame header: hub_id, frame_type + 3 reserved bytes, timestamp, bitmap
    pub const FRAME_HEADER: usize = 4 * U32;

    /// One reading without magnetometer: id, accel, gyro, quaternion
    pub const READING_NO_MAG: usize = U32 + 3 * I16 + 3 * I16 + 4 * F32;
    /// One reading with magnetometer: adds mag XYZ and 2 alignment bytes
    pub const READING_MAG: usize = READING_NO_MAG + 3 * I16 + 2;

    /// Whole frame without magnetometer
    pub const FRAME_NO_MAG: usize = FRAME_HEADER + MAX_SENSORS * READING_NO_MAG;
    /// Whole frame with magnetometer
    pub const FRAME_MAG: usize = FRAME_HEADER + MAX_SENSORS * READING_MAG;

    /// Length of a command carrying `num_of_sat` satellite ids
    pub const fn command(num_of_sat: usize) -> usize {
        COMMAND_HEADER + num_of_sat * U32
    }
}
