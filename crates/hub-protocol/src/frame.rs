//! Sensor Frames (hub → client)
//!
//! Layout, little-endian:
//!
//! ```text
//! offset  field
//!      0  hub_id      u32
//!      4  frame_type  u8, then 3 reserved bytes
//!      8  timestamp   u32
//!     12  bitmap      u32   (bit i set <=> slot i reported data)
//!     16  11 x reading
//!
//! reading: satellite_id u32, accel 3 x i16, gyro 3 x i16,
//!          [mag 3 x i16, 2 padding bytes,] quat W X Y Z 4 x f32
//! ```

use crate::error::ProtocolError;
use crate::{size, MAX_SENSORS};
use serde::{Deserialize, Serialize};

/// Whether readings carry magnetometer fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MagMode {
    /// Readings are 32 bytes
    WithoutMag,
    /// Readings are 40 bytes (mag + alignment)
    #[default]
    WithMag,
}

impl MagMode {
    /// Build from a boolean "use magnetometer" setting
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            MagMode::WithMag
        } else {
            MagMode::WithoutMag
        }
    }

    /// True if readings carry magnetometer fields
    pub fn has_mag(&self) -> bool {
        matches!(self, MagMode::WithMag)
    }

    /// Wire size of one reading
    pub fn reading_size(&self) -> usize {
        match self {
            MagMode::WithoutMag => size::READING_NO_MAG,
            MagMode::WithMag => size::READING_MAG,
        }
    }

    /// Wire size of one frame
    pub fn frame_size(&self) -> usize {
        match self {
            MagMode::WithoutMag => size::FRAME_NO_MAG,
            MagMode::WithMag => size::FRAME_MAG,
        }
    }
}

/// Sensor layout announced by the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// 10 sensors, right handed
    TenSensorRightHanded = 0,
    /// 10 sensors, left handed
    TenSensorLeftHanded = 1,
    /// 5 sensors, upper body
    FiveSensorUpperBody = 2,
    /// 5 sensors, lower body
    FiveSensorLowerBody = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(FrameType::TenSensorRightHanded),
            1 => Ok(FrameType::TenSensorLeftHanded),
            2 => Ok(FrameType::FiveSensorUpperBody),
            3 => Ok(FrameType::FiveSensorLowerBody),
            other => Err(other),
        }
    }
}

/// One slot of a sensor frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorReading {
    /// Satellite id; the slot index when the slot is inactive
    pub satellite_id: u32,
    /// Whether the slot's bitmap bit was set
    pub active: bool,
    /// Accelerometer X, Y, Z
    pub accel: [i16; 3],
    /// Gyroscope X, Y, Z
    pub gyro: [i16; 3],
    /// Magnetometer X, Y, Z (magnetometer mode only)
    pub mag: Option<[i16; 3]>,
    /// Quaternion W, X, Y, Z
    pub quat: [f32; 4],
}

impl SensorReading {
    /// Reading reported for a slot whose bitmap bit is clear
    pub fn inactive(slot: usize, mode: MagMode) -> Self {
        Self {
            satellite_id: slot as u32,
            active: false,
            mag: mode.has_mag().then_some([0; 3]),
            ..Default::default()
        }
    }
}

/// A decoded sensor frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    /// Unique hub id
    pub hub_id: u32,
    /// Sensor layout variant (see [`FrameType`])
    pub frame_type: u8,
    /// Alignment bytes following the frame type
    pub reserved: [u8; 3],
    /// Hub timestamp offset
    pub timestamp: u32,
    /// Active slot bitmap
    pub bitmap: u32,
    /// Readings, one per slot
    pub readings: [SensorReading; MAX_SENSORS],
    /// Layout the frame was decoded with
    pub mode: MagMode,
}

impl SensorFrame {
    /// True if slot `slot` reported data in this frame
    pub fn is_slot_active(&self, slot: usize) -> bool {
        slot < MAX_SENSORS && self.bitmap & (1 << slot) != 0
    }

    /// Number of slots that reported data
    pub fn active_count(&self) -> usize {
        (0..MAX_SENSORS).filter(|&i| self.is_slot_active(i)).count()
    }

    /// Sensor layout, if the hub sent a known value
    pub fn layout(&self) -> Option<FrameType> {
        FrameType::try_from(self.frame_type).ok()
    }
}

/// Little-endian cursor over a byte slice whose length was checked up front
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i16x3(&mut self) -> [i16; 3] {
        [
            i16::from_le_bytes(self.take()),
            i16::from_le_bytes(self.take()),
            i16::from_le_bytes(self.take()),
        ]
    }

    fn f32x4(&mut self) -> [f32; 4] {
        [
            f32::from_le_bytes(self.take()),
            f32::from_le_bytes(self.take()),
            f32::from_le_bytes(self.take()),
            f32::from_le_bytes(self.take()),
        ]
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }
}

/// Decode a sensor frame
///
/// Fails with `MalformedFrame` unless `bytes` is exactly one frame for
/// `mode`. Slots whose bitmap bit is clear decode as
/// [`SensorReading::inactive`] whatever their bytes contain.
pub fn decode_frame(bytes: &[u8], mode: MagMode) -> Result<SensorFrame, ProtocolError> {
    let expected = mode.frame_size();
    if bytes.len() != expected {
        return Err(ProtocolError::MalformedFrame {
            expected,
            actual: bytes.len(),
        });
    }

    let mut cur = Cursor::new(bytes);
    let hub_id = cur.u32();
    let frame_type = cur.u8();
    let reserved = cur.take::<3>();
    let timestamp = cur.u32();
    let bitmap = cur.u32();

    let mut readings = [SensorReading::default(); MAX_SENSORS];
    for (slot, reading) in readings.iter_mut().enumerate() {
        if bitmap & (1 << slot) == 0 {
            cur.skip(mode.reading_size());
            *reading = SensorReading::inactive(slot, mode);
            continue;
        }

        let satellite_id = cur.u32();
        let accel = cur.i16x3();
        let gyro = cur.i16x3();
        let mag = if mode.has_mag() {
            let mag = cur.i16x3();
            cur.skip(2);
            Some(mag)
        } else {
            None
        };
        let quat = cur.f32x4();

        *reading = SensorReading {
            satellite_id,
            active: true,
            accel,
            gyro,
            mag,
            quat,
        };
    }

    Ok(SensorFrame {
        hub_id,
        frame_type,
        reserved,
        timestamp,
        bitmap,
        readings,
        mode,
    })
}

/// Encode a sensor frame in its own magnetometer mode
///
/// Padding bytes are written as zero.
pub fn encode_frame(frame: &SensorFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frame.mode.frame_size());
    buf.extend_from_slice(&frame.hub_id.to_le_bytes());
    buf.push(frame.frame_type);
    buf.extend_from_slice(&frame.reserved);
    buf.extend_from_slice(&frame.timestamp.to_le_bytes());
    buf.extend_from_slice(&frame.bitmap.to_le_bytes());

    for reading in &frame.readings {
        buf.extend_from_slice(&reading.satellite_id.to_le_bytes());
        for v in reading.accel.iter().chain(reading.gyro.iter()) {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        if frame.mode.has_mag() {
            for v in reading.mag.unwrap_or_default() {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            buf.extend_from_slice(&[0, 0]);
        }
        for q in reading.quat {
            buf.extend_from_slice(&q.to_le_bytes());
        }
    }

    buf
}
