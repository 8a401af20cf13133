//! Helpers shared by the unit tests

use hub_protocol::{encode_frame, MagMode, SensorFrame, SensorReading, MAX_SENSORS};

/// Frame whose slots are active according to `bitmap`
pub(crate) fn frame(mode: MagMode, bitmap: u32, timestamp: u32) -> SensorFrame {
    let mut readings = [SensorReading::default(); MAX_SENSORS];
    for (i, r) in readings.iter_mut().enumerate() {
        *r = if bitmap & (1 << i) != 0 {
            SensorReading {
                satellite_id: 200 + i as u32,
                active: true,
                accel: [i as i16, 1, -1],
                gyro: [2, -(i as i16), 3],
                mag: mode.has_mag().then_some([4, 5, 6]),
                quat: [1.0, 0.0, 0.0, 0.0],
            }
        } else {
            SensorReading::inactive(i, mode)
        };
    }
    SensorFrame {
        hub_id: 42,
        frame_type: 0,
        reserved: [0; 3],
        timestamp,
        bitmap,
        readings,
        mode,
    }
}

/// Raw wire bytes of [`frame`]
pub(crate) fn frame_bytes(mode: MagMode, bitmap: u32, timestamp: u32) -> Vec<u8> {
    encode_frame(&frame(mode, bitmap, timestamp))
}

/// Lines of a text file
pub(crate) fn read_lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}
