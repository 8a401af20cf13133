//! Dump Record Text Format
//!
//! One tab-separated line per frame:
//! `hubID frameType timestamp bitmap` then, for each of the 11 slots,
//! `satelliteID accel_X accel_Y accel_Z gyro_X gyro_Y gyro_Z
//! [mag_X mag_Y mag_Z] quat_W quat_X quat_Y quat_Z`.

use crate::error::ProtocolError;
use crate::frame::{MagMode, SensorFrame, SensorReading};
use crate::MAX_SENSORS;
use std::fmt::Write;
use std::str::FromStr;

/// Separator between fields of a dump record
pub const FIELD_SEPARATOR: char = '\t';

const HEADER_FIELDS: usize = 4;
const READING_FIELDS_NO_MAG: usize = 11;
const READING_FIELDS_MAG: usize = 14;

/// Format a frame as one dump line (no trailing newline)
///
/// When `sequence` is given it replaces the hub timestamp. Inactive slots
/// print zeros for every field except the satellite id, which echoes the
/// slot index.
pub fn format_record(frame: &SensorFrame, sequence: Option<u64>) -> String {
    let fields = HEADER_FIELDS
        + MAX_SENSORS
            * if frame.mode.has_mag() {
                READING_FIELDS_MAG
            } else {
                READING_FIELDS_NO_MAG
            };
    let mut line = String::with_capacity(fields * 8);

    // Writing into a String cannot fail
    let _ = write!(line, "{}", frame.hub_id);
    let _ = write!(line, "{FIELD_SEPARATOR}{}", frame.frame_type);
    match sequence {
        Some(seq) => {
            let _ = write!(line, "{FIELD_SEPARATOR}{seq}");
        }
        None => {
            let _ = write!(line, "{FIELD_SEPARATOR}{}", frame.timestamp);
        }
    }
    let _ = write!(line, "{FIELD_SEPARATOR}{}", frame.bitmap);

    for (slot, reading) in frame.readings.iter().enumerate() {
        let r = if frame.is_slot_active(slot) {
            *reading
        } else {
            SensorReading::inactive(slot, frame.mode)
        };

        let _ = write!(line, "{FIELD_SEPARATOR}{}", r.satellite_id);
        for v in r.accel.iter().chain(r.gyro.iter()) {
            let _ = write!(line, "{FIELD_SEPARATOR}{v}");
        }
        if frame.mode.has_mag() {
            for v in r.mag.unwrap_or_default() {
                let _ = write!(line, "{FIELD_SEPARATOR}{v}");
            }
        }
        for q in r.quat {
            let _ = write!(line, "{FIELD_SEPARATOR}{q:?}");
        }
    }

    line
}

/// Parse a dump line back into a frame
///
/// The magnetometer mode is inferred from the number of fields. Integers
/// written as signed 32-bit values are accepted and reinterpreted.
pub fn parse_record(line: &str) -> Result<SensorFrame, ProtocolError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mode = if tokens.len() == HEADER_FIELDS + MAX_SENSORS * READING_FIELDS_MAG {
        MagMode::WithMag
    } else if tokens.len() == HEADER_FIELDS + MAX_SENSORS * READING_FIELDS_NO_MAG {
        MagMode::WithoutMag
    } else {
        return Err(ProtocolError::MalformedRecord(format!(
            "{} fields, expected {} or {}",
            tokens.len(),
            HEADER_FIELDS + MAX_SENSORS * READING_FIELDS_NO_MAG,
            HEADER_FIELDS + MAX_SENSORS * READING_FIELDS_MAG
        )));
    };

    let mut it = tokens.into_iter();
    let hub_id = parse_u32(it.next())?;
    let frame_type = parse_u8(it.next())?;
    let timestamp = parse_u32(it.next())?;
    let bitmap = parse_u32(it.next())?;

    let mut readings = [SensorReading::default(); MAX_SENSORS];
    for (slot, reading) in readings.iter_mut().enumerate() {
        let satellite_id = parse_u32(it.next())?;
        let accel = [parse(it.next())?, parse(it.next())?, parse(it.next())?];
        let gyro = [parse(it.next())?, parse(it.next())?, parse(it.next())?];
        let mag = if mode.has_mag() {
            Some([parse(it.next())?, parse(it.next())?, parse(it.next())?])
        } else {
            None
        };
        let quat = [
            parse_f32(it.next())?,
            parse_f32(it.next())?,
            parse_f32(it.next())?,
            parse_f32(it.next())?,
        ];

        *reading = if bitmap & (1 << slot) != 0 {
            SensorReading {
                satellite_id,
                active: true,
                accel,
                gyro,
                mag,
                quat,
            }
        } else {
            SensorReading::inactive(slot, mode)
        };
    }

    Ok(SensorFrame {
        hub_id,
        frame_type,
        reserved: [0; 3],
        timestamp,
        bitmap,
        readings,
        mode,
    })
}

fn parse<T: FromStr>(token: Option<&str>) -> Result<T, ProtocolError> {
    let token = token.ok_or_else(|| ProtocolError::MalformedRecord("missing field".into()))?;
    token
        .parse()
        .map_err(|_| ProtocolError::MalformedRecord(format!("invalid field '{token}'")))
}

fn parse_u32(token: Option<&str>) -> Result<u32, ProtocolError> {
    parse::<u32>(token).or_else(|_| parse::<i32>(token).map(|v| v as u32))
}

fn parse_u8(token: Option<&str>) -> Result<u8, ProtocolError> {
    parse::<u8>(token).or_else(|_| parse::<i8>(token).map(|v| v as u8))
}

fn parse_f32(token: Option<&str>) -> Result<f32, ProtocolError> {
    match token {
        Some(t) if t.eq_ignore_ascii_case("nan") => Ok(f32::NAN),
        _ => parse(token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::sample_frame;

    #[test]
    fn test_field_count_per_mode() {
        let with_mag = format_record(&sample_frame(MagMode::WithMag), None);
        assert_eq!(with_mag.split('\t').count(), 4 + 11 * 14);

        let without = format_record(&sample_frame(MagMode::WithoutMag), None);
        assert_eq!(without.split('\t').count(), 4 + 11 * 11);
        assert!(!without.ends_with('\n'));
    }

    #[test]
    fn test_header_and_sequence_substitution() {
        let frame = sample_frame(MagMode::WithoutMag);
        let line = format_record(&frame, None);
        assert!(line.starts_with("51966\t1\t123456\t2047\t100\t0\t0\t1\t"));

        let line = format_record(&frame, Some(7));
        assert!(line.starts_with("51966\t1\t7\t2047\t"));
    }

    #[test]
    fn test_inactive_slot_prints_zeros() {
        let mut frame = sample_frame(MagMode::WithMag);
        frame.bitmap &= !(1 << 2);

        let line = format_record(&frame, None);
        let fields: Vec<&str> = line.split('\t').collect();
        let slot2 = &fields[4 + 2 * 14..4 + 3 * 14];
        assert_eq!(slot2[0], "2");
        assert!(slot2[1..10].iter().all(|f| *f == "0"));
        assert!(slot2[10..].iter().all(|f| *f == "0.0"));
    }

    #[test]
    fn test_parse_inverts_format() {
        for mode in [MagMode::WithMag, MagMode::WithoutMag] {
            let mut frame = sample_frame(mode);
            frame.bitmap &= !(1 << 5);
            frame.readings[5] = SensorReading::inactive(5, mode);
            frame.readings[1].quat[2] = f32::NAN;

            let parsed = parse_record(&format_record(&frame, None)).unwrap();
            assert_eq!(parsed.mode, mode);
            assert_eq!(parsed.hub_id, frame.hub_id);
            assert_eq!(parsed.bitmap, frame.bitmap);
            assert!(parsed.readings[1].quat[2].is_nan());
            assert_eq!(parsed.readings[5], frame.readings[5]);
            assert_eq!(parsed.readings[10], frame.readings[10]);
        }
    }

    #[test]
    fn test_parse_accepts_signed_and_lowercase_nan() {
        let mut frame = sample_frame(MagMode::WithoutMag);
        frame.hub_id = u32::MAX;
        let line = format_record(&frame, None)
            .replacen("4294967295", "-1", 1)
            .replace("0.5", "nan");

        let parsed = parse_record(&line).unwrap();
        assert_eq!(parsed.hub_id, u32::MAX);
        assert!(parsed.readings[1].quat[1].is_nan());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_record("").is_err());
        assert!(parse_record("1 2 3 4").is_err());

        let line = format_record(&sample_frame(MagMode::WithMag), None).replacen("100", "abc", 1);
        assert!(matches!(
            parse_record(&line),
            Err(ProtocolError::MalformedRecord(_))
        ));
    }
}
