use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hub_protocol::{
    decode_frame, encode_frame, format_record, MagMode, SensorFrame, SensorReading, MAX_SENSORS,
};

fn frame(mode: MagMode) -> SensorFrame {
    let mut readings = [SensorReading::default(); MAX_SENSORS];
    for (i, r) in readings.iter_mut().enumerate() {
        *r = SensorReading {
            satellite_id: i as u32,
            active: true,
            accel: [1, 2, 3],
            gyro: [4, 5, 6],
            mag: mode.has_mag().then_some([7, 8, 9]),
            quat: [1.0, 0.0, 0.0, 0.0],
        };
    }
    SensorFrame {
        hub_id: 1,
        frame_type: 0,
        reserved: [0; 3],
        timestamp: 0,
        bitmap: 0x7FF,
        readings,
        mode,
    }
}

fn bench_decode(c: &mut Criterion) {
    let bytes = encode_frame(&frame(MagMode::WithMag));
    c.bench_function("decode_frame_mag", |b| {
        b.iter(|| decode_frame(black_box(&bytes), MagMode::WithMag))
    });
}

fn bench_format(c: &mut Criterion) {
    let frame = frame(MagMode::WithMag);
    c.bench_function("format_record_mag", |b| {
        b.iter(|| format_record(black_box(&frame), None))
    });
}

criterion_group!(benches, bench_decode, bench_format);
criterion_main!(benches);
