use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use voltage_bsb::{
    BufferedLink, BusAddress, Command, EngineConfig, FieldDescriptor, FieldRegistry, FrameCodec,
    FrameReader, PollScheduler, Telegram, ValueCodec, ValueType,
};

const RET_OUTSIDE_TEMP: [u8; 14] = [
    0xDC, 0x80, 0x42, 0x0E, 0x07, 0x3D, 0x2D, 0x02, 0x15, 0x00, 0x05, 0x60, 0x7F, 0x66,
];

fn bench_frame_codec(c: &mut Criterion) {
    let codec = FrameCodec::new();
    let telegram = Telegram::new(BusAddress::new(0x00, 0x42), Command::Ret, 0x3D2D0215, &[0x00, 0x05, 0x60])
        .unwrap();

    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Bytes(RET_OUTSIDE_TEMP.len() as u64));
    group.bench_function("encode", |b| b.iter(|| codec.encode_telegram(black_box(&telegram))));
    group.bench_function("decode", |b| b.iter(|| codec.decode(black_box(&RET_OUTSIDE_TEMP))));
    group.finish();
}

fn bench_frame_reader(c: &mut Criterion) {
    // Telegrams separated by line noise
    let mut stream = Vec::new();
    for _ in 0..64 {
        stream.extend_from_slice(&[0x00, 0xFF, 0x13]);
        stream.extend_from_slice(&RET_OUTSIDE_TEMP);
    }

    let mut group = c.benchmark_group("reader");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("feed_noisy_stream", |b| {
        b.iter(|| {
            let mut reader = FrameReader::default();
            let mut count = 0usize;
            reader.feed(black_box(&stream), |_| count += 1);
            count
        })
    });
    group.finish();
}

fn bench_value_codec(c: &mut Criterion) {
    let codec = ValueCodec::default();
    c.bench_function("value/decode_temperature", |b| {
        b.iter(|| codec.decode(ValueType::Temperature, black_box(&[0x05, 0x60])))
    });
    c.bench_function("value/encode_temperature", |b| {
        b.iter(|| codec.encode(ValueType::Temperature, black_box(21.5)))
    });
}

fn bench_scheduler_tick(c: &mut Criterion) {
    let mut registry = FieldRegistry::new();
    for i in 0..64u32 {
        registry
            .register(FieldDescriptor::sensor(i + 1, 0x3D2D0000 + i))
            .unwrap();
    }
    let mut engine = PollScheduler::new(EngineConfig::new(), registry, BufferedLink::new(true)).unwrap();
    let mut now = 0u64;

    c.bench_function("scheduler/idle_tick_64_fields", |b| {
        b.iter(|| {
            now += 250;
            engine.tick(black_box(now));
            engine.link_mut().take_outgoing()
        })
    });
}

criterion_group!(
    benches,
    bench_frame_codec,
    bench_frame_reader,
    bench_value_codec,
    bench_scheduler_tick
);
criterion_main!(benches);
