use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use filewire::{crc32, MockLink, PacketType, Session, SessionConfig};

fn bench_crc32(c: &mut Criterion) {
    let data = vec![0xA5u8; 64 * 1024];
    let mut group = c.benchmark_group("crc32");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("64k", |b| b.iter(|| crc32(black_box(&data))));
    group.finish();
}

fn bench_frame_round_trip(c: &mut Criterion) {
    let cfg = SessionConfig { packet_size: 4096, ..SessionConfig::default() };
    let (a, b) = MockLink::pair();
    let mut tx = Session::new(Box::new(a), cfg).unwrap();
    let mut rx =
        Session::new(Box::new(b), SessionConfig { packet_size: 4096, ..SessionConfig::default() })
            .unwrap();
    let payload = vec![0x5Au8; 4096 - 28];

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("send_recv_4k", |b| {
        b.iter(|| {
            tx.send_packet(PacketType::Data, black_box(&payload), 0).unwrap();
            black_box(rx.recv_packet(1000).unwrap());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_crc32, bench_frame_round_trip);
criterion_main!(benches);
