use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rdt::{Digest, Packet, PacketCodec, ReorderBuffer, DEFAULT_MAX_DATAGRAM_SIZE};

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for digest in [Digest::Md5, Digest::Crc32] {
        let codec = PacketCodec::new(digest, DEFAULT_MAX_DATAGRAM_SIZE);
        let payload = vec![0xAB; codec.max_payload()];
        let encoded = codec.encode(7, &payload).unwrap();

        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("encode", format!("{:?}", digest)),
            &payload,
            |b, payload| b.iter(|| codec.encode(7, payload).unwrap()),
        );
        group.bench_with_input(
            BenchmarkId::new("decode", format!("{:?}", digest)),
            &encoded,
            |b, encoded| b.iter(|| codec.decode(encoded).unwrap()),
        );
    }

    group.finish();
}

fn bench_split(c: &mut Criterion) {
    let data = Bytes::from(vec![0x5A; 4 * 1024 * 1024]);
    let max_payload = PacketCodec::new(Digest::Md5, DEFAULT_MAX_DATAGRAM_SIZE).max_payload();

    let mut group = c.benchmark_group("split");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("4MB", |b| b.iter(|| Packet::split(0, &data, max_payload)));
    group.finish();
}

fn bench_reorder(c: &mut Criterion) {
    let payload = Bytes::from_static(&[0u8; 64]);

    c.bench_function("reorder_reverse_window_64", |b| {
        b.iter(|| {
            let mut buffer = ReorderBuffer::with_horizon(64);
            for seq in (1..64).rev() {
                buffer.insert(0, seq, payload.clone());
            }
            buffer.next_missing(1)
        })
    });
}

criterion_group!(benches, bench_codec, bench_split, bench_reorder);
criterion_main!(benches);
