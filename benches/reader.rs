use std::io::{Cursor, Read, Write};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flate2::write::GzEncoder;
use webarc::Reader;

fn synthetic_record(i: usize) -> Vec<u8> {
    let body = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html>benchmark body</html>";
    let mut out = format!(
        "WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: http://example.com/{i}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

fn plain_archive(record_count: usize) -> Vec<u8> {
    (0..record_count).flat_map(synthetic_record).collect()
}

fn gzip_archive(record_count: usize) -> Vec<u8> {
    // record-at-time compression: one member per record
    let mut out = Vec::new();
    for i in 0..record_count {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&synthetic_record(i)).unwrap();
        out.extend_from_slice(&encoder.finish().unwrap());
    }
    out
}

fn drain(reader: &mut Reader) -> u64 {
    let mut total = 0u64;
    let mut scratch = [0u8; 4096];
    while let Some(mut record) = reader.next().unwrap() {
        loop {
            let n = record.body().read(&mut scratch).unwrap();
            if n == 0 {
                break;
            }
            total += n as u64;
        }
    }
    total
}

fn bench_plain_read(c: &mut Criterion) {
    let archive = plain_archive(1000);
    let mut group = c.benchmark_group("reader");
    group.throughput(Throughput::Bytes(archive.len() as u64));
    group.bench_function("read_1000_records_plain", |b| {
        b.iter(|| {
            let mut reader = Reader::new(Cursor::new(black_box(archive.clone()))).unwrap();
            black_box(drain(&mut reader))
        });
    });
    group.finish();
}

fn bench_gzip_read(c: &mut Criterion) {
    let archive = gzip_archive(1000);
    let mut group = c.benchmark_group("reader");
    group.throughput(Throughput::Bytes(archive.len() as u64));
    group.bench_function("read_1000_records_gzip", |b| {
        b.iter(|| {
            let mut reader = Reader::new(Cursor::new(black_box(archive.clone()))).unwrap();
            black_box(drain(&mut reader))
        });
    });
    group.finish();
}

criterion_group!(benches, bench_plain_read, bench_gzip_read);
criterion_main!(benches);
