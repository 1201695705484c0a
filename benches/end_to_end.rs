//! End-to-end benchmarks: compile a small ruleset once, then scan buffers
//! of increasing size, alone and in parallel batches.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use scan_engine::{compile, Rules, ScanConfig, Scanner};

const RULES: &str = r#"
private rule is_pe { condition: uint16(0) == 0x5A4D }

rule suspicious_imports : windows {
    strings:
        $a = "VirtualAllocEx" ascii wide
        $b = "WriteProcessMemory" ascii wide
        $c = "CreateRemoteThread" ascii wide
    condition:
        is_pe and 2 of them
}

rule encoded_shell {
    strings:
        $ps = "powershell" nocase
        $enc = "powershell" base64
        $flag = /-e(nc|ncodedcommand)? [A-Za-z0-9+\/=]{20,}/ nocase
    condition:
        any of them
}

rule stub_bytes {
    strings:
        $h = { 55 8B EC [2-6] 6A ?? 68 }
        $x = "This program" xor(1-16)
    condition:
        $h or $x
}
"#;

fn rules() -> Rules {
    compile(RULES).expect("benchmark rules compile")
}

/// Pseudo-random filler with an occasional marker.
fn buffer(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x1234_5678;
    let mut data: Vec<u8> = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect();
    if len >= 4096 {
        data[..2].copy_from_slice(b"MZ");
        data[1024..1038].copy_from_slice(b"VirtualAllocEx");
        data[2048..2066].copy_from_slice(b"WriteProcessMemory");
    }
    data
}

fn bench_scan_single_buffer(c: &mut Criterion) {
    let rules = rules();
    let mut group = c.benchmark_group("scan_single_buffer");

    for size in [1024, 64 * 1024, 1024 * 1024] {
        let data = buffer(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("scan", size), &data, |b, data| {
            let mut scanner = Scanner::new(&rules);
            b.iter(|| black_box(scanner.scan(black_box(data))))
        });
    }

    group.finish();
}

fn bench_scan_with_match_data(c: &mut Criterion) {
    let rules = rules();
    let data = buffer(64 * 1024);
    let config = ScanConfig {
        include_match_data: true,
        ..Default::default()
    };

    c.bench_function("scan_with_match_data", |b| {
        let mut scanner = Scanner::with_config(&rules, config.clone()).expect("valid scan config");
        b.iter(|| black_box(scanner.scan(black_box(&data))))
    });
}

fn bench_scan_many(c: &mut Criterion) {
    let rules = rules();
    let mut group = c.benchmark_group("scan_many");

    for batch_size in [1, 16, 256] {
        let buffers: Vec<Vec<u8>> = (0..batch_size).map(|_| buffer(16 * 1024)).collect();
        let slices: Vec<&[u8]> = buffers.iter().map(Vec::as_slice).collect();
        group.throughput(Throughput::Bytes((batch_size * 16 * 1024) as u64));

        group.bench_with_input(
            BenchmarkId::new("parallel", batch_size),
            &slices,
            |b, slices| b.iter(|| black_box(rules.scan_many(slices))),
        );
        group.bench_with_input(
            BenchmarkId::new("sequential", batch_size),
            &slices,
            |b, slices| {
                b.iter(|| {
                    let mut scanner = Scanner::new(&rules);
                    for data in slices.iter() {
                        black_box(scanner.scan(data));
                    }
                })
            },
        );
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_ruleset", |b| {
        b.iter(|| black_box(compile(black_box(RULES)).expect("benchmark rules compile")))
    });
}

criterion_group!(
    benches,
    bench_scan_single_buffer,
    bench_scan_with_match_data,
    bench_scan_many,
    bench_compile
);
criterion_main!(benches);
