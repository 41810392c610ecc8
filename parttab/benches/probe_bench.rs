// SPDX-License-Identifier: MIT

// cargo bench -p parttab
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use blkio::prelude::MemBlockIO;
use parttab::{EditOptions, GeometryMode, PartitionFlags, Scheme, guids};

criterion_group!(benches, bench_parse_gpt, bench_parse_embr_chain);
criterion_main!(benches);

const MIB: u64 = 1 << 20;

fn opts() -> EditOptions<'static> {
    EditOptions {
        geometry: GeometryMode::Ignore,
        ..Default::default()
    }
}

fn gpt_image(n: u64) -> Vec<u8> {
    let mut buf = vec![0u8; ((n + 4) * MIB) as usize];
    let mut io = MemBlockIO::new(&mut buf);
    parttab::create_empty_table(&mut io, Scheme::Gpt, &opts()).unwrap();
    let ty = guids::GPT_PARTITION_TYPE_LINUX.to_canonical();
    for i in 0..n {
        let label = format!("part{i}");
        parttab::add_partition(&mut io, (i + 1) * MIB, MIB, &ty, &label, PartitionFlags::empty(), &opts())
            .unwrap();
    }
    buf
}

fn embr_image(n: u64) -> Vec<u8> {
    let mut buf = vec![0u8; ((n + 4) * MIB) as usize];
    let mut io = MemBlockIO::new(&mut buf);
    parttab::create_empty_table(&mut io, Scheme::Mbr, &opts()).unwrap();
    parttab::add_partition(&mut io, MIB, (n + 2) * MIB, "0x0f", "", PartitionFlags::empty(), &opts())
        .unwrap();
    for i in 0..n {
        // Each logical is one block short of a MiB to leave room for the next EBR.
        parttab::add_partition(&mut io, (i + 1) * MIB, MIB - 1024, "0x83", "", PartitionFlags::empty(), &opts())
            .unwrap();
    }
    buf
}

fn bench_parse_gpt(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_gpt");
    for &n in &[4u64, 32, 128] {
        let mut buf = gpt_image(n);
        let mut io = MemBlockIO::new(&mut buf);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &_n| {
            b.iter(|| {
                let t = parttab::parse(&mut io).unwrap().unwrap();
                std::hint::black_box(t.count_in_use())
            });
        });
    }
    group.finish();
}

fn bench_parse_embr_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_embr_chain");
    for &n in &[4u64, 32, 64] {
        let mut buf = embr_image(n);
        let mut io = MemBlockIO::new(&mut buf);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &_n| {
            b.iter(|| {
                let t = parttab::parse(&mut io).unwrap().unwrap();
                std::hint::black_box(t.count_in_use())
            });
        });
    }
    group.finish();
}
