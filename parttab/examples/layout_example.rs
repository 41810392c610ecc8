// SPDX-License-Identifier: MIT

// cargo run -p parttab --example layout_example
use blkio::prelude::MemBlockIO;
use parttab::guids;
use parttab::{EditOptions, PartitionFlags, PartitionReport, PartitionTable, Scheme};

fn main() {
    let mib = 1u64 << 20;
    let opts = EditOptions::default();

    // MBR: one primary, an extended partition and two logicals.
    let mut buf = vec![0u8; (64 * mib) as usize];
    let mut io = MemBlockIO::new(&mut buf);
    parttab::create_empty_table(&mut io, Scheme::Mbr, &opts).expect("mklabel failed");
    for (at, size, ty) in [(1, 8, "0x0c"), (16, 40, "0x05"), (16, 8, "0x83"), (30, 4, "0x82")] {
        parttab::add_partition(&mut io, at * mib, size * mib, ty, "", PartitionFlags::empty(), &opts)
            .expect("add failed");
    }
    let table = PartitionTable::read(&mut io).expect("parse failed");
    println!("{table}");
    print!("{}", PartitionReport::for_partition(&mut io, 30 * mib, "/dev/mem0").expect("report failed"));

    // GPT: ESP and root.
    let mut buf = vec![0u8; (64 * mib) as usize];
    let mut io = MemBlockIO::new(&mut buf);
    parttab::create_empty_table(&mut io, Scheme::Gpt, &opts).expect("mklabel failed");
    let esp = guids::GPT_PARTITION_TYPE_ESP.to_canonical();
    let root = guids::GPT_PARTITION_TYPE_LINUX.to_canonical();
    parttab::add_partition(&mut io, mib, 16 * mib, &esp, "ESP", PartitionFlags::REQUIRED, &opts)
        .expect("add failed");
    parttab::add_partition(&mut io, 17 * mib, 40 * mib, &root, "rootfs", PartitionFlags::empty(), &opts)
        .expect("add failed");
    let table = PartitionTable::read(&mut io).expect("parse failed");
    println!("{table}");
    print!("{}", PartitionReport::for_disk(&mut io).expect("report failed"));
}
