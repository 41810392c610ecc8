// SPDX-License-Identifier: MIT

use blkio::prelude::*;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::Scheme;
use crate::embr;
use crate::errors::*;
use crate::geometry::{DEFAULT_CHS_GEOMETRY, lba_to_chs};
use crate::io_ext::BlockIOLbaExt;
use crate::table::{PartitionEntry, PartitionTable, Record};

pub const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const MBR_RECORDS_OFFSET: u64 = 446;
pub const MBR_RECORD_SIZE: u64 = 16;
pub const PROTECTIVE_GPT: u8 = 0xEE;
pub const BOOTABLE: u8 = 0x80;
/// Type used for the EMBR "next link" record.
pub const EXTENDED_LINK_TYPE: u8 = 0x05;

/// DOS extended container types (CHS, LBA, Linux).
#[inline]
pub fn is_extended_type(t: u8) -> bool {
    matches!(t, 0x05 | 0x0F | 0x85)
}

/// One 16-byte partition record.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct MbrRecord {
    pub boot_flag: u8,
    pub start_chs: [u8; 3],
    pub part_type: u8,
    pub end_chs: [u8; 3],
    pub start_lba: U32<LittleEndian>,
    pub sectors: U32<LittleEndian>,
}

impl MbrRecord {
    #[inline]
    pub fn new_empty() -> Self {
        Self::new_zeroed()
    }

    /// Builds a record; `abs_start` is only used for the CHS fields.
    pub fn new(boot: bool, part_type: u8, start_lba: u32, sectors: u32, abs_start: u64) -> Self {
        Self::with_geometry(boot, part_type, start_lba, sectors, abs_start, DEFAULT_CHS_GEOMETRY)
    }

    /// Like [`MbrRecord::new`], with CHS fields computed for `geometry`.
    pub fn with_geometry(
        boot: bool,
        part_type: u8,
        start_lba: u32,
        sectors: u32,
        abs_start: u64,
        geometry: DiskGeometry,
    ) -> Self {
        let abs_end = abs_start + (sectors as u64).saturating_sub(1);
        Self {
            boot_flag: if boot { BOOTABLE } else { 0x00 },
            start_chs: lba_to_chs(abs_start, geometry),
            part_type,
            end_chs: lba_to_chs(abs_end, geometry),
            start_lba: U32::new(start_lba),
            sectors: U32::new(sectors),
        }
    }

    pub fn new_protective(total_blocks: u64) -> Self {
        let sectors = total_blocks.saturating_sub(1).min(u32::MAX as u64) as u32;
        Self {
            boot_flag: 0x00,
            start_chs: [0x00, 0x02, 0x00],
            part_type: PROTECTIVE_GPT,
            end_chs: [0xFE, 0xFF, 0xFF],
            start_lba: U32::new(1),
            sectors: U32::new(sectors),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start_lba.get() == 0 && self.sectors.get() == 0
    }

    #[inline]
    pub fn is_bootable(&self) -> bool {
        self.boot_flag == BOOTABLE
    }

    #[inline]
    pub fn set_bootable(&mut self, boot: bool) {
        self.boot_flag = if boot { BOOTABLE } else { 0x00 };
    }

    #[inline]
    pub fn is_protective(&self) -> bool {
        self.part_type == PROTECTIVE_GPT
    }
}

/// The 512-byte MBR/EBR sector layout.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug)]
#[repr(C)]
pub struct MbrSector {
    pub boot_code: [u8; 446],
    pub records: [MbrRecord; 4],
    pub signature: [u8; 2],
}

impl MbrSector {
    #[inline]
    pub fn new_empty() -> Self {
        let mut s = Self::new_zeroed();
        s.signature = MBR_SIGNATURE;
        s
    }

    #[inline]
    pub fn new_protective(total_blocks: u64) -> Self {
        let mut s = Self::new_empty();
        s.records[0] = MbrRecord::new_protective(total_blocks);
        s
    }

    #[inline]
    pub fn has_valid_signature(&self) -> bool {
        self.signature == MBR_SIGNATURE
    }

    /// Boot flags other than `0x00`/`0x80` mean this is not a partition sector.
    #[inline]
    pub fn has_valid_boot_flags(&self) -> bool {
        self.records
            .iter()
            .all(|r| r.boot_flag == 0x00 || r.boot_flag == BOOTABLE)
    }
}

/// Outcome of probing LBA 0.
#[derive(Debug)]
pub enum MbrProbe {
    NotPresent,
    /// A `0xEE` record: the disk is GPT.
    Protective,
    Table(PartitionTable),
}

/// Reads the 512-byte sector at the start of the block holding `offset`.
pub(crate) fn read_sector<IO: BlockIO + ?Sized>(io: &mut IO, offset: u64) -> PartResult<MbrSector> {
    let bs = io.logical_block_size() as u64;
    let block = io.read_blocks(offset / bs, bs, 1)?;
    let (sector, _) = MbrSector::read_from_prefix(&block)
        .map_err(|_| PartError::MalformedField("block smaller than an MBR sector"))?;
    Ok(sector)
}

/// Rewrites the MBR-layout sector at `offset`, as a whole block.
pub(crate) fn write_sector<IO: BlockIO + ?Sized>(
    io: &mut IO,
    offset: u64,
    sector: &MbrSector,
) -> PartResult {
    let bs = io.logical_block_size() as u64;
    let lba = offset / bs;
    let mut block = io.read_blocks(lba, bs, 1)?;
    sector
        .write_to_prefix(&mut block)
        .map_err(|_| PartError::MalformedField("block smaller than an MBR sector"))?;
    io.write_at_lba(lba, bs, &block)?;
    Ok(())
}

/// Probes LBA 0 for an MBR.
pub fn parse_mbr<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult<MbrProbe> {
    let bs = io.logical_block_size() as u64;
    if io.size_bytes() < bs || bs < 512 {
        return Ok(MbrProbe::NotPresent);
    }
    let sector = read_sector(io, 0)?;
    if !sector.has_valid_signature() {
        log::debug!("mbr: no 0x55AA signature");
        return Ok(MbrProbe::NotPresent);
    }
    if !sector.has_valid_boot_flags() {
        log::debug!("mbr: invalid boot flags, not a partition sector");
        return Ok(MbrProbe::NotPresent);
    }
    if sector.records.iter().any(|r| r.is_protective()) {
        log::debug!("mbr: protective record found, trying GPT");
        return Ok(MbrProbe::Protective);
    }

    let mut table = PartitionTable::new(Scheme::Mbr, 0, io.size_bytes(), bs as u32);
    for (slot, rec) in sector.records.iter().enumerate() {
        let mut entry = PartitionEntry {
            scheme: Scheme::Mbr,
            record: Record::Mbr(*rec),
            record_offset: MBR_RECORDS_OFFSET + slot as u64 * MBR_RECORD_SIZE,
            base_offset: 0,
            block_size: bs,
            slot,
            nested: None,
        };
        if entry.in_use() && entry.is_extended() {
            if table.entries.iter().any(|e| e.in_use() && e.is_extended()) {
                return Err(PartError::Malformed("more than one extended partition"));
            }
            let nested = embr::walk_chain(io, rec.start_lba.get() as u64, rec.sectors.get() as u64)?;
            entry.nested = Some(Box::new(nested));
        }
        table.entries.push(entry);
    }

    table.validate()?;
    log::debug!("mbr: {} partition(s)", table.count_in_use());
    Ok(MbrProbe::Table(table))
}

/// Replaces the four records of the MBR at LBA 0, keeping its boot code.
pub fn write_records<IO: BlockIO + ?Sized>(io: &mut IO, records: &[MbrRecord; 4]) -> PartResult {
    let mut sector = read_sector(io, 0)?;
    sector.records = *records;
    sector.signature = MBR_SIGNATURE;
    write_sector(io, 0, &sector)?;
    io.flush()?;
    Ok(())
}

/// Writes an MBR with zero boot code and four empty slots.
pub fn write_empty<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult {
    write_sector(io, 0, &MbrSector::new_empty())?;
    io.flush()?;
    Ok(())
}

/// Writes a protective MBR covering `total_blocks`. Not flushed.
pub(crate) fn write_protective<IO: BlockIO + ?Sized>(io: &mut IO, total_blocks: u64) -> PartResult {
    write_sector(io, 0, &MbrSector::new_protective(total_blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout() {
        assert_eq!(core::mem::size_of::<MbrRecord>(), 16);
        assert_eq!(core::mem::size_of::<MbrSector>(), 512);

        let r = MbrRecord::new(true, 0x83, 2048, 8192, 2048);
        let b = r.as_bytes();
        assert_eq!(b[0], 0x80);
        assert_eq!(b[4], 0x83);
        assert_eq!(&b[8..12], &2048u32.to_le_bytes());
        assert_eq!(&b[12..16], &8192u32.to_le_bytes());
    }

    #[test]
    fn empty_mbr_parses_as_four_free_slots() {
        let mut buf = vec![0u8; 512 * 64];
        let mut io = MemBlockIO::new(&mut buf);
        write_empty(&mut io).unwrap();

        let MbrProbe::Table(t) = parse_mbr(&mut io).unwrap() else {
            panic!("expected an MBR table");
        };
        assert_eq!(t.num_entries(), 4);
        assert!(t.entries().iter().all(|e| !e.in_use()));
        assert_eq!(t.count_in_use(), 0);
    }

    #[test]
    fn protective_record_defers_to_gpt() {
        let mut buf = vec![0u8; 512 * 64];
        let mut io = MemBlockIO::new(&mut buf);
        write_protective(&mut io, 64).unwrap();
        assert!(matches!(parse_mbr(&mut io).unwrap(), MbrProbe::Protective));
    }

    #[test]
    fn rejects_missing_signature_and_bad_boot_flag() {
        let mut buf = vec![0u8; 512 * 64];
        {
            let mut io = MemBlockIO::new(&mut buf);
            assert!(matches!(parse_mbr(&mut io).unwrap(), MbrProbe::NotPresent));
        }
        buf[510] = 0x55;
        buf[511] = 0xAA;
        buf[446] = 0x42;
        let mut io = MemBlockIO::new(&mut buf);
        assert!(matches!(parse_mbr(&mut io).unwrap(), MbrProbe::NotPresent));
    }

    #[test]
    fn boot_code_survives_record_rewrite() {
        let mut buf = vec![0u8; 512 * 64];
        buf[..4].copy_from_slice(&[0xEB, 0x63, 0x90, 0x10]);
        let mut io = MemBlockIO::new(&mut buf);
        let mut recs = [MbrRecord::new_empty(); 4];
        recs[1] = MbrRecord::new(false, 0x0C, 8, 16, 8);
        write_records(&mut io, &recs).unwrap();

        let s = io.as_slice();
        assert_eq!(&s[..4], &[0xEB, 0x63, 0x90, 0x10]);
        assert_eq!(&s[510..512], &MBR_SIGNATURE);
        assert_eq!(s[446 + 16 + 4], 0x0C);
    }

    #[test]
    fn overlapping_primaries_are_malformed() {
        let mut buf = vec![0u8; 512 * 64];
        let mut io = MemBlockIO::new(&mut buf);
        let mut recs = [MbrRecord::new_empty(); 4];
        recs[0] = MbrRecord::new(false, 0x83, 1, 20, 1);
        recs[1] = MbrRecord::new(false, 0x83, 10, 20, 10);
        write_records(&mut io, &recs).unwrap();
        assert!(matches!(parse_mbr(&mut io), Err(PartError::Malformed(_))));
    }
}
