// SPDX-License-Identifier: MIT

//! Logical partitions chained through EBR sectors inside a DOS extended partition.
//!
//! Two LBA bases apply: a logical record is relative to the EBR holding it,
//! while the link to the next EBR is relative to the extended partition start.

use std::collections::BTreeSet;

use blkio::prelude::*;

use crate::Scheme;
use crate::errors::*;
use crate::geometry::DEFAULT_CHS_GEOMETRY;
use crate::mbr::{self, EXTENDED_LINK_TYPE, MBR_RECORDS_OFFSET, MbrRecord, MbrSector};
use crate::table::{PartitionEntry, PartitionTable, Record};

/// A logical partition as the chain writer lays it out (absolute LBAs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Logical {
    pub start_lba: u64,
    pub sectors: u64,
    pub part_type: u8,
    pub boot: bool,
    /// LBA of the EBR already describing this logical on disk, if any.
    pub ebr_lba: Option<u64>,
}

impl Logical {
    pub(crate) fn from_entry(e: &PartitionEntry) -> Option<Self> {
        match &e.record {
            Record::Mbr(r) => Some(Self {
                start_lba: e.start_lba(),
                sectors: r.sectors.get() as u64,
                part_type: r.part_type,
                boot: r.is_bootable(),
                // The first logical lives in the head EBR, which never moves.
                ebr_lba: (e.scheme == Scheme::Embr && e.slot > 0)
                    .then(|| e.base_offset / e.block_size.max(1)),
            }),
            _ => None,
        }
    }

    #[inline]
    pub fn end_lba(&self) -> u64 {
        self.start_lba + self.sectors.saturating_sub(1)
    }

    /// Blocks claimed by this logical: its EBR (`start - 1` for a new one) through its data.
    #[inline]
    pub(crate) fn reserved(&self) -> (u64, u64) {
        let ebr = self
            .ebr_lba
            .filter(|e| *e < self.start_lba)
            .unwrap_or(self.start_lba.saturating_sub(1));
        (ebr, self.end_lba())
    }

    /// The same logical at `extent`, keeping its EBR only if the data start is unchanged.
    pub(crate) fn moved_to(self, start_lba: u64, sectors: u64) -> Self {
        Self {
            start_lba,
            sectors,
            ebr_lba: self.ebr_lba.filter(|_| start_lba == self.start_lba),
            ..self
        }
    }
}

/// Walks the EBR chain of the extended partition at `ext_start` (`ext_sectors` long).
pub fn walk_chain<IO: BlockIO + ?Sized>(
    io: &mut IO,
    ext_start: u64,
    ext_sectors: u64,
) -> PartResult<PartitionTable> {
    let bs = io.logical_block_size() as u64;
    let ext_end = ext_start.saturating_add(ext_sectors);
    let mut table = PartitionTable::new(
        Scheme::Embr,
        ext_start.saturating_mul(bs),
        ext_sectors.saturating_mul(bs),
        bs as u32,
    );

    let mut visited = BTreeSet::new();
    let mut cur = ext_start;
    loop {
        if !visited.insert(cur) {
            return Err(PartError::Malformed("EMBR chain loops"));
        }
        if cur < ext_start || cur >= ext_end || cur.saturating_add(1) * bs > io.size_bytes() {
            return Err(PartError::Malformed("EMBR link outside the extended partition"));
        }

        let ebr_offset = cur * bs;
        let sector = mbr::read_sector(io, ebr_offset)?;
        if !sector.has_valid_signature() {
            log::debug!("embr: no signature at LBA {cur}, chain ends");
            break;
        }

        let logical = sector.records[0];
        if !logical.is_empty() {
            log::debug!(
                "embr: logical at LBA {} (+{} from EBR {cur})",
                cur + logical.start_lba.get() as u64,
                logical.start_lba.get()
            );
            let slot = table.entries.len();
            table.entries.push(PartitionEntry {
                scheme: Scheme::Embr,
                record: Record::Mbr(logical),
                record_offset: ebr_offset + MBR_RECORDS_OFFSET,
                base_offset: ebr_offset,
                block_size: bs,
                slot,
                nested: None,
            });
        }

        let link = sector.records[1];
        if link.is_empty() {
            break;
        }
        cur = ext_start + link.start_lba.get() as u64;
    }

    Ok(table)
}

/// Lays out EBR sectors for `logicals` inside the extended partition and writes them.
///
/// The head EBR stays at `ext_start` and describes the first logical. Any other
/// logical keeps the EBR it was parsed from (`ebr_lba`), so chains written by other
/// tools are edited in place; new or moved logicals get their EBR in the block just
/// before their data. Boot code already present in a reused EBR is kept. CHS fields
/// follow `geometry`, or 255/63 without one. Flushes.
pub fn write_chain<IO: BlockIO + ?Sized>(
    io: &mut IO,
    ext_start: u64,
    ext_sectors: u64,
    logicals: &[Logical],
    geometry: Option<DiskGeometry>,
) -> PartResult {
    let chs = geometry.unwrap_or(DEFAULT_CHS_GEOMETRY);
    let bs = io.logical_block_size() as u64;
    let ext_last = ext_start + ext_sectors.saturating_sub(1);

    let mut sorted = logicals.to_vec();
    sorted.sort_by_key(|l| l.start_lba);

    let ebr_of = |i: usize, l: &Logical| match l.ebr_lba {
        _ if i == 0 => ext_start,
        Some(e) if e > ext_start && e < l.start_lba => e,
        _ => l.start_lba - 1,
    };

    for (i, l) in sorted.iter().enumerate() {
        if l.sectors == 0 || l.start_lba <= ext_start || l.end_lba() > ext_last {
            return Err(PartError::NoSpace("logical partition outside the extended partition"));
        }
        if i > 0 && ebr_of(i, l) <= sorted[i - 1].end_lba() {
            return Err(PartError::Overlap);
        }
    }

    if sorted.is_empty() {
        write_ebr(io, ext_start * bs, [MbrRecord::new_empty(); 2])?;
    }

    for (i, l) in sorted.iter().enumerate() {
        let ebr = ebr_of(i, l);
        let rel_start = to_u32(l.start_lba - ebr)?;
        let logical = MbrRecord::with_geometry(
            l.boot,
            l.part_type,
            rel_start,
            to_u32(l.sectors)?,
            l.start_lba,
            chs,
        );

        let link = match sorted.get(i + 1) {
            Some(next) => {
                let next_ebr = ebr_of(i + 1, next);
                MbrRecord::with_geometry(
                    false,
                    EXTENDED_LINK_TYPE,
                    to_u32(next_ebr - ext_start)?,
                    to_u32(next.end_lba() - next_ebr + 1)?,
                    next_ebr,
                    chs,
                )
            }
            None => MbrRecord::new_empty(),
        };
        write_ebr(io, ebr * bs, [logical, link])?;
    }

    io.flush()?;
    log::debug!("embr: wrote chain of {} logical(s)", sorted.len());
    Ok(())
}

/// Writes an EBR holding `records` in its first two slots.
fn write_ebr<IO: BlockIO + ?Sized>(io: &mut IO, offset: u64, records: [MbrRecord; 2]) -> PartResult {
    let existing = mbr::read_sector(io, offset)?;
    let mut sector = MbrSector::new_empty();
    if existing.has_valid_signature() {
        sector.boot_code = existing.boot_code;
    }
    sector.records[0] = records[0];
    sector.records[1] = records[1];
    mbr::write_sector(io, offset, &sector)
}

#[inline]
fn to_u32(v: u64) -> PartResult<u32> {
    u32::try_from(v).map_err(|_| PartError::NoSpace("beyond the 32-bit MBR LBA limit"))
}
