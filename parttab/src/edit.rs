// SPDX-License-Identifier: MIT

//! Table mutations: create, add, delete and change.
//!
//! Each operation re-reads the table, writes the new one and flushes, then scrubs
//! signatures of the affected range, then asks the kernel to reread. A failed
//! reread leaves the disk committed and is reported on its own.

use core::sync::atomic::{AtomicBool, Ordering};

use blkio::prelude::*;
use zerocopy::byteorder::U64;

use crate::Scheme;
use crate::apm;
use crate::embr::{self, Logical};
use crate::errors::*;
use crate::flags::PartitionFlags;
use crate::geometry::{DEFAULT_CHS_GEOMETRY, Extent, GeometryMode, Placement, div_ceil, place};
use crate::gpt::{self, GptEntry};
use crate::guid::Guid;
use crate::io_ext::BlockIOLbaExt;
use crate::mbr::{self, MbrRecord, is_extended_type};
use crate::scrub::scrub_signatures;
use crate::table::{PartitionEntry, PartitionTable, Record};

/// Per-call options of the edit operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct EditOptions<'a> {
    pub geometry: GeometryMode,
    /// Turn a refused kernel reread into `KernelRereadFailed`.
    pub require_kernel_reread: bool,
    /// Checked before anything is written.
    pub cancel: Option<&'a AtomicBool>,
}

/// Whether the kernel picked up the new table.
#[derive(Debug)]
pub enum RereadStatus {
    Done,
    /// The table is on disk but the kernel kept its old view.
    Failed(BlockIOError),
    /// The operation does not request a reread.
    Skipped,
}

impl RereadStatus {
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, RereadStatus::Done)
    }
}

/// What an edit actually did on disk.
#[derive(Debug)]
pub struct EditOutcome {
    /// Scheme of the table that holds the entry (`Embr` for logical partitions).
    pub scheme: Scheme,
    pub offset: u64,
    pub size: u64,
    /// Position of the entry in parse order within its table.
    pub index: Option<usize>,
    pub reread: RereadStatus,
}

/// Result of a scheme-level write, before scrub and reread.
struct Written {
    scheme: Scheme,
    extent: Extent,
    index: usize,
    container: bool,
}

/// Replaces whatever is on the device with an empty table of `scheme`.
///
/// Signatures are scrubbed over the whole device first. `Scheme::Unknown` leaves
/// no table at all.
pub fn create_empty_table<IO: BlockIO + ?Sized>(
    io: &mut IO,
    scheme: Scheme,
    opts: &EditOptions<'_>,
) -> PartResult<EditOutcome> {
    if scheme == Scheme::Embr {
        return Err(PartError::NotSupported(
            "EMBR tables only exist inside an extended partition",
        ));
    }
    check_cancel(opts)?;

    let size = io.size_bytes();
    scrub_signatures(io, 0, size)?;
    match scheme {
        Scheme::Mbr => mbr::write_empty(io)?,
        Scheme::Gpt => {
            gpt::create_empty(io)?;
        }
        Scheme::Apm => apm::create_empty(io)?,
        Scheme::Unknown | Scheme::Embr => {}
    }
    log::info!("created empty {scheme} table on {size} byte device");

    Ok(EditOutcome {
        scheme,
        offset: 0,
        size,
        index: None,
        reread: reread(io, opts)?,
    })
}

/// Adds a partition of at least `size` bytes starting at or after `offset`.
///
/// `part_type` is `"0x83"`-style hex for MBR and a canonical GUID for GPT. On MBR
/// an offset inside the extended partition creates a logical partition.
pub fn add_partition<IO: BlockIO + ?Sized>(
    io: &mut IO,
    offset: u64,
    size: u64,
    part_type: &str,
    label: &str,
    flags: PartitionFlags,
    opts: &EditOptions<'_>,
) -> PartResult<EditOutcome> {
    check_cancel(opts)?;
    let table = PartitionTable::read(io)?;

    let written = match table.scheme() {
        Scheme::Mbr => {
            let part_type = parse_mbr_type(part_type)?;
            check_mbr_label(label)?;
            if is_extended_type(part_type) && table.extended().is_some() {
                return Err(PartError::NoFreeSlot("only one extended per MBR"));
            }
            let geometry = opts.geometry.resolve(&*io)?;
            match table.extended() {
                Some((_, ext)) if ext.contains(offset) => {
                    flags.check_for(Scheme::Embr)?;
                    add_logical(io, ext, offset, size, part_type, flags, geometry)?
                }
                _ => {
                    flags.check_for(Scheme::Mbr)?;
                    add_primary(io, &table, offset, size, part_type, flags, geometry)?
                }
            }
        }
        Scheme::Gpt => {
            let type_guid = parse_gpt_type(part_type)?;
            flags.check_for(Scheme::Gpt)?;
            add_gpt(io, &table, offset, size, type_guid, label, flags)?
        }
        s @ (Scheme::Apm | Scheme::Embr | Scheme::Unknown) => return Err(not_editable(s)),
    };

    let bs = io.logical_block_size() as u64;
    let (start, len) = (written.extent.offset_bytes(bs), written.extent.size_bytes(bs));
    log::info!(
        "added {} partition #{} at {start} ({len} bytes)",
        written.scheme,
        written.index
    );
    if !written.container {
        scrub_signatures(io, start, len)?;
    }

    Ok(EditOutcome {
        scheme: written.scheme,
        offset: start,
        size: len,
        index: Some(written.index),
        reread: reread(io, opts)?,
    })
}

/// Deletes the partition covering `offset`, then scrubs its signatures.
///
/// Deleting an extended partition drops its logical partitions with it.
pub fn delete_partition<IO: BlockIO + ?Sized>(
    io: &mut IO,
    offset: u64,
    opts: &EditOptions<'_>,
) -> PartResult<EditOutcome> {
    check_cancel(opts)?;
    let root = PartitionTable::read(io)?;
    let (table, index) = root.find(offset);
    let index = index.ok_or(PartError::NotFound)?;
    let entry = &table.entries[index];
    let (start, len) = (entry.offset_bytes(), entry.size_bytes());

    match table.scheme() {
        Scheme::Mbr => {
            let mut records = mbr_records(table);
            records[entry.slot] = MbrRecord::new_empty();
            mbr::write_records(io, &records)?;
        }
        Scheme::Embr => {
            let logicals = logicals_except(table, Some(index));
            let (ext_start, ext_sectors) = nested_extent(table);
            let geometry = opts.geometry.resolve(&*io)?;
            embr::write_chain(io, ext_start, ext_sectors, &logicals, geometry)?;
        }
        Scheme::Gpt => {
            let mut updated = table.clone();
            updated.entries.remove(index);
            write_gpt_table(io, &updated)?;
        }
        s @ (Scheme::Apm | Scheme::Unknown) => return Err(not_editable(s)),
    }
    log::info!("deleted {} partition at {start} ({len} bytes)", table.scheme());

    scrub_signatures(io, start, len)?;
    Ok(EditOutcome {
        scheme: table.scheme(),
        offset: start,
        size: len,
        index: Some(index),
        reread: reread(io, opts)?,
    })
}

/// Moves, resizes or retypes the partition covering `offset`.
///
/// The partition is never made smaller than `new_size`. Contents are kept: no
/// scrub runs, and no kernel reread is requested.
#[allow(clippy::too_many_arguments)]
pub fn change_partition<IO: BlockIO + ?Sized>(
    io: &mut IO,
    offset: u64,
    new_offset: u64,
    new_size: u64,
    part_type: Option<&str>,
    label: Option<&str>,
    flags: Option<PartitionFlags>,
    opts: &EditOptions<'_>,
) -> PartResult<EditOutcome> {
    check_cancel(opts)?;
    let root = PartitionTable::read(io)?;
    let (table, index) = root.find(offset);
    let index = index.ok_or(PartError::NotFound)?;
    let entry = &table.entries[index];
    let bs = io.logical_block_size() as u64;
    let unchanged = new_offset == entry.offset_bytes() && new_size == entry.size_bytes();

    let extent = match table.scheme() {
        Scheme::Mbr | Scheme::Embr => {
            let new_type = part_type.map(parse_mbr_type).transpose()?;
            if let Some(t) = new_type {
                if is_extended_type(t) != entry.is_extended() {
                    return Err(PartError::InvalidType(
                        "extended and normal partitions cannot be converted into each other",
                    ));
                }
            }
            if let Some(l) = label {
                check_mbr_label(l)?;
            }
            if let Some(f) = flags {
                f.check_for(table.scheme())?;
            }
            let geometry = opts.geometry.resolve(&*io)?;
            let extent = if unchanged {
                current_extent(entry)
            } else {
                let (min, max) = dos_bounds(&*io, table, bs)?;
                let placed = place(
                    placement(entry, new_offset, new_size),
                    bs,
                    geometry,
                    min,
                    max,
                )?;
                check_siblings(table, index, placed)?;
                placed
            };
            let boot = flags.map(|f| f.contains(PartitionFlags::BOOT));
            change_dos(io, table, index, extent, new_type, boot, geometry)?;
            extent
        }
        Scheme::Gpt => {
            let new_type = part_type.map(parse_gpt_type).transpose()?;
            if let Some(f) = flags {
                f.check_for(Scheme::Gpt)?;
            }
            let layout = gpt_layout(table)?;
            let extent = if unchanged {
                current_extent(entry)
            } else {
                let placed = place(
                    placement(entry, new_offset, new_size),
                    bs,
                    None,
                    layout.first_usable_lba,
                    layout.last_usable_lba,
                )?;
                check_siblings(table, index, placed)?;
                placed
            };

            let mut updated = table.clone();
            if let Record::Gpt { entry: g, .. } = &mut updated.entries[index].record {
                g.start_lba = U64::new(extent.start_lba);
                g.end_lba = U64::new(extent.end_lba());
                if let Some(t) = new_type {
                    g.type_guid = t.to_mixed_endian_bytes();
                }
                if let Some(l) = label {
                    g.name = gpt::encode_name(l)?;
                }
                if let Some(f) = flags {
                    g.attributes = U64::new(f.merge_gpt_attributes(g.attributes.get()));
                }
            }
            write_gpt_table(io, &updated)?;
            extent
        }
        s @ (Scheme::Apm | Scheme::Unknown) => return Err(not_editable(s)),
    };

    let (start, len) = (extent.offset_bytes(bs), extent.size_bytes(bs));
    log::info!(
        "changed {} partition #{} to {start} ({len} bytes)",
        table.scheme(),
        entry.number()
    );
    Ok(EditOutcome {
        scheme: table.scheme(),
        offset: start,
        size: len,
        index: Some(index),
        reread: RereadStatus::Skipped,
    })
}

fn add_primary<IO: BlockIO + ?Sized>(
    io: &mut IO,
    table: &PartitionTable,
    offset: u64,
    size: u64,
    part_type: u8,
    flags: PartitionFlags,
    geometry: Option<DiskGeometry>,
) -> PartResult<Written> {
    let container = is_extended_type(part_type);
    let slot = table
        .entries
        .iter()
        .find(|e| !e.in_use())
        .map(|e| e.slot)
        .ok_or(PartError::NoFreeSlot("all four MBR slots are in use"))?;

    let bs = io.logical_block_size() as u64;
    let (min, max) = dos_bounds(&*io, table, bs)?;
    let request = Placement {
        offset,
        size,
        keep_start: None,
    };
    let extent = place(request, bs, geometry, min, max)?;
    check_siblings(table, usize::MAX, extent)?;

    let mut records = mbr_records(table);
    records[slot] = MbrRecord::with_geometry(
        flags.contains(PartitionFlags::BOOT),
        part_type,
        to_u32(extent.start_lba)?,
        to_u32(extent.sectors)?,
        extent.start_lba,
        geometry.unwrap_or(DEFAULT_CHS_GEOMETRY),
    );
    if container {
        // The head EBR must be valid before the MBR points at it.
        embr::write_chain(io, extent.start_lba, extent.sectors, &[], geometry)?;
    }
    mbr::write_records(io, &records)?;

    Ok(Written {
        scheme: Scheme::Mbr,
        extent,
        index: slot,
        container,
    })
}

fn add_logical<IO: BlockIO + ?Sized>(
    io: &mut IO,
    ext: &PartitionEntry,
    offset: u64,
    size: u64,
    part_type: u8,
    flags: PartitionFlags,
    geometry: Option<DiskGeometry>,
) -> PartResult<Written> {
    let bs = io.logical_block_size() as u64;
    let Some(container) = Logical::from_entry(ext) else {
        return Err(PartError::Malformed("extended entry is not an MBR record"));
    };
    let mut logicals = ext
        .nested_table()
        .map(|t| logicals_except(t, None))
        .unwrap_or_default();
    let reserved: Vec<(u64, u64)> = logicals.iter().map(|l| l.reserved()).collect();

    // Every logical needs the block before it for its EBR.
    let mut start = div_ceil(offset, bs).max(container.start_lba + 1);
    while let Some(&(_, end)) = reserved.iter().find(|(a, b)| (*a..=*b).contains(&(start - 1))) {
        start = end + 2;
    }
    let request = Placement {
        offset: start * bs,
        size,
        keep_start: None,
    };
    let extent = place(request, bs, geometry, container.start_lba + 1, container.end_lba())?;

    let new = Logical {
        start_lba: extent.start_lba,
        sectors: extent.sectors,
        part_type,
        boot: flags.contains(PartitionFlags::BOOT),
        ebr_lba: None,
    };
    let mine = new.reserved();
    if reserved.iter().any(|&r| overlaps(r, mine)) {
        return Err(PartError::Overlap);
    }

    logicals.push(new);
    logicals.sort_by_key(|l| l.start_lba);
    let index = logicals
        .iter()
        .position(|l| *l == new)
        .unwrap_or(logicals.len() - 1);
    embr::write_chain(io, container.start_lba, container.sectors, &logicals, geometry)?;

    Ok(Written {
        scheme: Scheme::Embr,
        extent,
        index,
        container: false,
    })
}

fn add_gpt<IO: BlockIO + ?Sized>(
    io: &mut IO,
    table: &PartitionTable,
    offset: u64,
    size: u64,
    type_guid: Guid,
    label: &str,
    flags: PartitionFlags,
) -> PartResult<Written> {
    let bs = io.logical_block_size() as u64;
    let layout = gpt_layout(table)?;
    let slot = (0..layout.num_entries as usize)
        .find(|s| table.entries.iter().all(|e| e.slot != *s))
        .ok_or(PartError::NoFreeSlot("GPT entry array is full"))?;

    let request = Placement {
        offset,
        size,
        keep_start: None,
    };
    let extent = place(
        request,
        bs,
        None,
        layout.first_usable_lba,
        layout.last_usable_lba,
    )?;
    check_siblings(table, usize::MAX, extent)?;

    let entry = GptEntry::new(
        type_guid,
        Guid::new_random(),
        extent.start_lba,
        extent.end_lba(),
        flags.merge_gpt_attributes(0),
        label,
    )?;
    let mut updated = table.clone();
    updated.entries.push(PartitionEntry {
        scheme: Scheme::Gpt,
        record: Record::Gpt {
            entry,
            tail: Vec::new(),
        },
        record_offset: layout.entries_lba * bs + (slot * layout.entry_size as usize) as u64,
        base_offset: 0,
        block_size: bs,
        slot,
        nested: None,
    });
    write_gpt_table(io, &updated)?;

    Ok(Written {
        scheme: Scheme::Gpt,
        extent,
        index: table.entries.iter().filter(|e| e.slot < slot).count(),
        container: false,
    })
}

/// Rewrites the record at `index` of an MBR or EMBR table with `extent`.
fn change_dos<IO: BlockIO + ?Sized>(
    io: &mut IO,
    table: &PartitionTable,
    index: usize,
    extent: Extent,
    new_type: Option<u8>,
    boot: Option<bool>,
    geometry: Option<DiskGeometry>,
) -> PartResult {
    let entry = &table.entries[index];
    let Record::Mbr(old) = entry.record else {
        return Err(PartError::Malformed("DOS table holds a non-MBR record"));
    };
    let part_type = new_type.unwrap_or(old.part_type);
    let boot = boot.unwrap_or(old.is_bootable());

    if table.scheme() == Scheme::Embr {
        let current = Logical::from_entry(entry)
            .ok_or(PartError::Malformed("DOS table holds a non-MBR record"))?;
        let mut logicals = logicals_except(table, Some(index));
        logicals.push(Logical {
            part_type,
            boot,
            ..current.moved_to(extent.start_lba, extent.sectors)
        });
        let (ext_start, ext_sectors) = nested_extent(table);
        return embr::write_chain(io, ext_start, ext_sectors, &logicals, geometry);
    }

    if let Some(nested) = entry.nested_table() {
        let logicals = logicals_except(nested, None);
        let moved = extent.start_lba != entry.start_lba();
        if moved && !logicals.is_empty() {
            return Err(PartError::InvalidGeometry(
                "an extended partition holding logical partitions cannot move",
            ));
        }
        if logicals.iter().any(|l| l.end_lba() > extent.end_lba()) {
            return Err(PartError::InvalidGeometry(
                "extended partition would cut off logical partitions",
            ));
        }
        if moved {
            embr::write_chain(io, extent.start_lba, extent.sectors, &[], geometry)?;
        }
    }

    let mut records = mbr_records(table);
    records[entry.slot] = MbrRecord::with_geometry(
        boot,
        part_type,
        to_u32(extent.start_lba)?,
        to_u32(extent.sectors)?,
        extent.start_lba,
        geometry.unwrap_or(DEFAULT_CHS_GEOMETRY),
    );
    mbr::write_records(io, &records)
}

fn reread<IO: BlockIO + ?Sized>(io: &mut IO, opts: &EditOptions<'_>) -> PartResult<RereadStatus> {
    match io.request_kernel_reread() {
        Ok(()) => Ok(RereadStatus::Done),
        Err(e) => {
            log::warn!("table written, but the kernel did not reread it: {e}");
            if opts.require_kernel_reread {
                Err(PartError::KernelRereadFailed(e))
            } else {
                Ok(RereadStatus::Failed(e))
            }
        }
    }
}

#[inline]
fn check_cancel(opts: &EditOptions<'_>) -> PartResult {
    if opts.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
        return Err(PartError::Cancelled);
    }
    Ok(())
}

/// Error for an edit on a table level that cannot take it.
fn not_editable(scheme: Scheme) -> PartError {
    match scheme {
        Scheme::Apm => PartError::NotSupported("APM maps are read-only"),
        Scheme::Embr => {
            PartError::NotSupported("EMBR tables are edited through their extended partition")
        }
        Scheme::Unknown => PartError::NotSupported("device has no partition table"),
        Scheme::Mbr | Scheme::Gpt => PartError::NotSupported("unexpected table scheme"),
    }
}

/// Parses `"0x83"` or `"83"`.
fn parse_mbr_type(s: &str) -> PartResult<u8> {
    let s = s.trim();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let t = u8::from_str_radix(hex, 16)
        .map_err(|_| PartError::InvalidType("MBR type must be a hex byte such as 0x83"))?;
    match t {
        0x00 => Err(PartError::InvalidType("type 0x00 marks an empty slot")),
        mbr::PROTECTIVE_GPT => Err(PartError::InvalidType("type 0xee is reserved for GPT")),
        t => Ok(t),
    }
}

fn parse_gpt_type(s: &str) -> PartResult<Guid> {
    let g = Guid::parse_canonical(s.trim())
        .map_err(|_| PartError::InvalidType("GPT type must be a canonical GUID"))?;
    if g.is_zero() {
        return Err(PartError::InvalidType("the zero GUID marks an unused entry"));
    }
    Ok(g)
}

#[inline]
fn check_mbr_label(label: &str) -> PartResult {
    if label.is_empty() {
        Ok(())
    } else {
        Err(PartError::InvalidLabel("MBR partitions have no label"))
    }
}

fn gpt_layout(table: &PartitionTable) -> PartResult<gpt::GptLayout> {
    table
        .gpt_layout()
        .copied()
        .ok_or(PartError::Malformed("GPT table without header values"))
}

fn write_gpt_table<IO: BlockIO + ?Sized>(io: &mut IO, table: &PartitionTable) -> PartResult {
    let layout = gpt_layout(table)?;
    let array = gpt::entry_array(table, &layout)?;
    gpt::write_gpt(io, &layout, &array)
}

/// The four records of an MBR table, in slot order.
fn mbr_records(table: &PartitionTable) -> [MbrRecord; 4] {
    let mut records = [MbrRecord::new_empty(); 4];
    for e in &table.entries {
        if let (Some(dst), Record::Mbr(r)) = (records.get_mut(e.slot), &e.record) {
            *dst = *r;
        }
    }
    records
}

fn logicals_except(table: &PartitionTable, skip: Option<usize>) -> Vec<Logical> {
    table
        .entries
        .iter()
        .enumerate()
        .filter(|(i, e)| Some(*i) != skip && e.in_use())
        .filter_map(|(_, e)| Logical::from_entry(e))
        .collect()
}

/// Start and length in blocks of the extended partition behind an EMBR table.
#[inline]
fn nested_extent(table: &PartitionTable) -> (u64, u64) {
    let bs = table.logical_block_size as u64;
    (table.disk_offset / bs, table.region_size / bs)
}

/// Usable block range of an MBR or EMBR table.
fn dos_bounds<IO: BlockIO + ?Sized>(io: &IO, table: &PartitionTable, bs: u64) -> PartResult<(u64, u64)> {
    if table.scheme() == Scheme::Embr {
        let (start, sectors) = nested_extent(table);
        return Ok((start + 1, start + sectors.saturating_sub(1)));
    }
    let total = io.total_blocks(bs);
    if total < 2 {
        return Err(PartError::NoSpace("device too small for a partition"));
    }
    Ok((1, total - 1))
}

fn placement(entry: &PartitionEntry, new_offset: u64, new_size: u64) -> Placement {
    Placement {
        offset: new_offset,
        size: new_size,
        keep_start: (new_offset == entry.offset_bytes()).then(|| entry.start_lba()),
    }
}

#[inline]
fn current_extent(entry: &PartitionEntry) -> Extent {
    Extent {
        start_lba: entry.start_lba(),
        sectors: entry.size_bytes() / entry.block_size,
    }
}

/// Blocks an extent claims in its table; EMBR logicals include the block for their EBR.
fn claimed(table: &PartitionTable, start: u64, end: u64) -> (u64, u64) {
    if table.scheme() == Scheme::Embr {
        (start.saturating_sub(1), end)
    } else {
        (start, end)
    }
}

/// Blocks an existing entry claims, from its EBR on for logicals.
fn claimed_by(table: &PartitionTable, e: &PartitionEntry) -> (u64, u64) {
    match Logical::from_entry(e) {
        Some(l) if table.scheme() == Scheme::Embr => l.reserved(),
        _ => {
            let c = current_extent(e);
            claimed(table, c.start_lba, c.end_lba())
        }
    }
}

/// Rejects `extent` when it overlaps an in-use entry other than `skip`.
fn check_siblings(table: &PartitionTable, skip: usize, extent: Extent) -> PartResult {
    let mine = claimed(table, extent.start_lba, extent.end_lba());
    let hit = table
        .entries
        .iter()
        .enumerate()
        .filter(|(i, e)| *i != skip && e.in_use() && e.size_bytes() > 0)
        .any(|(_, e)| overlaps(claimed_by(table, e), mine));
    if hit { Err(PartError::Overlap) } else { Ok(()) }
}

/// Inclusive ranges intersect.
#[inline]
fn overlaps(a: (u64, u64), b: (u64, u64)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

#[inline]
fn to_u32(v: u64) -> PartResult<u32> {
    u32::try_from(v).map_err(|_| PartError::NoSpace("beyond the 32-bit MBR LBA limit"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guids::GPT_PARTITION_TYPE_LINUX;

    const MIB: u64 = 1 << 20;

    fn opts() -> EditOptions<'static> {
        EditOptions::default()
    }

    #[test]
    fn mbr_type_parsing() {
        assert_eq!(parse_mbr_type("0x83").unwrap(), 0x83);
        assert_eq!(parse_mbr_type("0X0c").unwrap(), 0x0C);
        assert_eq!(parse_mbr_type("82").unwrap(), 0x82);
        for bad in ["0x00", "0xee", "0x100", "linux", ""] {
            assert!(matches!(parse_mbr_type(bad), Err(PartError::InvalidType(_))), "{bad}");
        }
    }

    #[test]
    fn gpt_type_parsing() {
        assert_eq!(
            parse_gpt_type("0fc63daf-8483-4772-8e79-3d69d8477de4").unwrap(),
            GPT_PARTITION_TYPE_LINUX
        );
        assert!(matches!(
            parse_gpt_type("00000000-0000-0000-0000-000000000000"),
            Err(PartError::InvalidType(_))
        ));
        assert!(matches!(parse_gpt_type("0x83"), Err(PartError::InvalidType(_))));
    }

    #[test]
    fn mbr_rejects_labels_and_gpt_flags() {
        let mut buf = vec![0u8; 8 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Mbr, &opts()).unwrap();
        let err = add_partition(&mut io, MIB, MIB, "0x83", "root", PartitionFlags::empty(), &opts());
        assert!(matches!(err, Err(PartError::InvalidLabel(_))));
        let err = add_partition(&mut io, MIB, MIB, "0x83", "", PartitionFlags::REQUIRED, &opts());
        assert!(matches!(err, Err(PartError::InvalidFlag(_))));
    }

    #[test]
    fn primary_slots_run_out() {
        let mut buf = vec![0u8; 16 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Mbr, &opts()).unwrap();
        for i in 0..4u64 {
            let out = add_partition(&mut io, (1 + 2 * i) * MIB, MIB, "0x83", "", PartitionFlags::empty(), &opts())
                .unwrap();
            assert_eq!(out.index, Some(i as usize));
            assert!(out.reread.is_done());
        }
        let err = add_partition(&mut io, 10 * MIB, MIB, "0x83", "", PartitionFlags::empty(), &opts());
        assert!(matches!(err, Err(PartError::NoFreeSlot(_))));
    }

    #[test]
    fn overlap_is_refused() {
        let mut buf = vec![0u8; 8 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Mbr, &opts()).unwrap();
        add_partition(&mut io, MIB, 2 * MIB, "0x83", "", PartitionFlags::empty(), &opts()).unwrap();
        let err = add_partition(&mut io, 2 * MIB, MIB, "0x83", "", PartitionFlags::empty(), &opts());
        assert!(matches!(err, Err(PartError::Overlap)));
    }

    #[test]
    fn logicals_get_an_ebr_block_each() {
        let mut buf = vec![0u8; 32 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Mbr, &opts()).unwrap();
        let ext = add_partition(&mut io, MIB, 20 * MIB, "0x05", "", PartitionFlags::empty(), &opts()).unwrap();
        assert_eq!((ext.scheme, ext.index), (Scheme::Mbr, Some(0)));

        // A request at the extended start moves past the head EBR.
        let a = add_partition(&mut io, MIB, MIB, "0x83", "", PartitionFlags::empty(), &opts()).unwrap();
        assert_eq!(a.scheme, Scheme::Embr);
        assert_eq!(a.offset, MIB + 512);

        // Right after `a`, the next one needs a block for its EBR.
        let b = add_partition(&mut io, a.offset + a.size, MIB, "0x82", "", PartitionFlags::empty(), &opts())
            .unwrap();
        assert_eq!(b.offset, a.offset + a.size + 512);
        assert_eq!(b.index, Some(1));

        let t = PartitionTable::read(&mut io).unwrap();
        let nested = t.get_entry(0).unwrap().nested_table().unwrap();
        assert_eq!(nested.num_entries(), 2);
        assert_eq!(nested.get_entry(1).unwrap().type_string(), "0x82");
        assert_eq!(t.count_in_use(), 3);

        for at in [2 * MIB, 22 * MIB] {
            let err = add_partition(&mut io, at, MIB, "0x0f", "", PartitionFlags::empty(), &opts());
            assert!(matches!(err, Err(PartError::NoFreeSlot("only one extended per MBR"))));
        }
    }

    #[test]
    fn deleting_a_logical_keeps_the_rest() {
        let mut buf = vec![0u8; 32 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Mbr, &opts()).unwrap();
        add_partition(&mut io, MIB, 20 * MIB, "0x05", "", PartitionFlags::empty(), &opts()).unwrap();
        let a = add_partition(&mut io, 2 * MIB, MIB, "0x83", "", PartitionFlags::empty(), &opts()).unwrap();
        let b = add_partition(&mut io, 4 * MIB, MIB, "0x83", "", PartitionFlags::empty(), &opts()).unwrap();

        let out = delete_partition(&mut io, a.offset + 10, &opts()).unwrap();
        assert_eq!(out.scheme, Scheme::Embr);
        let t = PartitionTable::read(&mut io).unwrap();
        let nested = t.get_entry(0).unwrap().nested_table().unwrap();
        assert_eq!(nested.num_entries(), 1);
        assert_eq!(nested.get_entry(0).unwrap().offset_bytes(), b.offset);
        // The survivor became first: its EBR is the head at the extended start.
        assert_eq!(nested.get_entry(0).unwrap().record_offset(), MIB + 446);
    }

    #[test]
    fn deleting_free_space_is_not_found() {
        let mut buf = vec![0u8; 8 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Gpt, &opts()).unwrap();
        assert!(matches!(
            delete_partition(&mut io, 3 * MIB, &opts()),
            Err(PartError::NotFound)
        ));
    }

    #[test]
    fn gpt_change_keeps_guid_and_high_attribute_bits() {
        let mut buf = vec![0u8; 16 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Gpt, &opts()).unwrap();
        let ty = GPT_PARTITION_TYPE_LINUX.to_canonical();
        add_partition(&mut io, MIB, 2 * MIB, &ty, "root", PartitionFlags::REQUIRED, &opts()).unwrap();

        // Set a type-specific attribute bit behind the engine's back.
        let mut t = PartitionTable::read(&mut io).unwrap();
        let uuid = t.get_entry(0).unwrap().uuid().unwrap();
        if let Record::Gpt { entry, .. } = &mut t.entries[0].record {
            entry.attributes = U64::new(entry.attributes.get() | 1 << 60);
        }
        write_gpt_table(&mut io, &t).unwrap();

        let out = change_partition(
            &mut io,
            MIB,
            MIB,
            4 * MIB,
            None,
            Some("data"),
            Some(PartitionFlags::empty()),
            &opts(),
        )
        .unwrap();
        assert_eq!((out.offset, out.size), (MIB, 4 * MIB));
        assert!(matches!(out.reread, RereadStatus::Skipped));

        let t = PartitionTable::read(&mut io).unwrap();
        let e = t.get_entry(0).unwrap();
        assert_eq!(e.uuid(), Some(uuid));
        assert_eq!(e.label().as_deref(), Some("data"));
        assert_eq!(e.flags(), PartitionFlags::empty());
        let Record::Gpt { entry, .. } = e.record() else {
            panic!("not a GPT record");
        };
        assert_eq!(entry.attributes.get(), 1 << 60);
    }

    #[test]
    fn extended_cannot_become_normal() {
        let mut buf = vec![0u8; 16 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Mbr, &opts()).unwrap();
        add_partition(&mut io, MIB, 8 * MIB, "0x05", "", PartitionFlags::empty(), &opts()).unwrap();
        let err = change_partition(&mut io, MIB, MIB, 8 * MIB, Some("0x83"), None, None, &opts());
        assert!(matches!(err, Err(PartError::InvalidType(_))));
    }

    #[test]
    fn extended_with_logicals_cannot_move_or_shrink_under_them() {
        let mut buf = vec![0u8; 16 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Mbr, &opts()).unwrap();
        add_partition(&mut io, MIB, 8 * MIB, "0x05", "", PartitionFlags::empty(), &opts()).unwrap();
        add_partition(&mut io, 4 * MIB, 2 * MIB, "0x83", "", PartitionFlags::empty(), &opts()).unwrap();

        let err = change_partition(&mut io, MIB, 2 * MIB, 8 * MIB, None, None, None, &opts());
        assert!(matches!(err, Err(PartError::InvalidGeometry(_))));
        let err = change_partition(&mut io, MIB, MIB, 4 * MIB, None, None, None, &opts());
        assert!(matches!(err, Err(PartError::InvalidGeometry(_))));

        let out = change_partition(&mut io, MIB, MIB, 12 * MIB, None, None, None, &opts()).unwrap();
        assert_eq!(out.size, 12 * MIB);
        let t = PartitionTable::read(&mut io).unwrap();
        assert_eq!(t.get_entry(0).unwrap().nested_table().unwrap().num_entries(), 1);
    }

    #[test]
    fn reread_failure_is_soft_unless_required() {
        let mut buf = vec![0u8; 8 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        io.set_reread_busy(true);
        let out = create_empty_table(&mut io, Scheme::Mbr, &opts()).unwrap();
        assert!(matches!(out.reread, RereadStatus::Failed(BlockIOError::Busy)));

        let strict = EditOptions {
            require_kernel_reread: true,
            ..opts()
        };
        let err = add_partition(&mut io, MIB, MIB, "0x83", "", PartitionFlags::empty(), &strict).unwrap_err();
        assert!(err.is_soft());
        // Committed anyway.
        assert_eq!(PartitionTable::read(&mut io).unwrap().count_in_use(), 1);
    }

    #[test]
    fn cancelled_edit_writes_nothing() {
        let mut buf = vec![0xFFu8; 4 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        let cancel = AtomicBool::new(true);
        let o = EditOptions {
            cancel: Some(&cancel),
            ..opts()
        };
        assert!(matches!(
            create_empty_table(&mut io, Scheme::Mbr, &o),
            Err(PartError::Cancelled)
        ));
        assert!(io.as_slice().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn apm_is_read_only_and_unknown_leaves_nothing() {
        let mut buf = vec![0u8; 4 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        create_empty_table(&mut io, Scheme::Apm, &opts()).unwrap();
        let err = add_partition(&mut io, MIB, MIB, "Apple_HFS", "", PartitionFlags::empty(), &opts());
        assert!(matches!(err, Err(PartError::NotSupported("APM maps are read-only"))));
        let err = delete_partition(&mut io, 512, &opts());
        assert!(matches!(err, Err(PartError::NotSupported("APM maps are read-only"))));

        create_empty_table(&mut io, Scheme::Unknown, &opts()).unwrap();
        assert!(crate::probe::parse(&mut io).unwrap().is_none());
        assert!(matches!(
            create_empty_table(&mut io, Scheme::Embr, &opts()),
            Err(PartError::NotSupported(_))
        ));
    }

    #[test]
    fn each_scheme_has_its_own_refusal() {
        let msg = |s| match not_editable(s) {
            PartError::NotSupported(m) => m,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(msg(Scheme::Apm), "APM maps are read-only");
        assert_eq!(msg(Scheme::Unknown), "device has no partition table");
        assert_ne!(msg(Scheme::Embr), msg(Scheme::Apm));
    }

    fn write_ebr(io: &mut MemBlockIO<'_>, lba: u64, records: [MbrRecord; 2]) {
        let mut sector = mbr::MbrSector::new_empty();
        sector.records[0] = records[0];
        sector.records[1] = records[1];
        mbr::write_sector(io, lba * 512, &sector).unwrap();
    }

    /// Extended at LBA 2048 with EBRs laid out 2048 blocks ahead of their data:
    /// head EBR at 2048 (data 4096..12287), second EBR at 20480 (data 22528..26623).
    fn fdisk_chain(io: &mut MemBlockIO<'_>) {
        create_empty_table(io, Scheme::Mbr, &opts()).unwrap();
        add_partition(io, MIB, 20 * MIB, "0x05", "", PartitionFlags::empty(), &opts()).unwrap();
        write_ebr(
            io,
            2048,
            [
                MbrRecord::new(false, 0x83, 2048, 8192, 4096),
                MbrRecord::new(false, mbr::EXTENDED_LINK_TYPE, 18432, 6144, 20480),
            ],
        );
        write_ebr(
            io,
            20480,
            [MbrRecord::new(false, 0x83, 2048, 4096, 22528), MbrRecord::new_empty()],
        );
    }

    #[test]
    fn foreign_chain_is_edited_in_place() {
        let mut buf = vec![0u8; 32 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        fdisk_chain(&mut io);

        let t = PartitionTable::read(&mut io).unwrap();
        let nested = t.get_entry(0).unwrap().nested_table().unwrap();
        assert_eq!(nested.get_entry(1).unwrap().record_offset(), 20480 * 512 + 446);

        let at = 22528 * 512;
        change_partition(&mut io, at, at, 4096 * 512, Some("0x07"), None, None, &opts()).unwrap();

        let ebr = mbr::read_sector(&mut io, 20480 * 512).unwrap();
        assert_eq!(ebr.records[0].part_type, 0x07);
        assert_eq!(ebr.records[0].start_lba.get(), 2048);
        let head = mbr::read_sector(&mut io, 2048 * 512).unwrap();
        assert_eq!(head.records[0].start_lba.get(), 2048);
        assert_eq!(head.records[1].start_lba.get(), 18432);
        // Nothing was laid out in the block before the data.
        assert!(io.as_slice()[22527 * 512..22528 * 512].iter().all(|&b| b == 0));

        // A new logical after the chain links from the existing EBR.
        let added = add_partition(&mut io, 14 * MIB, MIB, "0x82", "", PartitionFlags::empty(), &opts())
            .unwrap();
        assert_eq!(added.offset, 14 * MIB);
        let ebr = mbr::read_sector(&mut io, 20480 * 512).unwrap();
        assert_eq!(ebr.records[0].part_type, 0x07);
        assert_eq!(ebr.records[1].start_lba.get() as u64, 28671 - 2048);

        let t = PartitionTable::read(&mut io).unwrap();
        let nested = t.get_entry(0).unwrap().nested_table().unwrap();
        let offsets: Vec<u64> = nested.entries().iter().map(|e| e.record_offset() / 512).collect();
        assert_eq!(offsets, vec![2048, 20480, 28671]);
        assert_eq!(nested.get_entry(1).unwrap().type_string(), "0x07");
    }

    #[test]
    fn chs_fields_follow_the_alignment_geometry() {
        let mut buf = vec![0u8; 32 * MIB as usize];
        let mut io = MemBlockIO::new(&mut buf);
        let g = DiskGeometry::new(16, 63);
        let respect = EditOptions {
            geometry: GeometryMode::Respect { heads: 16, sectors: 63 },
            ..Default::default()
        };
        create_empty_table(&mut io, Scheme::Mbr, &respect).unwrap();
        add_partition(&mut io, MIB, 4 * MIB, "0x83", "", PartitionFlags::empty(), &respect).unwrap();

        let rec = mbr::read_sector(&mut io, 0).unwrap().records[0];
        let start = rec.start_lba.get() as u64;
        let end = start + rec.sectors.get() as u64 - 1;
        assert_eq!(rec.start_chs, crate::geometry::lba_to_chs(start, g));
        assert_eq!(rec.end_chs, crate::geometry::lba_to_chs(end, g));
        assert_ne!(rec.start_chs, crate::geometry::lba_to_chs(start, DEFAULT_CHS_GEOMETRY));
    }
}
