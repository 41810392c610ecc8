// SPDX-License-Identifier: MIT

use std::collections::BTreeSet;

use blkio::prelude::*;
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::Scheme;
use crate::codec::{GPT_NAME_BYTES, decode_utf16le_name, encode_utf16le_name};
use crate::errors::*;
use crate::guid::Guid;
use crate::io_ext::BlockIOLbaExt;
use crate::mbr;
use crate::table::{PartitionEntry, PartitionTable, Record, TableWarnings};

pub const GPT_ENTRY_SIZE: usize = 128;
pub const GPT_HEADER_SIZE: usize = 92;
pub const GPT_PRIMARY_HEADER_LBA: u64 = 1;
pub const GPT_PRIMARY_ENTRIES_LBA: u64 = 2;
pub const GPT_DEFAULT_NUM_ENTRIES: u32 = 128;
pub const GPT_MAX_NUM_ENTRIES: u32 = 16_384;
pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const GPT_REVISION: u32 = 0x0001_0000;

/// Byte range of `header_crc` inside the header.
const HEADER_CRC_FIELD: core::ops::Range<usize> = 16..20;

type U32Le = U32<LittleEndian>;
type U64Le = U64<LittleEndian>;

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct GptHeader {
    pub signature: [u8; 8],
    pub revision: U32Le,
    pub header_size: U32Le,
    pub header_crc: U32Le,
    pub reserved: U32Le,
    pub current_lba: U64Le,
    pub backup_lba: U64Le,
    pub first_usable_lba: U64Le,
    pub last_usable_lba: U64Le,
    pub disk_guid: [u8; 16],
    pub entries_lba: U64Le,
    pub num_entries: U32Le,
    pub entry_size: U32Le,
    pub entries_crc: U32Le,
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct GptEntry {
    pub type_guid: [u8; 16],
    pub unique_guid: [u8; 16],
    pub start_lba: U64Le,
    /// Inclusive.
    pub end_lba: U64Le,
    pub attributes: U64Le,
    pub name: [u8; GPT_NAME_BYTES],
}

impl GptEntry {
    pub fn new(
        type_guid: Guid,
        unique_guid: Guid,
        start_lba: u64,
        end_lba: u64,
        attributes: u64,
        name: &str,
    ) -> PartResult<Self> {
        let name = encode_name(name)?;
        Ok(Self {
            type_guid: type_guid.to_mixed_endian_bytes(),
            unique_guid: unique_guid.to_mixed_endian_bytes(),
            start_lba: U64::new(start_lba),
            end_lba: U64::new(end_lba),
            attributes: U64::new(attributes),
            name,
        })
    }

    #[inline]
    pub fn type_guid(&self) -> Guid {
        Guid::from_mixed_endian_bytes(self.type_guid)
    }

    #[inline]
    pub fn unique_guid(&self) -> Guid {
        Guid::from_mixed_endian_bytes(self.unique_guid)
    }

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.type_guid == [0u8; 16]
    }

    /// Decoded UTF-16LE name.
    pub fn name(&self) -> String {
        decode_utf16le_name(&self.name).unwrap_or_default()
    }

    /// Length in blocks; zero when the range is inverted.
    #[inline]
    pub fn blocks(&self) -> u64 {
        self.end_lba
            .get()
            .checked_sub(self.start_lba.get())
            .map_or(0, |n| n + 1)
    }
}

/// Encodes a partition name for the entry's name field.
pub(crate) fn encode_name(name: &str) -> PartResult<[u8; GPT_NAME_BYTES]> {
    encode_utf16le_name(name)
        .map_err(|_| PartError::InvalidLabel("GPT names hold at most 36 UTF-16 units"))
}

/// GPT header values a table carries for rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GptLayout {
    pub disk_guid: Guid,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    /// Primary entry array.
    pub entries_lba: u64,
    pub num_entries: u32,
    pub entry_size: u32,
}

impl GptLayout {
    /// Fresh layout for a device of `total_blocks`: 128 entries right after the
    /// primary header, mirrored before the backup header.
    pub fn new(total_blocks: u64, block_size: u64, disk_guid: Guid) -> PartResult<Self> {
        let mut layout = Self {
            disk_guid,
            first_usable_lba: 0,
            last_usable_lba: 0,
            entries_lba: GPT_PRIMARY_ENTRIES_LBA,
            num_entries: GPT_DEFAULT_NUM_ENTRIES,
            entry_size: GPT_ENTRY_SIZE as u32,
        };
        let sectors = layout.array_blocks(block_size);
        layout.first_usable_lba = GPT_PRIMARY_ENTRIES_LBA + sectors;
        layout.last_usable_lba = total_blocks
            .checked_sub(2 + sectors)
            .ok_or(PartError::NoSpace("device too small for a GPT"))?;
        if layout.first_usable_lba > layout.last_usable_lba {
            return Err(PartError::NoSpace("device too small for a GPT"));
        }
        Ok(layout)
    }

    #[inline]
    pub fn array_bytes(&self) -> usize {
        self.num_entries as usize * self.entry_size as usize
    }

    #[inline]
    pub fn array_blocks(&self, block_size: u64) -> u64 {
        (self.array_bytes() as u64).div_ceil(block_size)
    }

    fn header(&self, current: u64, backup: u64, entries_lba: u64, entries_crc: u32) -> GptHeader {
        let mut h = GptHeader {
            signature: *GPT_SIGNATURE,
            revision: U32::new(GPT_REVISION),
            header_size: U32::new(GPT_HEADER_SIZE as u32),
            header_crc: U32::new(0),
            reserved: U32::new(0),
            current_lba: U64::new(current),
            backup_lba: U64::new(backup),
            first_usable_lba: U64::new(self.first_usable_lba),
            last_usable_lba: U64::new(self.last_usable_lba),
            disk_guid: self.disk_guid.to_mixed_endian_bytes(),
            entries_lba: U64::new(entries_lba),
            num_entries: U32::new(self.num_entries),
            entry_size: U32::new(self.entry_size),
            entries_crc: U32::new(entries_crc),
        };
        h.header_crc = U32::new(crc32fast::hash(h.as_bytes()));
        h
    }
}

/// Result of checking one header copy.
enum HeaderCheck {
    Absent,
    Invalid(&'static str),
    Valid(GptHeader, Vec<u8>),
}

fn check_header<IO: BlockIO + ?Sized>(io: &mut IO, lba: u64, bs: u64, total: u64) -> PartResult<HeaderCheck> {
    use HeaderCheck::*;

    let raw = io.read_blocks(lba, bs, 1)?;
    let Ok((h, _)) = GptHeader::read_from_prefix(&raw) else {
        return Ok(Absent);
    };
    if &h.signature != GPT_SIGNATURE {
        return Ok(Absent);
    }
    if h.revision.get() != GPT_REVISION {
        return Ok(Invalid("unsupported GPT revision"));
    }
    let header_size = h.header_size.get() as usize;
    if header_size < GPT_HEADER_SIZE || header_size > raw.len() {
        return Ok(Invalid("GPT header size out of range"));
    }
    let mut crc_input = raw[..header_size].to_vec();
    crc_input[HEADER_CRC_FIELD].fill(0);
    if crc32fast::hash(&crc_input) != h.header_crc.get() {
        return Ok(Invalid("GPT header CRC mismatch"));
    }
    if h.current_lba.get() != lba {
        return Ok(Invalid("GPT header does not describe its own LBA"));
    }

    let num = h.num_entries.get();
    let size = h.entry_size.get();
    if num == 0 || num > GPT_MAX_NUM_ENTRIES {
        return Ok(Invalid("GPT entry count out of range"));
    }
    if (size as usize) < GPT_ENTRY_SIZE || size % 8 != 0 {
        return Ok(Invalid("GPT entry size invalid"));
    }
    let first = h.first_usable_lba.get();
    let last = h.last_usable_lba.get();
    if first > last.saturating_add(1) || last >= total {
        return Ok(Invalid("GPT usable range invalid"));
    }

    let array_bytes = num as usize * size as usize;
    let array_blocks = (array_bytes as u64).div_ceil(bs);
    let entries_lba = h.entries_lba.get();
    let array_end = entries_lba.saturating_add(array_blocks);
    if entries_lba < 2 || array_end > total {
        return Ok(Invalid("GPT entry array outside the device"));
    }
    if entries_lba <= last && array_end > first {
        return Ok(Invalid("GPT entry array overlaps usable space"));
    }

    let mut array = io.read_blocks(entries_lba, bs, array_blocks)?;
    array.truncate(array_bytes);
    if crc32fast::hash(&array) != h.entries_crc.get() {
        return Ok(Invalid("GPT entry array CRC mismatch"));
    }
    Ok(Valid(h, array))
}

fn build_table(
    io_size: u64,
    bs: u64,
    h: &GptHeader,
    array: &[u8],
    warnings: TableWarnings,
) -> PartResult<PartitionTable> {
    let es = h.entry_size.get() as usize;
    let entries_lba = h.entries_lba.get();
    let first = h.first_usable_lba.get();
    let last = h.last_usable_lba.get();

    let mut table = PartitionTable::new(Scheme::Gpt, 0, io_size, bs as u32);
    table.warnings = warnings;
    table.gpt = Some(GptLayout {
        disk_guid: Guid::from_mixed_endian_bytes(h.disk_guid),
        first_usable_lba: first,
        last_usable_lba: last,
        entries_lba: if h.current_lba.get() == GPT_PRIMARY_HEADER_LBA {
            entries_lba
        } else {
            GPT_PRIMARY_ENTRIES_LBA
        },
        num_entries: h.num_entries.get(),
        entry_size: es as u32,
    });

    let mut seen = BTreeSet::new();
    for (slot, chunk) in array.chunks_exact(es).enumerate() {
        let (entry, tail) = GptEntry::read_from_prefix(chunk)
            .map_err(|_| PartError::MalformedField("GPT entry shorter than 128 bytes"))?;
        if entry.is_unused() {
            continue;
        }
        if entry.end_lba.get() < entry.start_lba.get() {
            return Err(PartError::Malformed("GPT partition ends before it starts"));
        }
        if entry.start_lba.get() < first || entry.end_lba.get() > last {
            return Err(PartError::Malformed("GPT partition outside the usable range"));
        }
        if !seen.insert(entry.unique_guid) {
            log::warn!("gpt: duplicate partition GUID {} in slot {slot}, ignored", entry.unique_guid());
            table.warnings |= TableWarnings::GPT_DUPLICATE_GUID;
            continue;
        }
        table.entries.push(PartitionEntry {
            scheme: Scheme::Gpt,
            record: Record::Gpt {
                entry,
                tail: tail.to_vec(),
            },
            record_offset: entries_lba * bs + (slot * es) as u64,
            base_offset: 0,
            block_size: bs,
            slot,
            nested: None,
        });
    }

    table.validate()?;
    Ok(table)
}

/// Parses the GPT, falling back to the backup copy when the primary is unusable.
///
/// Returns `None` when neither copy carries a GPT signature.
pub fn parse_gpt<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult<Option<PartitionTable>> {
    let bs = io.logical_block_size() as u64;
    let total = io.total_blocks(bs);
    if total < 3 {
        return Ok(None);
    }

    let primary = check_header(io, GPT_PRIMARY_HEADER_LBA, bs, total)?;
    if let HeaderCheck::Valid(h, array) = &primary {
        let mut warnings = TableWarnings::empty();
        if !backup_matches(io, h, bs, total)? {
            log::warn!("gpt: backup header or entry array is corrupt");
            warnings |= TableWarnings::GPT_BACKUP_CORRUPT;
        }
        let table = build_table(io.size_bytes(), bs, h, array, warnings)?;
        log::debug!("gpt: {} partition(s)", table.num_entries());
        return Ok(Some(table));
    }

    match check_header(io, total - 1, bs, total)? {
        HeaderCheck::Valid(h, array) => {
            log::warn!("gpt: primary header unusable, reading the backup");
            let table = build_table(
                io.size_bytes(),
                bs,
                &h,
                &array,
                TableWarnings::GPT_PRIMARY_CORRUPT,
            )?;
            Ok(Some(table))
        }
        _ => match primary {
            HeaderCheck::Invalid(reason) => Err(PartError::Malformed(reason)),
            _ => Ok(None),
        },
    }
}

fn backup_matches<IO: BlockIO + ?Sized>(
    io: &mut IO,
    primary: &GptHeader,
    bs: u64,
    total: u64,
) -> PartResult<bool> {
    let backup_lba = primary.backup_lba.get();
    if backup_lba >= total || backup_lba <= GPT_PRIMARY_HEADER_LBA {
        return Ok(false);
    }
    Ok(match check_header(io, backup_lba, bs, total)? {
        HeaderCheck::Valid(b, _) => {
            b.entries_crc == primary.entries_crc
                && b.backup_lba.get() == GPT_PRIMARY_HEADER_LBA
                && b.disk_guid == primary.disk_guid
        }
        _ => false,
    })
}

/// Entry array of `table`, ready to write: each entry back in its slot.
pub(crate) fn entry_array(table: &PartitionTable, layout: &GptLayout) -> PartResult<Vec<u8>> {
    let es = layout.entry_size as usize;
    let mut array = vec![0u8; layout.array_bytes()];
    for e in &table.entries {
        let bytes = e.record.to_bytes();
        let dst = array
            .get_mut(e.slot * es..e.slot * es + bytes.len().min(es))
            .ok_or(PartError::Malformed("GPT entry slot outside the array"))?;
        let n = dst.len();
        dst.copy_from_slice(&bytes[..n]);
    }
    Ok(array)
}

/// Writes the primary array and header, then the backup array and header. Flushes.
pub fn write_gpt<IO: BlockIO + ?Sized>(io: &mut IO, layout: &GptLayout, array: &[u8]) -> PartResult {
    let bs = io.logical_block_size() as u64;
    let total = io.total_blocks(bs);
    if array.len() != layout.array_bytes() {
        return Err(PartError::Malformed("GPT entry array has the wrong length"));
    }

    let array_blocks = layout.array_blocks(bs);
    let backup_lba = total
        .checked_sub(1)
        .ok_or(PartError::NoSpace("device too small for a GPT"))?;
    let backup_entries_lba = backup_lba
        .checked_sub(array_blocks)
        .filter(|&lba| lba > layout.last_usable_lba)
        .ok_or(PartError::NoSpace("GPT backup area collides with usable space"))?;

    let mut padded = vec![0u8; (array_blocks * bs) as usize];
    padded[..array.len()].copy_from_slice(array);
    let entries_crc = crc32fast::hash(array);

    let primary = layout.header(GPT_PRIMARY_HEADER_LBA, backup_lba, layout.entries_lba, entries_crc);
    let backup = layout.header(backup_lba, GPT_PRIMARY_HEADER_LBA, backup_entries_lba, entries_crc);

    let mut block = vec![0u8; bs as usize];
    io.write_at_lba(layout.entries_lba, bs, &padded)?;
    block[..GPT_HEADER_SIZE].copy_from_slice(primary.as_bytes());
    io.write_at_lba(GPT_PRIMARY_HEADER_LBA, bs, &block)?;

    io.write_at_lba(backup_entries_lba, bs, &padded)?;
    block[..GPT_HEADER_SIZE].copy_from_slice(backup.as_bytes());
    io.write_at_lba(backup_lba, bs, &block)?;

    io.flush()?;
    Ok(())
}

/// Writes a protective MBR and an empty GPT (primary and backup).
pub fn create_empty<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult<GptLayout> {
    let bs = io.logical_block_size() as u64;
    let total = io.total_blocks(bs);
    let layout = GptLayout::new(total, bs, Guid::new_random())?;
    mbr::write_protective(io, total)?;
    write_gpt(io, &layout, &vec![0u8; layout.array_bytes()])?;
    log::debug!("gpt: created empty table, disk GUID {}", layout.disk_guid);
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guids::{GPT_PARTITION_TYPE_ESP, GPT_PARTITION_TYPE_LINUX};

    const TOTAL: u64 = 20_000;

    fn with_entries(io: &mut MemBlockIO, entries: &[(usize, GptEntry)]) -> GptLayout {
        let layout = create_empty(io).unwrap();
        let mut array = vec![0u8; layout.array_bytes()];
        for (slot, e) in entries {
            array[slot * 128..slot * 128 + 128].copy_from_slice(e.as_bytes());
        }
        write_gpt(io, &layout, &array).unwrap();
        layout
    }

    #[test]
    fn struct_sizes() {
        assert_eq!(core::mem::size_of::<GptHeader>(), GPT_HEADER_SIZE);
        assert_eq!(core::mem::size_of::<GptEntry>(), GPT_ENTRY_SIZE);
    }

    #[test]
    fn write_and_parse_gpt() {
        let mut buf = vec![0u8; 512 * TOTAL as usize];
        let mut io = MemBlockIO::new(&mut buf);
        let esp = GptEntry::new(GPT_PARTITION_TYPE_ESP, Guid::new_random(), 2048, 4095, 0, "EFI").unwrap();
        let root =
            GptEntry::new(GPT_PARTITION_TYPE_LINUX, Guid::new_random(), 4096, 10_000, 1, "rootfs").unwrap();
        let layout = with_entries(&mut io, &[(0, esp), (5, root)]);
        assert_eq!(layout.first_usable_lba, 34);
        assert_eq!(layout.last_usable_lba, TOTAL - 34);

        let t = parse_gpt(&mut io).unwrap().unwrap();
        assert_eq!(t.scheme(), Scheme::Gpt);
        assert!(t.warnings().is_empty());
        assert_eq!(t.num_entries(), 2);
        let e = t.get_entry(1).unwrap();
        assert_eq!(e.slot(), 5);
        assert_eq!(e.number(), 6);
        assert_eq!(e.label().as_deref(), Some("rootfs"));
        assert_eq!(e.offset_bytes(), 4096 * 512);
        assert_eq!(e.size_bytes(), (10_000 - 4096 + 1) * 512);
        assert_eq!(e.record_offset(), 2 * 512 + 5 * 128);
        assert_eq!(t.gpt_layout().unwrap().disk_guid, layout.disk_guid);
    }

    #[test]
    fn corrupt_backup_sets_warning() {
        let mut buf = vec![0u8; 512 * TOTAL as usize];
        {
            let mut io = MemBlockIO::new(&mut buf);
            create_empty(&mut io).unwrap();
        }
        let last = (TOTAL as usize - 1) * 512;
        buf[last + 24] ^= 0xFF;
        let mut io = MemBlockIO::new(&mut buf);
        let t = parse_gpt(&mut io).unwrap().unwrap();
        assert!(t.warnings().contains(TableWarnings::GPT_BACKUP_CORRUPT));
    }

    #[test]
    fn corrupt_primary_falls_back_to_backup() {
        let mut buf = vec![0u8; 512 * TOTAL as usize];
        {
            let mut io = MemBlockIO::new(&mut buf);
            let e = GptEntry::new(GPT_PARTITION_TYPE_LINUX, Guid::new_random(), 2048, 4095, 0, "data")
                .unwrap();
            with_entries(&mut io, &[(0, e)]);
        }
        // Flip a byte in the primary entry array.
        buf[2 * 512 + 40] ^= 0x01;
        let mut io = MemBlockIO::new(&mut buf);
        let t = parse_gpt(&mut io).unwrap().unwrap();
        assert!(t.warnings().contains(TableWarnings::GPT_PRIMARY_CORRUPT));
        assert_eq!(t.num_entries(), 1);
        assert_eq!(t.gpt_layout().unwrap().entries_lba, GPT_PRIMARY_ENTRIES_LBA);
    }

    #[test]
    fn both_copies_corrupt_is_malformed() {
        let mut buf = vec![0u8; 512 * TOTAL as usize];
        {
            let mut io = MemBlockIO::new(&mut buf);
            create_empty(&mut io).unwrap();
        }
        buf[512 + 24] ^= 0xFF;
        let last = (TOTAL as usize - 1) * 512;
        buf[last + 24] ^= 0xFF;
        let mut io = MemBlockIO::new(&mut buf);
        assert!(matches!(parse_gpt(&mut io), Err(PartError::Malformed(_))));
    }

    #[test]
    fn no_signature_is_none() {
        let mut buf = vec![0u8; 512 * 64];
        let mut io = MemBlockIO::new(&mut buf);
        assert!(parse_gpt(&mut io).unwrap().is_none());
    }

    #[test]
    fn overlap_is_malformed() {
        let mut buf = vec![0u8; 512 * TOTAL as usize];
        let mut io = MemBlockIO::new(&mut buf);
        let p1 = GptEntry::new(GPT_PARTITION_TYPE_LINUX, Guid::new_random(), 2048, 4095, 0, "1").unwrap();
        let p2 = GptEntry::new(GPT_PARTITION_TYPE_LINUX, Guid::new_random(), 3000, 5000, 0, "2").unwrap();
        with_entries(&mut io, &[(0, p1), (1, p2)]);
        assert!(matches!(parse_gpt(&mut io), Err(PartError::Malformed(_))));
    }

    #[test]
    fn duplicate_guid_is_dropped() {
        let mut buf = vec![0u8; 512 * TOTAL as usize];
        let mut io = MemBlockIO::new(&mut buf);
        let g = Guid::new_random();
        let p1 = GptEntry::new(GPT_PARTITION_TYPE_LINUX, g, 2048, 4095, 0, "a").unwrap();
        let p2 = GptEntry::new(GPT_PARTITION_TYPE_LINUX, g, 5000, 6000, 0, "b").unwrap();
        with_entries(&mut io, &[(0, p1), (1, p2)]);
        let t = parse_gpt(&mut io).unwrap().unwrap();
        assert_eq!(t.num_entries(), 1);
        assert!(t.warnings().contains(TableWarnings::GPT_DUPLICATE_GUID));
    }

    #[test]
    fn four_k_blocks() {
        let mut buf = vec![0u8; 4096 * 1024];
        let mut io = MemBlockIO::with_block_size(&mut buf, 4096);
        let layout = create_empty(&mut io).unwrap();
        assert_eq!(layout.first_usable_lba, 6);
        assert_eq!(layout.last_usable_lba, 1024 - 6);
        let t = parse_gpt(&mut io).unwrap().unwrap();
        assert_eq!(t.logical_block_size(), 4096);
        assert_eq!(t.num_entries(), 0);
    }
}
