// SPDX-License-Identifier: MIT

//! The scheme-agnostic table model: [`PartitionTable`] owns its entries, and an
//! extended MBR entry owns the nested EMBR table.

use core::fmt;

use bitflags::bitflags;
use zerocopy::IntoBytes;

use crate::Scheme;
use crate::apm::ApmMapEntry;
use crate::errors::*;
use crate::flags::PartitionFlags;
use crate::gpt::{GptEntry, GptLayout};
use crate::guid::Guid;
use crate::guids::{GptPartitionKind, mbr_type_name};
use crate::mbr::{MbrRecord, is_extended_type};
use crate::utils::{pretty_bytes, sep_u64, truncate};

bitflags! {
    /// Non-fatal anomalies found while parsing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TableWarnings: u32 {
        /// The primary GPT is valid but the backup header or array is not.
        const GPT_BACKUP_CORRUPT = 1 << 0;
        /// The primary GPT is unusable; the table was read from the backup.
        const GPT_PRIMARY_CORRUPT = 1 << 1;
        /// Two GPT entries shared a partition GUID; later ones were dropped.
        const GPT_DUPLICATE_GUID = 1 << 2;
    }
}

/// A copy of an on-disk partition record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// 16-byte MBR/EMBR record.
    Mbr(MbrRecord),
    /// GPT entry; `tail` holds the bytes past 128 when the array uses larger entries.
    Gpt { entry: GptEntry, tail: Vec<u8> },
    /// APM map entry; `tail` holds the rest of the block.
    Apm { entry: ApmMapEntry, tail: Vec<u8> },
}

impl Record {
    /// The record exactly as stored on disk.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Record::Mbr(r) => r.as_bytes().to_vec(),
            Record::Gpt { entry, tail } => [entry.as_bytes(), tail.as_slice()].concat(),
            Record::Apm { entry, tail } => [entry.as_bytes(), tail.as_slice()].concat(),
        }
    }
}

/// One partition record, plus the nested table of an extended partition.
#[derive(Debug, Clone)]
pub struct PartitionEntry {
    pub(crate) scheme: Scheme,
    pub(crate) record: Record,
    /// Absolute byte offset of the record itself.
    pub(crate) record_offset: u64,
    /// Absolute byte offset the record's LBA fields are relative to.
    pub(crate) base_offset: u64,
    pub(crate) block_size: u64,
    /// Position in the on-disk array (MBR slot, EMBR chain index, GPT array index, APM map index).
    pub(crate) slot: usize,
    pub(crate) nested: Option<Box<PartitionTable>>,
}

impl PartitionEntry {
    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// The on-disk record and its absolute offset.
    pub fn raw_bytes(&self) -> (u64, Vec<u8>) {
        (self.record_offset, self.record.to_bytes())
    }

    #[inline]
    pub fn record_offset(&self) -> u64 {
        self.record_offset
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn is_nested_table(&self) -> bool {
        self.nested.is_some()
    }

    #[inline]
    pub fn nested_table(&self) -> Option<&PartitionTable> {
        self.nested.as_deref()
    }

    /// True for MBR type codes `0x05`, `0x0F` and `0x85`.
    #[inline]
    pub fn is_extended(&self) -> bool {
        self.mbr_type().is_some_and(is_extended_type)
    }

    /// First block of the partition, in units of the entry's block size.
    pub fn start_lba(&self) -> u64 {
        match &self.record {
            Record::Mbr(r) => self.base_offset / self.block_size + r.start_lba.get() as u64,
            Record::Gpt { entry, .. } => entry.start_lba.get(),
            Record::Apm { entry, .. } => entry.start_block.get() as u64,
        }
    }

    pub fn offset_bytes(&self) -> u64 {
        match &self.record {
            Record::Mbr(r) if r.start_lba.get() == 0 => 0,
            Record::Mbr(r) => self
                .base_offset
                .saturating_add(r.start_lba.get() as u64 * self.block_size),
            _ => self.start_lba().saturating_mul(self.block_size),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        let blocks = match &self.record {
            Record::Mbr(r) => r.sectors.get() as u64,
            Record::Gpt { entry, .. } => entry.blocks(),
            Record::Apm { entry, .. } => entry.block_count.get() as u64,
        };
        blocks.saturating_mul(self.block_size)
    }

    #[inline]
    pub fn end_bytes(&self) -> u64 {
        self.offset_bytes().saturating_add(self.size_bytes())
    }

    /// Whether `offset` lies in `[offset_bytes, offset_bytes + size_bytes)`.
    #[inline]
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.offset_bytes() && offset < self.end_bytes()
    }

    /// MBR/EMBR slots with a zero start are empty.
    #[inline]
    pub fn in_use(&self) -> bool {
        !self.scheme.is_dos() || self.offset_bytes() != 0
    }

    #[inline]
    pub fn mbr_type(&self) -> Option<u8> {
        match &self.record {
            Record::Mbr(r) => Some(r.part_type),
            _ => None,
        }
    }

    #[inline]
    pub fn type_guid(&self) -> Option<Guid> {
        match &self.record {
            Record::Gpt { entry, .. } => Some(entry.type_guid()),
            _ => None,
        }
    }

    /// Known GPT type, if this is a GPT entry.
    #[inline]
    pub fn kind(&self) -> Option<GptPartitionKind> {
        self.type_guid().map(|g| GptPartitionKind::from_guid(&g))
    }

    /// Scheme-specific type: `"0x83"`, a canonical GUID, or an APM system name.
    pub fn type_string(&self) -> String {
        match &self.record {
            Record::Mbr(r) => format!("0x{:02x}", r.part_type),
            Record::Gpt { entry, .. } => entry.type_guid().to_canonical(),
            Record::Apm { entry, .. } => entry.system_type(),
        }
    }

    pub fn label(&self) -> Option<String> {
        match &self.record {
            Record::Mbr(_) => None,
            Record::Gpt { entry, .. } => Some(entry.name()),
            Record::Apm { entry, .. } => Some(entry.name()),
        }
    }

    /// Per-partition GUID (GPT only).
    #[inline]
    pub fn uuid(&self) -> Option<Guid> {
        match &self.record {
            Record::Gpt { entry, .. } => Some(entry.unique_guid()),
            _ => None,
        }
    }

    pub fn flags(&self) -> PartitionFlags {
        match &self.record {
            Record::Mbr(r) if r.is_bootable() => PartitionFlags::BOOT,
            Record::Mbr(_) => PartitionFlags::empty(),
            Record::Gpt { entry, .. } => PartitionFlags::from_gpt_attributes(entry.attributes.get()),
            Record::Apm { entry, .. } => PartitionFlags::from_apm_status(entry.status.get()),
        }
    }

    /// Kernel-style partition number: MBR slots 1-4, logicals from 5, GPT/APM array position + 1.
    pub fn number(&self) -> usize {
        match self.scheme {
            Scheme::Embr => 5 + self.slot,
            _ => self.slot + 1,
        }
    }

    fn type_display(&self) -> String {
        match &self.record {
            Record::Mbr(r) => format!("0x{:02x} {}", r.part_type, mbr_type_name(r.part_type)),
            Record::Gpt { entry, .. } => GptPartitionKind::from_guid(&entry.type_guid()).to_string(),
            Record::Apm { entry, .. } => entry.system_type(),
        }
    }
}

/// A parsed partition table: the primary table of a device, or an EMBR chain
/// nested in an extended partition.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    pub(crate) scheme: Scheme,
    pub(crate) disk_offset: u64,
    pub(crate) region_size: u64,
    pub(crate) logical_block_size: u32,
    pub(crate) entries: Vec<PartitionEntry>,
    pub(crate) warnings: TableWarnings,
    pub(crate) gpt: Option<GptLayout>,
    pub(crate) apm_block_size: Option<u32>,
}

impl PartitionTable {
    pub(crate) fn new(
        scheme: Scheme,
        disk_offset: u64,
        region_size: u64,
        logical_block_size: u32,
    ) -> Self {
        Self {
            scheme,
            disk_offset,
            region_size,
            logical_block_size,
            entries: Vec::new(),
            warnings: TableWarnings::empty(),
            gpt: None,
            apm_block_size: None,
        }
    }

    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    pub fn disk_offset(&self) -> u64 {
        self.disk_offset
    }

    #[inline]
    pub fn region_size(&self) -> u64 {
        self.region_size
    }

    #[inline]
    pub fn logical_block_size(&self) -> u32 {
        self.logical_block_size
    }

    #[inline]
    pub fn warnings(&self) -> TableWarnings {
        self.warnings
    }

    /// GPT header values, for GPT tables.
    #[inline]
    pub fn gpt_layout(&self) -> Option<&GptLayout> {
        self.gpt.as_ref()
    }

    /// Block size used by APM LBA fields, for APM tables.
    #[inline]
    pub fn apm_block_size(&self) -> Option<u32> {
        self.apm_block_size
    }

    #[inline]
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    #[inline]
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn get_entry(&self, index: usize) -> Option<&PartitionEntry> {
        self.entries.get(index)
    }

    /// The extended entry of an MBR, if any.
    pub fn extended(&self) -> Option<(usize, &PartitionEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.in_use() && e.is_extended())
    }

    /// In-use entries, nested tables included.
    pub fn count_in_use(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.in_use())
            .map(|e| 1 + e.nested_table().map_or(0, |t| t.count_in_use()))
            .sum()
    }

    /// Locates the entry covering `offset`, descending into nested tables.
    ///
    /// An offset equal to an extended partition's start returns the extended entry
    /// itself. Free space yields the innermost containing table and `None`.
    pub fn find(&self, offset: u64) -> (&PartitionTable, Option<usize>) {
        for (i, e) in self.entries.iter().enumerate() {
            if !e.in_use() || !e.contains(offset) {
                continue;
            }
            return match e.nested_table() {
                Some(child) if offset != e.offset_bytes() => child.find(offset),
                _ => (self, Some(i)),
            };
        }
        (self, None)
    }

    /// Checks the structural invariants: entries inside the region, no overlap,
    /// nested tables inside their container, one extended per MBR, unique GPT GUIDs.
    pub fn validate(&self) -> PartResult {
        if self.scheme == Scheme::Mbr {
            if self.entries.len() != 4 {
                return Err(PartError::Malformed("MBR must have exactly four slots"));
            }
            let extended = self.entries.iter().filter(|e| e.in_use() && e.is_extended());
            if extended.count() > 1 {
                return Err(PartError::Malformed("more than one extended partition"));
            }
        }

        let region_end = self.disk_offset.saturating_add(self.region_size);
        let mut ranges: Vec<(u64, u64)> = Vec::with_capacity(self.entries.len());
        for e in self.entries.iter().filter(|e| e.in_use()) {
            if e.offset_bytes() < self.disk_offset || e.end_bytes() > region_end {
                return Err(PartError::Malformed("partition lies outside its table region"));
            }
            if let Some(child) = e.nested_table() {
                if child.disk_offset < e.offset_bytes()
                    || child.disk_offset.saturating_add(child.region_size) > e.end_bytes()
                {
                    return Err(PartError::Malformed("nested table exceeds its container"));
                }
                child.validate()?;
            }
            if e.size_bytes() > 0 {
                ranges.push((e.offset_bytes(), e.end_bytes()));
            }
        }

        ranges.sort_unstable();
        if ranges.windows(2).any(|w| w[1].0 < w[0].1) {
            return Err(PartError::Malformed("partitions overlap"));
        }

        if self.scheme == Scheme::Gpt {
            let mut guids: Vec<Guid> = self.entries.iter().filter_map(|e| e.uuid()).collect();
            let n = guids.len();
            guids.sort_unstable();
            guids.dedup();
            if guids.len() != n {
                return Err(PartError::Malformed("duplicate GPT partition GUID"));
            }
        }
        Ok(())
    }

    fn fmt_rows(&self, f: &mut fmt::Formatter<'_>, indent: &str) -> fmt::Result {
        for e in self.entries.iter().filter(|e| e.in_use()) {
            let number = format!("{indent}{}", e.number());
            writeln!(
                f,
                "  | {:<4} | {:<36} | {:<20} | {:>15} | {:>15} | {:>11} | {:<16} |",
                number,
                truncate(&e.type_display(), 36),
                truncate(&e.label().unwrap_or_default(), 20),
                sep_u64(e.offset_bytes()),
                sep_u64(e.end_bytes()),
                pretty_bytes(e.size_bytes()),
                truncate(&e.flags().to_string(), 16),
            )?;
            if let Some(child) = e.nested_table() {
                child.fmt_rows(f, "└")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for PartitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Partition table • scheme: {} • block: {} • size: {} • partitions: {}",
            self.scheme,
            sep_u64(self.logical_block_size as u64),
            pretty_bytes(self.region_size),
            self.count_in_use(),
        )?;
        if let Some(g) = &self.gpt {
            writeln!(f, "  disk GUID: {}", g.disk_guid)?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "  warnings: {:?}", self.warnings)?;
        }

        writeln!(
            f,
            "  ┌──────┬──────────────────────────────────────┬──────────────────────┬─────────────────┬─────────────────┬─────────────┬──────────────────┐"
        )?;
        writeln!(
            f,
            "  | #    | Type                                 | Label                | Start           | End             | Size        | Flags            |"
        )?;
        writeln!(
            f,
            "  ├──────┼──────────────────────────────────────┼──────────────────────┼─────────────────┼─────────────────┼─────────────┼──────────────────┤"
        )?;
        self.fmt_rows(f, "")?;
        writeln!(
            f,
            "  └──────┴──────────────────────────────────────┴──────────────────────┴─────────────────┴─────────────────┴─────────────┴──────────────────┘"
        )
    }
}
