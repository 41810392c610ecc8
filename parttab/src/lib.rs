// SPDX-License-Identifier: MIT

//! Partition table engine.
//!
//! Reads, edits and writes MBR, extended MBR (logical partition chains),
//! GPT and Apple partition maps through one scheme-agnostic model:
//! [`PartitionTable`] / [`PartitionEntry`].
//!
//! Every operation takes an explicit [`blkio::BlockIO`] and explicit options;
//! there is no global state. A [`PartitionTable`] is a snapshot: re-parse after
//! any successful edit.

#[macro_use]
mod macros;
mod io_ext;

pub mod codec;
pub mod errors;
pub mod flags;
pub mod geometry;
pub mod guid;
/// Common Partition Type GUIDs.
pub mod guids;
pub mod table;

/// Apple Partition Map (APM).
pub mod apm;
/// Extended MBR chains (DOS logical partitions).
pub mod embr;
/// GUID Partition Table (GPT) implementation.
pub mod gpt;
/// Master Boot Record (MBR) and Protective MBR implementation.
pub mod mbr;

pub mod edit;
pub mod probe;
pub mod report;
pub mod scrub;

pub mod utils;

pub use edit::{
    EditOptions, EditOutcome, RereadStatus, add_partition, change_partition, create_empty_table,
    delete_partition,
};
pub use errors::{PartError, PartResult};
pub use flags::PartitionFlags;
pub use geometry::GeometryMode;
pub use guid::Guid;
pub use probe::parse;
pub use report::PartitionReport;
pub use scrub::{ScrubOptions, scrub};
pub use table::{PartitionEntry, PartitionTable, Record, TableWarnings};
pub use utils::detect_partition_offset_by_type_guid;

use core::fmt;
use core::str::FromStr;

/// Bytes zeroed at each end of a range by a signature scrub.
///
/// Covers every known filesystem, RAID and LVM superblock placement
/// (btrfs keeps its primary superblock at 64 KiB).
pub const SIGNATURE_REGION: u64 = 128 * 1024;

/// The partitioning scheme of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Mbr,
    /// A DOS extended partition's nested table.
    Embr,
    Apm,
    Gpt,
    /// No recognizable table.
    Unknown,
}

impl Scheme {
    /// Token reported to callers: `mbr`, `embr`, `gpt`, `apm` or `none`.
    pub fn token(&self) -> &'static str {
        match self {
            Scheme::Mbr => "mbr",
            Scheme::Embr => "embr",
            Scheme::Apm => "apm",
            Scheme::Gpt => "gpt",
            Scheme::Unknown => "none",
        }
    }

    #[inline]
    pub(crate) fn is_dos(&self) -> bool {
        matches!(self, Scheme::Mbr | Scheme::Embr)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Scheme {
    type Err = PartError;

    fn from_str(s: &str) -> PartResult<Self> {
        match s {
            "mbr" => Ok(Scheme::Mbr),
            "embr" => Ok(Scheme::Embr),
            "gpt" => Ok(Scheme::Gpt),
            "apm" => Ok(Scheme::Apm),
            "none" => Ok(Scheme::Unknown),
            _ => Err(PartError::NotSupported("unknown partition scheme")),
        }
    }
}
