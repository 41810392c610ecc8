// SPDX-License-Identifier: MIT

//! Sector/byte conversion and cylinder alignment.

use blkio::prelude::*;

use crate::errors::*;

/// How partition boundaries are aligned on create and modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeometryMode {
    /// Align to the given heads/sectors-per-track (MBR/EMBR only).
    Respect { heads: u32, sectors: u32 },
    /// Block alignment only.
    #[default]
    Ignore,
    /// Use whatever the device reports, else behave like `Ignore`.
    Probe,
}

impl GeometryMode {
    /// Resolves the mode to a concrete geometry, `None` meaning block alignment.
    pub fn resolve<IO: BlockIO + ?Sized>(&self, io: &IO) -> PartResult<Option<DiskGeometry>> {
        match *self {
            GeometryMode::Respect { heads, sectors } => {
                let g = DiskGeometry::new(heads, sectors);
                if !g.is_usable() {
                    return Err(PartError::InvalidGeometry(
                        "heads must be 1..=255 and sectors 1..=63",
                    ));
                }
                Ok(Some(g))
            }
            GeometryMode::Ignore => Ok(None),
            GeometryMode::Probe => {
                let g = io.geometry().filter(|g| g.is_usable());
                if g.is_none() {
                    log::debug!("device reports no usable geometry; aligning to blocks");
                }
                Ok(g)
            }
        }
    }
}

/// Geometry used for CHS fields when the device reports none.
pub const DEFAULT_CHS_GEOMETRY: DiskGeometry = DiskGeometry {
    heads: 255,
    sectors_per_track: 63,
};

/// A block range `[start_lba, start_lba + sectors)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start_lba: u64,
    pub sectors: u64,
}

impl Extent {
    #[inline]
    pub fn end_lba(&self) -> u64 {
        self.start_lba + self.sectors.saturating_sub(1)
    }

    #[inline]
    pub fn offset_bytes(&self, block_size: u64) -> u64 {
        self.start_lba * block_size
    }

    #[inline]
    pub fn size_bytes(&self, block_size: u64) -> u64 {
        self.sectors * block_size
    }
}

/// A placement request in bytes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    pub offset: u64,
    pub size: u64,
    /// Keep this start LBA verbatim instead of aligning `offset`.
    pub keep_start: Option<u64>,
}

#[inline]
pub(crate) fn div_ceil(v: u64, d: u64) -> u64 {
    v.div_ceil(d.max(1))
}

#[inline]
pub(crate) fn align_up(v: u64, a: u64) -> u64 {
    if a <= 1 || v % a == 0 {
        v
    } else {
        v + (a - v % a)
    }
}

/// Computes the on-disk extent for a request inside `[min_lba, max_lba]`.
///
/// The result is never smaller than requested: with a geometry, the end is walked
/// forward one block at a time until it closes a cylinder; running past `max_lba`
/// is `NoSpace`.
pub(crate) fn place(
    req: Placement,
    block_size: u64,
    geometry: Option<DiskGeometry>,
    min_lba: u64,
    max_lba: u64,
) -> PartResult<Extent> {
    if req.size == 0 {
        return Err(PartError::InvalidGeometry("partition size must be non-zero"));
    }

    let start_lba = match (req.keep_start, geometry) {
        (Some(lba), _) => lba,
        (None, Some(g)) => align_up(div_ceil(req.offset, block_size), g.sectors_per_track as u64),
        (None, None) => div_ceil(req.offset, block_size),
    };
    if start_lba < min_lba || start_lba > max_lba {
        return Err(PartError::NoSpace("start lies outside the usable region"));
    }

    let min_sectors = div_ceil(req.size, block_size);
    let mut end = start_lba
        .checked_add(min_sectors - 1)
        .ok_or(PartError::NoSpace("partition end overflows"))?;
    if end > max_lba {
        return Err(PartError::NoSpace("partition does not fit in the usable region"));
    }

    if let Some(g) = geometry {
        let cylinder = g.heads as u64 * g.sectors_per_track as u64;
        while (end + 1) % cylinder != 0 {
            end += 1;
            if end > max_lba {
                return Err(PartError::NoSpace("no cylinder boundary before the region end"));
            }
        }
    }

    Ok(Extent {
        start_lba,
        sectors: end - start_lba + 1,
    })
}

/// Encodes `lba` as a 3-byte CHS tuple; addresses past cylinder 1023 saturate.
pub fn lba_to_chs(lba: u64, geometry: DiskGeometry) -> [u8; 3] {
    let spt = geometry.sectors_per_track.max(1) as u64;
    let heads = geometry.heads.max(1) as u64;
    let cylinder = lba / (spt * heads);
    if cylinder > 1023 {
        return [0xFE, 0xFF, 0xFF];
    }
    let head = (lba / spt) % heads;
    let sector = lba % spt + 1;
    [
        head as u8,
        (sector as u8 & 0x3F) | (((cylinder >> 8) as u8 & 0x03) << 6),
        cylinder as u8,
    ]
}
