// SPDX-License-Identifier: MIT

//! Scheme detection at the start of a device: MBR, then GPT behind a protective
//! MBR, then APM. Exactly one scheme is reported.

use blkio::prelude::*;

use crate::Scheme;
use crate::apm;
use crate::errors::*;
use crate::gpt;
use crate::mbr::{self, MbrProbe};
use crate::table::PartitionTable;

/// Parses the partition table of `io`; `None` when no scheme is recognized.
pub fn parse<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult<Option<PartitionTable>> {
    match mbr::parse_mbr(io)? {
        MbrProbe::Table(t) => {
            log::debug!("probe: MBR");
            return Ok(Some(t));
        }
        MbrProbe::Protective => {
            if let Some(t) = gpt::parse_gpt(io)? {
                log::debug!("probe: GPT");
                return Ok(Some(t));
            }
            log::debug!("probe: protective MBR without a GPT");
        }
        MbrProbe::NotPresent => {}
    }

    let t = apm::parse_apm(io)?;
    if t.is_some() {
        log::debug!("probe: APM");
    } else {
        log::debug!("probe: no partition table");
    }
    Ok(t)
}

/// Detected scheme of `io`, `Scheme::Unknown` when there is none.
pub fn detect_scheme<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult<Scheme> {
    Ok(parse(io)?.map_or(Scheme::Unknown, |t| t.scheme()))
}

impl PartitionTable {
    /// Like [`parse`], but a missing table is `ScrubNeeded`.
    pub fn read<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult<Self> {
        parse(io)?.ok_or(PartError::ScrubNeeded)
    }
}
