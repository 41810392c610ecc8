// SPDX-License-Identifier: MIT

use blkio::prelude::*;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::Scheme;
use crate::codec::{decode_ascii_padded, encode_ascii_padded};
use crate::errors::*;
use crate::io_ext::BlockIOLbaExt;
use crate::table::{PartitionEntry, PartitionTable, Record};

pub const APM_DDR_SIGNATURE: &[u8; 2] = b"ER";
pub const APM_ENTRY_SIGNATURE: &[u8; 2] = b"PM";
pub const APM_MAP_TYPE: &str = "Apple_partition_map";
/// Blocks reserved for the map when a new one is created.
pub const APM_DEFAULT_MAP_BLOCKS: u32 = 63;
/// Status of a fresh map entry: valid, allocated, in use, readable, writable.
const APM_MAP_STATUS: u32 = 0x37;

type U16Be = U16<BigEndian>;
type U32Be = U32<BigEndian>;

/// Block 0: the driver descriptor record.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ApmDriverDescriptor {
    pub signature: [u8; 2],
    pub block_size: U16Be,
    pub block_count: U32Be,
    pub device_type: U16Be,
    pub device_id: U16Be,
    pub data: U32Be,
    pub driver_count: U16Be,
}

/// One partition map entry; occupies the head of a block.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct ApmMapEntry {
    pub signature: [u8; 2],
    pub sig_pad: U16Be,
    pub map_count: U32Be,
    pub start_block: U32Be,
    pub block_count: U32Be,
    pub name: [u8; 32],
    pub system_type: [u8; 32],
    pub data_start: U32Be,
    pub data_count: U32Be,
    pub status: U32Be,
    pub boot_start: U32Be,
    pub boot_size: U32Be,
    pub boot_addr: U32Be,
    pub boot_addr2: U32Be,
    pub boot_entry: U32Be,
    pub boot_entry2: U32Be,
    pub boot_checksum: U32Be,
    pub processor: [u8; 16],
}

impl ApmMapEntry {
    #[inline]
    pub fn name(&self) -> String {
        decode_ascii_padded(&self.name)
    }

    #[inline]
    pub fn system_type(&self) -> String {
        decode_ascii_padded(&self.system_type)
    }

    fn new_map(map_blocks: u32) -> PartResult<Self> {
        let mut e = Self::new_zeroed();
        e.signature = *APM_ENTRY_SIGNATURE;
        e.map_count = U32::new(1);
        e.start_block = U32::new(1);
        e.block_count = U32::new(map_blocks);
        e.name = encode_ascii_padded("Apple")?;
        e.system_type = encode_ascii_padded(APM_MAP_TYPE)?;
        e.data_count = U32::new(map_blocks);
        e.status = U32::new(APM_MAP_STATUS);
        Ok(e)
    }
}

/// Parses an Apple partition map; `None` without `ER` at block 0 and `PM` at block 1.
pub fn parse_apm<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult<Option<PartitionTable>> {
    let dev_bs = io.logical_block_size() as u64;
    if io.size_bytes() < dev_bs {
        return Ok(None);
    }
    let block0 = io.read_blocks(0, dev_bs, 1)?;
    let Ok((ddr, _)) = ApmDriverDescriptor::read_from_prefix(&block0) else {
        return Ok(None);
    };
    if &ddr.signature != APM_DDR_SIGNATURE {
        return Ok(None);
    }

    let bs = ddr.block_size.get() as u64;
    if bs < 512 || !bs.is_power_of_two() {
        return Err(PartError::Malformed("APM block size must be a power of two >= 512"));
    }
    if io.size_bytes() < 2 * bs {
        return Err(PartError::Malformed("APM map lies past the end of the device"));
    }

    let first = read_entry(io, 1, bs)?;
    if &first.0.signature != APM_ENTRY_SIGNATURE {
        log::debug!("apm: ER block without a PM entry at block 1");
        return Ok(None);
    }
    let map_count = first.0.map_count.get() as u64;
    if map_count == 0 || (map_count + 1).saturating_mul(bs) > io.size_bytes() {
        return Err(PartError::Malformed("APM map count out of range"));
    }

    let mut table = PartitionTable::new(Scheme::Apm, 0, io.size_bytes(), dev_bs as u32);
    table.apm_block_size = Some(bs as u32);
    for block in 1..=map_count {
        let (entry, tail) = if block == 1 {
            first.clone()
        } else {
            read_entry(io, block, bs)?
        };
        if &entry.signature != APM_ENTRY_SIGNATURE {
            return Err(PartError::Malformed("APM map entry without PM signature"));
        }
        table.entries.push(PartitionEntry {
            scheme: Scheme::Apm,
            record: Record::Apm { entry, tail },
            record_offset: block * bs,
            base_offset: 0,
            block_size: bs,
            slot: (block - 1) as usize,
            nested: None,
        });
    }

    table.validate()?;
    log::debug!("apm: {} map entries, block size {bs}", table.num_entries());
    Ok(Some(table))
}

fn read_entry<IO: BlockIO + ?Sized>(io: &mut IO, block: u64, bs: u64) -> PartResult<(ApmMapEntry, Vec<u8>)> {
    let raw = io.read_blocks(block, bs, 1)?;
    let (entry, tail) = ApmMapEntry::read_from_prefix(&raw)
        .map_err(|_| PartError::MalformedField("APM block shorter than a map entry"))?;
    Ok((entry, tail.to_vec()))
}

/// Writes the `ER` block and a map holding only its own `Apple_partition_map` entry.
pub fn create_empty<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult {
    let bs = io.logical_block_size() as u64;
    let block_size =
        u16::try_from(bs).map_err(|_| PartError::NotSupported("APM block size above 32 KiB"))?;
    let total = io.total_blocks(bs);
    if total < 2 {
        return Err(PartError::NoSpace("device too small for an APM"));
    }
    let map_blocks = APM_DEFAULT_MAP_BLOCKS.min((total - 1).min(u32::MAX as u64) as u32);

    let mut ddr = ApmDriverDescriptor::new_zeroed();
    ddr.signature = *APM_DDR_SIGNATURE;
    ddr.block_size = U16::new(block_size);
    ddr.block_count = U32::new(total.min(u32::MAX as u64) as u32);

    let mut block = vec![0u8; bs as usize];
    block[..core::mem::size_of::<ApmDriverDescriptor>()].copy_from_slice(ddr.as_bytes());
    io.write_at_lba(0, bs, &block)?;

    block.fill(0);
    let map = ApmMapEntry::new_map(map_blocks)?;
    block[..core::mem::size_of::<ApmMapEntry>()].copy_from_slice(map.as_bytes());
    io.write_at_lba(1, bs, &block)?;

    io.flush()?;
    log::debug!("apm: created empty map ({map_blocks} blocks)");
    Ok(())
}
