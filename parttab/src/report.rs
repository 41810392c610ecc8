// SPDX-License-Identifier: MIT

//! Line-oriented `UDISKS_*` key=value output for device management layers.

use core::fmt;

use blkio::prelude::*;

use crate::errors::*;
use crate::probe;

const PREFIX: &str = "UDISKS_";

/// Ordered key=value pairs describing a disk or one partition of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionReport {
    lines: Vec<(&'static str, String)>,
}

impl PartitionReport {
    /// Table keys for a whole disk.
    pub fn for_disk<IO: BlockIO + ?Sized>(io: &mut IO) -> PartResult<Self> {
        let mut r = Self::default();
        r.push("MEDIA_AVAILABLE", flag(io.size_bytes() > 0));
        if io.size_bytes() == 0 {
            return Ok(r);
        }
        match probe::parse(io)? {
            Some(t) => {
                r.push("PARTITION_TABLE", "1");
                r.push("PARTITION_TABLE_SCHEME", t.scheme().token());
                r.push("PARTITION_TABLE_COUNT", t.count_in_use().to_string());
            }
            None => r.push("PARTITION_TABLE", "0"),
        }
        Ok(r)
    }

    /// Partition keys for the entry of the disk `io` covering `offset`.
    ///
    /// `slave` is reported verbatim; it names the disk for the caller.
    pub fn for_partition<IO: BlockIO + ?Sized>(
        io: &mut IO,
        offset: u64,
        slave: &str,
    ) -> PartResult<Self> {
        let root = probe::parse(io)?.ok_or(PartError::ScrubNeeded)?;
        let (table, index) = root.find(offset);
        let entry = index
            .and_then(|i| table.get_entry(i))
            .ok_or(PartError::NotFound)?;

        let mut r = Self::default();
        r.push("MEDIA_AVAILABLE", "1");
        r.push("PARTITION", "1");
        r.push("PARTITION_SCHEME", table.scheme().token());
        r.push("PARTITION_NUMBER", entry.number().to_string());
        r.push("PARTITION_TYPE", entry.type_string());
        r.push("PARTITION_SIZE", entry.size_bytes().to_string());
        r.push("PARTITION_LABEL", entry.label().unwrap_or_default());
        r.push(
            "PARTITION_UUID",
            entry.uuid().map(|g| g.to_canonical()).unwrap_or_default(),
        );
        r.push("PARTITION_FLAGS", entry.flags().to_string());
        r.push("PARTITION_OFFSET", entry.offset_bytes().to_string());
        r.push("PARTITION_SLAVE", slave);
        Ok(r)
    }

    /// Value of `key`, with or without the `UDISKS_` prefix.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.strip_prefix(PREFIX).unwrap_or(key);
        self.lines
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn push(&mut self, key: &'static str, value: impl Into<String>) {
        self.lines.push((key, value.into()));
    }
}

#[inline]
fn flag(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

impl fmt::Display for PartitionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.lines {
            writeln!(f, "{PREFIX}{k}={v}")?;
        }
        Ok(())
    }
}
