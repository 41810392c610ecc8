// SPDX-License-Identifier: MIT

use blkio::prelude::*;

use crate::errors::*;
use crate::guid::Guid;
use crate::probe;

/// Human size with binary units: `512 B`, `4.0 MiB`.
pub fn pretty_bytes(n: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut val = n as f64;
    let mut idx = 0usize;
    while val >= 1024.0 && idx + 1 < UNITS.len() {
        val /= 1024.0;
        idx += 1;
    }
    if idx == 0 {
        format!("{} {}", sep_u64(n), UNITS[idx])
    } else {
        format!("{:.1} {}", val, UNITS[idx])
    }
}

/// Thousands grouped with spaces: `12 345 678`.
pub fn sep_u64(mut n: u64) -> String {
    if n < 1_000 {
        return n.to_string();
    }
    let mut parts: Vec<String> = Vec::new();
    while n >= 1_000 {
        parts.push(format!("{:03}", n % 1_000));
        n /= 1_000;
    }
    parts.push(n.to_string());
    parts.reverse();
    parts.join(" ")
}

/// First `max` characters of `s`, with `…` marking a cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Byte offset of the first GPT entry typed `type_guid`.
///
/// Fails with `NotFound` on a non-GPT device or when no entry matches.
pub fn detect_partition_offset_by_type_guid(
    io: &mut dyn BlockIO,
    type_guid: &Guid,
) -> PartResult<u64> {
    let table = probe::parse(io)?.ok_or(PartError::ScrubNeeded)?;
    if table.scheme() != crate::Scheme::Gpt {
        return Err(PartError::NotFound);
    }
    table
        .entries()
        .iter()
        .find(|e| e.type_guid().as_ref() == Some(type_guid))
        .map(|e| e.offset_bytes())
        .ok_or(PartError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guids::{GPT_PARTITION_TYPE_ESP, GPT_PARTITION_TYPE_LINUX, detect_esp_partition_offset};
    use crate::{GeometryMode, edit};

    #[test]
    fn number_formatting() {
        assert_eq!(sep_u64(999), "999");
        assert_eq!(sep_u64(12_345_678), "12 345 678");
        assert_eq!(pretty_bytes(512), "512 B");
        assert_eq!(pretty_bytes(4 * 1024 * 1024), "4.0 MiB");
        assert_eq!(pretty_bytes(1536), "1.5 KiB");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("root", 20), "root");
        assert_eq!(truncate("données-système", 8), "données…");
        assert_eq!(truncate("abc", 0), "…");
    }

    #[test]
    fn detect_offset_by_type() {
        let mut buf = vec![0u8; 16 << 20];
        let mut io = MemBlockIO::new(&mut buf);
        assert!(matches!(
            detect_partition_offset_by_type_guid(&mut io, &GPT_PARTITION_TYPE_ESP),
            Err(PartError::ScrubNeeded)
        ));

        let opts = edit::EditOptions::default();
        edit::create_empty_table(&mut io, crate::Scheme::Gpt, &opts).unwrap();
        edit::add_partition(
            &mut io,
            1 << 20,
            1 << 20,
            &GPT_PARTITION_TYPE_LINUX.to_canonical(),
            "root",
            crate::PartitionFlags::empty(),
            &edit::EditOptions {
                geometry: GeometryMode::Ignore,
                ..Default::default()
            },
        )
        .unwrap();
        edit::add_partition(
            &mut io,
            4 << 20,
            1 << 20,
            &GPT_PARTITION_TYPE_ESP.to_canonical(),
            "EFI",
            crate::PartitionFlags::empty(),
            &opts,
        )
        .unwrap();

        assert_eq!(detect_esp_partition_offset(&mut io).unwrap(), 4 << 20);
        assert_eq!(
            detect_partition_offset_by_type_guid(&mut io, &GPT_PARTITION_TYPE_LINUX).unwrap(),
            1 << 20
        );
    }
}
