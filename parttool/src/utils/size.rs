// SPDX-License-Identifier: MIT

use anyhow::{Context, bail};

/// Parses a byte count: plain bytes, `s` for 512-byte sectors, or a binary
/// `K`/`M`/`G`/`T` suffix (`4M` is 4 MiB).
pub fn parse_size(size: &str) -> anyhow::Result<u64> {
    let lower = size.trim().to_lowercase();
    let lower = lower.strip_suffix("ib").unwrap_or(&lower);
    let lower = lower.strip_suffix('b').unwrap_or(lower);

    let (num, mult) = match lower.char_indices().last() {
        Some((i, 'k')) => (&lower[..i], 1u64 << 10),
        Some((i, 'm')) => (&lower[..i], 1 << 20),
        Some((i, 'g')) => (&lower[..i], 1 << 30),
        Some((i, 't')) => (&lower[..i], 1 << 40),
        Some((i, 's')) => (&lower[..i], 512),
        Some(_) => (lower, 1),
        None => bail!("empty size"),
    };
    let n = num
        .trim()
        .parse::<u64>()
        .with_context(|| format!("invalid size '{size}'. Use K, M, G or T suffix"))?;
    n.checked_mul(mult)
        .with_context(|| format!("size '{size}' overflows"))
}

/// Parses `ignore`, `probe` or `HEADS/SECTORS` into a geometry mode.
pub fn parse_geometry(s: &str) -> anyhow::Result<parttab::GeometryMode> {
    use parttab::GeometryMode;
    match s.trim() {
        "ignore" => Ok(GeometryMode::Ignore),
        "probe" => Ok(GeometryMode::Probe),
        other => {
            let Some((h, sct)) = other.split_once('/') else {
                bail!("geometry must be 'ignore', 'probe' or HEADS/SECTORS");
            };
            Ok(GeometryMode::Respect {
                heads: h.trim().parse().context("invalid head count")?,
                sectors: sct.trim().parse().context("invalid sectors per track")?,
            })
        }
    }
}
