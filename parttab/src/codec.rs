// SPDX-License-Identifier: MIT

//! Bounds-checked field access for on-disk records.
//!
//! Every helper fails with [`PartError::MalformedField`] instead of panicking,
//! so parsers can be fed arbitrary bytes.

use crate::errors::*;

/// Number of UTF-16 code units in a GPT partition name.
pub const GPT_NAME_UNITS: usize = 36;
/// Byte length of a GPT partition name.
pub const GPT_NAME_BYTES: usize = GPT_NAME_UNITS * 2;

#[inline]
fn field<const N: usize>(buf: &[u8], off: usize) -> PartResult<[u8; N]> {
    off.checked_add(N)
        .and_then(|end| buf.get(off..end))
        .and_then(|s| s.try_into().ok())
        .ok_or(PartError::MalformedField("field out of bounds"))
}

#[inline]
fn field_mut<const N: usize>(buf: &mut [u8], off: usize) -> PartResult<&mut [u8]> {
    let end = off
        .checked_add(N)
        .ok_or(PartError::MalformedField("field out of bounds"))?;
    buf.get_mut(off..end)
        .ok_or(PartError::MalformedField("field out of bounds"))
}

macro_rules! codec_int {
    ($($ty:ty),+ $(,)?) => {
        $(
            paste::paste! {
                #[doc = concat!("Reads a little-endian `", stringify!($ty), "` at `off`.")]
                #[inline]
                pub fn [<read_ $ty _le>](buf: &[u8], off: usize) -> PartResult<$ty> {
                    Ok(<$ty>::from_le_bytes(field(buf, off)?))
                }

                #[doc = concat!("Reads a big-endian `", stringify!($ty), "` at `off`.")]
                #[inline]
                pub fn [<read_ $ty _be>](buf: &[u8], off: usize) -> PartResult<$ty> {
                    Ok(<$ty>::from_be_bytes(field(buf, off)?))
                }

                #[inline]
                pub fn [<write_ $ty _le>](buf: &mut [u8], off: usize, v: $ty) -> PartResult {
                    field_mut::<{ core::mem::size_of::<$ty>() }>(buf, off)?
                        .copy_from_slice(&v.to_le_bytes());
                    Ok(())
                }

                #[inline]
                pub fn [<write_ $ty _be>](buf: &mut [u8], off: usize, v: $ty) -> PartResult {
                    field_mut::<{ core::mem::size_of::<$ty>() }>(buf, off)?
                        .copy_from_slice(&v.to_be_bytes());
                    Ok(())
                }
            }
        )+
    };
}

codec_int!(u16, u32, u64);

/// Decodes a GPT partition name: up to 36 UTF-16LE code units, NUL-terminated.
/// Lone surrogates become U+FFFD.
pub fn decode_utf16le_name(bytes: &[u8]) -> PartResult<String> {
    if bytes.len() != GPT_NAME_BYTES {
        return Err(PartError::MalformedField("GPT name must be 72 bytes"));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// Encodes `name` into the 72-byte GPT name field, NUL padded.
pub fn encode_utf16le_name(name: &str) -> PartResult<[u8; GPT_NAME_BYTES]> {
    let mut out = [0u8; GPT_NAME_BYTES];
    let mut count = 0usize;
    for unit in name.encode_utf16() {
        if unit == 0 {
            return Err(PartError::MalformedField("GPT name contains NUL"));
        }
        if count == GPT_NAME_UNITS {
            return Err(PartError::MalformedField("GPT name longer than 36 code units"));
        }
        out[count * 2..count * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        count += 1;
    }
    Ok(out)
}

/// Trims trailing NULs and ASCII whitespace from a fixed-width field.
/// Bytes outside ASCII are replaced rather than rejected.
pub fn decode_ascii_padded(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |p| p + 1);
    let head = &bytes[..end];
    // Apple tools NUL-terminate and may leave garbage after the terminator.
    let head = match head.iter().position(|&b| b == 0) {
        Some(nul) => &head[..nul],
        None => head,
    };
    head.iter()
        .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
        .collect()
}

/// Encodes `s` into a NUL-padded ASCII field of `N` bytes.
pub fn encode_ascii_padded<const N: usize>(s: &str) -> PartResult<[u8; N]> {
    if !s.is_ascii() || s.bytes().any(|b| b == 0) {
        return Err(PartError::MalformedField("field must be NUL-free ASCII"));
    }
    if s.len() > N {
        return Err(PartError::MalformedField("ASCII field too long"));
    }
    let mut out = [0u8; N];
    out[..s.len()].copy_from_slice(s.as_bytes());
    Ok(out)
}
