// SPDX-License-Identifier: MIT

use core::fmt;
use core::str::FromStr;

use uuid::Uuid;

use crate::errors::*;

/// A GUID as stored by GPT: the first three fields little-endian, the last
/// eight bytes in order. Displayed as canonical uppercase `8-4-4-4-12`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid(Uuid);

impl Guid {
    pub const ZERO: Guid = Guid(Uuid::nil());

    /// Builds a GUID from its canonical big-endian numeric value,
    /// i.e. `0xC12A7328_F81F_11D2_BA4B_00A0C93EC93B` for `C12A7328-F81F-11D2-BA4B-00A0C93EC93B`.
    #[inline]
    pub const fn from_u128(v: u128) -> Self {
        Guid(Uuid::from_u128(v))
    }

    #[inline]
    pub fn new_random() -> Self {
        Guid(Uuid::new_v4())
    }

    #[inline]
    pub fn from_mixed_endian_bytes(bytes: [u8; 16]) -> Self {
        Guid(Uuid::from_bytes_le(bytes))
    }

    #[inline]
    pub fn to_mixed_endian_bytes(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_nil()
    }

    /// Parses exactly `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` (hex digits of either case).
    pub fn parse_canonical(s: &str) -> PartResult<Self> {
        let b = s.as_bytes();
        if b.len() != 36 {
            return Err(PartError::MalformedField("GUID must be 36 characters"));
        }
        for (i, &c) in b.iter().enumerate() {
            let ok = match i {
                8 | 13 | 18 | 23 => c == b'-',
                _ => c.is_ascii_hexdigit(),
            };
            if !ok {
                return Err(PartError::MalformedField("GUID is not in 8-4-4-4-12 form"));
            }
        }
        Uuid::parse_str(s)
            .map(Guid)
            .map_err(|_| PartError::MalformedField("GUID is not in 8-4-4-4-12 form"))
    }

    pub fn to_canonical(&self) -> String {
        self.0.hyphenated().to_string().to_ascii_uppercase()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.to_canonical())
    }
}

impl FromStr for Guid {
    type Err = PartError;

    fn from_str(s: &str) -> PartResult<Self> {
        Guid::parse_canonical(s)
    }
}

/// Decodes 16 mixed-endian on-disk bytes into a canonical GUID string.
pub fn decode_guid_le(bytes: &[u8]) -> PartResult<String> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| PartError::MalformedField("GUID must be 16 bytes"))?;
    Ok(Guid::from_mixed_endian_bytes(raw).to_canonical())
}

/// Inverse of [`decode_guid_le`].
pub fn encode_guid_le(s: &str) -> PartResult<[u8; 16]> {
    Ok(Guid::parse_canonical(s)?.to_mixed_endian_bytes())
}
