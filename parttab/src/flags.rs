// SPDX-License-Identifier: MIT

//! Scheme-agnostic partition flags and their token vocabulary.

use core::fmt;

use bitflags::bitflags;

use crate::Scheme;
use crate::errors::*;

bitflags! {
    /// Flags surfaced for a partition entry.
    ///
    /// The APM bits mirror the on-disk status word (`1 << n` for status bit `n`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PartitionFlags: u32 {
        const ALLOCATED = 1 << 1;
        const IN_USE = 1 << 2;
        const BOOT = 1 << 3;
        const ALLOW_READ = 1 << 4;
        const ALLOW_WRITE = 1 << 5;
        const BOOT_CODE_IS_PIC = 1 << 6;
        /// GPT attribute bit 0.
        const REQUIRED = 1 << 16;
    }
}

/// Token order used when rendering a flag set.
const TOKENS: [(PartitionFlags, &str); 7] = [
    (PartitionFlags::BOOT, "boot"),
    (PartitionFlags::REQUIRED, "required"),
    (PartitionFlags::ALLOCATED, "allocated"),
    (PartitionFlags::IN_USE, "in_use"),
    (PartitionFlags::ALLOW_READ, "allow_read"),
    (PartitionFlags::ALLOW_WRITE, "allow_write"),
    (PartitionFlags::BOOT_CODE_IS_PIC, "boot_code_is_pic"),
];

/// Mask of APM status bits that map onto flags.
pub(crate) const APM_STATUS_MASK: u32 = 0x7E;

impl PartitionFlags {
    /// Parses one flag token.
    pub fn from_token(token: &str) -> PartResult<Self> {
        TOKENS
            .iter()
            .find(|(_, t)| *t == token)
            .map(|(f, _)| *f)
            .ok_or(PartError::InvalidFlag("unknown flag token"))
    }

    /// Parses a set of tokens separated by whitespace or commas.
    pub fn parse_tokens(s: &str) -> PartResult<Self> {
        s.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .try_fold(PartitionFlags::empty(), |acc, t| {
                Ok(acc | PartitionFlags::from_token(t)?)
            })
    }

    pub fn tokens(&self) -> Vec<&'static str> {
        TOKENS
            .iter()
            .filter(|(f, _)| self.contains(*f))
            .map(|(_, t)| *t)
            .collect()
    }

    /// Flags a scheme can express.
    pub fn vocabulary(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Mbr | Scheme::Embr => PartitionFlags::BOOT,
            Scheme::Gpt => PartitionFlags::REQUIRED,
            Scheme::Apm => PartitionFlags::all().difference(PartitionFlags::REQUIRED),
            Scheme::Unknown => PartitionFlags::empty(),
        }
    }

    /// Rejects flags outside `scheme`'s vocabulary.
    pub fn check_for(&self, scheme: Scheme) -> PartResult {
        if PartitionFlags::vocabulary(scheme).contains(*self) {
            Ok(())
        } else {
            Err(PartError::InvalidFlag("flag not valid for this partition scheme"))
        }
    }

    #[inline]
    pub(crate) fn from_apm_status(status: u32) -> Self {
        PartitionFlags::from_bits_truncate(status & APM_STATUS_MASK)
    }

    #[inline]
    pub(crate) fn from_gpt_attributes(attrs: u64) -> Self {
        if attrs & 1 != 0 {
            PartitionFlags::REQUIRED
        } else {
            PartitionFlags::empty()
        }
    }

    /// Applies the `required` flag to bit 0 of `attrs`, keeping bits 1..=63.
    #[inline]
    pub(crate) fn merge_gpt_attributes(&self, attrs: u64) -> u64 {
        if self.contains(PartitionFlags::REQUIRED) {
            attrs | 1
        } else {
            attrs & !1
        }
    }
}

impl fmt::Display for PartitionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens().join(" "))
    }
}
