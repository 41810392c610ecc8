// SPDX-License-Identifier: MIT

#[macro_export]
/// Defines a set of GPT partition types, along with associated constants, detection functions, and an enum for partition kinds.
///
/// This macro generates:
/// - A `Guid` constant for each partition type.
/// - A function to detect the byte offset of the first partition of each type on a device.
/// - A function to check if a partition entry matches a given type.
/// - An enum `GptPartitionKind` representing all defined partition types and an `Unknown` variant for unrecognized GUIDs.
/// - Implementations for converting between GUIDs and `GptPartitionKind`.
/// - A `Display` implementation for `GptPartitionKind`.
///
/// # Example
/// ```rust,ignore
/// define_partition_types! {
///     ESP => "EFI System Partition", 0xC12A7328_F81F_11D2_BA4B_00A0C93EC93B,
///     LINUX => "Linux Filesystem", 0x0FC63DAF_8483_4772_8E79_3D69D8477DE4,
/// }
/// ```
///
/// # Parameters
/// - `$name`: Identifier for the partition type (used for enum variant and function/constant names).
/// - `$desc`: Description string for the partition type.
/// - `$guid`: the GUID as a `u128` literal, read in canonical string order.
///
/// # Generated Items
/// For each partition type:
/// - `pub const GPT_PARTITION_TYPE_<NAME>: Guid`
/// - `pub fn detect_<name>_partition_offset(io: &mut dyn BlockIO) -> PartResult<u64>`
/// - `pub fn is_<name>_partition(entry: &PartitionEntry) -> bool`
macro_rules! define_partition_types {
    (
        $(
            $name:ident => $desc:expr, $guid:expr
        ),+ $(,)?
    ) => {
        paste::paste! {
            $(
                #[doc = $desc]
                pub const [<GPT_PARTITION_TYPE_ $name:upper>]: $crate::guid::Guid =
                    $crate::guid::Guid::from_u128($guid);

                #[doc = concat!("Returns the byte offset of the first GPT partition of type: ", $desc)]
                pub fn [<detect_ $name:lower _partition_offset>](
                    io: &mut dyn blkio::prelude::BlockIO,
                ) -> $crate::errors::PartResult<u64> {
                    $crate::utils::detect_partition_offset_by_type_guid(io, &[<GPT_PARTITION_TYPE_ $name:upper>])
                }

                #[doc = concat!("Checks if a GPT partition is of type: ", $desc)]
                pub fn [<is_ $name:lower _partition>](
                    entry: &$crate::table::PartitionEntry,
                ) -> bool {
                    entry.type_guid() == Some([<GPT_PARTITION_TYPE_ $name:upper>])
                }
            )+

            #[allow(non_camel_case_types)]
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub enum GptPartitionKind {
                $($name,)+
                Unknown($crate::guid::Guid),
            }

            impl GptPartitionKind {
                pub fn from_guid(guid: &$crate::guid::Guid) -> Self {
                    match guid {
                        $(g if *g == [<GPT_PARTITION_TYPE_ $name:upper>] => Self::$name,)+
                        other => Self::Unknown(*other),
                    }
                }

                pub fn as_guid(&self) -> $crate::guid::Guid {
                    match self {
                        $(Self::$name => [<GPT_PARTITION_TYPE_ $name:upper>],)+
                        Self::Unknown(guid) => *guid,
                    }
                }
            }

            impl core::fmt::Display for GptPartitionKind {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    match self {
                        $(Self::$name => write!(f, $desc),)+
                        Self::Unknown(guid) => write!(f, "{}", guid),
                    }
                }
            }
        }
    };
}
