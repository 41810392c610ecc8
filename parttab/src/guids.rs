// SPDX-License-Identifier: MIT

define_partition_types! {
    ESP => "EFI System Partition", 0xC12A7328_F81F_11D2_BA4B_00A0C93EC93B,
    BIOS_BOOT => "BIOS Boot Partition", 0x21686148_6449_6E6F_744E_656564454649,
    LINUX => "Linux Filesystem", 0x0FC63DAF_8483_4772_8E79_3D69D8477DE4,
    LINUX_SWAP => "Linux Swap", 0x0657FD6D_A4AB_43C4_84E5_0933C84B4F4F,
    LINUX_LVM => "Linux LVM", 0xE6D6D379_F507_44C2_A23C_238F2A3DF928,
    LINUX_RAID => "Linux RAID", 0xA19D880F_05FC_4D3B_A006_743F0F84911E,
    DATA => "Microsoft Basic Data", 0xEBD0A0A2_B9E5_4433_87C0_68B6B72699C7,
    MS_RESERVED => "Microsoft Reserved", 0xE3C9E316_0B5C_4DB8_817D_F92DF00215AE,
    APPLE_HFS => "Apple HFS+", 0x48465300_0000_11AA_AA11_00306543ECAC,
    APPLE_APFS => "Apple APFS", 0x7C3457EF_0000_11AA_AA11_00306543ECAC,
}

/// Human name for a legacy MBR partition type byte.
pub fn mbr_type_name(ty: u8) -> &'static str {
    match ty {
        0x00 => "Empty",
        0x01 => "FAT12",
        0x04 | 0x06 | 0x0E => "FAT16",
        0x05 => "Extended",
        0x07 => "NTFS/exFAT",
        0x0B | 0x0C => "FAT32",
        0x0F => "Extended (LBA)",
        0x82 => "Linux swap",
        0x83 => "Linux",
        0x85 => "Linux extended",
        0x8E => "Linux LVM",
        0xA5 => "FreeBSD",
        0xA6 => "OpenBSD",
        0xA8 => "Darwin UFS",
        0xAB => "Darwin boot",
        0xAF => "HFS/HFS+",
        0xEE => "GPT protective",
        0xEF => "EFI System",
        0xFD => "Linux RAID",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        let g = GPT_PARTITION_TYPE_LINUX;
        assert_eq!(g.to_string(), "0FC63DAF-8483-4772-8E79-3D69D8477DE4");
        assert_eq!(GptPartitionKind::from_guid(&g), GptPartitionKind::LINUX);
        assert_eq!(GptPartitionKind::LINUX.as_guid(), g);
        assert_eq!(GptPartitionKind::ESP.to_string(), "EFI System Partition");
    }

    #[test]
    fn unknown_kind_displays_guid() {
        let g = crate::guid::Guid::from_u128(1);
        let k = GptPartitionKind::from_guid(&g);
        assert_eq!(k, GptPartitionKind::Unknown(g));
        assert_eq!(k.to_string(), "00000000-0000-0000-0000-000000000001");
    }

    #[test]
    fn mbr_names() {
        assert_eq!(mbr_type_name(0x83), "Linux");
        assert_eq!(mbr_type_name(0x0F), "Extended (LBA)");
        assert_eq!(mbr_type_name(0x42), "Unknown");
    }
}
