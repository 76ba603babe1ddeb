use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::uuid::Uuid;

pub const LVM_MAGIC_NUMBER: u32 = 0xC001D00D;
pub const LVM_DEV_HEADER_OFFSET: u64 = 0x0010_0000;
pub const LVM_MAX_VOLUME_LABEL_LENGTH: usize = 64;

pub const DISK_BLOCK_SIZE_512B: u64 = 512;
pub const FS_PLIST_DEF_MAX_PARTITIONS: u64 = 32;

pub const LVM_SIZEOF_LVM_DEVMETA_LVM5: u64 = DISK_BLOCK_SIZE_512B;
pub const LVM_SIZEOF_VTENTRY: u64 = 512;
pub const LVM_SIZEOF_PTENTRY: u64 = 128;
pub const LVM_SIZEOF_SDTENTRY: u64 = 256;

pub const LVM_MAX_VOLUMES_PER_DEV_LVM5: u32 = 512;
pub const LVM_MAX_VOLUMES_PER_DEV_LVM6: u32 = 1;

pub const LVM_PES_PER_BITMAP: u32 = 8192;
pub const LVM_PE_BITMAP_SIZE_LVM5: u64 = (LVM_PES_PER_BITMAP / 8) as u64;

/// Volume lifecycle state, as stored in `LVM_VolMetadata::state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VolState {
    Invalid = 0,
    Normal = 1,
    ResigPending = 2,
    ResigDone = 3,
    Sentinel = 4,
}

impl VolState {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Invalid,
            1 => Self::Normal,
            2 => Self::ResigPending,
            3 => Self::ResigDone,
            4 => Self::Sentinel,
            _ => return None,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ScsiDiskId {
    pub kind: u8,
    pub len: u8,
    pub lun: U16,
    pub device_type: u8,
    pub scsi_level: u8,
    pub vendor: [u8; 8],
    pub model: [u8; 16],
    pub revision: [u8; 4],
    pub id: [u8; 44],
}

/// Fixed-offset device header. Field offsets are commented with the values
/// from the original cstruct definition; they are a consequence of field
/// order and size, not separately enforced.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DevMetadata {
    pub magic: U32,
    pub major_version: U32,
    pub minor_version: U32,
    pub disk_id: ScsiDiskId,
    pub disk_block_size: U32,
    pub total_bytes: U64,
    pub num_volumes: U32,
    pub num_pes: U32,
    pub last_pe_index: U32,
    pub generation: U64,
    pub data_offset: U64,
    pub dev_id: Uuid,
    pub init_time_us: U64,
    pub mod_time_us: U64,
    pub locked_by: Uuid,
    pub locked_when_us: U64,
    pub unknown0: U32,
    pub num_pe_maps: U32,
    pub ext_dev_metadata_offset: U64,
    pub md_alignment: U32,
    pub num_pes6: U32,
    pub flags: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ExtDevMetadata {
    pub magic: U32,
    pub num_pe_maps: U32,
    pub data_offset: U64,
    pub next_offset: U64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct VolId {
    pub uuid: Uuid,
    pub snap_id: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct VolMetadata {
    pub logical_size: U64,
    pub generation: U64,
    pub state: U32,
    pub name: [u8; LVM_MAX_VOLUME_LABEL_LENGTH],
    pub lv_id: VolId,
    pub creation_time_us: U64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ExtVolMetadata {
    pub num_devs: U32,
    pub pad: [u8; 124],
    pub consumed_pes: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct VolDescriptor {
    pub vol_meta: VolMetadata,
    pub volume_id: U32,
    pub num_pes: U32,
    pub first_pe: U64,
    pub last_pe: U64,
    pub mod_time_us: U64,
    pub ext_vol_meta: ExtVolMetadata,
    pub pad: [u8; 236],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PeDescriptor {
    pub pe_id: U32,
    pub volume_id: U32,
    pub p_offset: U64,
    pub l_offset: U64,
    pub length: U64,
    pub version: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PeTableEntry {
    pub used: u8,
    pub pe_desc: PeDescriptor,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct SdTableEntry {
    pub device_name: [u8; 256],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes_match_the_on_disk_layout() {
        assert_eq!(size_of::<Uuid>(), 0x10);
        assert_eq!(size_of::<ScsiDiskId>(), 0x4E);
        assert_eq!(size_of::<DevMetadata>(), 0xD6);
        assert_eq!(size_of::<ExtDevMetadata>(), 0x18);
        assert_eq!(size_of::<VolId>(), 0x14);
        assert_eq!(size_of::<VolMetadata>(), 0x70);
        assert_eq!(size_of::<ExtVolMetadata>(), 0x84);
        assert_eq!(size_of::<VolDescriptor>(), 0x200);
        assert_eq!(size_of::<PeDescriptor>(), 0x24);
        assert_eq!(size_of::<PeTableEntry>(), 0x25);
        assert_eq!(size_of::<SdTableEntry>(), 0x100);
    }
}
