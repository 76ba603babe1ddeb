//! Fixed on-disk structures: superblock, resource-file metadata, file
//! descriptor metadata, directory structures, disk lock and heartbeat
//! records (spec.md §3, §6).

use vmfs_lvm::Uuid;
use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

pub const VMFS_FS3_MAGIC: u32 = 0x2fab_f15e;
pub const VMFSL_FS3_MAGIC: u32 = 0x2fab_f15f;
pub const RESOURCE_FILE_MAGIC: u32 = 0x7266_6d64; // "rfmd"
pub const RESOURCE_CLUSTER_MAGIC: u32 = 0x7263_6d64; // "rcmd"
pub const FS6_DIR_VERSION: u32 = 0xF5_0001;
pub const FS6_DIR_DEBUG_VERSION: u32 = 0xFDC0_01;

pub const FS_CONFIG_DENSE_SBPC: u32 = 0x4;

pub const SUPERBLOCK_OFFSET: u64 = 0x20_0000;

pub const ROOT_DIR_DESC_ADDR: u64 = 0x4;
pub const FBB_DESC_ADDR: u64 = 0x40_0004;
pub const FDC_DESC_ADDR: u64 = 0x80_0004;
pub const PBC_DESC_ADDR: u64 = 0xC0_0004;
pub const SBC_DESC_ADDR: u64 = 0x100_0004;
pub const VH_DESC_ADDR: u64 = 0x140_0004;
pub const PB2_DESC_ADDR: u64 = 0x180_0004;
pub const SDD_DESC_ADDR: u64 = 0x1C0_0004;
pub const JB_DESC_ADDR: u64 = 0x200_0004;

/// `FS3_Descriptor`: the VMFS superblock, read from [`SUPERBLOCK_OFFSET`].
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Descriptor {
    pub magic: U32,
    pub major_version: U32,
    pub minor_version: U16,
    pub _pad0: [u8; 2],
    pub uuid: Uuid,
    pub label: [u8; 128],
    pub file_block_size: U32,
    pub sub_block_size: U32,
    pub md_alignment: U32,
    pub sfb_to_lfb_shift: U32,
    pub tbz_granularity: U32,
    pub config_flags: U32,
    pub fdc_cluster_group_offset: U64,
    pub fdc_clusters_per_group: U32,
    pub _pad1: [u8; 4],
    pub pb2_fd_addr: U64,
    pub pb2_vol_addr: U64,
    pub sdd_fd_addr: U64,
    pub sdd_vol_addr: U64,
    pub ctime_us: U64,
}

/// `FS3_ResFileMetadata`: header of a resource-file arena.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ResFileMetadata {
    pub resources_per_cluster: U32,
    pub clusters_per_group: U32,
    pub cluster_group_offset: U64,
    pub resource_size: U32,
    pub cluster_group_size: U32,
    pub num_resources_lo: U32,
    pub num_resources_hi: U32,
    pub num_cluster_groups: U32,
    pub signature: U32,
    pub flags: U32,
    pub parent_resources_per_cluster: U32,
    pub parent_clusters_per_group: U32,
    pub parent_cluster_group_size: U32,
    pub child_meta_offset: U64,
}

impl ResFileMetadata {
    pub fn num_resources(&self) -> u64 {
        (self.num_resources_hi.get() as u64) << 32 | self.num_resources_lo.get() as u64
    }

    /// Bit 1 of `flags`: this arena's clusters nest inside a parent arena's
    /// cluster groups (VMFS6 `.fbb.sf`, shared between LFB and child SFB).
    pub fn is_child_arena(&self) -> bool {
        self.flags.get() & 0x2 != 0
    }
}

/// `FS3_DiskLockInfo`: the lock header preceding a resource's metadata.
/// Never acquired or interpreted beyond its fixed size (spec.md §5: "no
/// locks on the filesystem itself are acquired").
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DiskLockInfo {
    pub lock_mode: U32,
    pub lock_owner: Uuid,
    pub lock_generation: U32,
    pub lock_uuid: Uuid,
    pub mtime_us: U64,
    pub num_holders: U32,
    pub _pad: [u8; 4],
}

/// `FS3_Heartbeat`: one heartbeat record (cluster coordination); parsed but
/// never written or waited on.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Heartbeat {
    pub magic: U32,
    pub pos: U64,
    pub sequence: U64,
    pub uuid: Uuid,
    pub journal_block: U64,
    pub lock_impl_free_ordinal: U32,
    pub _pad: [u8; 4],
}

/// `FS3_FileDescriptor`: the fixed-size file metadata embedded in each file
/// descriptor, at an offset that differs by VMFS version (spec.md §3 table).
/// Field widths/offsets mirror the original exactly; the `_unkN` gaps are
/// carried but never interpreted.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FileMetadata {
    pub desc_addr: U32,                 // 0x00
    pub generation: U32,                // 0x04
    pub link_count: U32,                // 0x08
    pub kind: U32,                      // 0x0c
    pub flags: U32,                     // 0x10
    pub length: U64,                    // 0x14
    pub block_size: U64,                // 0x1c
    pub num_blocks: U64,                // 0x24
    pub mtime: U32,                     // 0x2c
    pub ctime: U32,                     // 0x30
    pub atime: U32,                     // 0x34
    pub uid: U32,                       // 0x38
    pub gid: U32,                       // 0x3c
    pub mode: U32,                      // 0x40
    pub zla: U32,                       // 0x44
    pub num_tbz_lo: U32,                // 0x48
    pub cow_lo: U32,                    // 0x4c
    pub new_since_epoch_lo: U32,        // 0x50
    pub num_tbz_hi: U32,                // 0x54
    pub cow_hi: U32,                    // 0x58
    pub num_pointer_blocks: U32,        // 0x5c
    pub new_since_epoch_hi: U32,        // 0x60
    pub _unk1: U32,                     // 0x64
    pub affinity_fd: U32,               // 0x68
    pub tbz_granularity_shift: U32,     // 0x6c
    pub parent_fd: U32,                 // 0x70
    pub last_sfb_cluster_num: U32,      // 0x74
    pub _unk4: U32,                     // 0x78
    pub _unk5: U32,                     // 0x7c
    pub _unk6: U32,                     // 0x80
    pub num_prealloc_blocks: u8,        // 0x84
    pub _unk7: u8,                      // 0x85
    pub _unk8: u8,                      // 0x86
    pub _unk9: u8,                      // 0x87
    pub _unk10: u8,                     // 0x88
    pub block_offset_shift: u8,         // 0x89
    pub num_tracked: u8,                // 0x8a
    pub _unk12: u8,                     // 0x8b
    pub num_lfb: U32,                   // 0x8c
    pub _unk13: [u8; 216],              // 0x90
    pub last_free_sfbc: U32,            // 0x168
}

/// `FS3_DirEntry`: VMFS5's flat directory-entry array element.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DirEntry5 {
    pub kind: U32,
    pub desc_addr: U32,
    pub generation: U32,
    pub name: [u8; 128],
}

/// `FS6_DirHeader`: the first 0x10000 bytes of a VMFS6 directory file. The
/// hash table that follows starts right after it, at
/// `size_of::<DirHeader6>() + hash_idx * 4`. The allocation-map-block list
/// lives inside the unstructured gap between the entry counters and the
/// trailing self/parent entries; its exact sub-offset wasn't recoverable
/// from the filtered original source, so it's placed at the front of that
/// gap, which is enough to keep the struct's total size (and therefore the
/// hash table's offset) correct.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DirHeader6 {
    pub version: U32,
    pub num_entries: U32,
    pub num_allocated: U32,
    pub _unk1: U32,
    pub _unk2: U64,
    pub allocation_map_blocks: [U32; 64],
    pub _gap0: [u8; 656],
    pub _unk4: U64,
    pub _unk5: U64,
    pub self_entry: DirEntry6,
    pub parent_entry: DirEntry6,
}

pub const FS6_DIR_HEADER_SIZE: u64 = 0x10000;
pub const FS6_DIR_BLOCK_HEADER_SIZE: u64 = 64;

/// `FS6_DirBlockHeader`: the 64-byte header prefixing every `mdAlignment`
/// sized block after the directory header.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DirBlockHeader6 {
    pub version: U32,
    pub kind: U32,
    pub total_slots: U32,
    pub free_slots: U32,
    pub bitmap: [u8; 48],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DirBlockKind {
    DirEnt = 1,
    Link = 2,
    AllocationMap = 3,
}

impl DirBlockKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            1 => Self::DirEnt,
            2 => Self::Link,
            3 => Self::AllocationMap,
            _ => return None,
        })
    }
}

/// `FS6_DirEntry`: one slot inside a DIRENT block. `name` is NUL-terminated,
/// not length-prefixed.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DirEntry6 {
    pub kind: U32,
    pub desc_addr: U32,
    pub generation: U32,
    pub hash: U32,
    pub offset: U64,
    pub name: [u8; 256],
    pub _unk1: U64,
}

pub const DIR_LINK_GROUP_LINKS: usize = 12;

/// `FS6_DirLinkGroup`: hash-collision chain node inside a LINK block.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DirLink {
    pub location: U32,
    pub hash: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DirLinkGroup {
    pub hash_index: U32,
    pub total_links: U32,
    pub free_links: U32,
    pub next_free_idx: U32,
    pub links: [DirLink; DIR_LINK_GROUP_LINKS],
    pub next_group: U32,
    pub _pad: [u8; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes_match_the_on_disk_layout() {
        assert_eq!(size_of::<DiskLockInfo>(), 0x38);
        assert_eq!(size_of::<Heartbeat>(), 0x34);
        assert_eq!(size_of::<ResFileMetadata>(), 0x40);
        assert_eq!(size_of::<FileMetadata>(), 0x16c);
        assert_eq!(size_of::<DirEntry5>(), 0x8c);
        assert_eq!(size_of::<DirEntry6>(), 0x120);
        assert_eq!(size_of::<DirHeader6>(), 0x5F8);
        assert_eq!(size_of::<DirBlockHeader6>(), 0x40);
        assert_eq!(size_of::<DirLinkGroup>(), 0x78);
    }
}
