//! Filesystem bootstrap: superblock parsing, the system-file-descriptor
//! escape hatch used before the resource manager exists, and path lookup
//! (spec.md §3, §5, §9).

use std::{cell::RefCell, rc::Rc};

use lru::LruCache;
use vmfs_ds::DataStorage;
use vmfs_err::{Error, FsError, Result};
use vmfs_lvm::Volume;
use zerocopy::IntoBytes;

use crate::{
    address::{self, AddrKind},
    descriptor::FileDescriptor,
    directory,
    layout::FsLayout,
    resource::{ResourceFile, ResourceManager},
    structs::{
        Descriptor, ResFileMetadata, FBB_DESC_ADDR, FDC_DESC_ADDR, JB_DESC_ADDR,
        PBC_DESC_ADDR, PB2_DESC_ADDR, ROOT_DIR_DESC_ADDR, SBC_DESC_ADDR, SUPERBLOCK_OFFSET,
        VMFSL_FS3_MAGIC, VMFS_FS3_MAGIC,
    },
};

const FD_CACHE_CAPACITY: usize = 4096;

/// Reads a fixed-size struct directly from a volume at an absolute offset,
/// bypassing the resource manager entirely. Only used during bootstrap,
/// before any resource file is open.
fn read_struct_at<DS: DataStorage, T: zerocopy::FromBytes + zerocopy::IntoBytes>(
    volume: &Volume<DS>,
    offset: u64,
) -> Result<T> {
    let size = size_of::<T>();
    let mut buf = vec![0u8; size];
    let stream = volume.open()?;
    stream.read_at(offset, &mut buf)?;
    let mut value: T = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
    value.as_mut_bytes().copy_from_slice(&buf);
    Ok(value)
}

/// `Res3_GetSFDOffset`: the volume offset of a system file's own descriptor,
/// computed purely from the superblock, without going through the FDC
/// resource file (which doesn't exist yet at this point in bootstrap).
fn sfd_offset(sb: &Descriptor, layout: &FsLayout, address: u64) -> u64 {
    let (_, resource) = address::file_descriptor::parse(address as u32);
    let resource = resource as u64;

    if layout.is_vmfs6 {
        let md_alignment = layout.md_alignment;
        let cg_offset = (((md_alignment << 10) + 0x3F_FFFF) & 0xFFFF_FFFF_FFF0_0000)
            + sb.fdc_cluster_group_offset.get();
        let resource_size = 2 * md_alignment;
        cg_offset + sb.fdc_clusters_per_group.get() as u64 * resource_size + resource * resource_size
    } else {
        if !layout.dense_sbpc {
            if address == sb.pb2_fd_addr.get() {
                return sb.pb2_vol_addr.get();
            }
        }

        let fbs = layout.file_block_size;
        let cg_offset = fbs * ((fbs + 0x3F_FFFF) / fbs) + sb.fdc_cluster_group_offset.get();
        let resource_size = 1024u64;
        let resource_offset = resource << 11;
        cg_offset + sb.fdc_clusters_per_group.get() as u64 * resource_size + resource_offset
    }
}

fn get_sfd<DS: DataStorage>(
    volume: &Volume<DS>,
    layout: &FsLayout,
    sb: &Descriptor,
    address: u64,
) -> Result<FileDescriptor<DS>> {
    let offset = sfd_offset(sb, layout, address);
    let mut buf = vec![0u8; layout.fd_size as usize];
    let stream = volume.open()?;
    stream.read_at(offset, &mut buf)?;
    FileDescriptor::parse(layout, offset, address, &buf)
}

/// A system file's arena metadata header is stored as its own resident
/// data, at a fixed offset independent of the resource manager.
fn read_arena_metadata<DS: DataStorage>(
    volume: &Volume<DS>,
    layout: &FsLayout,
    fd_volume_offset: u64,
) -> Result<ResFileMetadata> {
    read_struct_at(volume, fd_volume_offset + layout.fd_data_offset)
}

/// Reads a fixed-size struct from offset `offset` of a raw, volume-less
/// system-file stream (JBOSF bootstrap: spec.md §6, §8 scenario 9).
fn read_struct_from_ds<DS: DataStorage, T: zerocopy::FromBytes + zerocopy::IntoBytes>(
    ds: &DS,
    offset: u64,
) -> Result<T> {
    let size = size_of::<T>();
    let mut buf = vec![0u8; size];
    ds.read(offset, &mut buf)
        .map_err(|err| Error::Io(vmfs_err::IoError::Device(err.to_string())))?;
    let mut value: T = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
    value.as_mut_bytes().copy_from_slice(&buf);
    Ok(value)
}

fn open_system_resource<DS: DataStorage>(
    volume: &Volume<DS>,
    sb: &Descriptor,
    layout: &FsLayout,
    kind: AddrKind,
    address: u64,
) -> Result<ResourceFile<DS>> {
    let fd_volume_offset = sfd_offset(sb, layout, address);
    let owning_fd = get_sfd(volume, layout, sb, address)?;
    let metadata = read_arena_metadata(volume, layout, fd_volume_offset)?;
    Ok(ResourceFile::arena_on_volume(kind, metadata, owning_fd))
}

/// Anything [`Vmfs::get`] can resolve to a file descriptor (spec.md §6:
/// `get(path: str | int | DirEntry)`).
pub enum GetTarget<'a> {
    Path(&'a str),
    Address(u64),
    Entry(&'a directory::DirEntry),
}

impl<'a> From<&'a str> for GetTarget<'a> {
    fn from(path: &'a str) -> Self {
        Self::Path(path)
    }
}

impl From<u64> for GetTarget<'_> {
    fn from(address: u64) -> Self {
        Self::Address(address)
    }
}

impl<'a> From<&'a directory::DirEntry> for GetTarget<'a> {
    fn from(entry: &'a directory::DirEntry) -> Self {
        Self::Entry(entry)
    }
}

/// Read-only VMFS5/VMFS6 filesystem over an already-opened [`Volume`].
pub struct Vmfs<DS: DataStorage> {
    pub descriptor: Descriptor,
    pub layout: FsLayout,
    pub uuid: String,
    pub label: String,
    resources: ResourceManager<DS>,
    fd_cache: RefCell<LruCache<u64, Rc<FileDescriptor<DS>>>>,
}

impl<DS: DataStorage> Vmfs<DS> {
    pub fn open(volume: Rc<Volume<DS>>) -> Result<Self> {
        let sb: Descriptor = {
            let stream = volume.open()?;
            let mut buf = vec![0u8; size_of::<Descriptor>()];
            stream.read_at(SUPERBLOCK_OFFSET, &mut buf)?;
            let mut value: Descriptor = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
            value.as_mut_bytes().copy_from_slice(&buf);
            value
        };

        if sb.magic.get() != VMFS_FS3_MAGIC && sb.magic.get() != VMFSL_FS3_MAGIC {
            return Err(Error::Fs(FsError::InvalidHeader {
                reason: "bad VMFS superblock magic",
            }));
        }

        let layout = FsLayout::from_superblock(&sb);
        let uuid = sb.uuid.to_string();
        let label = {
            let end = sb.label.iter().position(|&b| b == 0).unwrap_or(sb.label.len());
            String::from_utf8_lossy(&sb.label[..end]).into_owned()
        };

        let mut resources = ResourceManager::new(layout, Some(volume.clone()));

        // .pb2.sf: on VMFS6 always at the fixed address; on VMFS5 the
        // superblock carries its own descriptor address (not every VMFS5
        // volume has one).
        let pb2_addr = if layout.is_vmfs6 {
            PB2_DESC_ADDR
        } else {
            sb.pb2_fd_addr.get()
        };
        if sb.pb2_vol_addr.get() != 0 {
            resources.insert(open_system_resource(
                &volume,
                &sb,
                &layout,
                AddrKind::PointerBlock2,
                pb2_addr,
            )?);
        }

        resources.insert(open_system_resource(
            &volume,
            &sb,
            &layout,
            AddrKind::PointerBlock,
            PBC_DESC_ADDR,
        )?);

        if layout.is_vmfs6 {
            let lfb = open_system_resource(&volume, &sb, &layout, AddrKind::LargeFileBlock, FBB_DESC_ADDR)?;
            let child_meta_offset = lfb
                .metadata()
                .map(|m| m.child_meta_offset.get())
                .unwrap_or(0);
            resources.insert(lfb);

            let fd_volume_offset = sfd_offset(&sb, &layout, FBB_DESC_ADDR);
            let owning_fd = get_sfd(&volume, &layout, &sb, FBB_DESC_ADDR)?;
            let sfb_metadata: ResFileMetadata =
                read_struct_at(&volume, fd_volume_offset + layout.fd_data_offset + child_meta_offset)?;
            resources.insert(ResourceFile::arena_on_volume(
                AddrKind::FileBlock,
                sfb_metadata,
                owning_fd,
            ));
        } else {
            resources.insert(open_system_resource(&volume, &sb, &layout, AddrKind::FileBlock, FBB_DESC_ADDR)?);
        }

        resources.insert(open_system_resource(
            &volume,
            &sb,
            &layout,
            AddrKind::FileDescriptor,
            FDC_DESC_ADDR,
        )?);
        resources.insert(open_system_resource(
            &volume,
            &sb,
            &layout,
            AddrKind::SubBlock,
            SBC_DESC_ADDR,
        )?);

        if layout.is_vmfs6 {
            resources.insert(open_system_resource(
                &volume,
                &sb,
                &layout,
                AddrKind::JournalBlock,
                JB_DESC_ADDR,
            )?);
        }

        let fd_cache = RefCell::new(LruCache::new(
            std::num::NonZeroUsize::new(FD_CACHE_CAPACITY).unwrap(),
        ));

        Ok(Self {
            descriptor: sb,
            layout,
            uuid,
            label,
            resources,
            fd_cache,
        })
    }

    /// Bootstraps a filesystem from raw system-file byte streams alone, with
    /// no backing volume ("just a bunch of system files"; spec.md §6,
    /// §8 scenario 9). Every system file but `vh` is optional: whichever
    /// resource files are missing simply aren't opened, and reads landing
    /// on them fail with `VolumeNotAvailable` rather than during bootstrap.
    /// Reads that need an on-volume file block still fail the same way;
    /// resident and sub-block-backed reads succeed normally.
    pub fn open_system_files(
        vh: DS,
        fdc: Option<DS>,
        fbb: Option<DS>,
        sbc: Option<DS>,
        pbc: Option<DS>,
        pb2: Option<DS>,
        jbc: Option<DS>,
    ) -> Result<Self> {
        let sb: Descriptor = read_struct_from_ds(&vh, SUPERBLOCK_OFFSET)?;

        if sb.magic.get() != VMFS_FS3_MAGIC && sb.magic.get() != VMFSL_FS3_MAGIC {
            return Err(Error::Fs(FsError::InvalidHeader {
                reason: "bad VMFS superblock magic",
            }));
        }

        let layout = FsLayout::from_superblock(&sb);
        let uuid = sb.uuid.to_string();
        let label = {
            let end = sb.label.iter().position(|&b| b == 0).unwrap_or(sb.label.len());
            String::from_utf8_lossy(&sb.label[..end]).into_owned()
        };

        let mut resources = ResourceManager::new(layout, None);

        if let Some(pb2) = pb2 {
            let metadata: ResFileMetadata = read_struct_from_ds(&pb2, 0)?;
            resources.insert(ResourceFile::arena_raw(AddrKind::PointerBlock2, metadata, Rc::new(pb2)));
        }

        if let Some(pbc) = pbc {
            let metadata: ResFileMetadata = read_struct_from_ds(&pbc, 0)?;
            resources.insert(ResourceFile::arena_raw(AddrKind::PointerBlock, metadata, Rc::new(pbc)));
        }

        if let Some(fbb) = fbb {
            let fbb = Rc::new(fbb);
            if layout.is_vmfs6 {
                let lfb_metadata: ResFileMetadata = read_struct_from_ds(fbb.as_ref(), 0)?;
                let child_meta_offset = lfb_metadata.child_meta_offset.get();
                resources.insert(ResourceFile::arena_raw(AddrKind::LargeFileBlock, lfb_metadata, fbb.clone()));
                let sfb_metadata: ResFileMetadata = read_struct_from_ds(fbb.as_ref(), child_meta_offset)?;
                resources.insert(ResourceFile::arena_raw(AddrKind::FileBlock, sfb_metadata, fbb));
            } else {
                let metadata: ResFileMetadata = read_struct_from_ds(fbb.as_ref(), 0)?;
                resources.insert(ResourceFile::arena_raw(AddrKind::FileBlock, metadata, fbb));
            }
        }

        if let Some(fdc) = fdc {
            let metadata: ResFileMetadata = read_struct_from_ds(&fdc, 0)?;
            resources.insert(ResourceFile::arena_raw(AddrKind::FileDescriptor, metadata, Rc::new(fdc)));
        }

        if let Some(sbc) = sbc {
            let metadata: ResFileMetadata = read_struct_from_ds(&sbc, 0)?;
            resources.insert(ResourceFile::arena_raw(AddrKind::SubBlock, metadata, Rc::new(sbc)));
        }

        if layout.is_vmfs6 {
            if let Some(jbc) = jbc {
                let metadata: ResFileMetadata = read_struct_from_ds(&jbc, 0)?;
                resources.insert(ResourceFile::arena_raw(AddrKind::JournalBlock, metadata, Rc::new(jbc)));
            }
        }

        let fd_cache = RefCell::new(LruCache::new(
            std::num::NonZeroUsize::new(FD_CACHE_CAPACITY).unwrap(),
        ));

        Ok(Self {
            descriptor: sb,
            layout,
            uuid,
            label,
            resources,
            fd_cache,
        })
    }

    pub fn is_vmfs5(&self) -> bool {
        !self.layout.is_vmfs6
    }

    pub fn is_vmfs6(&self) -> bool {
        self.layout.is_vmfs6
    }

    pub fn is_local(&self) -> bool {
        self.descriptor.magic.get() == VMFSL_FS3_MAGIC
    }

    /// Reads and caches the file descriptor at `address`, which must encode
    /// [`AddrKind::FileDescriptor`].
    pub fn file_descriptor(&self, address: u64) -> Result<Rc<FileDescriptor<DS>>> {
        if let Some(fd) = self.fd_cache.borrow_mut().get(&address) {
            return Ok(fd.clone());
        }

        if address::kind(address) != Some(AddrKind::FileDescriptor) {
            return Err(Error::Fs(FsError::Corrupt {
                addr: address,
                kind: address::kind_tag(address),
            }));
        }

        // In JBOSF mode there's no volume to resolve an on-volume offset
        // against; `volume_offset` then goes unused (the best-effort read
        // path slices resident data out of the descriptor's own raw bytes
        // instead), so a placeholder of 0 is harmless.
        let volume_offset = match self.resources.resolve_address(address) {
            Ok(offset) => offset,
            Err(Error::Fs(FsError::VolumeNotAvailable(_))) if self.resources.volume.is_none() => 0,
            Err(err) => return Err(err),
        };
        let raw = self.resources.read_resource(address)?;
        let fd = Rc::new(FileDescriptor::parse(&self.layout, volume_offset, address, &raw)?);
        self.fd_cache.borrow_mut().put(address, fd.clone());
        Ok(fd)
    }

    pub fn root(&self) -> Result<Rc<FileDescriptor<DS>>> {
        self.file_descriptor(ROOT_DIR_DESC_ADDR)
    }

    /// `VMFS.get(path | address | DirEntry)` (spec.md §6): a `/`-separated
    /// path resolves one component at a time from the root; a raw FD
    /// address or an already-looked-up [`directory::DirEntry`] resolve
    /// directly, without touching the root directory at all — which is how
    /// a resident file can still be fetched by address in JBOSF mode even
    /// though its containing directory may not be reachable.
    pub fn get<'a>(&self, target: impl Into<GetTarget<'a>>) -> Result<Rc<FileDescriptor<DS>>> {
        match target.into() {
            GetTarget::Address(address) => self.file_descriptor(address),
            GetTarget::Entry(entry) => self.file_descriptor(entry.desc_addr),
            GetTarget::Path(path) => {
                let mut node = self.root()?;
                for component in path.split('/') {
                    if component.is_empty() {
                        continue;
                    }
                    let child_addr = directory::get(node.as_ref(), &self.layout, &self.resources, component)?;
                    node = self.file_descriptor(child_addr)?;
                }
                Ok(node)
            }
        }
    }

    pub fn resources(&self) -> &ResourceManager<DS> {
        &self.resources
    }
}

/// Bridges the kernel-facing, numeric-index `FileSystem` ABI shared by every
/// Hyrax-derived filesystem crate onto a VMFS file descriptor address.
/// Read-only, like every other implementor in this workspace that doesn't
/// support the operation.
impl<DS: DataStorage> vmfs_fs::FileSystem for Vmfs<DS> {
    fn stat(&self, index: u64, _offset: u64, _buffer: &mut [u8]) -> vmfs_fs::Result<u64> {
        Ok(self.file_descriptor(index)?.len())
    }

    fn read(&self, index: u64, offset: u64, buffer: &mut [u8]) -> vmfs_fs::Result<()> {
        self.file_descriptor(index)?
            .read_at(&self.layout, &self.resources, offset, buffer)
    }

    fn write(&self, _index: u64, _offset: u64, _buffer: &[u8]) -> vmfs_fs::Result<()> {
        Err(vmfs_fs::Error::Unimplemented)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use vmfs_lvm::{Lvm, Uuid};
    use zerocopy::little_endian::{U16, U32, U64};

    use super::*;
    use crate::{descriptor::FileKind, structs::{DirEntry5, FileMetadata}};

    /// An in-memory growable byte buffer usable as a `DataStorage`, for
    /// synthesizing device images in tests without touching the filesystem.
    struct MemDisk(RefCell<Vec<u8>>);

    impl MemDisk {
        fn new(size: usize) -> Self {
            Self(RefCell::new(vec![0u8; size]))
        }

        fn write_at(&self, offset: u64, bytes: &[u8]) {
            let mut buf = self.0.borrow_mut();
            let end = offset as usize + bytes.len();
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[offset as usize..end].copy_from_slice(bytes);
        }
    }

    impl DataStorage for MemDisk {
        fn read(&self, offset: u64, buffer: &mut [u8]) -> vmfs_ds::Result<()> {
            let buf = self.0.borrow();
            let start = offset as usize;
            buffer.copy_from_slice(&buf[start..start + buffer.len()]);
            Ok(())
        }

        fn write(&self, offset: u64, buffer: &[u8]) -> vmfs_ds::Result<()> {
            drop(self.0.borrow());
            self.write_at(offset, buffer);
            Ok(())
        }
    }

    fn lvm_uuid(seed: u8) -> Uuid {
        Uuid {
            time_lo: U32::new(0x5000_0000 + seed as u32),
            time_hi: U32::new(0x6000_0000 + seed as u32),
            rand: U16::new(0x7000 + seed as u16),
            mac_addr: [0, 0x0c, 0x29, seed, seed, seed],
        }
    }

    fn put<T: zerocopy::IntoBytes + zerocopy::Immutable + ?Sized>(buf: &mut [u8], offset: u64, value: &T) {
        let bytes = value.as_bytes();
        let start = offset as usize;
        buf[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Wraps an already-assembled logical-volume byte buffer as the sole
    /// physical extent of a single-device LVM5 volume, deriving every region
    /// offset the way [`crate::fs`]'s own bootstrap (and `lvm`'s `Device`)
    /// derive them, so the fixture stays correct if the layout ever changes.
    fn build_device_with_content(logical: Vec<u8>) -> MemDisk {
        use vmfs_lvm::structs::{
            DevMetadata, ExtVolMetadata, PeDescriptor, PeTableEntry, VolDescriptor, VolId,
            DISK_BLOCK_SIZE_512B, FS_PLIST_DEF_MAX_PARTITIONS, LVM_DEV_HEADER_OFFSET,
            LVM_MAGIC_NUMBER, LVM_MAX_VOLUMES_PER_DEV_LVM5, LVM_PES_PER_BITMAP,
            LVM_PE_BITMAP_SIZE_LVM5, LVM_SIZEOF_LVM_DEVMETA_LVM5, LVM_SIZEOF_PTENTRY,
            LVM_SIZEOF_SDTENTRY, LVM_SIZEOF_VTENTRY,
        };

        let pe_length = logical.len() as u64;
        let max_volumes_per_device = LVM_MAX_VOLUMES_PER_DEV_LVM5 as u64;
        let unused_md_sectors = 1024 - max_volumes_per_device;
        let unused_md_size = unused_md_sectors * DISK_BLOCK_SIZE_512B;
        let reserved_size = unused_md_size - LVM_SIZEOF_SDTENTRY * FS_PLIST_DEF_MAX_PARTITIONS;

        let offset_to_volume_table = LVM_SIZEOF_LVM_DEVMETA_LVM5;
        let offset_to_sd_table =
            offset_to_volume_table + max_volumes_per_device * LVM_SIZEOF_VTENTRY + reserved_size;
        let offset_to_pe_bitmap = offset_to_sd_table + LVM_SIZEOF_SDTENTRY * FS_PLIST_DEF_MAX_PARTITIONS;

        let pe_bitmap_offset = LVM_DEV_HEADER_OFFSET + offset_to_pe_bitmap;
        let pe_table_size = LVM_PES_PER_BITMAP as u64 * LVM_SIZEOF_PTENTRY;
        let pe_table_offset = pe_bitmap_offset + LVM_PE_BITMAP_SIZE_LVM5;
        let pe_data_offset = pe_table_offset + pe_table_size;

        let total = pe_data_offset + pe_length;
        let disk = MemDisk::new(total as usize);

        let mut meta: DevMetadata = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        meta.magic = U32::new(LVM_MAGIC_NUMBER);
        meta.major_version = U32::new(5);
        meta.total_bytes = U64::new(total);
        meta.num_volumes = U32::new(1);
        meta.num_pes = U32::new(1);
        meta.data_offset = U64::new(pe_data_offset);
        meta.dev_id = lvm_uuid(0xA1);
        meta.num_pe_maps = U32::new(1);
        disk.write_at(LVM_DEV_HEADER_OFFSET, zerocopy::IntoBytes::as_bytes(&meta));

        let mut vol_desc: VolDescriptor = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        vol_desc.vol_meta.logical_size = U64::new(pe_length);
        vol_desc.vol_meta.generation = U64::new(1);
        vol_desc.vol_meta.state = U32::new(1);
        vol_desc.vol_meta.lv_id = VolId {
            uuid: lvm_uuid(0xB2),
            snap_id: U32::new(0),
        };
        vol_desc.volume_id = U32::new(1);
        vol_desc.num_pes = U32::new(1);
        vol_desc.first_pe = U64::new(0);
        vol_desc.last_pe = U64::new(0);
        vol_desc.ext_vol_meta = ExtVolMetadata {
            num_devs: U32::new(1),
            pad: [0; 124],
            consumed_pes: U32::new(1),
        };
        disk.write_at(
            LVM_DEV_HEADER_OFFSET + offset_to_volume_table,
            zerocopy::IntoBytes::as_bytes(&vol_desc),
        );

        let mut entry: PeTableEntry = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        entry.used = 1;
        entry.pe_desc = PeDescriptor {
            pe_id: U32::new(0),
            volume_id: U32::new(1),
            p_offset: U64::new(pe_data_offset),
            l_offset: U64::new(0),
            length: U64::new(pe_length),
            version: U32::new(0),
        };
        disk.write_at(pe_table_offset, zerocopy::IntoBytes::as_bytes(&entry));

        disk.write_at(pe_data_offset, &logical);
        disk
    }

    const FILE_BLOCK_SIZE: u64 = 0x1_0000;

    /// Builds the raw logical-volume bytes for a VMFS5 filesystem: a root
    /// directory holding a tiny resident file, a three-block
    /// `FileBlock`-addressed file whose middle block is TBZ, and a symlink.
    /// Returns the bytes together with the layout and the FDC file
    /// descriptor's own volume offset, so callers can either wrap it as an
    /// LVM volume ([`build_vmfs5_image`]) or slice the FDC resource's
    /// content directly out of it for a JBOSF-mode open.
    fn build_vmfs5_logical() -> (Vec<u8>, FsLayout, u64) {
        let mut logical = vec![0u8; 0x70_0000];

        let mut sb: Descriptor = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        sb.magic = U32::new(VMFS_FS3_MAGIC);
        sb.major_version = U32::new(1);
        sb.minor_version = U16::new(0);
        sb.uuid = Uuid {
            time_lo: U32::new(0x6113_7dd5),
            time_hi: U32::new(0xdf6b_c2c8),
            rand: U16::new(0xf0e7),
            mac_addr: [0x00, 0x0c, 0x29, 0x80, 0x16, 0x86],
        };
        sb.label[..9].copy_from_slice(b"datastore");
        sb.file_block_size = U32::new(FILE_BLOCK_SIZE as u32);
        sb.sub_block_size = U32::new(8192);
        sb.md_alignment = U32::new(512);
        sb.tbz_granularity = U32::new(FILE_BLOCK_SIZE as u32);

        let layout = FsLayout::from_superblock(&sb);
        put(&mut logical, SUPERBLOCK_OFFSET, &sb);

        let fdc_base = sfd_offset(&sb, &layout, FDC_DESC_ADDR);

        let mut fdc_fd_meta: FileMetadata = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        fdc_fd_meta.desc_addr = U32::new(FDC_DESC_ADDR as u32);
        fdc_fd_meta.zla = U32::new(0x10D1);
        put(&mut logical, fdc_base + layout.fd_meta_offset, &fdc_fd_meta);

        let mut fdc_res_meta: ResFileMetadata = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        fdc_res_meta.resources_per_cluster = U32::new(16);
        fdc_res_meta.clusters_per_group = U32::new(1);
        fdc_res_meta.cluster_group_offset = U64::new(0x3_0000);
        fdc_res_meta.resource_size = U32::new(layout.fd_size as u32);
        fdc_res_meta.cluster_group_size = U32::new(0x2_0000);
        fdc_res_meta.num_cluster_groups = U32::new(1);
        put(&mut logical, fdc_base + layout.fd_data_offset, &fdc_res_meta);

        let fdc_resource = |resource: u64| -> u64 {
            fdc_base
                + layout.fd_data_offset
                + fdc_res_meta.cluster_group_offset.get()
                + layout.cluster_header_size
                + resource * fdc_res_meta.resource_size.get() as u64
        };

        let tiny_addr = address::file_descriptor::make(0, 10) as u64;
        let repeat_addr = address::file_descriptor::make(0, 11) as u64;
        let link_addr = address::file_descriptor::make(0, 12) as u64;

        let root_slot = fdc_resource(0);
        let mut root_meta: FileMetadata = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        root_meta.desc_addr = U32::new(ROOT_DIR_DESC_ADDR as u32);
        root_meta.kind = U32::new(2); // directory
        root_meta.zla = U32::new(0x10D1);
        root_meta.length = U64::new(3 * size_of::<DirEntry5>() as u64);
        put(&mut logical, root_slot + layout.fd_meta_offset, &root_meta);

        let mut tiny_entry: DirEntry5 = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        tiny_entry.kind = U32::new(3); // regular file
        tiny_entry.desc_addr = U32::new(tiny_addr as u32);
        tiny_entry.generation = U32::new(1);
        tiny_entry.name[..4].copy_from_slice(b"tiny");
        put(&mut logical, root_slot + layout.fd_data_offset, &tiny_entry);

        let mut repeat_entry: DirEntry5 = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        repeat_entry.kind = U32::new(3); // regular file
        repeat_entry.desc_addr = U32::new(repeat_addr as u32);
        repeat_entry.generation = U32::new(1);
        repeat_entry.name[..6].copy_from_slice(b"repeat");
        put(
            &mut logical,
            root_slot + layout.fd_data_offset + size_of::<DirEntry5>() as u64,
            &repeat_entry,
        );

        let mut link_entry: DirEntry5 = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        link_entry.kind = U32::new(4); // symlink
        link_entry.desc_addr = U32::new(link_addr as u32);
        link_entry.generation = U32::new(1);
        link_entry.name[..4].copy_from_slice(b"link");
        put(
            &mut logical,
            root_slot + layout.fd_data_offset + 2 * size_of::<DirEntry5>() as u64,
            &link_entry,
        );

        let tiny_slot = fdc_resource(10);
        let mut tiny_meta: FileMetadata = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        tiny_meta.desc_addr = U32::new(tiny_addr as u32);
        tiny_meta.kind = U32::new(3); // regular file
        tiny_meta.zla = U32::new(0x10D1);
        tiny_meta.length = U64::new(5);
        put(&mut logical, tiny_slot + layout.fd_meta_offset, &tiny_meta);
        put(&mut logical, tiny_slot + layout.fd_data_offset, b"tiny\n");

        let repeat_slot = fdc_resource(11);
        let mut repeat_meta: FileMetadata = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        repeat_meta.desc_addr = U32::new(repeat_addr as u32);
        repeat_meta.kind = U32::new(3); // regular file
        repeat_meta.zla = U32::new(1); // ZLA_FILE_BLOCK
        repeat_meta.length = U64::new(3 * FILE_BLOCK_SIZE);
        repeat_meta.block_size = U64::new(FILE_BLOCK_SIZE);
        repeat_meta.block_offset_shift = 16;
        repeat_meta.num_blocks = U64::new(3);
        repeat_meta.num_tbz_lo = U32::new(1);
        put(&mut logical, repeat_slot + layout.fd_meta_offset, &repeat_meta);

        let block0 = address::file_block::make(100, false, false);
        let block1 = address::file_block::make(0, false, true);
        let block2 = address::file_block::make(101, false, false);
        put(&mut logical, repeat_slot + layout.fd_data_offset, &U32::new(block0));
        put(&mut logical, repeat_slot + layout.fd_data_offset + 4, &U32::new(block1));
        put(&mut logical, repeat_slot + layout.fd_data_offset + 8, &U32::new(block2));

        let link_slot = fdc_resource(12);
        let link_target = b"tiny";
        let mut link_meta: FileMetadata = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
        link_meta.desc_addr = U32::new(link_addr as u32);
        link_meta.kind = U32::new(4); // symlink
        link_meta.zla = U32::new(0x10D1);
        link_meta.length = U64::new(link_target.len() as u64);
        put(&mut logical, link_slot + layout.fd_meta_offset, &link_meta);
        put(&mut logical, link_slot + layout.fd_data_offset, link_target);

        logical[0x64_0000..0x65_0000].fill(0x41);
        logical[0x65_0000..0x66_0000].fill(0x42);

        (logical, layout, fdc_base)
    }

    /// Wraps [`build_vmfs5_logical`]'s bytes as the sole physical extent of
    /// a single-device LVM5 volume.
    fn build_vmfs5_image() -> Rc<Volume<MemDisk>> {
        let (logical, _layout, _fdc_base) = build_vmfs5_logical();
        let disk = build_device_with_content(logical);
        let lvm = Lvm::open(vec![disk]).unwrap();
        lvm.volumes[0].clone()
    }

    #[test]
    fn opens_superblock_and_decodes_uuid_and_label() {
        let volume = build_vmfs5_image();
        let vmfs = Vmfs::open(volume).unwrap();
        assert!(vmfs.is_vmfs5());
        assert!(!vmfs.is_local());
        assert_eq!(vmfs.uuid, "61137dd5-df6bc2c8-f0e7-000c29801686");
        assert_eq!(vmfs.label, "datastore");
    }

    #[test]
    fn reads_a_tiny_resident_file_by_path() {
        let volume = build_vmfs5_image();
        let vmfs = Vmfs::open(volume).unwrap();
        let fd = vmfs.get("tiny").unwrap();
        assert_eq!(fd.len(), 5);

        let mut buf = [0u8; 5];
        fd.read_at(&vmfs.layout, vmfs.resources(), 0, &mut buf).unwrap();
        assert_eq!(&buf, b"tiny\n");
    }

    #[test]
    fn reads_a_file_block_addressed_file_honoring_tbz() {
        let volume = build_vmfs5_image();
        let vmfs = Vmfs::open(volume).unwrap();
        let fd = vmfs.get("repeat").unwrap();
        assert_eq!(fd.len(), 3 * FILE_BLOCK_SIZE);

        let mut buf = vec![0u8; 3 * FILE_BLOCK_SIZE as usize];
        fd.read_at(&vmfs.layout, vmfs.resources(), 0, &mut buf).unwrap();
        assert!(buf[..FILE_BLOCK_SIZE as usize].iter().all(|&b| b == 0x41));
        assert!(buf[FILE_BLOCK_SIZE as usize..2 * FILE_BLOCK_SIZE as usize]
            .iter()
            .all(|&b| b == 0));
        assert!(buf[2 * FILE_BLOCK_SIZE as usize..].iter().all(|&b| b == 0x42));
    }

    #[test]
    fn lists_the_root_directory() {
        let volume = build_vmfs5_image();
        let vmfs = Vmfs::open(volume).unwrap();
        let root = vmfs.root().unwrap();

        let mut names: Vec<String> = directory::iter(root.as_ref(), &vmfs.layout, vmfs.resources())
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["link".to_string(), "repeat".to_string(), "tiny".to_string()]);
    }

    #[test]
    fn file_system_trait_reads_through_the_descriptor_address() {
        let volume = build_vmfs5_image();
        let vmfs = Vmfs::open(volume).unwrap();
        let tiny_addr = address::file_descriptor::make(0, 10) as u64;

        let mut buf = [0u8; 5];
        vmfs_fs::FileSystem::read(&vmfs, tiny_addr, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"tiny\n");

        let size = vmfs_fs::FileSystem::stat(&vmfs, tiny_addr, 0, &mut []).unwrap();
        assert_eq!(size, 5);
    }

    #[test]
    fn resolves_a_symlink_target() {
        let volume = build_vmfs5_image();
        let vmfs = Vmfs::open(volume).unwrap();
        let fd = vmfs.get("link").unwrap();
        assert_eq!(fd.kind(), FileKind::Symlink);
        assert_eq!(fd.link(&vmfs.layout, vmfs.resources()).unwrap(), "tiny");
    }

    #[test]
    fn link_on_a_non_symlink_fails() {
        let volume = build_vmfs5_image();
        let vmfs = Vmfs::open(volume).unwrap();
        let fd = vmfs.get("tiny").unwrap();
        let err = fd.link(&vmfs.layout, vmfs.resources()).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::NotASymlink(_))));
    }

    #[test]
    fn jbosf_mode_reads_resident_files_but_not_file_block_backed_ones() {
        let (logical, layout, fdc_base) = build_vmfs5_logical();

        let vh = MemDisk::new(logical.len());
        vh.write_at(0, &logical);

        let fdc_content_start = fdc_base + layout.fd_data_offset;
        let fdc = MemDisk::new((logical.len() as u64 - fdc_content_start) as usize);
        fdc.write_at(0, &logical[fdc_content_start as usize..]);

        let vmfs = Vmfs::open_system_files(vh, Some(fdc), None, None, None, None, None).unwrap();
        assert!(vmfs.resources().volume.is_none());

        let tiny_addr = address::file_descriptor::make(0, 10) as u64;
        let fd = vmfs.get(tiny_addr).unwrap();
        let mut buf = [0u8; 5];
        fd.read_at(&vmfs.layout, vmfs.resources(), 0, &mut buf).unwrap();
        assert_eq!(&buf, b"tiny\n");

        // The root directory and "repeat"'s own FD metadata are resident,
        // so the lookup itself succeeds; only its FileBlock-addressed
        // content actually needs the (here, absent) volume.
        let repeat = vmfs.get("repeat").unwrap();
        let mut buf = vec![0u8; FILE_BLOCK_SIZE as usize];
        let err = repeat
            .read_at(&vmfs.layout, vmfs.resources(), 0, &mut buf)
            .unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::VolumeNotAvailable(_))));
    }

    #[test]
    fn directory_ops_on_a_non_directory_fail() {
        let volume = build_vmfs5_image();
        let vmfs = Vmfs::open(volume).unwrap();
        let fd = vmfs.get("tiny").unwrap();

        let err = directory::get(fd.as_ref(), &vmfs.layout, vmfs.resources(), "anything").unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::NotADirectory(_))));

        let err = directory::iter(fd.as_ref(), &vmfs.layout, vmfs.resources()).unwrap_err();
        assert!(matches!(err, Error::Fs(FsError::NotADirectory(_))));
    }
}
