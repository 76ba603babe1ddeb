use std::mem::MaybeUninit;

use vmfs_ds::DataStorage;
use vmfs_err::{Error, LvmError, Result};
use zerocopy::IntoBytes;

use crate::{
    structs::{
        DevMetadata, ExtDevMetadata, PeTableEntry, VolDescriptor, LVM_DEV_HEADER_OFFSET,
        LVM_MAGIC_NUMBER, LVM_MAX_VOLUMES_PER_DEV_LVM5, LVM_MAX_VOLUMES_PER_DEV_LVM6,
        LVM_PES_PER_BITMAP, LVM_PE_BITMAP_SIZE_LVM5, LVM_SIZEOF_PTENTRY, LVM_SIZEOF_SDTENTRY,
        LVM_SIZEOF_VTENTRY, FS_PLIST_DEF_MAX_PARTITIONS,
    },
    uuid::Uuid,
};

pub(crate) fn read_struct<T: zerocopy::FromBytes + IntoBytes + zerocopy::KnownLayout>(
    data_storage: &impl DataStorage,
    offset: u64,
) -> Result<T> {
    let mut value: T = unsafe { MaybeUninit::uninit().assume_init() };
    data_storage
        .read(offset, value.as_mut_bytes())
        .map_err(|err| Error::Io(vmfs_err::IoError::Device(err.to_string())))?;
    Ok(value)
}

/// A single block device that is part of an LVM. Carries its own metadata
/// and physical-extent table; multiple devices are grouped into a [`crate::Volume`]
/// by shared `(uuid, snap_id)`.
pub struct Device<DS: DataStorage> {
    pub data_storage: DS,

    pub metadata: DevMetadata,
    /// Each chained extended-metadata block together with its own file offset
    /// (needed to relocate its PE bitmap region, mirroring the primary
    /// metadata's offset-to-pe-bitmap).
    pub ext_metadata: Vec<(u64, ExtDevMetadata)>,

    pub major_version: u32,
    pub minor_version: u32,
    pub uuid: Uuid,
    pub size: u64,

    pub volumes: Vec<VolDescriptor>,

    pe_bitmap_size: u64,
    offset_to_pe_bitmap: u64,
    offset_to_sd_table: u64,
}

impl<DS: DataStorage> Device<DS> {
    pub fn open(data_storage: DS) -> Result<Self> {
        let metadata: DevMetadata = read_struct(&data_storage, LVM_DEV_HEADER_OFFSET)?;
        if metadata.magic.get() != LVM_MAGIC_NUMBER {
            return Err(Error::Lvm(LvmError::InvalidHeader {
                offset: LVM_DEV_HEADER_OFFSET,
                expected: LVM_MAGIC_NUMBER,
                found: metadata.magic.get(),
            }));
        }

        let mut ext_metadata = Vec::new();
        let mut ext_dev_metadata_offset = metadata.ext_dev_metadata_offset.get();
        while ext_dev_metadata_offset != 0 {
            let ext_meta: ExtDevMetadata = read_struct(&data_storage, ext_dev_metadata_offset)?;
            if ext_meta.magic.get() != LVM_MAGIC_NUMBER {
                return Err(Error::Lvm(LvmError::InvalidHeader {
                    offset: ext_dev_metadata_offset,
                    expected: LVM_MAGIC_NUMBER,
                    found: ext_meta.magic.get(),
                }));
            }
            let this_offset = ext_dev_metadata_offset;
            ext_dev_metadata_offset = ext_meta.next_offset.get();
            ext_metadata.push((this_offset, ext_meta));
        }

        let major_version = metadata.major_version.get();
        let minor_version = metadata.minor_version.get();
        let uuid = metadata.dev_id;
        let size = metadata.total_bytes.get();

        let (device_metadata_size, max_volumes_per_device, pe_bitmap_size) = if major_version < 6
        {
            (
                crate::structs::LVM_SIZEOF_LVM_DEVMETA_LVM5,
                LVM_MAX_VOLUMES_PER_DEV_LVM5,
                LVM_PE_BITMAP_SIZE_LVM5,
            )
        } else {
            let md_alignment = metadata.md_alignment.get() as u64;
            (
                md_alignment,
                LVM_MAX_VOLUMES_PER_DEV_LVM6,
                md_alignment.max(LVM_PE_BITMAP_SIZE_LVM5),
            )
        };

        let unused_md_sectors = 1024 - max_volumes_per_device as u64;
        let unused_md_size = unused_md_sectors * crate::structs::DISK_BLOCK_SIZE_512B;
        let reserved_size = unused_md_size - LVM_SIZEOF_SDTENTRY * FS_PLIST_DEF_MAX_PARTITIONS;

        let offset_to_volume_table = device_metadata_size;
        let offset_to_sd_table =
            offset_to_volume_table + max_volumes_per_device as u64 * LVM_SIZEOF_VTENTRY + reserved_size;
        let offset_to_pe_bitmap = offset_to_sd_table + LVM_SIZEOF_SDTENTRY * FS_PLIST_DEF_MAX_PARTITIONS;

        if metadata.num_volumes.get() > max_volumes_per_device {
            return Err(Error::Lvm(LvmError::Inconsistent {
                uuid: uuid.to_string(),
                reason: "device reports more volumes than its LVM version supports",
            }));
        }

        let volume_table_offset = LVM_DEV_HEADER_OFFSET + offset_to_volume_table;
        let mut volumes = Vec::with_capacity(metadata.num_volumes.get() as usize);
        for i in 0..metadata.num_volumes.get() as u64 {
            let entry: VolDescriptor =
                read_struct(&data_storage, volume_table_offset + i * LVM_SIZEOF_VTENTRY)?;
            volumes.push(entry);
        }

        Ok(Self {
            data_storage,
            metadata,
            ext_metadata,
            major_version,
            minor_version,
            uuid,
            size,
            volumes,
            pe_bitmap_size,
            offset_to_pe_bitmap,
            offset_to_sd_table,
        })
    }

    pub(crate) fn sd_table_offset(&self) -> u64 {
        LVM_DEV_HEADER_OFFSET + self.offset_to_sd_table
    }

    /// Yields `(pe_bitmap_offset, pe_data_offset)` for every physical-extent
    /// map/table pair across the primary metadata region and every chained
    /// extended metadata region.
    fn iter_pe_offsets(&self) -> Vec<(u64, u64)> {
        let pe_table_size = LVM_PES_PER_BITMAP as u64 * LVM_SIZEOF_PTENTRY;
        let mut result = Vec::new();

        let mut num_pe_maps = if self.metadata.num_pe_maps.get() == 0 {
            1
        } else {
            self.metadata.num_pe_maps.get()
        };
        let mut pe_bitmap_offset = LVM_DEV_HEADER_OFFSET + self.offset_to_pe_bitmap;
        let mut pe_data_offset = self.metadata.data_offset.get();

        let mut ext_iter = self.ext_metadata.iter();
        loop {
            for i in 0..num_pe_maps as u64 {
                let map_offset = pe_bitmap_offset + i * (self.pe_bitmap_size + pe_table_size);
                let data_offset = pe_data_offset + ((i << 13) << 28);
                result.push((map_offset, data_offset));
            }

            let Some((ext_offset, ext_meta)) = ext_iter.next() else {
                break;
            };
            num_pe_maps = ext_meta.num_pe_maps.get();
            pe_bitmap_offset = ext_offset + self.offset_to_pe_bitmap;
            pe_data_offset = ext_meta.data_offset.get();
        }

        result
    }

    pub fn physical_extents(&self) -> Result<Vec<PeTableEntry>> {
        let mut entries = Vec::with_capacity(self.metadata.num_pes.get() as usize);
        let mut pe_idx = 0u32;

        'outer: for (map_offset, _) in self.iter_pe_offsets() {
            let mut table_offset = map_offset + self.pe_bitmap_size;
            let remaining = self.metadata.num_pes.get() - pe_idx;
            for _ in 0..remaining.min(LVM_PES_PER_BITMAP) {
                let entry: PeTableEntry = read_struct(&self.data_storage, table_offset)?;
                entries.push(entry);
                table_offset += LVM_SIZEOF_PTENTRY;
                pe_idx += 1;
            }

            if pe_idx == self.metadata.num_pes.get() {
                break 'outer;
            }
        }

        Ok(entries)
    }
}
