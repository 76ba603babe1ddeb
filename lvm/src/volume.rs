use std::rc::Rc;

use vmfs_ds::DataStorage;
use vmfs_err::{Error, LvmError, Result};

use crate::{
    device::{read_struct, Device},
    structs::{SdTableEntry, VolState, LVM_SIZEOF_SDTENTRY},
    uuid::Uuid,
};

/// A logical volume assembled from the physical extents of one or more
/// [`Device`]s that share the same `(uuid, snap_id)`.
pub struct Volume<DS: DataStorage> {
    pub uuid: String,
    pub snap_id: u32,
    pub devices: Vec<Rc<Device<DS>>>,

    pub size: u64,
    pub generation: u64,
    pub state: Option<VolState>,
    pub name: String,
    pub creation_time_us: u64,
    pub device_names: Vec<String>,

    dataruns: std::cell::OnceCell<Vec<DataRun<DS>>>,
}

/// One contiguous run of the volume's logical address space, backed by a
/// contiguous physical region on a single device.
pub struct DataRun<DS: DataStorage> {
    pub logical_offset: u64,
    pub physical_offset: u64,
    pub length: u64,
    pub device: Rc<Device<DS>>,
}

impl<DS: DataStorage> Volume<DS> {
    /// Groups `devices` that share `(uuid, snap_id)` into one logical
    /// volume. `devices` must contain every [`Device`] that carries a volume
    /// descriptor for this `(uuid, snap_id)` pair; the devZero (the device
    /// whose descriptor has `firstPE == 0`) does not need to be first —
    /// devices are sorted by `firstPE` here.
    pub fn new(uuid: String, snap_id: u32, mut devices: Vec<Rc<Device<DS>>>) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::Lvm(LvmError::Inconsistent {
                uuid,
                reason: "need at least one device to construct a volume",
            }));
        }

        devices.sort_by_key(|device| {
            Self::vol_desc(device, &uuid, snap_id)
                .map(|desc| desc.first_pe.get())
                .unwrap_or(u64::MAX)
        });

        let dev_zero = &devices[0];
        let vol_desc = Self::vol_desc(dev_zero, &uuid, snap_id).ok_or_else(|| {
            Error::Lvm(LvmError::Inconsistent {
                uuid: uuid.clone(),
                reason: "devZero carries no matching volume descriptor",
            })
        })?;

        let size = vol_desc.vol_meta.logical_size.get();
        let generation = vol_desc.vol_meta.generation.get();
        let state = VolState::from_u32(vol_desc.vol_meta.state.get());
        let name = null_terminated(&vol_desc.vol_meta.name);
        let creation_time_us = vol_desc.vol_meta.creation_time_us.get();

        let device_names = if dev_zero.major_version >= 5 && vol_desc.first_pe.get() == 0 {
            let mut names = Vec::with_capacity(vol_desc.ext_vol_meta.num_devs.get() as usize);
            let mut offset = dev_zero.sd_table_offset();
            for _ in 0..vol_desc.ext_vol_meta.num_devs.get() {
                let entry: SdTableEntry = read_struct(&dev_zero.data_storage, offset)?;
                names.push(null_terminated(&entry.device_name));
                offset += LVM_SIZEOF_SDTENTRY;
            }
            names
        } else {
            Vec::new()
        };

        Ok(Self {
            uuid,
            snap_id,
            devices,
            size,
            generation,
            state,
            name,
            creation_time_us,
            device_names,
            dataruns: std::cell::OnceCell::new(),
        })
    }

    fn vol_desc<'a>(
        device: &'a Device<DS>,
        uuid: &str,
        snap_id: u32,
    ) -> Option<&'a crate::structs::VolDescriptor> {
        device.volumes.iter().find(|desc| {
            desc.vol_meta.lv_id.uuid.to_string() == uuid && desc.vol_meta.lv_id.snap_id.get() == snap_id
        })
    }

    /// Checks the invariants from spec.md §4.3: devZero owns PE 0, the
    /// recorded device count matches, and the devices cover a contiguous PE
    /// range with no gaps.
    pub fn is_valid(&self) -> bool {
        let Some(dev_zero) = self.devices.first() else {
            return false;
        };
        let Some(vol_desc) = Self::vol_desc(dev_zero, &self.uuid, self.snap_id) else {
            return false;
        };
        if vol_desc.first_pe.get() != 0 {
            return false;
        }
        if vol_desc.ext_vol_meta.num_devs.get() as usize != self.devices.len() {
            return false;
        }

        let mut expected_pe = 0u64;
        for device in &self.devices {
            let Some(desc) = Self::vol_desc(device, &self.uuid, self.snap_id) else {
                return false;
            };
            if desc.first_pe.get() != expected_pe {
                return false;
            }
            expected_pe = desc.last_pe.get() + 1;
        }

        true
    }

    /// Builds the volume's dataruns, coalescing adjacent same-device physical
    /// extents. Computed once and cached for the volume's lifetime.
    pub fn dataruns(&self) -> Result<&[DataRun<DS>]> {
        if let Some(runs) = self.dataruns.get() {
            return Ok(runs.as_slice());
        }

        let mut raw = Vec::new();
        for device in &self.devices {
            let Some(vol_desc) = Self::vol_desc(device, &self.uuid, self.snap_id) else {
                continue;
            };
            for pe in device.physical_extents()? {
                if pe.used == 0 {
                    continue;
                }
                if pe.pe_desc.volume_id.get() != vol_desc.volume_id.get() {
                    continue;
                }
                raw.push((
                    pe.pe_desc.l_offset.get(),
                    pe.pe_desc.p_offset.get(),
                    pe.pe_desc.length.get(),
                    device.clone(),
                ));
            }
        }
        raw.sort_by_key(|(logical, ..)| *logical);

        let mut runs: Vec<DataRun<DS>> = Vec::new();
        let mut expected_offset = 0u64;
        for (logical_offset, physical_offset, length, device) in raw {
            if logical_offset != expected_offset {
                return Err(Error::Lvm(LvmError::Inconsistent {
                    uuid: self.uuid.clone(),
                    reason: "hole in volume physical extents",
                }));
            }
            expected_offset += length;

            if let Some(last) = runs.last_mut() {
                if last.physical_offset + last.length == physical_offset && Rc::ptr_eq(&last.device, &device) {
                    last.length += length;
                    continue;
                }
            }
            runs.push(DataRun {
                logical_offset,
                physical_offset,
                length,
                device,
            });
        }

        let _ = self.dataruns.set(runs);
        Ok(self.dataruns.get().unwrap().as_slice())
    }

    /// Opens a read-only stream over the volume. Fails if the volume's
    /// devices don't form a valid, contiguous span (spec.md §4.3).
    pub fn open(self: &Rc<Self>) -> Result<VolumeStream<DS>> {
        if !self.is_valid() {
            return Err(Error::Lvm(LvmError::VolumeNotAvailable {
                uuid: self.uuid.clone(),
                reason: "volume is in an invalid state and cannot be opened for reading",
            }));
        }
        VolumeStream::new(self.clone())
    }
}

fn null_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// A seekable byte stream over a [`Volume`]'s logical address space,
/// dispatching each read across the volume's dataruns.
pub struct VolumeStream<DS: DataStorage> {
    volume: Rc<Volume<DS>>,
    lookup: Vec<u64>,
}

impl<DS: DataStorage> VolumeStream<DS> {
    fn new(volume: Rc<Volume<DS>>) -> Result<Self> {
        // Exclude the leading zero-offset run from the lookup table: bisecting
        // with 0 present would need `bisect_right` to special-case index 0,
        // since every offset is >= the first run's logical_offset of 0.
        let lookup = volume
            .dataruns()?
            .iter()
            .filter(|run| run.logical_offset != 0)
            .map(|run| run.logical_offset)
            .collect();
        Ok(Self { volume, lookup })
    }

    pub fn size(&self) -> u64 {
        self.volume.size
    }

    pub fn read_at(&self, offset: u64, buffer: &mut [u8]) -> Result<()> {
        let runs = self.volume.dataruns()?;
        let mut run_idx = self.lookup.partition_point(|&logical| logical <= offset);
        let mut offset = offset;
        let mut remaining = buffer.len();
        let mut written = 0usize;

        while remaining > 0 {
            let run = &runs[run_idx];
            let offset_in_run = offset - run.logical_offset;
            let remaining_in_run = run.length - offset_in_run;
            let read_length = remaining.min(remaining_in_run as usize);

            run.device
                .data_storage
                .read(
                    run.physical_offset + offset_in_run,
                    &mut buffer[written..written + read_length],
                )
                .map_err(|err| Error::Io(vmfs_err::IoError::Device(err.to_string())))?;

            remaining -= read_length;
            offset += read_length as u64;
            written += read_length;
            run_idx += 1;
        }

        Ok(())
    }
}
