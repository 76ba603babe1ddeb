//! LVM3-6 extent reader and logical volume assembler (spec §4.2, §4.3).
//!
//! ```text
//! devices -> physical extents -> grouped by (volume uuid, snap id) -> Volume -> VolumeStream
//! ```

mod device;
pub mod structs;
mod uuid;
mod volume;

use std::{collections::HashMap, rc::Rc};

pub use device::Device;
pub use uuid::Uuid;
use vmfs_ds::DataStorage;
use vmfs_err::Result;
pub use volume::{DataRun, Volume, VolumeStream};

/// Holds every device handed to [`Lvm::open`] and the logical volumes
/// reconstructed from them.
pub struct Lvm<DS: DataStorage> {
    pub devices: Vec<Rc<Device<DS>>>,
    pub volumes: Vec<Rc<Volume<DS>>>,
}

impl<DS: DataStorage> Lvm<DS> {
    pub fn open(device_storages: Vec<DS>) -> Result<Self> {
        let mut devices = Vec::with_capacity(device_storages.len());
        for data_storage in device_storages {
            devices.push(Rc::new(Device::open(data_storage)?));
        }

        let mut volume_map: HashMap<(String, u32), Vec<Rc<Device<DS>>>> = HashMap::new();
        for device in &devices {
            for vol_desc in &device.volumes {
                let key = (
                    vol_desc.vol_meta.lv_id.uuid.to_string(),
                    vol_desc.vol_meta.lv_id.snap_id.get(),
                );
                volume_map.entry(key).or_default().push(device.clone());
            }
        }

        let mut volumes = Vec::with_capacity(volume_map.len());
        for ((uuid, snap_id), group_devices) in volume_map {
            volumes.push(Rc::new(Volume::new(uuid, snap_id, group_devices)?));
        }

        Ok(Self { devices, volumes })
    }
}
