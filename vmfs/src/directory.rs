//! Directory iteration and by-name lookup, for both the VMFS5 flat
//! directory-entry array and the VMFS6 header/hash-table/allocation-map
//! scheme (spec.md §4.6).

use vmfs_err::{Error, FsError, Result};
use zerocopy::IntoBytes;

use crate::{
    descriptor::{FileDescriptor, FileKind},
    hash::lookup8_quads,
    layout::FsLayout,
    resource::ResourceManager,
    structs::{
        DirBlockHeader6, DirBlockKind, DirEntry5, DirEntry6, DirHeader6, DirLinkGroup,
        ROOT_DIR_DESC_ADDR,
    },
};
use vmfs_ds::DataStorage;

/// One directory entry as seen from the parent: a name and the address of
/// the file descriptor it names. The kind/size of the target is only known
/// once that descriptor is itself opened.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub desc_addr: u64,
}

/// Salt mixed into the padded key buffer before hashing (spec.md §4.6).
const NAME_HASH_SALT: u64 = 0x739A_75C2_8E61_B017;

/// The ten fixed system files get a hardcoded `(link_hash, hash_idx)` pair
/// instead of going through [`dir_name_hash`], only consulted for lookups
/// directly in the root directory.
const SYSTEM_FILE_HASHES: &[(&str, u32, u32)] = &[
    (".fbb.sf", 0x3E66, 0x3E66),
    (".fdc.sf", 0x3E67, 0x3E67),
    (".pbc.sf", 0x3E68, 0x3E68),
    (".sbc.sf", 0x3E69, 0x3E69),
    (".vh.sf", 0x3E6A, 0x3E6A),
    (".pb2.sf", 0x3E6B, 0x3E6B),
    (".sdd.sf", 0x3E6C, 0x3E6C),
    (".jbc.sf", 0x3E6D, 0x3E6D),
    (".unmap.sf", 0x3E6E, 0x3E6E),
    (".dfd.sf", 0x3E6F, 0x3E6F),
];

fn dir_name_hash(name: &str, in_root: bool) -> (u32, u32) {
    if in_root {
        if let Some(entry) = SYSTEM_FILE_HASHES.iter().find(|entry| entry.0 == name) {
            return (entry.1, entry.2);
        }
    }

    let mut key = [0u8; 256];
    let name_bytes = name.as_bytes();
    key[..name_bytes.len()].copy_from_slice(name_bytes);

    let rounded_len = (name_bytes.len() + 8) & !0x7;
    let mut pos = rounded_len;
    while pos < 127 {
        key[pos..pos + 8].copy_from_slice(&NAME_HASH_SALT.to_le_bytes());
        pos += 8;
    }

    let result = lookup8_quads(&key, 42);
    let modulus = if in_root { 16001 - 28 } else { 16001 };
    (((result >> 16) & 0xFFFF) as u32, (result % modulus) as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocationKind {
    None,
    DirEnt,
    Link,
}

impl LocationKind {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => Self::DirEnt,
            2 => Self::Link,
            _ => Self::None,
        }
    }
}

fn parse_location(pointer: u32) -> (LocationKind, u32, u32) {
    let kind = LocationKind::from_u32(pointer & 3);
    let block = (pointer >> 2) & 0x3F_FFFF;
    let slot = pointer >> 24;
    (kind, block, slot)
}

/// Reads and parses a fixed-size struct at a directory-relative offset.
fn read_at_offset<DS: DataStorage, T: zerocopy::FromBytes + zerocopy::IntoBytes>(
    dir_fd: &FileDescriptor<DS>,
    layout: &FsLayout,
    resources: &ResourceManager<DS>,
    offset: u64,
) -> Result<T> {
    let size = size_of::<T>();
    let mut buf = vec![0u8; size];
    dir_fd.read_at(layout, resources, offset, &mut buf)?;
    let mut value: T = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
    value.as_mut_bytes().copy_from_slice(&buf);
    Ok(value)
}

fn decode_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Looks up `name` in the VMFS5 flat directory-entry array.
fn get5<DS: DataStorage>(
    dir_fd: &FileDescriptor<DS>,
    layout: &FsLayout,
    resources: &ResourceManager<DS>,
    name: &str,
) -> Result<u64> {
    for entry in iter5(dir_fd, layout, resources)? {
        if entry.name == name {
            return Ok(entry.desc_addr);
        }
    }
    Err(Error::Fs(FsError::FileNotFound(name.to_string())))
}

fn iter5<DS: DataStorage>(
    dir_fd: &FileDescriptor<DS>,
    layout: &FsLayout,
    resources: &ResourceManager<DS>,
) -> Result<Vec<DirEntry>> {
    let entry_size = size_of::<DirEntry5>() as u64;
    let count = dir_fd.len() / entry_size;
    let mut out = Vec::new();
    for i in 0..count {
        let entry: DirEntry5 = read_at_offset(dir_fd, layout, resources, i * entry_size)?;
        if entry.kind.get() == 0 {
            continue;
        }
        out.push(DirEntry {
            name: decode_name(&entry.name),
            desc_addr: entry.desc_addr.get() as u64,
        });
    }
    Ok(out)
}

/// Looks up `name` in a VMFS6 directory (header self/parent entries, hash
/// table, LINK collision chain, DIRENT slot).
fn get6<DS: DataStorage>(
    dir_fd: &FileDescriptor<DS>,
    layout: &FsLayout,
    resources: &ResourceManager<DS>,
    name: &str,
) -> Result<u64> {
    let header: DirHeader6 = read_at_offset(dir_fd, layout, resources, 0)?;

    if name == "." {
        return Ok(header.self_entry.desc_addr.get() as u64);
    }
    if name == ".." {
        return Ok(header.parent_entry.desc_addr.get() as u64);
    }

    let is_root = dir_fd.address == ROOT_DIR_DESC_ADDR;
    let (link_hash, hash_idx) = dir_name_hash(name, is_root);

    let table_offset = size_of::<DirHeader6>() as u64 + hash_idx as u64 * 4;
    let pointer: zerocopy::little_endian::U32 = read_at_offset(dir_fd, layout, resources, table_offset)?;
    let (mut kind, mut block, mut slot) = parse_location(pointer.get());

    let block_size = layout.md_alignment;
    while kind == LocationKind::Link {
        (kind, block, slot) = dir_link_resolve(dir_fd, layout, resources, block, slot, block_size, hash_idx, link_hash)?;
    }

    if kind != LocationKind::DirEnt {
        return Err(Error::Fs(FsError::FileNotFound(name.to_string())));
    }

    let entry_offset = crate::structs::FS6_DIR_HEADER_SIZE
        + block as u64 * block_size
        + size_of::<DirBlockHeader6>() as u64
        + slot as u64 * size_of::<DirEntry6>() as u64;
    let entry: DirEntry6 = read_at_offset(dir_fd, layout, resources, entry_offset)?;
    if decode_name(&entry.name) != name {
        return Err(Error::Fs(FsError::FileNotFound(name.to_string())));
    }
    Ok(entry.desc_addr.get() as u64)
}

#[allow(clippy::too_many_arguments)]
fn dir_link_resolve<DS: DataStorage>(
    dir_fd: &FileDescriptor<DS>,
    layout: &FsLayout,
    resources: &ResourceManager<DS>,
    block: u32,
    slot: u32,
    block_size: u64,
    hash_idx: u32,
    link_hash: u32,
) -> Result<(LocationKind, u32, u32)> {
    let offset = crate::structs::FS6_DIR_HEADER_SIZE
        + block as u64 * block_size
        + size_of::<DirBlockHeader6>() as u64
        + slot as u64 * size_of::<DirLinkGroup>() as u64;
    let group: DirLinkGroup = read_at_offset(dir_fd, layout, resources, offset)?;

    if group.hash_index.get() != hash_idx {
        return Err(Error::Fs(FsError::Inconsistent));
    }

    let total = group.total_links.get() as usize;
    let free = group.free_links.get() as usize;
    let active = total.saturating_sub(free).min(group.links.len());
    for link in &group.links[..active] {
        if link.hash.get() == link_hash {
            return Ok(parse_location(link.location.get()));
        }
    }
    Ok(parse_location(group.next_group.get()))
}

fn iter_dir_blocks<DS: DataStorage>(
    dir_fd: &FileDescriptor<DS>,
    layout: &FsLayout,
    resources: &ResourceManager<DS>,
    header: &DirHeader6,
) -> Result<Vec<(DirBlockKind, u64)>> {
    let block_size = layout.md_alignment;
    let header_size = size_of::<DirBlockHeader6>() as u64;
    let entries_per_alloc_block = 2 * (block_size - header_size);

    let mut out = Vec::new();
    for (i, &alloc_block) in header.allocation_map_blocks.iter().enumerate() {
        if i as u32 >= header.num_allocated.get() {
            break;
        }
        let offset = crate::structs::FS6_DIR_HEADER_SIZE + alloc_block.get() as u64 * block_size + header_size;
        let data_len = (block_size - header_size) as usize;
        let mut buf = vec![0u8; data_len];
        dir_fd.read_at(layout, resources, offset, &mut buf)?;

        for (byte_idx, &byte) in buf.iter().enumerate() {
            for (half, nibble) in [byte >> 4, byte & 0xF].into_iter().enumerate() {
                let entry_type = nibble & 0b11;
                let entry_idx = byte_idx as u64 * 2 + half as u64;
                let global_index = i as u64 * entries_per_alloc_block + entry_idx;
                if let Some(kind) = DirBlockKind::from_u32(entry_type as u32) {
                    out.push((kind, global_index));
                }
            }
        }
    }
    Ok(out)
}

fn iter6<DS: DataStorage>(
    dir_fd: &FileDescriptor<DS>,
    layout: &FsLayout,
    resources: &ResourceManager<DS>,
) -> Result<Vec<DirEntry>> {
    let header: DirHeader6 = read_at_offset(dir_fd, layout, resources, 0)?;
    let block_size = layout.md_alignment;

    let mut out = Vec::new();
    let mut remaining = header.num_entries.get() as i64;

    if remaining > 0 {
        out.push(DirEntry {
            name: ".".to_string(),
            desc_addr: header.self_entry.desc_addr.get() as u64,
        });
        remaining -= 1;
    }
    if remaining > 0 {
        out.push(DirEntry {
            name: "..".to_string(),
            desc_addr: header.parent_entry.desc_addr.get() as u64,
        });
        remaining -= 1;
    }

    if remaining <= 0 {
        return Ok(out);
    }

    for (kind, block_num) in iter_dir_blocks(dir_fd, layout, resources, &header)? {
        if remaining <= 0 {
            break;
        }
        if kind != DirBlockKind::DirEnt {
            continue;
        }

        let block_offset = crate::structs::FS6_DIR_HEADER_SIZE + block_num * block_size;
        let block_header: DirBlockHeader6 = read_at_offset(dir_fd, layout, resources, block_offset)?;

        let slot_size = size_of::<DirEntry6>() as u64;
        for slot in 0..block_header.total_slots.get() as u64 {
            let byte = slot as usize / 8;
            let bit = slot as usize % 8;
            if byte >= block_header.bitmap.len() {
                break;
            }
            let allocated = block_header.bitmap[byte] & (1 << bit) == 0;
            if !allocated {
                continue;
            }

            let entry_offset = block_offset + size_of::<DirBlockHeader6>() as u64 + slot * slot_size;
            let entry: DirEntry6 = read_at_offset(dir_fd, layout, resources, entry_offset)?;
            out.push(DirEntry {
                name: decode_name(&entry.name),
                desc_addr: entry.desc_addr.get() as u64,
            });
            remaining -= 1;
            if remaining <= 0 {
                break;
            }
        }
    }

    Ok(out)
}

/// Looks up `name` inside `dir_fd`, dispatching on whether its block size
/// matches the VMFS6 header-based scheme.
pub fn get<DS: DataStorage>(
    dir_fd: &FileDescriptor<DS>,
    layout: &FsLayout,
    resources: &ResourceManager<DS>,
    name: &str,
) -> Result<u64> {
    if dir_fd.kind() != FileKind::Directory {
        return Err(Error::Fs(FsError::NotADirectory(name.to_string())));
    }
    if layout.is_vmfs6 {
        get6(dir_fd, layout, resources, name)
    } else {
        get5(dir_fd, layout, resources, name)
    }
}

pub fn iter<DS: DataStorage>(
    dir_fd: &FileDescriptor<DS>,
    layout: &FsLayout,
    resources: &ResourceManager<DS>,
) -> Result<Vec<DirEntry>> {
    if dir_fd.kind() != FileKind::Directory {
        return Err(Error::Fs(FsError::NotADirectory(dir_fd.address.to_string())));
    }
    if layout.is_vmfs6 {
        iter6(dir_fd, layout, resources)
    } else {
        iter5(dir_fd, layout, resources)
    }
}
