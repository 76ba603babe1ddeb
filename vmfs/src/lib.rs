//! Read-only VMFS5/VMFS6 clustered filesystem reader.
//!
//! ```text
//! superblock -> resource manager (PB2/PBC/FBB/FDC/SBC/JBC) -> file
//! descriptors -> directory lookup -> block-offset resolution -> bytes
//! ```
//!
//! Locks and heartbeats are parsed but never acquired or waited on; this
//! crate only ever reads (spec.md §5).

pub mod address;
mod descriptor;
mod directory;
mod fs;
mod hash;
mod layout;
mod resource;
pub mod structs;

pub use address::{AddrKind, Address, ResourceType};
pub use descriptor::{FileDescriptor, FileKind, RawDiskMap, Zla};
pub use directory::DirEntry;
pub use fs::Vmfs;
pub use layout::FsLayout;
pub use resource::{ResourceFile, ResourceManager};
