#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Not implemented")]
    Unimplemented,
    #[error("IO: {0}")]
    Io(#[from] IoError),
    #[error("LVM: {0}")]
    Lvm(#[from] LvmError),
    #[error("FS: {0}")]
    Fs(#[from] FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("Read-only")]
    ReadOnly,
    #[error("short read at offset {offset:#x}: wanted {wanted}, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },
    #[error("{0}")]
    Device(String),
}

#[derive(thiserror::Error, Debug)]
pub enum LvmError {
    #[error("invalid header at offset {offset:#x}: expected magic {expected:#x}, got {found:#x}")]
    InvalidHeader {
        offset: u64,
        expected: u32,
        found: u32,
    },
    #[error("volume {uuid} is not available: {reason}")]
    VolumeNotAvailable { uuid: String, reason: &'static str },
    #[error("volume {uuid} is inconsistent: {reason}")]
    Inconsistent { uuid: String, reason: &'static str },
}

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("invalid superblock: {reason}")]
    InvalidHeader { reason: &'static str },
    #[error("not found: {0}")]
    FileNotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("not a symlink: {0}")]
    NotASymlink(String),
    #[error("not an RDM file: {0}")]
    NotAnRdmFile(String),
    #[error("volume not available for {0:#x}")]
    VolumeNotAvailable(u64),
    #[error("unexpected address kind {kind:#x} at {addr:#x}")]
    Corrupt { addr: u64, kind: u8 },
    #[error("Inconsistent")]
    Inconsistent,
    #[error("Index")]
    Index,
}

pub type Result<T> = core::result::Result<T, Error>;
