use std::fmt;

use zerocopy::{
    little_endian::{U16, U32},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

/// The `UUID` structure shared by LVM device/volume identifiers and the VMFS
/// superblock. Not an RFC 4122 UUID — it is VMware's own 16-byte identifier
/// built from a creation timestamp split in two, a random word and the MAC
/// address of the host that created it.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Uuid {
    pub time_lo: U32,
    pub time_hi: U32,
    pub rand: U16,
    pub mac_addr: [u8; 6],
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:08x}-{:04x}-{}",
            self.time_lo.get(),
            self.time_hi.get(),
            self.rand.get(),
            self.mac_addr
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_the_original_tool() {
        let uuid = Uuid {
            time_lo: U32::new(0x61137dd5),
            time_hi: U32::new(0xdf6bc2c8),
            rand: U16::new(0xf0e7),
            mac_addr: [0x00, 0x0c, 0x29, 0x80, 0x16, 0x86],
        };
        assert_eq!(uuid.to_string(), "61137dd5-df6bc2c8-f0e7-000c29801686");
    }
}
