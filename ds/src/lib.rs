// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("read-only")]
    ReadOnly,
    #[error("short read at offset {offset:#x}: wanted {wanted}, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },
    #[error("{0}")]
    Io(String),
}

pub type Result<T> = core::result::Result<T, Error>;

/// A read-only (possibly also writable) random-access byte device.
///
/// Implementors back one raw block device or image file. All offsets are
/// absolute byte offsets from the start of the device; there is no implicit
/// seek cursor, so a single `DataStorage` can be shared across readers
/// without serializing them through a cursor.
pub trait DataStorage {
    fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<()>;

    fn write(&self, offset: u64, buffer: &[u8]) -> Result<()>;
}
