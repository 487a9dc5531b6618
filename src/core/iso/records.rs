// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
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

//! On-disc ISO9660 structures
//!
//! Decoders over raw sector bytes. Every accessor checks lengths; nothing
//! is reinterpreted in place.

use bitflags::bitflags;
use chrono::{NaiveDate, NaiveDateTime};

use crate::core::cdrom::SECTOR_SIZE;
use crate::core::error::{CdRomError, Result};

/// Signature of every volume descriptor, at byte 1
pub const ISO_SIGNATURE: &[u8; 5] = b"CD001";

/// Volume descriptor type of the primary volume descriptor
pub const PRIMARY_DESCRIPTOR: u8 = 1;

/// Fixed part of a directory record, before the name
pub const DIR_RECORD_HEADER: usize = 33;

/// Fixed part of a path table entry, before the name
const PATH_ENTRY_HEADER: usize = 8;

fn u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(*buf.get(offset..)?.first_chunk::<2>()?))
}

fn u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(*buf.get(offset..)?.first_chunk::<4>()?))
}

/// True if `sector` starts with a volume descriptor header
pub fn is_volume_descriptor(sector: &[u8]) -> bool {
    sector.get(1..6) == Some(&ISO_SIGNATURE[..])
}

/// Primary volume descriptor
///
/// Holds the whole 2048-byte sector and decodes fields on demand.
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    raw: Vec<u8>,
}

impl VolumeDescriptor {
    const VOLUME_ID: std::ops::Range<usize> = 40..72;
    const VOLUME_SPACE_SIZE: usize = 80;
    const PATH_TABLE_SIZE: usize = 132;
    const PATH_TABLE_L_LBA: usize = 140;
    const ROOT_RECORD: usize = 156;

    /// Decode a descriptor sector
    ///
    /// # Returns
    ///
    /// - `Ok(descriptor)` if the sector carries the `CD001` signature
    /// - `Err(CdRomError::InvalidFilesystem)` otherwise
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector.len() < SECTOR_SIZE || !is_volume_descriptor(sector) {
            return Err(CdRomError::InvalidFilesystem);
        }
        Ok(Self {
            raw: sector[..SECTOR_SIZE].to_vec(),
        })
    }

    /// Descriptor type (1 for the primary volume descriptor)
    pub fn descriptor_type(&self) -> u8 {
        self.raw[0]
    }

    /// Volume label with trailing space padding removed
    pub fn volume_label(&self) -> String {
        let field = &self.raw[Self::VOLUME_ID];
        let end = field.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }

    /// Number of sectors in the volume
    pub fn volume_space_size(&self) -> u32 {
        u32_le(&self.raw, Self::VOLUME_SPACE_SIZE).unwrap_or(0)
    }

    /// Size of the path table in bytes
    pub fn path_table_size(&self) -> u32 {
        u32_le(&self.raw, Self::PATH_TABLE_SIZE).unwrap_or(0)
    }

    /// LBA of the little-endian path table
    pub fn path_table_lba(&self) -> u32 {
        u32_le(&self.raw, Self::PATH_TABLE_L_LBA).unwrap_or(0)
    }

    /// Directory record of the root directory
    pub fn root_record(&self) -> Option<DirectoryRecord> {
        DirectoryRecord::parse(&self.raw[Self::ROOT_RECORD..])
    }

    /// Raw descriptor sector
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

bitflags! {
    /// Directory record file flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileFlags: u8 {
        const HIDDEN = 0x01;
        const DIRECTORY = 0x02;
        const ASSOCIATED = 0x04;
        const RECORD = 0x08;
        const PROTECTION = 0x10;
        const MULTI_EXTENT = 0x80;
    }
}

/// One directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// Total record length in bytes
    pub length: usize,
    /// First sector of the extent
    pub extent: u32,
    /// Extent size in bytes
    pub size: u32,
    /// Recording date and time
    pub recorded: Option<NaiveDateTime>,
    /// File flags
    pub flags: FileFlags,
    /// Identifier bytes (`0x00` for `.`, `0x01` for `..`)
    pub name: Vec<u8>,
}

impl DirectoryRecord {
    /// Decode the record at the start of `buf`
    ///
    /// # Returns
    ///
    /// `None` for a zero length byte (padding) or a record that does not
    /// fit in its own length or in `buf`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let length = usize::from(*buf.first()?);
        if length < DIR_RECORD_HEADER || length > buf.len() {
            return None;
        }
        let name_len = usize::from(buf[32]);
        if DIR_RECORD_HEADER + name_len > length {
            return None;
        }
        Some(Self {
            length,
            extent: u32_le(buf, 2)?,
            size: u32_le(buf, 10)?,
            recorded: decode_datetime(buf.get(18..25)?),
            flags: FileFlags::from_bits_retain(buf[25]),
            name: buf[DIR_RECORD_HEADER..DIR_RECORD_HEADER + name_len].to_vec(),
        })
    }

    /// True for subdirectories (and the `.`/`..` markers)
    pub fn is_dir(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    /// True for the `.` entry
    pub fn is_current(&self) -> bool {
        self.name == [0]
    }

    /// True for the `..` entry
    pub fn is_parent(&self) -> bool {
        self.name == [1]
    }

    /// Display name, with `.` and `..` for the marker entries
    pub fn display_name(&self) -> String {
        if self.is_current() {
            ".".to_string()
        } else if self.is_parent() {
            "..".to_string()
        } else {
            String::from_utf8_lossy(&self.name).into_owned()
        }
    }
}

/// Decode a 7-byte directory record timestamp
///
/// The GMT offset byte is ignored. Returns `None` for an all-zero or
/// invalid date.
pub fn decode_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    let &[year, month, day, hour, minute, second, ..] = bytes else {
        return None;
    };
    NaiveDate::from_ymd_opt(1900 + i32::from(year), month.into(), day.into())?.and_hms_opt(
        hour.into(),
        minute.into(),
        second.into(),
    )
}

/// One path table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTableEntry {
    /// Directory name (a single zero byte for the root)
    pub name: Vec<u8>,
    /// 1-based index of the parent directory
    pub parent: u16,
    /// First sector of the directory extent
    pub lba: u32,
}

/// Little-endian path table
#[derive(Debug, Clone, Default)]
pub struct PathTable {
    entries: Vec<PathTableEntry>,
}

impl PathTable {
    /// Decode `data`, which must be cut to the recorded table size
    ///
    /// Decoding stops at the first zero name length; a truncated entry is
    /// an error.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos + PATH_ENTRY_HEADER <= data.len() {
            let name_len = usize::from(data[pos]);
            if name_len == 0 {
                break;
            }
            let name_start = pos + PATH_ENTRY_HEADER;
            let name = data
                .get(name_start..name_start + name_len)
                .ok_or(CdRomError::InvalidFilesystem)?;
            entries.push(PathTableEntry {
                name: name.to_vec(),
                lba: u32_le(data, pos + 2).ok_or(CdRomError::InvalidFilesystem)?,
                parent: u16_le(data, pos + 6).ok_or(CdRomError::InvalidFilesystem)?,
            });
            pos = name_start + name_len + name_len % 2;
        }
        if entries.is_empty() {
            return Err(CdRomError::InvalidFilesystem);
        }
        log::debug!("ISO: {} directories in path table", entries.len());
        Ok(Self { entries })
    }

    /// Number of directories
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at 1-based `index`
    pub fn entry(&self, index: usize) -> Option<&PathTableEntry> {
        self.entries.get(index.checked_sub(1)?)
    }

    /// All entries in table order
    pub fn entries(&self) -> &[PathTableEntry] {
        &self.entries
    }

    /// Full path of the directory at 1-based `index`
    ///
    /// Paths use `\` separators with a leading one; the root is `\`.
    /// Parent links must point to earlier entries, which bounds the walk.
    pub fn full_path(&self, index: usize) -> Option<String> {
        let mut names = Vec::new();
        let mut current = index;
        while current > 1 {
            let entry = self.entry(current)?;
            let parent = usize::from(entry.parent);
            if parent >= current {
                log::warn!("ISO: path table entry {} has parent {}", current, parent);
                return None;
            }
            names.push(String::from_utf8_lossy(&entry.name).into_owned());
            current = parent;
        }
        self.entry(1)?;

        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('\\');
            path.push_str(name);
        }
        if path.is_empty() {
            path.push('\\');
        }
        Some(path)
    }

    /// Find the directory whose full path equals `path`, ignoring case
    ///
    /// # Returns
    ///
    /// The 1-based index and the entry
    pub fn find(&self, path: &str) -> Option<(usize, &PathTableEntry)> {
        (1..=self.entries.len()).find_map(|index| {
            let full = self.full_path(index)?;
            full.eq_ignore_ascii_case(path)
                .then(|| (index, &self.entries[index - 1]))
        })
    }
}
