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

//! Directory records and iteration

use chrono::NaiveDateTime;
use serde::Serialize;

use super::records::DirectoryRecord;
use crate::core::cdrom::{Position, MAX_LBA, SECTOR_SIZE};

/// A file or directory located on disc
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CdFile {
    /// Name with version suffix (`.` and `..` for the markers)
    pub name: String,
    /// Position of the first sector
    pub pos: Position,
    /// Size in bytes
    pub size: u32,
    /// True for directories
    pub is_dir: bool,
    /// Recording date
    pub recorded: Option<NaiveDateTime>,
}

impl CdFile {
    pub(super) fn from_record(record: &DirectoryRecord) -> Self {
        Self {
            name: record.display_name(),
            pos: Position::from_lba(record.extent as i32),
            size: record.size,
            is_dir: record.is_dir(),
            recorded: record.recorded,
        }
    }

    /// LBA of the first sector
    pub fn lba(&self) -> i32 {
        self.pos.to_lba()
    }

    /// Number of sectors the file occupies
    pub fn sectors(&self) -> usize {
        (self.size as usize).div_ceil(SECTOR_SIZE)
    }
}

/// Decode the record at `*pos` and advance past it
///
/// A zero byte after the record is sector padding: the cursor snaps to the
/// next sector boundary. Iteration ends at `len`, at a zero record (some
/// authoring tools end directories early this way) or at a malformed one.
/// A record whose extent lies past the end of a disc counts as malformed.
pub(super) fn next_record(data: &[u8], len: usize, pos: &mut usize) -> Option<DirectoryRecord> {
    let end = len.min(data.len());
    if *pos >= end || data[*pos] == 0 {
        return None;
    }
    let record = DirectoryRecord::parse(&data[*pos..end])
        .filter(|r| i64::from(r.extent) <= i64::from(MAX_LBA));
    let Some(record) = record else {
        log::warn!("ISO: malformed directory record at offset {}", *pos);
        *pos = end;
        return None;
    };
    *pos += record.length;
    if data.get(*pos) == Some(&0) {
        *pos = pos.next_multiple_of(SECTOR_SIZE);
    }
    Some(record)
}

/// Open directory
///
/// Owns a copy of the directory extent taken when it was opened, so it is
/// unaffected by later lookups. Yields [`CdFile`]s in on-disc order;
/// subdirectories of non-root directories are preceded by `.` and `..`.
///
/// # Example
///
/// ```
/// use psrx_cdfs::core::cdrom::CdDriver;
/// use psrx_cdfs::core::config::DriverConfig;
/// use psrx_cdfs::core::iso::IsoFs;
/// use psrx_cdfs::core::sim::{IsoBuilder, SimDrive};
///
/// let disc = IsoBuilder::new().file("DATA/A.BIN", vec![0; 10]).build().into_disc();
/// let mut cd = CdDriver::new(SimDrive::with_disc(disc), DriverConfig::default());
/// cd.init()?;
/// let mut fs = IsoFs::new(cd);
///
/// let dir = fs.open_dir("\\DATA")?;
/// let names: Vec<String> = dir.map(|f| f.name).collect();
/// assert_eq!(names, [".", "..", "A.BIN;1"]);
/// # Ok::<(), psrx_cdfs::CdRomError>(())
/// ```
#[derive(Debug, Clone)]
pub struct CdDir {
    data: Vec<u8>,
    pos: usize,
}

impl CdDir {
    /// Wrap a directory extent cut to its recorded length
    pub(super) fn new(data: Vec<u8>, is_root: bool) -> Self {
        let mut dir = Self { data, pos: 0 };
        if is_root {
            // The root lists no . and .. entries
            for _ in 0..2 {
                next_record(&dir.data, dir.data.len(), &mut dir.pos);
            }
        }
        dir
    }

    /// Read the next entry
    pub fn read(&mut self) -> Option<CdFile> {
        self.next()
    }

    /// Close the directory
    pub fn close(self) {}
}

impl Iterator for CdDir {
    type Item = CdFile;

    fn next(&mut self) -> Option<CdFile> {
        next_record(&self.data, self.data.len(), &mut self.pos).map(|r| CdFile::from_record(&r))
    }
}
