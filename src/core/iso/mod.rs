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

//! ISO9660 file system layer
//!
//! [`IsoFs`] owns a [`CdDriver`] and caches what it has parsed from the
//! disc: the primary volume descriptor, the path table and the extent of
//! the last directory looked up. The descriptor and path table are read
//! on first use and again after a media change; the directory cache holds
//! a single entry.
//!
//! Every file system operation returns a [`Result`] and also records an
//! [`IsoError`] code, available from [`IsoFs::last_error`].
//!
//! # Example
//!
//! ```
//! use psrx_cdfs::core::cdrom::CdDriver;
//! use psrx_cdfs::core::config::DriverConfig;
//! use psrx_cdfs::core::iso::IsoFs;
//! use psrx_cdfs::core::sim::{IsoBuilder, SimDrive};
//!
//! let iso = IsoBuilder::new()
//!     .volume_id("DEMO")
//!     .file("DATA/LEVEL1.BIN", vec![7; 5000])
//!     .build();
//! let mut cd = CdDriver::new(SimDrive::with_disc(iso.into_disc()), DriverConfig::default());
//! cd.init()?;
//!
//! let mut fs = IsoFs::new(cd);
//! assert_eq!(fs.volume_label()?, "DEMO");
//! let file = fs.search_file("cdrom:\\DATA\\LEVEL1.BIN;1")?;
//! assert_eq!(file.size, 5000);
//! assert_eq!(fs.read_file(&file)?, vec![7; 5000]);
//! # Ok::<(), psrx_cdfs::CdRomError>(())
//! ```

mod dir;
mod path;
mod records;
mod session;

pub use dir::{CdDir, CdFile};
pub use path::{normalize_dir, split_file_path};
pub use records::{
    decode_datetime, is_volume_descriptor, DirectoryRecord, FileFlags, PathTable, PathTableEntry,
    VolumeDescriptor, ISO_SIGNATURE,
};

use crate::core::cdrom::{CdBus, CdDriver, Command, ModeFlags, StatusFlags, SECTOR_SIZE};
use crate::core::error::{CdRomError, IsoError, Result};

/// Error code of an INT5 caused by an open lid
const ERR_DOOR_OPEN: u8 = 0x08;

/// LBA of the primary volume descriptor, relative to the session start
const DESCRIPTOR_LBA: i32 = 16;

/// Cached directory extent
#[derive(Debug)]
struct DirCache {
    lba: u32,
    /// Size recorded in the `.` record
    len: usize,
    data: Vec<u8>,
}

impl DirCache {
    fn records(&self) -> &[u8] {
        &self.data[..self.len.min(self.data.len())]
    }
}

/// ISO9660 file system on top of a CD-ROM driver
pub struct IsoFs<B: CdBus> {
    cd: CdDriver<B>,
    descriptor: Option<VolumeDescriptor>,
    path_table: PathTable,
    dir_cache: Option<DirCache>,
    session_offset: i32,
    needs_reparse: bool,
    last_error: IsoError,
}

impl<B: CdBus> IsoFs<B> {
    /// Create a file system view over an initialized driver
    ///
    /// Nothing is read until the first operation.
    pub fn new(cd: CdDriver<B>) -> Self {
        Self {
            cd,
            descriptor: None,
            path_table: PathTable::default(),
            dir_cache: None,
            session_offset: 0,
            needs_reparse: true,
            last_error: IsoError::Okay,
        }
    }

    /// Outcome of the last file system operation
    pub fn last_error(&self) -> IsoError {
        self.last_error
    }

    /// LBA of the session the file system is rooted at
    pub fn session_offset(&self) -> i32 {
        self.session_offset
    }

    /// Force the descriptor and path table to be read again on next access
    pub fn invalidate(&mut self) {
        log::debug!("ISO: file system cache invalidated");
        self.needs_reparse = true;
        self.dir_cache = None;
    }

    /// Driver the file system reads through
    pub fn driver(&self) -> &CdDriver<B> {
        &self.cd
    }

    /// Mutable access to the driver
    pub fn driver_mut(&mut self) -> &mut CdDriver<B> {
        &mut self.cd
    }

    /// Give the driver back
    pub fn into_driver(self) -> CdDriver<B> {
        self.cd
    }

    /// Parsed primary volume descriptor, if any
    pub fn descriptor(&self) -> Option<&VolumeDescriptor> {
        self.descriptor.as_ref()
    }

    /// Parsed path table (empty before the first parse)
    pub fn path_table(&self) -> &PathTable {
        &self.path_table
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        self.last_error = match &result {
            Ok(_) => IsoError::Okay,
            Err(e) => IsoError::from(e),
        };
        result
    }

    /// Read the volume descriptor and path table of the session at `session_offset`
    ///
    /// Does nothing if they are already cached for that offset and the
    /// media has not changed.
    ///
    /// # Returns
    ///
    /// - `Err(CdRomError::LidOpen)` if the lid is still open
    /// - `Err(CdRomError::SeekError)` or `Err(CdRomError::ReadError)` on I/O failure
    /// - `Err(CdRomError::InvalidFilesystem)` if no `CD001` descriptor is found
    pub fn read_volume_descriptor(&mut self, session_offset: i32) -> Result<()> {
        let result = self.load_descriptor(Some(session_offset));
        self.record(result)
    }

    /// Lid check with two status polls
    ///
    /// A shell open bit that clears on the second poll means the lid was
    /// opened and closed since the last access; the driver then reports a
    /// media change.
    fn check_lid(&mut self) -> Result<()> {
        self.cd.control(Command::Nop, None)?;
        if !self.cd.status().contains(StatusFlags::SHELL_OPEN) {
            return Ok(());
        }
        self.cd.control(Command::Nop, None)?;
        if self.cd.status().contains(StatusFlags::SHELL_OPEN) {
            log::warn!("ISO: lid is still open");
            return Err(CdRomError::LidOpen);
        }
        Ok(())
    }

    /// Make sure the descriptor is loaded
    ///
    /// `None` keeps the current session, unless the media changed, which
    /// roots the file system at the first session again.
    fn load_descriptor(&mut self, requested: Option<i32>) -> Result<()> {
        if !self.cd.media_changed() {
            self.check_lid()?;
        }
        let media_changed = self.cd.media_changed();

        let offset = match requested {
            Some(offset) => offset,
            None if media_changed => 0,
            None => self.session_offset,
        };
        let stale = media_changed
            || self.needs_reparse
            || self.descriptor.is_none()
            || offset != self.session_offset;
        if !stale {
            return Ok(());
        }
        self.parse(offset)
    }

    fn parse(&mut self, offset: i32) -> Result<()> {
        log::info!("ISO: parsing file system at LBA {}", DESCRIPTOR_LBA + offset);
        self.descriptor = None;
        self.path_table = PathTable::default();
        self.dir_cache = None;

        let sector = self.read_fs_sectors(DESCRIPTOR_LBA + offset, 1)?;
        let descriptor = VolumeDescriptor::parse(&sector).inspect_err(|_| {
            log::warn!("ISO: no ISO9660 file system at LBA {}", DESCRIPTOR_LBA + offset)
        })?;

        let size = descriptor.path_table_size() as usize;
        let lba = descriptor.path_table_lba();
        log::debug!("ISO: path table at LBA {}, {} bytes", lba, size);
        if size == 0 {
            return Err(CdRomError::InvalidFilesystem);
        }
        let table = self.read_fs_sectors(lba as i32, size.div_ceil(SECTOR_SIZE))?;
        let path_table = PathTable::parse(&table[..size.min(table.len())])?;

        log::info!(
            "ISO: volume \"{}\", {} sectors, {} directories",
            descriptor.volume_label(),
            descriptor.volume_space_size(),
            path_table.len()
        );
        self.descriptor = Some(descriptor);
        self.path_table = path_table;
        self.session_offset = offset;
        self.needs_reparse = false;
        self.cd.acknowledge_media_change();
        Ok(())
    }

    /// Read file system sectors with the configured retry budget
    fn read_fs_sectors(&mut self, lba: i32, count: usize) -> Result<Vec<u8>> {
        let attempts = self.cd.config().read_attempts;
        self.cd
            .read_sectors(lba, count, ModeFlags::SPEED, attempts)
            .map_err(|e| match e {
                CdRomError::CommandError { code, status, .. }
                    if code == ERR_DOOR_OPEN
                        || StatusFlags::from_bits_retain(status).contains(StatusFlags::SHELL_OPEN) =>
                {
                    CdRomError::LidOpen
                }
                CdRomError::SeekError | CdRomError::ReadError { .. } | CdRomError::LidOpen => e,
                other => {
                    log::warn!("ISO: read of LBA {} failed: {}", lba, other);
                    CdRomError::ReadError { attempts }
                }
            })
    }

    /// Load the directory extent at `lba` into the cache
    ///
    /// A cache hit reads nothing. Otherwise the first sector is read to
    /// learn the extent size from the `.` record, then the whole extent if
    /// it is larger than a sector.
    fn read_directory(&mut self, lba: u32) -> Result<()> {
        if self.dir_cache.as_ref().is_some_and(|c| c.lba == lba) {
            return Ok(());
        }
        self.dir_cache = None;

        let first = self.read_fs_sectors(lba as i32, 1)?;
        let dot = DirectoryRecord::parse(&first).ok_or(CdRomError::InvalidFilesystem)?;
        let len = dot.size as usize;
        log::debug!("ISO: directory at LBA {}, {} bytes", lba, len);

        let data = if len > SECTOR_SIZE {
            self.read_fs_sectors(lba as i32, len.div_ceil(SECTOR_SIZE))?
        } else {
            first
        };
        self.dir_cache = Some(DirCache { lba, len, data });
        Ok(())
    }

    /// Find a directory in the path table and load its extent
    ///
    /// # Returns
    ///
    /// The 1-based path table index of the directory
    fn enter_dir(&mut self, dir: &str) -> Result<usize> {
        let (index, lba) = self
            .path_table
            .find(dir)
            .map(|(index, entry)| (index, entry.lba))
            .ok_or_else(|| {
                log::debug!("ISO: directory {} not found", dir);
                CdRomError::NotFound(dir.to_string())
            })?;
        self.read_directory(lba)?;
        Ok(index)
    }

    /// Locate a file
    ///
    /// `path` may use `/` or `\`, may start with `cdrom:` and is not case
    /// sensitive; `;1` is appended to the name if it has no version.
    /// Subdirectories are not matched.
    ///
    /// # Returns
    ///
    /// - `Ok(file)` with the position and size of the file
    /// - `Err(CdRomError::NotFound)` if the directory or the file does not exist
    pub fn search_file(&mut self, path: &str) -> Result<CdFile> {
        let result = self.search_file_inner(path);
        self.record(result)
    }

    fn search_file_inner(&mut self, path: &str) -> Result<CdFile> {
        self.load_descriptor(None)?;
        let (dir, name) = split_file_path(path)?;
        self.enter_dir(&dir)?;

        let cache = self
            .dir_cache
            .as_ref()
            .ok_or(CdRomError::InvalidFilesystem)?;
        let records = cache.records();
        let mut pos = 0;
        while let Some(record) = dir::next_record(records, records.len(), &mut pos) {
            if record.is_dir() {
                continue;
            }
            if record.name.eq_ignore_ascii_case(name.as_bytes()) {
                log::debug!("ISO: {} at LBA {}, {} bytes", path, record.extent, record.size);
                return Ok(CdFile::from_record(&record));
            }
        }
        log::debug!("ISO: {} not found in {}", name, dir);
        Err(CdRomError::NotFound(path.to_string()))
    }

    /// Open a directory for iteration
    ///
    /// The returned [`CdDir`] owns a copy of the extent.
    pub fn open_dir(&mut self, path: &str) -> Result<CdDir> {
        let result = self.open_dir_inner(path);
        self.record(result)
    }

    fn open_dir_inner(&mut self, path: &str) -> Result<CdDir> {
        self.load_descriptor(None)?;
        let dir = normalize_dir(path);
        let index = self.enter_dir(&dir)?;
        let cache = self
            .dir_cache
            .as_ref()
            .ok_or(CdRomError::InvalidFilesystem)?;
        Ok(CdDir::new(cache.records().to_vec(), index == 1))
    }

    /// Volume label with trailing spaces removed
    pub fn volume_label(&mut self) -> Result<String> {
        let result = self.load_descriptor(None).and_then(|_| {
            self.descriptor
                .as_ref()
                .map(VolumeDescriptor::volume_label)
                .ok_or(CdRomError::InvalidFilesystem)
        });
        self.record(result)
    }

    /// Read the whole contents of a file
    pub fn read_file(&mut self, file: &CdFile) -> Result<Vec<u8>> {
        if file.size == 0 {
            return Ok(Vec::new());
        }
        let result = self.read_fs_sectors(file.lba(), file.sectors());
        let mut data = self.record(result)?;
        data.truncate(file.size as usize);
        Ok(data)
    }
}
