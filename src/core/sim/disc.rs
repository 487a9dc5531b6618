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

//! Disc image loading and management
//!
//! Disc images are held as raw 2352-byte sectors indexed by LBA. They can be
//! loaded from .cue/.bin pairs or built from a plain 2048-byte-per-sector
//! ISO image, in which case every sector is wrapped as a Mode 2 Form 1
//! sector with a synthesized header.

use crate::core::cdrom::{Position, RAW_SECTOR_SIZE, SECTOR_SIZE};
use crate::core::error::{CdRomError, Result};

/// Sync pattern at the start of every data sector
const SYNC_PATTERN: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

/// Subheader of a Form 1 data sector (submode: data)
const FORM1_SUBHEADER: [u8; 4] = [0x00, 0x00, 0x08, 0x00];

/// Disc image with tracks, raw sector data and session start addresses
///
/// # Example
///
/// ```
/// use psrx_cdfs::core::sim::DiscImage;
///
/// let disc = DiscImage::from_iso(&vec![0u8; 20 * 2048]);
/// assert_eq!(disc.sector_count(), 20);
/// assert_eq!(disc.user_data(16).unwrap().len(), 2048);
/// ```
#[derive(Debug, Clone)]
pub struct DiscImage {
    /// Tracks on the disc
    tracks: Vec<Track>,

    /// Raw sector data, sector 0 is LBA 0
    data: Vec<u8>,

    /// Start LBA of each session, session 1 first
    sessions: Vec<i32>,
}

/// CD-ROM track information
#[derive(Debug, Clone)]
pub struct Track {
    /// Track number (1-99)
    pub number: u8,

    /// Track type (Mode1/2352, Mode2/2352, Audio)
    pub track_type: TrackType,

    /// First sector of the track
    pub start_lba: i32,

    /// Length in sectors
    pub length_sectors: u32,
}

impl Track {
    /// Start position of the track
    pub fn start(&self) -> Position {
        let mut pos = Position::from_lba(self.start_lba);
        pos.track = self.number;
        pos
    }
}

/// Track type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    /// Data track, 2352 bytes per sector (Mode 1)
    Mode1_2352,
    /// XA track, 2352 bytes per sector (Mode 2)
    Mode2_2352,
    /// CD-DA audio, 2352 bytes per sector
    Audio,
}

impl DiscImage {
    /// Load a disc image from a .cue file
    ///
    /// # Arguments
    ///
    /// * `cue_path` - Path to the .cue file; the .bin file named by its FILE
    ///   directive is resolved relative to it
    ///
    /// # Returns
    ///
    /// - `Ok(DiscImage)` if loading succeeded
    /// - `Err(CdRomError)` if the .cue or .bin file is missing or malformed
    pub fn load(cue_path: &str) -> Result<Self> {
        let cue_data = std::fs::read_to_string(cue_path)?;
        let bin_path = Self::get_bin_path_from_cue(cue_path, &cue_data)?;

        let mut tracks = Self::parse_cue(&cue_data)?;
        let data = std::fs::read(&bin_path).map_err(|e| {
            CdRomError::DiscLoadError(format!("Failed to read bin file '{}': {}", bin_path, e))
        })?;
        if tracks.is_empty() {
            return Err(CdRomError::DiscLoadError(
                "No TRACK directive found in .cue file".to_string(),
            ));
        }

        Self::calculate_track_lengths(&mut tracks, data.len());

        log::info!(
            "Loaded disc image: {} tracks, {} MB",
            tracks.len(),
            data.len() / 1024 / 1024
        );

        Ok(Self {
            tracks,
            data,
            sessions: vec![0],
        })
    }

    /// Load a plain ISO image (2048 bytes per sector) from disk
    pub fn load_iso(path: &str) -> Result<Self> {
        let data = std::fs::read(path)?;
        if data.len() < 17 * SECTOR_SIZE {
            return Err(CdRomError::DiscLoadError(format!(
                "'{}' is too small to be an ISO image",
                path
            )));
        }
        log::info!("Loaded ISO image '{}': {} sectors", path, data.len() / SECTOR_SIZE);
        Ok(Self::from_iso(&data))
    }

    /// Load a raw single-track image (2352 bytes per sector) without a .cue sheet
    ///
    /// The track mode is taken from the header of the first sector.
    pub fn load_bin(path: &str) -> Result<Self> {
        let data = std::fs::read(path)?;
        if !Self::is_raw_image(&data) {
            return Err(CdRomError::DiscLoadError(format!(
                "'{}' is not a raw 2352-byte sector image",
                path
            )));
        }
        Ok(Self::from_raw(data))
    }

    /// Load a .cue sheet, a raw .bin image or a plain ISO image
    ///
    /// `.cue` files are parsed as cue sheets. Anything else is treated as a
    /// raw image if it is a whole number of 2352-byte sectors starting with
    /// the sync pattern, and as a 2048-byte ISO image otherwise.
    pub fn open(path: &str) -> Result<Self> {
        let ext = std::path::Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("cue") => Self::load(path),
            Some("bin") => Self::load_bin(path),
            _ => {
                let data = std::fs::read(path)?;
                if Self::is_raw_image(&data) {
                    Ok(Self::from_raw(data))
                } else {
                    Self::load_iso(path)
                }
            }
        }
    }

    fn is_raw_image(data: &[u8]) -> bool {
        !data.is_empty() && data.len() % RAW_SECTOR_SIZE == 0 && data.starts_with(&SYNC_PATTERN)
    }

    fn from_raw(data: Vec<u8>) -> Self {
        let track_type = match data.get(15) {
            Some(&1) => TrackType::Mode1_2352,
            _ => TrackType::Mode2_2352,
        };
        let mut tracks = vec![Track {
            number: 1,
            track_type,
            start_lba: 0,
            length_sectors: 0,
        }];
        Self::calculate_track_lengths(&mut tracks, data.len());
        log::info!(
            "Loaded raw image: {} sectors ({:?})",
            tracks[0].length_sectors,
            track_type
        );
        Self {
            tracks,
            data,
            sessions: vec![0],
        }
    }

    /// Build a single-track data disc from 2048-byte sectors
    ///
    /// A trailing partial sector is zero padded.
    pub fn from_iso(user_data: &[u8]) -> Self {
        let sectors = user_data.len().div_ceil(SECTOR_SIZE);
        let mut data = vec![0u8; sectors * RAW_SECTOR_SIZE];

        for (lba, chunk) in user_data.chunks(SECTOR_SIZE).enumerate() {
            let raw = &mut data[lba * RAW_SECTOR_SIZE..(lba + 1) * RAW_SECTOR_SIZE];
            write_form1_sector(raw, lba as i32, chunk);
        }

        Self {
            tracks: vec![Track {
                number: 1,
                track_type: TrackType::Mode2_2352,
                start_lba: 0,
                length_sectors: sectors as u32,
            }],
            data,
            sessions: vec![0],
        }
    }

    /// Append a silent audio track of `sectors` sectors
    pub fn append_audio_track(&mut self, sectors: u32) {
        let start_lba = self.sector_count();
        let number = self.tracks.last().map_or(1, |t| t.number + 1);
        self.data
            .resize(self.data.len() + sectors as usize * RAW_SECTOR_SIZE, 0);
        self.tracks.push(Track {
            number,
            track_type: TrackType::Audio,
            start_lba,
            length_sectors: sectors,
        });
    }

    /// Append `user_data` as a new session starting at `start_lba`
    ///
    /// The gap up to `start_lba` is filled with empty data sectors.
    /// Addresses inside `user_data` are expected to be absolute, as
    /// produced by [`IsoBuilder::base_lba`](super::IsoBuilder::base_lba).
    pub fn append_session(&mut self, start_lba: i32, user_data: &[u8]) {
        let start_lba = start_lba.max(self.sector_count());
        for lba in self.sector_count()..start_lba {
            self.push_form1_sector(lba, &[]);
        }
        for (i, chunk) in user_data.chunks(SECTOR_SIZE).enumerate() {
            self.push_form1_sector(start_lba + i as i32, chunk);
        }
        let count = self.sector_count();
        if let Some(track) = self.tracks.last_mut() {
            track.length_sectors = (count - track.start_lba) as u32;
        }
        self.sessions.push(start_lba);
        log::debug!("Session {} starts at LBA {}", self.sessions.len(), start_lba);
    }

    fn push_form1_sector(&mut self, lba: i32, user: &[u8]) {
        let offset = self.data.len();
        self.data.resize(offset + RAW_SECTOR_SIZE, 0);
        write_form1_sector(&mut self.data[offset..], lba, user);
    }

    /// Extract .bin file path from .cue file path and content
    fn get_bin_path_from_cue(cue_path: &str, cue_data: &str) -> Result<String> {
        for line in cue_data.lines() {
            let line = line.trim();
            if !line.starts_with("FILE") {
                continue;
            }
            let Some(start) = line.find('"') else {
                continue;
            };
            let Some(end) = line[start + 1..].find('"') else {
                continue;
            };
            let bin_filename = &line[start + 1..start + 1 + end];
            let bin_path = match std::path::Path::new(cue_path).parent() {
                Some(parent) => parent.join(bin_filename),
                None => std::path::PathBuf::from(bin_filename),
            };
            return Ok(bin_path.to_string_lossy().to_string());
        }

        Err(CdRomError::DiscLoadError(
            "No FILE directive found in .cue file".to_string(),
        ))
    }

    /// Parse .cue file content to extract track information
    ///
    /// INDEX 01 times are relative to the start of the .bin file, which
    /// holds LBA 0 onwards.
    pub(super) fn parse_cue(cue_data: &str) -> Result<Vec<Track>> {
        let mut tracks = Vec::new();
        let mut current_track: Option<Track> = None;

        for line in cue_data.lines() {
            let line = line.trim();

            if line.starts_with("TRACK") {
                if let Some(track) = current_track.take() {
                    tracks.push(track);
                }

                let parts: Vec<&str> = line.split_whitespace().collect();
                let number = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
                let track_type = Self::parse_track_type(parts.get(2).unwrap_or(&"MODE2/2352"));

                current_track = Some(Track {
                    number,
                    track_type,
                    start_lba: 0,
                    length_sectors: 0,
                });
            } else if line.starts_with("INDEX 01") {
                if let Some(ref mut track) = current_track {
                    if let Some(time) = line.split_whitespace().nth(2) {
                        track.start_lba = Self::parse_msf(time)?;
                    }
                }
            }
        }

        if let Some(track) = current_track {
            tracks.push(track);
        }

        Ok(tracks)
    }

    /// Parse an MM:SS:FF time string into a sector count
    pub(super) fn parse_msf(msf: &str) -> Result<i32> {
        let parts: Vec<&str> = msf.split(':').collect();
        let [minute, second, sector] = parts.as_slice() else {
            return Err(CdRomError::DiscLoadError(format!(
                "Invalid MSF format: '{}'",
                msf
            )));
        };

        let field = |s: &str, what: &str| {
            s.parse::<i32>()
                .map_err(|_| CdRomError::DiscLoadError(format!("Invalid {} in MSF: '{}'", what, msf)))
        };

        Ok((field(*minute, "minute")? * 60 + field(*second, "second")?) * 75
            + field(*sector, "sector")?)
    }

    /// Parse track type string from .cue file
    pub(super) fn parse_track_type(s: &str) -> TrackType {
        match s {
            "MODE1/2352" => TrackType::Mode1_2352,
            "AUDIO" => TrackType::Audio,
            _ => TrackType::Mode2_2352,
        }
    }

    /// Calculate track lengths from start addresses and the .bin size
    pub(super) fn calculate_track_lengths(tracks: &mut [Track], file_size: usize) {
        let total = (file_size / RAW_SECTOR_SIZE) as i32;
        for i in 0..tracks.len() {
            let end = tracks.get(i + 1).map_or(total, |next| next.start_lba);
            tracks[i].length_sectors = (end - tracks[i].start_lba).max(0) as u32;
        }
    }

    /// Read a raw 2352-byte sector
    ///
    /// # Returns
    ///
    /// - `Some(&[u8])` - Raw sector
    /// - `None` - LBA outside the image
    pub fn read_sector(&self, lba: i32) -> Option<&[u8]> {
        let lba = usize::try_from(lba).ok()?;
        let offset = lba * RAW_SECTOR_SIZE;
        self.data.get(offset..offset + RAW_SECTOR_SIZE)
    }

    /// 2048-byte user data area of a data sector
    pub fn user_data(&self, lba: i32) -> Option<&[u8]> {
        let raw = self.read_sector(lba)?;
        let start = match self.track_at(lba).map(|t| t.track_type) {
            Some(TrackType::Mode1_2352) => 16,
            _ => 24,
        };
        Some(&raw[start..start + SECTOR_SIZE])
    }

    /// Number of sectors in the image
    pub fn sector_count(&self) -> i32 {
        (self.data.len() / RAW_SECTOR_SIZE) as i32
    }

    /// Get the number of tracks on the disc
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Get track information by track number
    pub fn get_track(&self, track_num: u8) -> Option<&Track> {
        self.tracks.iter().find(|t| t.number == track_num)
    }

    /// Track containing `lba`
    pub fn track_at(&self, lba: i32) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|t| lba >= t.start_lba && lba < t.start_lba + t.length_sectors as i32)
    }

    /// All tracks
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Start LBA of each session
    pub fn sessions(&self) -> &[i32] {
        &self.sessions
    }
}

fn write_form1_sector(raw: &mut [u8], lba: i32, user: &[u8]) {
    raw[..12].copy_from_slice(&SYNC_PATTERN);
    raw[12..15].copy_from_slice(&Position::from_lba(lba).to_bcd());
    raw[15] = 0x02;
    raw[16..20].copy_from_slice(&FORM1_SUBHEADER);
    raw[20..24].copy_from_slice(&FORM1_SUBHEADER);
    let len = user.len().min(SECTOR_SIZE);
    raw[24..24 + len].copy_from_slice(&user[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_cue(dir: &TempDir, content: &str) -> String {
        let path = dir.path().join("disc.cue");
        std::fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_parse_msf() {
        assert_eq!(DiscImage::parse_msf("00:02:00").unwrap(), 150);
        assert_eq!(DiscImage::parse_msf("01:00:05").unwrap(), 4505);
        assert!(DiscImage::parse_msf("00:02").is_err());
        assert!(DiscImage::parse_msf("aa:bb:cc").is_err());
    }

    #[test]
    fn test_parse_cue_multiple_tracks() {
        let cue = r#"FILE "game.bin" BINARY
  TRACK 01 MODE2/2352
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    INDEX 00 00:10:00
    INDEX 01 00:12:00
"#;
        let tracks = DiscImage::parse_cue(cue).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].track_type, TrackType::Mode2_2352);
        assert_eq!(tracks[1].number, 2);
        assert_eq!(tracks[1].track_type, TrackType::Audio);
        assert_eq!(tracks[1].start_lba, 12 * 75);
    }

    #[test]
    fn test_calculate_track_lengths() {
        let mut tracks = DiscImage::parse_cue(
            "TRACK 01 MODE2/2352\nINDEX 01 00:00:00\nTRACK 02 AUDIO\nINDEX 01 00:00:40\n",
        )
        .unwrap();
        DiscImage::calculate_track_lengths(&mut tracks, 100 * RAW_SECTOR_SIZE);
        assert_eq!(tracks[0].length_sectors, 40);
        assert_eq!(tracks[1].length_sectors, 60);
    }

    #[test]
    fn test_load_cue_and_bin() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("game.bin"), vec![0u8; 30 * RAW_SECTOR_SIZE]).unwrap();
        let cue = write_cue(
            &dir,
            "FILE \"game.bin\" BINARY\n  TRACK 01 MODE2/2352\n    INDEX 01 00:00:00\n",
        );

        let disc = DiscImage::open(&cue).unwrap();
        assert_eq!(disc.track_count(), 1);
        assert_eq!(disc.sector_count(), 30);
        assert!(disc.read_sector(29).is_some());
        assert!(disc.read_sector(30).is_none());
    }

    #[test]
    fn test_load_missing_bin() {
        let dir = TempDir::new().unwrap();
        let cue = write_cue(&dir, "FILE \"missing.bin\" BINARY\nTRACK 01 MODE2/2352\n");
        assert!(matches!(
            DiscImage::load(&cue),
            Err(CdRomError::DiscLoadError(_))
        ));
    }

    #[test]
    fn test_load_missing_file_directive() {
        let dir = TempDir::new().unwrap();
        let cue = write_cue(&dir, "TRACK 01 MODE2/2352\nINDEX 01 00:00:00\n");
        assert!(DiscImage::load(&cue).is_err());
    }

    #[test]
    fn test_load_iso_too_small() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.iso");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        assert!(DiscImage::open(path.to_str().unwrap()).is_err());
    }

    fn raw_image(iso: &[u8]) -> Vec<u8> {
        let sectors = iso.len().div_ceil(SECTOR_SIZE);
        let mut raw = vec![0u8; sectors * RAW_SECTOR_SIZE];
        for (lba, chunk) in iso.chunks(SECTOR_SIZE).enumerate() {
            write_form1_sector(&mut raw[lba * RAW_SECTOR_SIZE..], lba as i32, chunk);
        }
        raw
    }

    #[test]
    fn test_open_raw_bin() {
        let iso = crate::core::sim::IsoBuilder::new().volume_id("RAWBIN").build();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.bin");
        std::fs::write(&path, raw_image(iso.data())).unwrap();

        let disc = DiscImage::open(path.to_str().unwrap()).unwrap();
        assert_eq!(disc.track_count(), 1);
        assert_eq!(disc.tracks()[0].track_type, TrackType::Mode2_2352);
        assert_eq!(disc.sector_count() as usize, iso.data().len() / SECTOR_SIZE);
        assert_eq!(&disc.user_data(16).unwrap()[1..6], b"CD001");
    }

    #[test]
    fn test_open_detects_raw_image_without_extension() {
        let iso = crate::core::sim::IsoBuilder::new().build();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disc.img");
        std::fs::write(&path, raw_image(iso.data())).unwrap();

        let disc = DiscImage::open(path.to_str().unwrap()).unwrap();
        assert_eq!(&disc.user_data(16).unwrap()[1..6], b"CD001");
    }

    #[test]
    fn test_load_bin_rejects_cooked_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cooked.bin");
        std::fs::write(&path, vec![0u8; 20 * SECTOR_SIZE]).unwrap();
        assert!(matches!(
            DiscImage::open(path.to_str().unwrap()),
            Err(CdRomError::DiscLoadError(_))
        ));
    }

    #[test]
    fn test_from_iso_sector_layout() {
        let mut iso = vec![0u8; 3 * SECTOR_SIZE];
        iso[2 * SECTOR_SIZE] = 0xAB;
        let disc = DiscImage::from_iso(&iso);

        let raw = disc.read_sector(2).unwrap();
        assert_eq!(&raw[..12], &SYNC_PATTERN);
        assert_eq!(&raw[12..16], &[0x00, 0x02, 0x02, 0x02]);
        assert_eq!(raw[24], 0xAB);
        assert_eq!(disc.user_data(2).unwrap()[0], 0xAB);
    }

    #[test]
    fn test_append_session() {
        let mut disc = DiscImage::from_iso(&vec![0u8; 20 * SECTOR_SIZE]);
        disc.append_session(100, &vec![0x11; 4 * SECTOR_SIZE]);
        assert_eq!(disc.sessions(), &[0, 100]);
        assert_eq!(disc.sector_count(), 104);
        assert_eq!(disc.user_data(50).unwrap()[0], 0);
        assert_eq!(disc.user_data(101).unwrap()[0], 0x11);
        assert_eq!(disc.track_at(103).unwrap().number, 1);
    }

    #[test]
    fn test_append_audio_track() {
        let mut disc = DiscImage::from_iso(&vec![0u8; 20 * SECTOR_SIZE]);
        disc.append_audio_track(75);
        let track = disc.get_track(2).unwrap();
        assert_eq!(track.track_type, TrackType::Audio);
        assert_eq!(track.start_lba, 20);
        assert_eq!(track.start().track, 2);
        assert_eq!(disc.sector_count(), 95);
    }
}
