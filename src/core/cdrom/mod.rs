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

//! CD-ROM controller driver for the PlayStation
//!
//! This module drives the CXD2510Q CD-ROM controller through its four
//! memory-mapped registers. It provides:
//! - Command issue with parameter encoding and acknowledge tracking
//! - Interrupt dispatch to user callbacks
//! - Sector transfer out of the controller's data buffer
//! - Multi-sector reads with automatic retry
//! - Region query, drive unlock and CD-DA playback helpers
//!
//! # CD-ROM Commands
//!
//! | Command | Name       | Parameters        | Blocking |
//! |---------|------------|-------------------|----------|
//! | 0x01    | Nop        | -                 | no       |
//! | 0x02    | SetLoc     | MM SS FF (BCD)    | no       |
//! | 0x03    | Play       | [track]           | no       |
//! | 0x06    | ReadN      | [location]        | no       |
//! | 0x09    | Pause      | -                 | yes      |
//! | 0x0A    | Init       | -                 | yes      |
//! | 0x0E    | SetMode    | mode              | no       |
//! | 0x12    | SetSession | session           | yes      |
//! | 0x15    | SeekL      | [location]        | yes      |
//! | 0x19    | Test       | sub-function, ... | no       |
//! | 0x1A    | GetID      | -                 | yes      |
//! | 0x1E    | ReadTOC    | -                 | yes      |
//!
//! Blocking commands deliver a second response (INT2 on success, INT5 on
//! failure) after the acknowledge; [`CdDriver::sync`] waits for it.
//!
//! # Interrupts
//!
//! - INT1: Data ready (a sector is waiting in the data buffer)
//! - INT2: Command complete (second response of a blocking command)
//! - INT3: Acknowledge (first response of every command)
//! - INT4: Data end (end of track reached with auto pause enabled)
//! - INT5: Disk error

mod audio;
mod bus;
mod commands;
mod driver;
mod read;
mod region;
mod transfer;
mod wait;

pub use audio::CdVolume;
pub use bus::{CdBus, HwStatus, REG_COMMAND, REG_PARAMETER, REG_REQUEST, REG_STATUS};
pub use commands::{Command, Packet, Param, ParamShape};
pub use driver::{Callback, CdDriver, InterruptContext, SyncMode};
pub use read::ReadState;
pub use region::Region;
pub use transfer::TransferStatus;
pub use wait::Deadline;

use bitflags::bitflags;
use serde::Serialize;

/// Size of a data sector payload in bytes
pub const SECTOR_SIZE: usize = 2048;

/// Size of a sector payload in whole-sector mode (header and subheader included)
pub const SECTOR_SIZE_WHOLE: usize = 2340;

/// Size of a raw sector on disc
pub const RAW_SECTOR_SIZE: usize = 2352;

/// Sectors per second of disc time
pub const SECTORS_PER_SECOND: i32 = 75;

/// Sectors in the 2-second lead-in before LBA 0
pub const LEAD_IN_SECTORS: i32 = 150;

/// Last address expressible as MSF (99:59:74)
pub const MAX_LBA: i32 = (99 * 60 + 59) * SECTORS_PER_SECOND + 74 - LEAD_IN_SECTORS;

/// Convert a BCD byte to decimal
#[inline]
pub fn bcd_to_dec(bcd: u8) -> u8 {
    (bcd >> 4) * 10 + (bcd & 0x0F)
}

/// Convert a decimal value (0-99) to BCD
#[inline]
pub fn dec_to_bcd(dec: u8) -> u8 {
    ((dec / 10) << 4) | (dec % 10)
}

/// Check that both nibbles of a BCD byte are decimal digits
#[inline]
pub fn is_valid_bcd(bcd: u8) -> bool {
    (bcd >> 4) < 10 && (bcd & 0x0F) < 10
}

/// Disc position in MSF (Minute:Second:Sector) format
///
/// Values are stored as decimal; BCD is only used on the wire. The track
/// field is informational and filled in by table-of-contents queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Position {
    /// Minute (0-99)
    pub minute: u8,
    /// Second (0-59)
    pub second: u8,
    /// Sector (0-74)
    pub sector: u8,
    /// Track number (0 when unknown)
    pub track: u8,
}

impl Position {
    /// Create a new position
    pub fn new(minute: u8, second: u8, sector: u8) -> Self {
        Self {
            minute,
            second,
            sector,
            track: 0,
        }
    }

    /// Convert MSF to a logical block address
    ///
    /// LBA = (minute * 60 + second) * 75 + sector - 150
    ///
    /// # Example
    ///
    /// ```
    /// use psrx_cdfs::core::cdrom::Position;
    ///
    /// assert_eq!(Position::new(0, 2, 16).to_lba(), 16);
    /// ```
    pub fn to_lba(&self) -> i32 {
        (self.minute as i32 * 60 + self.second as i32) * SECTORS_PER_SECOND + self.sector as i32
            - LEAD_IN_SECTORS
    }

    /// Convert a logical block address to MSF
    ///
    /// Addresses inside the lead-in clamp to 00:00:00, addresses past
    /// [`MAX_LBA`] clamp to 99:59:74.
    pub fn from_lba(lba: i32) -> Self {
        let total = (lba.min(MAX_LBA) + LEAD_IN_SECTORS).max(0);
        let minute = (total / SECTORS_PER_SECOND / 60) as u8;
        let second = ((total / SECTORS_PER_SECOND) % 60) as u8;
        let sector = (total % SECTORS_PER_SECOND) as u8;
        Self::new(minute, second, sector)
    }

    /// Encode as three BCD bytes (minute, second, sector)
    pub fn to_bcd(&self) -> [u8; 3] {
        [
            dec_to_bcd(self.minute),
            dec_to_bcd(self.second),
            dec_to_bcd(self.sector),
        ]
    }

    /// Decode three BCD bytes (minute, second, sector)
    ///
    /// # Returns
    ///
    /// - `Some(Position)` if at least three valid BCD bytes were given
    /// - `None` otherwise
    pub fn from_bcd(bytes: &[u8]) -> Option<Self> {
        let [m, s, f] = *bytes.first_chunk::<3>()?;
        if !(is_valid_bcd(m) && is_valid_bcd(s) && is_valid_bcd(f)) {
            return None;
        }
        Some(Self::new(bcd_to_dec(m), bcd_to_dec(s), bcd_to_dec(f)))
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.minute, self.second, self.sector)
    }
}

bitflags! {
    /// Drive status byte returned with most responses
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u8 {
        /// Invalid command or parameter
        const ERROR = 0x01;
        /// Spindle motor running
        const STANDBY = 0x02;
        /// Seek failed
        const SEEK_ERROR = 0x04;
        /// Disc not licensed or not recognized
        const ID_ERROR = 0x08;
        /// Lid has been opened since the last status poll
        const SHELL_OPEN = 0x10;
        /// Reading data sectors
        const READ = 0x20;
        /// Seeking
        const SEEK = 0x40;
        /// Playing CD-DA
        const PLAY = 0x80;
    }
}

impl StatusFlags {
    /// True while the drive is reading, seeking or playing
    pub fn is_busy(self) -> bool {
        self.intersects(Self::READ | Self::SEEK | Self::PLAY)
    }
}

bitflags! {
    /// Drive mode set with SetMode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u8 {
        /// Allow CD-DA playback
        const CDDA = 0x01;
        /// Pause at the end of a track
        const AUTO_PAUSE = 0x02;
        /// Report position while playing
        const REPORT = 0x04;
        /// Enable XA sector filter
        const XA_FILTER = 0x08;
        /// Ignore sector size
        const IGNORE = 0x10;
        /// Deliver 2340-byte sectors instead of 2048
        const SIZE_2340 = 0x20;
        /// Send XA-ADPCM sectors to the SPU
        const XA_ADPCM = 0x40;
        /// Double speed
        const SPEED = 0x80;
    }
}

impl ModeFlags {
    /// Payload size in bytes of one sector in this mode
    pub fn sector_size(self) -> usize {
        if self.contains(Self::SIZE_2340) {
            SECTOR_SIZE_WHOLE
        } else {
            SECTOR_SIZE
        }
    }
}

/// Interrupt cause, as reported in the interrupt flag register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum IntrResult {
    /// No interrupt pending
    NoIntr = 0,
    /// INT1: sector data ready
    DataReady = 1,
    /// INT2: command complete
    Complete = 2,
    /// INT3: command acknowledged
    Acknowledge = 3,
    /// INT4: end of track
    DataEnd = 4,
    /// INT5: error
    DiskError = 5,
}

impl IntrResult {
    /// Decode the low three bits of the interrupt flag register
    pub fn from_flag(flag: u8) -> Self {
        match flag & 0x07 {
            1 => Self::DataReady,
            2 => Self::Complete,
            3 => Self::Acknowledge,
            4 => Self::DataEnd,
            5 => Self::DiskError,
            _ => Self::NoIntr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bcd_conversion() {
        assert_eq!(bcd_to_dec(0x00), 0);
        assert_eq!(bcd_to_dec(0x59), 59);
        assert_eq!(bcd_to_dec(0x74), 74);
        assert_eq!(dec_to_bcd(74), 0x74);
        assert_eq!(dec_to_bcd(9), 0x09);
        assert!(!is_valid_bcd(0x1A));
    }

    #[test]
    fn test_position_lead_in_offset() {
        assert_eq!(Position::new(0, 2, 0).to_lba(), 0);
        assert_eq!(Position::from_lba(0), Position::new(0, 2, 0));
        assert_eq!(Position::from_lba(16), Position::new(0, 2, 16));
        assert_eq!(Position::from_lba(75 * 60), Position::new(1, 2, 0));
    }

    #[test]
    fn test_position_bcd_encoding() {
        let pos = Position::new(12, 34, 56);
        assert_eq!(pos.to_bcd(), [0x12, 0x34, 0x56]);
        assert_eq!(Position::from_bcd(&[0x12, 0x34, 0x56, 0xFF]), Some(pos));
        assert_eq!(Position::from_bcd(&[0x12, 0x34]), None);
        assert_eq!(Position::from_bcd(&[0x1F, 0x00, 0x00]), None);
    }

    #[test]
    fn test_from_lba_clamps_to_range() {
        assert_eq!(Position::from_lba(-200), Position::new(0, 0, 0));
        assert_eq!(Position::from_lba(MAX_LBA), Position::new(99, 59, 74));
        assert_eq!(Position::from_lba(MAX_LBA + 1_000), Position::new(99, 59, 74));
    }

    #[test]
    fn test_status_busy() {
        assert!(StatusFlags::READ.is_busy());
        assert!((StatusFlags::STANDBY | StatusFlags::PLAY).is_busy());
        assert!(!(StatusFlags::STANDBY | StatusFlags::SHELL_OPEN).is_busy());
    }

    #[test]
    fn test_mode_sector_size() {
        assert_eq!(ModeFlags::SPEED.sector_size(), 2048);
        assert_eq!((ModeFlags::SPEED | ModeFlags::SIZE_2340).sector_size(), 2340);
    }

    #[test]
    fn test_intr_from_flag() {
        assert_eq!(IntrResult::from_flag(0xE3), IntrResult::Acknowledge);
        assert_eq!(IntrResult::from_flag(0x05), IntrResult::DiskError);
        assert_eq!(IntrResult::from_flag(0x00), IntrResult::NoIntr);
    }

    proptest! {
        #[test]
        fn prop_lba_round_trip(lba in 0i32..(100 * 60 * 75 - 150)) {
            prop_assert_eq!(Position::from_lba(lba).to_lba(), lba);
        }

        #[test]
        fn prop_bcd_round_trip(value in 0u8..100) {
            prop_assert_eq!(bcd_to_dec(dec_to_bcd(value)), value);
        }
    }
}
