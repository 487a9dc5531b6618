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

//! Simulated CD-ROM drive
//!
//! A software model of the CXD2510Q controller that implements
//! [`CdBus`], so the driver and the file system layer can run against disc
//! images on the host. The model keeps its own cycle clock, advanced only
//! through [`CdBus::wait_cycles`], which makes every run deterministic.
//!
//! Responses are queued as timed events. The controller holds one
//! interrupt at a time; the next event is delivered once the previous one
//! has been acknowledged and its time has come. Sector reads are produced
//! lazily, one sector ahead of the host, like the drive's buffer.
//!
//! Beyond the commands the driver uses, the model offers test hooks: read
//! fault injection, lid open/close, region selection and register traffic
//! counters.

mod commands;
mod disc;
mod iso_builder;

pub use disc::{DiscImage, Track, TrackType};
pub use iso_builder::{BuiltIso, IsoBuilder};

use std::collections::{HashMap, VecDeque};

use crate::core::cdrom::{
    CdBus, HwStatus, ModeFlags, Position, Region, StatusFlags, REG_COMMAND, REG_PARAMETER,
    REG_REQUEST, REG_STATUS,
};

/// INT1: data ready
const INT1: u8 = 1;
/// INT2: complete
const INT2: u8 = 2;
/// INT3: acknowledge
const INT3: u8 = 3;
/// INT4: data end
const INT4: u8 = 4;
/// INT5: error
const INT5: u8 = 5;

/// Error codes sent as the second byte of an INT5 response
const ERR_READ: u8 = 0x04;
const ERR_DOOR_OPEN: u8 = 0x08;
const ERR_INVALID_PARAMETER: u8 = 0x10;
const ERR_PARAMETER_COUNT: u8 = 0x20;
const ERR_INVALID_COMMAND: u8 = 0x40;
const ERR_NOT_READY: u8 = 0x80;

/// Parameter and response FIFO depth
const FIFO_SIZE: usize = 16;

/// Cycles between two sectors at single speed
const CYCLES_PER_SECTOR_1X: u64 = 13_300;
/// Cycles between two sectors at double speed
const CYCLES_PER_SECTOR_2X: u64 = 6_650;
/// Cycles per word of a background DMA transfer
const DMA_CYCLES_PER_WORD: u64 = 16;

const DEFAULT_ACK_DELAY: u64 = 5_000;
const INIT_ACK_DELAY: u64 = 20_000;
const READ_ACK_DELAY: u64 = 7_000;
const GETID_SECOND_RESPONSE_DELAY: u64 = 33_000;
const READTOC_SECOND_RESPONSE_DELAY: u64 = 500_000;
const INIT_SECOND_RESPONSE_DELAY: u64 = 70_000;
const SEEK_SECOND_RESPONSE_DELAY: u64 = 100_000;
const PAUSE_SECOND_RESPONSE_DELAY: u64 = 25_000;

/// Drive mechanism state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveState {
    Idle,
    Reading,
    Playing,
}

/// Timed interrupt with its response
#[derive(Debug, Clone)]
struct Event {
    at: u64,
    irq: u8,
    response: Vec<u8>,
    /// Sector payload exposed in the data FIFO once delivered
    sector: Option<Vec<u8>>,
}

/// Background or burst DMA transfer out of the data FIFO
#[derive(Debug)]
struct DmaTransfer {
    data: Vec<u8>,
    ready_at: u64,
}

/// Simulated CD-ROM drive
///
/// # Example
///
/// ```
/// use psrx_cdfs::core::cdrom::CdBus;
/// use psrx_cdfs::core::sim::{IsoBuilder, SimDrive};
///
/// let mut drive = SimDrive::with_disc(IsoBuilder::new().build().into_disc());
/// drive.write_register(0x1F80_1800, 0);
/// drive.write_register(0x1F80_1801, 0x01); // Nop
/// drive.wait_cycles(10_000);
/// drive.write_register(0x1F80_1800, 1);
/// assert_eq!(drive.read_register(0x1F80_1803) & 0x07, 3);
/// ```
pub struct SimDrive {
    disc: Option<DiscImage>,

    index: u8,
    param_fifo: VecDeque<u8>,
    response_fifo: VecDeque<u8>,
    interrupt_flag: u8,
    interrupt_enable: u8,

    /// Payload of the last delivered sector
    sector_buffer: Vec<u8>,
    data_fifo: Vec<u8>,
    data_pos: usize,
    dma: Option<DmaTransfer>,

    events: VecDeque<Event>,
    clock: u64,

    state: DriveState,
    motor_on: bool,
    shell_open_latch: bool,
    lid_open: bool,
    /// Set by a failed SetSession until the next Init
    lost: bool,
    mode: ModeFlags,
    filter: (u8, u8),
    seek_target: Option<i32>,
    /// Next sector under the head
    head: i32,
    /// Header and subheader of the last sector read
    last_header: [u8; 8],
    next_sector_at: u64,
    play_end_at: Option<u64>,

    region: Region,
    unlock_step: u8,
    unlocked: bool,
    volume_staged: [u8; 4],
    volume: [u8; 4],

    read_faults: HashMap<i32, u32>,
    read_counts: HashMap<i32, u32>,
    register_writes: usize,
}

impl SimDrive {
    /// Create a drive with no disc
    pub fn new() -> Self {
        Self {
            disc: None,
            index: 0,
            param_fifo: VecDeque::with_capacity(FIFO_SIZE),
            response_fifo: VecDeque::with_capacity(FIFO_SIZE),
            interrupt_flag: 0,
            interrupt_enable: 0,
            sector_buffer: Vec::new(),
            data_fifo: Vec::new(),
            data_pos: 0,
            dma: None,
            events: VecDeque::new(),
            clock: 0,
            state: DriveState::Idle,
            motor_on: false,
            shell_open_latch: true,
            lid_open: false,
            lost: false,
            mode: ModeFlags::empty(),
            filter: (0, 0),
            seek_target: None,
            head: 0,
            last_header: [0; 8],
            next_sector_at: 0,
            play_end_at: None,
            region: Region::America,
            unlock_step: 0,
            unlocked: false,
            volume_staged: [0; 4],
            volume: [0; 4],
            read_faults: HashMap::new(),
            read_counts: HashMap::new(),
            register_writes: 0,
        }
    }

    /// Create a drive with `disc` inserted
    pub fn with_disc(disc: DiscImage) -> Self {
        let mut drive = Self::new();
        drive.disc = Some(disc);
        drive.motor_on = true;
        drive
    }

    /// Open the lid
    ///
    /// A read or playback in progress stops with an error interrupt. The
    /// shell open status bit stays set until a Nop is issued with the lid
    /// closed.
    pub fn open_lid(&mut self) {
        log::debug!("SIM: lid opened");
        self.lid_open = true;
        self.shell_open_latch = true;
        self.motor_on = false;
        if self.state != DriveState::Idle {
            self.state = DriveState::Idle;
            self.play_end_at = None;
            self.drop_pending_sectors();
            let stat = self.stat() | StatusFlags::ERROR.bits();
            self.push_event(0, INT5, vec![stat, ERR_DOOR_OPEN]);
        }
    }

    /// Close the lid
    pub fn close_lid(&mut self) {
        log::debug!("SIM: lid closed");
        self.lid_open = false;
        self.motor_on = self.disc.is_some();
        self.head = 0;
        self.seek_target = None;
    }

    /// Open the lid, replace the disc and close the lid again
    pub fn swap_disc(&mut self, disc: Option<DiscImage>) {
        self.open_lid();
        self.disc = disc;
        self.close_lid();
    }

    /// Make the next `times` reads of `lba` fail
    pub fn fail_reads_at(&mut self, lba: i32, times: u32) {
        self.read_faults.insert(lba, times);
    }

    /// Number of times `lba` has been read, failed attempts included
    pub fn reads_of(&self, lba: i32) -> u32 {
        self.read_counts.get(&lba).copied().unwrap_or(0)
    }

    /// Number of register writes seen so far
    pub fn register_writes(&self) -> usize {
        self.register_writes
    }

    /// Select the region reported by the drive
    pub fn set_region(&mut self, region: Region) {
        self.region = region;
    }

    /// True once the unlock sequence was accepted
    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Applied CD audio volume (L->L, L->R, R->R, R->L)
    pub fn volume(&self) -> [u8; 4] {
        self.volume
    }

    /// Inserted disc
    pub fn disc(&self) -> Option<&DiscImage> {
        self.disc.as_ref()
    }

    /// Current cycle count
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Status byte as reported in responses
    pub(super) fn stat(&self) -> u8 {
        let mut status = StatusFlags::empty();
        if self.motor_on {
            status |= StatusFlags::STANDBY;
        }
        if self.shell_open_latch {
            status |= StatusFlags::SHELL_OPEN;
        }
        match self.state {
            DriveState::Reading => status |= StatusFlags::READ,
            DriveState::Playing => status |= StatusFlags::PLAY,
            DriveState::Idle => {}
        }
        status.bits()
    }

    fn cycles_per_sector(&self) -> u64 {
        if self.mode.contains(ModeFlags::SPEED) {
            CYCLES_PER_SECTOR_2X
        } else {
            CYCLES_PER_SECTOR_1X
        }
    }

    /// Queue an interrupt `delay` cycles from now, after anything already queued
    ///
    /// # Returns
    ///
    /// The cycle at which the event becomes deliverable
    fn push_event(&mut self, delay: u64, irq: u8, response: Vec<u8>) -> u64 {
        let at = self.next_event_time(delay);
        self.events.push_back(Event {
            at,
            irq,
            response,
            sector: None,
        });
        at
    }

    fn next_event_time(&self, delay: u64) -> u64 {
        let earliest = self.events.back().map_or(0, |e| e.at);
        (self.clock + delay).max(earliest)
    }

    fn drop_pending_sectors(&mut self) {
        self.events.retain(|e| e.sector.is_none());
    }

    fn has_pending_read_event(&self) -> bool {
        self.interrupt_flag == INT1 || self.events.iter().any(|e| e.sector.is_some())
    }

    /// Produce the next sector if the drive is reading and it is due
    fn generate_sector(&mut self) {
        if self.state != DriveState::Reading
            || self.clock < self.next_sector_at
            || self.has_pending_read_event()
        {
            return;
        }

        let lba = self.head;
        *self.read_counts.entry(lba).or_default() += 1;
        let at = self.next_event_time(0).max(self.next_sector_at);

        if let Some(remaining) = self.read_faults.get_mut(&lba).filter(|n| **n > 0) {
            *remaining -= 1;
            log::debug!("SIM: injected read error at LBA {}", lba);
            self.state = DriveState::Idle;
            let stat = self.stat() | StatusFlags::ERROR.bits();
            self.events.push_back(Event {
                at,
                irq: INT5,
                response: vec![stat, ERR_READ],
                sector: None,
            });
            return;
        }

        let raw = self.disc.as_ref().and_then(|d| d.read_sector(lba));
        let Some(raw) = raw else {
            log::debug!("SIM: end of disc at LBA {}", lba);
            self.state = DriveState::Idle;
            let stat = self.stat();
            self.events.push_back(Event {
                at,
                irq: INT4,
                response: vec![stat],
                sector: None,
            });
            return;
        };

        self.last_header.copy_from_slice(&raw[12..20]);
        let payload = if self.mode.contains(ModeFlags::SIZE_2340) {
            raw[12..].to_vec()
        } else {
            let start = match self.disc.as_ref().and_then(|d| d.track_at(lba)) {
                Some(track) if track.track_type == TrackType::Mode1_2352 => 16,
                _ => 24,
            };
            raw[start..start + 2048].to_vec()
        };

        let stat = self.stat();
        self.events.push_back(Event {
            at,
            irq: INT1,
            response: vec![stat],
            sector: Some(payload),
        });
        self.head += 1;
        self.next_sector_at = at + self.cycles_per_sector();
    }

    fn check_play_end(&mut self) {
        let Some(end_at) = self.play_end_at else {
            return;
        };
        if self.state != DriveState::Playing || self.clock < end_at {
            return;
        }
        log::debug!("SIM: end of track, auto pause");
        self.play_end_at = None;
        self.state = DriveState::Idle;
        let stat = self.stat();
        self.push_event(0, INT4, vec![stat]);
    }

    /// Move the next due event into the interrupt registers
    fn deliver(&mut self) {
        if self.interrupt_flag != 0 {
            return;
        }
        let due = self.events.front().is_some_and(|e| e.at <= self.clock);
        if !due {
            return;
        }
        let Some(event) = self.events.pop_front() else {
            return;
        };
        log::trace!("SIM: INT{} {:02X?}", event.irq, event.response);
        self.response_fifo = event.response.into();
        self.interrupt_flag = event.irq;
        if let Some(sector) = event.sector {
            self.sector_buffer = sector;
        }
    }

    fn tick(&mut self, cycles: u32) {
        self.clock += cycles as u64;
        self.check_play_end();
        self.generate_sector();
        self.deliver();
    }

    fn read_status(&self) -> u8 {
        let mut status = HwStatus::from_bits_retain(self.index & 0x03);
        if self.param_fifo.is_empty() {
            status |= HwStatus::PARAM_EMPTY;
        }
        if self.param_fifo.len() < FIFO_SIZE {
            status |= HwStatus::PARAM_NOT_FULL;
        }
        if !self.response_fifo.is_empty() {
            status |= HwStatus::RESPONSE_READY;
        }
        if self.data_pos < self.data_fifo.len() {
            status |= HwStatus::DATA_READY;
        }
        status.bits()
    }

    fn write_request(&mut self, value: u8) {
        match self.index {
            0 => {
                if value & 0x80 != 0 {
                    self.data_fifo = self.sector_buffer.clone();
                } else {
                    self.data_fifo.clear();
                }
                self.data_pos = 0;
            }
            1 => {
                self.interrupt_flag &= !(value & 0x1F);
                if value & 0x40 != 0 {
                    self.param_fifo.clear();
                }
                if self.interrupt_flag == 0 {
                    self.response_fifo.clear();
                    self.deliver();
                }
            }
            2 => self.volume_staged[1] = value,
            _ => {
                if value & 0x20 != 0 {
                    self.volume = self.volume_staged;
                    log::trace!("SIM: volume applied {:02X?}", self.volume);
                }
            }
        }
    }
}

impl Default for SimDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl CdBus for SimDrive {
    fn read_register(&mut self, addr: u32) -> u8 {
        match addr {
            REG_STATUS => self.read_status(),
            REG_COMMAND => self.response_fifo.pop_front().unwrap_or(0),
            REG_PARAMETER => {
                let byte = self.data_fifo.get(self.data_pos).copied().unwrap_or(0);
                self.data_pos += 1;
                byte
            }
            REG_REQUEST => {
                if self.index & 1 == 0 {
                    self.interrupt_enable | 0xE0
                } else {
                    self.interrupt_flag | 0xE0
                }
            }
            _ => {
                log::warn!("SIM: read from unknown register 0x{:08X}", addr);
                0xFF
            }
        }
    }

    fn write_register(&mut self, addr: u32, value: u8) {
        self.register_writes += 1;
        match (addr, self.index) {
            (REG_STATUS, _) => self.index = value & 0x03,
            (REG_COMMAND, 0) => self.execute_command(value),
            (REG_COMMAND, 3) => self.volume_staged[2] = value,
            (REG_PARAMETER, 0) => {
                if self.param_fifo.len() < FIFO_SIZE {
                    self.param_fifo.push_back(value);
                }
            }
            (REG_PARAMETER, 1) => self.interrupt_enable = value & 0x1F,
            (REG_PARAMETER, 2) => self.volume_staged[0] = value,
            (REG_PARAMETER, 3) => self.volume_staged[3] = value,
            (REG_REQUEST, _) => self.write_request(value),
            _ => log::trace!(
                "SIM: ignored write 0x{:02X} to 0x{:08X} (bank {})",
                value,
                addr,
                self.index
            ),
        }
    }

    fn dma_start(&mut self, words: usize, background: bool) {
        let end = (self.data_pos + words * 4).min(self.data_fifo.len());
        let start = self.data_pos.min(end);
        let data = self.data_fifo[start..end].to_vec();
        self.data_pos += words * 4;
        let ready_at = if background {
            self.clock + words as u64 * DMA_CYCLES_PER_WORD
        } else {
            self.clock
        };
        self.dma = Some(DmaTransfer { data, ready_at });
    }

    fn dma_in_progress(&mut self) -> bool {
        self.dma.as_ref().is_some_and(|d| self.clock < d.ready_at)
    }

    fn dma_take(&mut self, dst: &mut [u8]) -> usize {
        let Some(transfer) = self.dma.take() else {
            return 0;
        };
        let n = transfer.data.len().min(dst.len());
        dst[..n].copy_from_slice(&transfer.data[..n]);
        n
    }

    fn wait_cycles(&mut self, cycles: u32) {
        self.tick(cycles);
    }
}

/// Position of `lba` as BCD minute, second, sector
fn bcd_msf(lba: i32) -> [u8; 3] {
    Position::from_lba(lba).to_bcd()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(drive: &mut SimDrive, cmd: u8, params: &[u8]) -> (u8, Vec<u8>) {
        drive.write_register(REG_STATUS, 0);
        for &p in params {
            drive.write_register(REG_PARAMETER, p);
        }
        drive.write_register(REG_COMMAND, cmd);
        next_interrupt(drive)
    }

    fn next_interrupt(drive: &mut SimDrive) -> (u8, Vec<u8>) {
        drive.write_register(REG_STATUS, 1);
        for _ in 0..10_000 {
            let flag = drive.read_register(REG_REQUEST) & 0x07;
            if flag != 0 {
                let mut response = Vec::new();
                while drive.read_register(REG_STATUS) & HwStatus::RESPONSE_READY.bits() != 0 {
                    response.push(drive.read_register(REG_COMMAND));
                }
                drive.write_register(REG_REQUEST, 0x1F);
                return (flag, response);
            }
            drive.wait_cycles(1_000);
        }
        panic!("no interrupt");
    }

    fn drive() -> SimDrive {
        SimDrive::with_disc(IsoBuilder::new().file("A.BIN", vec![0x5A; 2048]).build().into_disc())
    }

    #[test]
    fn test_nop_clears_shell_open_latch() {
        let mut drive = drive();
        let (irq, response) = issue(&mut drive, 0x01, &[]);
        assert_eq!(irq, INT3);
        assert_ne!(response[0] & StatusFlags::SHELL_OPEN.bits(), 0);

        let (_, response) = issue(&mut drive, 0x01, &[]);
        assert_eq!(response[0] & StatusFlags::SHELL_OPEN.bits(), 0);
    }

    #[test]
    fn test_interrupts_wait_for_acknowledge() {
        let mut drive = drive();
        drive.write_register(REG_STATUS, 0);
        drive.write_register(REG_COMMAND, 0x01);
        drive.write_register(REG_COMMAND, 0x01);
        drive.wait_cycles(50_000);

        drive.write_register(REG_STATUS, 1);
        assert_eq!(drive.read_register(REG_REQUEST) & 0x07, INT3);
        drive.write_register(REG_REQUEST, 0x1F);
        // Second acknowledge was already due and follows immediately
        assert_eq!(drive.read_register(REG_REQUEST) & 0x07, INT3);
    }

    #[test]
    fn test_setloc_parameter_count() {
        let mut drive = drive();
        let (irq, response) = issue(&mut drive, 0x02, &[0x00, 0x02]);
        assert_eq!(irq, INT5);
        assert_eq!(response[1], ERR_PARAMETER_COUNT);
    }

    #[test]
    fn test_readn_delivers_sector_data() {
        let mut drive = drive();
        let lba = IsoBuilder::new().file("A.BIN", vec![0x5A; 2048]).build().file_lba("A.BIN").unwrap();
        issue(&mut drive, 0x0E, &[0x80]);
        let loc = bcd_msf(lba as i32);
        issue(&mut drive, 0x02, &loc);
        let (irq, _) = issue(&mut drive, 0x06, &[]);
        assert_eq!(irq, INT3);

        let (irq, response) = next_interrupt(&mut drive);
        assert_eq!(irq, INT1);
        assert_ne!(response[0] & StatusFlags::READ.bits(), 0);

        drive.write_register(REG_STATUS, 0);
        drive.write_register(REG_REQUEST, 0x80);
        drive.dma_start(512, false);
        let mut buf = vec![0u8; 2048];
        assert_eq!(drive.dma_take(&mut buf), 2048);
        assert!(buf.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_pause_reports_read_ahead_position() {
        let mut drive = drive();
        issue(&mut drive, 0x0E, &[0x80]);
        issue(&mut drive, 0x02, &bcd_msf(16));
        issue(&mut drive, 0x06, &[]);
        let (irq, _) = next_interrupt(&mut drive);
        assert_eq!(irq, INT1);

        issue(&mut drive, 0x09, &[]);
        let (irq, _) = next_interrupt(&mut drive);
        assert_eq!(irq, INT2);

        let (_, response) = issue(&mut drive, 0x10, &[]);
        assert_eq!(&response[..3], &bcd_msf(17));
    }

    #[test]
    fn test_injected_fault_stops_reading() {
        let mut drive = drive();
        drive.fail_reads_at(16, 1);
        issue(&mut drive, 0x02, &bcd_msf(16));
        issue(&mut drive, 0x06, &[]);
        let (irq, response) = next_interrupt(&mut drive);
        assert_eq!(irq, INT5);
        assert_eq!(response[1], ERR_READ);
        assert_eq!(drive.reads_of(16), 1);
        assert_eq!(drive.state, DriveState::Idle);
    }

    #[test]
    fn test_lid_open_aborts_read() {
        let mut drive = drive();
        issue(&mut drive, 0x02, &bcd_msf(16));
        issue(&mut drive, 0x06, &[]);
        drive.open_lid();
        let (irq, response) = next_interrupt(&mut drive);
        // The first sector may have been queued before the lid opened
        let (irq, response) = if irq == INT1 {
            next_interrupt(&mut drive)
        } else {
            (irq, response)
        };
        assert_eq!(irq, INT5);
        assert_eq!(response[1], ERR_DOOR_OPEN);
    }

    #[test]
    fn test_dma_background_timing() {
        let mut drive = drive();
        drive.sector_buffer = vec![1; 2048];
        drive.write_register(REG_STATUS, 0);
        drive.write_register(REG_REQUEST, 0x80);
        drive.dma_start(512, true);
        assert!(drive.dma_in_progress());
        drive.wait_cycles(512 * 16 - 1);
        assert!(drive.dma_in_progress());
        drive.wait_cycles(1);
        assert!(!drive.dma_in_progress());
    }
}
