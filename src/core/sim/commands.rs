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

//! Command execution of the simulated drive
//!
//! Every command is answered with timed events:
//! 1. Host writes the command register -> parameters are consumed at once
//! 2. After the acknowledge delay -> INT3 (or INT5 if rejected)
//! 3. For blocking commands -> INT2 (or INT5) after the completion delay

use super::{
    bcd_msf, DriveState, SimDrive, DEFAULT_ACK_DELAY, ERR_DOOR_OPEN, ERR_INVALID_COMMAND,
    ERR_INVALID_PARAMETER, ERR_NOT_READY, ERR_PARAMETER_COUNT, ERR_READ, GETID_SECOND_RESPONSE_DELAY,
    INIT_ACK_DELAY, INIT_SECOND_RESPONSE_DELAY, INT2, INT3, INT5, PAUSE_SECOND_RESPONSE_DELAY,
    READTOC_SECOND_RESPONSE_DELAY, READ_ACK_DELAY, SEEK_SECOND_RESPONSE_DELAY,
};
use crate::core::cdrom::{
    bcd_to_dec, dec_to_bcd, is_valid_bcd, Command, ModeFlags, Position, Region, StatusFlags,
    SECTORS_PER_SECOND,
};

/// Expected strings of the Test 0x50..0x57 unlock steps, region string excluded
const UNLOCK_STEPS: [&[u8]; 8] = [
    b"",
    b"Licensed by",
    b"Sony",
    b"Computer",
    b"Entertainment",
    b"",
    b"",
    b"",
];
const UNLOCK_REGION_STEP: usize = 5;

impl SimDrive {
    /// Execute a command byte written to the command register
    pub(super) fn execute_command(&mut self, cmd: u8) {
        let params: Vec<u8> = self.param_fifo.drain(..).collect();
        let Some(command) = Command::from_u8(cmd) else {
            log::warn!("SIM: unknown command 0x{:02X}", cmd);
            self.reject(ERR_INVALID_COMMAND);
            return;
        };
        log::debug!("SIM: {:?} {:02X?}", command, params);

        if !Self::parameter_count_ok(command, params.len()) {
            log::debug!("SIM: {:?} with {} parameter(s)", command, params.len());
            self.reject(ERR_PARAMETER_COUNT);
            return;
        }

        match command {
            Command::Nop => self.cmd_nop(),
            Command::SetLoc => self.cmd_setloc(&params),
            Command::Play => self.cmd_play(&params),
            Command::ReadN | Command::ReadS => self.cmd_read(),
            Command::Standby => self.cmd_standby(),
            Command::Stop => self.cmd_stop(),
            Command::Pause => self.cmd_pause(),
            Command::Init => self.cmd_init(),
            Command::Reset => self.cmd_reset(),
            Command::SetFilter => {
                self.filter = (params[0], params[1]);
                self.ack();
            }
            Command::SetMode => {
                self.mode = ModeFlags::from_bits_retain(params[0]);
                self.ack();
            }
            Command::GetParam => {
                let response = vec![self.stat(), self.mode.bits(), 0, self.filter.0, self.filter.1];
                self.push_event(DEFAULT_ACK_DELAY, INT3, response);
            }
            Command::GetLocL => {
                let response = self.last_header.to_vec();
                self.push_event(DEFAULT_ACK_DELAY, INT3, response);
            }
            Command::GetLocP => self.cmd_getlocp(),
            Command::SetSession => self.cmd_setsession(params[0]),
            Command::GetTN => self.cmd_gettn(),
            Command::GetTD => self.cmd_gettd(params[0]),
            Command::SeekL | Command::SeekP => self.cmd_seek(),
            Command::Test => self.cmd_test(&params),
            Command::GetID => self.cmd_getid(),
            Command::ReadTOC => self.cmd_readtoc(),
            Command::Forward | Command::Backward | Command::Mute | Command::Demute => self.ack(),
            // Not supported by this controller revision
            Command::GetQ => self.reject(ERR_INVALID_COMMAND),
        }
    }

    fn parameter_count_ok(command: Command, count: usize) -> bool {
        match command {
            Command::SetLoc => count == 3,
            Command::SetFilter | Command::GetQ => count == 2,
            Command::SetMode | Command::SetSession | Command::GetTD => count == 1,
            Command::Play => count <= 1,
            Command::Test => count >= 1,
            _ => count == 0,
        }
    }

    fn ack(&mut self) {
        let stat = self.stat();
        self.push_event(DEFAULT_ACK_DELAY, INT3, vec![stat]);
    }

    /// Answer the command with INT5 instead of an acknowledge
    fn reject(&mut self, code: u8) {
        let stat = self.stat() | StatusFlags::ERROR.bits();
        self.push_event(DEFAULT_ACK_DELAY, INT5, vec![stat, code]);
    }

    /// Error code to reject a disc access with, if the disc cannot be accessed
    fn access_error(&self) -> Option<u8> {
        if self.lid_open {
            Some(ERR_DOOR_OPEN)
        } else if self.disc.is_none() || self.lost {
            Some(ERR_NOT_READY)
        } else {
            None
        }
    }

    fn cmd_nop(&mut self) {
        self.ack();
        if !self.lid_open {
            self.shell_open_latch = false;
        }
    }

    fn cmd_setloc(&mut self, params: &[u8]) {
        if !params.iter().all(|&b| is_valid_bcd(b)) {
            self.reject(ERR_INVALID_PARAMETER);
            return;
        }
        let Some(pos) = Position::from_bcd(params) else {
            self.reject(ERR_INVALID_PARAMETER);
            return;
        };
        log::trace!("SIM: SetLoc {} (LBA {})", pos, pos.to_lba());
        self.seek_target = Some(pos.to_lba());
        self.ack();
    }

    fn cmd_read(&mut self) {
        if let Some(code) = self.access_error() {
            self.reject(code);
            return;
        }
        if let Some(target) = self.seek_target.take() {
            self.head = target;
        }
        self.drop_pending_sectors();
        self.state = DriveState::Reading;
        self.play_end_at = None;

        let stat = self.stat();
        let ack_at = self.push_event(READ_ACK_DELAY, INT3, vec![stat]);
        self.next_sector_at = ack_at + self.cycles_per_sector();
    }

    fn cmd_play(&mut self, params: &[u8]) {
        if let Some(code) = self.access_error() {
            self.reject(code);
            return;
        }

        let track = params.first().map(|&t| bcd_to_dec(t)).filter(|&t| t != 0);
        let start = match track {
            Some(number) => match self.disc.as_ref().and_then(|d| d.get_track(number)) {
                Some(track) => track.start_lba,
                None => {
                    self.reject(ERR_INVALID_PARAMETER);
                    return;
                }
            },
            None => self.seek_target.take().unwrap_or(self.head),
        };

        let track_end = self
            .disc
            .as_ref()
            .and_then(|d| d.track_at(start))
            .map(|t| t.start_lba + t.length_sectors as i32);

        self.drop_pending_sectors();
        self.head = start;
        self.state = DriveState::Playing;
        self.ack();

        self.play_end_at = match track_end {
            Some(end) if self.mode.contains(ModeFlags::AUTO_PAUSE) => {
                Some(self.clock + (end - start).max(1) as u64 * self.cycles_per_sector())
            }
            _ => None,
        };
    }

    fn cmd_standby(&mut self) {
        self.ack();
        if self.disc.is_some() && !self.lid_open {
            self.motor_on = true;
        }
        let stat = self.stat();
        self.push_event(SEEK_SECOND_RESPONSE_DELAY, INT2, vec![stat]);
    }

    fn cmd_stop(&mut self) {
        self.ack();
        self.drop_pending_sectors();
        self.state = DriveState::Idle;
        self.play_end_at = None;
        self.motor_on = false;
        let stat = self.stat();
        self.push_event(SEEK_SECOND_RESPONSE_DELAY, INT2, vec![stat]);
    }

    fn cmd_pause(&mut self) {
        self.ack();
        if self.state == DriveState::Reading {
            // The drive has already buffered the sector after the last one delivered
            if let Some(raw) = self.disc.as_ref().and_then(|d| d.read_sector(self.head)) {
                self.last_header.copy_from_slice(&raw[12..20]);
            }
            self.drop_pending_sectors();
        }
        self.state = DriveState::Idle;
        self.play_end_at = None;
        let stat = self.stat();
        self.push_event(PAUSE_SECOND_RESPONSE_DELAY, INT2, vec![stat]);
    }

    fn restart(&mut self) {
        self.drop_pending_sectors();
        self.state = DriveState::Idle;
        self.play_end_at = None;
        self.mode = ModeFlags::empty();
        self.lost = false;
        self.seek_target = None;
        self.motor_on = self.disc.is_some() && !self.lid_open;
    }

    fn cmd_init(&mut self) {
        self.restart();
        let stat = self.stat();
        self.push_event(INIT_ACK_DELAY, INT3, vec![stat]);
        self.push_event(INIT_SECOND_RESPONSE_DELAY, INT2, vec![stat]);
    }

    fn cmd_reset(&mut self) {
        self.restart();
        self.events.clear();
        self.interrupt_flag = 0;
        self.response_fifo.clear();
        self.ack();
    }

    fn cmd_getlocp(&mut self) {
        let track = self.disc.as_ref().and_then(|d| d.track_at(self.head));
        let (number, start) = track.map_or((1, 0), |t| (t.number, t.start_lba));
        let relative = (self.head - start).max(0);
        let mut response = vec![dec_to_bcd(number), 0x01];
        response.extend_from_slice(&[
            dec_to_bcd((relative / (SECTORS_PER_SECOND * 60)) as u8),
            dec_to_bcd((relative / SECTORS_PER_SECOND % 60) as u8),
            dec_to_bcd((relative % SECTORS_PER_SECOND) as u8),
        ]);
        response.extend_from_slice(&bcd_msf(self.head));
        self.push_event(DEFAULT_ACK_DELAY, INT3, response);
    }

    fn cmd_setsession(&mut self, session: u8) {
        if session == 0 {
            self.reject(ERR_INVALID_PARAMETER);
            return;
        }
        if let Some(code) = self.access_error() {
            self.reject(code);
            return;
        }
        self.ack();

        let start = self
            .disc
            .as_ref()
            .and_then(|d| d.sessions().get(usize::from(session) - 1).copied());
        match start {
            Some(lba) => {
                log::debug!("SIM: session {} at LBA {}", session, lba);
                self.head = lba;
                self.seek_target = None;
                let stat = self.stat();
                self.push_event(SEEK_SECOND_RESPONSE_DELAY, INT2, vec![stat]);
            }
            None => {
                log::debug!("SIM: session {} does not exist", session);
                self.lost = true;
                let stat = self.stat() | (StatusFlags::ERROR | StatusFlags::SEEK_ERROR).bits();
                self.push_event(SEEK_SECOND_RESPONSE_DELAY, INT5, vec![stat, ERR_INVALID_COMMAND]);
            }
        }
    }

    fn cmd_gettn(&mut self) {
        let last = self
            .disc
            .as_ref()
            .and_then(|d| d.tracks().last())
            .map_or(1, |t| t.number);
        let response = vec![self.stat(), 0x01, dec_to_bcd(last)];
        self.push_event(DEFAULT_ACK_DELAY, INT3, response);
    }

    fn cmd_gettd(&mut self, track: u8) {
        let Some(disc) = self.disc.as_ref() else {
            self.reject(ERR_NOT_READY);
            return;
        };
        let start = match bcd_to_dec(track) {
            0 => Some(disc.sector_count()),
            number => disc.get_track(number).map(|t| t.start_lba),
        };
        let Some(start) = start else {
            self.reject(ERR_INVALID_PARAMETER);
            return;
        };
        let [minute, second, _] = bcd_msf(start);
        let response = vec![self.stat(), minute, second];
        self.push_event(DEFAULT_ACK_DELAY, INT3, response);
    }

    fn cmd_seek(&mut self) {
        if let Some(code) = self.access_error() {
            self.reject(code);
            return;
        }
        self.drop_pending_sectors();
        self.state = DriveState::Idle;
        self.play_end_at = None;
        self.ack();

        let target = self.seek_target.take().unwrap_or(self.head);
        let in_range = self
            .disc
            .as_ref()
            .is_some_and(|d| (0..d.sector_count()).contains(&target));
        if in_range {
            self.head = target;
            let stat = self.stat();
            self.push_event(SEEK_SECOND_RESPONSE_DELAY, INT2, vec![stat]);
        } else {
            log::debug!("SIM: seek to LBA {} outside the disc", target);
            let stat = self.stat() | (StatusFlags::ERROR | StatusFlags::SEEK_ERROR).bits();
            self.push_event(SEEK_SECOND_RESPONSE_DELAY, INT5, vec![stat, ERR_READ]);
        }
    }

    fn cmd_test(&mut self, params: &[u8]) {
        let sub = params[0];
        match sub {
            0x20 => {
                // BIOS date 1998/08/07, version C3
                self.push_event(DEFAULT_ACK_DELAY, INT3, vec![0x98, 0x08, 0x07, 0xC3]);
            }
            0x22 => match self.region_string() {
                Some(text) => {
                    self.push_event(DEFAULT_ACK_DELAY, INT3, text.to_vec());
                }
                None => {
                    self.reject(ERR_INVALID_PARAMETER);
                }
            },
            0x50..=0x57 => {
                self.unlock_step(usize::from(sub - 0x50), &params[1..]);
                // Every unlock step is answered with an error, accepted or not
                self.reject(ERR_INVALID_COMMAND);
            }
            _ => {
                log::debug!("SIM: unsupported Test sub-function 0x{:02X}", sub);
                self.reject(ERR_INVALID_PARAMETER);
            }
        }
    }

    fn region_string(&self) -> Option<&'static [u8]> {
        match self.region {
            Region::Japan => Some(b"for Japan"),
            Region::America => Some(b"for U/C"),
            Region::Europe => Some(b"for Europe"),
            Region::Worldwide => Some(b"for US/AEP"),
            Region::Unknown => Some(b"for ????"),
            Region::Debug => None,
        }
    }

    fn unlock_step(&mut self, step: usize, text: &[u8]) {
        let expected = if step == UNLOCK_REGION_STEP {
            match self.region {
                Region::America => Some(&b"of America"[..]),
                Region::Europe => Some(&b"(Europe)"[..]),
                Region::Worldwide => Some(&b"World wide"[..]),
                _ => None,
            }
        } else {
            Some(UNLOCK_STEPS[step])
        };

        let in_sequence = step == usize::from(self.unlock_step) || step == 0;
        if in_sequence && expected == Some(text) {
            self.unlock_step = step as u8 + 1;
            if self.unlock_step as usize == UNLOCK_STEPS.len() {
                log::debug!("SIM: drive unlocked");
                self.unlocked = true;
            }
        } else {
            self.unlock_step = 0;
        }
    }

    fn cmd_getid(&mut self) {
        self.ack();
        let stat = self.stat();
        if self.access_error().is_some() {
            let stat = stat | StatusFlags::ID_ERROR.bits();
            self.push_event(
                GETID_SECOND_RESPONSE_DELAY,
                INT5,
                vec![stat, ERR_INVALID_COMMAND, 0, 0, 0, 0, 0, 0],
            );
            return;
        }
        let letter = match self.region {
            Region::Japan => b'I',
            Region::Europe => b'E',
            _ => b'A',
        };
        self.push_event(
            GETID_SECOND_RESPONSE_DELAY,
            INT2,
            vec![stat, 0x00, 0x20, 0x00, b'S', b'C', b'E', letter],
        );
    }

    fn cmd_readtoc(&mut self) {
        if let Some(code) = self.access_error() {
            self.reject(code);
            return;
        }
        self.ack();
        if let Some(disc) = self.disc.as_ref() {
            log::debug!("SIM: ReadTOC - {} track(s) on disc", disc.track_count());
        }
        let stat = self.stat();
        self.push_event(READTOC_SECOND_RESPONSE_DELAY, INT2, vec![stat]);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{IsoBuilder, INT1};
    use super::*;
    use crate::core::cdrom::CdBus;
    use crate::core::cdrom::{HwStatus, REG_COMMAND, REG_PARAMETER, REG_REQUEST, REG_STATUS};

    fn run(drive: &mut SimDrive, cmd: Command, params: &[u8]) -> (u8, Vec<u8>) {
        drive.write_register(REG_STATUS, 0);
        for &p in params {
            drive.write_register(REG_PARAMETER, p);
        }
        drive.write_register(REG_COMMAND, cmd.code());
        next(drive)
    }

    fn next(drive: &mut SimDrive) -> (u8, Vec<u8>) {
        drive.write_register(REG_STATUS, 1);
        for _ in 0..2_000 {
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

    fn two_session_drive() -> SimDrive {
        let mut disc = IsoBuilder::new().build().into_disc();
        let second = IsoBuilder::new().base_lba(1000).volume_id("SECOND").build();
        disc.append_session(1000, second.data());
        SimDrive::with_disc(disc)
    }

    #[test]
    fn test_test_bios_date() {
        let mut drive = two_session_drive();
        let (irq, response) = run(&mut drive, Command::Test, &[0x20]);
        assert_eq!(irq, INT3);
        assert_eq!(response, vec![0x98, 0x08, 0x07, 0xC3]);
    }

    #[test]
    fn test_test_without_subfunction() {
        let mut drive = two_session_drive();
        let (irq, response) = run(&mut drive, Command::Test, &[]);
        assert_eq!(irq, INT5);
        assert_eq!(response[1], ERR_PARAMETER_COUNT);
    }

    #[test]
    fn test_setloc_rejects_invalid_bcd() {
        let mut drive = two_session_drive();
        let (irq, response) = run(&mut drive, Command::SetLoc, &[0x00, 0x0A, 0x00]);
        assert_eq!(irq, INT5);
        assert_eq!(response[1], ERR_INVALID_PARAMETER);
    }

    #[test]
    fn test_setsession_existing() {
        let mut drive = two_session_drive();
        assert_eq!(run(&mut drive, Command::SetSession, &[2]).0, INT3);
        assert_eq!(next(&mut drive).0, INT2);
        assert_eq!(drive.head, 1000);
    }

    #[test]
    fn test_missing_session_needs_init() {
        let mut drive = two_session_drive();
        assert_eq!(run(&mut drive, Command::SetSession, &[3]).0, INT3);
        let (irq, response) = next(&mut drive);
        assert_eq!(irq, INT5);
        assert_ne!(response[0] & StatusFlags::SEEK_ERROR.bits(), 0);

        let (irq, response) = run(&mut drive, Command::ReadN, &[]);
        assert_eq!(irq, INT5);
        assert_eq!(response[1], ERR_NOT_READY);

        assert_eq!(run(&mut drive, Command::Init, &[]).0, INT3);
        assert_eq!(next(&mut drive).0, INT2);
        assert_eq!(run(&mut drive, Command::ReadN, &[]).0, INT3);
        assert_eq!(next(&mut drive).0, INT1);
    }

    #[test]
    fn test_getlocp_reports_track_relative_position() {
        let mut drive = two_session_drive();
        run(&mut drive, Command::SetLoc, &bcd_msf(80));
        run(&mut drive, Command::SeekL, &[]);
        next(&mut drive);
        let (_, response) = run(&mut drive, Command::GetLocP, &[]);
        assert_eq!(&response[..2], &[0x01, 0x01]);
        assert_eq!(&response[2..5], &[0x00, 0x01, 0x05]);
        assert_eq!(&response[5..8], &bcd_msf(80));
    }

    #[test]
    fn test_getid_reports_license() {
        let mut drive = two_session_drive();
        drive.set_region(Region::Europe);
        assert_eq!(run(&mut drive, Command::GetID, &[]).0, INT3);
        let (irq, response) = next(&mut drive);
        assert_eq!(irq, INT2);
        assert_eq!(&response[4..], b"SCEE");
    }

    #[test]
    fn test_unlock_sequence_must_be_in_order() {
        let mut drive = two_session_drive();
        drive.set_region(Region::America);
        let send = |drive: &mut SimDrive, sub: u8, text: &[u8]| {
            let mut params = vec![sub];
            params.extend_from_slice(text);
            run(drive, Command::Test, &params)
        };
        send(&mut drive, 0x51, b"Licensed by");
        assert_eq!(drive.unlock_step, 0);

        let steps: [&[u8]; 8] = [
            b"",
            b"Licensed by",
            b"Sony",
            b"Computer",
            b"Entertainment",
            b"of America",
            b"",
            b"",
        ];
        for (sub, text) in (0x50u8..).zip(steps) {
            let (irq, response) = send(&mut drive, sub, text);
            assert_eq!((irq, response[1]), (INT5, ERR_INVALID_COMMAND));
        }
        assert!(drive.is_unlocked());
    }
}
