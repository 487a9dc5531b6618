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

//! CD audio helpers
//!
//! Volume mixing between the CD audio output and the SPU inputs, CD-DA
//! playback with optional looping, and table of contents queries.

use serde::Serialize;

use super::bus::{REG_COMMAND, REG_PARAMETER, REG_REQUEST, REG_STATUS};
use super::commands::{Command, Param};
use super::driver::CdDriver;
use super::{bcd_to_dec, CdBus, ModeFlags, Position};
use crate::core::error::{CdRomError, Result};

/// Request register value that applies staged volume settings
const APPLY_VOLUME: u8 = 0x20;

/// CD audio attenuation matrix
///
/// Each value scales one CD channel into one SPU input, 0x80 being unity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CdVolume {
    /// CD left to SPU left
    pub left_to_left: u8,
    /// CD left to SPU right
    pub left_to_right: u8,
    /// CD right to SPU right
    pub right_to_right: u8,
    /// CD right to SPU left
    pub right_to_left: u8,
}

impl Default for CdVolume {
    fn default() -> Self {
        Self {
            left_to_left: 0x80,
            left_to_right: 0x00,
            right_to_right: 0x80,
            right_to_left: 0x00,
        }
    }
}

impl<B: CdBus> CdDriver<B> {
    /// Set the CD audio mixing matrix
    pub fn mix(&mut self, volume: &CdVolume) {
        log::debug!("CD-ROM: mix {:?}", volume);
        let bus = &mut self.core.bus;
        bus.write_register(REG_STATUS, 2);
        bus.write_register(REG_PARAMETER, volume.left_to_left);
        bus.write_register(REG_REQUEST, volume.left_to_right);
        bus.write_register(REG_STATUS, 3);
        bus.write_register(REG_COMMAND, volume.right_to_right);
        bus.write_register(REG_PARAMETER, volume.right_to_left);
        bus.write_register(REG_REQUEST, APPLY_VOLUME);
        bus.write_register(REG_STATUS, 0);
    }

    /// Play a CD-DA track
    ///
    /// With `looping` set, the track restarts every time its end is reached.
    pub fn play_cdda(&mut self, track: u8, looping: bool) -> Result<()> {
        log::debug!("CD-ROM: play track {} (loop: {})", track, looping);
        self.control(
            Command::SetMode,
            Some(&Param::Mode(ModeFlags::CDDA | ModeFlags::AUTO_PAUSE)),
        )?;
        self.control(Command::Play, Some(&Param::Track(track)))?;
        self.cdda_track = Some(track);
        self.cdda_loop = looping.then_some(track);
        Ok(())
    }

    /// Stop CD-DA playback
    pub fn stop_cdda(&mut self) -> Result<()> {
        self.cdda_loop = None;
        self.control(Command::Pause, None)?;
        Ok(())
    }

    /// Restart the last track played with [`play_cdda`](Self::play_cdda)
    pub fn replay_cdda(&mut self) -> Result<()> {
        let track = self
            .cdda_track
            .ok_or(CdRomError::ParameterMissing(Command::Play))?;
        let looping = self.cdda_loop.is_some();
        self.play_cdda(track, looping)
    }

    /// Read the table of contents
    ///
    /// # Returns
    ///
    /// The start position of every track, with the track number filled in
    pub fn get_toc(&mut self) -> Result<Vec<Position>> {
        let response = self.control(Command::GetTN, None)?;
        let (first, last) = match response.as_slice() {
            [_, first, last, ..] => (bcd_to_dec(*first), bcd_to_dec(*last)),
            _ => return Err(short_response(Command::GetTN, &response)),
        };

        let mut toc = Vec::with_capacity(usize::from(last.saturating_sub(first)) + 1);
        for track in first..=last {
            let response = self.control(Command::GetTD, Some(&Param::Track(track)))?;
            let [_, minute, second, ..] = response.as_slice() else {
                return Err(short_response(Command::GetTD, &response));
            };
            let mut pos = Position::new(bcd_to_dec(*minute), bcd_to_dec(*second), 0);
            pos.track = track;
            toc.push(pos);
        }
        log::debug!("CD-ROM: {} track(s) in table of contents", toc.len());
        Ok(toc)
    }
}

fn short_response(command: Command, response: &[u8]) -> CdRomError {
    CdRomError::CommandError {
        command,
        status: response.first().copied().unwrap_or(0),
        code: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DriverConfig;
    use crate::core::sim::{IsoBuilder, SimDrive};
    use crate::core::cdrom::{IntrResult, StatusFlags};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn driver() -> CdDriver<SimDrive> {
        let mut disc = IsoBuilder::new().build().into_disc();
        disc.append_audio_track(150);
        disc.append_audio_track(300);
        let mut cd = CdDriver::new(SimDrive::with_disc(disc), DriverConfig::default());
        cd.init().unwrap();
        cd
    }

    #[test]
    fn test_mix_reaches_volume_registers() {
        let mut cd = driver();
        let volume = CdVolume {
            left_to_left: 0x40,
            left_to_right: 0x10,
            right_to_right: 0x40,
            right_to_left: 0x20,
        };
        cd.mix(&volume);
        assert_eq!(cd.bus().volume(), [0x40, 0x10, 0x40, 0x20]);
    }

    #[test]
    fn test_get_toc() {
        let mut cd = driver();
        let toc = cd.get_toc().unwrap();
        assert_eq!(toc.len(), 3);
        assert_eq!(toc[0].track, 1);
        assert_eq!((toc[0].minute, toc[0].second), (0, 2));
        assert_eq!(toc[2].track, 3);
        assert!(toc[2] != toc[1]);
    }

    #[test]
    fn test_play_and_stop() {
        let mut cd = driver();
        cd.play_cdda(2, false).unwrap();
        assert!(cd.status().contains(StatusFlags::PLAY));
        cd.stop_cdda().unwrap();
        cd.wait_idle().unwrap();
        assert!(!cd.status().contains(StatusFlags::PLAY));
    }

    #[test]
    fn test_looping_restarts_track() {
        let mut cd = driver();
        let ends = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&ends);
        cd.set_auto_pause_callback(Some(Box::new(move |_, result, _| {
            assert_eq!(result, IntrResult::DataEnd);
            *counter.borrow_mut() += 1;
        })));

        cd.play_cdda(2, true).unwrap();
        cd.wait_for("two track ends", 50_000_000, |_| (*ends.borrow() >= 2).then_some(()))
            .unwrap();
        cd.control(Command::Nop, None).unwrap();
        assert!(cd.status().contains(StatusFlags::PLAY));
        assert_eq!(cd.last_command(), Some(Command::Nop));
        cd.stop_cdda().unwrap();
    }

    #[test]
    fn test_replay_without_previous_track() {
        let mut cd = driver();
        assert!(matches!(
            cd.replay_cdda(),
            Err(CdRomError::ParameterMissing(Command::Play))
        ));
        cd.play_cdda(3, false).unwrap();
        cd.replay_cdda().unwrap();
    }
}
