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

//! Multi-session support
//!
//! A later session of a multi-session disc carries its own volume
//! descriptor. After seeking to the session, sectors are scanned from the
//! interrupt handler until a descriptor shows up; the drive position then
//! gives the session start.

use std::cell::RefCell;
use std::rc::Rc;

use super::{records, IsoFs};
use crate::core::cdrom::{
    CdBus, Command, InterruptContext, IntrResult, ModeFlags, Param, Position, SyncMode,
    SECTOR_SIZE,
};
use crate::core::error::{CdRomError, Result};

/// The drive reports the sector after the descriptor once paused
const DESCRIPTOR_TO_LOCATION: i32 = 17;

#[derive(Debug, Default)]
struct ScanState {
    scanned: u32,
    found: bool,
    complete: bool,
}

fn stop_scan(ctx: &mut dyn InterruptContext, state: &mut ScanState) {
    if let Err(e) = ctx.control_f(Command::Pause, None) {
        log::warn!("ISO: could not pause session scan: {}", e);
    }
    state.complete = true;
}

fn scan_sector(ctx: &mut dyn InterruptContext, state: &mut ScanState, limit: u32) {
    let mut sector = [0u8; SECTOR_SIZE];
    if let Err(e) = ctx.get_sector(&mut sector) {
        log::warn!("ISO: session scan transfer failed: {}", e);
        stop_scan(ctx, state);
        return;
    }
    if sector[0] == records::PRIMARY_DESCRIPTOR && records::is_volume_descriptor(&sector) {
        log::debug!("ISO: volume descriptor after {} sector(s)", state.scanned);
        state.found = true;
        stop_scan(ctx, state);
        return;
    }
    state.scanned += 1;
    if state.scanned >= limit {
        stop_scan(ctx, state);
    }
}

impl<B: CdBus> IsoFs<B> {
    /// Re-root the file system at session `session` (1-based)
    ///
    /// Seeks to the session, scans up to `session_scan_limit` sectors for a
    /// volume descriptor, then reads the descriptor and path table from
    /// there. If the session does not exist, the controller is
    /// reinitialized.
    ///
    /// # Returns
    ///
    /// - `Ok(lba)` with the start of the session
    /// - `Err(CdRomError::SeekError)` if the session does not exist
    /// - `Err(CdRomError::InvalidFilesystem)` if no descriptor was found
    pub fn load_session(&mut self, session: u8) -> Result<i32> {
        let result = self.load_session_inner(session);
        self.record(result)
    }

    fn load_session_inner(&mut self, session: u8) -> Result<i32> {
        log::info!("ISO: seeking to session {}", session);
        let seek = self
            .cd
            .control(Command::SetSession, Some(&Param::Session(session)))
            .and_then(|_| self.cd.sync(SyncMode::Block));

        match seek {
            Ok(IntrResult::Complete) => {}
            Ok(_) | Err(CdRomError::CommandError { .. }) => {
                log::warn!("ISO: session {} does not exist, restarting drive", session);
                self.cd.control(Command::Nop, None)?;
                self.cd.control_b(Command::Init, None)?;
                return Err(CdRomError::SeekError);
            }
            Err(e) => return Err(e),
        }

        let start = self.scan_for_descriptor()?;
        log::info!("ISO: session {} starts at LBA {}", session, start);

        self.invalidate();
        self.load_descriptor(Some(start))?;
        Ok(start)
    }

    /// Read from the current position until a volume descriptor passes by
    ///
    /// # Returns
    ///
    /// The session start derived from the position the drive stopped at
    fn scan_for_descriptor(&mut self) -> Result<i32> {
        let limit = self.cd.config().session_scan_limit;
        let budget = self.cd.config().sync_timeout;
        let state = Rc::new(RefCell::new(ScanState::default()));

        let scan = Rc::clone(&state);
        let previous = self.cd.set_ready_callback(Some(Box::new(move |ctx, result, _| {
            let mut state = scan.borrow_mut();
            if state.complete {
                return;
            }
            match result {
                IntrResult::DataReady => scan_sector(ctx, &mut state, limit),
                IntrResult::DiskError => {
                    log::warn!("ISO: disk error during session scan");
                    stop_scan(ctx, &mut state);
                }
                _ => {}
            }
        })));

        log::debug!("ISO: scanning up to {} sector(s) for a volume descriptor", limit);
        let started = self
            .cd
            .control(Command::SetMode, Some(&Param::Mode(ModeFlags::SPEED)))
            .and_then(|_| self.cd.control(Command::ReadN, None));
        let finished = started.and_then(|_| {
            self.cd
                .wait_for("session scan", budget, |_| state.borrow().complete.then_some(()))
        });

        self.cd.set_ready_callback(previous);
        if let Err(e) = finished {
            if let Err(pause) = self.cd.control_f(Command::Pause, None) {
                log::warn!("ISO: could not stop session scan: {}", pause);
            }
            return Err(e);
        }

        let scan = state.borrow();
        if !scan.found {
            log::warn!(
                "ISO: no volume descriptor within {} sector(s)",
                scan.scanned
            );
            return Err(CdRomError::InvalidFilesystem);
        }
        drop(scan);

        self.cd.wait_idle()?;
        let response = self.cd.control(Command::GetLocL, None)?;
        let pos = Position::from_bcd(&response).ok_or(CdRomError::CommandError {
            command: Command::GetLocL,
            status: 0,
            code: 0,
        })?;
        log::debug!("ISO: drive stopped at {} (LBA {})", pos, pos.to_lba());
        Ok(pos.to_lba() - DESCRIPTOR_TO_LOCATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cdrom::CdDriver;
    use crate::core::config::DriverConfig;
    use crate::core::error::IsoError;
    use crate::core::sim::{DiscImage, IsoBuilder, SimDrive};

    const SECOND_SESSION: u32 = 1200;

    fn two_session_disc() -> DiscImage {
        let mut disc = IsoBuilder::new()
            .volume_id("FIRST")
            .file("ONE.TXT", b"first".to_vec())
            .build()
            .into_disc();
        let second = IsoBuilder::new()
            .volume_id("SECOND")
            .base_lba(SECOND_SESSION)
            .file("ONE.TXT", b"first, updated".to_vec())
            .file("TWO.TXT", b"second".to_vec())
            .build();
        disc.append_session(SECOND_SESSION as i32, second.data());
        disc
    }

    fn mount(disc: DiscImage, config: DriverConfig) -> IsoFs<SimDrive> {
        let mut cd = CdDriver::new(SimDrive::with_disc(disc), config);
        cd.init().unwrap();
        IsoFs::new(cd)
    }

    #[test]
    fn test_load_second_session() {
        let mut fs = mount(two_session_disc(), DriverConfig::default());
        assert_eq!(fs.volume_label().unwrap(), "FIRST");
        assert!(fs.search_file("\\TWO.TXT").is_err());

        assert_eq!(fs.load_session(2).unwrap(), SECOND_SESSION as i32);
        assert_eq!(fs.session_offset(), SECOND_SESSION as i32);
        assert_eq!(fs.last_error(), IsoError::Okay);
        assert_eq!(fs.volume_label().unwrap(), "SECOND");

        let two = fs.search_file("\\TWO.TXT").unwrap();
        assert_eq!(fs.read_file(&two).unwrap(), b"second");
        let one = fs.search_file("\\ONE.TXT").unwrap();
        assert_eq!(fs.read_file(&one).unwrap(), b"first, updated");
    }

    #[test]
    fn test_ready_callback_restored_after_scan() {
        let mut fs = mount(two_session_disc(), DriverConfig::default());
        let previous = fs.driver_mut().set_ready_callback(Some(Box::new(|_, _, _| {})));
        assert!(previous.is_none());

        fs.load_session(2).unwrap();
        assert!(fs.driver_mut().set_ready_callback(None).is_some());
    }

    #[test]
    fn test_missing_session_restarts_drive() {
        let mut fs = mount(two_session_disc(), DriverConfig::default());
        assert!(matches!(fs.load_session(3), Err(CdRomError::SeekError)));
        assert_eq!(fs.last_error(), IsoError::SeekError);

        // The drive was reinitialized and still reads the first session
        assert_eq!(fs.volume_label().unwrap(), "FIRST");
        assert!(fs.search_file("\\ONE.TXT").is_ok());
    }

    #[test]
    fn test_scan_gives_up_at_limit() {
        let mut disc = IsoBuilder::new().volume_id("FIRST").build().into_disc();
        disc.append_session(600, &vec![0u8; 700 * SECTOR_SIZE]);
        let config = DriverConfig {
            session_scan_limit: 64,
            ..DriverConfig::default()
        };
        let mut fs = mount(disc, config);

        assert!(matches!(
            fs.load_session(2),
            Err(CdRomError::InvalidFilesystem)
        ));
        assert_eq!(fs.last_error(), IsoError::InvalidFs);
        assert_eq!(fs.driver().bus().reads_of(600 + 64), 0);
        assert_eq!(fs.driver().bus().reads_of(600 + 63), 1);
    }

    #[test]
    fn test_scan_stops_on_disk_error() {
        let mut fs = mount(two_session_disc(), DriverConfig::default());
        fs.driver_mut()
            .bus_mut()
            .fail_reads_at(SECOND_SESSION as i32 + 4, 1);
        assert!(matches!(
            fs.load_session(2),
            Err(CdRomError::InvalidFilesystem)
        ));
        assert_eq!(fs.driver().bus().reads_of(SECOND_SESSION as i32 + 5), 0);
    }
}
