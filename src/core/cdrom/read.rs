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

//! Multi-sector reads with retry
//!
//! A read starts at the location of the last SetLoc and transfers one sector
//! per data ready interrupt into an internal buffer. Errors reported by the
//! drive are retried by seeking to the first missing sector and issuing ReadN
//! again, until the attempt budget is spent. Retries are driven from
//! [`CdDriver::read_sync`], so it has to be called (blocking once, or
//! polling repeatedly) for a read to make progress after an error.
//!
//! ```text
//!         read()            last sector
//! Idle ─────────> Reading ─────────────> Complete
//!                  │   ▲
//!          error   │   │ SetLoc + ReadN (budget left)
//!                  ▼   │
//!              retry pending ──────────> Error (budget spent)
//!
//! read_break(): Reading ──> Aborted
//! ```

use std::mem;

use super::commands::{Command, Param};
use super::driver::{invoke, Callback, CdDriver, InterruptContext, SyncMode};
use super::{CdBus, IntrResult, ModeFlags, Position, StatusFlags};
use crate::core::error::{CdRomError, Result};

/// State of the current (or last) read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    /// No read has been started
    #[default]
    Idle,
    /// Sectors are being transferred
    Reading,
    /// All sectors were transferred
    Complete,
    /// The attempt budget was spent
    Error,
    /// The read was cancelled with [`CdDriver::read_break`]
    Aborted,
}

#[derive(Default)]
pub(super) struct ReadRequest {
    pub(super) state: ReadState,
    start_lba: i32,
    sectors: usize,
    done: usize,
    sector_size: usize,
    mode: ModeFlags,
    attempts: u32,
    attempt: u32,
    retry_pending: bool,
    last_status: StatusFlags,
    buffer: Vec<u8>,
    pub(super) saved_ready: Option<Callback>,
}

impl ReadRequest {
    pub(super) fn is_active(&self) -> bool {
        self.state == ReadState::Reading
    }
}

impl<B: CdBus> CdDriver<B> {
    /// Start reading `sectors` sectors from the last SetLoc location
    ///
    /// Equivalent to [`read_retry`](Self::read_retry) with a single attempt.
    pub fn read(&mut self, sectors: usize, mode: ModeFlags) -> Result<()> {
        self.read_retry(sectors, mode, 1)
    }

    /// Start reading `sectors` sectors, retrying up to `attempts` times
    ///
    /// The ready callback is suspended until the read ends. Sector payloads
    /// are 2048 bytes, or 2340 bytes when `mode` contains
    /// [`ModeFlags::SIZE_2340`].
    ///
    /// # Returns
    ///
    /// - `Ok(())` once ReadN has been acknowledged
    /// - `Err(CdRomError::ControllerBusy)` if a read is already in progress
    /// - `Err(CdRomError::InvalidParameter)` if `sectors` is zero
    pub fn read_retry(&mut self, sectors: usize, mode: ModeFlags, attempts: u32) -> Result<()> {
        if self.read.is_active() {
            return Err(CdRomError::ControllerBusy);
        }
        if sectors == 0 {
            return Err(CdRomError::InvalidParameter(Command::ReadN));
        }

        let sector_size = mode.sector_size();
        let start_lba = self.core.last_position().to_lba();
        log::debug!(
            "CD-ROM: read {} sector(s) at LBA {} ({} bytes each, {} attempt(s))",
            sectors,
            start_lba,
            sector_size,
            attempts.max(1)
        );

        let saved_ready = self.callbacks.ready.take();
        self.read = ReadRequest {
            state: ReadState::Reading,
            start_lba,
            sectors,
            done: 0,
            sector_size,
            mode,
            attempts: attempts.max(1),
            attempt: 1,
            retry_pending: false,
            last_status: StatusFlags::empty(),
            buffer: vec![0; sectors * sector_size],
            saved_ready,
        };

        let started = self
            .control(Command::SetMode, Some(&Param::Mode(mode)))
            .and_then(|_| self.control(Command::ReadN, None));
        if let Err(e) = started {
            self.end_read(ReadState::Error);
            return Err(e);
        }
        Ok(())
    }

    /// Wait for (or query) the current read
    ///
    /// Drives pending retries.
    ///
    /// # Returns
    ///
    /// - `Ok(0)` once every sector has been transferred
    /// - `Ok(n)` with the sectors still missing, when polling
    /// - `Err(CdRomError::ReadError)` if the attempt budget was spent
    /// - `Err(CdRomError::Aborted)` if the read was cancelled
    /// - `Err(CdRomError::Timeout)` if the drive stopped delivering sectors
    pub fn read_sync(&mut self, mode: SyncMode) -> Result<usize> {
        match mode {
            SyncMode::Poll => {
                self.service();
                self.advance_read()
            }
            SyncMode::Block => {
                let budget = self.core.config.read_timeout;
                let mut progress = self.read.done;
                loop {
                    let remaining = self.wait_for("sector data", budget, |cd| {
                        match cd.advance_read() {
                            Ok(0) => Some(Ok(0)),
                            Ok(_) if cd.read.done != progress => Some(Ok(cd.read.sectors - cd.read.done)),
                            Ok(_) => None,
                            Err(e) => Some(Err(e)),
                        }
                    })??;
                    if remaining == 0 {
                        return Ok(0);
                    }
                    progress = self.read.done;
                }
            }
        }
    }

    fn advance_read(&mut self) -> Result<usize> {
        match self.read.state {
            ReadState::Idle | ReadState::Complete => Ok(0),
            ReadState::Error => Err(CdRomError::ReadError {
                attempts: self.read.attempt,
            }),
            ReadState::Aborted => Err(CdRomError::Aborted),
            ReadState::Reading => {
                if self.read.retry_pending {
                    self.retry_read()?;
                }
                Ok(self.read.sectors - self.read.done)
            }
        }
    }

    fn retry_read(&mut self) -> Result<()> {
        self.read.retry_pending = false;
        self.read.attempt += 1;

        let resume = self.read.start_lba + self.read.done as i32;
        log::warn!(
            "CD-ROM: retrying read at LBA {} (attempt {}/{}, status {:?})",
            resume,
            self.read.attempt,
            self.read.attempts,
            self.read.last_status
        );

        let mode = self.read.mode;
        let restarted = self
            .control(Command::SetLoc, Some(&Param::Loc(Position::from_lba(resume))))
            .and_then(|_| self.control(Command::SetMode, Some(&Param::Mode(mode))))
            .and_then(|_| self.control(Command::ReadN, None));

        match restarted {
            Ok(_) => Ok(()),
            Err(e) if self.read.attempt < self.read.attempts => {
                log::warn!("CD-ROM: retry could not be started: {}", e);
                self.read.retry_pending = true;
                Ok(())
            }
            Err(e) => {
                log::warn!("CD-ROM: giving up on read: {}", e);
                self.fail_read(&[self.read.last_status.bits()]);
                Err(CdRomError::ReadError {
                    attempts: self.read.attempt,
                })
            }
        }
    }

    /// Cancel the current read
    ///
    /// Sends Pause without waiting; the drive may still be spinning down
    /// when this returns, check [`status`](Self::status) to confirm. The
    /// read callback is not called.
    pub fn read_break(&mut self) -> Result<()> {
        if !self.read.is_active() {
            return Ok(());
        }
        log::debug!(
            "CD-ROM: read aborted after {}/{} sector(s)",
            self.read.done,
            self.read.sectors
        );
        self.end_read(ReadState::Aborted);
        self.core.control_f(Command::Pause, None)
    }

    /// State of the current or last read
    pub fn read_state(&self) -> ReadState {
        self.read.state
    }

    /// Sectors transferred so far by the current or last read
    pub fn sectors_read(&self) -> usize {
        self.read.done
    }

    /// Take the buffer of a completed read
    ///
    /// # Returns
    ///
    /// - `Some(data)` once, after the read completed
    /// - `None` if no completed read is waiting
    pub fn take_read_data(&mut self) -> Option<Vec<u8>> {
        if self.read.state != ReadState::Complete || self.read.buffer.is_empty() {
            return None;
        }
        Some(mem::take(&mut self.read.buffer))
    }

    /// Read `count` sectors starting at `lba`, blocking until done
    ///
    /// # Returns
    ///
    /// - `Ok(data)` with `count` sector payloads back to back
    /// - `Err(CdRomError::SeekError)` if SetLoc was rejected
    /// - `Err(CdRomError::ReadError)` if the read failed
    pub fn read_sectors(
        &mut self,
        lba: i32,
        count: usize,
        mode: ModeFlags,
        attempts: u32,
    ) -> Result<Vec<u8>> {
        self.control(Command::SetLoc, Some(&Param::Loc(Position::from_lba(lba))))
            .map_err(|e| {
                log::warn!("CD-ROM: seek to LBA {} failed: {}", lba, e);
                CdRomError::SeekError
            })?;
        self.read_retry(count, mode, attempts)?;
        if let Err(e) = self.read_sync(SyncMode::Block) {
            if self.read.is_active() {
                if let Err(brk) = self.read_break() {
                    log::warn!("CD-ROM: failed to stop stalled read: {}", brk);
                }
            }
            return Err(e);
        }
        self.take_read_data().ok_or(CdRomError::ReadError {
            attempts: self.read.attempt,
        })
    }

    pub(super) fn read_data_ready(&mut self, response: &[u8]) {
        let read = &mut self.read;
        if let Some(&status) = response.first() {
            read.last_status = StatusFlags::from_bits_retain(status);
        }
        if read.retry_pending || read.done >= read.sectors {
            return;
        }

        let offset = read.done * read.sector_size;
        let dst = &mut read.buffer[offset..offset + read.sector_size];
        if let Err(e) = self.core.get_sector(dst) {
            log::warn!("CD-ROM: sector transfer failed: {}", e);
            self.read_failed(response);
            return;
        }

        read.done += 1;
        log::trace!("CD-ROM: sector {}/{} transferred", read.done, read.sectors);

        if read.done == read.sectors {
            if let Err(e) = self.core.control_f(Command::Pause, None) {
                log::warn!("CD-ROM: failed to pause after read: {}", e);
            }
            self.end_read(ReadState::Complete);
            invoke(
                &mut self.callbacks.read,
                &mut self.core,
                IntrResult::Complete,
                response,
            );
        }
    }

    pub(super) fn read_failed(&mut self, response: &[u8]) {
        if let Some(&status) = response.first() {
            self.read.last_status = StatusFlags::from_bits_retain(status);
        }
        if self.read.retry_pending {
            return;
        }
        if self.read.attempt < self.read.attempts {
            log::warn!(
                "CD-ROM: read error at sector {}/{} (status {:?})",
                self.read.done,
                self.read.sectors,
                self.read.last_status
            );
            self.read.retry_pending = true;
        } else {
            self.fail_read(response);
        }
    }

    fn fail_read(&mut self, response: &[u8]) {
        log::warn!(
            "CD-ROM: read failed after {} attempt(s), {}/{} sector(s) transferred",
            self.read.attempt,
            self.read.done,
            self.read.sectors
        );
        self.end_read(ReadState::Error);
        invoke(
            &mut self.callbacks.read,
            &mut self.core,
            IntrResult::DiskError,
            response,
        );
    }

    fn end_read(&mut self, state: ReadState) {
        self.read.state = state;
        self.read.retry_pending = false;
        self.callbacks.ready = self.read.saved_ready.take();
    }
}
