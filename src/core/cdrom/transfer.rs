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

//! Sector data transfer
//!
//! Sector payloads leave the controller through DMA channel 3. A burst
//! transfer stalls the CPU until the sector is copied; a background
//! transfer moves one word every 16 cycles and is collected later with
//! [`CdDriver::data_sync`].

use super::bus::{REG_REQUEST, REG_STATUS, REQUEST_BFRD};
use super::driver::{CdDriver, DriverCore, InterruptContext, SyncMode};
use super::CdBus;
use crate::core::error::{CdRomError, Result};

/// Progress of a background transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// No transfer is in progress
    Done,
    /// Data is still being moved
    InProgress,
}

impl<B: CdBus> DriverCore<B> {
    fn request_data(&mut self) {
        self.bus.write_register(REG_STATUS, 0);
        self.bus.write_register(REG_REQUEST, REQUEST_BFRD);
    }

    pub(super) fn transfer_sector(&mut self, dst: &mut [u8]) -> Result<()> {
        if self.transfer_words.is_some() {
            return Err(CdRomError::ControllerBusy);
        }
        let words = dst.len().div_ceil(4);
        self.request_data();
        self.bus.dma_start(words, false);
        let copied = self.bus.dma_take(dst);
        if copied < dst.len() {
            log::warn!(
                "CD-ROM: short sector transfer ({} of {} bytes)",
                copied,
                dst.len()
            );
            return Err(CdRomError::ShortTransfer {
                expected: dst.len(),
                copied,
            });
        }
        Ok(())
    }

    pub(super) fn start_transfer(&mut self, words: usize) -> Result<()> {
        if self.transfer_words.is_some() {
            return Err(CdRomError::ControllerBusy);
        }
        log::trace!("CD-ROM: background transfer of {} words", words);
        self.request_data();
        self.bus.dma_start(words, true);
        self.transfer_words = Some(words);
        self.transfer_done = None;
        Ok(())
    }

    fn poll_transfer(&mut self) -> TransferStatus {
        let Some(words) = self.transfer_words else {
            return TransferStatus::Done;
        };
        if self.bus.dma_in_progress() {
            return TransferStatus::InProgress;
        }
        let mut data = vec![0; words * 4];
        self.bus.dma_take(&mut data);
        self.transfer_words = None;
        self.transfer_done = Some(data);
        TransferStatus::Done
    }
}

impl<B: CdBus> CdDriver<B> {
    /// Transfer the pending sector into `dst`
    ///
    /// Copies `dst.len() / 4` words (rounded up) and returns once the data is
    /// in place.
    pub fn get_sector(&mut self, dst: &mut [u8]) -> Result<()> {
        self.core.get_sector(dst)
    }

    /// Start a background transfer of `words` words
    ///
    /// Collect the data with [`data_sync`](Self::data_sync) and
    /// [`take_transfer`](Self::take_transfer).
    pub fn get_sector_async(&mut self, words: usize) -> Result<()> {
        self.core.get_sector_async(words)
    }

    /// Wait for (or query) the background transfer
    ///
    /// # Returns
    ///
    /// - `TransferStatus::Done` if no transfer is running
    /// - `TransferStatus::InProgress` if polling and data is still moving
    /// - `Err(CdRomError::Timeout)` if blocking and the transfer did not finish
    pub fn data_sync(&mut self, mode: SyncMode) -> Result<TransferStatus> {
        match mode {
            SyncMode::Poll => Ok(self.core.poll_transfer()),
            SyncMode::Block => {
                let budget = self.core.config.data_timeout;
                self.wait_for("data transfer", budget, |cd| {
                    (cd.core.poll_transfer() == TransferStatus::Done).then_some(TransferStatus::Done)
                })
            }
        }
    }

    /// Take the data of the last finished background transfer
    pub fn take_transfer(&mut self) -> Option<Vec<u8>> {
        self.core.transfer_done.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cdrom::{Callback, Command, IntrResult, ModeFlags, Param, Position};
    use crate::core::config::DriverConfig;
    use crate::core::sim::{IsoBuilder, SimDrive};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn driver() -> (CdDriver<SimDrive>, i32) {
        let iso = IsoBuilder::new()
            .file("DATA.BIN", (0..2048u32).map(|i| i as u8).collect())
            .build();
        let lba = iso.file_lba("DATA.BIN").unwrap() as i32;
        let mut cd = CdDriver::new(SimDrive::with_disc(iso.into_disc()), DriverConfig::default());
        cd.init().unwrap();
        cd.control(Command::SetMode, Some(&Param::Mode(ModeFlags::SPEED)))
            .unwrap();
        (cd, lba)
    }

    #[test]
    fn test_async_transfer_from_ready_callback() {
        let (mut cd, lba) = driver();
        let started = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&started);
        let callback: Callback = Box::new(move |ctx, result, _| {
            if result == IntrResult::DataReady && !*flag.borrow() {
                ctx.get_sector_async(512).unwrap();
                ctx.control_f(Command::Pause, None).unwrap();
                *flag.borrow_mut() = true;
            }
        });
        cd.set_ready_callback(Some(callback));

        cd.control(Command::ReadN, Some(&Param::Loc(Position::from_lba(lba))))
            .unwrap();
        cd.wait_for("first sector", 10_000_000, |_| {
            (*started.borrow()).then_some(())
        })
        .unwrap();

        assert_eq!(cd.data_sync(SyncMode::Block).unwrap(), TransferStatus::Done);
        let data = cd.take_transfer().unwrap();
        assert_eq!(data.len(), 2048);
        assert_eq!(data[..4], [0, 1, 2, 3]);
        assert_eq!(cd.take_transfer(), None);
    }

    #[test]
    fn test_data_sync_poll_reports_progress() {
        let (mut cd, lba) = driver();
        let started = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&started);
        cd.set_ready_callback(Some(Box::new(move |ctx, _, _| {
            if !*flag.borrow() {
                ctx.get_sector_async(512).unwrap();
                ctx.control_f(Command::Pause, None).unwrap();
                *flag.borrow_mut() = true;
            }
        })));
        cd.control(Command::ReadN, Some(&Param::Loc(Position::from_lba(lba))))
            .unwrap();
        cd.wait_for("first sector", 10_000_000, |_| {
            (*started.borrow()).then_some(())
        })
        .unwrap();

        // 512 words at 16 cycles each
        assert_eq!(cd.data_sync(SyncMode::Poll).unwrap(), TransferStatus::InProgress);
        cd.bus_mut().wait_cycles(512 * 16);
        assert_eq!(cd.data_sync(SyncMode::Poll).unwrap(), TransferStatus::Done);
        assert!(cd.take_transfer().is_some());
    }

    #[test]
    fn test_data_sync_without_transfer() {
        let (mut cd, _) = driver();
        assert_eq!(cd.data_sync(SyncMode::Poll).unwrap(), TransferStatus::Done);
        assert_eq!(cd.take_transfer(), None);
    }

    #[test]
    fn test_blocking_data_sync_times_out() {
        let iso = IsoBuilder::new().build();
        let config = DriverConfig {
            data_timeout: 100,
            ..DriverConfig::default()
        };
        let mut cd = CdDriver::new(SimDrive::with_disc(iso.into_disc()), config);
        cd.init().unwrap();

        cd.get_sector_async(512).unwrap();
        assert!(matches!(
            cd.data_sync(SyncMode::Block),
            Err(CdRomError::Timeout("data transfer"))
        ));
        // Still running, not lost
        assert_eq!(cd.data_sync(SyncMode::Poll).unwrap(), TransferStatus::InProgress);
        cd.bus_mut().wait_cycles(512 * 16);
        assert_eq!(cd.data_sync(SyncMode::Poll).unwrap(), TransferStatus::Done);
    }

    #[test]
    fn test_short_transfer_is_an_error() {
        let (mut cd, _) = driver();
        // Nothing has been read, so the data FIFO is empty
        let mut buf = vec![0xAA; 2048];
        assert!(matches!(
            cd.get_sector(&mut buf),
            Err(CdRomError::ShortTransfer {
                expected: 2048,
                copied: 0
            })
        ));
    }
}
