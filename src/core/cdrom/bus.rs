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

//! Register-level access to the CD-ROM controller
//!
//! The controller exposes four byte-wide ports. What each port means depends
//! on the bank selected through the low two bits of the status port:
//!
//! ```text
//! Port        Read (any bank)       Write bank 0   bank 1        bank 2    bank 3
//! 0x1F801800  status                index          index         index     index
//! 0x1F801801  response FIFO         command        -             -         vol R->R
//! 0x1F801802  data FIFO             parameter      int enable    vol L->L  vol R->L
//! 0x1F801803  int enable / flag     request        int flag ack  vol L->R  apply vol
//! ```

use bitflags::bitflags;

/// Status / index port
pub const REG_STATUS: u32 = 0x1F80_1800;

/// Command / response port
pub const REG_COMMAND: u32 = 0x1F80_1801;

/// Parameter / data port
pub const REG_PARAMETER: u32 = 0x1F80_1802;

/// Request / interrupt port
pub const REG_REQUEST: u32 = 0x1F80_1803;

/// Request register bit that asks the controller to expose sector data
pub const REQUEST_BFRD: u8 = 0x80;

/// Interrupt flag bits acknowledged by writing to bank 1 of the request port
pub const INT_ACK_ALL: u8 = 0x1F;

/// Interrupt flag bit that also clears the parameter FIFO
pub const INT_CLEAR_PARAMS: u8 = 0x40;

bitflags! {
    /// Hardware status port (0x1F801800 read)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HwStatus: u8 {
        /// Register bank selector
        const INDEX = 0x03;
        /// XA-ADPCM playback busy
        const ADPBUSY = 0x04;
        /// Parameter FIFO empty
        const PARAM_EMPTY = 0x08;
        /// Parameter FIFO not full
        const PARAM_NOT_FULL = 0x10;
        /// Response FIFO not empty
        const RESPONSE_READY = 0x20;
        /// Data FIFO not empty
        const DATA_READY = 0x40;
        /// Command being transmitted to the controller
        const BUSY = 0x80;
    }
}

/// Access to the CD-ROM controller and its DMA channel
///
/// Implemented by real hardware glue or by the simulated drive in
/// [`crate::core::sim`]. Every wait in the driver goes through
/// [`wait_cycles`](CdBus::wait_cycles), so timeouts are measured in CPU
/// cycles on both.
pub trait CdBus {
    /// Read a byte from one of the controller ports
    fn read_register(&mut self, addr: u32) -> u8;

    /// Write a byte to one of the controller ports
    fn write_register(&mut self, addr: u32, value: u8);

    /// Start a DMA transfer of `words` 32-bit words out of the data FIFO
    ///
    /// A burst transfer completes before this returns. A background
    /// transfer proceeds at one word per 16 cycles while the CPU runs.
    fn dma_start(&mut self, words: usize, background: bool);

    /// True while a background transfer is still moving data
    fn dma_in_progress(&mut self) -> bool;

    /// Copy the data of the last transfer into `dst`
    ///
    /// # Returns
    ///
    /// Number of bytes copied
    fn dma_take(&mut self, dst: &mut [u8]) -> usize;

    /// Let `cycles` CPU cycles elapse
    fn wait_cycles(&mut self, cycles: u32);
}
