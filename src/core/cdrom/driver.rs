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

//! Command issue and interrupt dispatch
//!
//! [`CdDriver`] owns a [`CdBus`] and tracks what the controller is doing:
//! commands waiting for their acknowledge, the blocking command waiting for
//! its second response, and the last status byte seen. Interrupts are
//! serviced from every wait loop and from [`CdDriver::handle_interrupt`].
//!
//! Callbacks run from interrupt dispatch and only get an
//! [`InterruptContext`], which exposes the operations that never wait.

use std::collections::VecDeque;
use std::mem;

use super::bus::{CdBus, HwStatus, INT_ACK_ALL, INT_CLEAR_PARAMS, REG_PARAMETER, REG_REQUEST, REG_STATUS};
use super::commands::{Command, Packet, Param};
use super::read::ReadRequest;
use super::wait::Deadline;
use super::{IntrResult, ModeFlags, Position, StatusFlags};
use crate::core::config::DriverConfig;
use crate::core::error::{CdRomError, Result};

/// Commands the controller accepts before an acknowledge must be consumed
const MAX_IN_FLIGHT: usize = 2;

/// Response FIFO depth
const RESPONSE_FIFO_SIZE: usize = 16;

/// Interrupts handled per service pass
const MAX_IRQS_PER_SERVICE: usize = 8;

/// Interrupt callback
///
/// Receives the interrupt context, the interrupt cause and the response
/// bytes that came with it.
pub type Callback = Box<dyn FnMut(&mut dyn InterruptContext, IntrResult, &[u8])>;

/// How [`CdDriver::sync`] and friends wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Wait until the operation finishes or times out
    Block,
    /// Return the current state immediately
    Poll,
}

/// Operations available to interrupt callbacks
///
/// None of these wait for the controller.
pub trait InterruptContext {
    /// Issue a command without waiting for its acknowledge
    fn control_f(&mut self, command: Command, param: Option<&Param>) -> Result<()>;

    /// Issue a command with raw parameter bytes without waiting
    fn command_f(&mut self, command: Command, params: &[u8]) -> Result<()>;

    /// Transfer the pending sector into `dst`
    fn get_sector(&mut self, dst: &mut [u8]) -> Result<()>;

    /// Start a background transfer of `words` words
    fn get_sector_async(&mut self, words: usize) -> Result<()>;

    /// Last status byte reported by the drive
    fn status(&self) -> StatusFlags;

    /// Mode last set with SetMode
    fn mode(&self) -> ModeFlags;

    /// Location last set with SetLoc
    fn last_position(&self) -> Position;
}

/// Controller state shared between foreground calls and interrupt callbacks
pub(super) struct DriverCore<B: CdBus> {
    pub(super) bus: B,
    pub(super) config: DriverConfig,
    status: StatusFlags,
    mode: ModeFlags,
    last_command: Option<Command>,
    last_position: Position,
    awaiting_ack: VecDeque<Command>,
    ack_response: Vec<u8>,
    ack_error: Option<(Command, Vec<u8>)>,
    sync_pending: Option<Command>,
    sync_result: IntrResult,
    sync_response: Vec<u8>,
    media_changed: bool,
    /// Words of the background transfer in flight
    pub(super) transfer_words: Option<usize>,
    pub(super) transfer_done: Option<Vec<u8>>,
}

impl<B: CdBus> DriverCore<B> {
    fn new(bus: B, config: DriverConfig) -> Self {
        Self {
            bus,
            config,
            status: StatusFlags::empty(),
            mode: ModeFlags::empty(),
            last_command: None,
            last_position: Position::default(),
            awaiting_ack: VecDeque::with_capacity(MAX_IN_FLIGHT),
            ack_response: Vec::new(),
            ack_error: None,
            sync_pending: None,
            sync_result: IntrResult::Complete,
            sync_response: Vec::new(),
            media_changed: true,
            transfer_words: None,
            transfer_done: None,
        }
    }

    fn reset_state(&mut self) {
        self.awaiting_ack.clear();
        self.ack_error = None;
        self.ack_response.clear();
        self.sync_pending = None;
        self.sync_result = IntrResult::Complete;
        self.sync_response.clear();
        self.transfer_words = None;
        self.transfer_done = None;
    }

    /// Write packets to the controller, refusing if the in-flight limit would be exceeded
    fn issue(&mut self, packets: &[Packet]) -> Result<()> {
        if self.awaiting_ack.len() + packets.len() > MAX_IN_FLIGHT {
            log::debug!(
                "CD-ROM: {:?} refused, {} command(s) awaiting acknowledge",
                packets.last().map(|p| p.command),
                self.awaiting_ack.len()
            );
            return Err(CdRomError::ControllerBusy);
        }
        for packet in packets {
            self.write_packet(packet);
        }
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) {
        let command = packet.command;
        log::debug!("CD-ROM: issue {:?} {:02X?}", command, packet.params);

        if self.bus.read_register(REG_STATUS) & HwStatus::BUSY.bits() != 0 {
            log::warn!("CD-ROM: controller still busy transmitting, issuing {:?} anyway", command);
        }

        self.bus.write_register(REG_STATUS, 0);
        for &byte in &packet.params {
            log::trace!("CD-ROM: param 0x{:02X}", byte);
            self.bus.write_register(REG_PARAMETER, byte);
        }
        self.bus.write_register(super::bus::REG_COMMAND, command.code());

        self.awaiting_ack.push_back(command);
        if command.is_blocking() {
            self.sync_pending = Some(command);
            self.sync_result = IntrResult::NoIntr;
        }
        self.last_command = Some(command);

        match command {
            Command::SetLoc => {
                if let Some(pos) = Position::from_bcd(&packet.params) {
                    self.last_position = pos;
                }
            }
            Command::SetMode => {
                if let Some(&bits) = packet.params.first() {
                    self.mode = ModeFlags::from_bits_retain(bits);
                }
            }
            _ => {}
        }
    }

    /// Read and acknowledge the pending interrupt, if any
    fn fetch_interrupt(&mut self) -> Option<(IntrResult, Vec<u8>)> {
        self.bus.write_register(REG_STATUS, 1);
        let kind = IntrResult::from_flag(self.bus.read_register(REG_REQUEST));
        if kind == IntrResult::NoIntr {
            self.bus.write_register(REG_STATUS, 0);
            return None;
        }

        let mut response = Vec::new();
        while response.len() < RESPONSE_FIFO_SIZE
            && self.bus.read_register(REG_STATUS) & HwStatus::RESPONSE_READY.bits() != 0
        {
            response.push(self.bus.read_register(super::bus::REG_COMMAND));
        }

        self.bus.write_register(REG_STATUS, 1);
        self.bus.write_register(REG_REQUEST, INT_ACK_ALL);
        self.bus.write_register(REG_STATUS, 0);

        log::trace!("CD-ROM: {:?} {:02X?}", kind, response);
        Some((kind, response))
    }

    fn update_status(&mut self, response: &[u8]) {
        if let Some(&byte) = response.first() {
            self.status = StatusFlags::from_bits_retain(byte);
            if self.status.contains(StatusFlags::SHELL_OPEN) && !self.media_changed {
                log::warn!("CD-ROM: lid opened, media change flagged");
                self.media_changed = true;
            }
        }
    }

    /// Consume an acknowledge (INT3) or an error acknowledge (INT5)
    fn acknowledge(&mut self, response: Vec<u8>, error: bool) {
        let command = self.awaiting_ack.pop_front();
        if command.is_none_or(|c| c.reports_status()) || error {
            self.update_status(&response);
        }
        if error {
            if let Some(command) = command {
                log::debug!("CD-ROM: {:?} rejected {:02X?}", command, response);
                // A rejected blocking command never completes
                if self.sync_pending == Some(command) {
                    self.sync_pending = None;
                    self.sync_result = IntrResult::DiskError;
                    self.sync_response = response.clone();
                }
                self.ack_error = Some((command, response));
            }
        } else {
            self.ack_response = response;
        }
    }

    fn finish_sync(&mut self, result: IntrResult, response: &[u8]) {
        self.sync_pending = None;
        self.sync_result = result;
        self.sync_response = response.to_vec();
    }
}

impl<B: CdBus> InterruptContext for DriverCore<B> {
    fn control_f(&mut self, command: Command, param: Option<&Param>) -> Result<()> {
        let packets = command.encode(param)?;
        self.issue(&packets)
    }

    fn command_f(&mut self, command: Command, params: &[u8]) -> Result<()> {
        let packet = raw_packet(command, params)?;
        self.issue(std::slice::from_ref(&packet))
    }

    fn get_sector(&mut self, dst: &mut [u8]) -> Result<()> {
        self.transfer_sector(dst)
    }

    fn get_sector_async(&mut self, words: usize) -> Result<()> {
        self.start_transfer(words)
    }

    fn status(&self) -> StatusFlags {
        self.status
    }

    fn mode(&self) -> ModeFlags {
        self.mode
    }

    fn last_position(&self) -> Position {
        self.last_position
    }
}

fn raw_packet(command: Command, params: &[u8]) -> Result<Packet> {
    if params.is_empty() && command.param_shape().is_required() {
        return Err(CdRomError::ParameterMissing(command));
    }
    Ok(Packet {
        command,
        params: params.to_vec(),
    })
}

#[derive(Default)]
pub(super) struct Callbacks {
    pub(super) sync: Option<Callback>,
    pub(super) ready: Option<Callback>,
    pub(super) auto_pause: Option<Callback>,
    pub(super) read: Option<Callback>,
}

/// CD-ROM controller driver
///
/// # Example
///
/// ```
/// use psrx_cdfs::core::cdrom::{CdDriver, Command};
/// use psrx_cdfs::core::config::DriverConfig;
/// use psrx_cdfs::core::sim::{IsoBuilder, SimDrive};
///
/// let disc = IsoBuilder::new().volume_id("DEMO").build().into_disc();
/// let mut cd = CdDriver::new(SimDrive::with_disc(disc), DriverConfig::default());
/// cd.init()?;
/// cd.control(Command::Nop, None)?;
/// assert!(!cd.status().is_busy());
/// # Ok::<(), psrx_cdfs::core::error::CdRomError>(())
/// ```
pub struct CdDriver<B: CdBus> {
    pub(super) core: DriverCore<B>,
    pub(super) callbacks: Callbacks,
    pub(super) read: ReadRequest,
    /// Track replayed on data end, if looping playback is active
    pub(super) cdda_loop: Option<u8>,
    pub(super) cdda_track: Option<u8>,
}

impl<B: CdBus> CdDriver<B> {
    /// Create a driver over `bus`
    ///
    /// The controller is not touched until [`init`](Self::init) is called.
    pub fn new(bus: B, config: DriverConfig) -> Self {
        Self {
            core: DriverCore::new(bus, config),
            callbacks: Callbacks::default(),
            read: ReadRequest::default(),
            cdda_loop: None,
            cdda_track: None,
        }
    }

    /// Initialize the controller and spin up the drive
    ///
    /// Enables all interrupts, clears anything pending, sets full CD audio
    /// volume and issues Nop, Init and Demute.
    pub fn init(&mut self) -> Result<()> {
        log::info!("CD-ROM: initializing controller");
        self.core.reset_state();
        self.read = ReadRequest::default();

        self.core.bus.write_register(REG_STATUS, 1);
        self.core.bus.write_register(REG_PARAMETER, INT_ACK_ALL);
        self.core
            .bus
            .write_register(REG_REQUEST, INT_ACK_ALL | INT_CLEAR_PARAMS);
        self.core.bus.write_register(REG_STATUS, 0);
        self.core.bus.write_register(REG_REQUEST, 0);

        self.mix(&super::CdVolume::default());

        self.control(Command::Nop, None)?;
        self.control_b(Command::Init, None)?;
        self.control(Command::Demute, None)?;

        self.core.media_changed = true;
        log::info!("CD-ROM: ready, status {:?}", self.core.status);
        Ok(())
    }

    /// Reset the controller
    ///
    /// Any read in progress is abandoned without firing the read callback.
    pub fn reset(&mut self) -> Result<()> {
        log::info!("CD-ROM: reset");
        if self.read.is_active() {
            self.callbacks.ready = self.read.saved_ready.take();
        }
        self.read = ReadRequest::default();
        self.cdda_loop = None;
        self.control(Command::Reset, None)?;
        self.core.reset_state();
        self.core.media_changed = true;
        Ok(())
    }

    /// Issue a command and wait for its acknowledge
    ///
    /// # Returns
    ///
    /// - `Ok(response)` with the acknowledge response bytes
    /// - `Err(CdRomError::ParameterMissing)` before any register is written
    /// - `Err(CdRomError::ControllerBusy)` if a previous command never got acknowledged
    /// - `Err(CdRomError::CommandError)` if the controller rejected the command
    pub fn control(&mut self, command: Command, param: Option<&Param>) -> Result<Vec<u8>> {
        let packets = command.encode(param)?;
        self.issue_and_wait(&packets)
    }

    /// Issue a command without waiting for its acknowledge
    pub fn control_f(&mut self, command: Command, param: Option<&Param>) -> Result<()> {
        self.core.control_f(command, param)
    }

    /// Issue a command, wait for its acknowledge and for its completion
    ///
    /// # Returns
    ///
    /// The complete (second) response for blocking commands, the
    /// acknowledge response otherwise.
    pub fn control_b(&mut self, command: Command, param: Option<&Param>) -> Result<Vec<u8>> {
        let ack = self.control(command, param)?;
        if !command.is_blocking() {
            return Ok(ack);
        }
        match self.sync(SyncMode::Block)? {
            IntrResult::DiskError => Err(self.sync_error(command)),
            _ => Ok(self.core.sync_response.clone()),
        }
    }

    /// Issue a command with raw parameter bytes and wait for its acknowledge
    ///
    /// No implicit SetLoc is sent.
    pub fn command(&mut self, command: Command, params: &[u8]) -> Result<Vec<u8>> {
        let packet = raw_packet(command, params)?;
        self.issue_and_wait(std::slice::from_ref(&packet))
    }

    /// Issue a command with raw parameter bytes without waiting
    pub fn command_f(&mut self, command: Command, params: &[u8]) -> Result<()> {
        self.core.command_f(command, params)
    }

    fn issue_and_wait(&mut self, packets: &[Packet]) -> Result<Vec<u8>> {
        let ack_timeout = self.core.config.ack_timeout;
        for packet in packets {
            self.wait_for("controller ready", ack_timeout, |cd| {
                cd.core.awaiting_ack.is_empty().then_some(())
            })
            .map_err(|_| CdRomError::ControllerBusy)?;

            self.core.ack_error = None;
            self.core.issue(std::slice::from_ref(packet))?;

            self.wait_for("acknowledge", ack_timeout, |cd| {
                cd.core.awaiting_ack.is_empty().then_some(())
            })?;

            if let Some((command, response)) = self.core.ack_error.take() {
                return Err(CdRomError::CommandError {
                    command,
                    status: response.first().copied().unwrap_or(0),
                    code: response.get(1).copied().unwrap_or(0),
                });
            }
        }
        Ok(self.core.ack_response.clone())
    }

    fn sync_error(&self, command: Command) -> CdRomError {
        let response = &self.core.sync_response;
        CdRomError::CommandError {
            command,
            status: response.first().copied().unwrap_or(0),
            code: response.get(1).copied().unwrap_or(0),
        }
    }

    /// Wait for (or query) completion of the last blocking command
    ///
    /// # Returns
    ///
    /// - `IntrResult::Complete` once the command completed
    /// - `IntrResult::DiskError` if it failed
    /// - `IntrResult::NoIntr` if polling and the command is still running
    /// - `Err(CdRomError::Timeout)` if blocking and the budget ran out
    pub fn sync(&mut self, mode: SyncMode) -> Result<IntrResult> {
        match mode {
            SyncMode::Poll => {
                self.service();
                Ok(if self.core.sync_pending.is_some() {
                    IntrResult::NoIntr
                } else {
                    self.core.sync_result
                })
            }
            SyncMode::Block => {
                let budget = self.core.config.sync_timeout;
                self.wait_for("command completion", budget, |cd| {
                    cd.core
                        .sync_pending
                        .is_none()
                        .then_some(cd.core.sync_result)
                })
            }
        }
    }

    /// Response that came with the last complete or error interrupt
    pub fn sync_response(&self) -> &[u8] {
        &self.core.sync_response
    }

    /// Wait until the drive is neither reading, seeking nor playing
    ///
    /// Polls the status with Nop every `idle_poll_interval` cycles.
    pub fn wait_idle(&mut self) -> Result<()> {
        let config = &self.core.config;
        let mut deadline = Deadline::new(config.idle_timeout, config.idle_poll_interval);
        loop {
            self.control(Command::Nop, None)?;
            if !self.core.status.is_busy() {
                return Ok(());
            }
            match deadline.step() {
                Some(cycles) => self.core.bus.wait_cycles(cycles),
                None => {
                    log::warn!(
                        "CD-ROM: drive still busy after {} cycles ({:?})",
                        deadline.elapsed(),
                        self.core.status
                    );
                    return Err(CdRomError::Timeout("drive idle"));
                }
            }
        }
    }

    /// Poll until `check` yields a value, servicing interrupts in between
    pub(crate) fn wait_for<T>(
        &mut self,
        what: &'static str,
        budget: u64,
        mut check: impl FnMut(&mut Self) -> Option<T>,
    ) -> Result<T> {
        let mut deadline = Deadline::new(budget, self.core.config.poll_step);
        loop {
            self.service();
            if let Some(value) = check(self) {
                return Ok(value);
            }
            match deadline.step() {
                Some(cycles) => self.core.bus.wait_cycles(cycles),
                None => {
                    log::warn!(
                        "CD-ROM: timed out waiting for {} after {} cycles",
                        what,
                        deadline.elapsed()
                    );
                    return Err(CdRomError::Timeout(what));
                }
            }
        }
    }

    /// Handle every pending interrupt
    pub fn service(&mut self) {
        for _ in 0..MAX_IRQS_PER_SERVICE {
            if self.handle_interrupt() == IntrResult::NoIntr {
                break;
            }
        }
    }

    /// Handle one pending interrupt
    ///
    /// # Returns
    ///
    /// The interrupt cause, or `IntrResult::NoIntr` if nothing was pending
    pub fn handle_interrupt(&mut self) -> IntrResult {
        let Some((kind, response)) = self.core.fetch_interrupt() else {
            return IntrResult::NoIntr;
        };

        match kind {
            IntrResult::Acknowledge => self.core.acknowledge(response, false),
            IntrResult::DiskError if !self.core.awaiting_ack.is_empty() => {
                self.core.acknowledge(response, true)
            }
            IntrResult::Complete => {
                self.core.update_status(&response);
                self.core.finish_sync(kind, &response);
                invoke(&mut self.callbacks.sync, &mut self.core, kind, &response);
            }
            IntrResult::DataReady => {
                self.core.update_status(&response);
                if self.read.is_active() {
                    self.read_data_ready(&response);
                } else {
                    invoke(&mut self.callbacks.ready, &mut self.core, kind, &response);
                }
            }
            IntrResult::DataEnd if self.read.is_active() => {
                self.core.update_status(&response);
                log::warn!("CD-ROM: end of disc reached while reading");
                self.read_failed(&response);
            }
            IntrResult::DataEnd => {
                self.core.update_status(&response);
                if let Some(track) = self.cdda_loop {
                    log::debug!("CD-ROM: looping track {}", track);
                    if let Err(e) = self.core.control_f(Command::Play, Some(&Param::Track(track))) {
                        log::warn!("CD-ROM: failed to restart track {}: {}", track, e);
                    }
                }
                invoke(&mut self.callbacks.auto_pause, &mut self.core, kind, &response);
            }
            IntrResult::DiskError => {
                self.core.update_status(&response);
                if self.read.is_active() {
                    self.read_failed(&response);
                } else if self.core.sync_pending.is_some() {
                    self.core.finish_sync(kind, &response);
                    invoke(&mut self.callbacks.sync, &mut self.core, kind, &response);
                } else {
                    invoke(&mut self.callbacks.ready, &mut self.core, kind, &response);
                }
            }
            IntrResult::NoIntr => {}
        }
        kind
    }

    /// Replace the sync callback, returning the previous one
    pub fn set_sync_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        mem::replace(&mut self.callbacks.sync, callback)
    }

    /// Replace the data ready callback, returning the previous one
    ///
    /// While a read is in progress the callback is suspended; the value set
    /// here becomes active once the read ends.
    pub fn set_ready_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        if self.read.is_active() {
            mem::replace(&mut self.read.saved_ready, callback)
        } else {
            mem::replace(&mut self.callbacks.ready, callback)
        }
    }

    /// Replace the auto pause (data end) callback, returning the previous one
    pub fn set_auto_pause_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        mem::replace(&mut self.callbacks.auto_pause, callback)
    }

    /// Replace the read completion callback, returning the previous one
    pub fn set_read_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        mem::replace(&mut self.callbacks.read, callback)
    }

    /// Last status byte reported by the drive
    pub fn status(&self) -> StatusFlags {
        self.core.status
    }

    /// Last command issued
    pub fn last_command(&self) -> Option<Command> {
        self.core.last_command
    }

    /// Location last set with SetLoc
    pub fn last_position(&self) -> Position {
        self.core.last_position
    }

    /// Mode last set with SetMode
    pub fn mode(&self) -> ModeFlags {
        self.core.mode
    }

    /// True if the lid was opened (or the driver initialized) since the
    /// last call to [`acknowledge_media_change`](Self::acknowledge_media_change)
    pub fn media_changed(&self) -> bool {
        self.core.media_changed
    }

    /// Clear the media change flag
    pub fn acknowledge_media_change(&mut self) {
        self.core.media_changed = false;
    }

    /// Driver configuration
    pub fn config(&self) -> &DriverConfig {
        &self.core.config
    }

    /// Access the underlying bus
    pub fn bus(&self) -> &B {
        &self.core.bus
    }

    /// Mutable access to the underlying bus
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.core.bus
    }
}

pub(super) fn invoke<B: CdBus>(
    slot: &mut Option<Callback>,
    core: &mut DriverCore<B>,
    kind: IntrResult,
    response: &[u8],
) {
    if let Some(callback) = slot.as_mut() {
        let ctx: &mut dyn InterruptContext = core;
        callback(ctx, kind, response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sim::{IsoBuilder, SimDrive};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn drive() -> SimDrive {
        let disc = IsoBuilder::new()
            .volume_id("TEST")
            .file("README.TXT", b"hello".to_vec())
            .build()
            .into_disc();
        SimDrive::with_disc(disc)
    }

    fn driver_with(config: DriverConfig) -> CdDriver<SimDrive> {
        let mut cd = CdDriver::new(drive(), config);
        cd.init().unwrap();
        cd
    }

    fn driver() -> CdDriver<SimDrive> {
        driver_with(DriverConfig::default())
    }

    #[test]
    fn test_init_spins_up_drive() {
        let cd = driver();
        assert!(cd.status().contains(StatusFlags::STANDBY));
        assert_eq!(cd.last_command(), Some(Command::Demute));
        assert!(cd.media_changed());
    }

    #[test]
    fn test_missing_parameter_touches_no_register() {
        let mut cd = driver();
        let writes = cd.bus().register_writes();

        let result = cd.control(Command::SetLoc, None);
        assert!(matches!(result, Err(CdRomError::ParameterMissing(Command::SetLoc))));
        assert_eq!(cd.bus().register_writes(), writes);

        let result = cd.command(Command::SetMode, &[]);
        assert!(matches!(result, Err(CdRomError::ParameterMissing(Command::SetMode))));
        assert_eq!(cd.bus().register_writes(), writes);
    }

    #[test]
    fn test_setloc_and_setmode_are_mirrored() {
        let mut cd = driver();
        cd.control(Command::SetLoc, Some(&Param::Loc(Position::from_lba(1234))))
            .unwrap();
        cd.control(Command::SetMode, Some(&Param::Mode(ModeFlags::SPEED)))
            .unwrap();
        assert_eq!(cd.last_position().to_lba(), 1234);
        assert_eq!(cd.mode(), ModeFlags::SPEED);
        assert_eq!(cd.last_command(), Some(Command::SetMode));
    }

    #[test]
    fn test_control_f_two_deep_limit() {
        let mut cd = driver();
        cd.control_f(Command::Nop, None).unwrap();
        cd.control_f(Command::Nop, None).unwrap();
        assert!(matches!(
            cd.control_f(Command::Nop, None),
            Err(CdRomError::ControllerBusy)
        ));

        // Blocking control waits for both acknowledges before issuing
        cd.control(Command::Nop, None).unwrap();
    }

    #[test]
    fn test_location_parameter_expands_to_setloc() {
        let mut cd = driver();
        assert!(matches!(
            cd.control_f(Command::SeekL, Some(&Param::Loc(Position::from_lba(20)))),
            Ok(())
        ));
        // SetLoc + SeekL fill both slots
        assert!(matches!(
            cd.control_f(Command::Nop, None),
            Err(CdRomError::ControllerBusy)
        ));
        assert_eq!(cd.sync(SyncMode::Block).unwrap(), IntrResult::Complete);
        assert_eq!(cd.last_position().to_lba(), 20);
    }

    #[test]
    fn test_sync_poll_then_block() {
        let mut cd = driver();
        cd.control(Command::SeekL, Some(&Param::Loc(Position::from_lba(18))))
            .unwrap();
        assert_eq!(cd.sync(SyncMode::Poll).unwrap(), IntrResult::NoIntr);
        assert_eq!(cd.sync(SyncMode::Block).unwrap(), IntrResult::Complete);
        assert_eq!(cd.sync(SyncMode::Poll).unwrap(), IntrResult::Complete);
    }

    #[test]
    fn test_rejected_command_reports_error() {
        let mut cd = driver();
        let result = cd.command(Command::Test, &[0x7F]);
        match result {
            Err(CdRomError::CommandError { command, status, .. }) => {
                assert_eq!(command, Command::Test);
                assert_ne!(status & StatusFlags::ERROR.bits(), 0);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_sync_callback_fires_on_complete() {
        let mut cd = driver();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let previous = cd.set_sync_callback(Some(Box::new(move |_, result, _| {
            log.borrow_mut().push(result);
        })));
        assert!(previous.is_none());

        cd.control_b(Command::Pause, None).unwrap();
        assert_eq!(*seen.borrow(), vec![IntrResult::Complete]);

        let previous = cd.set_sync_callback(None);
        assert!(previous.is_some());
    }

    #[test]
    fn test_callback_can_issue_non_blocking_commands() {
        let mut cd = driver();
        cd.set_sync_callback(Some(Box::new(|ctx, result, _| {
            if result == IntrResult::Complete {
                ctx.control_f(Command::Nop, None).unwrap();
            }
        })));
        cd.control_b(Command::Standby, None).unwrap();
        assert_eq!(cd.last_command(), Some(Command::Nop));
        cd.control(Command::Nop, None).unwrap();
    }

    #[test]
    fn test_lid_open_sets_media_changed() {
        let mut cd = driver();
        cd.acknowledge_media_change();
        cd.bus_mut().open_lid();
        cd.control(Command::Nop, None).unwrap();
        assert!(cd.status().contains(StatusFlags::SHELL_OPEN));
        assert!(cd.media_changed());
    }

    #[test]
    fn test_wait_idle_after_pause() {
        let mut cd = driver();
        cd.control(Command::ReadN, Some(&Param::Loc(Position::from_lba(16))))
            .unwrap();
        cd.control_f(Command::Pause, None).unwrap();
        cd.wait_idle().unwrap();
        assert!(!cd.status().is_busy());
    }

    #[test]
    fn test_wait_idle_times_out_while_reading() {
        let mut cd = driver_with(DriverConfig {
            idle_timeout: 1_000,
            ..DriverConfig::default()
        });
        cd.control(Command::ReadN, Some(&Param::Loc(Position::from_lba(16))))
            .unwrap();

        assert!(matches!(
            cd.wait_idle(),
            Err(CdRomError::Timeout("drive idle"))
        ));
        assert!(cd.status().contains(StatusFlags::READ));
    }

    #[test]
    fn test_blocking_control_busy_after_ack_timeout() {
        let mut cd = CdDriver::new(
            drive(),
            DriverConfig {
                ack_timeout: 100,
                ..DriverConfig::default()
            },
        );
        cd.control_f(Command::Nop, None).unwrap();

        // The acknowledge takes thousands of cycles, far past the budget
        assert!(matches!(
            cd.control(Command::Nop, None),
            Err(CdRomError::ControllerBusy)
        ));
    }
}
