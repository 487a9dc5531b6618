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

//! Command table and parameter encoding
//!
//! Each controller command has a fixed opcode, a parameter shape and a
//! blocking flag. [`Command::encode`] turns a typed [`Param`] into the byte
//! packets written to the controller, validating the parameter before any
//! register is touched.

use super::{dec_to_bcd, ModeFlags, Position};
use crate::core::error::{CdRomError, Result};

/// CD-ROM controller command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Nop = 0x01,
    SetLoc = 0x02,
    Play = 0x03,
    Forward = 0x04,
    Backward = 0x05,
    ReadN = 0x06,
    Standby = 0x07,
    Stop = 0x08,
    Pause = 0x09,
    Init = 0x0A,
    Mute = 0x0B,
    Demute = 0x0C,
    SetFilter = 0x0D,
    SetMode = 0x0E,
    GetParam = 0x0F,
    GetLocL = 0x10,
    GetLocP = 0x11,
    SetSession = 0x12,
    GetTN = 0x13,
    GetTD = 0x14,
    SeekL = 0x15,
    SeekP = 0x16,
    Test = 0x19,
    GetID = 0x1A,
    ReadS = 0x1B,
    Reset = 0x1C,
    GetQ = 0x1D,
    ReadTOC = 0x1E,
}

/// Parameter shape accepted by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
    /// No parameter
    None,
    /// Required location
    Location,
    /// Optional location, sent as a separate SetLoc before the command
    OptionalLocation,
    /// Optional track number
    OptionalTrack,
    /// Required track number
    Track,
    /// Required mode byte
    Mode,
    /// Required file and channel filter
    Filter,
    /// Required session number
    Session,
    /// Required raw bytes (sub-function and arguments)
    Raw,
}

impl ParamShape {
    /// True if the command cannot be issued without a parameter
    pub fn is_required(self) -> bool {
        !matches!(
            self,
            ParamShape::None | ParamShape::OptionalLocation | ParamShape::OptionalTrack
        )
    }
}

/// Typed command parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// Disc location
    Loc(Position),
    /// Drive mode
    Mode(ModeFlags),
    /// XA filter
    Filter {
        /// File number
        file: u8,
        /// Channel number
        channel: u8,
    },
    /// Track number (decimal)
    Track(u8),
    /// Session number (1-based)
    Session(u8),
    /// Raw parameter bytes
    Bytes(Vec<u8>),
}

/// One command with its encoded parameter bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command to write to the command register
    pub command: Command,
    /// Bytes to push into the parameter FIFO first
    pub params: Vec<u8>,
}

impl Command {
    /// Decode an opcode
    pub fn from_u8(code: u8) -> Option<Self> {
        use Command::*;
        Some(match code {
            0x01 => Nop,
            0x02 => SetLoc,
            0x03 => Play,
            0x04 => Forward,
            0x05 => Backward,
            0x06 => ReadN,
            0x07 => Standby,
            0x08 => Stop,
            0x09 => Pause,
            0x0A => Init,
            0x0B => Mute,
            0x0C => Demute,
            0x0D => SetFilter,
            0x0E => SetMode,
            0x0F => GetParam,
            0x10 => GetLocL,
            0x11 => GetLocP,
            0x12 => SetSession,
            0x13 => GetTN,
            0x14 => GetTD,
            0x15 => SeekL,
            0x16 => SeekP,
            0x19 => Test,
            0x1A => GetID,
            0x1B => ReadS,
            0x1C => Reset,
            0x1D => GetQ,
            0x1E => ReadTOC,
            _ => return None,
        })
    }

    /// Opcode written to the command register
    pub fn code(self) -> u8 {
        self as u8
    }

    /// True if the command delivers a second (complete or error) response
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            Command::Standby
                | Command::Stop
                | Command::Pause
                | Command::Init
                | Command::SetSession
                | Command::SeekL
                | Command::SeekP
                | Command::GetID
                | Command::GetQ
                | Command::ReadTOC
        )
    }

    /// True if the first response byte is the drive status
    pub fn reports_status(self) -> bool {
        !matches!(self, Command::GetLocL | Command::GetLocP | Command::Test)
    }

    /// Parameter shape of this command
    pub fn param_shape(self) -> ParamShape {
        use Command::*;
        match self {
            SetLoc => ParamShape::Location,
            ReadN | ReadS | SeekL | SeekP => ParamShape::OptionalLocation,
            Play => ParamShape::OptionalTrack,
            GetTD => ParamShape::Track,
            SetMode => ParamShape::Mode,
            SetFilter => ParamShape::Filter,
            SetSession => ParamShape::Session,
            Test | GetQ => ParamShape::Raw,
            _ => ParamShape::None,
        }
    }

    /// Encode this command and its parameter into controller packets
    ///
    /// Commands taking an optional location expand to a SetLoc packet
    /// followed by the command itself.
    ///
    /// # Returns
    ///
    /// - `Ok(packets)` in issue order
    /// - `Err(CdRomError::ParameterMissing)` if a required parameter is absent
    /// - `Err(CdRomError::InvalidParameter)` if the parameter has the wrong kind
    ///
    /// # Example
    ///
    /// ```
    /// use psrx_cdfs::core::cdrom::{Command, Param, Position};
    ///
    /// let packets = Command::ReadN
    ///     .encode(Some(&Param::Loc(Position::from_lba(16))))
    ///     .unwrap();
    /// assert_eq!(packets.len(), 2);
    /// assert_eq!(packets[0].command, Command::SetLoc);
    /// assert_eq!(packets[0].params, vec![0x00, 0x02, 0x16]);
    /// ```
    pub fn encode(self, param: Option<&Param>) -> Result<Vec<Packet>> {
        let shape = self.param_shape();
        let single = |params: Vec<u8>| {
            Ok(vec![Packet {
                command: self,
                params,
            }])
        };

        match (shape, param) {
            (shape, None) if shape.is_required() => Err(CdRomError::ParameterMissing(self)),
            (_, None) => single(Vec::new()),
            (ParamShape::Location, Some(Param::Loc(pos))) => single(pos.to_bcd().to_vec()),
            (ParamShape::OptionalLocation, Some(Param::Loc(pos))) => Ok(vec![
                Packet {
                    command: Command::SetLoc,
                    params: pos.to_bcd().to_vec(),
                },
                Packet {
                    command: self,
                    params: Vec::new(),
                },
            ]),
            (ParamShape::OptionalTrack | ParamShape::Track, Some(Param::Track(track))) => {
                single(vec![dec_to_bcd(*track)])
            }
            (ParamShape::Mode, Some(Param::Mode(mode))) => single(vec![mode.bits()]),
            (ParamShape::Filter, Some(Param::Filter { file, channel })) => {
                single(vec![*file, *channel])
            }
            (ParamShape::Session, Some(Param::Session(session))) => single(vec![*session]),
            (ParamShape::Raw, Some(Param::Bytes(bytes))) if !bytes.is_empty() => {
                single(bytes.clone())
            }
            (ParamShape::Raw, Some(Param::Bytes(_))) => Err(CdRomError::ParameterMissing(self)),
            _ => Err(CdRomError::InvalidParameter(self)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for code in 0u8..=0x1F {
            if let Some(cmd) = Command::from_u8(code) {
                assert_eq!(cmd.code(), code);
            }
        }
        assert_eq!(Command::from_u8(0x17), None);
        assert_eq!(Command::from_u8(0x00), None);
    }

    #[test]
    fn test_blocking_commands() {
        let blocking: Vec<Command> = (0u8..=0x1F)
            .filter_map(Command::from_u8)
            .filter(|c| c.is_blocking())
            .collect();
        assert_eq!(
            blocking,
            vec![
                Command::Standby,
                Command::Stop,
                Command::Pause,
                Command::Init,
                Command::SetSession,
                Command::SeekL,
                Command::SeekP,
                Command::GetID,
                Command::GetQ,
                Command::ReadTOC,
            ]
        );
    }

    #[test]
    fn test_missing_required_parameter() {
        for cmd in [
            Command::SetLoc,
            Command::SetMode,
            Command::SetFilter,
            Command::SetSession,
            Command::GetTD,
            Command::Test,
        ] {
            assert!(matches!(
                cmd.encode(None),
                Err(CdRomError::ParameterMissing(c)) if c == cmd
            ));
        }
    }

    #[test]
    fn test_optional_parameters() {
        assert_eq!(Command::ReadN.encode(None).unwrap().len(), 1);
        assert_eq!(Command::Play.encode(None).unwrap()[0].params, Vec::<u8>::new());
        assert_eq!(
            Command::Play.encode(Some(&Param::Track(12))).unwrap()[0].params,
            vec![0x12]
        );
    }

    #[test]
    fn test_wrong_parameter_kind() {
        let result = Command::SetLoc.encode(Some(&Param::Mode(ModeFlags::SPEED)));
        assert!(matches!(result, Err(CdRomError::InvalidParameter(Command::SetLoc))));

        let result = Command::Nop.encode(Some(&Param::Track(1)));
        assert!(matches!(result, Err(CdRomError::InvalidParameter(Command::Nop))));
    }

    #[test]
    fn test_encode_mode_and_filter() {
        let packets = Command::SetMode
            .encode(Some(&Param::Mode(ModeFlags::SPEED | ModeFlags::SIZE_2340)))
            .unwrap();
        assert_eq!(packets[0].params, vec![0xA0]);

        let packets = Command::SetFilter
            .encode(Some(&Param::Filter { file: 1, channel: 3 }))
            .unwrap();
        assert_eq!(packets[0].params, vec![1, 3]);
    }

    #[test]
    fn test_empty_raw_parameter_is_missing() {
        let result = Command::Test.encode(Some(&Param::Bytes(Vec::new())));
        assert!(matches!(result, Err(CdRomError::ParameterMissing(Command::Test))));
    }
}
