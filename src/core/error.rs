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

//! Error types for the CD-ROM driver and file system layer
//!
//! Every fallible operation in the crate returns [`Result<T>`], an alias for
//! `Result<T, CdRomError>`. The ISO9660 layer additionally keeps a coarse
//! [`IsoError`] code describing the outcome of its most recent operation.

use thiserror::Error;

use crate::core::cdrom::Command;

/// CD-ROM driver and file system errors
#[derive(Error, Debug)]
pub enum CdRomError {
    /// A command that takes a parameter was issued without one
    #[error("Command {0:?} requires a parameter")]
    ParameterMissing(Command),

    /// A parameter of the wrong kind was passed to a command
    #[error("Invalid parameter for command {0:?}")]
    InvalidParameter(Command),

    /// The controller still has unacknowledged commands in flight
    #[error("CD-ROM controller busy")]
    ControllerBusy,

    /// The controller answered a command with an error interrupt
    #[error("Command {command:?} rejected (status 0x{status:02X}, code 0x{code:02X})")]
    CommandError {
        /// Command that was rejected
        command: Command,
        /// Status byte reported with the error
        status: u8,
        /// Error code byte (0 when the controller sent none)
        code: u8,
    },

    /// Positioning the read head failed
    #[error("Seek failed")]
    SeekError,

    /// A sector read failed after exhausting its retry budget
    #[error("Read failed after {attempts} attempt(s)")]
    ReadError {
        /// Number of attempts made
        attempts: u32,
    },

    /// The data FIFO held less than a whole sector
    #[error("Short sector transfer ({copied} of {expected} bytes)")]
    ShortTransfer {
        /// Bytes requested
        expected: usize,
        /// Bytes actually copied
        copied: usize,
    },

    /// The read was cancelled with a read break
    #[error("Read aborted")]
    Aborted,

    /// The drive lid is open
    #[error("Drive lid is open")]
    LidOpen,

    /// The disc has no valid ISO9660 volume descriptor
    #[error("No ISO9660 file system found")]
    InvalidFilesystem,

    /// A path did not resolve to a file or directory
    #[error("Not found: {0}")]
    NotFound(String),

    /// The controller did not answer within the configured budget
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// No disc is loaded in the drive
    #[error("No disc loaded")]
    NoDisc,

    /// Disc image loading failed
    #[error("Disc load error: {0}")]
    DiscLoadError(String),

    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for CD-ROM operations
pub type Result<T> = std::result::Result<T, CdRomError>;

/// Outcome code of the most recent file system operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum IsoError {
    /// The last operation succeeded
    #[default]
    Okay,
    /// Seeking to a file system structure failed
    SeekError,
    /// Reading a file system structure failed
    ReadError,
    /// The disc has no ISO9660 file system
    InvalidFs,
    /// The lid was open when the file system was accessed
    LidOpen,
    /// The requested path does not exist
    NotFound,
}

/// Collapse a driver error into one of the file system outcome codes
///
/// There is no code for timeouts, busy controllers, aborted reads or short
/// transfers; all of them are reported as [`IsoError::ReadError`], as is
/// any other I/O level failure.
impl From<&CdRomError> for IsoError {
    fn from(err: &CdRomError) -> Self {
        match err {
            CdRomError::SeekError => IsoError::SeekError,
            CdRomError::LidOpen => IsoError::LidOpen,
            CdRomError::InvalidFilesystem => IsoError::InvalidFs,
            CdRomError::NotFound(_) => IsoError::NotFound,
            _ => IsoError::ReadError,
        }
    }
}
