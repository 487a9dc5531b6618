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

//! psrx-cdfs: PlayStation CD-ROM access layer
//!
//! A driver for the PlayStation CD-ROM controller and a read-only ISO9660
//! file system on top of it, with multi-session support. The driver talks
//! to hardware through the [`core::cdrom::CdBus`] trait; [`core::sim`]
//! provides a simulated drive backed by disc images.
//!
//! # Architecture
//!
//! - [`core::cdrom`]: Command/interrupt dispatcher, sector transfers, retrying reader
//! - [`core::iso`]: Volume descriptor and path table cache, path resolution, sessions
//! - [`core::sim`]: Simulated controller, disc images and an ISO9660 image builder
//! - [`core::config`]: Driver timeouts and retry budget
//!
//! # Example
//!
//! ```
//! use psrx_cdfs::core::cdrom::CdDriver;
//! use psrx_cdfs::core::config::DriverConfig;
//! use psrx_cdfs::core::iso::IsoFs;
//! use psrx_cdfs::core::sim::{IsoBuilder, SimDrive};
//!
//! let disc = IsoBuilder::new().file("MAIN.EXE", vec![0; 4096]).build().into_disc();
//! let mut cd = CdDriver::new(SimDrive::with_disc(disc), DriverConfig::default());
//! cd.init()?;
//!
//! let mut fs = IsoFs::new(cd);
//! let file = fs.search_file("cdrom:\\MAIN.EXE;1")?;
//! println!("{} at {}, {} bytes", file.name, file.pos, file.size);
//! # Ok::<(), psrx_cdfs::CdRomError>(())
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`core::error::Result<T>`] which is an alias for
//! `Result<T, CdRomError>`.

pub mod core;

// Re-export commonly used types
pub use core::error::{CdRomError, Result};
