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

//! Region query and drive unlock
//!
//! Retail drives refuse to read discs without a valid license string. On
//! non-Japanese drives the check can be turned off with a sequence of
//! undocumented Test sub-functions (0x50 to 0x57) carrying the license text;
//! every step is answered with an error interrupt even when accepted.

use serde::Serialize;

use super::commands::Command;
use super::driver::CdDriver;
use super::CdBus;
use crate::core::error::{CdRomError, Result};

/// Test sub-function returning the drive region string
const TEST_GET_REGION: u8 = 0x22;

/// Error code the controller uses to answer unlock steps
const UNLOCK_ACCEPTED: u8 = 0x40;

/// Drive region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Region {
    /// Region string not recognized
    Unknown,
    /// Japanese retail drive (cannot be unlocked)
    Japan,
    /// North American retail drive
    America,
    /// European retail drive
    Europe,
    /// Later drives answering "for US/AEP"
    Worldwide,
    /// Development unit, reads any disc
    Debug,
}

impl Region {
    /// Region part of the unlock sequence, if the region can be unlocked
    fn unlock_string(self) -> Option<&'static [u8]> {
        match self {
            Region::America => Some(b"of America"),
            Region::Europe => Some(b"(Europe)"),
            Region::Worldwide => Some(b"World wide"),
            _ => None,
        }
    }

    fn from_response(response: &[u8]) -> Self {
        match response {
            b"for Japan" => Region::Japan,
            b"for U/C" => Region::America,
            b"for Europe" => Region::Europe,
            b"for US/AEP" => Region::Worldwide,
            _ if response.starts_with(b"for NET") => Region::Debug,
            _ => Region::Unknown,
        }
    }
}

impl<B: CdBus> CdDriver<B> {
    /// Query the drive region
    ///
    /// Development units reject the query and are reported as
    /// [`Region::Debug`].
    pub fn get_region(&mut self) -> Result<Region> {
        match self.command(Command::Test, &[TEST_GET_REGION]) {
            Ok(response) => {
                let region = Region::from_response(&response);
                log::debug!(
                    "CD-ROM: region string {:?} -> {:?}",
                    String::from_utf8_lossy(&response),
                    region
                );
                Ok(region)
            }
            Err(CdRomError::CommandError { .. }) => Ok(Region::Debug),
            Err(e) => Err(e),
        }
    }

    /// Disable the license check of the drive
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if the drive accepted the whole sequence (always for debug units)
    /// - `Ok(false)` if the region cannot be unlocked or a step was refused
    pub fn unlock(&mut self, region: Region) -> Result<bool> {
        if region == Region::Debug {
            return Ok(true);
        }
        let Some(region_string) = region.unlock_string() else {
            log::debug!("CD-ROM: region {:?} cannot be unlocked", region);
            return Ok(false);
        };

        let steps: [&[u8]; 8] = [
            b"",
            b"Licensed by",
            b"Sony",
            b"Computer",
            b"Entertainment",
            region_string,
            b"",
            b"",
        ];

        for (sub, text) in (0x50u8..).zip(steps) {
            let mut params = Vec::with_capacity(text.len() + 1);
            params.push(sub);
            params.extend_from_slice(text);

            match self.command(Command::Test, &params) {
                Ok(_) => {}
                Err(CdRomError::CommandError { code, .. }) if code == UNLOCK_ACCEPTED => {}
                Err(CdRomError::CommandError { code, .. }) => {
                    log::warn!("CD-ROM: unlock step 0x{:02X} refused (0x{:02X})", sub, code);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }

        log::info!("CD-ROM: drive unlocked for {:?}", region);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DriverConfig;
    use crate::core::sim::{IsoBuilder, SimDrive};

    fn driver(region: Region) -> CdDriver<SimDrive> {
        let disc = IsoBuilder::new().build().into_disc();
        let mut drive = SimDrive::with_disc(disc);
        drive.set_region(region);
        let mut cd = CdDriver::new(drive, DriverConfig::default());
        cd.init().unwrap();
        cd
    }

    #[test]
    fn test_get_region() {
        for region in [Region::Japan, Region::America, Region::Europe, Region::Debug] {
            let mut cd = driver(region);
            assert_eq!(cd.get_region().unwrap(), region);
        }
    }

    #[test]
    fn test_unlock_retail_drive() {
        let mut cd = driver(Region::Europe);
        assert!(!cd.bus().is_unlocked());
        assert!(cd.unlock(Region::Europe).unwrap());
        assert!(cd.bus().is_unlocked());
    }

    #[test]
    fn test_unlock_wrong_region_string() {
        let mut cd = driver(Region::Europe);
        cd.unlock(Region::America).unwrap();
        assert!(!cd.bus().is_unlocked());
    }

    #[test]
    fn test_japan_cannot_be_unlocked() {
        let mut cd = driver(Region::Japan);
        assert!(!cd.unlock(Region::Japan).unwrap());
        assert!(cd.unlock(Region::Debug).unwrap());
    }

    #[test]
    fn test_region_strings() {
        assert_eq!(Region::from_response(b"for U/C"), Region::America);
        assert_eq!(Region::from_response(b"for NETEU"), Region::Debug);
        assert_eq!(Region::from_response(b"???"), Region::Unknown);
    }
}
