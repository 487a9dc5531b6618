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

//! Path normalization
//!
//! Accepted forms: `cdrom:\DATA\FILE.BIN;1`, `\data\file.bin`,
//! `/DATA/FILE.BIN`, `DATA/FILE.BIN`. Normalized paths are upper case with
//! `\` separators and a leading `\`; the root is `\`.

use crate::core::error::{CdRomError, Result};

const DEVICE_PREFIX: &str = "cdrom:";

/// Split a path into its upper-cased, non-empty components
fn components(path: &str) -> Vec<String> {
    let path = match path.get(..DEVICE_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(DEVICE_PREFIX) => &path[DEVICE_PREFIX.len()..],
        _ => path,
    };
    path.split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .map(str::to_ascii_uppercase)
        .collect()
}

fn join(components: &[String]) -> String {
    if components.is_empty() {
        return "\\".to_string();
    }
    components.iter().fold(String::new(), |mut path, c| {
        path.push('\\');
        path.push_str(c);
        path
    })
}

/// Normalize a directory path
///
/// # Example
///
/// ```
/// use psrx_cdfs::core::iso::normalize_dir;
///
/// assert_eq!(normalize_dir("cdrom:/data/levels/"), "\\DATA\\LEVELS");
/// assert_eq!(normalize_dir(""), "\\");
/// ```
pub fn normalize_dir(path: &str) -> String {
    join(&components(path))
}

/// Split a file path into its normalized directory and file name
///
/// `;1` is appended to the name if it carries no version.
///
/// # Returns
///
/// - `Ok((dir, name))`
/// - `Err(CdRomError::NotFound)` if the path names no file
pub fn split_file_path(path: &str) -> Result<(String, String)> {
    let mut parts = components(path);
    let mut name = parts
        .pop()
        .ok_or_else(|| CdRomError::NotFound(path.to_string()))?;
    if !name.contains(';') {
        name.push_str(";1");
    }
    Ok((join(&parts), name))
}
