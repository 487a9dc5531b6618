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

//! ISO9660 image builder
//!
//! Produces small, well-formed ISO9660 images for tests, benches and the
//! inspector's demo mode: a primary volume descriptor, a terminator, a
//! type-L path table, directory extents (spanning several sectors when
//! needed) and file data.
//!
//! ```text
//! LBA  16      PVD
//!      17      terminator
//!      18..    path table
//!      ..      directories, in path table order
//!      ..      files
//! ```

use std::collections::HashMap;

use chrono::{Datelike, NaiveDateTime, Timelike};

use super::DiscImage;
use crate::core::cdrom::SECTOR_SIZE;

const PVD_LBA: u32 = 16;
const PATH_TABLE_LBA: u32 = 18;

/// Recording date stamped on every directory record (1999-12-31 23:59:00)
const DEFAULT_RECORDED: [u8; 7] = [99, 12, 31, 23, 59, 0, 0];

/// Builder for ISO9660 images
///
/// Paths use `/` separators and are stored upper-case; parent directories
/// are created implicitly.
///
/// # Example
///
/// ```
/// use psrx_cdfs::core::sim::IsoBuilder;
///
/// let iso = IsoBuilder::new()
///     .volume_id("GAME")
///     .file("DATA/LEVEL1.BIN", vec![1; 5000])
///     .build();
/// assert_eq!(iso.file_size("DATA/LEVEL1.BIN"), Some(5000));
/// ```
#[derive(Debug, Clone, Default)]
pub struct IsoBuilder {
    volume_id: String,
    base_lba: u32,
    dirs: Vec<String>,
    files: Vec<(String, Vec<u8>)>,
    recorded: Option<[u8; 7]>,
}

/// A built image and the addresses assigned to its contents
#[derive(Debug, Clone)]
pub struct BuiltIso {
    data: Vec<u8>,
    base_lba: u32,
    files: HashMap<String, (u32, u32)>,
    dirs: HashMap<String, u32>,
}

struct DirNode {
    path: String,
    name: String,
    parent: usize,
    subdirs: Vec<usize>,
    files: Vec<usize>,
    lba: u32,
    size: u32,
}

enum EntryTarget {
    Current,
    Parent,
    Dir(usize),
    File(usize),
}

struct Entry {
    name: Vec<u8>,
    target: EntryTarget,
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_ascii_uppercase()
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn record_len(name_len: usize) -> usize {
    33 + name_len + (name_len + 1) % 2
}

/// Offsets of each record within the extent, and the extent size
fn layout(entries: &[Entry]) -> (Vec<usize>, u32) {
    let mut offsets = Vec::with_capacity(entries.len());
    let mut pos = 0;
    for entry in entries {
        let len = record_len(entry.name.len());
        if pos % SECTOR_SIZE + len > SECTOR_SIZE {
            pos = pos.next_multiple_of(SECTOR_SIZE);
        }
        offsets.push(pos);
        pos += len;
    }
    let size = pos.next_multiple_of(SECTOR_SIZE).max(SECTOR_SIZE);
    (offsets, size as u32)
}

fn put_both_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    buf[offset + 2..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_both_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    buf[offset + 4..offset + 8].copy_from_slice(&value.to_be_bytes());
}

fn put_padded(buf: &mut [u8], offset: usize, len: usize, text: &str) {
    let field = &mut buf[offset..offset + len];
    field.fill(b' ');
    let bytes = text.as_bytes();
    let n = bytes.len().min(len);
    field[..n].copy_from_slice(&bytes[..n]);
}

fn write_record(buf: &mut [u8], lba: u32, size: u32, is_dir: bool, name: &[u8], date: &[u8; 7]) {
    let len = record_len(name.len());
    buf[0] = len as u8;
    buf[1] = 0;
    put_both_u32(buf, 2, lba);
    put_both_u32(buf, 10, size);
    buf[18..25].copy_from_slice(date);
    buf[25] = if is_dir { 0x02 } else { 0x00 };
    put_both_u16(buf, 28, 1);
    buf[32] = name.len() as u8;
    buf[33..33 + name.len()].copy_from_slice(name);
}

impl IsoBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            volume_id: "CDROM".to_string(),
            ..Self::default()
        }
    }

    /// Set the volume identifier (32 characters at most)
    pub fn volume_id(mut self, id: &str) -> Self {
        self.volume_id = id.to_string();
        self
    }

    /// Place the image at `lba`, as the later session of a multi-session disc
    ///
    /// All recorded addresses become absolute.
    pub fn base_lba(mut self, lba: u32) -> Self {
        self.base_lba = lba;
        self
    }

    /// Add an (empty) directory
    pub fn dir(mut self, path: &str) -> Self {
        self.dirs.push(normalize(path));
        self
    }

    /// Add a file; `;1` is appended to its name on disc
    pub fn file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.push((normalize(path), data));
        self
    }

    /// Set the recording date stamped on directory records
    pub fn recorded(mut self, date: NaiveDateTime) -> Self {
        self.recorded = Some([
            (date.year() - 1900).clamp(0, 255) as u8,
            date.month() as u8,
            date.day() as u8,
            date.hour() as u8,
            date.minute() as u8,
            date.second() as u8,
            0,
        ]);
        self
    }

    fn ensure_dir(nodes: &mut Vec<DirNode>, path: &str) -> usize {
        if path.is_empty() {
            return 0;
        }
        if let Some(index) = nodes.iter().position(|n| n.path == path) {
            return index;
        }
        let (parent_path, name) = split_parent(path);
        let parent = Self::ensure_dir(nodes, parent_path);
        nodes.push(DirNode {
            path: path.to_string(),
            name: name.to_string(),
            parent,
            subdirs: Vec::new(),
            files: Vec::new(),
            lba: 0,
            size: 0,
        });
        let index = nodes.len() - 1;
        nodes[parent].subdirs.push(index);
        index
    }

    fn entries(&self, nodes: &[DirNode], node: usize) -> Vec<Entry> {
        let mut children: Vec<Entry> = nodes[node]
            .subdirs
            .iter()
            .map(|&d| Entry {
                name: nodes[d].name.as_bytes().to_vec(),
                target: EntryTarget::Dir(d),
            })
            .chain(nodes[node].files.iter().map(|&f| {
                let (_, name) = split_parent(&self.files[f].0);
                Entry {
                    name: format!("{};1", name).into_bytes(),
                    target: EntryTarget::File(f),
                }
            }))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries = vec![
            Entry {
                name: vec![0],
                target: EntryTarget::Current,
            },
            Entry {
                name: vec![1],
                target: EntryTarget::Parent,
            },
        ];
        entries.extend(children);
        entries
    }

    /// Lay out and serialize the image
    pub fn build(&self) -> BuiltIso {
        let base = self.base_lba;
        let date = self.recorded.unwrap_or(DEFAULT_RECORDED);

        let mut nodes = vec![DirNode {
            path: String::new(),
            name: String::new(),
            parent: 0,
            subdirs: Vec::new(),
            files: Vec::new(),
            lba: 0,
            size: 0,
        }];
        for dir in &self.dirs {
            Self::ensure_dir(&mut nodes, dir);
        }
        for (index, (path, _)) in self.files.iter().enumerate() {
            let (parent_path, _) = split_parent(path);
            let parent = Self::ensure_dir(&mut nodes, parent_path);
            nodes[parent].files.push(index);
        }

        // Path table order: breadth first, siblings sorted by name
        let mut order = vec![0usize];
        let mut cursor = 0;
        while cursor < order.len() {
            let mut subdirs = nodes[order[cursor]].subdirs.clone();
            subdirs.sort_by(|a, b| nodes[*a].name.cmp(&nodes[*b].name));
            order.extend(subdirs);
            cursor += 1;
        }
        let mut table_number = vec![0u16; nodes.len()];
        for (number, &node) in order.iter().enumerate() {
            table_number[node] = (number + 1) as u16;
        }

        let entries: Vec<Vec<Entry>> = (0..nodes.len()).map(|n| self.entries(&nodes, n)).collect();

        // Assign addresses
        let table_len: usize = order
            .iter()
            .map(|&n| {
                let len = nodes[n].name.len().max(1);
                8 + len + len % 2
            })
            .sum();
        let mut next = PATH_TABLE_LBA + table_len.div_ceil(SECTOR_SIZE).max(1) as u32;
        for &node in &order {
            let (_, size) = layout(&entries[node]);
            nodes[node].lba = base + next;
            nodes[node].size = size;
            next += size / SECTOR_SIZE as u32;
        }
        let mut file_lbas = Vec::with_capacity(self.files.len());
        for (_, data) in &self.files {
            file_lbas.push(base + next);
            next += data.len().div_ceil(SECTOR_SIZE) as u32;
        }

        let mut data = vec![0u8; next as usize * SECTOR_SIZE];
        let sector = |lba: u32| (lba - base) as usize * SECTOR_SIZE;

        // Primary volume descriptor
        let pvd = &mut data[sector(base + PVD_LBA)..sector(base + PVD_LBA + 1)];
        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[6] = 1;
        put_padded(pvd, 8, 32, "PLAYSTATION");
        put_padded(pvd, 40, 32, &self.volume_id);
        put_both_u32(pvd, 80, base + next);
        put_both_u16(pvd, 120, 1);
        put_both_u16(pvd, 124, 1);
        put_both_u16(pvd, 128, SECTOR_SIZE as u16);
        put_both_u32(pvd, 132, table_len as u32);
        pvd[140..144].copy_from_slice(&(base + PATH_TABLE_LBA).to_le_bytes());
        write_record(&mut pvd[156..190], nodes[0].lba, nodes[0].size, true, &[0], &date);
        put_padded(pvd, 190, 128, "");
        pvd[881] = 1;

        // Terminator
        let term = sector(base + PVD_LBA + 1);
        data[term] = 0xFF;
        data[term + 1..term + 6].copy_from_slice(b"CD001");
        data[term + 6] = 1;

        // Type-L path table
        let mut pos = sector(base + PATH_TABLE_LBA);
        for &node in &order {
            let name = if node == 0 {
                vec![0]
            } else {
                nodes[node].name.as_bytes().to_vec()
            };
            data[pos] = name.len() as u8;
            data[pos + 1] = 0;
            data[pos + 2..pos + 6].copy_from_slice(&nodes[node].lba.to_le_bytes());
            data[pos + 6..pos + 8].copy_from_slice(&table_number[nodes[node].parent].to_le_bytes());
            data[pos + 8..pos + 8 + name.len()].copy_from_slice(&name);
            pos += 8 + name.len() + name.len() % 2;
        }

        // Directory extents
        for &node in &order {
            let (offsets, _) = layout(&entries[node]);
            let start = sector(nodes[node].lba);
            for (entry, offset) in entries[node].iter().zip(offsets) {
                let (lba, size, is_dir) = match entry.target {
                    EntryTarget::Current => (nodes[node].lba, nodes[node].size, true),
                    EntryTarget::Parent => {
                        let parent = &nodes[nodes[node].parent];
                        (parent.lba, parent.size, true)
                    }
                    EntryTarget::Dir(d) => (nodes[d].lba, nodes[d].size, true),
                    EntryTarget::File(f) => (file_lbas[f], self.files[f].1.len() as u32, false),
                };
                write_record(&mut data[start + offset..], lba, size, is_dir, &entry.name, &date);
            }
        }

        // File data
        let mut files = HashMap::new();
        for ((path, contents), &lba) in self.files.iter().zip(&file_lbas) {
            let start = sector(lba);
            data[start..start + contents.len()].copy_from_slice(contents);
            files.insert(path.clone(), (lba, contents.len() as u32));
        }

        let dirs = nodes.iter().map(|n| (n.path.clone(), n.lba)).collect();

        log::debug!(
            "Built ISO image '{}': {} sectors, {} directories, {} files",
            self.volume_id,
            next,
            nodes.len(),
            self.files.len()
        );

        BuiltIso {
            data,
            base_lba: base,
            files,
            dirs,
        }
    }
}

impl BuiltIso {
    /// Recorded LBA of a file
    pub fn file_lba(&self, path: &str) -> Option<u32> {
        self.files.get(&normalize(path)).map(|&(lba, _)| lba)
    }

    /// Recorded size of a file
    pub fn file_size(&self, path: &str) -> Option<u32> {
        self.files.get(&normalize(path)).map(|&(_, size)| size)
    }

    /// Recorded LBA of a directory (`""` for the root)
    pub fn dir_lba(&self, path: &str) -> Option<u32> {
        self.dirs.get(&normalize(path)).copied()
    }

    /// Image bytes, starting at the base LBA
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable image bytes, for corrupting structures in tests
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Byte offset of `lba` within [`data`](Self::data)
    pub fn offset_of(&self, lba: u32) -> usize {
        (lba - self.base_lba) as usize * SECTOR_SIZE
    }

    /// Wrap the image as a single-session disc
    ///
    /// Images with a non-zero base LBA are preceded by empty sectors.
    pub fn into_disc(self) -> DiscImage {
        if self.base_lba == 0 {
            return DiscImage::from_iso(&self.data);
        }
        let mut bytes = vec![0u8; self.base_lba as usize * SECTOR_SIZE];
        bytes.extend_from_slice(&self.data);
        DiscImage::from_iso(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_le(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_descriptor_layout() {
        let iso = IsoBuilder::new().volume_id("MYDISC").build();
        let pvd = &iso.data()[16 * 2048..17 * 2048];
        assert_eq!(pvd[0], 1);
        assert_eq!(&pvd[1..6], b"CD001");
        assert_eq!(&pvd[40..48], b"MYDISC  ");
        assert_eq!(u32_le(pvd, 140), 18);
        assert_eq!(pvd[156], 34);
        assert_eq!(u32_le(pvd, 158), iso.dir_lba("").unwrap());
        assert_eq!(iso.data()[17 * 2048], 0xFF);
    }

    #[test]
    fn test_path_table_order() {
        let iso = IsoBuilder::new()
            .dir("ZETA")
            .dir("ALPHA/INNER")
            .file("BETA/X.BIN", vec![1])
            .build();
        let table = &iso.data()[18 * 2048..];

        // Root first, with a single zero byte name and itself as parent
        assert_eq!(&table[..2], &[1, 0]);
        assert_eq!(u16::from_le_bytes([table[6], table[7]]), 1);
        assert_eq!(table[8], 0);

        let mut pos = 10;
        let mut names = Vec::new();
        while table[pos] != 0 {
            let len = table[pos] as usize;
            names.push(String::from_utf8(table[pos + 8..pos + 8 + len].to_vec()).unwrap());
            pos += 8 + len + len % 2;
        }
        assert_eq!(names, vec!["ALPHA", "BETA", "ZETA", "INNER"]);
    }

    #[test]
    fn test_large_directory_spans_sectors() {
        let mut builder = IsoBuilder::new();
        for i in 0..80 {
            builder = builder.file(&format!("FILE{:03}.DAT", i), vec![i as u8; 10]);
        }
        let iso = builder.build();
        let root = iso.dir_lba("").unwrap();
        let offset = iso.offset_of(root);
        // Size recorded in the "." record
        let size = u32_le(iso.data(), offset + 10);
        assert!(size > 2048);
        assert_eq!(size % 2048, 0);
    }

    #[test]
    fn test_base_lba_makes_addresses_absolute() {
        let iso = IsoBuilder::new().base_lba(1000).file("A.TXT", vec![7; 3]).build();
        assert_eq!(u32_le(iso.data(), 16 * 2048 + 140), 1018);
        assert!(iso.file_lba("A.TXT").unwrap() > 1018);
        assert_eq!(iso.data()[iso.offset_of(iso.file_lba("a.txt").unwrap())], 7);
    }
}
