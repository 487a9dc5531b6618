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
//! Path resolution benchmarks

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use psrx_cdfs::core::cdrom::CdDriver;
use psrx_cdfs::core::config::DriverConfig;
use psrx_cdfs::core::iso::{normalize_dir, split_file_path, IsoFs, PathTable, VolumeDescriptor};
use psrx_cdfs::core::sim::{IsoBuilder, SimDrive};

const SECTOR: usize = 2048;

fn deep_tree() -> IsoBuilder {
    let mut builder = IsoBuilder::new().volume_id("BENCH");
    for area in 0..8 {
        for stage in 0..4 {
            builder = builder.file(&format!("AREA{area}/STAGE{stage}/MAP.BIN"), vec![area; 1024]);
        }
    }
    builder
}

fn bench_normalize(c: &mut Criterion) {
    c.bench_function("normalize_dir", |b| {
        b.iter(|| normalize_dir(black_box("cdrom:/area7/stage3/")))
    });
    c.bench_function("split_file_path", |b| {
        b.iter(|| split_file_path(black_box("cdrom:\\AREA7\\STAGE3\\MAP.BIN")))
    });
}

fn bench_path_table(c: &mut Criterion) {
    let iso = deep_tree().build();
    let data = iso.data();
    let Ok(pvd) = VolumeDescriptor::parse(&data[16 * SECTOR..17 * SECTOR]) else {
        return;
    };
    let start = pvd.path_table_lba() as usize * SECTOR;
    let end = start + pvd.path_table_size() as usize;
    let Ok(table) = PathTable::parse(&data[start..end]) else {
        return;
    };

    c.bench_function("path_table_find", |b| {
        b.iter(|| table.find(black_box("\\AREA7\\STAGE3")))
    });
}

fn bench_search_file(c: &mut Criterion) {
    let mut cd = CdDriver::new(
        SimDrive::with_disc(deep_tree().build().into_disc()),
        DriverConfig::default(),
    );
    if cd.init().is_err() {
        return;
    }
    let mut fs = IsoFs::new(cd);

    // Same directory every time: only the first lookup reaches the drive.
    c.bench_function("search_file_cached", |b| {
        b.iter(|| fs.search_file(black_box("\\AREA3\\STAGE1\\MAP.BIN")))
    });
}

criterion_group!(benches, bench_normalize, bench_path_table, bench_search_file);
criterion_main!(benches);
