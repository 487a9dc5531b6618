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
//! cdfs-inspect entry point
//!
//! Mounts a disc image in the simulated drive and walks its ISO9660 file
//! system through the same driver stack a game would use. Configuration is
//! read from `cdfs.toml` when present; `CDFS_*` variables (also from a
//! `.env` file) override it.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use psrx_cdfs::core::cdrom::{CdDriver, Position, Region};
use psrx_cdfs::core::config::{DriverConfig, DEFAULT_CONFIG_PATH};
use psrx_cdfs::core::iso::{CdFile, IsoFs};
use psrx_cdfs::core::sim::{DiscImage, IsoBuilder, SimDrive};

#[derive(Parser, Debug)]
#[command(name = "cdfs-inspect", version, about = "Inspect PlayStation disc images")]
struct Cli {
    /// Disc image (.cue, .bin or .iso)
    #[arg(short, long, conflicts_with = "demo")]
    image: Option<PathBuf>,

    /// Use a small built-in disc instead of an image
    #[arg(long)]
    demo: bool,

    /// Driver configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the volume label
    Label,
    /// List every directory in the path table
    Dirs,
    /// List a directory
    Ls {
        /// Directory path, e.g. `\DATA`
        #[arg(default_value = "\\")]
        path: String,
    },
    /// Locate a file
    Find {
        /// File path, e.g. `cdrom:\DATA\LEVEL1.BIN;1`
        path: String,
    },
    /// Dump a file to stdout or to a host file
    Cat {
        /// File path on the disc
        path: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Re-root the file system at another session and print its label
    Session {
        /// Session number (1-based)
        number: u8,
    },
    /// Print the table of contents
    Toc,
    /// Print the drive region
    Region,
}

#[derive(Serialize)]
struct SessionInfo {
    session: u8,
    start_lba: i32,
    label: String,
}

#[derive(Serialize)]
struct DirInfo {
    path: String,
    lba: u32,
    parent: u16,
}

#[derive(Serialize)]
struct Located<'a> {
    #[serde(flatten)]
    file: &'a CdFile,
    lba: i32,
}

fn demo_disc() -> DiscImage {
    IsoBuilder::new()
        .volume_id("CDFS_DEMO")
        .file("SYSTEM.CNF", b"BOOT = cdrom:\\MAIN.EXE;1\r\n".to_vec())
        .file("MAIN.EXE", vec![0; 4096])
        .file("DATA/LEVEL1.BIN", vec![0x11; 10_000])
        .file("DATA/LEVEL2.BIN", vec![0x22; 6_000])
        .dir("MOVIES")
        .build()
        .into_disc()
}

fn load_config(path: &str) -> Result<DriverConfig, Box<dyn std::error::Error>> {
    let mut config = DriverConfig::load_or_default(path)?;
    config.apply_env()?;
    log::debug!("Driver config: {:?}", config);
    Ok(config)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_listing(files: &[CdFile], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        return print_json(files);
    }
    for file in files {
        let date = file
            .recorded
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let kind = if file.is_dir { "<DIR>" } else { "" };
        println!(
            "{:>8} {:>10} {:16} {:5} {}",
            file.lba(),
            file.size,
            date,
            kind,
            file.name
        );
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli.config)?;

    let disc = match (&cli.image, cli.demo) {
        (Some(path), _) => {
            let path = path.to_string_lossy();
            log::info!("Loading disc image: {}", path);
            DiscImage::open(&path)?
        }
        (None, true) => demo_disc(),
        (None, false) => return Err("either --image or --demo is required".into()),
    };
    log::info!(
        "Disc: {} track(s), {} session(s), {} sectors",
        disc.track_count(),
        disc.sessions().len(),
        disc.sector_count()
    );

    let mut cd = CdDriver::new(SimDrive::with_disc(disc), config);
    cd.init()?;

    match cli.command {
        Action::Toc => {
            let toc: Vec<Position> = cd.get_toc()?;
            if cli.json {
                return print_json(&toc);
            }
            for pos in &toc {
                println!("Track {:2}: {} (LBA {})", pos.track, pos, pos.to_lba());
            }
            Ok(())
        }
        Action::Region => {
            let region: Region = cd.get_region()?;
            if cli.json {
                return print_json(&region);
            }
            println!("{:?}", region);
            Ok(())
        }
        command => run_fs(IsoFs::new(cd), command, cli.json),
    }
}

fn run_fs(
    mut fs: IsoFs<SimDrive>,
    command: Action,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Action::Label => {
            let label = fs.volume_label()?;
            if json {
                print_json(&label)?;
            } else {
                println!("{}", label);
            }
        }
        Action::Dirs => {
            fs.volume_label()?;
            let table = fs.path_table();
            let dirs: Vec<DirInfo> = table
                .entries()
                .iter()
                .enumerate()
                .filter_map(|(i, entry)| {
                    Some(DirInfo {
                        path: table.full_path(i + 1)?,
                        lba: entry.lba,
                        parent: entry.parent,
                    })
                })
                .collect();
            if json {
                print_json(&dirs)?;
            } else {
                for dir in &dirs {
                    println!("{:>8} {}", dir.lba, dir.path);
                }
            }
        }
        Action::Ls { path } => {
            let files: Vec<CdFile> = fs.open_dir(&path)?.collect();
            print_listing(&files, json)?;
        }
        Action::Find { path } => {
            let file = fs.search_file(&path)?;
            if json {
                print_json(&Located {
                    file: &file,
                    lba: file.lba(),
                })?;
            } else {
                println!("{} at {} (LBA {}), {} bytes", file.name, file.pos, file.lba(), file.size);
            }
        }
        Action::Cat { path, output } => {
            let file = fs.search_file(&path)?;
            let data = fs.read_file(&file)?;
            match output {
                Some(out) => {
                    std::fs::write(&out, &data)?;
                    log::info!("Wrote {} bytes to {}", data.len(), out.display());
                }
                None => std::io::stdout().lock().write_all(&data)?,
            }
        }
        Action::Session { number } => {
            let start_lba = fs.load_session(number)?;
            let label = fs.volume_label()?;
            if json {
                print_json(&SessionInfo {
                    session: number,
                    start_lba,
                    label,
                })?;
            } else {
                println!("Session {} at LBA {}: {}", number, start_lba, label);
            }
        }
        Action::Toc | Action::Region => {}
    }
    log::debug!("File system status: {:?}", fs.last_error());
    Ok(())
}

fn main() {
    dotenvy::dotenv().ok();

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
