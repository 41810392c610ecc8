// SPDX-License-Identifier: MIT

mod utils;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use blkio::prelude::*;
use parttab::{
    EditOptions, EditOutcome, GeometryMode, PartitionFlags, PartitionReport, PartitionTable,
    RereadStatus, Scheme, ScrubOptions,
};

use crate::utils::*;

#[derive(Parser)]
#[command(name = "parttool", version, about = "Partition table tool", long_about = None)]
struct Cli {
    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Print parse decisions and I/O steps
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EditArgs {
    /// Alignment: 'ignore', 'probe' or HEADS/SECTORS (MBR only)
    #[arg(long, default_value = "ignore", value_parser = parse_geometry)]
    geometry: GeometryMode,
    /// Fail when the kernel refuses to reread the table
    #[arg(long)]
    require_reread: bool,
}

impl EditArgs {
    fn options(&self) -> EditOptions<'static> {
        EditOptions {
            geometry: self.geometry,
            require_kernel_reread: self.require_reread,
            cancel: None,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print UDISKS_* keys for a disk, or for the partition at --offset
    Probe {
        device: PathBuf,
        /// Any byte offset inside the partition to report
        #[arg(long, value_parser = parse_size)]
        offset: Option<u64>,
        /// Disk name reported as the partition's slave
        #[arg(long)]
        slave: Option<String>,
    },
    /// List the partition table
    Show { device: PathBuf },
    /// Write an empty table: mbr, gpt, apm or none
    Mklabel {
        device: PathBuf,
        scheme: Scheme,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// Add a partition
    Add {
        device: PathBuf,
        #[arg(long, value_parser = parse_size)]
        offset: u64,
        #[arg(long, value_parser = parse_size)]
        size: u64,
        /// MBR type byte (0x83) or GPT type GUID
        #[arg(long = "type")]
        part_type: String,
        #[arg(long, default_value = "")]
        label: String,
        /// Flag tokens, comma separated (boot, required, ...)
        #[arg(long, default_value = "")]
        flags: String,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// Delete the partition covering --offset
    Delete {
        device: PathBuf,
        #[arg(long, value_parser = parse_size)]
        offset: u64,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// Move, resize or retag the partition covering --offset
    Change {
        device: PathBuf,
        #[arg(long, value_parser = parse_size)]
        offset: u64,
        #[arg(long, value_parser = parse_size)]
        new_offset: Option<u64>,
        #[arg(long, value_parser = parse_size)]
        new_size: Option<u64>,
        #[arg(long = "type")]
        part_type: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        flags: Option<String>,
        #[command(flatten)]
        edit: EditArgs,
    },
    /// Zero signature regions, or the whole range with --passes 1
    Scrub {
        device: PathBuf,
        #[arg(long, value_parser = parse_size, default_value = "0")]
        offset: u64,
        /// Defaults to the rest of the device
        #[arg(long, value_parser = parse_size)]
        size: Option<u64>,
        #[arg(long, default_value_t = 0)]
        passes: u32,
    },
}

fn open(device: &Path, writable: bool) -> anyhow::Result<FileBlockIO> {
    let io = FileBlockIO::open(device, writable)
        .with_context(|| format!("cannot open {}", device.display()))?;
    log::debug!(
        "{}: {} bytes, {}-byte blocks",
        device.display(),
        io.size_bytes(),
        io.logical_block_size()
    );
    Ok(io)
}

fn report(what: &str, out: &EditOutcome) {
    let index = out.index.map(|i| format!(" #{i}")).unwrap_or_default();
    log::info!(
        "{what} {}{index}: offset {} size {}",
        out.scheme,
        out.offset,
        parttab::utils::pretty_bytes(out.size)
    );
    match &out.reread {
        RereadStatus::Done | RereadStatus::Skipped => {}
        RereadStatus::Failed(e) => log::warn!("kernel still uses the old table: {e}"),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = LogLevel::from_flags(cli.quiet, cli.verbose);
    init_logger(level);

    match cli.command {
        Commands::Probe {
            device,
            offset,
            slave,
        } => {
            let mut io = open(&device, false)?;
            let r = match offset {
                Some(offset) => {
                    let slave = slave.unwrap_or_else(|| device.display().to_string());
                    PartitionReport::for_partition(&mut io, offset, &slave)
                }
                None => PartitionReport::for_disk(&mut io),
            }
            .with_context(|| format!("probe of {} failed", device.display()))?;
            print!("{r}");
        }
        Commands::Show { device } => {
            let mut io = open(&device, false)?;
            match parttab::parse(&mut io).context("parse failed")? {
                Some(table) => {
                    println!(
                        "{} {} ({})",
                        device.display().to_string().bold(),
                        table.scheme().to_string().cyan(),
                        parttab::utils::pretty_bytes(io.size_bytes())
                    );
                    print!("{table}");
                    if !table.warnings().is_empty() {
                        log::warn!("{:?}", table.warnings());
                    }
                }
                None => println!("{}: no partition table", device.display()),
            }
        }
        Commands::Mklabel {
            device,
            scheme,
            edit,
        } => {
            let mut io = open(&device, true)?;
            let out = parttab::create_empty_table(&mut io, scheme, &edit.options())
                .with_context(|| format!("cannot write a {scheme} table"))?;
            report("created", &out);
        }
        Commands::Add {
            device,
            offset,
            size,
            part_type,
            label,
            flags,
            edit,
        } => {
            let flags = PartitionFlags::parse_tokens(&flags)?;
            let mut io = open(&device, true)?;
            let out = parttab::add_partition(
                &mut io,
                offset,
                size,
                &part_type,
                &label,
                flags,
                &edit.options(),
            )
            .context("add failed")?;
            report("added", &out);
        }
        Commands::Delete {
            device,
            offset,
            edit,
        } => {
            let mut io = open(&device, true)?;
            let out = parttab::delete_partition(&mut io, offset, &edit.options())
                .context("delete failed")?;
            report("deleted", &out);
        }
        Commands::Change {
            device,
            offset,
            new_offset,
            new_size,
            part_type,
            label,
            flags,
            edit,
        } => {
            let flags = flags
                .as_deref()
                .map(PartitionFlags::parse_tokens)
                .transpose()?;
            let mut io = open(&device, true)?;
            let (cur_offset, cur_size) = {
                let table = PartitionTable::read(&mut io).context("parse failed")?;
                let (t, index) = table.find(offset);
                let e = index
                    .and_then(|i| t.get_entry(i))
                    .with_context(|| format!("no partition at offset {offset}"))?;
                (e.offset_bytes(), e.size_bytes())
            };
            let out = parttab::change_partition(
                &mut io,
                offset,
                new_offset.unwrap_or(cur_offset),
                new_size.unwrap_or(cur_size),
                part_type.as_deref(),
                label.as_deref(),
                flags,
                &edit.options(),
            )
            .context("change failed")?;
            report("changed", &out);
        }
        Commands::Scrub {
            device,
            offset,
            size,
            passes,
        } => {
            let mut io = open(&device, true)?;
            let size = size.unwrap_or_else(|| io.size_bytes().saturating_sub(offset));
            let pb = percent_bar("scrub", level == LogLevel::Quiet || passes == 0);
            let mut progress = |p: u32| pb.set_position(p as u64);
            let mut opts = ScrubOptions {
                passes,
                ..ScrubOptions::default()
            }
            .with_progress(&mut progress);
            parttab::scrub(&mut io, offset, size, &mut opts).context("scrub failed")?;
            pb.finish_and_clear();
            log::info!(
                "scrubbed {} at offset {offset}",
                parttab::utils::pretty_bytes(size)
            );
        }
    }

    Ok(())
}
