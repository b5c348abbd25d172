//! SimpleFS Command Line Interface
//!
//! Interactive shell for inspecting and manipulating SimpleFS disk images.

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use simplefs::{BlockDevice, FileBackedDisk};
use std::path::PathBuf;
use std::sync::Arc;

mod shell;

/// SimpleFS - educational inode-based block file system
#[derive(Parser)]
#[command(
    name = "sfssh",
    about = "SimpleFS interactive shell",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Disk image to operate on (created if missing)
    image: PathBuf,

    /// Number of blocks in the disk image
    blocks: u32,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    // The shell exits 1 on bad arguments, so bypass clap's default exit code.
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        std::process::exit(1);
    });

    let log_level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new().filter_level(log_level).init();

    let device: Arc<dyn BlockDevice> = Arc::new(
        FileBackedDisk::open(&cli.image, cli.blocks)
            .with_context(|| format!("failed to open disk image {}", cli.image.display()))?,
    );

    shell::run(device)
}
