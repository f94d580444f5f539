mod cli;

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};
use tinyfs::{fuse, FS};

use crate::cli::Cli;

fn run(cli: &Cli) -> tinyfs::Result<()> {
    if cli.format && cli.image.exists() {
        info!("discarding existing image {}", cli.image.display());
        std::fs::remove_file(&cli.image)?;
    }
    let fs = FS::mount(&cli.image, cli.geometry())?;
    fuse::mount(fs, &cli.mountpoint, &cli.mount_options())
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
