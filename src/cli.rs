use std::path::PathBuf;

use clap::Parser;
use tinyfs::fuse::MountOptions;
use tinyfs::Geometry;

/// Mount a tinyfs disk image through FUSE
#[derive(Parser, Debug)]
#[command(name = "tinyfs", version)]
pub struct Cli {
    /// Disk image; created and formatted when missing
    pub image: PathBuf,

    /// Directory to mount the image on
    pub mountpoint: PathBuf,

    /// Block size of a newly formatted image
    #[arg(long, default_value_t = 4096)]
    pub block_size: u32,

    /// Inode count of a newly formatted image
    #[arg(long, default_value_t = 1024)]
    pub inodes: u32,

    /// Total blocks of a newly formatted image, metadata included
    #[arg(long, default_value_t = 16384)]
    pub blocks: u32,

    /// Discard an existing image and format a fresh one
    #[arg(long)]
    pub format: bool,

    /// Let other users access the mount
    #[arg(long)]
    pub allow_other: bool,

    /// Unmount automatically when the process exits
    #[arg(long)]
    pub auto_unmount: bool,
}

impl Cli {
    pub fn geometry(&self) -> Geometry {
        Geometry { block_size: self.block_size, max_inodes: self.inodes, max_blocks: self.blocks }
    }

    pub fn mount_options(&self) -> MountOptions {
        MountOptions { allow_other: self.allow_other, auto_unmount: self.auto_unmount }
    }
}
