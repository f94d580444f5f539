pub mod consts;
pub mod directory;
pub mod driver;
pub mod fuse;
pub mod inode;
pub mod ops;
pub mod path;
pub mod superblock;
pub mod util;

mod bitmap;
mod file;
mod fs;
mod inode_table;
mod io;

#[cfg(test)]
mod testing;

pub use fs::FS;
pub use inode::{InodeKind, Owner};
pub use ops::{Listing, Stat, Usage};
pub use superblock::Geometry;
pub use util::error::{Error, Resource, Result};
