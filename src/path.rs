use std::ffi::OsStr;

use crate::consts::InodePointer;
use crate::driver::DeviceDriver;
use crate::fs::FS;
use crate::inode::Inode;
use crate::util::error::{Error, Result};

/// Non-empty `/`-separated components; repeated and trailing separators
/// are ignored.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|component| !component.is_empty())
}

/// Splits a path into its parent path and final component.
///
/// `"/a/b/"` gives `("/a", "b")`, `"name"` gives `("/", "name")`. The root
/// itself has no final component.
pub fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::invalid(format!("{:?} has no final component", path)));
    }
    Ok(match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("/", trimmed),
    })
}

impl<A: DeviceDriver> FS<A> {
    /// Walks `path` from `start` one directory lookup per component.
    pub fn resolve(&self, path: &str, start: InodePointer) -> Result<Inode> {
        let mut current = self.load_inode(start)?;
        for component in components(path) {
            if !current.is_dir() {
                return Err(Error::NotADirectory);
            }
            let entry = self.find_entry(&current, OsStr::new(component))?;
            current = self.load_inode(entry.ino)?;
        }
        Ok(current)
    }
}
