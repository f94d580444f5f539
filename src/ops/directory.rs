use std::ffi::{OsStr, OsString};

use log::debug;

use crate::consts::InodePointer;
use crate::driver::DeviceDriver;
use crate::fs::FS;
use crate::inode::{InodeKind, Owner};
use crate::ops::meta::Stat;
use crate::util::error::Result;

/// One `readdir` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub ino: InodePointer,
    pub kind: InodeKind,
    pub name: OsString,
}

impl<A: DeviceDriver> FS<A> {
    pub fn lookup(&self, parent: InodePointer, name: &OsStr) -> Result<Stat> {
        let _guard = self.namespace.read();
        let dir = self.load_inode(parent)?;
        let entry = self.find_entry(&dir, name)?;
        Ok(self.stat_of(&self.load_inode(entry.ino)?))
    }

    /// Every live entry of a directory, `.` and `..` first.
    pub fn list(&self, ino: InodePointer) -> Result<Vec<Listing>> {
        let _guard = self.namespace.read();
        let dir = self.load_inode(ino)?;
        self.list_entries(&dir)?
            .into_iter()
            .map(|entry| {
                let kind = self.load_inode(entry.ino)?.kind;
                Ok(Listing { ino: entry.ino, kind, name: entry.name })
            })
            .collect()
    }

    pub fn make_directory(
        &self,
        parent: InodePointer,
        name: &OsStr,
        permissions: u16,
        owner: Owner,
    ) -> Result<Stat> {
        let _guard = self.namespace.write();
        let mut dir = self.load_inode(parent)?;
        let child = self.create_node(&mut dir, name, InodeKind::Directory, permissions, owner)?;
        debug!("mkdir {:?} in {} -> inode {}", name, parent, child.id);
        Ok(self.stat_of(&child))
    }

    /// Fails with `NotEmpty` unless only `.` and `..` remain.
    pub fn remove_directory(&self, parent: InodePointer, name: &OsStr) -> Result<()> {
        let _guard = self.namespace.write();
        let mut dir = self.load_inode(parent)?;
        self.remove_node(&mut dir, name, InodeKind::Directory)
    }
}
