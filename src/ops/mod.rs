use std::ffi::{OsStr, OsString};

use log::debug;

use crate::consts::{InodePointer, ROOT_INODE};
use crate::directory::check_name;
use crate::driver::DeviceDriver;
use crate::fs::FS;
use crate::inode::{Inode, InodeKind, Owner};
use crate::path::split_parent;
use crate::util::error::{Error, Result};
use crate::util::mode::{ModeBits, ModeBitsHelper};

pub mod directory;
pub mod file;
pub mod meta;

pub use directory::Listing;
pub use meta::{Stat, Usage};

fn expect_file(inode: Inode) -> Result<Inode> {
    if inode.is_dir() {
        return Err(Error::IsADirectory);
    }
    Ok(inode)
}

/// Shared steps of the façade. None of these lock; every public operation
/// takes the namespace lock exactly once and then calls down here.
impl<A: DeviceDriver> FS<A> {
    /// Allocates an inode of `kind` and links it into `parent` under `name`.
    /// On any failure the new inode and its blocks are released again and the
    /// parent keeps its previous entries.
    pub(crate) fn create_node(
        &self,
        parent: &mut Inode,
        name: &OsStr,
        kind: InodeKind,
        permissions: u16,
        owner: Owner,
    ) -> Result<Inode> {
        if !parent.is_dir() {
            return Err(Error::NotADirectory);
        }
        check_name(name)?;
        if self.contains_entry(parent, name)? {
            return Err(Error::AlreadyExists);
        }

        let id = self.allocate_inode()?;
        let mut child = Inode::new(id, kind, permissions & 0o7777, owner);
        if let Err(e) = self.link_node(parent, &mut child, name) {
            self.rollback(self.discard_inode(&mut child));
            return Err(e);
        }
        Ok(child)
    }

    fn link_node(&self, parent: &mut Inode, child: &mut Inode, name: &OsStr) -> Result<()> {
        if child.is_dir() {
            self.insert_entry(child, child.id, OsStr::new("."))?;
            self.insert_entry(child, parent.id, OsStr::new(".."))?;
            parent.links += 1;
        } else {
            self.write_inode(child)?;
        }
        if let Err(e) = self.insert_entry(parent, child.id, name) {
            if child.is_dir() {
                parent.links -= 1;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Unlinks `name` from `parent` and releases the inode it names, which
    /// must be of `kind`. Directories must hold nothing but `.` and `..`.
    pub(crate) fn remove_node(
        &self,
        parent: &mut Inode,
        name: &OsStr,
        kind: InodeKind,
    ) -> Result<()> {
        if !parent.is_dir() {
            return Err(Error::NotADirectory);
        }
        if name == "." || name == ".." {
            return Err(Error::invalid(format!("cannot remove {:?}", name)));
        }
        let entry = self.find_entry(parent, name)?;
        let mut child = self.load_inode(entry.ino)?;
        match (kind, child.kind) {
            (InodeKind::File, InodeKind::Directory) => return Err(Error::IsADirectory),
            (InodeKind::Directory, InodeKind::File) => return Err(Error::NotADirectory),
            _ => {}
        }
        if child.is_dir() {
            if self.list_entries(&child)?.iter().any(|entry| !entry.is_dot()) {
                return Err(Error::NotEmpty);
            }
            parent.links = parent.links.saturating_sub(1);
        }

        self.remove_entry(parent, name)?;
        self.discard_inode(&mut child)?;
        debug!("removed {:?} (inode {}) from {}", name, child.id, parent.id);
        Ok(())
    }

    fn resolve_parent<'p>(&self, path: &'p str) -> Result<(Inode, &'p OsStr)> {
        let (parent, name) = split_parent(path)?;
        Ok((self.resolve(parent, ROOT_INODE)?, OsStr::new(name)))
    }
}

/// Absolute-path operations, resolved from the root.
impl<A: DeviceDriver> FS<A> {
    pub fn getattr(&self, path: &str) -> Result<Stat> {
        let _guard = self.namespace.read();
        Ok(self.stat_of(&self.resolve(path, ROOT_INODE)?))
    }

    /// Names of every live entry, `.` and `..` included.
    pub fn readdir(&self, path: &str) -> Result<Vec<OsString>> {
        let _guard = self.namespace.read();
        let dir = self.resolve(path, ROOT_INODE)?;
        Ok(self.list_entries(&dir)?.into_iter().map(|entry| entry.name).collect())
    }

    /// Only the permission bits of `mode` are kept.
    pub fn mkdir(&self, path: &str, mode: ModeBits, owner: Owner) -> Result<Stat> {
        let _guard = self.namespace.write();
        let (mut parent, name) = self.resolve_parent(path)?;
        let permissions = mode.get_permissions();
        let child = self.create_node(&mut parent, name, InodeKind::Directory, permissions, owner)?;
        Ok(self.stat_of(&child))
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let _guard = self.namespace.write();
        let (mut parent, name) = self.resolve_parent(path)?;
        self.remove_node(&mut parent, name, InodeKind::Directory)
    }

    /// `mode` may carry the regular-file type bits; any other type is refused.
    pub fn create(&self, path: &str, mode: ModeBits, owner: Owner) -> Result<Stat> {
        if !mode.is_plain_file_request() {
            return Err(Error::invalid(format!("unsupported file type in mode {:o}", mode)));
        }
        let _guard = self.namespace.write();
        let (mut parent, name) = self.resolve_parent(path)?;
        let child =
            self.create_node(&mut parent, name, InodeKind::File, mode.get_permissions(), owner)?;
        Ok(self.stat_of(&child))
    }

    /// Existence check; there are no open-file handles to hand out.
    pub fn open(&self, path: &str) -> Result<InodePointer> {
        Ok(self.getattr(path)?.ino)
    }

    pub fn read(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>> {
        let _guard = self.namespace.read();
        let inode = expect_file(self.resolve(path, ROOT_INODE)?)?;
        self.read_data(&inode, offset, length)
    }

    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let _guard = self.namespace.write();
        let mut inode = expect_file(self.resolve(path, ROOT_INODE)?)?;
        self.write_data(&mut inode, offset, data)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let _guard = self.namespace.write();
        let (mut parent, name) = self.resolve_parent(path)?;
        self.remove_node(&mut parent, name, InodeKind::File)
    }

    pub fn truncate(&self, path: &str, size: u64) -> Result<Stat> {
        let _guard = self.namespace.write();
        let mut inode = expect_file(self.resolve(path, ROOT_INODE)?)?;
        self.truncate_data(&mut inode, size)?;
        Ok(self.stat_of(&inode))
    }
}
