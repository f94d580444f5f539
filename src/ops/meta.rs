use std::time::SystemTime;

use crate::consts::InodePointer;
use crate::driver::DeviceDriver;
use crate::fs::FS;
use crate::inode::{Inode, InodeKind};
use crate::util::error::Result;

/// Attributes of one inode as the façade reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub ino: InodePointer,
    pub kind: InodeKind,
    pub size: u64,
    /// `ceil(size / block_size)`
    pub blocks: u64,
    pub links: u32,
    pub permissions: u16,
    pub uid: u32,
    pub gid: u32,
    pub accessed_at: SystemTime,
    pub modified_at: SystemTime,
    pub block_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
}

impl<A: DeviceDriver> FS<A> {
    pub(crate) fn stat_of(&self, inode: &Inode) -> Stat {
        Stat {
            ino: inode.id,
            kind: inode.kind,
            size: inode.size,
            blocks: inode.block_count(self.block_size()),
            links: inode.links,
            permissions: inode.permissions,
            uid: inode.owner.uid,
            gid: inode.owner.gid,
            accessed_at: inode.accessed_at,
            modified_at: inode.modified_at,
            block_size: self.block_size(),
        }
    }

    pub fn stat(&self, ino: InodePointer) -> Result<Stat> {
        let _guard = self.namespace.read();
        Ok(self.stat_of(&self.load_inode(ino)?))
    }

    /// Updates the timestamps that are given; `None` leaves one alone.
    pub fn set_times(
        &self,
        ino: InodePointer,
        accessed_at: Option<SystemTime>,
        modified_at: Option<SystemTime>,
    ) -> Result<Stat> {
        let _guard = self.namespace.write();
        let mut inode = self.load_inode(ino)?;
        if let Some(time) = accessed_at {
            inode.accessed_at = time;
        }
        if let Some(time) = modified_at {
            inode.modified_at = time;
        }
        self.write_inode(&inode)?;
        Ok(self.stat_of(&inode))
    }

    pub fn set_permissions(&self, ino: InodePointer, permissions: u16) -> Result<Stat> {
        let _guard = self.namespace.write();
        let mut inode = self.load_inode(ino)?;
        inode.permissions = permissions & 0o7777;
        self.write_inode(&inode)?;
        Ok(self.stat_of(&inode))
    }

    /// Free and total counts from the bitmap caches; totals include the
    /// metadata blocks.
    pub fn usage(&self) -> Usage {
        let bitmaps = self.bitmaps.lock();
        Usage {
            block_size: self.block_size(),
            total_blocks: bitmaps.blocks.capacity() as u64,
            free_blocks: bitmaps.blocks.free_count() as u64,
            total_inodes: bitmaps.inodes.capacity() as u64,
            free_inodes: bitmaps.inodes.free_count() as u64,
        }
    }
}
