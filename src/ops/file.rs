use std::ffi::OsStr;

use log::debug;

use crate::consts::InodePointer;
use crate::driver::DeviceDriver;
use crate::fs::FS;
use crate::inode::{InodeKind, Owner};
use crate::ops::meta::Stat;
use crate::util::error::{Error, Result};

impl<A: DeviceDriver> FS<A> {
    pub fn create_file(
        &self,
        parent: InodePointer,
        name: &OsStr,
        permissions: u16,
        owner: Owner,
    ) -> Result<Stat> {
        let _guard = self.namespace.write();
        let mut dir = self.load_inode(parent)?;
        let child = self.create_node(&mut dir, name, InodeKind::File, permissions, owner)?;
        debug!("create {:?} in {} -> inode {}", name, parent, child.id);
        Ok(self.stat_of(&child))
    }

    /// Reads never update the access time.
    pub fn read_at(&self, ino: InodePointer, offset: u64, length: usize) -> Result<Vec<u8>> {
        let _guard = self.namespace.read();
        let inode = self.load_inode(ino)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        self.read_data(&inode, offset, length)
    }

    pub fn write_at(&self, ino: InodePointer, offset: u64, data: &[u8]) -> Result<usize> {
        let _guard = self.namespace.write();
        let mut inode = self.load_inode(ino)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        self.write_data(&mut inode, offset, data)
    }

    pub fn remove_file(&self, parent: InodePointer, name: &OsStr) -> Result<()> {
        let _guard = self.namespace.write();
        let mut dir = self.load_inode(parent)?;
        self.remove_node(&mut dir, name, InodeKind::File)
    }

    pub fn set_size(&self, ino: InodePointer, size: u64) -> Result<Stat> {
        let _guard = self.namespace.write();
        let mut inode = self.load_inode(ino)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        self.truncate_data(&mut inode, size)?;
        Ok(self.stat_of(&inode))
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use crate::consts::ROOT_INODE;
    use crate::inode::{InodeKind, Owner};
    use crate::superblock::Geometry;
    use crate::testing::{scratch_fs, small_geometry};
    use crate::util::error::Resource;
    use crate::Error;

    #[test]
    fn create_write_read() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let file = fs.create_file(ROOT_INODE, OsStr::new("f"), 0o644, Owner::default()).unwrap();
        assert_eq!(file.kind, InodeKind::File);
        assert_eq!((file.size, file.links), (0, 1));

        assert_eq!(fs.write_at(file.ino, 0, b"hello world").unwrap(), 11);
        assert_eq!(fs.read_at(file.ino, 6, 100).unwrap(), b"world");
        assert_eq!(fs.stat(file.ino).unwrap().size, 11);
        assert!(matches!(fs.read_at(ROOT_INODE, 0, 1), Err(Error::IsADirectory)));
        assert!(matches!(fs.write_at(ROOT_INODE, 0, b"x"), Err(Error::IsADirectory)));
    }

    #[test]
    fn create_existing_name_fails() {
        let (_dir, fs) = scratch_fs(small_geometry());
        fs.create_file(ROOT_INODE, OsStr::new("f"), 0o644, Owner::default()).unwrap();
        let usage = fs.usage();
        assert!(matches!(
            fs.create_file(ROOT_INODE, OsStr::new("f"), 0o644, Owner::default()),
            Err(Error::AlreadyExists)
        ));
        assert_eq!(fs.usage(), usage);
    }

    #[test]
    fn inode_exhaustion_leaves_no_trace() {
        let geometry = Geometry { block_size: 512, max_inodes: 4, max_blocks: 64 };
        let (_dir, fs) = scratch_fs(geometry);
        for name in ["a", "b", "c"] {
            fs.create_file(ROOT_INODE, OsStr::new(name), 0o644, Owner::default()).unwrap();
        }
        let usage = fs.usage();
        assert!(matches!(
            fs.create_file(ROOT_INODE, OsStr::new("d"), 0o644, Owner::default()),
            Err(Error::ResourceExhausted(Resource::Inodes))
        ));
        assert_eq!(fs.usage(), usage);
        assert_eq!(fs.list(ROOT_INODE).unwrap().len(), 5);
    }

    #[test]
    fn block_exhaustion_releases_the_new_inode() {
        // one slot per block and only a handful of data blocks
        let geometry = Geometry { block_size: 256, max_inodes: 16, max_blocks: 24 };
        let (_dir, fs) = scratch_fs(geometry);
        let mut created = 0;
        let err = loop {
            let name = format!("f{}", created);
            match fs.create_file(ROOT_INODE, OsStr::new(&name), 0o644, Owner::default()) {
                Ok(_) => created += 1,
                Err(e) => break e,
            }
        };
        assert!(matches!(err, Error::ResourceExhausted(Resource::DataBlocks)));
        let usage = fs.usage();
        assert_eq!(usage.free_blocks, 0);
        // root plus every file that made it
        assert_eq!(usage.free_inodes, usage.total_inodes - 1 - created);
    }

    #[test]
    fn unlink_releases_everything() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let usage = fs.usage();
        let file = fs.create_file(ROOT_INODE, OsStr::new("f"), 0o644, Owner::default()).unwrap();
        fs.write_at(file.ino, 0, &vec![7; 20 * 512]).unwrap();

        fs.remove_file(ROOT_INODE, OsStr::new("f")).unwrap();
        assert_eq!(fs.usage(), usage);
        assert!(matches!(fs.stat(file.ino), Err(Error::NotFound)));
        assert!(matches!(fs.remove_file(ROOT_INODE, OsStr::new("f")), Err(Error::NotFound)));
    }

    #[test]
    fn set_size_shrinks_and_grows() {
        let (_dir, fs) = scratch_fs(small_geometry());
        let file = fs.create_file(ROOT_INODE, OsStr::new("f"), 0o644, Owner::default()).unwrap();
        fs.write_at(file.ino, 0, &[1; 1500]).unwrap();

        let stat = fs.set_size(file.ino, 10).unwrap();
        assert_eq!((stat.size, stat.blocks), (10, 1));
        let stat = fs.set_size(file.ino, 2000).unwrap();
        assert_eq!((stat.size, stat.blocks), (2000, 4));

        let data = fs.read_at(file.ino, 0, 4096).unwrap();
        assert_eq!(data.len(), 2000);
        assert_eq!(&data[..10], &[1; 10]);
        assert!(data[10..].iter().all(|b| *b == 0));
    }
}
