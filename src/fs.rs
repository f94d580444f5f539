use std::ffi::OsStr;
use std::io;
use std::path::Path;

use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::bitmap::Bitmap;
use crate::consts::{
    BlockPointer, InodePointer, DEFAULT_SECTOR_SIZE, MIN_BLOCK_SIZE, ROOT_INODE, SUPERBLOCK_INDEX,
};
use crate::driver::file_drive::FileDrive;
use crate::driver::DeviceDriver;
use crate::inode::{Inode, InodeKind, Owner};
use crate::inode_table::InodeTable;
use crate::io::IO;
use crate::superblock::{Geometry, SuperBlock};
use crate::util::error::{Error, Resource, Result};
use crate::util::format::human_size;

pub(crate) struct Bitmaps {
    pub(crate) inodes: Bitmap,
    pub(crate) blocks: Bitmap,
}

/// A mounted image.
///
/// The superblock is immutable once mounted and read without locking. Both
/// bitmap caches sit behind one mutex, so allocation and release are
/// serialized. `namespace` orders whole operations: lookups and reads share
/// it, anything that mutates an inode or a directory takes it exclusively.
pub struct FS<A: DeviceDriver> {
    pub(crate) io: IO<A>,
    pub(crate) superblock: SuperBlock,
    pub(crate) inode_table: InodeTable,
    pub(crate) bitmaps: Mutex<Bitmaps>,
    pub(crate) namespace: RwLock<()>,
}

impl FS<FileDrive> {
    /// Opens the image at `path`, formatting a fresh one with `geometry` when
    /// the file does not exist yet.
    pub fn mount(path: impl AsRef<Path>, geometry: Geometry) -> Result<FS<FileDrive>> {
        let path = path.as_ref();
        match FileDrive::open(path, MIN_BLOCK_SIZE) {
            Ok(drive) => {
                let superblock = SuperBlock::read(&drive)?;
                let drive = FileDrive::open(path, sector_size_for(superblock.block_size))?;
                FS::load(drive)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                SuperBlock::new(geometry)?;
                let drive = FileDrive::create(
                    path,
                    geometry.image_bytes(),
                    sector_size_for(geometry.block_size),
                )?;
                FS::format(drive, geometry)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn sector_size_for(block_size: u32) -> usize {
    (block_size as usize).min(DEFAULT_SECTOR_SIZE)
}

impl<A: DeviceDriver> FS<A> {
    /// Lays out a fresh image on `device` and creates the root directory.
    pub fn format(device: A, geometry: Geometry) -> Result<FS<A>> {
        let superblock = SuperBlock::new(geometry)?;
        if device.get_size() < geometry.image_bytes() {
            return Err(Error::invalid(format!(
                "device holds {} bytes, geometry needs {}",
                device.get_size(),
                geometry.image_bytes()
            )));
        }

        let io = IO::new(device, superblock.block_size as usize)?;
        superblock.write(&io)?;

        let inode_table = InodeTable::new(&superblock);
        inode_table.create(&io, superblock.inode_blocks())?;

        let inodes = Bitmap::new(
            superblock.inode_bitmap_block,
            superblock.max_inodes,
            Resource::Inodes,
            io.get_block_size(),
        );
        let mut blocks = Bitmap::new(
            superblock.data_bitmap_block,
            superblock.max_blocks,
            Resource::DataBlocks,
            io.get_block_size(),
        );
        // superblock, both bitmaps and the inode table never hold content
        for block in SUPERBLOCK_INDEX..superblock.data_start {
            blocks.reserve(block)?;
        }
        inodes.write(&io)?;
        blocks.write(&io)?;

        let fs = FS {
            io,
            inode_table,
            superblock,
            bitmaps: Mutex::new(Bitmaps { inodes, blocks }),
            namespace: RwLock::new(()),
        };
        fs.create_root()?;
        fs.io.flush()?;

        info!(
            "formatted {} image: {} blocks of {} bytes, {} inodes, data region at block {}",
            human_size(geometry.image_bytes()),
            fs.superblock.max_blocks,
            fs.superblock.block_size,
            fs.superblock.max_inodes,
            fs.superblock.data_start
        );
        Ok(fs)
    }

    /// Mounts an already formatted device.
    pub fn load(device: A) -> Result<FS<A>> {
        let superblock = SuperBlock::read(&device)?;
        let io = IO::new(device, superblock.block_size as usize)?;
        if io.get_block_count() < superblock.max_blocks as u64 {
            return Err(Error::corrupted(format!(
                "image holds {} blocks, superblock describes {}",
                io.get_block_count(),
                superblock.max_blocks
            )));
        }

        let inodes = Bitmap::read(
            &io,
            superblock.inode_bitmap_block,
            superblock.max_inodes,
            Resource::Inodes,
        )?;
        let blocks = Bitmap::read(
            &io,
            superblock.data_bitmap_block,
            superblock.max_blocks,
            Resource::DataBlocks,
        )?;

        let fs = FS {
            inode_table: InodeTable::new(&superblock),
            io,
            superblock,
            bitmaps: Mutex::new(Bitmaps { inodes, blocks }),
            namespace: RwLock::new(()),
        };
        let root = fs.inode_table.read_inode(&fs.io, ROOT_INODE)?;
        if !root.valid || !root.is_dir() {
            return Err(Error::corrupted("root inode is not a valid directory"));
        }

        info!(
            "mounted image: {} blocks of {} bytes, {} inodes",
            fs.superblock.max_blocks, fs.superblock.block_size, fs.superblock.max_inodes
        );
        Ok(fs)
    }

    /// Flushes the device and closes it.
    pub fn unmount(self) -> Result<()> {
        self.sync()?;
        drop(self.io.into_device());
        info!("unmounted image");
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let _guard = self.namespace.write();
        self.io.flush()
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    pub fn block_size(&self) -> u32 {
        self.superblock.block_size
    }

    fn create_root(&self) -> Result<()> {
        let id = self.allocate_inode()?;
        if id != ROOT_INODE {
            return Err(Error::corrupted(format!("root allocated as inode {}", id)));
        }
        let mut root = Inode::new(ROOT_INODE, InodeKind::Directory, 0o755, Owner::default());
        self.insert_entry(&mut root, ROOT_INODE, OsStr::new("."))?;
        self.insert_entry(&mut root, ROOT_INODE, OsStr::new(".."))
    }

    pub(crate) fn read_inode(&self, id: InodePointer) -> Result<Inode> {
        self.inode_table.read_inode(&self.io, id)
    }

    /// Like `read_inode`, but a released record counts as missing.
    pub(crate) fn load_inode(&self, id: InodePointer) -> Result<Inode> {
        let inode = self.read_inode(id)?;
        if !inode.valid {
            return Err(Error::NotFound);
        }
        Ok(inode)
    }

    pub(crate) fn write_inode(&self, inode: &Inode) -> Result<()> {
        self.inode_table.write_inode(&self.io, inode)
    }

    pub(crate) fn allocate_inode(&self) -> Result<InodePointer> {
        self.bitmaps.lock().inodes.allocate(&self.io)
    }

    pub(crate) fn free_inode(&self, id: InodePointer) -> Result<()> {
        self.bitmaps.lock().inodes.free(&self.io, id)
    }

    /// Hands out a zeroed block from the data region.
    pub(crate) fn allocate_block(&self) -> Result<BlockPointer> {
        let block = self.bitmaps.lock().blocks.allocate(&self.io)?;
        if let Err(e) = self.io.zero_block(block) {
            self.rollback(self.free_block(block));
            return Err(e);
        }
        Ok(block)
    }

    pub(crate) fn free_block(&self, block: BlockPointer) -> Result<()> {
        if block < self.superblock.data_start {
            return Err(Error::invalid(format!(
                "block {} belongs to the metadata region",
                block
            )));
        }
        self.bitmaps.lock().blocks.free(&self.io, block)
    }

    /// Releases an inode: its record first, then its content blocks and its
    /// bit. A failure after the record is cleared only leaks.
    pub(crate) fn discard_inode(&self, inode: &mut Inode) -> Result<()> {
        let detached = self.detach_blocks(inode, 0)?;
        self.write_inode(&Inode::empty(inode.id))?;
        self.free_detached(detached)?;
        self.free_inode(inode.id)
    }

    /// Undo steps run after the operation already failed; their own failure is
    /// logged and the original error is what the caller sees.
    pub(crate) fn rollback(&self, result: Result<()>) {
        if let Err(e) = result {
            warn!("rollback failed, resources may have leaked: {}", e);
        }
    }
}
