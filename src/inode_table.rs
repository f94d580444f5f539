use crate::consts::{BlockPointer, InodePointer};
use crate::driver::DeviceDriver;
use crate::inode::Inode;
use crate::io::IO;
use crate::superblock::SuperBlock;
use crate::util::error::{Error, Result};
use crate::util::serializable::{ByteSerializable, KnownSize};

/// Fixed-size inode records packed back to back from `inode_start`.
#[derive(Debug, Clone, Copy)]
pub struct InodeTable {
    table_index: BlockPointer,
    inode_count: u32,
    inodes_per_block: u32,
}

impl InodeTable {
    pub fn new(superblock: &SuperBlock) -> InodeTable {
        InodeTable {
            table_index: superblock.inode_start,
            inode_count: superblock.max_inodes,
            inodes_per_block: superblock.inodes_per_block(),
        }
    }

    /// Zeroes every table block so unused records decode as invalid.
    pub fn create<A: DeviceDriver>(&self, io: &IO<A>, block_count: u32) -> Result<()> {
        let zero = io.empty_block();
        for i in 0..block_count {
            io.write_block(self.table_index + i, &zero)?;
        }
        Ok(())
    }

    pub fn read_inode<A: DeviceDriver>(&self, io: &IO<A>, index: InodePointer) -> Result<Inode> {
        let (inode_block, offset) = self.locate(index)?;
        let block = io.read_block(inode_block)?;
        Inode::from_bytes(&block[offset..offset + Inode::size_on_disk()])
    }

    /// Read-modify-write of the containing block; sibling records are kept.
    pub fn write_inode<A: DeviceDriver>(&self, io: &IO<A>, inode: &Inode) -> Result<()> {
        let (inode_block, offset) = self.locate(inode.id)?;
        let mut block = io.read_block(inode_block)?;
        block[offset..offset + Inode::size_on_disk()].copy_from_slice(&inode.to_bytes());
        io.write_block(inode_block, &block)
    }

    #[inline]
    fn locate(&self, index: InodePointer) -> Result<(BlockPointer, usize)> {
        if index >= self.inode_count {
            return Err(Error::invalid(format!(
                "inode {} out of range (count {})",
                index, self.inode_count
            )));
        }
        let block = self.table_index + index / self.inodes_per_block;
        let offset = (index % self.inodes_per_block) as usize * Inode::size_on_disk();
        Ok((block, offset))
    }
}
