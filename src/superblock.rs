use crate::consts::{
    BlockPointer, DATA_BITMAP_INDEX, INODE_BITMAP_INDEX, INODE_REGION_INDEX, INODE_SIZE, MAGIC,
    MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, SUPERBLOCK_INDEX,
};
use crate::driver::DeviceDriver;
use crate::io::IO;
use crate::util::error::{Error, Result};
use crate::util::serializable::{put_u32, u32_at, ByteSerializable, KnownSize};

/// Format-time sizing of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: u32,
    pub max_inodes: u32,
    /// Total blocks in the image, metadata included.
    pub max_blocks: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry { block_size: 4096, max_inodes: 1024, max_blocks: 16384 }
    }
}

impl Geometry {
    pub fn image_bytes(&self) -> u64 {
        self.block_size as u64 * self.max_blocks as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub magic: u32,
    pub block_size: u32,
    pub max_inodes: u32,
    pub max_blocks: u32,
    pub inode_bitmap_block: BlockPointer,
    pub data_bitmap_block: BlockPointer,
    pub inode_start: BlockPointer,
    pub data_start: BlockPointer,
}

impl SuperBlock {
    /// Lays out the regions for `geometry`, rejecting sizes the single-block
    /// bitmaps or the pointer width cannot describe.
    pub fn new(geometry: Geometry) -> Result<SuperBlock> {
        let Geometry { block_size, max_inodes, max_blocks } = geometry;
        let size = block_size as usize;
        if !size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&size) {
            return Err(Error::invalid(format!(
                "block size {} must be a power of two between {} and {}",
                block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }
        let bits_per_block = block_size * 8;
        if max_inodes == 0 || max_inodes > bits_per_block {
            return Err(Error::invalid(format!(
                "inode count {} must be between 1 and {}",
                max_inodes, bits_per_block
            )));
        }
        if max_blocks > bits_per_block {
            return Err(Error::invalid(format!(
                "block count {} exceeds the {} blocks one bitmap block can track",
                max_blocks, bits_per_block
            )));
        }

        let inodes_per_block = (size / INODE_SIZE) as u32;
        let inode_blocks = max_inodes.div_ceil(inodes_per_block);
        let data_start = INODE_REGION_INDEX + inode_blocks;
        // the root directory needs at least one content block
        if data_start >= max_blocks {
            return Err(Error::invalid(format!(
                "{} blocks leave no data region after {} metadata blocks",
                max_blocks, data_start
            )));
        }

        Ok(SuperBlock {
            magic: MAGIC,
            block_size,
            max_inodes,
            max_blocks,
            inode_bitmap_block: INODE_BITMAP_INDEX,
            data_bitmap_block: DATA_BITMAP_INDEX,
            inode_start: INODE_REGION_INDEX,
            data_start,
        })
    }

    /// Reads the superblock straight from the first sector, before the block
    /// size is known.
    pub fn read<A: DeviceDriver>(device: &A) -> Result<SuperBlock> {
        let sector_size = device.get_sector_size();
        if sector_size < Self::size_on_disk() || device.get_sector_count() == 0 {
            return Err(Error::corrupted("device too small for a superblock"));
        }
        let mut buffer = vec![0u8; sector_size];
        device.read_sector(SUPERBLOCK_INDEX as u64, &mut buffer)?;
        let superblock = SuperBlock::from_bytes(&buffer)?;
        superblock.validate()?;
        Ok(superblock)
    }

    pub fn write<A: DeviceDriver>(&self, io: &IO<A>) -> Result<()> {
        let mut buffer = self.to_bytes();
        buffer.resize(io.get_block_size(), 0);
        io.write_block(SUPERBLOCK_INDEX, &buffer)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::corrupted(format!("bad magic {:#x}", self.magic)));
        }
        let expected = SuperBlock::new(Geometry {
            block_size: self.block_size,
            max_inodes: self.max_inodes,
            max_blocks: self.max_blocks,
        })
        .map_err(|e| Error::corrupted(format!("superblock geometry: {}", e)))?;
        if expected != *self {
            return Err(Error::corrupted("superblock region boundaries are inconsistent"));
        }
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            block_size: self.block_size,
            max_inodes: self.max_inodes,
            max_blocks: self.max_blocks,
        }
    }

    pub fn inodes_per_block(&self) -> u32 {
        self.block_size / INODE_SIZE as u32
    }

    pub fn inode_blocks(&self) -> u32 {
        self.data_start - self.inode_start
    }

    /// Block indices held by one indirect block.
    pub fn pointers_per_block(&self) -> usize {
        self.block_size as usize / std::mem::size_of::<BlockPointer>()
    }
}

impl KnownSize for SuperBlock {
    fn size_on_disk() -> usize {
        32
    }
}

impl ByteSerializable for SuperBlock {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; Self::size_on_disk()];
        put_u32(&mut buffer, 0, self.magic);
        put_u32(&mut buffer, 4, self.block_size);
        put_u32(&mut buffer, 8, self.max_inodes);
        put_u32(&mut buffer, 12, self.max_blocks);
        put_u32(&mut buffer, 16, self.inode_bitmap_block);
        put_u32(&mut buffer, 20, self.data_bitmap_block);
        put_u32(&mut buffer, 24, self.inode_start);
        put_u32(&mut buffer, 28, self.data_start);
        buffer
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::check_length(bytes)?;
        Ok(SuperBlock {
            magic: u32_at(bytes, 0),
            block_size: u32_at(bytes, 4),
            max_inodes: u32_at(bytes, 8),
            max_blocks: u32_at(bytes, 12),
            inode_bitmap_block: u32_at(bytes, 16),
            data_bitmap_block: u32_at(bytes, 20),
            inode_start: u32_at(bytes, 24),
            data_start: u32_at(bytes, 28),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::file_drive::FileDrive;

    #[test]
    fn computes_regions() {
        let superblock = SuperBlock::new(Geometry::default()).unwrap();
        assert_eq!(superblock.inode_bitmap_block, 1);
        assert_eq!(superblock.data_bitmap_block, 2);
        assert_eq!(superblock.inode_start, 3);
        // 1024 inodes of 256 bytes at 16 per block
        assert_eq!(superblock.inode_blocks(), 64);
        assert_eq!(superblock.data_start, 67);
        assert_eq!(superblock.pointers_per_block(), 1024);
    }

    #[test]
    fn rejects_impossible_geometry() {
        let odd = Geometry { block_size: 1000, ..Geometry::default() };
        assert!(SuperBlock::new(odd).is_err());
        let too_many_blocks = Geometry { block_size: 256, max_inodes: 8, max_blocks: 4096 };
        assert!(SuperBlock::new(too_many_blocks).is_err());
        let no_data = Geometry { block_size: 256, max_inodes: 64, max_blocks: 67 };
        assert!(SuperBlock::new(no_data).is_err());
    }

    #[test]
    fn read_write_superblock() {
        let dir = tempfile::tempdir().unwrap();
        let geometry = Geometry { block_size: 1024, max_inodes: 64, max_blocks: 128 };
        let drive =
            FileDrive::create(dir.path().join("sb.img"), geometry.image_bytes(), 512).unwrap();
        let io = IO::new(drive, 1024).unwrap();
        let superblock = SuperBlock::new(geometry).unwrap();
        superblock.write(&io).unwrap();

        let drive = io.into_device();
        assert_eq!(SuperBlock::read(&drive).unwrap(), superblock);
    }

    #[test]
    fn read_blank_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FileDrive::create(dir.path().join("blank.img"), 64 * 512, 512).unwrap();
        assert!(matches!(SuperBlock::read(&drive), Err(Error::Corrupted(_))));
    }
}
