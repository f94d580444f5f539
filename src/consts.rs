pub const MAGIC: u32 = 0x5C3A_F00D;

pub(crate) const SUPERBLOCK_INDEX: BlockPointer = 0;
pub(crate) const INODE_BITMAP_INDEX: BlockPointer = 1;
pub(crate) const DATA_BITMAP_INDEX: BlockPointer = 2;
pub(crate) const INODE_REGION_INDEX: BlockPointer = 3;

pub const ROOT_INODE: InodePointer = 0;

pub const DIRECT_POINTERS: usize = 16;
pub const INDIRECT_POINTERS: usize = 8;

pub const INODE_SIZE: usize = 256;
pub const DIRENT_SIZE: usize = 256;
pub const FILE_NAME_LENGTH: usize = 248;

pub const MIN_BLOCK_SIZE: usize = 256;
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// Block 0 always holds the superblock, so 0 doubles as the "no block" marker
/// in every pointer slot.
pub const NULL_POINTER: BlockPointer = 0;

pub type BlockPointer = u32;
pub type InodePointer = u32;
pub type DirectPointers = [BlockPointer; DIRECT_POINTERS];
pub type IndirectPointers = [BlockPointer; INDIRECT_POINTERS];
